//! Log-friendly layout of `PhonSym` reports.
//!
//! Everything here writes to the `phonsym-output` target, which `main` routes to the report
//! file, so that the report stays free of diagnostics.

use std::fmt;

use log;

/// Width of the report, in characters.
const REPORT_WIDTH: usize = 100;

/// Logs an error under the default target and in the report.
macro_rules! phonsym_error {
    ($fmt:expr $(, $($arg:tt)*)?) => {
        log::error!($fmt, $($($arg)*)?);
        log::error!(target: "phonsym-output", $fmt, $($($arg)*)?);
    }
}

/// Logs a warning under the default target and in the report.
macro_rules! phonsym_warn {
    ($fmt:expr $(, $($arg:tt)*)?) => {
        log::warn!($fmt, $($($arg)*)?);
        log::warn!(target: "phonsym-output", $fmt, $($($arg)*)?);
    }
}

/// Adds a line to the report.
macro_rules! phonsym_output {
    ($fmt:expr $(, $($arg:tt)*)?) => { log::info!(target: "phonsym-output", $fmt, $($($arg)*)?) }
}

pub(crate) use {phonsym_error, phonsym_output, phonsym_warn};

fn rule(c: char, len: usize) -> String {
    std::iter::repeat(c).take(len).collect()
}

/// Logs a boxed title spanning the report.
pub(crate) fn log_title(title: &str) {
    let inner = title.chars().count().max(REPORT_WIDTH - 4);
    phonsym_output!("╔{}╗", rule('═', inner + 2));
    phonsym_output!("║ {title:^inner$} ║");
    phonsym_output!("╚{}╝", rule('═', inner + 2));
}

/// Writes a subtitle underlined to its own length.
pub(crate) fn write_subtitle(f: &mut fmt::Formatter<'_>, subtitle: &str) -> fmt::Result {
    writeln!(f, "{subtitle}")?;
    writeln!(f, "{}", rule('─', subtitle.chars().count()))
}

/// Logs a subtitle underlined to its own length.
pub(crate) fn log_subtitle(subtitle: &str) {
    phonsym_output!("{subtitle}");
    phonsym_output!("{}", rule('─', subtitle.chars().count()));
}

fn log_section_marker(tag: &str, name: &str, fill: char) {
    let head = format!("{} {tag} {name} ", rule(fill, 3));
    let pad = REPORT_WIDTH.saturating_sub(head.chars().count());
    phonsym_output!("{head}{}", rule(fill, pad));
}

/// Logs the opening marker of a report section.
pub(crate) fn log_macsec_begin(name: &str) {
    log_section_marker(">>", name, '>');
}

/// Logs the closing marker of a report section.
pub(crate) fn log_macsec_end(name: &str) {
    log_section_marker("<<", name, '<');
}

pub(crate) fn nice_bool(b: bool) -> String {
    if b { "yes" } else { "no" }.to_string()
}

/// Values whose [`fmt::Display`] form goes into the report line by line.
pub(crate) trait PhonSymOutput: fmt::Display {
    fn log_output_display(&self) {
        self.to_string()
            .lines()
            .for_each(|line| phonsym_output!("{line}"));
    }
}

impl<T: fmt::Display + ?Sized> PhonSymOutput for T {}

//! Command-line interface of the `phonsym` binary.

use std::path::PathBuf;

use clap::Parser;

use crate::io::format::phonsym_output;

const VERSION: Option<&str> = option_env!("CARGO_PKG_VERSION");

/// Logs a nicely formatted `PhonSym` heading to the `phonsym-output` logger.
pub fn log_heading() {
    let version = if let Some(ver) = VERSION {
        format!("v{ver}")
    } else {
        "v unknown".to_string()
    };
    phonsym_output!("╭─────────────────────────────────────────────────────────────────────────────────────────────────────╮");
    phonsym_output!("│  ____  _                       ____                                                                │");
    phonsym_output!("│ |  _ \\| |__   ___  _ __  ___  / ___| _   _ _ __ ___                                                │");
    phonsym_output!("│ | |_) | '_ \\ / _ \\| '_ \\/ __| \\___ \\| | | | '_ ` _ \\                                               │");
    phonsym_output!("│ |  __/| | | | (_) | | | \\__ \\  ___) | |_| | | | | | |                                              │");
    phonsym_output!("│ |_|   |_| |_|\\___/|_| |_|___/ |____/ \\__, |_| |_| |_|                                              │");
    phonsym_output!("│                                      |___/                                                         │");
    phonsym_output!("│ Symmetrisation and Fourier interpolation of phonon dynamical matrices                 {version:>13} │");
    phonsym_output!("╰─────────────────────────────────────────────────────────────────────────────────────────────────────╯");
    phonsym_output!("");
}

/// The command-line arguments of the `phonsym` binary.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    pub config: PathBuf,

    /// Path to the output file. If absent, the output is written to the standard output only.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Increases the verbosity of the diagnostic log. May be given twice.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

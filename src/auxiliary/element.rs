//! Element look-up for default atomic masses and atomic numbers.

use std::collections::HashMap;

use anyhow::{self, format_err};
use periodic_table;

use crate::auxiliary::units::MASS_RY_TO_UMA;

#[cfg(test)]
#[path = "element_tests.rs"]
mod element_tests;

/// A struct storing a look-up of element symbols to give atomic numbers and atomic masses.
pub struct ElementMap<'a> {
    /// A [`HashMap`] from a symbol string to a tuple of atomic number and atomic mass in unified
    /// atomic mass units.
    pub map: HashMap<&'a str, (u32, f64)>,
}

impl Default for ElementMap<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl ElementMap<'static> {
    /// Creates a new [`ElementMap`] for all elements in the periodic table.
    ///
    /// Elements whose tabulated mass cannot be parsed are skipped.
    #[must_use]
    pub fn new() -> ElementMap<'static> {
        let map = periodic_table::periodic_table()
            .into_iter()
            .filter_map(|element| {
                parse_atomic_mass(element.atomic_mass)
                    .map(|mass| (element.symbol, (element.atomic_number, mass)))
            })
            .collect::<HashMap<_, _>>();
        ElementMap { map }
    }
}

impl<'a> ElementMap<'a> {
    /// Returns the atomic number and the mass in Rydberg mass units of the element that a
    /// species label refers to.
    ///
    /// # Arguments
    ///
    /// * `label` - A species label. Only its leading alphabetic characters are used, so that
    /// labels such as `O1` or `H_b` resolve to their elements.
    ///
    /// # Errors
    ///
    /// Errors if no element matches the label.
    pub fn lookup(&self, label: &str) -> Result<(u32, f64), anyhow::Error> {
        let symbol = element_symbol(label);
        self.map
            .get(symbol.as_str())
            .map(|(z, mass_uma)| (*z, mass_uma / MASS_RY_TO_UMA))
            .ok_or_else(|| format_err!("Species label `{label}` does not match any element."))
    }
}

/// Extracts the element symbol from a species label, normalising its capitalisation.
fn element_symbol(label: &str) -> String {
    let letters = label
        .trim()
        .chars()
        .take_while(char::is_ascii_alphabetic)
        .collect::<String>();
    let mut chars = letters.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

/// Parses the atomic mass string in the format of [`periodic_table`] to a single float value.
///
/// # Arguments
///
/// * `mass_str` - A string of mass value that is either `x.y(z)` where `z` is the uncertainty in
/// the last digits of `x.y`, or `[x]` where `x` is the mass number in place of precise
/// experimental values.
///
/// # Returns
///
/// The numeric mass value without its uncertainty, or `None` if the string cannot be parsed.
fn parse_atomic_mass(mass_str: &str) -> Option<f64> {
    let mass_str = mass_str.trim();
    let value = match mass_str.strip_prefix('[') {
        Some(rest) => rest.strip_suffix(']')?,
        None => mass_str.split('(').next()?,
    };
    value.trim().parse::<f64>().ok()
}

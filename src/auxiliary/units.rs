//! Unit conversion tables.
//!
//! All quantities handled by the numerical core are in Rydberg atomic units for energies,
//! frequencies, force constants and masses, and in Ångström for lengths. The conversion factors
//! in this module exist for reporting and file input/output only.

use phf::phf_map;

/// Rydberg to wavenumber ($`\mathrm{cm}^{-1}`$).
pub const RY_TO_CM: f64 = 109_691.402_35;

/// Rydberg to terahertz.
pub const RY_TO_THZ: f64 = 3_289.841_960_835_856_3;

/// Rydberg to electronvolt.
pub const RY_TO_EV: f64 = 13.605_693_009;

/// Rydberg to kelvin.
pub const RY_TO_KELVIN: f64 = 157_887.324_003_740_97;

/// Bohr radius to Ångström.
pub const BOHR_TO_ANGSTROM: f64 = 0.529_177_210_67;

/// Rydberg mass unit to unified atomic mass unit.
pub const MASS_RY_TO_UMA: f64 = 1.0 / 911.444_243_096;

/// Boltzmann constant in Rydberg per kelvin.
///
/// This is a physical constant rather than a display conversion; it converts a temperature into
/// the thermal energy entering the Bose–Einstein occupation.
pub const K_B_RY: f64 = 1.0 / RY_TO_KELVIN;

/// Display conversion factors from internal units, keyed by the name of the target unit.
pub static DISPLAY_CONVERSIONS: phf::Map<&'static str, f64> = phf_map! {
    "cm-1" => RY_TO_CM,
    "THz" => RY_TO_THZ,
    "eV" => RY_TO_EV,
    "K" => RY_TO_KELVIN,
    "Ry" => 1.0,
};

/// Converts a frequency or energy from Rydberg into the named display unit.
///
/// # Arguments
///
/// * `value` - The value in Rydberg.
/// * `unit` - The name of the display unit, one of the keys of [`DISPLAY_CONVERSIONS`].
///
/// # Returns
///
/// The converted value, or `None` if the unit is unknown.
pub fn ry_to_display(value: f64, unit: &str) -> Option<f64> {
    DISPLAY_CONVERSIONS.get(unit).map(|factor| value * factor)
}

//! Error kinds raised by the symmetrisation and transformation engine.

use std::error::Error;
use std::fmt;

/// An enumerated type classifying the failures that the engine can report.
///
/// Fallible operations in this crate return [`anyhow::Error`]; whenever the root cause is one of
/// the categories below, the error wraps a [`PhononError`] which can be recovered with
/// [`anyhow::Error::downcast_ref`].
#[derive(Debug, Clone, PartialEq)]
pub enum PhononError {
    /// Malformed input: non-orthogonal rotations, mismatched array lengths, non-square matrices,
    /// missing unit cells, and similar. Never silently corrected.
    Validation(String),

    /// Inconsistent configuration: incommensurate $`q`$-grids, non-integer supercell ratios,
    /// $`q`$-sets that are not closed under the symmetry group.
    Configuration(String),

    /// A numerical check exceeded its threshold.
    ToleranceExceeded {
        /// A description of the quantity being checked.
        what: String,

        /// The measured deviation.
        deviation: f64,

        /// The threshold that was exceeded.
        threshold: f64,
    },
}

impl PhononError {
    /// Returns `true` if this error is a numerical tolerance exceedance, which callers may choose
    /// to treat as a warning only.
    pub fn is_tolerance(&self) -> bool {
        matches!(self, PhononError::ToleranceExceeded { .. })
    }
}

impl fmt::Display for PhononError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhononError::Validation(msg) => write!(f, "Validation failure: {msg}"),
            PhononError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            PhononError::ToleranceExceeded {
                what,
                deviation,
                threshold,
            } => write!(
                f,
                "Tolerance exceeded: {what} deviates by {deviation:.3e} (threshold {threshold:.3e})"
            ),
        }
    }
}

impl Error for PhononError {}

/// Returns early with a [`PhononError::Validation`] error wrapped in [`anyhow::Error`].
macro_rules! validation_bail {
    ($fmt:expr $(, $($arg:tt)*)?) => {
        return Err(anyhow::Error::new($crate::errors::PhononError::Validation(
            format!($fmt, $($($arg)*)?)
        )))
    };
}

/// Returns early with a [`PhononError::Configuration`] error wrapped in [`anyhow::Error`].
macro_rules! configuration_bail {
    ($fmt:expr $(, $($arg:tt)*)?) => {
        return Err(anyhow::Error::new($crate::errors::PhononError::Configuration(
            format!($fmt, $($($arg)*)?)
        )))
    };
}

pub(crate) use {configuration_bail, validation_bail};

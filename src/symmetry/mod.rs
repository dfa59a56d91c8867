//! Space-group symmetry of crystals and its projectors.

#[cfg(feature = "moyo")]
pub mod oracle;
pub mod symmetry_engine;
pub mod symmetry_operation;

//! Helper items describing crystal structures, block matrices and physical units.

pub mod element;
pub mod geometry;
pub mod linalg;
pub mod structure;
pub mod template_structures;
pub mod units;

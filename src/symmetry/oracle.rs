//! Space-group operations from the `moyo` symmetry finder.

use std::sync::Arc;

use anyhow::{self, format_err};
use moyo::base::{AngleTolerance, Cell, Lattice};
use moyo::data::Setting;
use moyo::MoyoDataset;
use nalgebra::{Matrix3, Vector3};

use crate::auxiliary::structure::Structure;
use crate::symmetry::symmetry_engine::{SymmetryEngine, SymmetryParams};

#[cfg(test)]
#[path = "oracle_tests.rs"]
mod oracle_tests;

/// The space group reported by `moyo`.
pub struct OracleSpaceGroup {
    /// The International Tables number of the space group.
    pub number: i32,

    /// The integer rotations in the basis of the input lattice.
    pub rotations: Vec<Matrix3<i32>>,

    /// The fractional translations in the basis of the input lattice.
    pub translations: Vec<Vector3<f64>>,
}

/// Finds the space group of a structure with `moyo`.
///
/// Species are passed to `moyo` as distinct integers in order of first appearance, so that
/// labels such as `H1` and `H2` are treated as different species.
///
/// # Arguments
///
/// * `structure` - The crystal structure.
/// * `symprec` - The distance tolerance passed to `moyo`.
///
/// # Errors
///
/// Errors if the structure has no cell or if `moyo` fails.
pub fn moyo_operations(
    structure: &Structure,
    symprec: f64,
) -> Result<OracleSpaceGroup, anyhow::Error> {
    let lattice = *structure.cell()?;
    let species_types = structure.species_types();
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let numbers = structure
        .species()
        .iter()
        .map(|label| {
            species_types
                .iter()
                .position(|t| t == label)
                .map(|i| i as i32 + 1)
                .ok_or_else(|| format_err!("Unknown species label `{label}`."))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let cell = Cell::new(
        Lattice::new(lattice),
        structure.fractional_positions()?,
        numbers,
    );
    let dataset = MoyoDataset::new(&cell, symprec, AngleTolerance::Default, Setting::Spglib, true)
        .map_err(|err| format_err!("Symmetry search with moyo failed: {err:?}"))?;
    log::debug!(
        "moyo found space group {} with {} operation(s).",
        dataset.number,
        dataset.operations.len()
    );
    let (rotations, translations) = dataset
        .operations
        .iter()
        .map(|op| (op.rotation, op.translation))
        .unzip();
    Ok(OracleSpaceGroup {
        number: dataset.number,
        rotations,
        translations,
    })
}

impl SymmetryEngine {
    /// Constructs the engine from the operations found by `moyo`, validated against the
    /// structure like any externally supplied operations.
    pub fn from_moyo(
        structure: Arc<Structure>,
        params: &SymmetryParams,
    ) -> Result<Self, anyhow::Error> {
        let space_group = moyo_operations(&structure, params.distance_threshold)?;
        Self::from_operations(
            structure,
            &space_group.rotations,
            &space_group.translations,
            params,
        )
    }
}

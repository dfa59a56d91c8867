//! Regular wavevector grids commensurate with diagonal supercells.

use anyhow;
use nalgebra::Vector3;

use crate::auxiliary::geometry;
use crate::auxiliary::structure::{supercell_cells, Structure};
use crate::errors::{configuration_bail, validation_bail};
use crate::phonons::DynamicalMatrixSet;

#[cfg(test)]
#[path = "qgrid_tests.rs"]
mod qgrid_tests;

/// Largest supercell multiplier searched for when deducing the grid of a wavevector set.
const MAX_GRID_MULTIPLIER: usize = 64;

/// Generates the wavevector grid commensurate with a diagonal supercell.
///
/// The grid points have crystal coordinates $`k_i = n_i / N_i`$ folded into
/// $`(-\tfrac{1}{2}, \tfrac{1}{2}]`$, enumerated in the order of [`supercell_cells`], so that
/// $`\Gamma`$ comes first.
///
/// # Arguments
///
/// * `structure` - The primitive structure.
/// * `dims` - The supercell multipliers $`N_i`$.
///
/// # Returns
///
/// The Cartesian wavevectors, without the $`2\pi`$ factor.
///
/// # Errors
///
/// Errors with [`crate::errors::PhononError::Validation`] if a multiplier is zero or the
/// structure has no cell.
pub fn q_grid(structure: &Structure, dims: [usize; 3]) -> Result<Vec<Vector3<f64>>, anyhow::Error> {
    if dims.iter().any(|&n| n == 0) {
        validation_bail!("Grid multipliers {dims:?} must all be positive.");
    }
    let recip_t = structure.reciprocal_vectors()?.transpose();
    #[allow(clippy::cast_precision_loss)]
    let grid = supercell_cells(dims)
        .iter()
        .map(|cell| {
            let k = Vector3::from_fn(|i, _| {
                let x = f64::from(cell[i]) / dims[i] as f64;
                if x > 0.5 + 1e-12 {
                    x - 1.0
                } else {
                    x
                }
            });
            recip_t * k
        })
        .collect();
    Ok(grid)
}

/// Finds the index of the wavevector of a list equivalent to a given one.
///
/// # Arguments
///
/// * `structure` - The primitive structure.
/// * `qs` - The Cartesian wavevectors to search.
/// * `q` - The Cartesian wavevector to look for.
/// * `thresh` - The tolerance on crystal coordinates.
pub fn find_q_index(
    structure: &Structure,
    qs: &[Vector3<f64>],
    q: &Vector3<f64>,
    thresh: f64,
) -> Result<Option<usize>, anyhow::Error> {
    let lattice = structure.cell()?;
    Ok(qs
        .iter()
        .position(|q2| geometry::is_integral(&(lattice * (q - q2)), thresh)))
}

/// Deduces the smallest diagonal supercell with which every wavevector is commensurate.
///
/// # Errors
///
/// Errors with [`crate::errors::PhononError::Configuration`] if a wavevector has an irrational
/// or too fine crystal coordinate.
pub fn commensurate_supercell(
    structure: &Structure,
    qs: &[Vector3<f64>],
    thresh: f64,
) -> Result<[usize; 3], anyhow::Error> {
    let lattice = structure.cell()?;
    let crystal = qs.iter().map(|q| lattice * q).collect::<Vec<_>>();
    let mut dims = [1usize; 3];
    for (i, dim) in dims.iter_mut().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let found = (1..=MAX_GRID_MULTIPLIER).find(|&n| {
            crystal.iter().all(|k| {
                let x = k[i] * n as f64;
                (x - x.round()).abs() < thresh * n as f64
            })
        });
        match found {
            Some(n) => *dim = n,
            None => configuration_bail!(
                "No supercell with at most {MAX_GRID_MULTIPLIER} cells along lattice vector {i} is commensurate with the wavevectors."
            ),
        }
    }
    Ok(dims)
}

/// Checks that a wavevector set is exactly the grid of a diagonal supercell, each point once.
///
/// # Errors
///
/// Errors with [`crate::errors::PhononError::Configuration`] otherwise.
pub fn check_commensurate(
    structure: &Structure,
    qs: &[Vector3<f64>],
    dims: [usize; 3],
    thresh: f64,
) -> Result<(), anyhow::Error> {
    let grid = q_grid(structure, dims)?;
    if grid.len() != qs.len() {
        configuration_bail!(
            "{} wavevector(s) given but the {}x{}x{} grid has {} point(s).",
            qs.len(),
            dims[0],
            dims[1],
            dims[2],
            grid.len()
        );
    }
    let mut hit = vec![false; qs.len()];
    for (ig, q) in grid.iter().enumerate() {
        match find_q_index(structure, qs, q, thresh)? {
            Some(iq) if !hit[iq] => hit[iq] = true,
            Some(iq) => configuration_bail!("Wavevector {iq} appears more than once in the set."),
            None => configuration_bail!(
                "Grid point {ig} of the {}x{}x{} grid is missing from the wavevector set.",
                dims[0],
                dims[1],
                dims[2]
            ),
        }
    }
    Ok(())
}

impl DynamicalMatrixSet {
    /// Deduces the supercell commensurate with the wavevectors of this set and checks that the
    /// wavevectors are exactly its grid.
    ///
    /// # Arguments
    ///
    /// * `thresh` - The tolerance on crystal coordinates.
    ///
    /// # Errors
    ///
    /// Errors with [`crate::errors::PhononError::Configuration`] if the wavevectors do not form
    /// a complete grid.
    pub fn get_supercell(&self, thresh: f64) -> Result<[usize; 3], anyhow::Error> {
        let dims = commensurate_supercell(self.structure(), self.q_tot(), thresh)?;
        check_commensurate(self.structure(), self.q_tot(), dims, thresh)?;
        Ok(dims)
    }

    /// The index of the $`\Gamma`$ point in this set, if present.
    pub fn gamma_index(&self, thresh: f64) -> Result<Option<usize>, anyhow::Error> {
        find_q_index(self.structure(), self.q_tot(), &Vector3::zeros(), thresh)
    }
}

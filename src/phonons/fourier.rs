//! Fourier transforms between wavevector grids and real-space supercells, and Fourier
//! interpolation onto finer grids.

use std::sync::Arc;

use anyhow;
use itertools::{iproduct, Itertools};
use log;
use nalgebra::{Matrix3, Vector3};
use ndarray::Array2;
use num_complex::Complex;
use rayon::prelude::*;

use crate::auxiliary::geometry::{bloch_phase, floatify};
use crate::auxiliary::linalg::{add_to_block, block, ensure_block_shape, set_block};
use crate::auxiliary::structure::{supercell_cells, Structure};
use crate::errors::{configuration_bail, validation_bail};
use crate::phonons::qgrid::{check_commensurate, q_grid};
use crate::phonons::DynamicalMatrixSet;

#[cfg(test)]
#[path = "fourier_tests.rs"]
mod fourier_tests;

/// Relative tolerance within which two periodic images are considered equally short.
const IMAGE_TIE_TOLERANCE: f64 = 1e-6;

/// Tolerance on fractional coordinates used to match supercell atoms with primitive atoms.
const ATOM_MAP_THRESHOLD: f64 = 1e-5;

/// Fourier transforms a real-space supercell force-constant matrix onto wavevectors,
/// ```math
/// \mathbf{D}_{ab}(\mathbf{q}) = \frac{1}{N_c}\sum_{c, c'} \mathbf{C}_{(c, a), (c', b)}
///     \exp[-2\pi i\,\mathbf{q}\cdot(\mathbf{R}_{c'} - \mathbf{R}_c)].
/// ```
///
/// # Arguments
///
/// * `fc` - The $`3N_s \times 3N_s`$ force-constant matrix of the supercell.
/// * `qs` - The Cartesian wavevectors.
/// * `primitive` - The primitive structure.
/// * `supercell` - The supercell structure.
///
/// # Returns
///
/// One $`3N \times 3N`$ dynamical matrix per wavevector.
///
/// # Errors
///
/// Errors with [`crate::errors::PhononError::Validation`] if the matrix has the wrong shape or
/// the supercell atoms cannot be matched with the primitive ones.
pub fn get_dynq_from_fc_supercell(
    fc: &Array2<Complex<f64>>,
    qs: &[Vector3<f64>],
    primitive: &Structure,
    supercell: &Structure,
) -> Result<Vec<Array2<Complex<f64>>>, anyhow::Error> {
    ensure_block_shape(fc, supercell.n_atoms(), "Supercell force-constant matrix")?;
    let nat = primitive.n_atoms();
    if supercell.n_atoms() % nat != 0 {
        validation_bail!(
            "The supercell has {} atoms, not a multiple of the {nat} primitive atoms.",
            supercell.n_atoms()
        );
    }
    #[allow(clippy::cast_precision_loss)]
    let n_cells = (supercell.n_atoms() / nat) as f64;
    let (itau, shifts) = supercell.map_to_primitive(primitive, ATOM_MAP_THRESHOLD)?;
    let lattice_t = primitive.cell()?.transpose();
    let translations = shifts
        .iter()
        .map(|n| lattice_t * floatify(n))
        .collect_vec();
    let n_sc = supercell.n_atoms();

    Ok(qs
        .par_iter()
        .map(|q| {
            let phases = translations.iter().map(|r| bloch_phase(q, r)).collect_vec();
            let mut dynmat = Array2::<Complex<f64>>::zeros((3 * nat, 3 * nat));
            for (i, j) in iproduct!(0..n_sc, 0..n_sc) {
                let phase = phases[j] * phases[i].conj() / n_cells;
                add_to_block(&mut dynmat, itau[i], itau[j], &(block(fc, i, j) * phase));
            }
            dynmat
        })
        .collect())
}

/// Returns the cell of the supercell grid equivalent to an integer lattice vector.
fn fold_into_supercell(n: &Vector3<i32>, dims: [usize; 3]) -> Vector3<i32> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    Vector3::from_fn(|i, _| n[i].rem_euclid(dims[i] as i32))
}

/// Returns the index of a folded cell in the order of [`supercell_cells`].
fn cell_index(cell: &Vector3<i32>, dims: [usize; 3]) -> usize {
    #[allow(clippy::cast_sign_loss)]
    let c = cell.map(|x| x as usize);
    (c[0] * dims[1] + c[1]) * dims[2] + c[2]
}

impl DynamicalMatrixSet {
    /// Creates a set from a supercell force-constant matrix on the grid of the supercell.
    ///
    /// # Arguments
    ///
    /// * `fc` - The force-constant matrix of the supercell.
    /// * `primitive` - The primitive structure.
    /// * `dims` - The supercell multipliers.
    pub fn from_fc_supercell(
        fc: &Array2<Complex<f64>>,
        primitive: Arc<Structure>,
        dims: [usize; 3],
    ) -> Result<Self, anyhow::Error> {
        let supercell = primitive.generate_supercell(dims)?;
        let qs = q_grid(&primitive, dims)?;
        let dynmats = get_dynq_from_fc_supercell(fc, &qs, &primitive, &supercell)?;
        Self::new(primitive, qs, dynmats)
    }

    /// Computes the real-space force constants $`\mathbf{\Phi}_{ab}(\mathbf{R}_c)`$ for every
    /// cell $`c`$ of a supercell from the dynamical matrices on its grid,
    /// ```math
    /// \mathbf{\Phi}_{ab}(\mathbf{R}_c) = \frac{1}{N_q}\sum_{\mathbf{q}}
    ///     \mathbf{D}_{ab}(\mathbf{q}) \exp(2\pi i\,\mathbf{q}\cdot\mathbf{R}_c).
    /// ```
    fn real_space_force_constants(
        &self,
        dims: [usize; 3],
        thresh: f64,
    ) -> Result<Vec<Array2<Complex<f64>>>, anyhow::Error> {
        check_commensurate(self.structure(), self.q_tot(), dims, thresh)?;
        let lattice_t = self.structure().cell()?.transpose();
        let dim = 3 * self.n_atoms();
        #[allow(clippy::cast_precision_loss)]
        let n_q = self.n_q() as f64;
        Ok(supercell_cells(dims)
            .par_iter()
            .map(|cell| {
                let r = lattice_t * floatify(cell);
                let mut phi = Array2::<Complex<f64>>::zeros((dim, dim));
                for (q, dynmat) in self.q_tot().iter().zip(self.dynmats().iter()) {
                    let phase = bloch_phase(q, &r).conj() / n_q;
                    phi.scaled_add(phase, dynmat);
                }
                phi
            })
            .collect())
    }

    /// Builds the real-space force-constant matrix of the supercell whose grid this set covers,
    /// $`\mathbf{C}_{(c, a), (c', b)} = \mathbf{\Phi}_{ab}(\mathbf{R}_{c'} - \mathbf{R}_c)`$.
    ///
    /// # Arguments
    ///
    /// * `dims` - The supercell multipliers.
    /// * `thresh` - The tolerance on crystal coordinates of wavevectors.
    ///
    /// # Returns
    ///
    /// The $`3N_s \times 3N_s`$ force-constant matrix and the supercell structure. The matrix is
    /// real if the set satisfies $`\mathbf{D}(-\mathbf{q}) = \mathbf{D}^*(\mathbf{q})`$.
    ///
    /// # Errors
    ///
    /// Errors with [`crate::errors::PhononError::Configuration`] if the wavevectors are not
    /// exactly the grid of `dims`.
    pub fn generate_supercell_dyn(
        &self,
        dims: [usize; 3],
        thresh: f64,
    ) -> Result<(Array2<Complex<f64>>, Structure), anyhow::Error> {
        let phis = self.real_space_force_constants(dims, thresh)?;
        let supercell = self.structure().generate_supercell(dims)?;
        let nat = self.n_atoms();
        let cells = supercell_cells(dims);
        let dim = 3 * supercell.n_atoms();
        let mut fc = Array2::<Complex<f64>>::zeros((dim, dim));
        for ((c1, cell1), (c2, cell2)) in
            iproduct!(cells.iter().enumerate(), cells.iter().enumerate())
        {
            let phi = &phis[cell_index(&fold_into_supercell(&(cell2 - cell1), dims), dims)];
            for (a, b) in iproduct!(0..nat, 0..nat) {
                set_block(&mut fc, c1 * nat + a, c2 * nat + b, &block(phi, a, b));
            }
        }
        log::debug!(
            "Built a {0}x{0} supercell force-constant matrix from {1} wavevector(s).",
            fc.nrows(),
            self.n_q()
        );
        Ok((fc, supercell))
    }

    /// Fourier-interpolates this set from the grid of one supercell onto the grid of a larger
    /// one.
    ///
    /// The real-space force constants of the current supercell are assigned, for every pair of
    /// atoms, to the shortest periodic image of their separation under the current superlattice.
    /// Equally short images share the force constant with equal weights.
    ///
    /// # Arguments
    ///
    /// * `current` - The supercell multipliers whose grid this set covers.
    /// * `target` - The supercell multipliers of the target grid, element-wise multiples of
    ///   `current`.
    /// * `thresh` - The tolerance on crystal coordinates of wavevectors.
    ///
    /// # Returns
    ///
    /// A new set on the target grid, in the order of [`q_grid`], with trivial stars.
    ///
    /// # Errors
    ///
    /// Errors with [`crate::errors::PhononError::Configuration`] if `target` is not a multiple
    /// of `current` or this set is not exactly the grid of `current`.
    pub fn interpolate(
        &self,
        current: [usize; 3],
        target: [usize; 3],
        thresh: f64,
    ) -> Result<Self, anyhow::Error> {
        if current.iter().any(|&n| n == 0) || target.iter().any(|&n| n == 0) {
            configuration_bail!("Supercell multipliers must be positive.");
        }
        if current.iter().zip(target.iter()).any(|(c, t)| t % c != 0) {
            configuration_bail!(
                "The target supercell {target:?} is not a multiple of the current supercell {current:?}."
            );
        }
        let phis = self.real_space_force_constants(current, thresh)?;
        let structure = self.structure();
        let lattice_t = structure.cell()?.transpose();
        let nat = self.n_atoms();
        let positions = structure.positions();
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let current_i = Vector3::from_fn(|i, _| current[i] as i32);

        // Folded force constants on the cells of the target supercell.
        let target_cells = supercell_cells(target);
        let mut folded: Vec<Option<Array2<Complex<f64>>>> = vec![None; target_cells.len()];
        let cells = supercell_cells(current);
        for ((icell, cell), (a, b)) in
            iproduct!(cells.iter().enumerate(), iproduct!(0..nat, 0..nat))
        {
            let images = shortest_images(
                &(positions[b] - positions[a]),
                cell,
                &current_i,
                &lattice_t,
            );
            #[allow(clippy::cast_precision_loss)]
            let weight = 1.0 / images.len() as f64;
            let value = block(&phis[icell], a, b) * Complex::new(weight, 0.0);
            for image in images {
                let key = cell_index(&fold_into_supercell(&image, target), target);
                let slot = folded[key].get_or_insert_with(|| Array2::zeros((3 * nat, 3 * nat)));
                add_to_block(slot, a, b, &value);
            }
        }

        let qs = q_grid(structure, target)?;
        let dynmats = qs
            .par_iter()
            .map(|q| {
                let mut dynmat = Array2::<Complex<f64>>::zeros((3 * nat, 3 * nat));
                for (cell, phi) in target_cells.iter().zip(folded.iter()) {
                    if let Some(phi) = phi {
                        let r = lattice_t * floatify(cell);
                        dynmat.scaled_add(bloch_phase(q, &r), phi);
                    }
                }
                dynmat
            })
            .collect::<Vec<_>>();
        log::debug!(
            "Interpolated {} wavevector(s) of the {current:?} grid onto {} of the {target:?} grid.",
            self.n_q(),
            qs.len()
        );
        Self::new(Arc::clone(structure), qs, dynmats)
    }
}

/// Finds the lattice vectors $`\mathbf{R}_c + \mathbf{S}\mathbf{m}`$, with $`\mathbf{S}`$ the
/// superlattice, minimising $`|\mathbf{d} + \mathbf{R}_c + \mathbf{S}\mathbf{m}|`$.
///
/// # Arguments
///
/// * `separation` - The Cartesian separation $`\mathbf{d}`$ of the two atoms within the cell.
/// * `cell` - The integer coordinates of $`\mathbf{R}_c`$.
/// * `dims` - The superlattice multipliers.
/// * `lattice_t` - The primitive lattice vectors as columns.
///
/// # Returns
///
/// The integer coordinates of all equally short images.
fn shortest_images(
    separation: &Vector3<f64>,
    cell: &Vector3<i32>,
    dims: &Vector3<i32>,
    lattice_t: &Matrix3<f64>,
) -> Vec<Vector3<i32>> {
    let super_t = lattice_t * Matrix3::from_diagonal(&floatify(dims));
    let distance = |n: &Vector3<i32>| (separation + lattice_t * floatify(n)).norm();
    // Start from the image closest in fractional superlattice coordinates, then search its
    // neighbourhood, which contains all shortest images for reasonably shaped superlattices.
    let start = super_t
        .try_inverse()
        .map(|inv| {
            let f = inv * (separation + lattice_t * floatify(cell));
            #[allow(clippy::cast_possible_truncation)]
            let m = f.map(|x| x.round() as i32);
            cell - m.component_mul(dims)
        })
        .unwrap_or(*cell);
    let candidates = iproduct!(-2..=2, -2..=2, -2..=2)
        .map(|(i, j, k)| start + Vector3::new(i, j, k).component_mul(dims))
        .map(|n| {
            let d = distance(&n);
            (n, d)
        })
        .collect_vec();
    let shortest = candidates
        .iter()
        .map(|(_, d)| *d)
        .fold(f64::INFINITY, f64::min);
    candidates
        .into_iter()
        .filter(|(_, d)| *d <= shortest * (1.0 + IMAGE_TIE_TOLERANCE) + IMAGE_TIE_TOLERANCE)
        .map(|(n, _)| n)
        .collect()
}

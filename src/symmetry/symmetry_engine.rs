//! Space-group discovery and symmetry projectors for crystal structures.

use std::fmt;
use std::sync::Arc;

use anyhow::{self, ensure, format_err};
use derive_builder::Builder;
use indexmap::IndexMap;
use itertools::{iproduct, Itertools};
use log;
use nalgebra::{Matrix3, Vector3};
use ndarray::Array2;
use num_complex::Complex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::auxiliary::geometry::{self, floatify, floatify_matrix};
use crate::auxiliary::linalg::{
    add_to_block, block, ensure_block_shape, hermitise, rotate_block,
};
use crate::auxiliary::structure::Structure;
use crate::errors::{validation_bail, PhononError};
use crate::io::format::{phonsym_output, phonsym_warn, write_subtitle};
use crate::permutation::Permutation;
use crate::symmetry::symmetry_operation::{
    orthogonality_deviation, SymmetryOperation, ORTHOGONALITY_THRESHOLD,
};

#[cfg(test)]
#[path = "symmetry_engine_tests.rs"]
mod symmetry_engine_tests;

// ==================
// Parameters
// ==================

/// A structure containing control parameters for symmetry detection.
#[derive(Clone, Builder, Debug, Serialize, Deserialize)]
pub struct SymmetryParams {
    /// The Cartesian distance (Å) within which two atoms are considered coincident.
    #[builder(default = "1e-4")]
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f64,

    /// The threshold on crystal coordinates within which two wavevectors are considered
    /// equivalent modulo a reciprocal lattice vector.
    #[builder(default = "1e-6")]
    #[serde(default = "default_q_threshold")]
    pub q_threshold: f64,

    /// Boolean indicating if time reversal, $`\mathbf{q} \to -\mathbf{q}`$ together with complex
    /// conjugation, is included when symmetrising dynamical matrices and building stars.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub time_reversal: bool,
}

impl SymmetryParams {
    /// Returns a builder to construct a [`SymmetryParams`] structure.
    #[must_use]
    pub fn builder() -> SymmetryParamsBuilder {
        SymmetryParamsBuilder::default()
    }
}

impl Default for SymmetryParams {
    fn default() -> Self {
        Self::builder()
            .build()
            .expect("Unable to build a default `SymmetryParams`.")
    }
}

fn default_distance_threshold() -> f64 {
    1e-4
}

fn default_q_threshold() -> f64 {
    1e-6
}

fn default_true() -> bool {
    true
}

impl fmt::Display for SymmetryParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Distance threshold: {:.3e} Å",
            self.distance_threshold
        )?;
        writeln!(f, "Wavevector threshold: {:.3e}", self.q_threshold)?;
        writeln!(
            f,
            "Time reversal included: {}",
            crate::io::format::nice_bool(self.time_reversal)
        )?;
        Ok(())
    }
}

// =================
// Struct definition
// =================

/// A structure holding the space group of a crystal and applying its projectors.
///
/// The engine is immutable once built. The identity operation is always the first operation.
#[derive(Clone, Debug)]
pub struct SymmetryEngine {
    /// The structure whose symmetry is described.
    structure: Arc<Structure>,

    /// The space-group operations, identity first.
    operations: Vec<SymmetryOperation>,

    /// The control parameters used to find the operations.
    params: SymmetryParams,
}

impl SymmetryEngine {
    /// Finds the full space group of a crystal structure.
    ///
    /// The lattice point group is enumerated first: integer matrices whose columns are lattice
    /// vectors as long as the corresponding cell vectors and that preserve the metric. For each
    /// such rotation, all translations mapping every atom onto an atom of the same species are
    /// then collected. For a supercell, the pure lattice translations of the primitive cell are
    /// thus part of the group.
    ///
    /// # Arguments
    ///
    /// * `structure` - The crystal structure.
    /// * `params` - The control parameters.
    ///
    /// # Errors
    ///
    /// Errors if the structure has no cell or no atoms, and with [`PhononError::Validation`] if
    /// the operations found are not closed under composition.
    pub fn new(structure: Arc<Structure>, params: &SymmetryParams) -> Result<Self, anyhow::Error> {
        if structure.n_atoms() == 0 {
            validation_bail!("Cannot find the symmetry of a structure without atoms.");
        }
        let lattice = *structure.cell()?;
        let rotations = lattice_point_group(&lattice, params.distance_threshold)?;
        log::debug!("Lattice point group of order {} found.", rotations.len());
        let frac = structure.fractional_positions()?;
        let operations = rotations
            .par_iter()
            .map(|w| operations_with_rotation(&structure, &frac, w, params.distance_threshold))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();
        ensure!(
            operations
                .first()
                .map(|op| op.is_identity(params.distance_threshold))
                .unwrap_or(false),
            "The identity operation has not been found first."
        );
        log::debug!("Space group with {} operation(s) found.", operations.len());
        check_closure(&structure, &operations, params.distance_threshold)?;
        Ok(Self {
            structure,
            operations,
            params: params.clone(),
        })
    }

    /// Constructs the engine from externally supplied operations in the crystal basis.
    ///
    /// # Arguments
    ///
    /// * `structure` - The crystal structure.
    /// * `rotations` - The integer rotations acting on fractional coordinates.
    /// * `translations` - The fractional translations.
    /// * `params` - The control parameters.
    ///
    /// # Errors
    ///
    /// Errors with [`PhononError::Validation`] if the numbers of rotations and translations
    /// differ, if a Cartesian rotation is not orthogonal, if an operation does not map the
    /// structure onto itself, if the identity is missing, or if the operations are not closed
    /// under composition.
    pub fn from_operations(
        structure: Arc<Structure>,
        rotations: &[Matrix3<i32>],
        translations: &[Vector3<f64>],
        params: &SymmetryParams,
    ) -> Result<Self, anyhow::Error> {
        if rotations.len() != translations.len() {
            validation_bail!(
                "Mismatched numbers of rotations ({}) and translations ({}).",
                rotations.len(),
                translations.len()
            );
        }
        let lattice = *structure.cell()?;
        let frac = structure.fractional_positions()?;
        let mut operations = rotations
            .iter()
            .zip(translations.iter())
            .enumerate()
            .map(|(i, (w, t))| {
                let rotation = raw_cartesian_rotation(&lattice, w)?;
                let deviation = orthogonality_deviation(&rotation);
                if deviation > ORTHOGONALITY_THRESHOLD {
                    validation_bail!(
                        "Operation {i} has a non-orthogonal Cartesian rotation (deviation {deviation:.3e})."
                    );
                }
                let t = geometry::reduce_to_unit_cell(t);
                let (permutation, shifts) =
                    match_atoms(&structure, &frac, w, &t, params.distance_threshold)?
                        .ok_or_else(|| {
                            anyhow::Error::new(PhononError::Validation(format!(
                                "Operation {i} does not map the structure onto itself."
                            )))
                        })?;
                SymmetryOperation::try_new(*w, t, rotation, permutation, shifts)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let identity_index = operations
            .iter()
            .position(|op| op.is_identity(params.distance_threshold))
            .ok_or_else(|| {
                anyhow::Error::new(PhononError::Validation(
                    "The supplied operations do not contain the identity.".to_string(),
                ))
            })?;
        operations.swap(0, identity_index);
        check_closure(&structure, &operations, params.distance_threshold)?;
        Ok(Self {
            structure,
            operations,
            params: params.clone(),
        })
    }

    /// The structure whose symmetry is described.
    #[must_use]
    pub fn structure(&self) -> &Arc<Structure> {
        &self.structure
    }

    /// The control parameters.
    #[must_use]
    pub fn params(&self) -> &SymmetryParams {
        &self.params
    }

    /// All operations, identity first.
    #[must_use]
    pub fn operations(&self) -> &[SymmetryOperation] {
        &self.operations
    }

    /// A single operation.
    pub fn operation(&self, index: usize) -> Result<&SymmetryOperation, anyhow::Error> {
        self.operations
            .get(index)
            .ok_or_else(|| format_err!("Operation index {index} out of range."))
    }

    /// The number of operations.
    #[must_use]
    pub fn n_operations(&self) -> usize {
        self.operations.len()
    }

    /// The number of distinct rotation parts.
    #[must_use]
    pub fn point_group_size(&self) -> usize {
        self.operations
            .iter()
            .map(|op| op.rotation())
            .unique()
            .count()
    }

    /// Checks if every rotation part occurs with a zero translation.
    #[must_use]
    pub fn is_symmorphic(&self) -> bool {
        let thresh = self.params.distance_threshold;
        self.operations
            .iter()
            .map(|op| op.rotation())
            .unique()
            .all(|w| {
                self.operations.iter().any(|op| {
                    op.rotation() == w
                        && geometry::minimum_image_fraction(op.translation()).norm() < thresh
                })
            })
    }

    /// Checks if two Cartesian wavevectors are equal modulo a reciprocal lattice vector.
    pub fn q_equivalent(
        &self,
        q1: &Vector3<f64>,
        q2: &Vector3<f64>,
    ) -> Result<bool, anyhow::Error> {
        let lattice = self.structure.cell()?;
        Ok(geometry::is_integral(
            &(lattice * (q1 - q2)),
            self.params.q_threshold,
        ))
    }

    /// Finds the small group of a wavevector: the operations with
    /// $`\mathbf{R}\mathbf{q} \equiv \mathbf{q}`$.
    ///
    /// # Returns
    ///
    /// The indices of the operations in the small group.
    pub fn small_group(&self, q: &Vector3<f64>) -> Result<Vec<usize>, anyhow::Error> {
        self.operations
            .iter()
            .enumerate()
            .filter_map(|(i, op)| match self.q_equivalent(&op.rotate(q), q) {
                Ok(true) => Some(Ok(i)),
                Ok(false) => None,
                Err(err) => Some(Err(err)),
            })
            .collect()
    }

    /// Finds the small group of a wavevector including time-reversed operations.
    ///
    /// # Returns
    ///
    /// Pairs of operation index and antiunitary flag. Operations with
    /// $`\mathbf{R}\mathbf{q} \equiv \mathbf{q}`$ are unitary; those with
    /// $`\mathbf{R}\mathbf{q} \equiv -\mathbf{q}`$ are antiunitary, *i.e.* combined with complex
    /// conjugation. An operation can appear with both flags when $`\mathbf{q} \equiv -\mathbf{q}`$.
    pub fn small_group_with_time_reversal(
        &self,
        q: &Vector3<f64>,
    ) -> Result<Vec<(usize, bool)>, anyhow::Error> {
        let mut group = self
            .small_group(q)?
            .into_iter()
            .map(|i| (i, false))
            .collect::<Vec<_>>();
        for (i, op) in self.operations.iter().enumerate() {
            if self.q_equivalent(&op.rotate(q), &(-q))? {
                group.push((i, true));
            }
        }
        Ok(group)
    }

    /// Returns the subgroup of operations mapping every wavevector of a set onto a wavevector of
    /// the same set.
    ///
    /// # Arguments
    ///
    /// * `qs` - The Cartesian wavevectors.
    pub fn restricted_to_q_points(&self, qs: &[Vector3<f64>]) -> Result<Self, anyhow::Error> {
        let mut operations = Vec::with_capacity(self.operations.len());
        for op in &self.operations {
            let mut closed = true;
            for q in qs {
                let rq = op.rotate(q);
                let mut found = false;
                for q2 in qs {
                    if self.q_equivalent(&rq, q2)? {
                        found = true;
                        break;
                    }
                }
                if !found {
                    closed = false;
                    break;
                }
            }
            if closed {
                operations.push(op.clone());
            }
        }
        if operations.len() < self.operations.len() {
            log::debug!(
                "{} of {} operation(s) leave the wavevector set invariant.",
                operations.len(),
                self.operations.len()
            );
        }
        Ok(Self {
            structure: Arc::clone(&self.structure),
            operations,
            params: self.params.clone(),
        })
    }

    /// Reports a diminished symmetry if fewer operations than expected have been found.
    ///
    /// This is a warning-level condition, never an error.
    ///
    /// # Returns
    ///
    /// `true` if the symmetry is diminished.
    pub fn check_diminished_symmetry(&self, expected: usize) -> bool {
        let diminished = self.operations.len() < expected;
        if diminished {
            phonsym_warn!(
                "Diminished symmetry: {} operation(s) found, {expected} expected. Consider loosening the distance threshold.",
                self.operations.len()
            );
        }
        diminished
    }

    // ----------
    // Projectors
    // ----------

    /// Symmetrises a per-atom vector field over the whole group,
    /// $`\mathbf{v}'_{\pi(a)} = |G|^{-1}\sum_g \mathbf{R}_g\mathbf{v}_a`$.
    pub fn symmetrise_vector(
        &self,
        vectors: &[Vector3<f64>],
    ) -> Result<Vec<Vector3<f64>>, anyhow::Error> {
        self.symmetrise_vector_with(vectors, &(0..self.operations.len()).collect_vec())
    }

    /// Symmetrises a per-atom vector field over a subset of operations.
    ///
    /// # Arguments
    ///
    /// * `vectors` - One Cartesian vector per atom.
    /// * `group` - The indices of the operations forming the group.
    pub fn symmetrise_vector_with(
        &self,
        vectors: &[Vector3<f64>],
        group: &[usize],
    ) -> Result<Vec<Vector3<f64>>, anyhow::Error> {
        if vectors.len() != self.structure.n_atoms() {
            validation_bail!(
                "Vector field has {} entries for {} atom(s).",
                vectors.len(),
                self.structure.n_atoms()
            );
        }
        ensure!(!group.is_empty(), "Cannot symmetrise over an empty group.");
        let mut result = vec![Vector3::zeros(); vectors.len()];
        for &i in group {
            let op = self.operation(i)?;
            for (a, v) in vectors.iter().enumerate() {
                result[op.permutation().apply(a)] += op.cartesian_rotation() * v;
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let norm = group.len() as f64;
        Ok(result.into_iter().map(|v| v / norm).collect())
    }

    /// Symmetrises a single-site rank-2 tensor, such as a stress tensor, over the point group,
    /// then takes its symmetric part.
    #[must_use]
    pub fn symmetrise_tensor(&self, tensor: &Matrix3<f64>) -> Matrix3<f64> {
        let sum = self
            .operations
            .iter()
            .map(|op| {
                let r = op.cartesian_rotation();
                r * tensor * r.transpose()
            })
            .fold(Matrix3::zeros(), |acc, t| acc + t);
        #[allow(clippy::cast_precision_loss)]
        let averaged = sum / self.operations.len() as f64;
        (averaged + averaged.transpose()) * 0.5
    }

    /// Applies one operation to a dynamical matrix at wavevector $`\mathbf{q}`$, giving the
    /// dynamical matrix at $`\mathbf{R}\mathbf{q}`$:
    /// ```math
    /// D'_{\pi(a)\pi(b)} = \mathbf{R}\mathbf{D}_{ab}\mathbf{R}^{\mathrm{T}}
    ///     \exp[-2\pi i\,(\mathbf{R}\mathbf{q})\cdot(\mathbf{L}_b - \mathbf{L}_a)],
    /// ```
    /// with $`\mathbf{L}_a`$ the Cartesian lattice shift of atom $`a`$.
    ///
    /// # Arguments
    ///
    /// * `index` - The operation index.
    /// * `matrix` - The dynamical matrix at `q`.
    /// * `q` - The Cartesian wavevector.
    /// * `antiunitary` - If `true`, the result is complex-conjugated, giving the dynamical matrix
    /// at $`-\mathbf{R}\mathbf{q}`$.
    pub fn transform_dynamical_matrix(
        &self,
        index: usize,
        matrix: &Array2<Complex<f64>>,
        q: &Vector3<f64>,
        antiunitary: bool,
    ) -> Result<Array2<Complex<f64>>, anyhow::Error> {
        let n_atoms = self.structure.n_atoms();
        ensure_block_shape(matrix, n_atoms, "Dynamical matrix")?;
        let op = self.operation(index)?;
        let lattice = self.structure.cell()?;
        let k_rot = lattice * op.rotate(q);
        let rotation = op.cartesian_rotation();
        let perm = op.permutation();
        let shifts = op.lattice_shifts();
        let mut result = Array2::<Complex<f64>>::zeros(matrix.dim());
        for a in 0..n_atoms {
            for b in 0..n_atoms {
                let dn = floatify(&(shifts[b] - shifts[a]));
                let phase = Complex::from_polar(1.0, -2.0 * std::f64::consts::PI * k_rot.dot(&dn));
                let value = rotate_block(rotation, &block(matrix, a, b)) * phase;
                add_to_block(&mut result, perm.apply(a), perm.apply(b), &value);
            }
        }
        if antiunitary {
            result.mapv_inplace(|x| x.conj());
        }
        Ok(result)
    }

    /// Projects a dynamical matrix at $`\mathbf{q}`$ onto the subspace invariant under the small
    /// group of $`\mathbf{q}`$ (including time-reversed operations if enabled), then takes its
    /// Hermitian part.
    pub fn symmetrise_dynamical_block(
        &self,
        matrix: &Array2<Complex<f64>>,
        q: &Vector3<f64>,
    ) -> Result<Array2<Complex<f64>>, anyhow::Error> {
        let group = if self.params.time_reversal {
            self.small_group_with_time_reversal(q)?
        } else {
            self.small_group(q)?
                .into_iter()
                .map(|i| (i, false))
                .collect()
        };
        let averaged = self.average_over(matrix, q, &group)?;
        Ok(hermitise(&averaged))
    }

    /// Averages the images of a dynamical matrix at $`\mathbf{q}`$ over operations that map
    /// $`\mathbf{q}`$ onto itself.
    pub(crate) fn average_over(
        &self,
        matrix: &Array2<Complex<f64>>,
        q: &Vector3<f64>,
        group: &[(usize, bool)],
    ) -> Result<Array2<Complex<f64>>, anyhow::Error> {
        ensure!(!group.is_empty(), "Cannot symmetrise over an empty group.");
        let images = group
            .par_iter()
            .map(|&(i, antiunitary)| self.transform_dynamical_matrix(i, matrix, q, antiunitary))
            .collect::<Result<Vec<_>, _>>()?;
        let mut sum = Array2::<Complex<f64>>::zeros(matrix.dim());
        for image in &images {
            sum += image;
        }
        #[allow(clippy::cast_precision_loss)]
        let norm = group.len() as f64;
        Ok(sum.mapv(|x| x / norm))
    }

    /// Symmetrises a real-space force-constant matrix of this structure, typically a supercell,
    /// over the whole space group including the lattice translations.
    ///
    /// This is the $`\mathbf{q} = \mathbf{0}`$ case of [`Self::symmetrise_dynamical_block`] in
    /// which every operation is also antiunitary, so the result is real and symmetric.
    pub fn symmetrise_force_constants(
        &self,
        matrix: &Array2<Complex<f64>>,
    ) -> Result<Array2<Complex<f64>>, anyhow::Error> {
        let gamma = Vector3::zeros();
        let group = (0..self.operations.len()).map(|i| (i, false)).collect_vec();
        let averaged = self.average_over(matrix, &gamma, &group)?;
        let real = averaged.mapv(|x| Complex::new(x.re, 0.0));
        Ok(hermitise(&real))
    }

    /// Logs the operations to the `phonsym-output` logger.
    pub fn log_operations(&self) {
        for line in self.to_string().lines() {
            phonsym_output!("{line}");
        }
    }
}

// =================
// Search functions
// =================

/// Returns the Cartesian rotation $`\mathbf{A}^{\mathrm{T}}\mathbf{W}\mathbf{A}^{-\mathrm{T}}`$.
fn raw_cartesian_rotation(
    lattice: &Matrix3<f64>,
    w: &Matrix3<i32>,
) -> Result<Matrix3<f64>, anyhow::Error> {
    let inv_t = lattice
        .try_inverse()
        .ok_or_else(|| format_err!("Unable to invert the lattice matrix."))?
        .transpose();
    Ok(lattice.transpose() * floatify_matrix(w) * inv_t)
}

/// Returns the orthogonal polar factor of the Cartesian rotation, absorbing the small
/// non-orthogonality caused by lattice vectors that are equal only within the threshold.
fn orthogonal_cartesian_rotation(
    lattice: &Matrix3<f64>,
    w: &Matrix3<i32>,
) -> Result<Matrix3<f64>, anyhow::Error> {
    let raw = raw_cartesian_rotation(lattice, w)?;
    let svd = raw.svd(true, true);
    let u = svd
        .u
        .ok_or_else(|| format_err!("Unable to obtain the left singular vectors."))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| format_err!("Unable to obtain the right singular vectors."))?;
    Ok(u * v_t)
}

/// Enumerates the point group of a lattice as integer matrices acting on fractional
/// coordinates, identity first.
///
/// Column $`j`$ of each matrix is the image of cell vector $`j`$, hence a lattice vector
/// $`\mathbf{v} = \mathbf{A}^{\mathsf{T}}\mathbf{n}`$ of the same length. Since
/// $`n_i = \mathbf{b}_i \cdot \mathbf{v}`$ with $`\mathbf{b}_i`$ the reciprocal vectors, every
/// such image satisfies $`|n_i| \le \lVert\mathbf{b}_i\rVert \max_j \lVert\mathbf{a}_j\rVert`$,
/// whatever the reduction of the cell.
fn lattice_point_group(
    lattice: &Matrix3<f64>,
    thresh: f64,
) -> Result<Vec<Matrix3<i32>>, anyhow::Error> {
    let lattice_t = lattice.transpose();
    let lengths = (0..3).map(|i| lattice.row(i).norm()).collect_vec();
    let max_length = lengths.iter().cloned().fold(0.0, f64::max);
    let inverse = lattice
        .try_inverse()
        .ok_or_else(|| format_err!("Unable to invert the lattice matrix."))?;
    #[allow(clippy::cast_possible_truncation)]
    let bounds = (0..3)
        .map(|i| ((max_length + thresh) * inverse.column(i).norm() + 1e-8).floor() as i32)
        .collect_vec();
    log::debug!(
        "Searching lattice vectors with crystal coordinates bounded by {:?}.",
        bounds
    );
    let lattice_vectors = iproduct!(
        -bounds[0]..=bounds[0],
        -bounds[1]..=bounds[1],
        -bounds[2]..=bounds[2]
    )
    .map(|(x, y, z)| Vector3::new(x, y, z))
    .filter(|n| *n != Vector3::zeros())
    .map(|n| (n, (lattice_t * floatify(&n)).norm()))
    .filter(|(_, norm)| *norm < max_length + thresh)
    .collect_vec();
    let candidates = lengths
        .iter()
        .map(|length| {
            lattice_vectors
                .iter()
                .filter(|(_, norm)| (norm - length).abs() < thresh)
                .map(|(n, _)| *n)
                .collect_vec()
        })
        .collect_vec();

    let metric = geometry::metric(lattice);
    let metric_thresh = 2.0 * thresh * max_length;
    let mut rotations = iproduct!(&candidates[0], &candidates[1], &candidates[2])
        .map(|(c0, c1, c2)| Matrix3::from_columns(&[*c0, *c1, *c2]))
        .filter(|w| {
            let wf = floatify_matrix(w);
            let det = wf.determinant();
            (det.abs() - 1.0).abs() < 1e-8
                && (wf.transpose() * metric * wf - metric).amax() < metric_thresh
        })
        .collect_vec();
    ensure!(
        rotations.contains(&Matrix3::identity()),
        "The identity is missing from the lattice point group."
    );
    rotations.sort_by_key(|w| (*w != Matrix3::identity(), w.as_slice().to_vec()));
    Ok(rotations)
}

/// Checks that a set of operations is closed under composition, the atom permutation of every
/// product included.
///
/// The product $`\{\mathbf{W}_g|\mathbf{t}_g\}\{\mathbf{W}_h|\mathbf{t}_h\}`$ is
/// $`\{\mathbf{W}_g\mathbf{W}_h|\mathbf{W}_g\mathbf{t}_h + \mathbf{t}_g\}`$ and permutes the
/// atoms by $`\pi_g \pi_h`$.
fn check_closure(
    structure: &Structure,
    operations: &[SymmetryOperation],
    thresh: f64,
) -> Result<(), anyhow::Error> {
    let lattice_t = structure.cell()?.transpose();
    let mut by_rotation: IndexMap<Matrix3<i32>, Vec<usize>> = IndexMap::new();
    for (i, op) in operations.iter().enumerate() {
        by_rotation.entry(*op.rotation()).or_default().push(i);
    }
    let n_outside = operations
        .par_iter()
        .map(|g| {
            operations
                .iter()
                .filter(|h| {
                    let w = g.rotation() * h.rotation();
                    let t = floatify_matrix(g.rotation()) * h.translation() + g.translation();
                    let permutation = g.permutation() * h.permutation();
                    !by_rotation.get(&w).is_some_and(|indices| {
                        indices.iter().any(|&k| {
                            let op = &operations[k];
                            *op.permutation() == permutation
                                && (lattice_t
                                    * geometry::minimum_image_fraction(&(t - op.translation())))
                                .norm()
                                    < 2.0 * thresh
                        })
                    })
                })
                .count()
        })
        .sum::<usize>();
    if n_outside > 0 {
        validation_bail!(
            "The {} symmetry operation(s) do not form a group: {n_outside} product(s) fall outside the set.",
            operations.len()
        );
    }
    Ok(())
}

/// Finds every operation with a given rotation part that maps the structure onto itself.
fn operations_with_rotation(
    structure: &Structure,
    frac: &[Vector3<f64>],
    w: &Matrix3<i32>,
    thresh: f64,
) -> Result<Vec<SymmetryOperation>, anyhow::Error> {
    let lattice = structure.cell()?;
    let wf = floatify_matrix(w);
    let anchor = wf * frac[0];
    let species = structure.species();
    let rotation = orthogonal_cartesian_rotation(lattice, w)?;
    let mut translations: Vec<Vector3<f64>> = Vec::new();
    let mut operations = Vec::new();
    for b in (0..structure.n_atoms()).filter(|&b| species[b] == species[0]) {
        let t = geometry::reduce_to_unit_cell(&(frac[b] - anchor));
        let duplicate = translations.iter().any(|t0| {
            (lattice.transpose() * geometry::minimum_image_fraction(&(t - t0))).norm() < thresh
        });
        if duplicate {
            continue;
        }
        if let Some((permutation, shifts)) = match_atoms(structure, frac, w, &t, thresh)? {
            translations.push(t);
            operations.push(SymmetryOperation::try_new(
                *w,
                t,
                rotation,
                permutation,
                shifts,
            )?);
        }
    }
    Ok(operations)
}

/// Finds the atom permutation and lattice shifts induced by $`\{\mathbf{W}|\mathbf{t}\}`$, or
/// `None` if the operation does not map the structure onto itself.
fn match_atoms(
    structure: &Structure,
    frac: &[Vector3<f64>],
    w: &Matrix3<i32>,
    t: &Vector3<f64>,
    thresh: f64,
) -> Result<Option<(Permutation, Vec<Vector3<i32>>)>, anyhow::Error> {
    let lattice_t = structure.cell()?.transpose();
    let wf = floatify_matrix(w);
    let species = structure.species();
    let n_atoms = structure.n_atoms();
    let mut image = Vec::with_capacity(n_atoms);
    let mut shifts = Vec::with_capacity(n_atoms);
    let mut taken = vec![false; n_atoms];
    for (i, f) in frac.iter().enumerate() {
        let target = wf * f + t;
        let found = (0..n_atoms).find(|&j| {
            !taken[j]
                && species[j] == species[i]
                && (lattice_t * geometry::minimum_image_fraction(&(target - frac[j]))).norm()
                    < thresh
        });
        match found {
            Some(j) => {
                taken[j] = true;
                image.push(j);
                shifts.push(geometry::round_to_integers(&(target - frac[j])));
            }
            None => return Ok(None),
        }
    }
    Ok(Some((Permutation::from_image(&image)?, shifts)))
}

// =====================
// Trait implementations
// =====================

impl fmt::Display for SymmetryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_subtitle(f, "Space-group operations")?;
        writeln!(
            f,
            "{} operation(s), point group of order {}, {}",
            self.n_operations(),
            self.point_group_size(),
            if self.is_symmorphic() {
                "symmorphic"
            } else {
                "non-symmorphic"
            }
        )?;
        writeln!(f, "{:>4}  {:>5}  {:>5}  W (rows) + t  π", "#", "det", "order")?;
        for (i, op) in self.operations.iter().enumerate() {
            let order = op
                .rotation_order()
                .map(|k| k.to_string())
                .unwrap_or_else(|_| "?".to_string());
            writeln!(
                f,
                "{i:>4}  {:>5}  {order:>5}  {op}",
                if op.is_proper() { "+1" } else { "-1" }
            )?;
        }
        Ok(())
    }
}

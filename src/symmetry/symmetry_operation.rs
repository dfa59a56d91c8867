//! Space-group operations of a crystal.

use std::fmt;

use anyhow::{self, format_err};
use derive_builder::Builder;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::auxiliary::geometry::{self, floatify_matrix};
use crate::errors::PhononError;
use crate::permutation::Permutation;

#[cfg(test)]
#[path = "symmetry_operation_tests.rs"]
mod symmetry_operation_tests;

/// Maximum deviation of $`\mathbf{R}\mathbf{R}^{\mathrm{T}}`$ from the identity for a Cartesian
/// rotation to be accepted as orthogonal.
pub const ORTHOGONALITY_THRESHOLD: f64 = 1e-5;

/// A struct for managing a space-group operation $`\{\mathbf{W}|\mathbf{t}\}`$ acting on a
/// crystal structure.
///
/// The operation maps the fractional coordinates of atom $`i`$ to those of its image:
/// ```math
/// \mathbf{W}\mathbf{f}_i + \mathbf{t} = \mathbf{f}_{\pi(i)} + \mathbf{n}_i,
/// ```
/// where $`\pi`$ is [`Self::permutation`] and $`\mathbf{n}_i`$ is the integer lattice shift of
/// atom $`i`$ given in [`Self::lattice_shifts`].
#[derive(Builder, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct SymmetryOperation {
    /// The integer rotation matrix acting on fractional coordinates.
    rotation: Matrix3<i32>,

    /// The fractional translation, reduced into $`[0, 1)`$.
    #[builder(setter(custom))]
    translation: Vector3<f64>,

    /// The rotation matrix acting on Cartesian vectors,
    /// $`\mathbf{R} = \mathbf{A}^{\mathrm{T}}\mathbf{W}\mathbf{A}^{-\mathrm{T}}`$.
    cartesian_rotation: Matrix3<f64>,

    /// The permutation of atoms induced by the operation.
    permutation: Permutation,

    /// The integer lattice shift of every atom.
    lattice_shifts: Vec<Vector3<i32>>,
}

impl SymmetryOperationBuilder {
    /// Sets the fractional translation, reducing it into $`[0, 1)`$.
    pub fn translation(&mut self, translation: Vector3<f64>) -> &mut Self {
        self.translation = Some(geometry::reduce_to_unit_cell(&translation));
        self
    }

    fn validate(&self) -> Result<(), String> {
        let rotation = self
            .rotation
            .ok_or_else(|| "No rotation matrix found.".to_string())?;
        let det = floatify_matrix(&rotation).determinant();
        if (det.abs() - 1.0).abs() > 1e-8 {
            return Err(format!("The rotation matrix has determinant {det}, not ±1."));
        }
        let cartesian_rotation = self
            .cartesian_rotation
            .ok_or_else(|| "No Cartesian rotation matrix found.".to_string())?;
        let deviation = orthogonality_deviation(&cartesian_rotation);
        if deviation > ORTHOGONALITY_THRESHOLD {
            return Err(format!(
                "The Cartesian rotation is not orthogonal (deviation {deviation:.3e})."
            ));
        }
        let permutation = self
            .permutation
            .as_ref()
            .ok_or_else(|| "No atom permutation found.".to_string())?;
        let lattice_shifts = self
            .lattice_shifts
            .as_ref()
            .ok_or_else(|| "No lattice shifts found.".to_string())?;
        if lattice_shifts.len() != permutation.rank() {
            return Err(format!(
                "Mismatched numbers of lattice shifts ({}) and permuted atoms ({}).",
                lattice_shifts.len(),
                permutation.rank()
            ));
        }
        Ok(())
    }
}

impl SymmetryOperation {
    /// Returns a builder to construct a new symmetry operation.
    #[must_use]
    pub fn builder() -> SymmetryOperationBuilder {
        SymmetryOperationBuilder::default()
    }

    /// Builds an operation, classifying every builder failure as a validation failure.
    pub(crate) fn try_new(
        rotation: Matrix3<i32>,
        translation: Vector3<f64>,
        cartesian_rotation: Matrix3<f64>,
        permutation: Permutation,
        lattice_shifts: Vec<Vector3<i32>>,
    ) -> Result<Self, anyhow::Error> {
        Self::builder()
            .rotation(rotation)
            .translation(translation)
            .cartesian_rotation(cartesian_rotation)
            .permutation(permutation)
            .lattice_shifts(lattice_shifts)
            .build()
            .map_err(|err| anyhow::Error::new(PhononError::Validation(err.to_string())))
    }

    /// The integer rotation acting on fractional coordinates.
    #[must_use]
    pub fn rotation(&self) -> &Matrix3<i32> {
        &self.rotation
    }

    /// The fractional translation in $`[0, 1)`$.
    #[must_use]
    pub fn translation(&self) -> &Vector3<f64> {
        &self.translation
    }

    /// The rotation acting on Cartesian vectors.
    #[must_use]
    pub fn cartesian_rotation(&self) -> &Matrix3<f64> {
        &self.cartesian_rotation
    }

    /// The atom permutation.
    #[must_use]
    pub fn permutation(&self) -> &Permutation {
        &self.permutation
    }

    /// The integer lattice shifts of all atoms.
    #[must_use]
    pub fn lattice_shifts(&self) -> &[Vector3<i32>] {
        &self.lattice_shifts
    }

    /// Checks if the operation has a proper rotation part.
    #[must_use]
    pub fn is_proper(&self) -> bool {
        floatify_matrix(&self.rotation).determinant() > 0.0
    }

    /// Checks if the rotation part is the identity.
    #[must_use]
    pub fn is_pure_translation(&self) -> bool {
        self.rotation == Matrix3::identity()
    }

    /// Checks if the operation is the identity within a fractional threshold.
    #[must_use]
    pub fn is_identity(&self, thresh: f64) -> bool {
        self.is_pure_translation()
            && geometry::minimum_image_fraction(&self.translation).norm() < thresh
    }

    /// Rotates a Cartesian vector, such as a wavevector, by the rotation part.
    #[must_use]
    pub fn rotate(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.cartesian_rotation * v
    }

    /// The order of the rotation part, *i.e.* the smallest $`k`$ with $`\mathbf{W}^k = \mathbf{1}`$.
    pub fn rotation_order(&self) -> Result<usize, anyhow::Error> {
        let mut power = self.rotation;
        (1..=6)
            .find(|_| {
                let is_identity = power == Matrix3::identity();
                power *= self.rotation;
                is_identity
            })
            .ok_or_else(|| format_err!("The rotation {} has no crystallographic order.", self.rotation))
    }
}

/// Returns the largest absolute entry of $`\mathbf{R}\mathbf{R}^{\mathrm{T}} - \mathbf{1}`$.
#[must_use]
pub fn orthogonality_deviation(rotation: &Matrix3<f64>) -> f64 {
    (rotation * rotation.transpose() - Matrix3::identity()).amax()
}

// =====================
// Trait implementations
// =====================

impl fmt::Display for SymmetryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let w = &self.rotation;
        let t = &self.translation;
        write!(
            f,
            "[{:>2} {:>2} {:>2} | {:>2} {:>2} {:>2} | {:>2} {:>2} {:>2}] + ({:>7.4} {:>7.4} {:>7.4})  {}",
            w[(0, 0)],
            w[(0, 1)],
            w[(0, 2)],
            w[(1, 0)],
            w[(1, 1)],
            w[(1, 2)],
            w[(2, 0)],
            w[(2, 1)],
            w[(2, 2)],
            t[0],
            t[1],
            t[2],
            self.permutation
        )
    }
}

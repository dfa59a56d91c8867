//! Lattice geometry helpers.

use nalgebra::{Matrix3, Vector3};
use num_complex::Complex;

#[cfg(test)]
#[path = "geometry_tests.rs"]
mod geometry_tests;

/// Returns the vector reduced to its fractional part, with every component in $`[0, 1)`$.
///
/// Components that round to exactly $`1`$ after the reduction are mapped back to $`0`$ so that
/// the operation is idempotent.
#[must_use]
pub fn reduce_to_unit_cell(frac: &Vector3<f64>) -> Vector3<f64> {
    frac.map(|x| {
        let y = x - x.floor();
        if y >= 1.0 {
            0.0
        } else {
            y
        }
    })
}

/// Returns the vector minus its nearest integer vector, with every component in
/// $`[-1/2, 1/2]`$.
#[must_use]
pub fn minimum_image_fraction(frac: &Vector3<f64>) -> Vector3<f64> {
    frac.map(|x| x - x.round())
}

/// Rounds every component of a vector to the nearest integer.
#[must_use]
pub fn round_to_integers(frac: &Vector3<f64>) -> Vector3<i32> {
    #[allow(clippy::cast_possible_truncation)]
    frac.map(|x| x.round() as i32)
}

/// Checks if a vector has integral components within a threshold.
///
/// # Arguments
///
/// * `frac` - The vector to be checked.
/// * `thresh` - The maximum allowed deviation of each component from its nearest integer.
#[must_use]
pub fn is_integral(frac: &Vector3<f64>, thresh: f64) -> bool {
    frac.iter().all(|x| (x - x.round()).abs() < thresh)
}

/// Converts an integer vector to a floating-point vector.
#[must_use]
pub fn floatify(v: &Vector3<i32>) -> Vector3<f64> {
    v.map(f64::from)
}

/// Converts an integer matrix to a floating-point matrix.
#[must_use]
pub fn floatify_matrix(m: &Matrix3<i32>) -> Matrix3<f64> {
    m.map(f64::from)
}

/// Returns the metric tensor $`\mathbf{G} = \mathbf{A}\mathbf{A}^{\mathrm{T}}`$ of a lattice
/// whose rows are the lattice vectors.
#[must_use]
pub fn metric(lattice: &Matrix3<f64>) -> Matrix3<f64> {
    lattice * lattice.transpose()
}

/// Returns the Bloch phase $`\exp(-2\pi i \mathbf{q}\cdot\mathbf{R})`$.
///
/// `q` is a Cartesian wavevector without the $`2\pi`$ factor and `r` a Cartesian lattice
/// vector.
#[must_use]
pub fn bloch_phase(q: &Vector3<f64>, r: &Vector3<f64>) -> Complex<f64> {
    Complex::from_polar(1.0, -2.0 * std::f64::consts::PI * q.dot(r))
}

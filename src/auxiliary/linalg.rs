//! Linear-algebra helpers on atom-pair block matrices.
//!
//! Dynamical and force-constant matrices are stored as dense [`Array2`] of complex numbers of
//! dimension $`3N \times 3N`$, whose $`3 \times 3`$ block $`(a, b)`$ couples the Cartesian
//! displacements of atoms $`a`$ and $`b`$.

use anyhow;
use nalgebra::{DMatrix, Matrix3};
use ndarray::Array2;
use num_complex::Complex;

use crate::errors::validation_bail;

#[cfg(test)]
#[path = "linalg_tests.rs"]
mod linalg_tests;

/// Checks that a matrix is square of dimension `3 * n_atoms`.
///
/// # Errors
///
/// Errors with [`crate::errors::PhononError::Validation`] otherwise.
pub fn ensure_block_shape(
    matrix: &Array2<Complex<f64>>,
    n_atoms: usize,
    what: &str,
) -> Result<(), anyhow::Error> {
    let dim = 3 * n_atoms;
    if matrix.dim() != (dim, dim) {
        validation_bail!(
            "{what} has shape {:?}, expected ({dim}, {dim}) for {n_atoms} atom(s).",
            matrix.dim()
        );
    }
    Ok(())
}

/// Extracts the $`3 \times 3`$ block coupling atoms `a` and `b`.
#[must_use]
pub fn block(matrix: &Array2<Complex<f64>>, a: usize, b: usize) -> Matrix3<Complex<f64>> {
    Matrix3::from_fn(|i, j| matrix[(3 * a + i, 3 * b + j)])
}

/// Overwrites the $`3 \times 3`$ block coupling atoms `a` and `b`.
pub fn set_block(
    matrix: &mut Array2<Complex<f64>>,
    a: usize,
    b: usize,
    value: &Matrix3<Complex<f64>>,
) {
    for i in 0..3 {
        for j in 0..3 {
            matrix[(3 * a + i, 3 * b + j)] = value[(i, j)];
        }
    }
}

/// Adds to the $`3 \times 3`$ block coupling atoms `a` and `b`.
pub fn add_to_block(
    matrix: &mut Array2<Complex<f64>>,
    a: usize,
    b: usize,
    value: &Matrix3<Complex<f64>>,
) {
    for i in 0..3 {
        for j in 0..3 {
            matrix[(3 * a + i, 3 * b + j)] += value[(i, j)];
        }
    }
}

/// Returns $`\mathbf{R}\mathbf{B}\mathbf{R}^{\mathrm{T}}`$ for a real rotation $`\mathbf{R}`$.
#[must_use]
pub fn rotate_block(
    rotation: &Matrix3<f64>,
    value: &Matrix3<Complex<f64>>,
) -> Matrix3<Complex<f64>> {
    let r = rotation.map(|x| Complex::new(x, 0.0));
    r * value * r.transpose()
}

/// Returns the Hermitian part $`(\mathbf{D} + \mathbf{D}^\dagger)/2`$.
#[must_use]
pub fn hermitise(matrix: &Array2<Complex<f64>>) -> Array2<Complex<f64>> {
    let adjoint = matrix.t().mapv(|x| x.conj());
    (matrix + &adjoint).mapv(|x| x * 0.5)
}

/// Returns the largest absolute entry of $`\mathbf{D} - \mathbf{D}^\dagger`$.
#[must_use]
pub fn hermiticity_deviation(matrix: &Array2<Complex<f64>>) -> f64 {
    let adjoint = matrix.t().mapv(|x| x.conj());
    (matrix - &adjoint)
        .iter()
        .map(|x| x.norm())
        .fold(0.0, f64::max)
}

/// Returns the Frobenius norm of the difference of two matrices.
#[must_use]
pub fn frobenius_distance(a: &Array2<Complex<f64>>, b: &Array2<Complex<f64>>) -> f64 {
    (a - b).iter().map(|x| x.norm_sqr()).sum::<f64>().sqrt()
}

/// Returns the largest absolute entry of the difference of two matrices.
#[must_use]
pub fn max_abs_difference(a: &Array2<Complex<f64>>, b: &Array2<Complex<f64>>) -> f64 {
    (a - b).iter().map(|x| x.norm()).fold(0.0, f64::max)
}

/// Scales row and column `i` of a $`3N \times 3N`$ matrix by `weights[i / 3]`, *i.e.* returns
/// $`\mathbf{W}\mathbf{D}\mathbf{W}`$ with $`\mathbf{W}`$ the diagonal of per-atom weights
/// repeated three times.
#[must_use]
pub fn scale_by_atom_weights(matrix: &Array2<Complex<f64>>, weights: &[f64]) -> Array2<Complex<f64>> {
    Array2::from_shape_fn(matrix.dim(), |(i, j)| {
        matrix[(i, j)] * weights[i / 3] * weights[j / 3]
    })
}

/// Converts an [`Array2`] into a [`DMatrix`].
#[must_use]
pub fn to_dmatrix(matrix: &Array2<Complex<f64>>) -> DMatrix<Complex<f64>> {
    let (nrows, ncols) = matrix.dim();
    DMatrix::from_fn(nrows, ncols, |i, j| matrix[(i, j)])
}

/// Converts a [`DMatrix`] into an [`Array2`].
#[must_use]
pub fn from_dmatrix(matrix: &DMatrix<Complex<f64>>) -> Array2<Complex<f64>> {
    Array2::from_shape_fn(matrix.shape(), |(i, j)| matrix[(i, j)])
}

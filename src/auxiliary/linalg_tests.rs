use approx::assert_relative_eq;
use nalgebra::Matrix3;
use ndarray::Array2;
use num_complex::Complex;

use crate::auxiliary::linalg::{
    block, ensure_block_shape, from_dmatrix, hermiticity_deviation, hermitise, rotate_block,
    set_block, to_dmatrix,
};

#[test]
fn test_linalg_blocks() {
    let mut m = Array2::<Complex<f64>>::zeros((6, 6));
    let value = Matrix3::from_fn(|i, j| Complex::new(i as f64, j as f64));
    set_block(&mut m, 1, 0, &value);
    assert_eq!(m[(4, 2)], Complex::new(1.0, 2.0));
    assert_eq!(block(&m, 1, 0), value);
    assert_eq!(block(&m, 0, 1), Matrix3::zeros());

    assert!(ensure_block_shape(&m, 2, "Test matrix").is_ok());
    assert!(ensure_block_shape(&m, 3, "Test matrix").is_err());
    assert_eq!(from_dmatrix(&to_dmatrix(&m)), m);
}

#[test]
fn test_linalg_hermitise() {
    let m = Array2::from_shape_fn((3, 3), |(i, j)| Complex::new((i + 2 * j) as f64, i as f64));
    assert!(hermiticity_deviation(&m) > 0.1);
    let h = hermitise(&m);
    assert_relative_eq!(hermiticity_deviation(&h), 0.0);
    assert_eq!(hermitise(&h), h);
}

#[test]
fn test_linalg_rotate_block() {
    // Fourfold rotation about z.
    let r = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
    let diag = Matrix3::from_diagonal(&nalgebra::Vector3::new(
        Complex::new(1.0, 0.0),
        Complex::new(2.0, 0.0),
        Complex::new(3.0, 0.0),
    ));
    let rotated = rotate_block(&r, &diag);
    assert_relative_eq!(rotated[(0, 0)].re, 2.0);
    assert_relative_eq!(rotated[(1, 1)].re, 1.0);
    assert_relative_eq!(rotated[(2, 2)].re, 3.0);
}

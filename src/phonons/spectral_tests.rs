use std::sync::Arc;

use approx::assert_relative_eq;
use ndarray::{Array1, Array2};
use num_complex::Complex;

use crate::auxiliary::linalg::scale_by_atom_weights;
use crate::auxiliary::template_structures::{orthorhombic_abx, simple_cubic_hydrogen};
use crate::errors::PhononError;
use crate::phonons::phonons_tests::{physical_set, random_set};
use crate::phonons::qgrid::q_grid;
use crate::phonons::spectral::{upsilon_from_supercell, NegativeModeTreatment, UpsilonParams};
use crate::phonons::DynamicalMatrixSet;

/// Simple cubic hydrogen on a 2x1x1 grid with one unstable mode at Gamma.
fn indefinite_set() -> DynamicalMatrixSet {
    let structure = Arc::new(simple_cubic_hydrogen());
    let qs = q_grid(&structure, [2, 1, 1]).unwrap();
    let diagonal = |values: [f64; 3]| {
        Array2::from_diag(&Array1::from_iter(
            values.iter().map(|x| Complex::new(938.0 * x, 0.0)),
        ))
    };
    let dynmats = vec![diagonal([-1e-2, 2e-2, 3e-2]), diagonal([1e-2, 2e-2, 4e-2])];
    DynamicalMatrixSet::new(structure, qs, dynmats).unwrap()
}

fn largest_entry(matrix: &Array2<f64>) -> f64 {
    matrix.iter().map(|x| x.abs()).fold(0.0, f64::max)
}

#[test]
fn test_spectral_diagonalise() {
    let set = random_set(orthorhombic_abx(), [1, 1, 2], 4);
    let modes = set.diagonalise(1).unwrap();
    assert_eq!(modes.frequencies.len(), 9);
    assert!(modes
        .frequencies
        .windows(2)
        .all(|pair| pair[0] <= pair[1]));

    let v = &modes.polarisations;
    let overlap = v.t().mapv(|x| x.conj()).dot(v);
    for ((i, j), x) in overlap.indexed_iter() {
        let expected = if i == j { 1.0 } else { 0.0 };
        assert!((x - Complex::new(expected, 0.0)).norm() < 1e-10);
    }

    // The modes rebuild the mass-weighted matrix.
    let masses = set.structure().masses_array().unwrap();
    let inv_sqrt = masses.iter().map(|m| m.sqrt().recip()).collect::<Vec<_>>();
    let weighted = scale_by_atom_weights(&set.dynmats()[1], &inv_sqrt);
    let eigenvalues = Array2::from_diag(&Array1::from_iter(
        modes
            .frequencies
            .iter()
            .map(|w| Complex::new(w.signum() * w * w, 0.0)),
    ));
    let rebuilt = v.dot(&eigenvalues).dot(&v.t().mapv(|x| x.conj()));
    let error = (&rebuilt - &weighted)
        .iter()
        .map(|x| x.norm())
        .fold(0.0, f64::max);
    assert!(error < 1e-10);
    assert_eq!(set.diagonalise_all().unwrap().len(), 2);
}

#[test]
fn test_spectral_force_positive_definite() {
    let mut reflected = indefinite_set();
    let mut zeroed = reflected.clone();
    let before = reflected.diagonalise(0).unwrap();
    assert!(before.frequencies[0] < 0.0);

    let n_negative = reflected
        .force_positive_definite(NegativeModeTreatment::Reflect)
        .unwrap();
    assert_eq!(n_negative, 1);
    let after = reflected.diagonalise(0).unwrap();
    let mut expected = before
        .frequencies
        .iter()
        .map(|w| w.abs())
        .collect::<Vec<_>>();
    expected.sort_by(|a, b| a.partial_cmp(b).unwrap());
    for (w, e) in after.frequencies.iter().zip(expected.iter()) {
        assert_relative_eq!(*w, *e, max_relative = 1e-8);
    }

    assert_eq!(
        zeroed
            .force_positive_definite(NegativeModeTreatment::Zero)
            .unwrap(),
        1
    );
    for iq in 0..zeroed.n_q() {
        let modes = zeroed.diagonalise(iq).unwrap();
        assert!(modes.frequencies.iter().all(|w| *w > -1e-6));
    }
    let gamma = zeroed.diagonalise(0).unwrap();
    assert!(gamma.frequencies[0].abs() < 1e-6);
}

#[test]
fn test_spectral_supercell_modes() {
    let set = physical_set(orthorhombic_abx(), [1, 1, 3], 5);
    let modes = set.diagonalise_supercell(1e-6).unwrap();
    assert_eq!(modes.frequencies.len(), 27);
    assert_eq!(modes.structure.n_atoms(), 9);
    assert!(modes.frequencies.windows(2).all(|p| p[0] <= p[1]));

    // Three acoustic modes at Gamma, the rest stable.
    assert!(modes.frequencies[..3].iter().all(|w| w.abs() < 1e-6));
    assert!(modes.frequencies[3..].iter().all(|w| *w > 1e-6));
    assert_eq!(modes.q_indices.iter().filter(|&&iq| iq == 0).count(), 9);

    let p = &modes.polarisations;
    let overlap = p.t().dot(p);
    let identity = Array2::<f64>::eye(27);
    assert!(largest_entry(&(&overlap - &identity)) < 1e-10);

    // The modes rebuild the mass-weighted supercell matrix.
    let (fc, supercell) = set.generate_supercell_dyn([1, 1, 3], 1e-6).unwrap();
    let masses = supercell.masses_array().unwrap();
    let inv_sqrt = masses.iter().map(|m| m.sqrt().recip()).collect::<Vec<_>>();
    let weighted = scale_by_atom_weights(&fc, &inv_sqrt).mapv(|x| x.re);
    let eigenvalues = Array2::from_diag(&Array1::from_iter(
        modes.frequencies.iter().map(|w| w.signum() * w * w),
    ));
    let rebuilt = p.dot(&eigenvalues).dot(&p.t());
    assert!(largest_entry(&(&rebuilt - &weighted)) < 1e-12);
}

#[test]
fn test_spectral_supercell_needs_opposite_wavevectors() {
    let set = physical_set(orthorhombic_abx(), [1, 1, 3], 6);
    let partial = DynamicalMatrixSet::new(
        Arc::clone(set.structure()),
        set.q_tot()[..2].to_vec(),
        set.dynmats()[..2].to_vec(),
    )
    .unwrap();
    assert!(partial.diagonalise_supercell(1e-6).is_err());
}

#[test]
fn test_spectral_upsilon_paths_agree() {
    let set = physical_set(orthorhombic_abx(), [1, 2, 3], 7);
    let params = UpsilonParams::default();
    let (fc, supercell) = set.generate_supercell_dyn([1, 2, 3], 1e-6).unwrap();
    for temperature in [0.0, 300.0] {
        let via_q = set.upsilon_matrix(temperature, &params).unwrap();
        let direct = upsilon_from_supercell(&fc, &supercell, temperature, &params).unwrap();
        let scale = largest_entry(&direct);
        assert!(scale > 0.0);
        assert!(largest_entry(&(&via_q - &direct)) < 1e-5 * scale);
        assert!(largest_entry(&(&via_q - &via_q.t())) < 1e-10 * scale);
    }

    // Heating softens the inverse covariance.
    let cold = set.upsilon_matrix(0.0, &params).unwrap();
    let hot = set.upsilon_matrix(3000.0, &params).unwrap();
    let trace = |m: &Array2<f64>| m.diag().sum();
    assert!(trace(&hot) < trace(&cold));
}

#[test]
fn test_spectral_upsilon_unstable() {
    let set = indefinite_set();
    let err = set
        .upsilon_matrix(100.0, &UpsilonParams::default())
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PhononError>(),
        Some(PhononError::Validation(_))
    ));
}

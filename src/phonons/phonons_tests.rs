use std::sync::Arc;

use nalgebra::Vector3;
use ndarray::Array2;
use num_complex::Complex;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::auxiliary::linalg::{hermiticity_deviation, hermitise};
use crate::auxiliary::structure::Structure;
use crate::auxiliary::template_structures::{orthorhombic_abx, simple_cubic_hydrogen};
use crate::errors::PhononError;
use crate::phonons::qgrid::q_grid;
use crate::phonons::sum_rule::{impose_sum_rule, AsrKind};
use crate::phonons::{DynamicalMatrixSet, QStar, StarMember};

/// Random Hermitian dynamical matrices on the grid of a supercell. The set has no particular
/// symmetry and does not satisfy time-reversal symmetry.
pub(crate) fn random_set(structure: Structure, dims: [usize; 3], seed: u64) -> DynamicalMatrixSet {
    let structure = Arc::new(structure);
    let qs = q_grid(&structure, dims).unwrap();
    let dim = 3 * structure.n_atoms();
    let mut rng = StdRng::seed_from_u64(seed);
    let dynmats = qs
        .iter()
        .map(|_| {
            hermitise(&Array2::from_shape_fn((dim, dim), |_| {
                Complex::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0))
            }))
        })
        .collect();
    DynamicalMatrixSet::new(structure, qs, dynmats).unwrap()
}

/// Dynamical matrices on the grid of a supercell obtained from a random real, symmetric,
/// positive semi-definite force-constant matrix obeying the acoustic sum rule.
///
/// The set is Hermitian and time-reversal symmetric, has three zero modes at Gamma and strictly
/// positive modes elsewhere, but has no space-group symmetry.
pub(crate) fn physical_set(
    structure: Structure,
    dims: [usize; 3],
    seed: u64,
) -> DynamicalMatrixSet {
    let primitive = Arc::new(structure);
    let supercell = primitive.generate_supercell(dims).unwrap();
    let dim = 3 * supercell.n_atoms();
    let mut rng = StdRng::seed_from_u64(seed);
    let b = Array2::from_shape_fn((dim, dim), |_| rng.gen_range(-1.0..1.0));
    let fc = b.dot(&b.t()) / dim as f64 + Array2::<f64>::eye(dim) * 0.5;
    let fc = impose_sum_rule(
        &fc.mapv(|x| Complex::new(x, 0.0)),
        supercell.n_atoms(),
        AsrKind::Custom,
    )
    .unwrap();
    DynamicalMatrixSet::from_fc_supercell(&fc, primitive, dims).unwrap()
}

#[test]
fn test_phonons_set_validation() {
    let structure = Arc::new(orthorhombic_abx());
    let good = Array2::<Complex<f64>>::zeros((9, 9));
    let bad = Array2::<Complex<f64>>::zeros((6, 6));

    let err = DynamicalMatrixSet::new(
        Arc::clone(&structure),
        vec![Vector3::zeros(), Vector3::new(0.0, 0.0, 0.1)],
        vec![good.clone()],
    )
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PhononError>(),
        Some(PhononError::Validation(_))
    ));

    let err =
        DynamicalMatrixSet::new(Arc::clone(&structure), vec![Vector3::zeros()], vec![bad])
            .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PhononError>(),
        Some(PhononError::Validation(_))
    ));

    assert!(DynamicalMatrixSet::new(Arc::clone(&structure), vec![], vec![]).is_err());

    let set = DynamicalMatrixSet::new(structure, vec![Vector3::zeros()], vec![good]).unwrap();
    assert_eq!(set.n_q(), 1);
    assert_eq!(set.n_atoms(), 3);
    assert_eq!(set.q_stars(), &[QStar::singleton(0)]);
    assert!(set.dynmat(1).is_err());
}

#[test]
fn test_phonons_set_stars_partition() {
    let set = random_set(simple_cubic_hydrogen(), [2, 1, 1], 3);
    let member = |q_index| StarMember {
        q_index,
        operation: None,
        time_reversed: false,
    };

    let both = QStar {
        representative: 0,
        members: vec![member(0), member(1)],
    };
    let partitioned = set.clone().with_stars(vec![both.clone()]).unwrap();
    assert_eq!(partitioned.q_stars().len(), 1);
    assert_eq!(partitioned.q_stars()[0].indices(), vec![0, 1]);

    // Missing wavevector.
    assert!(set.clone().with_stars(vec![QStar::singleton(0)]).is_err());

    // Repeated wavevector.
    assert!(set
        .clone()
        .with_stars(vec![both, QStar::singleton(1)])
        .is_err());

    // Representative not first.
    let reversed = QStar {
        representative: 0,
        members: vec![member(1), member(0)],
    };
    assert!(set.with_stars(vec![reversed]).is_err());
}

#[test]
fn test_phonons_set_hermiticity() {
    let structure = Arc::new(simple_cubic_hydrogen());
    let mut skewed = Array2::<Complex<f64>>::eye(3);
    skewed[(0, 1)] = Complex::new(0.0, 1e-3);
    let mut set =
        DynamicalMatrixSet::new(structure, vec![Vector3::zeros()], vec![skewed]).unwrap();

    let err = set.check_hermiticity(1e-6).unwrap_err();
    let phonon_err = err.downcast_ref::<PhononError>().unwrap();
    assert!(phonon_err.is_tolerance());
    assert!(set.check_hermiticity(1e-2).is_ok());

    set.hermitise();
    assert!(hermiticity_deviation(&set.dynmats()[0]) < 1e-15);
    assert!(set.check_hermiticity(1e-12).unwrap() < 1e-12);
}

#[test]
fn test_phonons_set_display() {
    let set = random_set(orthorhombic_abx(), [1, 1, 2], 1);
    let shown = set.to_string();
    assert!(shown.contains("3 atom(s), 2 wavevector(s) in 2 star(s)"));
    assert!(shown.contains("+0.5000"));
}

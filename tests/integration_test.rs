use std::f64::consts::PI;
use std::sync::Arc;

use approx::assert_relative_eq;
use nalgebra::Vector3;
use ndarray::Array2;
use num_complex::Complex;
use rand::{rngs::StdRng, Rng, SeedableRng};

use phonsym::auxiliary::linalg::{frobenius_distance, hermitise, max_abs_difference};
use phonsym::auxiliary::structure::Structure;
use phonsym::auxiliary::template_structures::simple_cubic_hydrogen;
use phonsym::phonons::qgrid::q_grid;
use phonsym::phonons::symmetrisation::{
    check_symmetrisation_agreement, QSpaceSymmetriser, SupercellSymmetriser,
    SymmetrisationParams,
};
use phonsym::phonons::DynamicalMatrixSet;
use phonsym::symmetry::symmetry_engine::{SymmetryEngine, SymmetryParams};

const SPRING: f64 = 0.02;

/// Nearest-neighbour springs along the axes of the unit simple cubic lattice.
fn spring_dynmat(q: &Vector3<f64>) -> Array2<Complex<f64>> {
    Array2::from_shape_fn((3, 3), |(i, j)| {
        if i == j {
            Complex::new(SPRING * (1.0 - (2.0 * PI * q[i]).cos()), 0.0)
        } else {
            Complex::new(0.0, 0.0)
        }
    })
}

fn spring_set(structure: &Arc<Structure>, dims: [usize; 3]) -> DynamicalMatrixSet {
    let qs = q_grid(structure, dims).unwrap();
    let dynmats = qs.iter().map(spring_dynmat).collect();
    DynamicalMatrixSet::new(Arc::clone(structure), qs, dynmats).unwrap()
}

fn total_distance(a: &DynamicalMatrixSet, b: &DynamicalMatrixSet) -> f64 {
    a.dynmats()
        .iter()
        .zip(b.dynmats().iter())
        .map(|(x, y)| frobenius_distance(x, y).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[test]
fn test_integration_symmetric_model_is_preserved() {
    let structure = Arc::new(simple_cubic_hydrogen());
    let engine = SymmetryEngine::new(Arc::clone(&structure), &SymmetryParams::default()).unwrap();
    assert_eq!(engine.n_operations(), 48);

    let mut model = spring_set(&structure, [3, 3, 3]);
    model.adjust_q_star(&engine).unwrap();
    let mut sizes = model.q_stars().iter().map(|s| s.len()).collect::<Vec<_>>();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![1, 6, 8, 12]);

    let params = SymmetrisationParams::default();
    let mut via_q = model.clone();
    via_q.symmetrise(&QSpaceSymmetriser::new(&engine, &params)).unwrap();
    let mut via_supercell = model.clone();
    via_supercell
        .symmetrise(&SupercellSymmetriser::new(engine.params(), &params))
        .unwrap();
    for iq in 0..model.n_q() {
        let q = &model.q_tot()[iq];
        let exact = spring_dynmat(q);
        assert!(max_abs_difference(&via_q.dynmats()[iq], &exact) < 1e-10);
        assert!(max_abs_difference(&via_supercell.dynmats()[iq], &exact) < 1e-10);
    }
}

#[test]
fn test_integration_noise_is_reduced() {
    let structure = Arc::new(simple_cubic_hydrogen());
    let engine = SymmetryEngine::new(Arc::clone(&structure), &SymmetryParams::default()).unwrap();
    let mut model = spring_set(&structure, [3, 3, 3]);
    model.adjust_q_star(&engine).unwrap();

    let mut rng = StdRng::seed_from_u64(2024);
    let perturbed = model
        .dynmats()
        .iter()
        .map(|d| {
            let noise = Array2::from_shape_fn((3, 3), |_| {
                Complex::new(rng.gen_range(-1e-3..1e-3), rng.gen_range(-1e-3..1e-3))
            });
            hermitise(&(d + &noise))
        })
        .collect::<Vec<_>>();
    let noisy = DynamicalMatrixSet::new(Arc::clone(&structure), model.q_tot().to_vec(), perturbed)
        .unwrap()
        .with_stars(model.q_stars().to_vec())
        .unwrap();

    let params = SymmetrisationParams::default();
    let deviation = check_symmetrisation_agreement(&noisy, &engine, &params).unwrap();
    assert!(deviation < 1e-10);

    let mut symmetrised = noisy.clone();
    symmetrised
        .symmetrise(&QSpaceSymmetriser::new(&engine, &params))
        .unwrap();
    assert!(total_distance(&symmetrised, &model) < total_distance(&noisy, &model));

    let mut twice = symmetrised.clone();
    twice
        .symmetrise(&QSpaceSymmetriser::new(&engine, &params))
        .unwrap();
    assert!(total_distance(&twice, &symmetrised) < 1e-12);
}

#[test]
fn test_integration_interpolation_and_dispersion() {
    let structure = Arc::new(simple_cubic_hydrogen());
    let coarse = spring_set(&structure, [3, 3, 3]);
    let fine = coarse.interpolate([3, 3, 3], [6, 3, 3], 1e-6).unwrap();
    assert_eq!(fine.n_q(), 54);
    for (q, dynmat) in fine.q_tot().iter().zip(fine.dynmats().iter()) {
        assert!(max_abs_difference(dynmat, &spring_dynmat(q)) < 1e-10);
    }

    let mass = structure.masses()["H"];
    let modes = fine.diagonalise_all().unwrap();
    for (q, mode) in fine.q_tot().iter().zip(modes.iter()) {
        let mut expected = (0..3)
            .map(|i| (SPRING * (1.0 - (2.0 * PI * q[i]).cos()) / mass).sqrt())
            .collect::<Vec<_>>();
        expected.sort_by(|a, b| a.partial_cmp(b).unwrap());
        for (w, e) in mode.frequencies.iter().zip(expected.iter()) {
            assert_relative_eq!(*w, *e, epsilon = 1e-9);
        }
    }
}

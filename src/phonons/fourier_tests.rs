use nalgebra::{Matrix3, Vector3};

use crate::auxiliary::linalg::max_abs_difference;
use crate::auxiliary::template_structures::{ice_cmc21, orthorhombic_abx, simple_cubic_hydrogen};
use crate::errors::PhononError;
use crate::phonons::fourier::{get_dynq_from_fc_supercell, shortest_images};
use crate::phonons::phonons_tests::{physical_set, random_set};
use crate::phonons::qgrid::find_q_index;

#[test]
fn test_fourier_supercell_round_trip() {
    let set = random_set(orthorhombic_abx(), [2, 1, 3], 7);
    let (fc, supercell) = set.generate_supercell_dyn([2, 1, 3], 1e-6).unwrap();
    assert_eq!(supercell.n_atoms(), 18);
    assert_eq!(fc.dim(), (54, 54));
    let back = get_dynq_from_fc_supercell(&fc, set.q_tot(), set.structure(), &supercell).unwrap();
    for (original, recovered) in set.dynmats().iter().zip(back.iter()) {
        assert!(max_abs_difference(original, recovered) < 1e-10);
    }
}

#[test]
fn test_fourier_supercell_is_real() {
    let set = physical_set(orthorhombic_abx(), [1, 2, 3], 2);
    let (fc, _) = set.generate_supercell_dyn([1, 2, 3], 1e-6).unwrap();
    assert!(fc.iter().all(|x| x.im.abs() < 1e-10));
    let transposed = fc.t().to_owned();
    assert!(max_abs_difference(&fc, &transposed) < 1e-10);
}

#[test]
fn test_fourier_supercell_incommensurate() {
    let set = random_set(simple_cubic_hydrogen(), [2, 2, 2], 1);
    let err = set.generate_supercell_dyn([2, 2, 1], 1e-6).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PhononError>(),
        Some(PhononError::Configuration(_))
    ));
}

#[test]
fn test_fourier_interpolation_keeps_grid_points() {
    let set = random_set(ice_cmc21(), [1, 1, 2], 3);
    let fine = set.interpolate([1, 1, 2], [1, 1, 4], 1e-6).unwrap();
    assert_eq!(fine.n_q(), 4);
    for (q, dynmat) in set.q_tot().iter().zip(set.dynmats().iter()) {
        let iq = find_q_index(fine.structure(), fine.q_tot(), q, 1e-6)
            .unwrap()
            .unwrap();
        assert!(max_abs_difference(&fine.dynmats()[iq], dynmat) < 1e-10);
    }
}

#[test]
fn test_fourier_interpolation_from_gamma() {
    let set = random_set(ice_cmc21(), [1, 1, 1], 4);
    let fine = set.interpolate([1, 1, 1], [1, 1, 3], 1e-6).unwrap();
    assert_eq!(fine.n_q(), 3);
    assert_eq!(fine.q_stars().len(), 3);
    assert!(max_abs_difference(&fine.dynmats()[0], &set.dynmats()[0]) < 1e-10);
    assert_eq!(fine.get_supercell(1e-6).unwrap(), [1, 1, 3]);
}

#[test]
fn test_fourier_interpolation_errors() {
    let set = random_set(orthorhombic_abx(), [1, 1, 2], 5);
    let cases = [
        ([1, 1, 2], [1, 1, 3]),
        ([1, 1, 2], [2, 0, 2]),
        ([1, 2, 1], [1, 2, 2]),
    ];
    for (current, target) in cases {
        let err = set.interpolate(current, target, 1e-6).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PhononError>(),
            Some(PhononError::Configuration(_))
        ));
    }
}

#[test]
fn test_fourier_shortest_images() {
    let lattice_t = Matrix3::identity();
    let dims = Vector3::new(2, 1, 1);

    // Two atoms at the same site, one cell apart in a doubled cell: both directions tie.
    let images = shortest_images(&Vector3::zeros(), &Vector3::new(1, 0, 0), &dims, &lattice_t);
    assert_eq!(images.len(), 2);
    assert!(images.contains(&Vector3::new(1, 0, 0)));
    assert!(images.contains(&Vector3::new(-1, 0, 0)));

    // Along the undoubled directions the neighbouring cells tie as well.
    let images = shortest_images(
        &Vector3::new(0.0, 0.5, 0.0),
        &Vector3::zeros(),
        &dims,
        &lattice_t,
    );
    assert_eq!(images.len(), 2);
    assert!(images.contains(&Vector3::new(0, -1, 0)));

    let images = shortest_images(
        &Vector3::new(0.2, 0.1, 0.0),
        &Vector3::zeros(),
        &dims,
        &lattice_t,
    );
    assert_eq!(images, vec![Vector3::zeros()]);
}

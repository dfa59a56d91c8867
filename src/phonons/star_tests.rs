use std::sync::Arc;

use itertools::Itertools;

use crate::auxiliary::structure::Structure;
use crate::auxiliary::template_structures::{ice_cmc21, orthorhombic_abx, simple_cubic_hydrogen};
use crate::errors::PhononError;
use crate::phonons::phonons_tests::random_set;
use crate::phonons::qgrid::q_grid;
use crate::phonons::star::{build_q_stars, irreducible_q_points};
use crate::symmetry::symmetry_engine::{SymmetryEngine, SymmetryParams};

fn engine_with(structure: Structure, time_reversal: bool) -> SymmetryEngine {
    let params = SymmetryParams::builder()
        .time_reversal(time_reversal)
        .build()
        .unwrap();
    SymmetryEngine::new(Arc::new(structure), &params).unwrap()
}

fn star_sizes(irreducible: &[(nalgebra::Vector3<f64>, usize)]) -> Vec<usize> {
    irreducible.iter().map(|(_, size)| *size).sorted().collect()
}

#[test]
fn test_star_irreducible_simple_cubic() {
    let engine = engine_with(simple_cubic_hydrogen(), true);
    let irreducible = irreducible_q_points(&engine, [2, 2, 2]).unwrap();
    assert_eq!(irreducible.len(), 4);
    assert_eq!(star_sizes(&irreducible), vec![1, 1, 3, 3]);
    assert_eq!(irreducible[0].0, nalgebra::Vector3::zeros());
}

#[test]
fn test_star_irreducible_ice() {
    let engine = engine_with(ice_cmc21(), true);
    let irreducible = irreducible_q_points(&engine, [2, 2, 2]).unwrap();
    assert_eq!(irreducible.len(), 6);
    assert_eq!(star_sizes(&irreducible), vec![1, 1, 1, 1, 2, 2]);
}

#[test]
fn test_star_irreducible_orthorhombic() {
    // Every point of the 2x2x2 grid of a primitive orthorhombic lattice is its own star.
    let engine = engine_with(orthorhombic_abx(), true);
    let irreducible = irreducible_q_points(&engine, [2, 2, 2]).unwrap();
    assert_eq!(irreducible.len(), 8);
}

#[test]
fn test_star_time_reversal() {
    // The operations of the ice structure all keep the third lattice vector, so only time
    // reversal relates q and -q along it.
    let ice = ice_cmc21();
    let grid = q_grid(&ice, [1, 1, 3]).unwrap();

    let without = engine_with(ice.clone(), false);
    let stars = build_q_stars(&grid, &without, false).unwrap();
    assert_eq!(stars.len(), 3);

    let with = engine_with(ice, true);
    let stars = build_q_stars(&grid, &with, true).unwrap();
    assert_eq!(stars.len(), 2);
    let pair = &stars[1];
    assert_eq!(pair.indices(), vec![1, 2]);
    assert!(!pair.members[0].time_reversed);
    assert!(pair.members[1].time_reversed);
}

#[test]
fn test_star_adjust_records_operations() {
    let engine = engine_with(simple_cubic_hydrogen(), true);
    let mut set = random_set(simple_cubic_hydrogen(), [2, 2, 2], 11);
    set.adjust_q_star(&engine).unwrap();
    assert_eq!(set.q_stars().len(), 4);

    let lattice = set.structure().cell().unwrap();
    for star in set.q_stars() {
        assert_eq!(star.members[0].q_index, star.representative);
        let q0 = set.q_tot()[star.representative];
        for member in &star.members {
            let op = engine.operation(member.operation.unwrap()).unwrap();
            let image = if member.time_reversed {
                -op.rotate(&q0)
            } else {
                op.rotate(&q0)
            };
            let k = lattice * (image - set.q_tot()[member.q_index]);
            assert!(k.iter().all(|x| (x - x.round()).abs() < 1e-8));
        }
    }
}

#[test]
fn test_star_errors() {
    let sc = simple_cubic_hydrogen();
    let engine = engine_with(sc.clone(), true);
    let mut grid = q_grid(&sc, [2, 2, 2]).unwrap();

    // The image of (0, 0, 1/2) under a fourfold rotation is missing.
    let err = build_q_stars(&grid[..2], &engine, true).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PhononError>(),
        Some(PhononError::Configuration(_))
    ));

    grid.push(grid[3] + nalgebra::Vector3::new(1.0, 0.0, 0.0));
    let err = build_q_stars(&grid, &engine, true).unwrap_err();
    assert!(err.to_string().contains("equivalent"));
}

use approx::assert_relative_eq;
use indexmap::IndexMap;
use nalgebra::{Matrix3, Point3, Vector3};
use proptest::prelude::*;

use crate::auxiliary::structure::{supercell_cells, Structure};
use crate::auxiliary::template_structures::ice_cmc21;
use crate::errors::PhononError;

fn ice_structure() -> Structure {
    ice_cmc21()
}

#[test]
fn test_structure_construction_validation() {
    let err = Structure::new(&["H", "H"], vec![Point3::origin()], Some(Matrix3::identity()))
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PhononError>(),
        Some(PhononError::Validation(_))
    ));

    let singular = Matrix3::new(1.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 0.0, 1.0);
    let err = Structure::new(&["H"], vec![Point3::origin()], Some(singular)).unwrap_err();
    assert!(err.to_string().contains("singular"));

    let cluster = Structure::new(&["H"], vec![Point3::origin()], None).unwrap();
    assert!(cluster.cell().is_err());
    assert!(cluster.generate_supercell([2, 1, 1]).is_err());
}

#[test]
fn test_structure_masses() {
    let ice = ice_structure();
    assert_eq!(ice.species_types(), vec!["O".to_string(), "H".to_string()]);
    assert_eq!(ice.ntyp(), 2);
    let masses = ice.masses_array().unwrap();
    assert_eq!(masses.len(), 12);
    // Hydrogen is about 1.008 u, i.e. about 918.7 in Rydberg mass units.
    assert_relative_eq!(masses[1], 1.008 * 911.444_243_096, max_relative = 1e-3);
    assert!(masses[0] > 15.0 * masses[1]);

    let mut custom = IndexMap::new();
    custom.insert("H".to_string(), 938.0);
    let h = Structure::new(&["H"], vec![Point3::origin()], Some(Matrix3::identity()))
        .unwrap()
        .with_masses(&custom)
        .unwrap();
    assert_eq!(h.masses_array().unwrap(), vec![938.0]);

    let bare = Structure::new(&["Xx"], vec![Point3::origin()], None).unwrap();
    assert!(bare.masses_array().is_err());
    assert!(bare.with_default_masses().is_err());
}

#[test]
fn test_structure_fractional_conversions() {
    let ice = ice_structure();
    let recip = ice.reciprocal_vectors().unwrap();
    let lattice = ice.cell().unwrap();
    assert_relative_eq!(lattice * recip.transpose(), Matrix3::identity(), epsilon = 1e-12);

    let r = ice.positions()[4].coords;
    let f = ice.to_fractional(&r).unwrap();
    assert_relative_eq!(ice.to_cartesian(&f).unwrap(), r, epsilon = 1e-12);
    assert_relative_eq!(
        ice.volume().unwrap(),
        4.3794773204953268 * 3.8039374195367919 * 7.1558647760499996,
        epsilon = 1e-10
    );
}

#[test]
fn test_structure_supercell_ordering() {
    let ice = ice_structure();
    let supercell = ice.generate_supercell([2, 1, 3]).unwrap();
    assert_eq!(supercell.n_atoms(), 2 * 3 * ice.n_atoms());
    assert_eq!(supercell.masses(), ice.masses());

    let cells = supercell_cells([2, 1, 3]);
    assert_eq!(cells[1], Vector3::new(0, 0, 1));
    assert_eq!(cells[3], Vector3::new(1, 0, 0));

    // Atom 5 of cell (1, 0, 2).
    let index = ((1 * 1 + 0) * 3 + 2) * ice.n_atoms() + 5;
    let shift = ice.lattice_vector(&Vector3::new(1, 0, 2)).unwrap();
    assert_relative_eq!(
        supercell.positions()[index],
        ice.positions()[5] + shift,
        epsilon = 1e-12
    );

    let (itau, shifts) = supercell.map_to_primitive(&ice, 1e-6).unwrap();
    assert_eq!(itau[index], 5);
    assert_eq!(shifts[index], Vector3::new(1, 0, 2));
    assert_eq!(supercell.supercell_dims_of(&ice, 1e-6).unwrap(), [2, 1, 3]);

    assert!(ice.generate_supercell([0, 1, 1]).is_err());
}

#[test]
fn test_structure_wrap() {
    let lattice = Matrix3::new(2.0, 0.0, 0.0, 1.0, 2.0, 0.0, 0.0, 0.0, 3.0);
    let positions = vec![
        Point3::new(-0.5, 0.1, 0.2),
        Point3::new(2.5, 4.1, -3.2),
        Point3::new(1.0, 2.0, 3.0),
    ];
    let s = Structure::new(&["A", "B", "A"], positions, Some(lattice)).unwrap();
    let wrapped = s.wrap_coordinates_into_cell().unwrap();
    for f in wrapped.fractional_positions().unwrap() {
        assert!(f.iter().all(|x| (0.0..1.0).contains(x)), "{f}");
    }
    assert_eq!(wrapped.wrap_coordinates_into_cell().unwrap(), wrapped);
}

proptest! {
    #[test]
    fn test_structure_wrap_idempotent(
        coords in prop::collection::vec(-20.0f64..20.0, 12),
        skew in -1.5f64..1.5,
    ) {
        let lattice = Matrix3::new(3.0, 0.0, 0.0, skew, 2.5, 0.0, 0.3, -0.2, 4.0);
        let positions = coords
            .chunks(3)
            .map(|c| Point3::new(c[0], c[1], c[2]))
            .collect::<Vec<_>>();
        let s = Structure::new(&["X"; 4], positions, Some(lattice)).unwrap();
        let once = s.wrap_coordinates_into_cell().unwrap();
        let twice = once.wrap_coordinates_into_cell().unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn test_structure_supercell_count(a in 1usize..4, b in 1usize..4, c in 1usize..4) {
        let s = Structure::new(
            &["X", "Y"],
            vec![Point3::origin(), Point3::new(0.5, 0.5, 0.5)],
            Some(Matrix3::identity()),
        )
        .unwrap();
        prop_assert_eq!(s.generate_supercell([a, b, c]).unwrap().n_atoms(), a * b * c * 2);
    }
}

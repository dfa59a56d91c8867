use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use approx::assert_relative_eq;
use nalgebra::Vector3;

use crate::auxiliary::linalg::max_abs_difference;
use crate::auxiliary::template_structures::{ice_cmc21, simple_cubic_hydrogen};
use crate::auxiliary::units::BOHR_TO_ANGSTROM;
use crate::errors::PhononError;
use crate::io::qe_dyn::{load_qe, save_qe};
use crate::phonons::phonons_tests::random_set;
use crate::phonons::qgrid::find_q_index;
use crate::symmetry::symmetry_engine::{SymmetryEngine, SymmetryParams};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("phonsym_{name}_{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

const HYDROGEN_DYN: &str = "Dynamical matrix file
Hand-written test file
  1    1  1  1.8897261246  0.0000000  0.0000000  0.0000000  0.0000000  0.0000000
           1  'H  '    918.00000000
    1    1      0.0000000000      0.0000000000      0.0000000000

     Dynamical  Matrix in cartesian axes

     q = (    0.000000000   0.000000000   0.500000000 )

    1    1
  0.25000000  0.00000000    0.00000000  0.00000000    0.00000000  0.00000000
  0.00000000  0.00000000    0.25000000  0.00000000    0.00000000  0.00000000
  0.00000000  0.00000000    0.00000000  0.00000000    0.10000000D+01  0.00000000

     Diagonalizing the dynamical matrix

     q = (    0.000000000   0.000000000   0.500000000 )

 **************************************************************************
     freq (    1) =       0.000000 [THz] =       0.000000 [cm-1]
 ( 1.000000  0.000000  0.000000  0.000000  0.000000  0.000000 )
 **************************************************************************
";

#[test]
fn test_qe_dyn_read_hand_written() {
    let dir = scratch_dir("qe_hand_written");
    let prefix = dir.join("hydrogen.dyn");
    fs::write(dir.join("hydrogen.dyn1"), HYDROGEN_DYN).unwrap();

    let set = load_qe(&prefix, 1).unwrap();
    assert_eq!(set.n_atoms(), 1);
    assert_eq!(set.n_q(), 1);
    let alat = 1.889_726_124_6 * BOHR_TO_ANGSTROM;
    let lattice = set.structure().cell().unwrap();
    assert_relative_eq!(lattice[(0, 0)], alat, epsilon = 1e-12);
    assert_relative_eq!(lattice[(0, 1)], 0.0);
    assert_relative_eq!(set.structure().masses()["H"], 918.0);
    assert_relative_eq!(set.q_tot()[0][2], 0.5 / alat, epsilon = 1e-12);

    let dynmat = &set.dynmats()[0];
    assert_relative_eq!(dynmat[(0, 0)].re, 0.25);
    assert_relative_eq!(dynmat[(2, 2)].re, 1.0);
    assert_relative_eq!(dynmat[(0, 1)].re, 0.0);
    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn test_qe_dyn_round_trip() {
    let dir = scratch_dir("qe_round_trip");
    let prefix = dir.join("sc.dyn");
    let engine =
        SymmetryEngine::new(Arc::new(simple_cubic_hydrogen()), &SymmetryParams::default()).unwrap();
    let mut set = random_set(simple_cubic_hydrogen(), [2, 2, 2], 3);
    set.adjust_q_star(&engine).unwrap();

    let paths = save_qe(&set, &prefix).unwrap();
    assert_eq!(paths.len(), 4);
    assert!(paths[0].ends_with("sc.dyn1"));

    let loaded = load_qe(&prefix, 4).unwrap();
    assert_eq!(loaded.n_q(), 8);
    assert_eq!(
        loaded.q_stars().iter().map(|s| s.len()).collect::<Vec<_>>(),
        set.q_stars().iter().map(|s| s.len()).collect::<Vec<_>>()
    );
    assert_relative_eq!(
        *loaded.structure().cell().unwrap(),
        *set.structure().cell().unwrap(),
        epsilon = 1e-8
    );
    for (q, dynmat) in loaded.q_tot().iter().zip(loaded.dynmats().iter()) {
        let iq = find_q_index(set.structure(), set.q_tot(), q, 1e-6)
            .unwrap()
            .unwrap();
        assert!(max_abs_difference(dynmat, &set.dynmats()[iq]) < 1e-10);
    }
    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn test_qe_dyn_round_trip_species() {
    let dir = scratch_dir("qe_species");
    let prefix = dir.join("ice.dyn");
    let set = random_set(ice_cmc21(), [1, 1, 1], 8);
    save_qe(&set, &prefix).unwrap();
    let loaded = load_qe(&prefix, 1).unwrap();
    assert_eq!(loaded.structure().species(), set.structure().species());
    for (label, mass) in set.structure().masses() {
        assert_relative_eq!(loaded.structure().masses()[label], *mass, max_relative = 1e-10);
    }
    for (a, b) in loaded
        .structure()
        .positions()
        .iter()
        .zip(set.structure().positions().iter())
    {
        assert!((a - b).norm() < 1e-8);
    }
    assert_eq!(loaded.q_tot()[0], Vector3::zeros());
    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn test_qe_dyn_errors() {
    let dir = scratch_dir("qe_errors");
    assert!(load_qe(dir.join("missing.dyn"), 1).is_err());

    let truncated = HYDROGEN_DYN
        .lines()
        .take(12)
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(dir.join("truncated.dyn1"), truncated).unwrap();
    assert!(load_qe(dir.join("truncated.dyn"), 1).is_err());

    let unsupported = HYDROGEN_DYN.replacen("  1    1  1  ", "  1    1  4  ", 1);
    fs::write(dir.join("hexagonal.dyn1"), unsupported).unwrap();
    let err = load_qe(dir.join("hexagonal.dyn"), 1).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PhononError>(),
        Some(PhononError::Validation(_))
    ));
    fs::remove_dir_all(dir).unwrap();
}

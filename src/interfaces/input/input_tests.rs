use std::fs;

use approx::assert_relative_eq;

use crate::auxiliary::template_structures::simple_cubic_hydrogen;
use crate::drivers::dynmat_symmetrisation::{SymmetrisationStrategy, SymmetrySource};
use crate::io::{read_phonsym_yaml, write_phonsym_binary, PhonSymFileType};
use crate::phonons::phonons_tests::random_set;
use crate::phonons::spectral::NegativeModeTreatment;
use crate::phonons::sum_rule::AsrKind;

use super::{DynamicalMatricesInputKind, Input, QeDynSource};

const ROOT: &str = env!("CARGO_MANIFEST_DIR");

#[test]
fn test_interfaces_input_quantum_espresso() {
    let name = format!("{ROOT}/tests/input/test_input_quantum_espresso.yml");
    let inp = read_phonsym_yaml::<Input, _>(&name).unwrap();

    if let DynamicalMatricesInputKind::QuantumEspresso(QeDynSource { prefix, nqirr }) =
        &inp.dynamical_matrices
    {
        assert!(prefix.ends_with("ice.dyn"));
        assert_eq!(*nqirr, 2);
    } else {
        panic!("Unexpected dynamical-matrix input kind.");
    }

    let params = &inp.symmetrisation;
    assert_relative_eq!(params.symmetry.distance_threshold, 1e-3);
    assert_relative_eq!(params.symmetry.q_threshold, 1e-6);
    assert!(!params.symmetry.time_reversal);
    assert_eq!(params.symmetry_source, SymmetrySource::Search);
    assert_eq!(params.expected_n_operations, Some(4));
    assert_eq!(params.symmetrisation.sum_rule, Some(AsrKind::Custom));
    assert_relative_eq!(params.symmetrisation.agreement_tolerance, 1e-7);
    assert_relative_eq!(params.symmetrisation.hermiticity_threshold, 1e-8);
    assert_eq!(params.strategy, SymmetrisationStrategy::Supercell);
    assert!(params.check_agreement);
    assert_eq!(params.interpolate_to, Some([1, 1, 3]));
    assert_eq!(params.positive_definite, Some(NegativeModeTreatment::Zero));
    assert_eq!(params.upsilon_temperature, Some(300.0));
    assert_eq!(params.qe_save_prefix.as_deref(), Some("ice_sym.dyn"));
    assert!(params.result_save_name.is_none());
}

#[test]
fn test_interfaces_input_from_file_defaults() {
    let name = format!("{ROOT}/tests/input/test_input_from_file_defaults.yml");
    let inp = read_phonsym_yaml::<Input, _>(&name).unwrap();

    if let DynamicalMatricesInputKind::FromFile(file) = &inp.dynamical_matrices {
        assert_eq!(file, "sc_hydrogen");
    } else {
        panic!("Unexpected dynamical-matrix input kind.");
    }
    let params = &inp.symmetrisation;
    assert!(params.symmetry.time_reversal);
    assert_eq!(params.strategy, SymmetrisationStrategy::QSpace);
    assert!(params.symmetrisation.sum_rule.is_none());
    assert!(!params.check_agreement);
    assert!(params.interpolate_to.is_none());
    assert!(params.positive_definite.is_none());
    assert!(params.upsilon_temperature.is_none());
}

#[test]
fn test_interfaces_input_run_from_file() {
    let dir = std::env::temp_dir().join(format!("phonsym_input_{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let name = dir.join("sc_hydrogen").display().to_string();
    let set = random_set(simple_cubic_hydrogen(), [2, 2, 2], 12);
    write_phonsym_binary(&name, PhonSymFileType::Dyn, &set).unwrap();

    let inp = Input {
        dynamical_matrices: DynamicalMatricesInputKind::FromFile(name),
        ..Input::default()
    };
    let result = inp.run().unwrap();
    assert_eq!(result.n_operations, 48);
    assert_eq!(result.dynamical_matrices.n_q(), 8);
    assert_eq!(result.dynamical_matrices.q_stars().len(), 4);

    let missing = Input {
        dynamical_matrices: DynamicalMatricesInputKind::FromFile(
            dir.join("absent").display().to_string(),
        ),
        ..Input::default()
    };
    assert!(missing.run().is_err());
    fs::remove_dir_all(dir).unwrap();
}

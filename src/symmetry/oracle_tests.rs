use std::sync::Arc;

use crate::auxiliary::template_structures::{ice_cmc21, simple_cubic_hydrogen};
use crate::symmetry::oracle::moyo_operations;
use crate::symmetry::symmetry_engine::{SymmetryEngine, SymmetryParams};

#[test]
fn test_oracle_ice() {
    let ice = ice_cmc21();
    let space_group = moyo_operations(&ice, 1e-4).unwrap();
    assert_eq!(space_group.number, 36);
    assert_eq!(space_group.rotations.len(), 4);

    let engine = SymmetryEngine::from_moyo(Arc::new(ice), &SymmetryParams::default()).unwrap();
    assert_eq!(engine.n_operations(), 4);
}

#[test]
fn test_oracle_agrees_with_search() {
    let structure = Arc::new(simple_cubic_hydrogen());
    let params = SymmetryParams::default();
    let external = SymmetryEngine::from_moyo(Arc::clone(&structure), &params).unwrap();
    let searched = SymmetryEngine::new(structure, &params).unwrap();
    assert_eq!(external.n_operations(), searched.n_operations());
    assert_eq!(external.point_group_size(), 48);
}

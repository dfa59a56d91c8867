use approx::assert_relative_eq;

use crate::auxiliary::element::{parse_atomic_mass, ElementMap};
use crate::auxiliary::units::MASS_RY_TO_UMA;

#[test]
fn test_element_parse_atomic_mass() {
    assert_eq!(parse_atomic_mass("1.00794(7)"), Some(1.00794));
    assert_eq!(parse_atomic_mass("15.9994(3)"), Some(15.9994));
    assert_eq!(parse_atomic_mass("196.966569(4)"), Some(196.966569));
    assert_eq!(parse_atomic_mass("12.0107"), Some(12.0107));
    assert_eq!(parse_atomic_mass("[98]"), Some(98.0));
    assert_eq!(parse_atomic_mass("[98"), None);
    assert_eq!(parse_atomic_mass(""), None);
}

#[test]
fn test_element_lookup() {
    let emap = ElementMap::new();
    let (z, mass) = emap.lookup("H").unwrap();
    assert_eq!(z, 1);
    assert_relative_eq!(mass * MASS_RY_TO_UMA, 1.00794, epsilon = 1e-3);

    let (z, mass) = emap.lookup("o1").unwrap();
    assert_eq!(z, 8);
    assert_relative_eq!(mass * MASS_RY_TO_UMA, 15.999, epsilon = 1e-2);

    let (z, _) = emap.lookup("Cl_b").unwrap();
    assert_eq!(z, 17);
    assert!(emap.lookup("Xq").is_err());
    assert!(emap.lookup("1").is_err());
}

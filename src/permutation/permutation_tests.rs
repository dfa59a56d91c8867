use itertools::Itertools;

use crate::errors::PhononError;
use crate::permutation::Permutation;

#[test]
fn test_permutation_validation() {
    assert!(Permutation::from_image(&[0, 2, 1]).is_ok());
    let err = Permutation::from_image(&[0, 0, 1]).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PhononError>(),
        Some(PhononError::Validation(_))
    ));
    assert!(Permutation::from_image(&[0, 3, 1]).is_err());
}

#[test]
fn test_permutation_cycles() {
    let p_01234 = Permutation::from_image(&[0, 1, 2, 3, 4]).unwrap();
    assert_eq!(p_01234, Permutation::identity(5));
    assert_eq!(p_01234.cycles(), vec![vec![0], vec![1], vec![2], vec![3], vec![4]]);
    assert_eq!(p_01234.to_string(), "()");

    let p_32104 = Permutation::from_image(&[3, 2, 1, 0, 4]).unwrap();
    assert_eq!(p_32104.cycles(), vec![vec![0, 3], vec![1, 2], vec![4]]);
    assert_eq!(p_32104.to_string(), "(0 3)(1 2)");

    let p_12340 = Permutation::from_image(&[1, 2, 3, 4, 0]).unwrap();
    assert_eq!(p_12340.cycles(), vec![vec![0, 1, 2, 3, 4]]);
    assert_eq!(p_12340.to_string(), "(0 1 2 3 4)");

    for image in (0..6usize).permutations(6) {
        let perm = Permutation::from_image(&image).unwrap();
        let covered = perm.cycles().into_iter().flatten().sorted().collect_vec();
        assert_eq!(covered, (0..6).collect_vec());
        for cycle in perm.cycles() {
            for (&i, &j) in cycle.iter().circular_tuple_windows() {
                assert_eq!(perm.apply(i), j);
            }
        }
    }
}

#[test]
fn test_permutation_composition() {
    let p_01234 = Permutation::identity(5);
    let p_32104 = Permutation::from_image(&[3, 2, 1, 0, 4]).unwrap();
    assert_eq!(p_32104, &p_01234 * &p_32104);
    assert_eq!(p_32104, &p_32104 * &p_01234);

    let p_04213 = Permutation::from_image(&[0, 4, 2, 1, 3]).unwrap();
    let p_34120 = Permutation::from_image(&[3, 4, 1, 2, 0]).unwrap();
    let p_12403 = Permutation::from_image(&[1, 2, 4, 0, 3]).unwrap();
    assert_eq!(p_34120, &p_32104 * &p_04213);
    assert_eq!(p_12403, &p_04213 * &p_32104);

    let p_12340 = Permutation::from_image(&[1, 2, 3, 4, 0]).unwrap();
    let p_23401 = Permutation::from_image(&[2, 3, 4, 0, 1]).unwrap();
    assert_eq!(p_23401, &p_12340 * &p_12340);
    for i in 0..5 {
        assert_eq!((&p_04213 * &p_12340).apply(i), p_04213.apply(p_12340.apply(i)));
    }
}

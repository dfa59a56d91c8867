//! Template crystal structures for tests and demonstrations.

use indexmap::IndexMap;
use nalgebra::{Matrix3, Point3};

use crate::auxiliary::structure::Structure;

/// A simple cubic crystal of one hydrogen atom in a unit cube, with a mass of 938 Rydberg mass
/// units.
///
/// # Panics
///
/// Never, the template is valid.
#[must_use]
pub fn simple_cubic_hydrogen() -> Structure {
    let mut masses = IndexMap::new();
    masses.insert("H".to_string(), 938.0);
    Structure::new(&["H"], vec![Point3::origin()], Some(Matrix3::identity()))
        .and_then(|s| s.with_masses(&masses))
        .expect("Invalid simple cubic template.")
}

/// The primitive cell of a proton-ordered ice phase with space group $`Cmc2_1`$ (No. 36) and
/// twelve atoms, with natural-abundance masses.
///
/// # Panics
///
/// Never, the template is valid.
#[must_use]
#[rustfmt::skip]
pub fn ice_cmc21() -> Structure {
    let species = ["O", "H", "H"].repeat(4);
    let positions = vec![
        Point3::new(2.189_738_660_247_663_4, 1.267_693_247_323_761_2, 0.427_402_265_644_092_0),
        Point3::new(2.189_738_660_247_663_4, 1.254_378_974_806_845_0, 1.431_024_971_798_697_4),
        Point3::new(2.189_738_660_247_663_4, 0.310_181_927_691_047_5, 0.126_249_431_142_667_8),
        Point3::new(4.379_477_320_495_326_8, 2.539_554_610_965_875_1, 6.690_688_558_020_812_4),
        Point3::new(5.183_330_372_891_943_8, 2.045_328_339_217_904_9, 7.032_986_515_664_815_0),
        Point3::new(3.575_624_272_598_710_6, 2.045_328_339_217_904_9, 7.032_986_515_664_815_0),
        Point3::new(4.379_477_320_495_326_8, 2.536_244_176_713_030_8, 4.005_334_651_419_091_5),
        Point3::new(4.379_477_320_495_326_8, 2.549_558_449_229_947_2, 5.008_957_362_073_696_9),
        Point3::new(4.379_477_320_495_326_8, 3.493_755_500_845_745_0, 3.704_181_816_917_667_0),
        Point3::new(2.189_738_660_247_663_4, 1.264_382_813_070_917_4, 3.112_756_167_745_812_0),
        Point3::new(1.385_885_612_351_047_2, 1.758_609_084_818_887_3, 3.455_054_125_389_815_0),
        Point3::new(2.993_591_712_644_279_9, 1.758_609_084_818_887_3, 3.455_054_125_389_815_0),
    ];
    let lattice = Matrix3::new(
        4.379_477_320_495_326_8, 0.0, 0.0,
        2.189_738_660_247_663_4, 3.803_937_419_536_791_9, 0.0,
        0.0, 0.0, 7.155_864_776_049_999_6,
    );
    Structure::new(&species, positions, Some(lattice))
        .and_then(Structure::with_default_masses)
        .expect("Invalid ice template.")
}

/// A three-atom orthorhombic crystal with point group $`mmm`$ used for tensor and star tests.
///
/// # Panics
///
/// Never, the template is valid.
#[must_use]
pub fn orthorhombic_abx() -> Structure {
    let lattice = Matrix3::new(3.0, 0.0, 0.0, 0.0, 4.0, 0.0, 0.0, 0.0, 5.0);
    Structure::new(
        &["A", "X", "X"],
        vec![
            Point3::origin(),
            Point3::new(0.0, 0.0, 1.5),
            Point3::new(0.0, 0.0, 3.5),
        ],
        Some(lattice),
    )
    .and_then(|s| {
        let mut masses = IndexMap::new();
        masses.insert("A".to_string(), 50_000.0);
        masses.insert("X".to_string(), 20_000.0);
        s.with_masses(&masses)
    })
    .expect("Invalid orthorhombic template.")
}

//! Partitioning of wavevector sets into stars.

use anyhow;
use log;
use nalgebra::Vector3;

use crate::auxiliary::structure::Structure;
use crate::errors::configuration_bail;
use crate::phonons::qgrid::{find_q_index, q_grid};
use crate::phonons::{DynamicalMatrixSet, QStar, StarMember};
use crate::symmetry::symmetry_engine::SymmetryEngine;

#[cfg(test)]
#[path = "star_tests.rs"]
mod star_tests;

/// Partitions a wavevector list into stars under a symmetry group.
///
/// Wavevectors are visited in order; each one not yet assigned becomes the representative of a
/// new star whose members are its images $`\mathbf{R}\mathbf{q}`$ and, with time reversal,
/// $`-\mathbf{R}\mathbf{q}`$. Proper images take precedence over time-reversed ones.
///
/// # Arguments
///
/// * `q_tot` - The Cartesian wavevectors.
/// * `engine` - The symmetry group.
/// * `time_reversal` - Boolean indicating if time-reversed images join the star.
///
/// # Errors
///
/// Errors with [`crate::errors::PhononError::Configuration`] if two wavevectors of the list are
/// equivalent, or the image of a wavevector under an operation is not in the list.
pub fn build_q_stars(
    q_tot: &[Vector3<f64>],
    engine: &SymmetryEngine,
    time_reversal: bool,
) -> Result<Vec<QStar>, anyhow::Error> {
    let structure = engine.structure();
    let thresh = engine.params().q_threshold;
    for (i, q) in q_tot.iter().enumerate() {
        if let Some(j) = find_q_index(structure, &q_tot[..i], q, thresh)? {
            configuration_bail!("Wavevectors {j} and {i} are equivalent.");
        }
    }

    let mut assigned = vec![false; q_tot.len()];
    let mut stars = Vec::new();
    for (irep, q) in q_tot.iter().enumerate() {
        if assigned[irep] {
            continue;
        }
        let mut members = Vec::new();
        for (iop, op) in engine.operations().iter().enumerate() {
            let rq = op.rotate(q);
            let Some(iq) = find_q_index(structure, q_tot, &rq, thresh)? else {
                configuration_bail!(
                    "Operation {iop} maps wavevector {irep} outside of the wavevector set."
                );
            };
            if !assigned[iq] {
                assigned[iq] = true;
                members.push(StarMember {
                    q_index: iq,
                    operation: Some(iop),
                    time_reversed: false,
                });
            }
        }
        if time_reversal {
            for (iop, op) in engine.operations().iter().enumerate() {
                if let Some(iq) = find_q_index(structure, q_tot, &(-op.rotate(q)), thresh)? {
                    if !assigned[iq] {
                        assigned[iq] = true;
                        members.push(StarMember {
                            q_index: iq,
                            operation: Some(iop),
                            time_reversed: true,
                        });
                    }
                }
            }
        }
        // The identity comes first, so the representative leads the list.
        stars.push(QStar {
            representative: irep,
            members,
        });
    }
    log::debug!(
        "{} wavevector(s) partitioned into {} star(s).",
        q_tot.len(),
        stars.len()
    );
    Ok(stars)
}

/// Generates the irreducible wavevectors of the grid of a diagonal supercell: one representative
/// per star.
///
/// # Arguments
///
/// * `engine` - The symmetry group of the primitive structure.
/// * `dims` - The supercell multipliers.
///
/// # Returns
///
/// The representatives together with the sizes of their stars, in grid order.
pub fn irreducible_q_points(
    engine: &SymmetryEngine,
    dims: [usize; 3],
) -> Result<Vec<(Vector3<f64>, usize)>, anyhow::Error> {
    let structure: &Structure = engine.structure();
    let grid = q_grid(structure, dims)?;
    let restricted = engine.restricted_to_q_points(&grid)?;
    let stars = build_q_stars(&grid, &restricted, engine.params().time_reversal)?;
    Ok(stars
        .iter()
        .map(|star| (grid[star.representative], star.len()))
        .collect())
}

/// Re-expresses the operation indices of stars built with a subgroup as indices into the full
/// group.
pub(crate) fn lift_operations(
    stars: &mut [QStar],
    subgroup: &SymmetryEngine,
    group: &SymmetryEngine,
) {
    let lifted = subgroup
        .operations()
        .iter()
        .map(|op| group.operations().iter().position(|g| g == op))
        .collect::<Vec<_>>();
    for member in stars.iter_mut().flat_map(|star| star.members.iter_mut()) {
        member.operation = member.operation.and_then(|i| lifted.get(i).copied().flatten());
    }
}

impl DynamicalMatrixSet {
    /// Rebuilds the star partition of this set under a symmetry group, recording for each member
    /// the index, in `engine`, of the operation mapping the representative onto it.
    ///
    /// Only the operations mapping the wavevector set onto itself take part.
    ///
    /// # Errors
    ///
    /// Errors with [`crate::errors::PhononError::Configuration`] if the set contains equivalent
    /// wavevectors.
    pub fn adjust_q_star(&mut self, engine: &SymmetryEngine) -> Result<(), anyhow::Error> {
        let restricted = engine.restricted_to_q_points(self.q_tot())?;
        let mut stars = build_q_stars(self.q_tot(), &restricted, engine.params().time_reversal)?;
        lift_operations(&mut stars, &restricted, engine);
        self.set_stars(stars);
        Ok(())
    }
}

//! Sets of dynamical matrices on wavevector grids, their stars and their real-space
//! counterparts.

use std::fmt;
use std::sync::Arc;

use anyhow::{self, format_err};
use log;
use nalgebra::Vector3;
use ndarray::Array2;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::auxiliary::linalg::{ensure_block_shape, hermiticity_deviation, hermitise};
use crate::auxiliary::structure::Structure;
use crate::errors::{validation_bail, PhononError};
use crate::io::format::{phonsym_warn, write_subtitle};

pub mod fourier;
pub mod qgrid;
pub mod spectral;
pub mod star;
pub mod sum_rule;
pub mod symmetrisation;

#[cfg(test)]
#[path = "phonons_tests.rs"]
pub(crate) mod phonons_tests;

// ==================
// Struct definitions
// ==================

/// A member of a star of wavevectors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarMember {
    /// The index of the member in the wavevector list of the owning set.
    pub q_index: usize,

    /// The index of the operation mapping the representative onto this member, if known.
    /// Stars read from files carry no operation until they are rebuilt.
    pub operation: Option<usize>,

    /// Boolean indicating if the member is the time-reversed image, *i.e.*
    /// $`\mathbf{q}_m \equiv -\mathbf{R}\mathbf{q}_{\mathrm{rep}}`$.
    pub time_reversed: bool,
}

/// A star of symmetry-equivalent wavevectors, stored as indices into the wavevector list of the
/// owning set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QStar {
    /// The index of the representative wavevector.
    pub representative: usize,

    /// The members of the star, representative first.
    pub members: Vec<StarMember>,
}

impl QStar {
    /// A star containing only one wavevector.
    #[must_use]
    pub fn singleton(q_index: usize) -> Self {
        Self {
            representative: q_index,
            members: vec![StarMember {
                q_index,
                operation: Some(0),
                time_reversed: false,
            }],
        }
    }

    /// The indices of the members.
    #[must_use]
    pub fn indices(&self) -> Vec<usize> {
        self.members.iter().map(|m| m.q_index).collect()
    }

    /// The number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Checks if the star has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// A set of dynamical matrices, one per wavevector, for a crystal structure.
///
/// The matrices are $`3N \times 3N`$ complex matrices in Rydberg atomic units, not mass-weighted,
/// with
/// ```math
/// \mathbf{D}_{ab}(\mathbf{q}) = \sum_{\mathbf{R}} \mathbf{\Phi}_{ab}(\mathbf{R})
///     \exp(-2\pi i\,\mathbf{q}\cdot\mathbf{R}),
/// ```
/// where $`\mathbf{\Phi}_{ab}(\mathbf{R})`$ couples atom $`a`$ in the origin cell and atom $`b`$ in
/// the cell at lattice vector $`\mathbf{R}`$. Wavevectors are Cartesian, without the $`2\pi`$
/// factor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DynamicalMatrixSet {
    /// The crystal structure, shared read-only.
    structure: Arc<Structure>,

    /// The wavevectors.
    q_tot: Vec<Vector3<f64>>,

    /// The dynamical matrix at each wavevector.
    dynmats: Vec<Array2<Complex<f64>>>,

    /// The partition of the wavevectors into stars.
    q_stars: Vec<QStar>,
}

impl DynamicalMatrixSet {
    /// Creates a set in which every wavevector forms its own star.
    ///
    /// # Errors
    ///
    /// Errors with [`PhononError::Validation`] if the numbers of wavevectors and matrices differ
    /// or a matrix is not $`3N \times 3N`$.
    pub fn new(
        structure: Arc<Structure>,
        q_tot: Vec<Vector3<f64>>,
        dynmats: Vec<Array2<Complex<f64>>>,
    ) -> Result<Self, anyhow::Error> {
        if q_tot.len() != dynmats.len() {
            validation_bail!(
                "Mismatched numbers of wavevectors ({}) and dynamical matrices ({}).",
                q_tot.len(),
                dynmats.len()
            );
        }
        if q_tot.is_empty() {
            validation_bail!("A dynamical matrix set needs at least one wavevector.");
        }
        for (iq, dynmat) in dynmats.iter().enumerate() {
            ensure_block_shape(dynmat, structure.n_atoms(), &format!("Dynamical matrix {iq}"))?;
        }
        let q_stars = (0..q_tot.len()).map(QStar::singleton).collect();
        Ok(Self {
            structure,
            q_tot,
            dynmats,
            q_stars,
        })
    }

    /// Replaces the star partition.
    ///
    /// # Errors
    ///
    /// Errors with [`PhononError::Validation`] if the stars do not partition the wavevectors.
    pub fn with_stars(mut self, q_stars: Vec<QStar>) -> Result<Self, anyhow::Error> {
        let mut seen = vec![false; self.q_tot.len()];
        for star in &q_stars {
            if star.members.first().map(|m| m.q_index) != Some(star.representative) {
                validation_bail!("The first member of a star must be its representative.");
            }
            for member in &star.members {
                match seen.get_mut(member.q_index) {
                    Some(flag) if !*flag => *flag = true,
                    Some(_) => validation_bail!(
                        "Wavevector {} appears in more than one star.",
                        member.q_index
                    ),
                    None => validation_bail!(
                        "Star member index {} is out of range.",
                        member.q_index
                    ),
                }
            }
        }
        if let Some(missing) = seen.iter().position(|flag| !flag) {
            validation_bail!("Wavevector {missing} belongs to no star.");
        }
        self.q_stars = q_stars;
        Ok(self)
    }

    /// The crystal structure.
    #[must_use]
    pub fn structure(&self) -> &Arc<Structure> {
        &self.structure
    }

    /// The wavevectors.
    #[must_use]
    pub fn q_tot(&self) -> &[Vector3<f64>] {
        &self.q_tot
    }

    /// All dynamical matrices.
    #[must_use]
    pub fn dynmats(&self) -> &[Array2<Complex<f64>>] {
        &self.dynmats
    }

    /// The dynamical matrix at one wavevector.
    pub fn dynmat(&self, iq: usize) -> Result<&Array2<Complex<f64>>, anyhow::Error> {
        self.dynmats
            .get(iq)
            .ok_or_else(|| format_err!("Wavevector index {iq} out of range."))
    }

    /// The stars.
    #[must_use]
    pub fn q_stars(&self) -> &[QStar] {
        &self.q_stars
    }

    /// The number of wavevectors.
    #[must_use]
    pub fn n_q(&self) -> usize {
        self.q_tot.len()
    }

    /// The number of atoms in the primitive cell.
    #[must_use]
    pub fn n_atoms(&self) -> usize {
        self.structure.n_atoms()
    }

    /// Replaces all dynamical matrices at once.
    pub(crate) fn set_dynmats(
        &mut self,
        dynmats: Vec<Array2<Complex<f64>>>,
    ) -> Result<(), anyhow::Error> {
        if dynmats.len() != self.q_tot.len() {
            validation_bail!(
                "Mismatched numbers of wavevectors ({}) and dynamical matrices ({}).",
                self.q_tot.len(),
                dynmats.len()
            );
        }
        for (iq, dynmat) in dynmats.iter().enumerate() {
            ensure_block_shape(dynmat, self.n_atoms(), &format!("Dynamical matrix {iq}"))?;
        }
        self.dynmats = dynmats;
        Ok(())
    }

    /// Replaces the dynamical matrix at one wavevector.
    pub(crate) fn set_dynmat(
        &mut self,
        iq: usize,
        dynmat: Array2<Complex<f64>>,
    ) -> Result<(), anyhow::Error> {
        ensure_block_shape(&dynmat, self.n_atoms(), &format!("Dynamical matrix {iq}"))?;
        let slot = self
            .dynmats
            .get_mut(iq)
            .ok_or_else(|| format_err!("Wavevector index {iq} out of range."))?;
        *slot = dynmat;
        Ok(())
    }

    /// Replaces the star partition without validation.
    pub(crate) fn set_stars(&mut self, q_stars: Vec<QStar>) {
        self.q_stars = q_stars;
    }

    /// Replaces every matrix by its Hermitian part.
    pub fn hermitise(&mut self) {
        self.dynmats = self.dynmats.iter().map(hermitise).collect();
    }

    /// Checks the Hermiticity of every matrix.
    ///
    /// # Arguments
    ///
    /// * `threshold` - The largest accepted absolute entry of $`\mathbf{D} - \mathbf{D}^\dagger`$.
    ///
    /// # Returns
    ///
    /// The largest deviation found.
    ///
    /// # Errors
    ///
    /// Errors with [`PhononError::ToleranceExceeded`] if the deviation exceeds the threshold. The
    /// condition is also logged as a warning.
    pub fn check_hermiticity(&self, threshold: f64) -> Result<f64, anyhow::Error> {
        let (iq, deviation) = self
            .dynmats
            .iter()
            .map(hermiticity_deviation)
            .enumerate()
            .fold((0, 0.0), |acc, (iq, dev)| if dev > acc.1 { (iq, dev) } else { acc });
        log::debug!("Largest Hermiticity deviation {deviation:.3e} at wavevector {iq}.");
        if deviation > threshold {
            phonsym_warn!(
                "Dynamical matrix {iq} deviates from Hermiticity by {deviation:.3e} (threshold {threshold:.3e})."
            );
            return Err(anyhow::Error::new(PhononError::ToleranceExceeded {
                what: format!("Hermiticity of dynamical matrix {iq}"),
                deviation,
                threshold,
            }));
        }
        Ok(deviation)
    }

    /// The crystal coordinates $`\mathbf{k} = \mathbf{A}\mathbf{q}`$ of every wavevector.
    pub fn crystal_q_points(&self) -> Result<Vec<Vector3<f64>>, anyhow::Error> {
        let lattice = self.structure.cell()?;
        Ok(self.q_tot.iter().map(|q| lattice * q).collect())
    }
}

// =====================
// Trait implementations
// =====================

impl fmt::Display for DynamicalMatrixSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_subtitle(f, "Dynamical matrix set")?;
        writeln!(
            f,
            "{} atom(s), {} wavevector(s) in {} star(s)",
            self.n_atoms(),
            self.n_q(),
            self.q_stars.len()
        )?;
        let crystal = self.crystal_q_points().ok();
        for (istar, star) in self.q_stars.iter().enumerate() {
            for member in &star.members {
                let q = &self.q_tot[member.q_index];
                let k = crystal
                    .as_ref()
                    .map(|ks| ks[member.q_index])
                    .unwrap_or_else(Vector3::zeros);
                writeln!(
                    f,
                    "  star {istar:>3}  q{:<4} Cartesian ({:>+9.5} {:>+9.5} {:>+9.5})  crystal ({:>+7.4} {:>+7.4} {:>+7.4}){}",
                    member.q_index,
                    q[0],
                    q[1],
                    q[2],
                    k[0],
                    k[1],
                    k[2],
                    if member.time_reversed { "  [T]" } else { "" }
                )?;
            }
        }
        Ok(())
    }
}

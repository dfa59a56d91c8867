//! Symmetrisation of dynamical matrix sets, either directly in reciprocal space or through the
//! real-space force constants of the commensurate supercell.

use std::fmt;
use std::sync::Arc;

use anyhow;
use derive_builder::Builder;
use log;
use nalgebra::Vector3;
use ndarray::Array2;
use num_complex::Complex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::auxiliary::linalg::max_abs_difference;
use crate::errors::{configuration_bail, PhononError};
use crate::io::format::{phonsym_output, phonsym_warn};
use crate::phonons::fourier::get_dynq_from_fc_supercell;
use crate::phonons::qgrid::find_q_index;
use crate::phonons::star::{build_q_stars, lift_operations};
use crate::phonons::sum_rule::AsrKind;
use crate::phonons::{DynamicalMatrixSet, QStar};
use crate::symmetry::symmetry_engine::{SymmetryEngine, SymmetryParams};

#[cfg(test)]
#[path = "symmetrisation_tests.rs"]
mod symmetrisation_tests;

// ==================
// Parameters
// ==================

/// A structure containing control parameters for symmetrisation.
#[derive(Clone, Builder, Debug, Serialize, Deserialize)]
pub struct SymmetrisationParams {
    /// The acoustic sum rule imposed on the $`\Gamma`$ matrix before symmetrisation, if any.
    #[builder(default = "None")]
    #[serde(default)]
    pub sum_rule: Option<AsrKind>,

    /// The largest accepted entry-wise deviation between the reciprocal-space and supercell
    /// symmetrisation paths.
    #[builder(default = "1e-6")]
    #[serde(default = "default_agreement_tolerance")]
    pub agreement_tolerance: f64,

    /// The largest accepted non-Hermiticity of the input matrices before a warning is issued.
    #[builder(default = "1e-8")]
    #[serde(default = "default_hermiticity_threshold")]
    pub hermiticity_threshold: f64,
}

impl SymmetrisationParams {
    /// Returns a builder to construct a [`SymmetrisationParams`] structure.
    #[must_use]
    pub fn builder() -> SymmetrisationParamsBuilder {
        SymmetrisationParamsBuilder::default()
    }
}

impl Default for SymmetrisationParams {
    fn default() -> Self {
        Self::builder()
            .build()
            .expect("Unable to build a default `SymmetrisationParams`.")
    }
}

fn default_agreement_tolerance() -> f64 {
    1e-6
}

fn default_hermiticity_threshold() -> f64 {
    1e-8
}

impl fmt::Display for SymmetrisationParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Acoustic sum rule: {}",
            self.sum_rule
                .map_or_else(|| "none".to_string(), |kind| kind.to_string())
        )?;
        writeln!(
            f,
            "Path agreement tolerance: {:.3e}",
            self.agreement_tolerance
        )?;
        writeln!(
            f,
            "Hermiticity threshold: {:.3e}",
            self.hermiticity_threshold
        )?;
        Ok(())
    }
}

// ==================
// Trait definitions
// ==================

/// A trait for strategies that enforce the space-group symmetry on a set of dynamical matrices.
pub trait Symmetriser {
    /// A short name of the strategy for logging.
    fn name(&self) -> &'static str;

    /// Symmetrises a set in place.
    ///
    /// # Errors
    ///
    /// Errors if the set is inconsistent with the strategy, *e.g.* the wavevectors do not form a
    /// complete grid for a supercell strategy.
    fn symmetrise(&self, set: &mut DynamicalMatrixSet) -> Result<(), anyhow::Error>;
}

impl DynamicalMatrixSet {
    /// Symmetrises this set with a given strategy.
    pub fn symmetrise<S: Symmetriser + ?Sized>(
        &mut self,
        symmetriser: &S,
    ) -> Result<(), anyhow::Error> {
        log::debug!("Symmetrising {} wavevector(s) {}.", self.n_q(), symmetriser.name());
        symmetriser.symmetrise(self)
    }
}

/// Reports a non-Hermitian input as a warning and propagates any other failure.
fn warn_on_non_hermiticity(
    set: &DynamicalMatrixSet,
    threshold: f64,
) -> Result<(), anyhow::Error> {
    match set.check_hermiticity(threshold) {
        Ok(_) => Ok(()),
        Err(err)
            if err
                .downcast_ref::<PhononError>()
                .is_some_and(PhononError::is_tolerance) =>
        {
            Ok(())
        }
        Err(err) => Err(err),
    }
}

// ==================
// Reciprocal space
// ==================

/// Symmetrisation in reciprocal space.
///
/// For each star, the images of the matrices of all wavevectors mapped onto the representative
/// are averaged over the operations leaving the wavevector set invariant, together with their
/// time-reversed counterparts. The average is projected onto the small group of the
/// representative, made Hermitian, and propagated to the other members of the star.
///
/// On a complete grid with time reversal this coincides with [`SupercellSymmetriser`].
pub struct QSpaceSymmetriser<'a> {
    engine: &'a SymmetryEngine,
    params: &'a SymmetrisationParams,
}

impl<'a> QSpaceSymmetriser<'a> {
    /// Creates a reciprocal-space symmetriser.
    ///
    /// # Arguments
    ///
    /// * `engine` - The symmetry group of the primitive structure.
    /// * `params` - The symmetrisation parameters.
    #[must_use]
    pub fn new(engine: &'a SymmetryEngine, params: &'a SymmetrisationParams) -> Self {
        Self { engine, params }
    }

    /// Symmetrises the matrices of one star.
    ///
    /// # Returns
    ///
    /// The wavevector indices of the members together with their new matrices.
    fn symmetrise_star(
        &self,
        set: &DynamicalMatrixSet,
        group: &SymmetryEngine,
        star: &QStar,
    ) -> Result<Vec<(usize, Array2<Complex<f64>>)>, anyhow::Error> {
        let q_tot = set.q_tot();
        let q0 = q_tot[star.representative];
        let thresh = group.params().q_threshold;
        let time_reversal = group.params().time_reversal;
        let dim = 3 * set.n_atoms();

        let mut targets: Vec<(Vector3<f64>, bool)> = vec![(q0, false)];
        if time_reversal {
            targets.push((-q0, true));
        }
        let mut sum = Array2::<Complex<f64>>::zeros((dim, dim));
        let mut count = 0usize;
        for (iop, op) in group.operations().iter().enumerate() {
            for &(target, antiunitary) in &targets {
                let q_src = op.cartesian_rotation().transpose() * target;
                let Some(isrc) = find_q_index(group.structure(), q_tot, &q_src, thresh)? else {
                    // Sets not closed under inversion have no time-reversed partners at all.
                    if antiunitary {
                        continue;
                    }
                    configuration_bail!(
                        "Operation {iop} maps no wavevector of the set onto wavevector {}.",
                        star.representative
                    );
                };
                sum += &group.transform_dynamical_matrix(
                    iop,
                    set.dynmat(isrc)?,
                    &q_tot[isrc],
                    antiunitary,
                )?;
                count += 1;
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let averaged = sum.mapv(|x| x / count as f64);
        let projected = group.symmetrise_dynamical_block(&averaged, &q0)?;

        star.members
            .iter()
            .map(|member| {
                let Some(iop) = member.operation else {
                    configuration_bail!(
                        "Star member {} carries no operation.",
                        member.q_index
                    );
                };
                let dynmat =
                    group.transform_dynamical_matrix(iop, &projected, &q0, member.time_reversed)?;
                Ok((member.q_index, dynmat))
            })
            .collect()
    }
}

impl<'a> Symmetriser for QSpaceSymmetriser<'a> {
    fn name(&self) -> &'static str {
        "in reciprocal space"
    }

    fn symmetrise(&self, set: &mut DynamicalMatrixSet) -> Result<(), anyhow::Error> {
        let thresh = self.engine.params().q_threshold;
        warn_on_non_hermiticity(set, self.params.hermiticity_threshold)?;
        if let Some(kind) = self.params.sum_rule {
            set.apply_sum_rule(kind, thresh)?;
        }

        let group = self.engine.restricted_to_q_points(set.q_tot())?;
        if group.n_operations() < self.engine.n_operations() {
            log::info!(
                "Only {} of {} operation(s) map the wavevector set onto itself.",
                group.n_operations(),
                self.engine.n_operations()
            );
        }
        let mut stars = build_q_stars(set.q_tot(), &group, group.params().time_reversal)?;
        let view: &DynamicalMatrixSet = set;
        let updates = stars
            .par_iter()
            .map(|star| self.symmetrise_star(view, &group, star))
            .collect::<Result<Vec<_>, _>>()?;
        let mut dynmats = set.dynmats().to_vec();
        for (iq, dynmat) in updates.into_iter().flatten() {
            dynmats[iq] = dynmat;
        }
        set.set_dynmats(dynmats)?;
        lift_operations(&mut stars, &group, self.engine);
        set.set_stars(stars);
        Ok(())
    }
}

// ==================
// Supercell
// ==================

/// Symmetrisation through the supercell.
///
/// The set is transformed into the real-space force constants of its commensurate supercell,
/// these are averaged over the full space group of the supercell, including its pure
/// translations, and transformed back. The averaged force constants are real, so time reversal is
/// always implied.
pub struct SupercellSymmetriser<'a> {
    symmetry_params: &'a SymmetryParams,
    params: &'a SymmetrisationParams,
}

impl<'a> SupercellSymmetriser<'a> {
    /// Creates a supercell symmetriser.
    ///
    /// # Arguments
    ///
    /// * `symmetry_params` - The parameters for symmetry detection in the supercell.
    /// * `params` - The symmetrisation parameters.
    #[must_use]
    pub fn new(symmetry_params: &'a SymmetryParams, params: &'a SymmetrisationParams) -> Self {
        Self {
            symmetry_params,
            params,
        }
    }
}

impl<'a> Symmetriser for SupercellSymmetriser<'a> {
    fn name(&self) -> &'static str {
        "through the supercell"
    }

    fn symmetrise(&self, set: &mut DynamicalMatrixSet) -> Result<(), anyhow::Error> {
        let thresh = self.symmetry_params.q_threshold;
        warn_on_non_hermiticity(set, self.params.hermiticity_threshold)?;
        if let Some(kind) = self.params.sum_rule {
            set.apply_sum_rule(kind, thresh)?;
        }
        let dims = set.get_supercell(thresh)?;
        let (fc, supercell) = set.generate_supercell_dyn(dims, thresh)?;
        let engine = SymmetryEngine::new(Arc::new(supercell), self.symmetry_params)?;
        log::debug!(
            "The {}x{}x{} supercell has {} symmetry operation(s).",
            dims[0],
            dims[1],
            dims[2],
            engine.n_operations()
        );
        let fc = engine.symmetrise_force_constants(&fc)?;
        let dynmats =
            get_dynq_from_fc_supercell(&fc, set.q_tot(), set.structure(), engine.structure())?;
        set.set_dynmats(dynmats)
    }
}

/// Symmetrises copies of a set along both paths and measures their agreement.
///
/// # Arguments
///
/// * `set` - The set to symmetrise. It is left untouched.
/// * `engine` - The symmetry group of the primitive structure.
/// * `params` - The symmetrisation parameters.
///
/// # Returns
///
/// The largest entry-wise deviation between the two results.
///
/// # Errors
///
/// Errors with [`PhononError::ToleranceExceeded`] if the deviation exceeds
/// [`SymmetrisationParams::agreement_tolerance`], or if either path fails.
pub fn check_symmetrisation_agreement(
    set: &DynamicalMatrixSet,
    engine: &SymmetryEngine,
    params: &SymmetrisationParams,
) -> Result<f64, anyhow::Error> {
    if !engine.params().time_reversal {
        phonsym_warn!(
            "The supercell path always implies time reversal; the paths may disagree without it."
        );
    }
    let mut via_q = set.clone();
    via_q.symmetrise(&QSpaceSymmetriser::new(engine, params))?;
    let mut via_supercell = set.clone();
    via_supercell.symmetrise(&SupercellSymmetriser::new(engine.params(), params))?;
    let deviation = via_q
        .dynmats()
        .iter()
        .zip(via_supercell.dynmats().iter())
        .map(|(a, b)| max_abs_difference(a, b))
        .fold(0.0, f64::max);
    phonsym_output!(
        "Largest deviation between the symmetrisation paths: {deviation:.3e}"
    );
    if deviation > params.agreement_tolerance {
        phonsym_warn!(
            "The symmetrisation paths disagree by {deviation:.3e} (tolerance {:.3e}).",
            params.agreement_tolerance
        );
        return Err(anyhow::Error::new(PhononError::ToleranceExceeded {
            what: "agreement of the symmetrisation paths".to_string(),
            deviation,
            threshold: params.agreement_tolerance,
        }));
    }
    Ok(deviation)
}

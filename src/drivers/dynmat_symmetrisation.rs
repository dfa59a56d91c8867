//! Driver for the symmetrisation of a set of dynamical matrices, with optional Fourier
//! interpolation, positive-definiteness enforcement and $`\Upsilon`$ computation.

use std::fmt;
use std::sync::Arc;

use anyhow::{self, format_err};
use derive_builder::Builder;
use itertools::Itertools;
use log;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::auxiliary::units::{ry_to_display, DISPLAY_CONVERSIONS};
use crate::drivers::PhonSymDriver;
use crate::errors::PhononError;
use crate::io::format::{
    log_macsec_begin, log_macsec_end, log_subtitle, log_title, nice_bool, phonsym_output,
    PhonSymOutput,
};
use crate::io::qe_dyn::save_qe;
use crate::io::{write_phonsym_binary, PhonSymFileType};
use crate::phonons::spectral::{NegativeModeTreatment, UpsilonParams};
use crate::phonons::symmetrisation::{
    check_symmetrisation_agreement, QSpaceSymmetriser, SupercellSymmetriser, Symmetriser,
    SymmetrisationParams,
};
use crate::phonons::DynamicalMatrixSet;
use crate::symmetry::symmetry_engine::{SymmetryEngine, SymmetryParams};

#[cfg(test)]
#[path = "dynmat_symmetrisation_tests.rs"]
mod dynmat_symmetrisation_tests;

// ==================
// Struct definitions
// ==================

// ----------
// Parameters
// ----------

/// An enumerated type for the symmetrisation strategies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymmetrisationStrategy {
    /// Star-by-star projection in reciprocal space.
    #[default]
    QSpace,

    /// Projection of the real-space force constants of the commensurate supercell.
    Supercell,
}

impl fmt::Display for SymmetrisationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymmetrisationStrategy::QSpace => write!(f, "reciprocal space"),
            SymmetrisationStrategy::Supercell => write!(f, "supercell"),
        }
    }
}

/// An enumerated type for the sources of symmetry operations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymmetrySource {
    /// The operations are found by the built-in lattice and translation search.
    #[default]
    Search,

    /// The operations are obtained from the `moyo` crate. This requires the `moyo` feature.
    Moyo,
}

/// A structure containing control parameters for dynamical-matrix symmetrisation.
#[derive(Clone, Builder, Debug, Serialize, Deserialize)]
pub struct DynmatSymmetrisationParams {
    /// The parameters for symmetry detection.
    #[builder(default = "SymmetryParams::default()")]
    #[serde(default)]
    pub symmetry: SymmetryParams,

    /// The source of the symmetry operations.
    #[builder(default = "SymmetrySource::Search")]
    #[serde(default)]
    pub symmetry_source: SymmetrySource,

    /// The number of operations the space group is expected to have. A smaller group found is
    /// reported as diminished symmetry.
    #[builder(default = "None")]
    #[serde(default)]
    pub expected_n_operations: Option<usize>,

    /// The parameters for symmetrisation.
    #[builder(default = "SymmetrisationParams::default()")]
    #[serde(default)]
    pub symmetrisation: SymmetrisationParams,

    /// The symmetrisation strategy.
    #[builder(default = "SymmetrisationStrategy::QSpace")]
    #[serde(default)]
    pub strategy: SymmetrisationStrategy,

    /// Boolean indicating if both symmetrisation paths are to be run on the input and compared.
    #[builder(default = "false")]
    #[serde(default)]
    pub check_agreement: bool,

    /// The supercell onto whose commensurate grid the symmetrised set is interpolated, if any.
    #[builder(default = "None")]
    #[serde(default)]
    pub interpolate_to: Option<[usize; 3]>,

    /// The treatment of negative eigenvalues, if positive definiteness is to be enforced.
    #[builder(default = "None")]
    #[serde(default)]
    pub positive_definite: Option<NegativeModeTreatment>,

    /// The temperature (K) at which the $`\Upsilon`$ matrix is computed, if any.
    #[builder(default = "None")]
    #[serde(default)]
    pub upsilon_temperature: Option<f64>,

    /// The parameters for the $`\Upsilon`$ matrix.
    #[builder(default = "UpsilonParams::default()")]
    #[serde(default)]
    pub upsilon: UpsilonParams,

    /// Optional prefix for writing the resulting set as Quantum ESPRESSO dynamical-matrix files.
    #[builder(default = "None")]
    #[serde(default)]
    pub qe_save_prefix: Option<String>,

    /// Optional name for saving the result as binary files of types [`PhonSymFileType::Dyn`]
    /// and [`PhonSymFileType::Ups`].
    #[builder(default = "None")]
    #[serde(default)]
    pub result_save_name: Option<String>,

    /// The unit in which frequencies are reported, one of the keys of
    /// [`DISPLAY_CONVERSIONS`].
    #[builder(default = "default_frequency_unit()")]
    #[serde(default = "default_frequency_unit")]
    pub frequency_unit: String,
}

fn default_frequency_unit() -> String {
    "cm-1".to_string()
}

impl DynmatSymmetrisationParams {
    /// Returns a builder to construct a [`DynmatSymmetrisationParams`] structure.
    pub fn builder() -> DynmatSymmetrisationParamsBuilder {
        DynmatSymmetrisationParamsBuilder::default()
    }
}

impl Default for DynmatSymmetrisationParams {
    fn default() -> Self {
        Self::builder()
            .build()
            .expect("Unable to build a default `DynmatSymmetrisationParams`.")
    }
}

impl fmt::Display for DynmatSymmetrisationParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symmetry)?;
        writeln!(
            f,
            "Symmetry operations from: {}",
            match self.symmetry_source {
                SymmetrySource::Search => "lattice and translation search",
                SymmetrySource::Moyo => "moyo",
            }
        )?;
        if let Some(expected) = self.expected_n_operations {
            writeln!(f, "Expected number of operations: {expected}")?;
        }
        writeln!(f)?;
        write!(f, "{}", self.symmetrisation)?;
        writeln!(f, "Symmetrisation strategy: {}", self.strategy)?;
        writeln!(
            f,
            "Compare symmetrisation paths: {}",
            nice_bool(self.check_agreement)
        )?;
        writeln!(
            f,
            "Interpolate to supercell: {}",
            self.interpolate_to.map_or_else(
                || nice_bool(false),
                |dims| dims.iter().map(|n| n.to_string()).join("x")
            )
        )?;
        writeln!(
            f,
            "Enforce positive definiteness: {}",
            self.positive_definite
                .map_or_else(|| nice_bool(false), |treatment| treatment.to_string())
        )?;
        writeln!(
            f,
            "Frequency unit: {}",
            self.frequency_unit
        )?;
        writeln!(
            f,
            "Upsilon temperature: {}",
            self.upsilon_temperature
                .map_or_else(|| "--".to_string(), |t| format!("{t:.2} K"))
        )?;
        writeln!(
            f,
            "Save results to file: {}",
            if let Some(name) = self.result_save_name.as_ref() {
                format!("{name}.{}", PhonSymFileType::Dyn.ext())
            } else {
                nice_bool(false)
            }
        )?;
        writeln!(f)?;
        Ok(())
    }
}

// ------
// Result
// ------

/// A structure to contain dynamical-matrix symmetrisation results.
#[derive(Clone, Builder, Debug, Serialize, Deserialize)]
pub struct DynmatSymmetrisationResult {
    /// The control parameters used to obtain this set of results.
    pub parameters: DynmatSymmetrisationParams,

    /// The symmetrised, and possibly interpolated, set of dynamical matrices.
    pub dynamical_matrices: DynamicalMatrixSet,

    /// The number of space-group operations of the primitive structure.
    pub n_operations: usize,

    /// The largest deviation between the two symmetrisation paths, if they were compared.
    #[builder(default = "None")]
    pub path_deviation: Option<f64>,

    /// The number of negative eigenvalues treated to enforce positive definiteness.
    #[builder(default = "0")]
    pub n_negative_modes: usize,

    /// The $`\Upsilon`$ matrix of the commensurate supercell, if computed.
    #[builder(default = "None")]
    pub upsilon: Option<Array2<f64>>,
}

impl DynmatSymmetrisationResult {
    /// Returns a builder to construct a [`DynmatSymmetrisationResult`] structure.
    fn builder() -> DynmatSymmetrisationResultBuilder {
        DynmatSymmetrisationResultBuilder::default()
    }
}

impl fmt::Display for DynmatSymmetrisationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Space-group operations: {}", self.n_operations)?;
        if let Some(deviation) = self.path_deviation {
            writeln!(f, "Symmetrisation path deviation: {deviation:.3e}")?;
        }
        writeln!(
            f,
            "Negative eigenvalues treated: {}",
            self.n_negative_modes
        )?;
        if let Some(upsilon) = self.upsilon.as_ref() {
            writeln!(
                f,
                "Upsilon matrix: {}x{}, trace {:.6e}",
                upsilon.nrows(),
                upsilon.ncols(),
                upsilon.diag().sum()
            )?;
        }
        writeln!(f)?;
        write!(f, "{}", self.dynamical_matrices)?;
        Ok(())
    }
}

// ------
// Driver
// ------

/// A driver for the symmetrisation of a set of dynamical matrices.
#[derive(Clone, Builder)]
pub struct DynmatSymmetrisationDriver<'a> {
    /// The control parameters for symmetrisation.
    parameters: &'a DynmatSymmetrisationParams,

    /// The set of dynamical matrices to be symmetrised. It is left untouched.
    dynamical_matrices: &'a DynamicalMatrixSet,

    /// The result of the symmetrisation.
    #[builder(setter(skip), default = "None")]
    result: Option<DynmatSymmetrisationResult>,
}

impl<'a> DynmatSymmetrisationDriver<'a> {
    /// Returns a builder to construct a [`DynmatSymmetrisationDriver`] structure.
    pub fn builder() -> DynmatSymmetrisationDriverBuilder<'a> {
        DynmatSymmetrisationDriverBuilder::default()
    }

    /// Finds the space group of the structure of the input set.
    fn build_engine(&self) -> Result<SymmetryEngine, anyhow::Error> {
        let params = self.parameters;
        let structure = Arc::clone(self.dynamical_matrices.structure());
        let engine = match params.symmetry_source {
            SymmetrySource::Search => SymmetryEngine::new(structure, &params.symmetry)?,
            #[cfg(feature = "moyo")]
            SymmetrySource::Moyo => SymmetryEngine::from_moyo(structure, &params.symmetry)?,
            #[cfg(not(feature = "moyo"))]
            SymmetrySource::Moyo => {
                crate::errors::configuration_bail!(
                    "Symmetry operations from `moyo` require the `moyo` feature."
                )
            }
        };
        if let Some(expected) = params.expected_n_operations {
            engine.check_diminished_symmetry(expected);
        }
        Ok(engine)
    }

    /// Symmetrises a set with the selected strategy.
    fn apply_strategy(
        &self,
        set: &mut DynamicalMatrixSet,
        engine: &SymmetryEngine,
    ) -> Result<(), anyhow::Error> {
        let params = self.parameters;
        let symmetriser: Box<dyn Symmetriser + '_> = match params.strategy {
            SymmetrisationStrategy::QSpace => {
                Box::new(QSpaceSymmetriser::new(engine, &params.symmetrisation))
            }
            SymmetrisationStrategy::Supercell => Box::new(SupercellSymmetriser::new(
                &params.symmetry,
                &params.symmetrisation,
            )),
        };
        set.symmetrise(symmetriser.as_ref())
    }

    /// Logs the frequencies at the representative of every star.
    fn log_frequencies(set: &DynamicalMatrixSet, unit: &str) -> Result<(), anyhow::Error> {
        log_subtitle(&format!("Frequencies at star representatives ({unit})"));
        let crystal = set.crystal_q_points()?;
        for star in set.q_stars() {
            let k = crystal[star.representative];
            let modes = set.diagonalise(star.representative)?;
            let frequencies = modes
                .frequencies
                .iter()
                .map(|w| {
                    ry_to_display(*w, unit)
                        .map(|x| format!("{x:>10.3}"))
                        .ok_or_else(|| format_err!("Unknown frequency unit `{unit}`."))
                })
                .collect::<Result<Vec<_>, _>>()?;
            phonsym_output!(
                "q{:<4} ({:>+7.4} {:>+7.4} {:>+7.4}) ×{:<3} {}",
                star.representative,
                k[0],
                k[1],
                k[2],
                star.len(),
                frequencies.join(" ")
            );
        }
        phonsym_output!("");
        Ok(())
    }

    /// Executes the symmetrisation.
    fn symmetrise_dynamical_matrices(&mut self) -> Result<(), anyhow::Error> {
        log_title("Dynamical Matrix Symmetrisation");
        phonsym_output!("");
        let params = self.parameters;
        params.log_output_display();
        if !DISPLAY_CONVERSIONS.contains_key(params.frequency_unit.as_str()) {
            crate::errors::configuration_bail!(
                "Unknown frequency unit `{}`, expected one of: {}.",
                params.frequency_unit,
                DISPLAY_CONVERSIONS.keys().join(", ")
            );
        }

        log_macsec_begin("Space group");
        let engine = self.build_engine()?;
        engine.log_operations();
        log_macsec_end("Space group");
        phonsym_output!("");

        let mut set = self.dynamical_matrices.clone();
        set.adjust_q_star(&engine)?;

        let path_deviation = if params.check_agreement {
            match check_symmetrisation_agreement(&set, &engine, &params.symmetrisation) {
                Ok(deviation) => Some(deviation),
                Err(err) => match err.downcast_ref::<PhononError>() {
                    Some(PhononError::ToleranceExceeded { deviation, .. }) => Some(*deviation),
                    _ => return Err(err),
                },
            }
        } else {
            None
        };

        log_macsec_begin("Symmetrisation");
        self.apply_strategy(&mut set, &engine)?;
        if let Some(target) = params.interpolate_to {
            let current = set.get_supercell(params.symmetry.q_threshold)?;
            log::debug!("Interpolating from {current:?} to {target:?}.");
            set = set.interpolate(current, target, params.symmetry.q_threshold)?;
            set.adjust_q_star(&engine)?;
            self.apply_strategy(&mut set, &engine)?;
        }
        let n_negative_modes = match params.positive_definite {
            Some(treatment) => set.force_positive_definite(treatment)?,
            None => 0,
        };
        set.log_output_display();
        Self::log_frequencies(&set, &params.frequency_unit)?;
        log_macsec_end("Symmetrisation");
        phonsym_output!("");

        let upsilon = params
            .upsilon_temperature
            .map(|temperature| set.upsilon_matrix(temperature, &params.upsilon))
            .transpose()?;

        if let Some(prefix) = params.qe_save_prefix.as_ref() {
            let paths = save_qe(&set, prefix)?;
            phonsym_output!(
                "Dynamical matrices written to {} file(s) with prefix {prefix}.",
                paths.len()
            );
        }
        if let Some(name) = params.result_save_name.as_ref() {
            write_phonsym_binary(name, PhonSymFileType::Dyn, &set)?;
            phonsym_output!(
                "Symmetrised dynamical matrices saved as {name}.{}.",
                PhonSymFileType::Dyn.ext()
            );
            if let Some(upsilon) = upsilon.as_ref() {
                write_phonsym_binary(name, PhonSymFileType::Ups, upsilon)?;
                phonsym_output!(
                    "Upsilon matrix saved as {name}.{}.",
                    PhonSymFileType::Ups.ext()
                );
            }
        }

        let result = DynmatSymmetrisationResult::builder()
            .parameters(params.clone())
            .dynamical_matrices(set)
            .n_operations(engine.n_operations())
            .path_deviation(path_deviation)
            .n_negative_modes(n_negative_modes)
            .upsilon(upsilon)
            .build()
            .map_err(|err| format_err!(err))?;
        result.log_output_display();
        self.result = Some(result);
        Ok(())
    }
}

impl<'a> PhonSymDriver for DynmatSymmetrisationDriver<'a> {
    type Params = DynmatSymmetrisationParams;

    type Outcome = DynmatSymmetrisationResult;

    fn result(&self) -> Result<&Self::Outcome, anyhow::Error> {
        self.result
            .as_ref()
            .ok_or_else(|| format_err!("No dynamical-matrix symmetrisation results found."))
    }

    fn run(&mut self) -> Result<(), anyhow::Error> {
        self.symmetrise_dynamical_matrices()
    }
}

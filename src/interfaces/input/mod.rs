//! YAML input specification for the `phonsym` binary.

use std::path::PathBuf;

use anyhow::{self, Context};
use serde::{Deserialize, Serialize};

use crate::drivers::dynmat_symmetrisation::{
    DynmatSymmetrisationDriver, DynmatSymmetrisationParams, DynmatSymmetrisationResult,
};
use crate::drivers::PhonSymDriver;
use crate::interfaces::InputHandle;
use crate::io::format::{log_macsec_begin, log_macsec_end, phonsym_error, phonsym_output};
use crate::io::qe_dyn::load_qe;
use crate::io::{read_phonsym_binary, PhonSymFileType};
use crate::phonons::DynamicalMatrixSet;

#[cfg(test)]
#[path = "input_tests.rs"]
mod input_tests;

/// A structure locating a set of Quantum ESPRESSO dynamical-matrix files.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QeDynSource {
    /// The common prefix of the files. The file of the $`i`$-th irreducible star is
    /// `{prefix}{i}`, counting from one.
    pub prefix: PathBuf,

    /// The number of irreducible stars, and hence of files.
    pub nqirr: usize,
}

/// An enumerated type representing possible sources of the dynamical matrices to be symmetrised.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum DynamicalMatricesInputKind {
    /// Variant indicating that the dynamical matrices are read from Quantum ESPRESSO files.
    QuantumEspresso(QeDynSource),

    /// Variant indicating that the dynamical matrices are read from a `PhonSym`
    /// [`PhonSymFileType::Dyn`] binary file. The associated string gives the name of the file
    /// without its `.phonsym.dyn` extension.
    FromFile(String),
}

impl DynamicalMatricesInputKind {
    /// Loads the dynamical-matrix set described by this input.
    pub fn load(&self) -> Result<DynamicalMatrixSet, anyhow::Error> {
        match self {
            DynamicalMatricesInputKind::QuantumEspresso(source) => {
                phonsym_output!(
                    "Reading {} Quantum ESPRESSO dynamical-matrix file(s) with prefix {}.",
                    source.nqirr,
                    source.prefix.display()
                );
                load_qe(&source.prefix, source.nqirr).with_context(|| {
                    format!(
                        "Unable to read dynamical matrices with prefix `{}`",
                        source.prefix.display()
                    )
                })
            }
            DynamicalMatricesInputKind::FromFile(name) => {
                phonsym_output!(
                    "Reading dynamical matrices from binary file {name}.{}.",
                    PhonSymFileType::Dyn.ext()
                );
                read_phonsym_binary(name, PhonSymFileType::Dyn)
                    .with_context(|| format!("Unable to read dynamical-matrix binary `{name}`"))
            }
        }
    }
}

/// A structure containing `PhonSym` input parameters which can be serialised into and
/// deserialised from a YAML input file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Input {
    /// Specification of the source of the dynamical matrices.
    pub dynamical_matrices: DynamicalMatricesInputKind,

    /// Parameters for the symmetrisation driver.
    ///
    /// # Default
    ///
    /// If not specified, the default parameters are used.
    #[serde(default)]
    pub symmetrisation: DynmatSymmetrisationParams,
}

impl Default for Input {
    fn default() -> Self {
        Input {
            dynamical_matrices: DynamicalMatricesInputKind::QuantumEspresso(QeDynSource {
                prefix: PathBuf::from("dynmat.dyn"),
                nqirr: 1,
            }),
            symmetrisation: DynmatSymmetrisationParams::default(),
        }
    }
}

impl Input {
    /// Loads the dynamical matrices and runs the symmetrisation driver on them.
    pub fn run(&self) -> Result<DynmatSymmetrisationResult, anyhow::Error> {
        log_macsec_begin("Input dynamical matrices");
        let dynamical_matrices = self.dynamical_matrices.load()?;
        phonsym_output!(
            "{} atom(s) per cell, {} wavevector(s) in {} star(s).",
            dynamical_matrices.n_atoms(),
            dynamical_matrices.n_q(),
            dynamical_matrices.q_stars().len()
        );
        log_macsec_end("Input dynamical matrices");
        phonsym_output!("");

        let mut driver = DynmatSymmetrisationDriver::builder()
            .parameters(&self.symmetrisation)
            .dynamical_matrices(&dynamical_matrices)
            .build()?;
        driver.run()?;
        Ok(driver.result()?.clone())
    }
}

impl InputHandle for Input {
    fn handle(&self) -> Result<(), anyhow::Error> {
        self.run().map(|_| ()).map_err(|err| {
            phonsym_error!("Dynamical-matrix symmetrisation failed: {err:#}");
            err
        })
    }
}

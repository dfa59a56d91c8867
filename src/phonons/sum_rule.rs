//! Acoustic sum rules at the zone centre.

use std::fmt;

use anyhow;
use nalgebra::Matrix3;
use ndarray::Array2;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::auxiliary::linalg::{add_to_block, block, ensure_block_shape};
use crate::errors::configuration_bail;
use crate::phonons::DynamicalMatrixSet;

#[cfg(test)]
#[path = "sum_rule_tests.rs"]
mod sum_rule_tests;

/// An enumerated type for the flavours of acoustic sum rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AsrKind {
    /// Subtracts from every diagonal block the sum of its row of blocks. Cheap but does not
    /// preserve Hermiticity exactly.
    Simple,

    /// Projects out the three rigid translations on both sides,
    /// $`\mathbf{D} \to \mathbf{P}\mathbf{D}\mathbf{P}`$. Hermiticity and symmetry are preserved.
    Custom,
}

impl fmt::Display for AsrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsrKind::Simple => write!(f, "simple"),
            AsrKind::Custom => write!(f, "custom"),
        }
    }
}

/// Imposes the acoustic sum rule $`\sum_b \mathbf{D}_{ab}(\Gamma) = \mathbf{0}`$ on a
/// zone-centre dynamical matrix. Both flavours are idempotent.
///
/// # Arguments
///
/// * `matrix` - The $`3N \times 3N`$ dynamical matrix at $`\Gamma`$.
/// * `n_atoms` - The number of atoms $`N`$.
/// * `kind` - The flavour of the sum rule.
pub fn impose_sum_rule(
    matrix: &Array2<Complex<f64>>,
    n_atoms: usize,
    kind: AsrKind,
) -> Result<Array2<Complex<f64>>, anyhow::Error> {
    ensure_block_shape(matrix, n_atoms, "Zone-centre dynamical matrix")?;
    let row_sums = (0..n_atoms)
        .map(|a| (0..n_atoms).map(|b| block(matrix, a, b)).sum::<Matrix3<Complex<f64>>>())
        .collect::<Vec<_>>();
    let mut result = matrix.clone();
    match kind {
        AsrKind::Simple => {
            for (a, sum) in row_sums.iter().enumerate() {
                add_to_block(&mut result, a, a, &(-sum));
            }
        }
        AsrKind::Custom => {
            let col_sums = (0..n_atoms)
                .map(|b| (0..n_atoms).map(|a| block(matrix, a, b)).sum::<Matrix3<Complex<f64>>>())
                .collect::<Vec<_>>();
            let total = row_sums.iter().sum::<Matrix3<Complex<f64>>>();
            #[allow(clippy::cast_precision_loss)]
            let n = n_atoms as f64;
            for a in 0..n_atoms {
                for b in 0..n_atoms {
                    let correction = total / Complex::new(n * n, 0.0)
                        - (row_sums[a] + col_sums[b]) / Complex::new(n, 0.0);
                    add_to_block(&mut result, a, b, &correction);
                }
            }
        }
    }
    Ok(result)
}

impl DynamicalMatrixSet {
    /// Imposes the acoustic sum rule on the $`\Gamma`$ matrix of this set.
    ///
    /// # Arguments
    ///
    /// * `kind` - The flavour of the sum rule.
    /// * `thresh` - The tolerance on crystal coordinates used to locate $`\Gamma`$.
    ///
    /// # Errors
    ///
    /// Errors with [`crate::errors::PhononError::Configuration`] if the set does not contain
    /// $`\Gamma`$.
    pub fn apply_sum_rule(&mut self, kind: AsrKind, thresh: f64) -> Result<(), anyhow::Error> {
        let Some(igamma) = self.gamma_index(thresh)? else {
            configuration_bail!("The {kind} sum rule needs the Gamma point in the wavevector set.");
        };
        let imposed = impose_sum_rule(self.dynmat(igamma)?, self.n_atoms(), kind)?;
        log::debug!("Imposed the {kind} acoustic sum rule on wavevector {igamma}.");
        self.set_dynmat(igamma, imposed)
    }
}

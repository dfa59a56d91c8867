//! Vibrational spectra: mass-weighted diagonalisation per wavevector and in the supercell, and
//! the temperature-dependent $`\Upsilon`$ matrix.

use std::cmp::Ordering;
use std::fmt;

use anyhow::{self, format_err};
use derive_builder::Builder;
use itertools::Itertools;
use log;
use nalgebra::{DMatrix, DVector};
use ndarray::Array2;
use num_complex::Complex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::auxiliary::geometry::{bloch_phase, floatify};
use crate::auxiliary::linalg::{from_dmatrix, hermitise, scale_by_atom_weights, to_dmatrix};
use crate::auxiliary::structure::{supercell_cells, Structure};
use crate::auxiliary::units::K_B_RY;
use crate::errors::{configuration_bail, validation_bail};
use crate::io::format::phonsym_warn;
use crate::phonons::qgrid::find_q_index;
use crate::phonons::DynamicalMatrixSet;

#[cfg(test)]
#[path = "spectral_tests.rs"]
mod spectral_tests;

// ==================
// Struct definitions
// ==================

/// The normal modes at one wavevector.
#[derive(Clone, Debug)]
pub struct Modes {
    /// The signed frequencies $`\mathrm{sign}(\lambda)\sqrt{|\lambda|}`$ in Rydberg, ascending.
    pub frequencies: Vec<f64>,

    /// The orthonormal polarisation vectors of the mass-weighted matrix, one per column.
    pub polarisations: Array2<Complex<f64>>,
}

/// The real normal modes of the supercell commensurate with a wavevector grid.
#[derive(Clone, Debug)]
pub struct SupercellModes {
    /// The signed frequencies in Rydberg, ascending.
    pub frequencies: Vec<f64>,

    /// The real orthogonal polarisation matrix of the mass-weighted supercell matrix, one mode
    /// per column.
    pub polarisations: Array2<f64>,

    /// The index of the wavevector each mode originates from.
    pub q_indices: Vec<usize>,

    /// The supercell structure.
    pub structure: Structure,
}

/// An enumerated type for the treatment of negative eigenvalues when enforcing positive
/// definiteness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegativeModeTreatment {
    /// Negative eigenvalues are replaced by their absolute values.
    #[default]
    Reflect,

    /// Negative eigenvalues are set to zero.
    Zero,
}

impl fmt::Display for NegativeModeTreatment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegativeModeTreatment::Reflect => write!(f, "reflect"),
            NegativeModeTreatment::Zero => write!(f, "zero"),
        }
    }
}

/// A structure containing control parameters for the $`\Upsilon`$ matrix.
#[derive(Clone, Builder, Debug, Serialize, Deserialize)]
pub struct UpsilonParams {
    /// Modes with $`|\omega|`$ (Ry) below this threshold, the acoustic modes at $`\Gamma`$, are
    /// excluded.
    #[builder(default = "1e-6")]
    #[serde(default = "default_frequency_threshold")]
    pub frequency_threshold: f64,

    /// The tolerance on crystal coordinates of wavevectors.
    #[builder(default = "1e-6")]
    #[serde(default = "default_q_threshold")]
    pub q_threshold: f64,
}

impl UpsilonParams {
    /// Returns a builder to construct an [`UpsilonParams`] structure.
    #[must_use]
    pub fn builder() -> UpsilonParamsBuilder {
        UpsilonParamsBuilder::default()
    }
}

impl Default for UpsilonParams {
    fn default() -> Self {
        Self::builder()
            .build()
            .expect("Unable to build a default `UpsilonParams`.")
    }
}

fn default_frequency_threshold() -> f64 {
    1e-6
}

fn default_q_threshold() -> f64 {
    1e-6
}

// ==================
// Helpers
// ==================

fn signed_sqrt(lambda: f64) -> f64 {
    lambda.signum() * lambda.abs().sqrt()
}

/// Sorts eigenpairs by ascending eigenvalue.
fn sorted_eigenpairs<T: nalgebra::Scalar>(
    eigenvalues: &DVector<f64>,
    eigenvectors: &DMatrix<T>,
) -> (Vec<f64>, DMatrix<T>) {
    let order = (0..eigenvalues.len())
        .sorted_by(|&i, &j| {
            eigenvalues[i]
                .partial_cmp(&eigenvalues[j])
                .unwrap_or(Ordering::Equal)
        })
        .collect_vec();
    let values = order.iter().map(|&i| eigenvalues[i]).collect();
    let vectors = eigenvectors.select_columns(order.iter());
    (values, vectors)
}

/// Diagonalises a real symmetric matrix.
fn real_symmetric_eigen(matrix: DMatrix<f64>) -> (Vec<f64>, DMatrix<f64>) {
    let symmetric = (&matrix + matrix.transpose()) * 0.5;
    let eigen = symmetric.symmetric_eigen();
    sorted_eigenpairs(&eigen.eigenvalues, &eigen.eigenvectors)
}

/// Computes $`\mathbf{M}^{1/2}[\sum_\mu 2\omega_\mu\tanh(\omega_\mu/2k_BT)\,
/// \mathbf{e}_\mu\mathbf{e}_\mu^{\mathrm{T}}]\mathbf{M}^{1/2}`$ from real modes.
fn upsilon_from_modes(
    eigenvalues: &[f64],
    polarisations: &DMatrix<f64>,
    masses: &[f64],
    temperature: f64,
    params: &UpsilonParams,
) -> Result<Array2<f64>, anyhow::Error> {
    if temperature < 0.0 {
        validation_bail!("Negative temperature {temperature} K.");
    }
    let dim = polarisations.nrows();
    let mut sum = DMatrix::<f64>::zeros(dim, dim);
    let mut skipped = 0usize;
    for (mu, &lambda) in eigenvalues.iter().enumerate() {
        let omega = signed_sqrt(lambda);
        if omega.abs() <= params.frequency_threshold {
            skipped += 1;
            continue;
        }
        if omega < 0.0 {
            validation_bail!(
                "Mode {mu} is unstable with frequency {omega:.6e} Ry; the Upsilon matrix needs a positive-definite spectrum."
            );
        }
        let factor = if temperature > 0.0 {
            2.0 * omega * (omega / (2.0 * K_B_RY * temperature)).tanh()
        } else {
            2.0 * omega
        };
        let e = polarisations.column(mu);
        sum += (&e * e.transpose()) * factor;
    }
    log::debug!("{skipped} mode(s) below the frequency threshold excluded from Upsilon.");
    Ok(Array2::from_shape_fn((dim, dim), |(i, j)| {
        sum[(i, j)] * masses[i / 3].sqrt() * masses[j / 3].sqrt()
    }))
}

/// Computes the $`\Upsilon`$ matrix directly from a supercell force-constant matrix.
///
/// # Arguments
///
/// * `fc` - The force-constant matrix of the supercell. Only its real part is used.
/// * `supercell` - The supercell structure.
/// * `temperature` - The temperature in Kelvin.
/// * `params` - The $`\Upsilon`$ parameters.
///
/// # Errors
///
/// Errors with [`crate::errors::PhononError::Validation`] if the spectrum has an unstable mode.
pub fn upsilon_from_supercell(
    fc: &Array2<Complex<f64>>,
    supercell: &Structure,
    temperature: f64,
    params: &UpsilonParams,
) -> Result<Array2<f64>, anyhow::Error> {
    let masses = supercell.masses_array()?;
    let inv_sqrt = masses.iter().map(|m| m.sqrt().recip()).collect_vec();
    let weighted = scale_by_atom_weights(fc, &inv_sqrt);
    let (eigenvalues, vectors) =
        real_symmetric_eigen(DMatrix::from_fn(weighted.nrows(), weighted.ncols(), |i, j| {
            weighted[(i, j)].re
        }));
    upsilon_from_modes(&eigenvalues, &vectors, &masses, temperature, params)
}

// ==================
// Spectral analysis
// ==================

impl DynamicalMatrixSet {
    /// The mass-weighted matrix $`\mathbf{M}^{-1/2}\mathbf{D}\mathbf{M}^{-1/2}`$ at one
    /// wavevector, made Hermitian.
    fn mass_weighted(&self, iq: usize) -> Result<Array2<Complex<f64>>, anyhow::Error> {
        let inv_sqrt = self
            .structure()
            .masses_array()?
            .iter()
            .map(|m| m.sqrt().recip())
            .collect_vec();
        Ok(hermitise(&scale_by_atom_weights(self.dynmat(iq)?, &inv_sqrt)))
    }

    /// Diagonalises the mass-weighted dynamical matrix at one wavevector.
    ///
    /// # Arguments
    ///
    /// * `iq` - The index of the wavevector.
    ///
    /// # Returns
    ///
    /// The signed frequencies in ascending order with their orthonormal polarisation vectors.
    pub fn diagonalise(&self, iq: usize) -> Result<Modes, anyhow::Error> {
        let eigen = to_dmatrix(&self.mass_weighted(iq)?).symmetric_eigen();
        let (eigenvalues, vectors) = sorted_eigenpairs(&eigen.eigenvalues, &eigen.eigenvectors);
        Ok(Modes {
            frequencies: eigenvalues.into_iter().map(signed_sqrt).collect(),
            polarisations: from_dmatrix(&vectors),
        })
    }

    /// Diagonalises every wavevector in parallel.
    pub fn diagonalise_all(&self) -> Result<Vec<Modes>, anyhow::Error> {
        (0..self.n_q())
            .into_par_iter()
            .map(|iq| self.diagonalise(iq))
            .collect()
    }

    /// Makes every mass-weighted matrix positive semi-definite by treating its negative
    /// eigenvalues, then rebuilds the dynamical matrices.
    ///
    /// # Returns
    ///
    /// The number of negative eigenvalues treated.
    pub fn force_positive_definite(
        &mut self,
        treatment: NegativeModeTreatment,
    ) -> Result<usize, anyhow::Error> {
        let sqrt_masses = self
            .structure()
            .masses_array()?
            .iter()
            .map(|m| m.sqrt())
            .collect_vec();
        let rebuilt = (0..self.n_q())
            .into_par_iter()
            .map(|iq| {
                let eigen = to_dmatrix(&self.mass_weighted(iq)?).symmetric_eigen();
                let mut n_negative = 0usize;
                let treated = eigen.eigenvalues.map(|lambda| {
                    if lambda < 0.0 {
                        n_negative += 1;
                        match treatment {
                            NegativeModeTreatment::Reflect => -lambda,
                            NegativeModeTreatment::Zero => 0.0,
                        }
                    } else {
                        lambda
                    }
                });
                let v = &eigen.eigenvectors;
                let diag = DMatrix::from_diagonal(&treated.map(|x| Complex::new(x, 0.0)));
                let weighted = from_dmatrix(&(v * diag * v.adjoint()));
                let dynmat = hermitise(&scale_by_atom_weights(&weighted, &sqrt_masses));
                Ok::<_, anyhow::Error>((dynmat, n_negative))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let n_negative = rebuilt.iter().map(|(_, n)| n).sum::<usize>();
        self.set_dynmats(rebuilt.into_iter().map(|(d, _)| d).collect())?;
        if n_negative > 0 {
            phonsym_warn!(
                "{n_negative} negative eigenvalue(s) treated ({treatment}) to enforce positive definiteness."
            );
        }
        Ok(n_negative)
    }

    /// Diagonalises the supercell commensurate with the wavevectors of this set block by
    /// block.
    ///
    /// A wavevector with $`\mathbf{q} \equiv -\mathbf{q}`$ gives real modes from the real part
    /// of its mass-weighted matrix. A pair $`(\mathbf{q}, -\mathbf{q})`$ gives, for each
    /// eigenvector $`\mathbf{e}`$ at $`\mathbf{q}`$, the two real modes $`\sqrt{2}\,\mathrm{Re}\,
    /// \psi`$ and $`\sqrt{2}\,\mathrm{Im}\,\psi`$ of the Bloch vector
    /// $`\psi_{c} = N_c^{-1/2}\exp(-2\pi i\,\mathbf{q}\cdot\mathbf{R}_c)\,\mathbf{e}`$, the sign
    /// following that of the Fourier transform of the force constants.
    ///
    /// The set must satisfy $`\mathbf{D}(-\mathbf{q}) = \mathbf{D}^*(\mathbf{q})`$, as it does
    /// after symmetrisation with time reversal.
    ///
    /// # Errors
    ///
    /// Errors with [`crate::errors::PhononError::Configuration`] if the wavevectors are not a
    /// complete grid.
    pub fn diagonalise_supercell(&self, thresh: f64) -> Result<SupercellModes, anyhow::Error> {
        let dims = self.get_supercell(thresh)?;
        let supercell = self.structure().generate_supercell(dims)?;
        let lattice_t = self.structure().cell()?.transpose();
        let cells = supercell_cells(dims);
        let nat = self.n_atoms();
        let dim = 3 * supercell.n_atoms();
        #[allow(clippy::cast_precision_loss)]
        let norm = (cells.len() as f64).sqrt().recip();

        let mut done = vec![false; self.n_q()];
        let mut columns: Vec<(f64, usize, Vec<f64>)> = Vec::with_capacity(dim);
        for (iq, q) in self.q_tot().iter().enumerate() {
            if done[iq] {
                continue;
            }
            done[iq] = true;
            let Some(partner) = find_q_index(self.structure(), self.q_tot(), &(-q), thresh)?
            else {
                configuration_bail!("The opposite of wavevector {iq} is missing from the set.");
            };
            let bloch = cells
                .iter()
                .map(|cell| bloch_phase(q, &(lattice_t * floatify(cell))) * norm)
                .collect_vec();
            let expand = |e: &dyn Fn(usize) -> Complex<f64>| {
                (0..dim)
                    .map(|k| bloch[k / (3 * nat)] * e(k % (3 * nat)))
                    .collect_vec()
            };
            let weighted = self.mass_weighted(iq)?;
            if partner == iq {
                let real = DMatrix::from_fn(weighted.nrows(), weighted.ncols(), |i, j| {
                    weighted[(i, j)].re
                });
                let (eigenvalues, vectors) = real_symmetric_eigen(real);
                for (nu, lambda) in eigenvalues.into_iter().enumerate() {
                    let psi = expand(&|k| Complex::new(vectors[(k, nu)], 0.0));
                    columns.push((lambda, iq, psi.iter().map(|x| x.re).collect()));
                }
            } else {
                done[partner] = true;
                let eigen = to_dmatrix(&weighted).symmetric_eigen();
                for (nu, &lambda) in eigen.eigenvalues.iter().enumerate() {
                    let psi = expand(&|k| eigen.eigenvectors[(k, nu)]);
                    let sqrt2 = std::f64::consts::SQRT_2;
                    columns.push((lambda, iq, psi.iter().map(|x| sqrt2 * x.re).collect()));
                    columns.push((lambda, partner, psi.iter().map(|x| sqrt2 * x.im).collect()));
                }
            }
        }
        if columns.len() != dim {
            return Err(format_err!(
                "Expected {dim} supercell modes, obtained {}.",
                columns.len()
            ));
        }
        columns.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        let polarisations = Array2::from_shape_fn((dim, dim), |(i, mu)| columns[mu].2[i]);
        Ok(SupercellModes {
            frequencies: columns.iter().map(|c| signed_sqrt(c.0)).collect(),
            polarisations,
            q_indices: columns.iter().map(|c| c.1).collect(),
            structure: supercell,
        })
    }

    /// Computes the $`\Upsilon`$ matrix of the commensurate supercell,
    /// ```math
    /// \mathbf{\Upsilon} = \mathbf{M}^{1/2}\Big[\sum_\mu 2\omega_\mu
    ///     \tanh\Big(\frac{\omega_\mu}{2k_BT}\Big)\,\mathbf{e}_\mu\mathbf{e}_\mu^{\mathrm{T}}
    ///     \Big]\mathbf{M}^{1/2},
    /// ```
    /// the inverse of the displacement covariance matrix, in Rydberg atomic units.
    ///
    /// # Arguments
    ///
    /// * `temperature` - The temperature in Kelvin.
    /// * `params` - The $`\Upsilon`$ parameters.
    ///
    /// # Errors
    ///
    /// Errors with [`crate::errors::PhononError::Validation`] if a mode above the frequency
    /// threshold is unstable.
    pub fn upsilon_matrix(
        &self,
        temperature: f64,
        params: &UpsilonParams,
    ) -> Result<Array2<f64>, anyhow::Error> {
        let modes = self.diagonalise_supercell(params.q_threshold)?;
        let masses = modes.structure.masses_array()?;
        let eigenvalues = modes
            .frequencies
            .iter()
            .map(|w| w.signum() * w * w)
            .collect_vec();
        let (n, m) = modes.polarisations.dim();
        let vectors = DMatrix::from_fn(n, m, |i, j| modes.polarisations[(i, j)]);
        upsilon_from_modes(&eigenvalues, &vectors, &masses, temperature, params)
    }
}

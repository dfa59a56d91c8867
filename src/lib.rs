//! # PhonSym: symmetrisation and interpolation of phonon dynamical matrices
//!
//! PhonSym takes a set of dynamical matrices $`D(\mathbf{q})`$ sampled on a commensurate
//! wavevector grid of a periodic crystal, as produced by density-functional perturbation theory
//! or finite displacements, and
//! - detects the space group of the structure and the stars of wavevectors on the grid,
//! - imposes the acoustic sum rule at $`\Gamma`$,
//! - symmetrises the dynamical matrices either star by star in reciprocal space or through the
//!   real-space force constants of the commensurate supercell,
//! - Fourier-interpolates the set onto a finer commensurate grid, and
//! - computes phonon frequencies, polarisation vectors, supercell modes, and the
//!   $`\Upsilon`$ matrix used in anharmonic free-energy methods.
//!
//! Dynamical matrices can be read from and written to Quantum ESPRESSO `.dyn` files, and
//! complete results can be stored as `PhonSym` binary files.
//!
//! ## Conventions
//!
//! Lattice vectors are stored as the rows of a $`3 \times 3`$ matrix in Å. Wavevectors are
//! Cartesian in units of Å⁻¹ without the $`2\pi`$ factor, so that the crystal coordinates of
//! $`\mathbf{q}`$ are $`\mathbf{A}\mathbf{q}`$. Masses, dynamical matrices, and frequencies are
//! in Rydberg atomic units throughout; conversions for display live in
//! [`auxiliary::units`].
//!
//! ## Binary
//!
//! The `phonsym` binary reads a YAML configuration file describing the source of the dynamical
//! matrices and the parameters of the symmetrisation driver (see [`interfaces::input::Input`]),
//! runs the driver, and writes a formatted report to the `phonsym-output` logger.
//!
//! ## Features
//!
//! - `moyo`: enables obtaining the space-group operations from the
//!   [`moyo`](https://docs.rs/moyo) crate in addition to the built-in search.

pub mod auxiliary;
pub mod drivers;
pub mod errors;
pub mod interfaces;
pub mod io;
pub mod permutation;
pub mod phonons;
pub mod symmetry;

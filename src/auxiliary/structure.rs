//! Crystal structures: atoms, lattice, masses, supercells.

use std::fmt;

use anyhow::{self, ensure, format_err};
use derive_builder::Builder;
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use nalgebra::{Matrix3, Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::auxiliary::element::ElementMap;
use crate::auxiliary::geometry::{self, floatify};
use crate::errors::{validation_bail, PhononError};

#[cfg(test)]
#[path = "structure_tests.rs"]
mod structure_tests;

/// Smallest absolute determinant for a lattice to be considered non-singular.
const SINGULAR_LATTICE_THRESHOLD: f64 = 1e-10;

/// Maximum number of reduction passes when wrapping a position into the cell.
const WRAP_PASSES: usize = 4;

// =================
// Struct definition
// =================

/// A structure representing a crystal, or a finite cluster if no lattice is present.
///
/// Positions are Cartesian in Ångström. The lattice matrix, if present, holds the three lattice
/// vectors as its rows. Masses are in Rydberg mass units and keyed by species label.
#[derive(Builder, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct Structure {
    /// The species label of each atom.
    #[builder(setter(custom))]
    species: Vec<String>,

    /// The Cartesian position of each atom.
    positions: Vec<Point3<f64>>,

    /// The lattice matrix whose rows are the lattice vectors.
    #[builder(setter(strip_option), default = "None")]
    lattice: Option<Matrix3<f64>>,

    /// The mass of each species.
    #[builder(default = "IndexMap::new()")]
    masses: IndexMap<String, f64>,
}

impl StructureBuilder {
    /// Sets the species labels of the atoms.
    pub fn species<S: AsRef<str>>(&mut self, species: &[S]) -> &mut Self {
        self.species = Some(
            species
                .iter()
                .map(|s| s.as_ref().to_string())
                .collect::<Vec<_>>(),
        );
        self
    }

    fn validate(&self) -> Result<(), String> {
        let species = self
            .species
            .as_ref()
            .ok_or_else(|| "No species labels found.".to_string())?;
        let positions = self
            .positions
            .as_ref()
            .ok_or_else(|| "No positions found.".to_string())?;
        if species.len() != positions.len() {
            return Err(format!(
                "Mismatched numbers of species labels ({}) and positions ({}).",
                species.len(),
                positions.len()
            ));
        }
        if let Some(Some(lattice)) = self.lattice {
            let det = lattice.determinant();
            if det.abs() < SINGULAR_LATTICE_THRESHOLD {
                return Err(format!("The lattice matrix is singular (determinant {det:.3e})."));
            }
        }
        if let Some(masses) = self.masses.as_ref() {
            if let Some((label, mass)) = masses.iter().find(|&(_, &m)| !m.is_finite() || m <= 0.0) {
                return Err(format!("Species `{label}` has a non-positive mass {mass}."));
            }
        }
        Ok(())
    }
}

impl Structure {
    /// Returns a builder to construct a new structure.
    #[must_use]
    pub fn builder() -> StructureBuilder {
        StructureBuilder::default()
    }

    /// Constructs a structure without masses.
    ///
    /// # Arguments
    ///
    /// * `species` - The species label of each atom.
    /// * `positions` - The Cartesian position of each atom.
    /// * `lattice` - The optional lattice matrix with lattice vectors as rows.
    ///
    /// # Errors
    ///
    /// Errors with [`PhononError::Validation`] if the arrays have different lengths or if the
    /// lattice is singular.
    pub fn new<S: AsRef<str>>(
        species: &[S],
        positions: Vec<Point3<f64>>,
        lattice: Option<Matrix3<f64>>,
    ) -> Result<Self, anyhow::Error> {
        let mut builder = Self::builder();
        builder.species(species).positions(positions);
        if let Some(lattice) = lattice {
            builder.lattice(lattice);
        }
        builder
            .build()
            .map_err(|err| anyhow::Error::new(PhononError::Validation(err.to_string())))
    }

    /// Returns a copy of this structure with the given species masses replacing or extending
    /// the existing ones.
    ///
    /// # Errors
    ///
    /// Errors if a mass is not positive.
    pub fn with_masses(mut self, masses: &IndexMap<String, f64>) -> Result<Self, anyhow::Error> {
        for (label, &mass) in masses {
            if !mass.is_finite() || mass <= 0.0 {
                validation_bail!("Species `{label}` has a non-positive mass {mass}.");
            }
            self.masses.insert(label.clone(), mass);
        }
        Ok(self)
    }

    /// Returns a copy of this structure in which every species without a mass receives the
    /// natural-abundance mass of its element, converted to Rydberg mass units.
    ///
    /// # Errors
    ///
    /// Errors if a species label does not resolve to an element.
    pub fn with_default_masses(mut self) -> Result<Self, anyhow::Error> {
        let emap = ElementMap::new();
        for label in self.species_types() {
            if !self.masses.contains_key(&label) {
                let (_, mass) = emap.lookup(&label)?;
                self.masses.insert(label, mass);
            }
        }
        Ok(self)
    }

    /// The number of atoms.
    #[must_use]
    pub fn n_atoms(&self) -> usize {
        self.positions.len()
    }

    /// The species label of each atom.
    #[must_use]
    pub fn species(&self) -> &[String] {
        &self.species
    }

    /// The Cartesian position of each atom.
    #[must_use]
    pub fn positions(&self) -> &[Point3<f64>] {
        &self.positions
    }

    /// The lattice matrix, if any.
    #[must_use]
    pub fn lattice(&self) -> Option<&Matrix3<f64>> {
        self.lattice.as_ref()
    }

    /// The species masses.
    #[must_use]
    pub fn masses(&self) -> &IndexMap<String, f64> {
        &self.masses
    }

    /// The lattice matrix.
    ///
    /// # Errors
    ///
    /// Errors with [`PhononError::Validation`] if the structure has no periodic cell.
    pub fn cell(&self) -> Result<&Matrix3<f64>, anyhow::Error> {
        match self.lattice.as_ref() {
            Some(lattice) => Ok(lattice),
            None => validation_bail!("The structure has no periodic cell."),
        }
    }

    /// The distinct species labels, in order of first appearance.
    #[must_use]
    pub fn species_types(&self) -> Vec<String> {
        self.species
            .iter()
            .cloned()
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect()
    }

    /// The number of distinct species.
    #[must_use]
    pub fn ntyp(&self) -> usize {
        self.species_types().len()
    }

    /// The mass of every atom, in atom order.
    ///
    /// # Errors
    ///
    /// Errors with [`PhononError::Validation`] if some species has no mass.
    pub fn masses_array(&self) -> Result<Vec<f64>, anyhow::Error> {
        self.species
            .iter()
            .map(|label| match self.masses.get(label) {
                Some(&mass) => Ok(mass),
                None => validation_bail!("Species `{label}` has no mass."),
            })
            .collect()
    }

    /// The volume of the cell.
    pub fn volume(&self) -> Result<f64, anyhow::Error> {
        Ok(self.cell()?.determinant().abs())
    }

    /// The reciprocal lattice vectors $`\mathbf{b}_i`$ as rows, satisfying
    /// $`\mathbf{a}_i\cdot\mathbf{b}_j = \delta_{ij}`$ (no $`2\pi`$ factor).
    pub fn reciprocal_vectors(&self) -> Result<Matrix3<f64>, anyhow::Error> {
        let lattice = self.cell()?;
        let inv = lattice
            .try_inverse()
            .ok_or_else(|| format_err!("Unable to invert the lattice matrix."))?;
        Ok(inv.transpose())
    }

    /// Converts a Cartesian vector into fractional coordinates of this lattice.
    pub fn to_fractional(&self, r: &Vector3<f64>) -> Result<Vector3<f64>, anyhow::Error> {
        Ok(self.reciprocal_vectors()? * r)
    }

    /// Converts fractional coordinates of this lattice into a Cartesian vector.
    pub fn to_cartesian(&self, f: &Vector3<f64>) -> Result<Vector3<f64>, anyhow::Error> {
        Ok(self.cell()?.transpose() * f)
    }

    /// The fractional coordinates of all atoms.
    pub fn fractional_positions(&self) -> Result<Vec<Vector3<f64>>, anyhow::Error> {
        let recip = self.reciprocal_vectors()?;
        Ok(self.positions.iter().map(|r| recip * r.coords).collect())
    }

    /// The Cartesian lattice vector with integer coordinates `n`.
    pub fn lattice_vector(&self, n: &Vector3<i32>) -> Result<Vector3<f64>, anyhow::Error> {
        self.to_cartesian(&floatify(n))
    }

    /// Replicates this structure along its lattice vectors.
    ///
    /// Atoms are enumerated cell-major and basis-atom-minor: atom `a` of the cell with integer
    /// coordinates `(i, j, k)` has index `((i·n₂ + j)·n₃ + k)·N + a`.
    ///
    /// # Arguments
    ///
    /// * `dims` - The multipliers along the three lattice vectors.
    ///
    /// # Returns
    ///
    /// The supercell structure, sharing the masses of this structure.
    ///
    /// # Errors
    ///
    /// Errors with [`PhononError::Validation`] if a multiplier is zero or there is no cell.
    pub fn generate_supercell(&self, dims: [usize; 3]) -> Result<Self, anyhow::Error> {
        let lattice = self.cell()?;
        if dims.iter().any(|&n| n == 0) {
            validation_bail!("Supercell multipliers {dims:?} must all be positive.");
        }
        let cells = supercell_cells(dims);
        let mut species = Vec::with_capacity(cells.len() * self.n_atoms());
        let mut positions = Vec::with_capacity(cells.len() * self.n_atoms());
        for cell in &cells {
            let shift = lattice.transpose() * floatify(cell);
            species.extend(self.species.iter().cloned());
            positions.extend(self.positions.iter().map(|r| r + shift));
        }
        let mut super_lattice = *lattice;
        for (i, &n) in dims.iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let row = lattice.row(i) * n as f64;
            super_lattice.set_row(i, &row);
        }
        Ok(Self {
            species,
            positions,
            lattice: Some(super_lattice),
            masses: self.masses.clone(),
        })
    }

    /// Returns a copy of this structure with every fractional coordinate mapped into $`[0, 1)`$.
    ///
    /// The operation is idempotent.
    pub fn wrap_coordinates_into_cell(&self) -> Result<Self, anyhow::Error> {
        let lattice_t = self.cell()?.transpose();
        let recip = self.reciprocal_vectors()?;
        let positions = self
            .positions
            .iter()
            .map(|r| {
                // Converting back to Cartesian coordinates may land a coordinate just outside
                // the box, hence the repeated passes.
                let mut r = *r;
                for _ in 0..WRAP_PASSES {
                    let f = recip * r.coords;
                    if f.iter().all(|x| (0.0..1.0).contains(x)) {
                        break;
                    }
                    r = Point3::from(lattice_t * geometry::reduce_to_unit_cell(&f));
                }
                r
            })
            .collect();
        Ok(Self {
            positions,
            ..self.clone()
        })
    }

    /// Maps every atom of this structure onto an atom of a primitive structure.
    ///
    /// # Arguments
    ///
    /// * `primitive` - The primitive structure of which this structure is a supercell.
    /// * `thresh` - The tolerance on fractional coordinates of the primitive lattice.
    ///
    /// # Returns
    ///
    /// For each atom, the index of the primitive atom it is an image of, and the integer
    /// coordinates, in the primitive lattice, of the vector from that primitive atom to it.
    ///
    /// # Errors
    ///
    /// Errors with [`PhononError::Validation`] if an atom has no primitive counterpart.
    pub fn map_to_primitive(
        &self,
        primitive: &Structure,
        thresh: f64,
    ) -> Result<(Vec<usize>, Vec<Vector3<i32>>), anyhow::Error> {
        let recip = primitive.reciprocal_vectors()?;
        self.positions
            .iter()
            .zip(self.species.iter())
            .enumerate()
            .map(|(i, (r, label))| {
                primitive
                    .positions
                    .iter()
                    .zip(primitive.species.iter())
                    .enumerate()
                    .find_map(|(a, (ra, label_a))| {
                        let n = recip * (r - ra);
                        (label == label_a && geometry::is_integral(&n, thresh))
                            .then(|| (a, geometry::round_to_integers(&n)))
                    })
                    .ok_or_else(|| {
                        anyhow::Error::new(PhononError::Validation(format!(
                            "Atom {i} ({label}) has no counterpart in the primitive structure."
                        )))
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|pairs| pairs.into_iter().unzip())
    }

    /// The integer ratio between the lattice of this structure and that of a primitive one.
    ///
    /// # Errors
    ///
    /// Errors with [`PhononError::Validation`] if this lattice is not a diagonal integer
    /// multiple of the primitive one.
    pub fn supercell_dims_of(
        &self,
        primitive: &Structure,
        thresh: f64,
    ) -> Result<[usize; 3], anyhow::Error> {
        let ratio = self.cell()? * primitive.reciprocal_vectors()?.transpose();
        let mut dims = [0usize; 3];
        for i in 0..3 {
            for j in 0..3 {
                let target = if i == j { ratio[(i, i)].round() } else { 0.0 };
                if (ratio[(i, j)] - target).abs() > thresh {
                    validation_bail!(
                        "The lattice is not a diagonal supercell of the primitive lattice."
                    );
                }
            }
            ensure!(
                ratio[(i, i)].round() >= 1.0,
                "Invalid supercell multiplier along lattice vector {i}."
            );
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                dims[i] = ratio[(i, i)].round() as usize;
            }
        }
        Ok(dims)
    }
}

/// Enumerates the integer coordinates of the cells in a supercell, cell-major with the last
/// index fastest.
#[must_use]
pub fn supercell_cells(dims: [usize; 3]) -> Vec<Vector3<i32>> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    (0..dims[0])
        .cartesian_product(0..dims[1])
        .cartesian_product(0..dims[2])
        .map(|((i, j), k)| Vector3::new(i as i32, j as i32, k as i32))
        .collect()
}

// =====================
// Trait implementations
// =====================

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Structure with {} atom(s)", self.n_atoms())?;
        if let Some(lattice) = self.lattice.as_ref() {
            writeln!(f, "Lattice vectors (Å):")?;
            for row in lattice.row_iter() {
                writeln!(f, "  {:>+14.8} {:>+14.8} {:>+14.8}", row[0], row[1], row[2])?;
            }
        } else {
            writeln!(f, "No periodic cell")?;
        }
        writeln!(f, "Atoms (Cartesian, Å):")?;
        for (i, (label, r)) in self.species.iter().zip(self.positions.iter()).enumerate() {
            writeln!(
                f,
                "  {i:>4} {label:<4} {:>+14.8} {:>+14.8} {:>+14.8}",
                r[0], r[1], r[2]
            )?;
        }
        if !self.masses.is_empty() {
            writeln!(
                f,
                "Masses (Ry units): {}",
                self.masses
                    .iter()
                    .map(|(label, mass)| format!("{label}: {mass:.4}"))
                    .join(", ")
            )?;
        }
        Ok(())
    }
}

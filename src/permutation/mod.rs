//! Permutations of atom indices induced by symmetry operations.

use std::fmt;
use std::ops::Mul;

use anyhow;
use derive_builder::Builder;
use indexmap::IndexSet;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::errors::PhononError;

#[cfg(test)]
#[path = "permutation_tests.rs"]
mod permutation_tests;

/// A structure to manage permutation actions on the atoms of a structure.
#[derive(Builder, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct Permutation {
    /// The rank of the permutation, *i.e.* the number of atoms on which the permutation acts.
    rank: usize,

    /// If the permutation is to act on an ordered sequence of $`n`$ integers,
    /// $`0, 1, \ldots, n - 1`$ where $`n`$ is [`Self::rank`], then this gives the result of the
    /// action: atom `i` is sent to atom `image[i]`.
    #[builder(setter(custom))]
    image: Vec<usize>,
}

impl PermutationBuilder {
    fn image(&mut self, perm: &[usize]) -> &mut Self {
        self.image = Some(perm.to_vec());
        self
    }

    fn validate(&self) -> Result<(), String> {
        let rank = self
            .rank
            .ok_or_else(|| "The rank for this permutation has not been set.".to_string())?;
        let image = self
            .image
            .as_ref()
            .ok_or_else(|| "The image for this permutation has not been set.".to_string())?;
        if image.len() != rank {
            return Err(format!(
                "The permutation image `{image:?}` does not contain {rank} elements."
            ));
        }
        if image.iter().any(|&i| i >= rank) || image.iter().collect::<IndexSet<_>>().len() != rank
        {
            return Err(format!("The permutation image `{image:?}` is not a bijection."));
        }
        Ok(())
    }
}

impl Permutation {
    /// Returns a builder to construct a new permutation.
    #[must_use]
    fn builder() -> PermutationBuilder {
        PermutationBuilder::default()
    }

    /// Constructs a permutation from its image.
    ///
    /// # Errors
    ///
    /// Errors with [`PhononError::Validation`] if the image is not a bijection of
    /// $`\{0, \ldots, n - 1\}`$.
    pub fn from_image(image: &[usize]) -> Result<Self, anyhow::Error> {
        Self::builder()
            .rank(image.len())
            .image(image)
            .build()
            .map_err(|err| anyhow::Error::new(PhononError::Validation(err.to_string())))
    }

    /// Constructs the identity permutation of a given rank.
    #[must_use]
    pub fn identity(rank: usize) -> Self {
        Self {
            rank,
            image: (0..rank).collect(),
        }
    }

    /// The number of elements acted on.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// The image of a single element.
    #[must_use]
    pub fn apply(&self, i: usize) -> usize {
        self.image[i]
    }

    /// Obtains the cycle representation of the permutation, longest cycles first.
    #[must_use]
    pub fn cycles(&self) -> Vec<Vec<usize>> {
        let mut remaining_indices = (0..self.rank).rev().collect::<IndexSet<usize>>();
        let mut cycles: Vec<Vec<usize>> = Vec::with_capacity(self.rank);
        while let Some(start) = remaining_indices.pop() {
            let mut cycle: Vec<usize> = vec![start];
            let mut idx = start;
            while self.image[idx] != start {
                idx = self.image[idx];
                remaining_indices.shift_remove(&idx);
                cycle.push(idx);
            }
            cycles.push(cycle);
        }
        cycles.sort_by_key(|cycle| (!cycle.len(), cycle.clone()));
        cycles
    }
}

// =====================
// Trait implementations
// =====================

impl fmt::Display for Permutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cycles = self.cycles();
        if cycles.iter().all(|cycle| cycle.len() == 1) {
            return write!(f, "()");
        }
        write!(
            f,
            "{}",
            cycles
                .iter()
                .filter(|cycle| cycle.len() > 1)
                .map(|cycle| format!("({})", cycle.iter().join(" ")))
                .join("")
        )
    }
}

// ---
// Mul
// ---
impl Mul<&'_ Permutation> for &Permutation {
    type Output = Permutation;

    /// Composes two permutations, applying `rhs` first.
    fn mul(self, rhs: &Permutation) -> Self::Output {
        assert_eq!(
            self.rank, rhs.rank,
            "The ranks of two multiplying permutations do not match."
        );
        Permutation {
            rank: self.rank,
            image: rhs.image.iter().map(|&ri| self.image[ri]).collect(),
        }
    }
}

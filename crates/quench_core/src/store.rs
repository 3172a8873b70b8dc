//! The solution store: raw per-gridpoint, per-branch steady-state solutions
//! together with the swept/fixed parameter values and classification bitmaps
//! produced by the external homotopy solver and classifier.
//!
//! The store is immutable once constructed. Branch count is constant across
//! the whole sweep; branches that "disappear" become unphysical or complex
//! at those grid points rather than being removed.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use nalgebra::DVector;
use num_complex::Complex64;

use crate::error::AnalysisError;

/// Classification bitmaps keyed by class name: per flat grid index, one
/// boolean per branch.
pub type ClassBitmaps = BTreeMap<String, Vec<Vec<bool>>>;

#[derive(Debug)]
pub struct SolutionStore {
    /// Grid shape, one extent per swept dimension. Flat indices are
    /// row-major over this shape.
    shape: Vec<usize>,
    /// Per flat grid index, per branch: one complex value per harmonic
    /// variable, in the ordering of `variables`.
    solutions: Vec<Vec<DVector<Complex64>>>,
    variables: Vec<String>,
    /// Swept parameter axes, in evaluation order.
    swept: Vec<(String, Vec<f64>)>,
    /// Fixed parameters, constant across the sweep.
    fixed: Vec<(String, f64)>,
    classes: ClassBitmaps,
    branch_count: usize,
}

impl SolutionStore {
    pub fn new(
        solutions: Vec<Vec<DVector<Complex64>>>,
        variables: Vec<String>,
        swept: Vec<(String, Vec<f64>)>,
        fixed: Vec<(String, f64)>,
        classes: ClassBitmaps,
    ) -> Result<Self> {
        if variables.is_empty() {
            bail!("Solution store requires at least one harmonic variable.");
        }
        if swept.is_empty() {
            bail!("Solution store requires at least one swept parameter axis.");
        }
        let mut grid_len = 1usize;
        for (name, values) in &swept {
            if values.is_empty() {
                bail!("Swept parameter \"{}\" has an empty axis.", name);
            }
            grid_len *= values.len();
        }
        if solutions.len() != grid_len {
            bail!(
                "Solution grid length mismatch. Expected {} grid points, got {}.",
                grid_len,
                solutions.len()
            );
        }

        let branch_count = solutions[0].len();
        if branch_count == 0 {
            bail!("Solution store requires at least one branch.");
        }
        for (flat, branches) in solutions.iter().enumerate() {
            if branches.len() != branch_count {
                bail!(
                    "Branch count mismatch at grid index {}. Expected {}, got {}.",
                    flat,
                    branch_count,
                    branches.len()
                );
            }
            for (branch, values) in branches.iter().enumerate() {
                if values.len() != variables.len() {
                    bail!(
                        "Variable count mismatch at grid index {}, branch {}. Expected {}, got {}.",
                        flat,
                        branch,
                        variables.len(),
                        values.len()
                    );
                }
            }
        }

        for (name, bitmap) in &classes {
            if bitmap.len() != grid_len {
                bail!(
                    "Class \"{}\" bitmap length mismatch. Expected {} grid points, got {}.",
                    name,
                    grid_len,
                    bitmap.len()
                );
            }
            for (flat, flags) in bitmap.iter().enumerate() {
                if flags.len() != branch_count {
                    bail!(
                        "Class \"{}\" branch count mismatch at grid index {}. Expected {}, got {}.",
                        name,
                        flat,
                        branch_count,
                        flags.len()
                    );
                }
            }
        }

        let shape = swept.iter().map(|(_, values)| values.len()).collect();
        Ok(Self {
            shape,
            solutions,
            variables,
            swept,
            fixed,
            classes,
            branch_count,
        })
    }

    /// Number of swept dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of grid points.
    pub fn grid_len(&self) -> usize {
        self.solutions.len()
    }

    pub fn branch_count(&self) -> usize {
        self.branch_count
    }

    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn fixed(&self) -> &[(String, f64)] {
        &self.fixed
    }

    /// The swept values along one axis. Panics if `dim` >= the rank.
    pub fn axis(&self, dim: usize) -> &[f64] {
        &self.swept[dim].1
    }

    /// The raw solution vector at a grid point and branch. Panics if either
    /// index is out of range; the engine entry points validate indices
    /// before reaching these accessors.
    pub fn solution(&self, flat: usize, branch: usize) -> &DVector<Complex64> {
        &self.solutions[flat][branch]
    }

    /// Unravels a flat grid index into one index per swept dimension.
    pub fn unravel(&self, flat: usize) -> Vec<usize> {
        let mut indices = vec![0usize; self.shape.len()];
        let mut rem = flat;
        for dim in (0..self.shape.len()).rev() {
            indices[dim] = rem % self.shape[dim];
            rem /= self.shape[dim];
        }
        indices
    }

    /// The swept parameter values at a grid point, one per axis, in axis
    /// order.
    pub fn swept_values(&self, flat: usize) -> Vec<f64> {
        self.unravel(flat)
            .iter()
            .zip(&self.swept)
            .map(|(&idx, (_, values))| values[idx])
            .collect()
    }

    pub fn class(&self, name: &str) -> Result<&Vec<Vec<bool>>> {
        self.classes
            .get(name)
            .ok_or_else(|| AnalysisError::UndefinedClass(name.to_string()).into())
    }

    pub fn class_flag(&self, name: &str, flat: usize, branch: usize) -> Result<bool> {
        Ok(self.class(name)?[flat][branch])
    }

    /// The concatenated evaluation input at a grid point and branch:
    /// variable values followed by the swept parameter values (promoted to
    /// real complex numbers). This ordering is shared with every compiled
    /// callable consumed by the transform and response engines.
    pub fn state_vector(&self, flat: usize, branch: usize) -> Vec<Complex64> {
        let solution = &self.solutions[flat][branch];
        let mut state = Vec::with_capacity(solution.len() + self.swept.len());
        state.extend(solution.iter().copied());
        state.extend(
            self.swept_values(flat)
                .into_iter()
                .map(|v| Complex64::new(v, 0.0)),
        );
        state
    }

    /// As `state_vector`, with the elementwise real part of the variables.
    pub fn real_state_vector(&self, flat: usize, branch: usize) -> Vec<f64> {
        let solution = &self.solutions[flat][branch];
        let mut state = Vec::with_capacity(solution.len() + self.swept.len());
        state.extend(solution.iter().map(|z| z.re));
        state.extend(self.swept_values(flat));
        state
    }

    /// Elementwise real part of a raw solution vector.
    pub fn real_solution(&self, flat: usize, branch: usize) -> DVector<f64> {
        self.solutions[flat][branch].map(|z| z.re)
    }
}

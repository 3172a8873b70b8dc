//! Quench/relax: re-anchoring the followed branch after a bifurcation.
//!
//! The last known solution is generally complex and no longer physical.
//! Its real part, nudged by a small random perturbation to break symmetry
//! degeneracies, is relaxed forward in time; the terminal state is matched
//! against the physical, stable branches at the next grid point by minimum
//! squared distance.

use anyhow::{bail, Result};
use nalgebra::DVector;
use num_complex::Complex64;
use rand::Rng;
use tracing::debug;

use crate::classify::{CLASS_PHYSICAL, CLASS_STABLE};
use crate::error::AnalysisError;
use crate::integrate::{EquationsOfMotion, Integrator};
use crate::store::SolutionStore;

/// Relaxes a perturbed copy of `last_solution` over [0, tf] and returns the
/// branch at `target` whose raw solution is nearest the terminal state.
///
/// Branches not classified physical and stable at `target` are assigned
/// infinite distance, as are non-finite distances, so a valid branch is
/// chosen whenever at least one eligible branch exists. Zero eligible
/// branches is a hard [`AnalysisError::NoEligibleBranch`] failure.
pub fn quench<I, R>(
    store: &SolutionStore,
    last_solution: &DVector<Complex64>,
    target: usize,
    eom: &dyn EquationsOfMotion,
    integrator: &I,
    tf: f64,
    epsilon: f64,
    rng: &mut R,
) -> Result<usize>
where
    I: Integrator + ?Sized,
    R: Rng + ?Sized,
{
    if target >= store.grid_len() {
        bail!(
            "Target grid index {} is out of range; the store has {} grid points.",
            target,
            store.grid_len()
        );
    }
    if last_solution.len() != store.variable_count() {
        bail!(
            "Solution dimension mismatch. Expected {}, got {}.",
            store.variable_count(),
            last_solution.len()
        );
    }
    if epsilon < 0.0 {
        bail!("Perturbation magnitude must be non-negative.");
    }
    if eom.dimension() != store.variable_count() {
        bail!(
            "Equations of motion dimension mismatch. Expected {}, got {}.",
            store.variable_count(),
            eom.dimension()
        );
    }

    let mut state: Vec<f64> = last_solution
        .iter()
        .map(|z| z.re + rng.gen_range(-epsilon..=epsilon))
        .collect();
    integrator.relax(eom, &mut state, tf)?;

    let physical = store.class(CLASS_PHYSICAL)?;
    let stable = store.class(CLASS_STABLE)?;

    let mut best_branch = None;
    let mut best_distance = f64::INFINITY;
    for branch in 0..store.branch_count() {
        if !(physical[target][branch] && stable[target][branch]) {
            continue;
        }
        let candidate = store.solution(target, branch);
        let distance: f64 = candidate
            .iter()
            .zip(&state)
            .map(|(z, &x)| (z - Complex64::new(x, 0.0)).norm_sqr())
            .sum();
        if !distance.is_finite() {
            continue;
        }
        if distance < best_distance {
            best_distance = distance;
            best_branch = Some(branch);
        }
    }

    match best_branch {
        Some(branch) => {
            debug!(branch, distance = best_distance, "quench re-anchored the followed branch");
            Ok(branch)
        }
        None => Err(AnalysisError::NoEligibleBranch { index: target }.into()),
    }
}

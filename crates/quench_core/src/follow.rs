//! Branch following along a one-dimensional parameter sweep.
//!
//! The follower walks the sweep holding a single branch number. While the
//! tracking signal of the held branch stays classified physical and stable,
//! the branch persists; the first excluded step is a bifurcation, and the
//! held branch is re-anchored by the quench/relax procedure.
//!
//! Only 1D sweeps are supported. Quench makes each step depend on the
//! previous one, so the walk is strictly sequential.

use std::str::FromStr;

use anyhow::{bail, Result};
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::classify::{
    apply_mask, build_mask, ClassSelector, Filtered, CLASS_PHYSICAL, CLASS_STABLE,
};
use crate::error::AnalysisError;
use crate::integrate::{EquationsOfMotion, Integrator};
use crate::quench::quench;
use crate::store::SolutionStore;
use crate::transform::{transform, TransformGrid, TransformValue};

/// Sweep traversal order. `Left` processes grid points in reverse index
/// order; results are reordered back before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepDirection {
    Right,
    Left,
}

impl FromStr for SweepDirection {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "right" => Ok(SweepDirection::Right),
            "left" => Ok(SweepDirection::Left),
            other => Err(AnalysisError::InvalidInput(format!(
                "sweep direction must be \"left\" or \"right\", got \"{other}\""
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FollowSettings {
    pub direction: SweepDirection,
    /// Total quench integration time. Must be long enough for transients to
    /// decay; this is a caller judgement, not inferred.
    pub quench_time: f64,
    /// Magnitude of the per-variable symmetry-breaking perturbation.
    pub perturbation: f64,
    /// Seed for the quench random source.
    pub seed: u64,
}

impl Default for FollowSettings {
    fn default() -> Self {
        Self {
            direction: SweepDirection::Right,
            quench_time: 200.0,
            perturbation: 1e-4,
            seed: 0,
        }
    }
}

/// The followed branch number and masked tracking signal, one entry per
/// sweep step, in original sweep order.
#[derive(Debug, Clone, Serialize)]
pub struct FollowedBranch {
    pub trace: Vec<usize>,
    pub signal: Vec<Filtered<f64>>,
}

/// Follows `start_branch` along a 1D sweep, tracking the dependent
/// expression `tracker` (a transform callable, realified) filtered through
/// the physical-and-stable mask, and re-anchoring via quench/relax wherever
/// the held branch vanishes from that set.
pub fn follow_branch<F, I>(
    store: &SolutionStore,
    start_branch: usize,
    tracker: &F,
    eom: &dyn EquationsOfMotion,
    integrator: &I,
    settings: FollowSettings,
) -> Result<FollowedBranch>
where
    F: Fn(&[Complex64]) -> TransformValue + Sync,
    I: Integrator,
{
    if store.rank() != 1 {
        return Err(AnalysisError::InvalidInput(format!(
            "branch following requires a 1D sweep, got rank {}",
            store.rank()
        ))
        .into());
    }
    if start_branch >= store.branch_count() {
        bail!(
            "Starting branch {} is out of range; the store has {} branches.",
            start_branch,
            store.branch_count()
        );
    }
    if settings.quench_time <= 0.0 {
        bail!("Quench integration time must be positive.");
    }
    if settings.perturbation < 0.0 {
        bail!("Perturbation magnitude must be non-negative.");
    }

    let branches: Vec<usize> = (0..store.branch_count()).collect();
    let grid = transform(store, tracker, &branches, true)?;
    let numeric = match &grid {
        TransformGrid::Numeric(rows) => rows,
        TransformGrid::Boolean(_) => {
            return Err(AnalysisError::InvalidInput(
                "the tracking expression must evaluate to a number, not a boolean".to_string(),
            )
            .into())
        }
    };
    let signal_rows: Vec<Vec<f64>> = numeric
        .iter()
        .map(|row| row.iter().map(|z| z.re).collect())
        .collect();
    let mask = build_mask(
        store,
        &ClassSelector::named([CLASS_PHYSICAL, CLASS_STABLE]),
        &[],
        &branches,
    )?;
    let masked = apply_mask(&signal_rows, &mask)?;

    let n = store.grid_len();
    let order: Vec<usize> = match settings.direction {
        SweepDirection::Right => (0..n).collect(),
        SweepDirection::Left => (0..n).rev().collect(),
    };

    let mut rng = StdRng::seed_from_u64(settings.seed);
    let mut trace = Vec::with_capacity(n);
    let mut signal = Vec::with_capacity(n);
    let mut current = start_branch;
    trace.push(current);
    signal.push(masked[order[0]][current]);

    for step in 1..n {
        let flat = order[step];
        if masked[flat][current].is_excluded() {
            info!(
                step,
                grid_index = flat,
                branch = current,
                "bifurcation detected, re-anchoring via quench"
            );
            let last = store.solution(order[step - 1], current);
            current = quench(
                store,
                last,
                flat,
                eom,
                integrator,
                settings.quench_time,
                settings.perturbation,
                &mut rng,
            )?;
        }
        trace.push(current);
        signal.push(masked[flat][current]);
    }

    if settings.direction == SweepDirection::Left {
        trace.reverse();
        signal.reverse();
    }

    Ok(FollowedBranch { trace, signal })
}

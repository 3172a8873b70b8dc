//! Evaluation of arbitrary pure functions of (variables, swept parameters)
//! over the whole grid and branch subset.
//!
//! The grid is statically partitioned into non-overlapping chunks, one per
//! worker; each worker writes only its own chunk's output slots, so the
//! result is bit-identical for any worker count. Callables must be pure and
//! safe to invoke concurrently (`Sync`, no shared mutable closure state).

use anyhow::{bail, Result};
use num_complex::Complex64;
use rayon::prelude::*;

use crate::store::SolutionStore;

/// The value a transform callable may return per (grid point, branch) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransformValue {
    Number(Complex64),
    Flag(bool),
}

/// Per-branch results over the grid. A trial evaluation of the callable at
/// the first pair decides the variant; mixing numbers and flags is an error.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformGrid {
    Numeric(Vec<Vec<Complex64>>),
    Boolean(Vec<Vec<bool>>),
}

impl TransformGrid {
    pub fn grid_len(&self) -> usize {
        match self {
            TransformGrid::Numeric(rows) => rows.len(),
            TransformGrid::Boolean(rows) => rows.len(),
        }
    }

    pub fn as_numeric(&self) -> Option<&Vec<Vec<Complex64>>> {
        match self {
            TransformGrid::Numeric(rows) => Some(rows),
            TransformGrid::Boolean(_) => None,
        }
    }

    pub fn as_boolean(&self) -> Option<&Vec<Vec<bool>>> {
        match self {
            TransformGrid::Boolean(rows) => Some(rows),
            TransformGrid::Numeric(_) => None,
        }
    }
}

fn evaluation_input(
    store: &SolutionStore,
    flat: usize,
    branch: usize,
    realify: bool,
) -> Vec<Complex64> {
    let mut input = store.state_vector(flat, branch);
    if realify {
        for value in &mut input {
            *value = Complex64::new(value.re, 0.0);
        }
    }
    input
}

/// Evaluates `f` once per (grid point, branch) pair over the selected
/// branches. The input vector is the variable values followed by the swept
/// parameter values at that grid point; with `realify` the elementwise real
/// part is taken first.
pub fn transform<F>(
    store: &SolutionStore,
    f: &F,
    branches: &[usize],
    realify: bool,
) -> Result<TransformGrid>
where
    F: Fn(&[Complex64]) -> TransformValue + Sync,
{
    if branches.is_empty() {
        bail!("Transform requires at least one branch.");
    }
    for &branch in branches {
        if branch >= store.branch_count() {
            bail!(
                "Branch {} is out of range; the store has {} branches.",
                branch,
                store.branch_count()
            );
        }
    }

    let grid_len = store.grid_len();
    let chunk_len = grid_len
        .div_ceil(rayon::current_num_threads().max(1))
        .max(1);

    // A trial evaluation at the first pair fixes the result type.
    let trial = f(&evaluation_input(store, 0, branches[0], realify));

    match trial {
        TransformValue::Number(_) => {
            let mut rows = vec![vec![Complex64::new(0.0, 0.0); branches.len()]; grid_len];
            rows.par_chunks_mut(chunk_len)
                .enumerate()
                .try_for_each(|(chunk, slab)| -> Result<()> {
                    let base = chunk * chunk_len;
                    for (offset, row) in slab.iter_mut().enumerate() {
                        let flat = base + offset;
                        for (slot, &branch) in branches.iter().enumerate() {
                            match f(&evaluation_input(store, flat, branch, realify)) {
                                TransformValue::Number(value) => row[slot] = value,
                                TransformValue::Flag(_) => bail!(
                                    "Transform returned a boolean at grid index {}, branch {}, \
                                     but the trial evaluation was numeric.",
                                    flat,
                                    branch
                                ),
                            }
                        }
                    }
                    Ok(())
                })?;
            Ok(TransformGrid::Numeric(rows))
        }
        TransformValue::Flag(_) => {
            let mut rows = vec![vec![false; branches.len()]; grid_len];
            rows.par_chunks_mut(chunk_len)
                .enumerate()
                .try_for_each(|(chunk, slab)| -> Result<()> {
                    let base = chunk * chunk_len;
                    for (offset, row) in slab.iter_mut().enumerate() {
                        let flat = base + offset;
                        for (slot, &branch) in branches.iter().enumerate() {
                            match f(&evaluation_input(store, flat, branch, realify)) {
                                TransformValue::Flag(value) => row[slot] = value,
                                TransformValue::Number(_) => bail!(
                                    "Transform returned a number at grid index {}, branch {}, \
                                     but the trial evaluation was boolean.",
                                    flat,
                                    branch
                                ),
                            }
                        }
                    }
                    Ok(())
                })?;
            Ok(TransformGrid::Boolean(rows))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ClassBitmaps;
    use nalgebra::DVector;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn sweep_store(points: usize, branches: usize) -> SolutionStore {
        let solutions: Vec<Vec<DVector<Complex64>>> = (0..points)
            .map(|flat| {
                (0..branches)
                    .map(|branch| {
                        DVector::from_vec(vec![
                            Complex64::new(flat as f64, branch as f64),
                            Complex64::new(branch as f64 + 1.0, -(flat as f64)),
                        ])
                    })
                    .collect()
            })
            .collect();
        SolutionStore::new(
            solutions,
            vec!["u1".to_string(), "v1".to_string()],
            vec![(
                "omega".to_string(),
                (0..points).map(|i| 1.0 + i as f64 * 0.1).collect(),
            )],
            Vec::new(),
            ClassBitmaps::new(),
        )
        .expect("store should build")
    }

    #[test]
    fn numeric_transform_matches_direct_evaluation() {
        let store = sweep_store(7, 3);
        let f = |input: &[Complex64]| TransformValue::Number(input[0] + input[1] * input[2]);
        let grid = transform(&store, &f, &[0, 1, 2], false).expect("transform should run");
        let rows = grid.as_numeric().expect("numeric result");
        for flat in 0..store.grid_len() {
            for branch in 0..3 {
                let input = store.state_vector(flat, branch);
                let expected = input[0] + input[1] * input[2];
                assert_eq!(rows[flat][branch], expected);
            }
        }
    }

    #[test]
    fn results_are_identical_for_any_worker_count() {
        let store = sweep_store(33, 2);
        let f = |input: &[Complex64]| {
            TransformValue::Number(input.iter().map(|z| z * z).sum::<Complex64>())
        };
        let parallel = transform(&store, &f, &[0, 1], false).expect("transform should run");
        let single = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .build()
            .expect("pool should build")
            .install(|| transform(&store, &f, &[0, 1], false))
            .expect("transform should run");
        assert_eq!(parallel, single);
    }

    #[test]
    fn realify_drops_imaginary_parts() {
        let store = sweep_store(3, 2);
        let f = |input: &[Complex64]| TransformValue::Number(input[1]);
        let grid = transform(&store, &f, &[0, 1], true).expect("transform should run");
        let rows = grid.as_numeric().expect("numeric result");
        for flat in 0..store.grid_len() {
            for branch in 0..2 {
                assert_eq!(rows[flat][branch].im, 0.0);
                assert_eq!(rows[flat][branch].re, branch as f64 + 1.0);
            }
        }
    }

    #[test]
    fn boolean_transform_yields_boolean_grid() {
        let store = sweep_store(4, 2);
        let f = |input: &[Complex64]| TransformValue::Flag(input[0].re > 1.5);
        let grid = transform(&store, &f, &[0, 1], false).expect("transform should run");
        let rows = grid.as_boolean().expect("boolean result");
        for flat in 0..store.grid_len() {
            for branch in 0..2 {
                assert_eq!(rows[flat][branch], flat as f64 > 1.5);
            }
        }
    }

    #[test]
    fn mixed_return_types_are_rejected() {
        let store = sweep_store(5, 1);
        let f = |input: &[Complex64]| {
            if input[0].re < 0.5 {
                TransformValue::Number(input[0])
            } else {
                TransformValue::Flag(true)
            }
        };
        assert_err_contains(
            transform(&store, &f, &[0], false),
            "trial evaluation was numeric",
        );
    }

    #[test]
    fn out_of_range_branch_is_rejected() {
        let store = sweep_store(2, 1);
        let f = |_: &[Complex64]| TransformValue::Flag(true);
        assert_err_contains(transform(&store, &f, &[3], false), "out of range");
    }
}

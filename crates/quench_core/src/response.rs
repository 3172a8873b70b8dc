//! Linear response around steady-state solutions.
//!
//! Two evaluation paths: a direct rotating-frame susceptibility built from
//! the eigenvalues of the system Jacobian, and explicit evaluation of a
//! precompiled response matrix inverted at a shifted frequency. Eigenvalue
//! and eigenvector extraction along a branch is exposed separately.
//!
//! The Jacobian function is an opaque external collaborator: a pure map
//! from [real variable values..., swept-parameter values...] to the square
//! real Jacobian of the rotating-frame equations of motion.

use anyhow::{anyhow, bail, Result};
use nalgebra::linalg::SVD;
use nalgebra::{Complex, DMatrix, DVector};
use num_complex::Complex64;
use serde::Serialize;

use crate::classify::{build_mask, ClassSelector, CLASS_STABLE};
use crate::error::AnalysisError;
use crate::store::SolutionStore;

/// An eigenvalue of the Jacobian with its normalized eigenvector.
#[derive(Debug, Clone, Serialize)]
pub struct EigenPair {
    pub value: Complex64,
    pub vector: Vec<Complex64>,
}

fn branch_state(store: &SolutionStore, flat: usize, branch: usize) -> Vec<f64> {
    store.real_state_vector(flat, branch)
}

fn check_jacobian_shape(matrix: &DMatrix<f64>, flat: usize) -> Result<()> {
    if matrix.nrows() != matrix.ncols() || matrix.nrows() == 0 {
        bail!(
            "Jacobian at grid index {} is not a square matrix ({}x{}).",
            flat,
            matrix.nrows(),
            matrix.ncols()
        );
    }
    Ok(())
}

/// Direct Jacobian susceptibility spectrum along a 1D sweep.
///
/// For every grid point where `branch` is classified stable, the Jacobian
/// eigenvalues λ contribute `1 / sqrt((Im λ² − Ω²)² + Ω²·d²·Re λ²)` per
/// requested frequency Ω, with `d = damping_mod`. Exact resonances of an
/// undamped system produce an explicit infinity. Grid points where the
/// branch is not stable yield an all-zero row.
pub fn jacobian_spectrum<J>(
    store: &SolutionStore,
    jacobian: &J,
    branch: usize,
    frequencies: &[f64],
    damping_mod: f64,
) -> Result<Vec<Vec<f64>>>
where
    J: Fn(&[f64]) -> DMatrix<f64>,
{
    if store.rank() != 1 {
        return Err(AnalysisError::InvalidInput(format!(
            "response spectra require a 1D sweep, got rank {}",
            store.rank()
        ))
        .into());
    }
    if branch >= store.branch_count() {
        bail!(
            "Branch {} is out of range; the store has {} branches.",
            branch,
            store.branch_count()
        );
    }

    let stable = store.class(CLASS_STABLE)?;
    if !(0..store.grid_len()).any(|flat| stable[flat][branch]) {
        return Err(AnalysisError::DegenerateState(format!(
            "no stable solutions on branch {branch}"
        ))
        .into());
    }

    let mut rows = Vec::with_capacity(store.grid_len());
    for flat in 0..store.grid_len() {
        if !stable[flat][branch] {
            rows.push(vec![0.0; frequencies.len()]);
            continue;
        }
        let matrix = jacobian(&branch_state(store, flat, branch));
        check_jacobian_shape(&matrix, flat)?;
        let eigenvalues = matrix.complex_eigenvalues();
        let row = frequencies
            .iter()
            .map(|&omega| {
                eigenvalues
                    .iter()
                    .map(|lambda| {
                        let detuning = lambda.im * lambda.im - omega * omega;
                        let damping = omega * damping_mod * lambda.re;
                        1.0 / (detuning * detuning + damping * damping).sqrt()
                    })
                    .sum()
            })
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// Eigenvalues and eigenvectors of the Jacobian along a 1D branch, at the
/// grid points admitted by the class mask (`None` elsewhere).
///
/// Any NaN Jacobian entry along the branch is a hard failure: it signals a
/// non-physical parameter region rather than a recoverable condition.
pub fn eigen_along_branch<J>(
    store: &SolutionStore,
    jacobian: &J,
    branch: usize,
    classes: &ClassSelector,
    not_classes: &[String],
) -> Result<Vec<Option<Vec<EigenPair>>>>
where
    J: Fn(&[f64]) -> DMatrix<f64>,
{
    if store.rank() != 1 {
        return Err(AnalysisError::InvalidInput(format!(
            "eigen extraction along a branch requires a 1D sweep, got rank {}",
            store.rank()
        ))
        .into());
    }
    let mask = build_mask(store, classes, not_classes, &[branch])?;

    let mut out = Vec::with_capacity(store.grid_len());
    for flat in 0..store.grid_len() {
        if !mask.flag(flat, 0) {
            out.push(None);
            continue;
        }
        let matrix = jacobian(&branch_state(store, flat, branch));
        check_jacobian_shape(&matrix, flat)?;
        if matrix.iter().any(|v| v.is_nan()) {
            return Err(AnalysisError::DegenerateState(format!(
                "NaN Jacobian entry at grid index {flat} on branch {branch}"
            ))
            .into());
        }
        out.push(Some(eigenpairs(&matrix)?));
    }
    Ok(out)
}

fn eigenpairs(matrix: &DMatrix<f64>) -> Result<Vec<EigenPair>> {
    let dim = matrix.nrows();
    let eigenvalues = matrix.complex_eigenvalues();
    let complex_matrix = matrix.map(|v| Complex::new(v, 0.0));

    let mut pairs = Vec::with_capacity(dim);
    for idx in 0..dim {
        let lambda = eigenvalues[idx];

        let mut shifted = complex_matrix.clone();
        for i in 0..dim {
            shifted[(i, i)] -= lambda;
        }

        let svd = SVD::new(shifted, true, true);
        let v_t = svd
            .v_t
            .ok_or_else(|| anyhow!("Failed to compute eigenvector for eigenvalue index {}", idx))?;
        let row_index = v_t.nrows().saturating_sub(1);
        let mut vector: Vec<Complex64> = v_t.row(row_index).iter().map(|c| c.conj()).collect();
        let norm = vector.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt();
        if norm > 0.0 {
            for entry in &mut vector {
                *entry /= norm;
            }
        }

        pairs.push(EigenPair {
            value: lambda,
            vector,
        });
    }
    Ok(pairs)
}

/// One output channel of the response combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quadrature {
    /// Canonical cos/sin quadrature pair (u-type slot, v-type slot).
    Pair { u: usize, v: usize },
    /// Amplitude-type variable with a single slot.
    Amplitude(usize),
}

fn quadrature_layout(variables: &[String]) -> Result<Vec<Quadrature>> {
    let mut layout = Vec::new();
    let mut idx = 0;
    while idx < variables.len() {
        let name = &variables[idx];
        if name.starts_with('u') {
            let partner = variables.get(idx + 1);
            match partner {
                Some(next) if next.starts_with('v') => {
                    layout.push(Quadrature::Pair { u: idx, v: idx + 1 });
                    idx += 2;
                }
                _ => {
                    return Err(AnalysisError::InvalidInput(format!(
                        "quadrature variable \"{name}\" has no matching v-type partner"
                    ))
                    .into())
                }
            }
        } else if name.starts_with('a') {
            layout.push(Quadrature::Amplitude(idx));
            idx += 1;
        } else {
            return Err(AnalysisError::InvalidInput(format!(
                "unrecognized variable kind \"{name}\"; expected a u/v pair or an a-type variable"
            ))
            .into());
        }
    }
    Ok(layout)
}

/// Precompiled response matrix: one callable per entry, consuming the
/// ordered variable values followed by the (shifted) frequency. Built once
/// and reused for every frequency in a sweep.
pub struct ResponseMatrix {
    entries: Vec<Box<dyn Fn(&[f64]) -> Complex64 + Send + Sync>>,
    variables: Vec<String>,
    layout: Vec<Quadrature>,
    /// Natural frequency subtracted from the requested Ω before evaluating
    /// the entries (rotating-frame shift).
    base_frequency: f64,
}

impl std::fmt::Debug for ResponseMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseMatrix")
            .field("entries", &format_args!("<{} closures>", self.entries.len()))
            .field("variables", &self.variables)
            .field("layout", &self.layout)
            .field("base_frequency", &self.base_frequency)
            .finish()
    }
}

impl ResponseMatrix {
    pub fn new(
        entries: Vec<Box<dyn Fn(&[f64]) -> Complex64 + Send + Sync>>,
        variables: Vec<String>,
        base_frequency: f64,
    ) -> Result<Self> {
        let dim = variables.len();
        if dim == 0 {
            bail!("Response matrix requires at least one variable.");
        }
        if entries.len() != dim * dim {
            bail!(
                "Response matrix entry count mismatch. Expected {} entries for {} variables, got {}.",
                dim * dim,
                dim,
                entries.len()
            );
        }
        let layout = quadrature_layout(&variables)?;
        Ok(Self {
            entries,
            variables,
            layout,
            base_frequency,
        })
    }

    pub fn dimension(&self) -> usize {
        self.variables.len()
    }

    /// The canonical unit force: drive on every u-type and a-type slot,
    /// nothing on the v-type slots.
    fn unit_force(&self) -> DVector<Complex64> {
        let mut force = DVector::from_element(self.dimension(), Complex64::new(0.0, 0.0));
        for quadrature in &self.layout {
            match quadrature {
                Quadrature::Pair { u, .. } => force[*u] = Complex64::new(1.0, 0.0),
                Quadrature::Amplitude(slot) => force[*slot] = Complex64::new(1.0, 0.0),
            }
        }
        force
    }

    /// Evaluates the matrix at `omega`, inverts it, applies the canonical
    /// unit force, and combines the up- and down-converted amplitudes per
    /// quadrature pair: with `X = Im(z₁)Re(z₂) − Re(z₁)Im(z₂)`,
    /// `plus² = ‖z‖² − 2X` and `minus² = ‖z‖² + 2X`, the response is
    /// `sqrt(plus² + minus²)`. Amplitude-type variables take X = 0.
    pub fn response(&self, state: &[f64], omega: f64) -> Result<Vec<f64>> {
        let dim = self.dimension();
        if state.len() != dim {
            bail!(
                "State dimension mismatch. Expected {}, got {}.",
                dim,
                state.len()
            );
        }

        let mut args = Vec::with_capacity(dim + 1);
        args.extend_from_slice(state);
        args.push(omega - self.base_frequency);

        let matrix =
            DMatrix::from_fn(dim, dim, |i, j| (self.entries[i * dim + j])(&args));
        let inverse = matrix.try_inverse().ok_or_else(|| {
            AnalysisError::DegenerateState(format!(
                "response matrix is singular at frequency {omega}"
            ))
        })?;
        let amplitudes = inverse * self.unit_force();

        let mut out = Vec::with_capacity(self.layout.len());
        for quadrature in &self.layout {
            let response = match quadrature {
                Quadrature::Pair { u, v } => {
                    let z1 = amplitudes[*u];
                    let z2 = amplitudes[*v];
                    let norm_sq = z1.norm_sqr() + z2.norm_sqr();
                    let cross = z1.im * z2.re - z1.re * z2.im;
                    let plus_sq = norm_sq - 2.0 * cross;
                    let minus_sq = norm_sq + 2.0 * cross;
                    (plus_sq + minus_sq).sqrt()
                }
                Quadrature::Amplitude(slot) => {
                    let z = amplitudes[*slot];
                    (2.0 * z.norm_sqr()).sqrt()
                }
            };
            out.push(response);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::CLASS_PHYSICAL;
    use crate::store::ClassBitmaps;
    use approx::assert_abs_diff_eq;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn sweep_store(stable: Vec<Vec<bool>>) -> SolutionStore {
        let points = stable.len();
        let solutions: Vec<Vec<DVector<Complex64>>> = (0..points)
            .map(|flat| {
                (0..stable[0].len())
                    .map(|branch| {
                        DVector::from_vec(vec![
                            Complex64::new(0.1 * flat as f64, 0.0),
                            Complex64::new(branch as f64, 0.0),
                        ])
                    })
                    .collect()
            })
            .collect();
        let branch_count = stable[0].len();
        let mut classes = ClassBitmaps::new();
        classes.insert(
            CLASS_PHYSICAL.to_string(),
            vec![vec![true; branch_count]; points],
        );
        classes.insert(CLASS_STABLE.to_string(), stable);
        SolutionStore::new(
            solutions,
            vec!["u1".to_string(), "v1".to_string()],
            vec![(
                "omega".to_string(),
                (0..points).map(|i| 1.0 + 0.1 * i as f64).collect(),
            )],
            Vec::new(),
            classes,
        )
        .expect("store should build")
    }

    fn undamped_oscillator(_state: &[f64]) -> DMatrix<f64> {
        DMatrix::from_row_slice(2, 2, &[0.0, -2.0, 2.0, 0.0])
    }

    #[test]
    fn undamped_resonance_diverges_at_the_eigenfrequency() {
        let store = sweep_store(vec![vec![true], vec![true]]);
        let spectrum =
            jacobian_spectrum(&store, &undamped_oscillator, 0, &[1.0, 2.0, 3.0], 0.0)
                .expect("spectrum should compute");
        for row in &spectrum {
            assert!(row[0].is_finite());
            assert!(row[1].is_infinite());
            assert!(row[2].is_finite());
        }
    }

    #[test]
    fn damping_keeps_the_resonance_finite() {
        let store = sweep_store(vec![vec![true]]);
        let damped = |_state: &[f64]| DMatrix::from_row_slice(2, 2, &[-0.1, -2.0, 2.0, -0.1]);
        let spectrum = jacobian_spectrum(&store, &damped, 0, &[2.0], 1.0)
            .expect("spectrum should compute");
        assert!(spectrum[0][0].is_finite());
        assert!(spectrum[0][0] > 0.0);
    }

    #[test]
    fn unstable_points_contribute_zero_rows() {
        let store = sweep_store(vec![vec![true], vec![false], vec![true]]);
        let spectrum = jacobian_spectrum(&store, &undamped_oscillator, 0, &[1.0], 0.0)
            .expect("spectrum should compute");
        assert!(spectrum[0][0] > 0.0);
        assert_eq!(spectrum[1], vec![0.0]);
        assert!(spectrum[2][0] > 0.0);
    }

    #[test]
    fn spectrum_requires_a_stable_solution() {
        let store = sweep_store(vec![vec![false], vec![false]]);
        assert_err_contains(
            jacobian_spectrum(&store, &undamped_oscillator, 0, &[1.0], 0.0),
            "no stable solutions",
        );
    }

    #[test]
    fn eigen_extraction_returns_consistent_pairs() {
        let store = sweep_store(vec![vec![true], vec![true]]);
        let jacobian = |_state: &[f64]| DMatrix::from_row_slice(2, 2, &[-1.0, 0.0, 0.0, -3.0]);
        let along = eigen_along_branch(&store, &jacobian, 0, &ClassSelector::All, &[])
            .expect("eigen extraction should compute");
        for point in along {
            let pairs = point.expect("all points admitted");
            assert_eq!(pairs.len(), 2);
            let matrix = jacobian(&[]);
            for pair in &pairs {
                // J v = λ v for each reported pair.
                for i in 0..2 {
                    let mut lhs = Complex64::new(0.0, 0.0);
                    for j in 0..2 {
                        lhs += Complex64::new(matrix[(i, j)], 0.0) * pair.vector[j];
                    }
                    let rhs = pair.value * pair.vector[i];
                    assert!((lhs - rhs).norm() < 1e-8);
                }
            }
        }
    }

    #[test]
    fn eigen_extraction_respects_the_class_mask() {
        let store = sweep_store(vec![vec![true], vec![false], vec![true]]);
        let jacobian = |_state: &[f64]| DMatrix::from_row_slice(2, 2, &[-1.0, 0.0, 0.0, -2.0]);
        let along = eigen_along_branch(
            &store,
            &jacobian,
            0,
            &ClassSelector::named([CLASS_STABLE]),
            &[],
        )
        .expect("eigen extraction should compute");
        assert!(along[0].is_some());
        assert!(along[1].is_none());
        assert!(along[2].is_some());
    }

    #[test]
    fn nan_jacobian_entries_are_a_degenerate_state() {
        let store = sweep_store(vec![vec![true]]);
        let jacobian = |_state: &[f64]| DMatrix::from_row_slice(2, 2, &[f64::NAN, 0.0, 0.0, 1.0]);
        let err = eigen_along_branch(&store, &jacobian, 0, &ClassSelector::All, &[])
            .expect_err("expected failure");
        assert!(format!("{err}").contains("NaN Jacobian entry"));
    }

    fn constant_entry(value: Complex64) -> Box<dyn Fn(&[f64]) -> Complex64 + Send + Sync> {
        Box::new(move |_args| value)
    }

    #[test]
    fn identity_response_matrix_yields_root_two_per_pair() {
        let one = Complex64::new(1.0, 0.0);
        let zero = Complex64::new(0.0, 0.0);
        let matrix = ResponseMatrix::new(
            vec![
                constant_entry(one),
                constant_entry(zero),
                constant_entry(zero),
                constant_entry(one),
            ],
            vec!["u1".to_string(), "v1".to_string()],
            1.0,
        )
        .expect("matrix should build");
        let response = matrix
            .response(&[0.0, 0.0], 1.5)
            .expect("response should compute");
        assert_eq!(response.len(), 1);
        assert_abs_diff_eq!(response[0], 2.0_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn amplitude_variable_uses_the_single_slot() {
        let matrix = ResponseMatrix::new(
            vec![constant_entry(Complex64::new(2.0, 0.0))],
            vec!["a1".to_string()],
            0.0,
        )
        .expect("matrix should build");
        let response = matrix.response(&[0.0], 0.3).expect("response should compute");
        assert_abs_diff_eq!(response[0], 0.5_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn frequency_shift_is_applied_to_the_entries() {
        let matrix = ResponseMatrix::new(
            vec![Box::new(|args: &[f64]| {
                Complex64::new(1.0 + args[args.len() - 1], 0.0)
            })],
            vec!["a1".to_string()],
            2.0,
        )
        .expect("matrix should build");
        // At Ω = 2 the shifted frequency is 0 and the entry is 1.
        let response = matrix.response(&[0.0], 2.0).expect("response should compute");
        assert_abs_diff_eq!(response[0], 2.0_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn singular_response_matrix_is_a_degenerate_state() {
        let one = Complex64::new(1.0, 0.0);
        let matrix = ResponseMatrix::new(
            vec![
                constant_entry(one),
                constant_entry(one),
                constant_entry(one),
                constant_entry(one),
            ],
            vec!["u1".to_string(), "v1".to_string()],
            0.0,
        )
        .expect("matrix should build");
        assert_err_contains(matrix.response(&[0.0, 0.0], 1.0), "singular");
    }

    #[test]
    fn unmatched_quadrature_names_are_rejected() {
        let one = Complex64::new(1.0, 0.0);
        assert_err_contains(
            ResponseMatrix::new(
                vec![constant_entry(one)],
                vec!["u1".to_string()],
                0.0,
            ),
            "no matching v-type partner",
        );
        assert_err_contains(
            ResponseMatrix::new(
                vec![constant_entry(one)],
                vec!["x1".to_string()],
                0.0,
            ),
            "unrecognized variable kind",
        );
    }
}

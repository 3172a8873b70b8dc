//! The time-integration collaborator surface.
//!
//! Quench/relax only consumes the terminal state of a trajectory, so the
//! contract is "relax this state in place over [0, tf]". The integrator is
//! a blocking, synchronous collaborator; callers needing bounded latency
//! limit `tf` externally. [`FixedStepRk4`] is the provided implementation.

use anyhow::{bail, Result};

/// First-order real-valued equations of motion in the rotating frame:
/// dx/dt = f(t, x).
pub trait EquationsOfMotion {
    /// Dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates dx/dt at (t, x) into `out`.
    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]);
}

/// A time integrator that advances a state to its value at `tf`,
/// discarding the trajectory in between.
pub trait Integrator {
    fn relax(&self, eom: &dyn EquationsOfMotion, state: &mut [f64], tf: f64) -> Result<()>;
}

/// Classic fourth-order Runge-Kutta at a fixed step size. The last step is
/// shortened so the integration lands exactly on `tf`.
#[derive(Debug, Clone, Copy)]
pub struct FixedStepRk4 {
    dt: f64,
}

impl FixedStepRk4 {
    pub fn new(dt: f64) -> Result<Self> {
        if dt <= 0.0 {
            bail!("Step size dt must be positive.");
        }
        Ok(Self { dt })
    }
}

impl Integrator for FixedStepRk4 {
    fn relax(&self, eom: &dyn EquationsOfMotion, state: &mut [f64], tf: f64) -> Result<()> {
        if tf < 0.0 {
            bail!("Integration time tf must be non-negative.");
        }
        let dim = eom.dimension();
        if state.len() != dim {
            bail!(
                "State dimension mismatch. Expected {}, got {}.",
                dim,
                state.len()
            );
        }

        let mut k1 = vec![0.0; dim];
        let mut k2 = vec![0.0; dim];
        let mut k3 = vec![0.0; dim];
        let mut k4 = vec![0.0; dim];
        let mut tmp = vec![0.0; dim];

        let mut t = 0.0;
        while t < tf {
            let dt = self.dt.min(tf - t);

            eom.apply(t, state, &mut k1);
            for i in 0..dim {
                tmp[i] = state[i] + 0.5 * dt * k1[i];
            }
            eom.apply(t + 0.5 * dt, &tmp, &mut k2);
            for i in 0..dim {
                tmp[i] = state[i] + 0.5 * dt * k2[i];
            }
            eom.apply(t + 0.5 * dt, &tmp, &mut k3);
            for i in 0..dim {
                tmp[i] = state[i] + dt * k3[i];
            }
            eom.apply(t + dt, &tmp, &mut k4);

            for i in 0..dim {
                state[i] += dt / 6.0 * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]);
            }
            t += dt;
        }
        Ok(())
    }
}

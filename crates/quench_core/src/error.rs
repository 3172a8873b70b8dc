//! Failure taxonomy shared across the analysis modules.
//!
//! Most routines report errors through `anyhow` with descriptive messages;
//! the variants here exist for the failure classes callers are expected to
//! match on (bad input, degenerate numerical states, an exhausted branch
//! search).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Malformed caller input: bad sweep direction, wrong dimensionality,
    /// shape mismatches. Never retried.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A class name was requested that the store's classifier never produced.
    #[error("Class \"{0}\" is not defined in the solution store.")]
    UndefinedClass(String),

    /// The computation reached a numerically meaningless state (NaN Jacobian
    /// entries, singular response matrix, no stable solutions). The caller
    /// should narrow the sweep or change the system rather than retry.
    #[error("Degenerate state: {0}")]
    DegenerateState(String),

    /// Quench/relax found zero physical, stable candidate branches at the
    /// target sweep index.
    #[error("No physical, stable branch is available at sweep index {index}.")]
    NoEligibleBranch { index: usize },
}

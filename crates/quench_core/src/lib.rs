pub mod classify;
pub mod error;
pub mod follow;
pub mod integrate;
pub mod quench;
pub mod response;
pub mod store;
/// The `quench_core` crate analyzes the multi-valued steady-state solution
/// sets of harmonic-balance systems. It consumes pre-computed solution grids
/// from an external homotopy solver and classifier.
///
/// Key components:
/// - **Store**: immutable per-gridpoint, per-branch solutions with swept and
///   fixed parameters and classification bitmaps.
/// - **Classify**: boolean masks over named classes, applied through an
///   explicit valid/excluded wrapper.
/// - **Transform**: parallel evaluation of pure callables over the grid.
/// - **Follow/Quench**: branch following along a 1D sweep with
///   perturb-and-relax re-anchoring at bifurcations.
/// - **Response**: Jacobian eigenvalue spectra and response-matrix
///   susceptibilities around selected branches.
pub mod transform;

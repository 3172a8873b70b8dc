//! Classification masks over the solution grid.
//!
//! A mask selects, per grid point, which branches survive a combination of
//! named classes and negated classes. Applying a mask never mutates the
//! store: excluded entries are replaced by an explicit [`Filtered::Excluded`]
//! marker so that classification exclusion stays distinguishable from a
//! genuinely non-finite numeric value.

use anyhow::{bail, Result};
use nalgebra::DVector;
use num_complex::Complex64;
use serde::Serialize;

use crate::error::AnalysisError;
use crate::store::SolutionStore;

pub const CLASS_PHYSICAL: &str = "physical";
pub const CLASS_STABLE: &str = "stable";

/// A value that survived masking, or the exclusion marker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Filtered<T> {
    Valid(T),
    Excluded,
}

impl<T> Filtered<T> {
    pub fn is_valid(&self) -> bool {
        matches!(self, Filtered::Valid(_))
    }

    pub fn is_excluded(&self) -> bool {
        matches!(self, Filtered::Excluded)
    }

    pub fn valid(&self) -> Option<&T> {
        match self {
            Filtered::Valid(value) => Some(value),
            Filtered::Excluded => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Filtered<U> {
        match self {
            Filtered::Valid(value) => Filtered::Valid(f(value)),
            Filtered::Excluded => Filtered::Excluded,
        }
    }
}

/// Class inclusion selector. `All` admits every branch regardless of the
/// exclusion list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ClassSelector {
    All,
    Named(Vec<String>),
}

impl ClassSelector {
    pub fn named<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        ClassSelector::Named(names.into_iter().map(Into::into).collect())
    }
}

impl From<&str> for ClassSelector {
    fn from(name: &str) -> Self {
        if name == "all" {
            ClassSelector::All
        } else {
            ClassSelector::Named(vec![name.to_string()])
        }
    }
}

/// Boolean mask over a branch subset: `flags[flat][slot]` tells whether the
/// branch in `branches[slot]` is admitted at that grid point.
#[derive(Debug, Clone, Serialize)]
pub struct Mask {
    branches: Vec<usize>,
    flags: Vec<Vec<bool>>,
}

impl Mask {
    pub fn branches(&self) -> &[usize] {
        &self.branches
    }

    pub fn grid_len(&self) -> usize {
        self.flags.len()
    }

    /// Whether the branch in `slot` is admitted at `flat`. Panics if either
    /// index is out of range of the mask's grid or branch subset.
    pub fn flag(&self, flat: usize, slot: usize) -> bool {
        self.flags[flat][slot]
    }

    /// The slot of a branch within this mask's branch subset, if selected.
    pub fn slot_of(&self, branch: usize) -> Option<usize> {
        self.branches.iter().position(|&b| b == branch)
    }
}

/// Builds the mask admitting branches that are in every class of `classes`
/// and in no class of `not_classes` at each grid point.
///
/// Combination is an elementwise AND over the selected bitmaps and the
/// negated excluded bitmaps, so reordering either list never changes the
/// result. An undefined class name is a hard failure. `ClassSelector::All`
/// yields an all-true mask and ignores `not_classes` entirely.
pub fn build_mask(
    store: &SolutionStore,
    classes: &ClassSelector,
    not_classes: &[String],
    branches: &[usize],
) -> Result<Mask> {
    if branches.is_empty() {
        bail!("Mask construction requires at least one branch.");
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
    let all_true = || vec![vec![true; branches.len()]; grid_len];

    let flags = match classes {
        ClassSelector::All => all_true(),
        ClassSelector::Named(names) => {
            let mut included = Vec::with_capacity(names.len());
            for name in names {
                included.push(store.class(name)?);
            }
            let mut excluded = Vec::with_capacity(not_classes.len());
            for name in not_classes {
                excluded.push(store.class(name)?);
            }

            let mut flags = all_true();
            for (flat, row) in flags.iter_mut().enumerate() {
                for (slot, &branch) in branches.iter().enumerate() {
                    let admitted = included.iter().all(|bitmap| bitmap[flat][branch])
                        && excluded.iter().all(|bitmap| !bitmap[flat][branch]);
                    row[slot] = admitted;
                }
            }
            flags
        }
    };

    Ok(Mask {
        branches: branches.to_vec(),
        flags,
    })
}

/// Applies a mask to a grid of per-branch values, marking entries excluded
/// where the mask is false. The output shape equals the input shape; every
/// entry is either the original value or `Excluded`, never a third thing.
///
/// `T` covers both masked shapes: a scalar per branch (transform output)
/// and a full variable vector per branch (raw solutions).
pub fn apply_mask<T: Clone>(values: &[Vec<T>], mask: &Mask) -> Result<Vec<Vec<Filtered<T>>>> {
    if values.len() != mask.grid_len() {
        return Err(AnalysisError::InvalidInput(format!(
            "mask covers {} grid points but the value grid has {}",
            mask.grid_len(),
            values.len()
        ))
        .into());
    }
    let width = mask.branches().len();
    let mut out = Vec::with_capacity(values.len());
    for (flat, row) in values.iter().enumerate() {
        if row.len() != width {
            return Err(AnalysisError::InvalidInput(format!(
                "mask selects {} branches but the value row at grid index {} has {}",
                width,
                flat,
                row.len()
            ))
            .into());
        }
        let masked = row
            .iter()
            .enumerate()
            .map(|(slot, value)| {
                if mask.flag(flat, slot) {
                    Filtered::Valid(value.clone())
                } else {
                    Filtered::Excluded
                }
            })
            .collect();
        out.push(masked);
    }
    Ok(out)
}

/// Selects the mask's branch subset out of the raw solution grid and applies
/// the mask, yielding full variable vectors with exclusion markers.
pub fn masked_solutions(
    store: &SolutionStore,
    mask: &Mask,
) -> Result<Vec<Vec<Filtered<DVector<Complex64>>>>> {
    let selected: Vec<Vec<DVector<Complex64>>> = (0..store.grid_len())
        .map(|flat| {
            mask.branches()
                .iter()
                .map(|&branch| store.solution(flat, branch).clone())
                .collect()
        })
        .collect();
    apply_mask(&selected, mask)
}

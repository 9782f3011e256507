//! Distance oracles scoring a candidate tree against a reference sample.
//!
//! The summary search only needs one thing from a metric: given a candidate
//! topology and a set of posterior trees, a representative tree with that
//! topology and the summed distance from it to the sample. That seam is the
//! [`DistanceOracle`] trait; any `Fn(&Tree, &[&Tree]) -> Result<(Tree, f64), _>`
//! implements it too.
//!
//! [`CladeOracle`] is the built-in implementation, working on rooted clades
//! (every non-root edge is identified by the taxa below it):
//!
//! 1. **Branch score (Kuhner-Felsenstein)**: for each clade
//!    - in both trees: add (length_a - length_b)²
//!    - in only one tree: add length²
//!
//!    The oracle sums the *squared* branch score over the sample, so the
//!    summary score `sqrt(sum / n)` is the root-mean-square branch score.
//!
//! 2. **Robinson-Foulds (rooted clades)**: `|A| + |B| - 2|A ∩ B|` over the
//!    non-trivial clades of each tree, summed over the sample.
//!
//! In both cases the representative tree is the candidate topology with each
//! edge set to the mean length of its clade over the sample, a clade absent
//! from a tree counting as 0. For the branch score this is the least-squares
//! optimum for a fixed topology.

use crate::clade::{CladeLengths, TaxonIndex, clade_lengths, with_clade_lengths};
use crate::error::SummaryError;
use crate::tree::Tree;
use rayon::prelude::*;
use std::iter;

/// Scores a candidate against a reference set of posterior trees.
pub trait DistanceOracle: Sync {
    /// Returns the representative tree for `candidate`'s topology and the raw
    /// (summed, unnormalized) distance to `reference`.
    fn distance(&self, candidate: &Tree, reference: &[&Tree]) -> Result<(Tree, f64), SummaryError>;
}

impl<F> DistanceOracle for F
where
    F: Fn(&Tree, &[&Tree]) -> Result<(Tree, f64), SummaryError> + Sync,
{
    fn distance(&self, candidate: &Tree, reference: &[&Tree]) -> Result<(Tree, f64), SummaryError> {
        self(candidate, reference)
    }
}

/// Metric used by [`CladeOracle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Metric {
    #[default]
    BranchScore,
    RobinsonFoulds,
}

/// Built-in oracle over rooted clades.
#[derive(Debug, Clone, Copy, Default)]
pub struct CladeOracle {
    pub metric: Metric,
}

impl CladeOracle {
    pub fn new(metric: Metric) -> Self {
        CladeOracle { metric }
    }
}

impl DistanceOracle for CladeOracle {
    fn distance(&self, candidate: &Tree, reference: &[&Tree]) -> Result<(Tree, f64), SummaryError> {
        if reference.is_empty() {
            return Ok((candidate.clone(), 0.0));
        }

        let index = TaxonIndex::from_trees(iter::once(candidate).chain(reference.iter().copied()));
        let target = clade_lengths(candidate, &index)?;
        let snapshots = reference
            .par_iter()
            .map(|tree| clade_lengths(tree, &index))
            .collect::<Result<Vec<_>, _>>()?;

        let means = mean_lengths(&target, &snapshots);
        let raw: f64 = match self.metric {
            Metric::BranchScore => snapshots
                .par_iter()
                .map(|snap| squared_branch_score(&means, snap))
                .sum(),
            Metric::RobinsonFoulds => snapshots
                .par_iter()
                .map(|snap| rf_from_lengths(&target, snap) as f64)
                .sum(),
        };

        let representative = with_clade_lengths(candidate, &index, &means)?;
        Ok((representative, raw))
    }
}

/// Mean length of each of `target`'s clades over `snapshots`.
fn mean_lengths(target: &CladeLengths, snapshots: &[CladeLengths]) -> CladeLengths {
    let n = snapshots.len() as f64;
    target
        .keys()
        .map(|clade| {
            let total: f64 = snapshots
                .iter()
                .map(|snap| snap.get(clade).copied().unwrap_or(0.0))
                .sum();
            (clade.clone(), total / n)
        })
        .collect()
}

/// Squared Kuhner-Felsenstein branch score between two clade snapshots.
pub fn squared_branch_score(a: &CladeLengths, b: &CladeLengths) -> f64 {
    let mut sum_squared = 0.0;

    for (clade, length_a) in a {
        match b.get(clade) {
            Some(length_b) => {
                let diff = length_a - length_b;
                sum_squared += diff * diff;
            }
            None => sum_squared += length_a * length_a,
        }
    }

    // Clades only in B
    for (clade, length_b) in b {
        if !a.contains_key(clade) {
            sum_squared += length_b * length_b;
        }
    }

    sum_squared
}

/// Kuhner-Felsenstein branch score between two rooted trees.
///
/// # Errors
/// Returns [`SummaryError::MalformedTree`] if either tree repeats a taxon.
pub fn branch_score(tree_a: &Tree, tree_b: &Tree) -> Result<f64, SummaryError> {
    let index = TaxonIndex::from_trees([tree_a, tree_b]);
    let a = clade_lengths(tree_a, &index)?;
    let b = clade_lengths(tree_b, &index)?;
    Ok(squared_branch_score(&a, &b).sqrt())
}

/// Rooted Robinson-Foulds distance over non-trivial clades.
fn rf_from_lengths(a: &CladeLengths, b: &CladeLengths) -> usize {
    let non_trivial = |snap: &CladeLengths| snap.keys().filter(|c| c.count_ones() > 1).count();
    let shared = a
        .keys()
        .filter(|c| c.count_ones() > 1 && b.contains_key(*c))
        .count();
    non_trivial(a) + non_trivial(b) - 2 * shared
}

/// Rooted Robinson-Foulds distance between two trees.
///
/// # Example
/// ```text
/// Tree 1:  (((A,B),C),D)     Clades: {A,B}, {A,B,C}
/// Tree 2:  (((A,C),B),D)     Clades: {A,C}, {A,B,C}
///
/// Shared: {A,B,C}
/// RF = 2 + 2 - 2*1 = 2
/// ```
pub fn robinson_foulds(tree_a: &Tree, tree_b: &Tree) -> Result<usize, SummaryError> {
    let index = TaxonIndex::from_trees([tree_a, tree_b]);
    let a = clade_lengths(tree_a, &index)?;
    let b = clade_lengths(tree_b, &index)?;
    Ok(rf_from_lengths(&a, &b))
}

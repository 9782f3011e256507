//! Python binding layer for summary tree search.
//!
//! Provides a Python function computing the summary tree of a BEAST/NEXUS
//! or Newick posterior sample file.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use std::time::Duration;

use crate::canonical::NewickFormat;
use crate::distances::{CladeOracle, Metric};
use crate::error::SummaryError;
use crate::io::read_posterior;
use crate::summary::{Diagnostic, Selection, SummaryOptions, TieOrder, summarize};
use crate::tree::Tree;

fn to_py_err(err: SummaryError) -> PyErr {
    PyValueError::new_err(err.to_string())
}

/// Compute the summary tree of a posterior sample file.
///
/// Args:
///     path: BEAST/NEXUS or Newick tree file, optionally gzip-compressed
///     burnin: Percentage of trees dropped from the start (default: 10)
///     every: Keep one tree out of every `every` (default: 1)
///     ntops: Number of best supported topologies to try (default: 10)
///     limit: Seconds to spend trying topologies by support; <= 0 uses ntops (default: -1)
///     topologies: Newick topologies to score instead of the sampled ones (default: None)
///     matching: Score each topology only against the trees sharing it (default: False)
///     seed: Shuffle equally supported topologies in timed mode (default: None)
///     metric: "branch-score" or "rf" (default: "branch-score")
///     precision: Fixed number of decimals for branch lengths (default: None)
///     use_real_taxa: Use TRANSLATE block for taxon names when available (default: True)
///
/// Returns:
///     A tuple of (newick, score, candidates_tried, warnings) where newick is
///     None when no candidate could be scored.
///
/// Raises:
///     ValueError: If the file cannot be read or parsed, the sample is empty,
///     or an option is invalid
#[pyfunction]
#[pyo3(signature = (
    path,
    burnin=10.0,
    every=1,
    ntops=10,
    limit=-1.0,
    topologies=None,
    matching=false,
    seed=None,
    metric="branch-score",
    precision=None,
    use_real_taxa=true
))]
#[allow(clippy::too_many_arguments)]
fn summarize_file(
    path: String,
    burnin: f64,
    every: usize,
    ntops: usize,
    limit: f64,
    topologies: Option<Vec<String>>,
    matching: bool,
    seed: Option<u64>,
    metric: &str,
    precision: Option<usize>,
    use_real_taxa: bool,
) -> PyResult<(Option<String>, f64, usize, Vec<String>)> {
    let metric = match metric {
        "branch-score" => Metric::BranchScore,
        "rf" => Metric::RobinsonFoulds,
        other => return Err(PyValueError::new_err(format!("unknown metric '{other}'"))),
    };

    let selection = match topologies {
        Some(texts) if !texts.is_empty() => Selection::Targets(
            texts
                .iter()
                .map(|text| Tree::from_newick(text))
                .collect::<Result<Vec<_>, _>>()
                .map_err(to_py_err)?,
        ),
        _ if limit > 0.0 => Selection::Timed {
            limit: Duration::try_from_secs_f64(limit)
                .map_err(|e| PyValueError::new_err(format!("invalid limit {limit}: {e}")))?,
            ties: seed.map_or(TieOrder::Stable, |seed| TieOrder::Shuffled { seed }),
        },
        _ => Selection::Top { ntops },
    };
    let options = SummaryOptions { selection, matching_only: matching };

    let posterior = read_posterior(&path, burnin, every, use_real_taxa).map_err(to_py_err)?;
    let summary = summarize(&posterior, &CladeOracle::new(metric), &options).map_err(to_py_err)?;

    let newick = summary
        .to_newick(&NewickFormat { precision })
        .map_err(to_py_err)?;
    let warnings = summary
        .diagnostics
        .iter()
        .map(|diagnostic| match diagnostic {
            Diagnostic::TieAtBoundary { count, support } => format!(
                "{count} additional topologies have the same support ({support} trees) as the last one tried"
            ),
            Diagnostic::NoMatchingTrees { topology } => {
                format!("no posterior tree has topology {topology}")
            }
        })
        .collect();

    Ok((newick, summary.best_score, summary.candidates_tried, warnings))
}

/// Python module definition
#[pymodule]
fn summary_tree(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(summarize_file, m)?)?;
    Ok(())
}

//! Summary tree search over a posterior sample.
//!
//! # Overview
//! The posterior trees are grouped by topology and ranked by support. A set of
//! candidate topologies is chosen (see [`Selection`]), each candidate is scored
//! against the posterior with a [`DistanceOracle`], and the candidate with the
//! lowest normalized score wins:
//!
//! ```text
//! score = sqrt(raw_distance / |reference|)
//! ```
//!
//! The winning tree is the one the oracle returned for the candidate, not the
//! candidate itself, since an oracle may re-estimate branch lengths.
//!
//! # Determinism
//! Candidates are scored in parallel in [`Selection::Top`] and
//! [`Selection::Targets`] mode, then reduced in candidate order: on equal
//! scores the earlier candidate wins. [`Selection::Timed`] scores one
//! candidate at a time and checks the clock only between candidates, so a
//! single slow oracle call can overrun the limit.

use crate::canonical::{NewickFormat, to_newick, topology_key};
use crate::distances::DistanceOracle;
use crate::error::SummaryError;
use crate::topology::{TopologyClass, TopologyGroups, coverage, group_by_topology};
use crate::tree::Tree;
use itertools::Itertools;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::borrow::Cow;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Order of topologies that share the same support in timed mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TieOrder {
    /// First-seen order.
    #[default]
    Stable,
    /// Shuffled within each support level, reproducibly for a given seed.
    Shuffled { seed: u64 },
}

/// Which candidate topologies to score.
#[derive(Debug, Clone)]
pub enum Selection {
    /// The `ntops` best supported topologies (clamped to the number available).
    Top { ntops: usize },
    /// All topologies by descending support until `limit` has elapsed.
    Timed { limit: Duration, ties: TieOrder },
    /// Caller supplied topologies, in the given order.
    Targets(Vec<Tree>),
}

#[derive(Debug, Clone)]
pub struct SummaryOptions {
    pub selection: Selection,
    /// Score each candidate only against the posterior trees sharing its topology.
    pub matching_only: bool,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        SummaryOptions {
            selection: Selection::Top { ntops: 10 },
            matching_only: false,
        }
    }
}

/// Non-fatal conditions met during the search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// `count` topologies beyond the last selected one have the same support
    /// and were left out.
    TieAtBoundary { count: usize, support: usize },
    /// A candidate was skipped because no posterior tree has its topology.
    NoMatchingTrees { topology: String },
}

/// Outcome of a summary search.
#[derive(Debug, Clone)]
pub struct Summary {
    /// `None` when no candidate was scored.
    pub best_tree: Option<Tree>,
    /// `f64::INFINITY` when no candidate was scored.
    pub best_score: f64,
    pub candidates_tried: usize,
    /// The time limit stopped the search before all candidates were tried.
    pub time_limit_reached: bool,
    pub diagnostics: Vec<Diagnostic>,
    pub elapsed: Duration,
}

impl Default for Summary {
    fn default() -> Self {
        Summary {
            best_tree: None,
            best_score: f64::INFINITY,
            candidates_tried: 0,
            time_limit_reached: false,
            diagnostics: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }
}

impl Summary {
    fn record(&mut self, candidate: &Candidate<'_>, outcome: Outcome) {
        match outcome {
            Outcome::Skipped => {
                warn!(topology = %candidate.topology, "skipping topology, no matching posterior trees");
                self.diagnostics.push(Diagnostic::NoMatchingTrees {
                    topology: candidate.topology.to_string(),
                });
            }
            Outcome::Scored { tree, score } => {
                self.candidates_tried += 1;
                if score < self.best_score {
                    self.best_score = score;
                    self.best_tree = Some(tree);
                }
            }
        }
    }

    /// Canonical Newick text of the best tree.
    pub fn to_newick(&self, format: &NewickFormat) -> Result<Option<String>, SummaryError> {
        self.best_tree.as_ref().map(|tree| to_newick(tree, format)).transpose()
    }

    /// Output line: optional `[&W score]` annotation followed by the tree.
    pub fn render(&self, format: &NewickFormat, with_score: bool) -> Result<String, SummaryError> {
        let score = with_score.then(|| format!("[&W {}]", short_score(self.best_score)));
        let newick = self.to_newick(format)?;
        Ok(score.into_iter().chain(newick).join(" "))
    }
}

/// Six significant digits, shortest text after rounding (`0.1 + 0.2` → `0.3`).
fn short_score(score: f64) -> String {
    format!("{score:.5e}")
        .parse::<f64>()
        .map_or_else(|_| score.to_string(), |rounded| rounded.to_string())
}

struct Candidate<'c> {
    tree: &'c Tree,
    topology: Cow<'c, str>,
}

impl<'c> Candidate<'c> {
    fn from_class(class: &TopologyClass<'c>) -> Self {
        Candidate {
            tree: class.representative(),
            topology: Cow::Borrowed(class.encoding),
        }
    }
}

enum Outcome {
    Skipped,
    Scored { tree: Tree, score: f64 },
}

struct Search<'s, 'a, O: ?Sized> {
    groups: &'s TopologyGroups<'a>,
    posterior: &'s [&'a Tree],
    oracle: &'s O,
    matching_only: bool,
}

impl<O: DistanceOracle + ?Sized> Search<'_, '_, O> {
    fn reference(&self, candidate: &Candidate<'_>) -> Option<&[&Tree]> {
        if self.matching_only {
            self.groups.get(&candidate.topology)
        } else {
            Some(self.posterior)
        }
    }

    fn score(&self, candidate: &Candidate<'_>) -> Result<Outcome, SummaryError> {
        let Some(reference) = self.reference(candidate) else {
            return Ok(Outcome::Skipped);
        };
        if self.matching_only {
            info!(
                used = reference.len(),
                total = self.posterior.len(),
                topology = %candidate.topology,
                "using matching posterior trees"
            );
        }
        let (tree, raw) = self.oracle.distance(candidate.tree, reference)?;
        let score = (raw / reference.len() as f64).sqrt();
        debug!(topology = %candidate.topology, score, "scored candidate");
        Ok(Outcome::Scored { tree, score })
    }

    fn run_parallel(&self, candidates: &[Candidate<'_>], summary: &mut Summary) -> Result<(), SummaryError> {
        let outcomes = candidates
            .par_iter()
            .map(|candidate| self.score(candidate))
            .collect::<Result<Vec<_>, _>>()?;
        for (candidate, outcome) in candidates.iter().zip(outcomes) {
            summary.record(candidate, outcome);
        }
        Ok(())
    }

    fn run_timed(
        &self,
        candidates: &[Candidate<'_>],
        limit: Duration,
        summary: &mut Summary,
    ) -> Result<(), SummaryError> {
        let clock = Instant::now();
        for (i, candidate) in candidates.iter().enumerate() {
            let outcome = self.score(candidate)?;
            summary.record(candidate, outcome);

            let elapsed = clock.elapsed();
            if elapsed >= limit && i + 1 < candidates.len() {
                info!("time limit reached");
                summary.time_limit_reached = true;
                break;
            }
            info!(
                seconds = elapsed.as_secs(),
                tried = summary.candidates_tried,
                best = summary.best_score,
                "searching"
            );
        }
        info!(
            examined = summary.candidates_tried,
            seconds = format_args!("{:.1}", clock.elapsed().as_secs_f64()),
            "timed search finished"
        );
        Ok(())
    }
}

/// The first `ntops` classes of `ranked`, plus a [`Diagnostic::TieAtBoundary`]
/// when classes past the cut have the same support as the last one kept.
pub fn select_top<'r, 'g>(
    ranked: &'r [TopologyClass<'g>],
    ntops: usize,
) -> (&'r [TopologyClass<'g>], Option<Diagnostic>) {
    let n = ntops.min(ranked.len());
    if n == 0 {
        return (&ranked[..0], None);
    }
    let (selected, rest) = ranked.split_at(n);
    let support = selected[n - 1].support();
    let count = rest.iter().take_while(|class| class.support() == support).count();
    let tie = (count > 0).then_some(Diagnostic::TieAtBoundary { count, support });
    (selected, tie)
}

/// Classes by descending support, with each run of equal support ordered
/// per `ties`.
pub fn support_order<'g>(ranked: Vec<TopologyClass<'g>>, ties: TieOrder) -> Vec<TopologyClass<'g>> {
    let TieOrder::Shuffled { seed } = ties else {
        return ranked;
    };
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut ordered = Vec::with_capacity(ranked.len());
    let levels = ranked.into_iter().chunk_by(|class| class.support());
    for (_, level) in &levels {
        let mut tied: Vec<_> = level.collect();
        tied.shuffle(&mut rng);
        ordered.extend(tied);
    }
    ordered
}

/// Finds the summary tree of `posterior`.
///
/// # Errors
/// [`SummaryError::EmptySample`] for an empty posterior; malformed trees and
/// oracle failures are propagated. Ties at the selection boundary and
/// targets without matching trees are reported in [`Summary::diagnostics`].
pub fn summarize<O>(
    posterior: &[Tree],
    oracle: &O,
    options: &SummaryOptions,
) -> Result<Summary, SummaryError>
where
    O: DistanceOracle + ?Sized,
{
    let started = Instant::now();
    if posterior.is_empty() {
        return Err(SummaryError::EmptySample);
    }

    info!(trees = posterior.len(), "collecting topologies");
    let groups = group_by_topology(posterior)?;
    let ranked = groups.ranked();
    let all: Vec<&Tree> = posterior.iter().collect();
    let search = Search {
        groups: &groups,
        posterior: &all,
        oracle,
        matching_only: options.matching_only,
    };

    let mut summary = Summary::default();
    match &options.selection {
        Selection::Top { ntops } => {
            let (selected, tie) = select_top(&ranked, *ntops);
            info!(
                selected = selected.len(),
                topologies = ranked.len(),
                coverage = format_args!("{:.1}%", 100.0 * coverage(selected, posterior.len())),
                "using top topologies"
            );
            if let Some(Diagnostic::TieAtBoundary { count, support }) = &tie {
                warn!(
                    "{count} additional topologies have the same support as the {}th one ({support} trees, {:.3}%)",
                    selected.len(),
                    100.0 * *support as f64 / posterior.len() as f64
                );
            }
            summary.diagnostics.extend(tie);
            let candidates: Vec<_> = selected.iter().map(Candidate::from_class).collect();
            search.run_parallel(&candidates, &mut summary)?;
        }
        Selection::Targets(targets) => {
            let candidates = targets
                .iter()
                .map(|tree| {
                    Ok(Candidate {
                        tree,
                        topology: Cow::Owned(topology_key(tree)?),
                    })
                })
                .collect::<Result<Vec<_>, SummaryError>>()?;
            search.run_parallel(&candidates, &mut summary)?;
        }
        Selection::Timed { limit, ties } => {
            let ordered = support_order(ranked, *ties);
            info!(topologies = ordered.len(), "trying topologies in order, time permitting");
            let candidates: Vec<_> = ordered.iter().map(Candidate::from_class).collect();
            search.run_timed(&candidates, *limit, &mut summary)?;
        }
    }

    summary.elapsed = started.elapsed();
    info!(
        tried = summary.candidates_tried,
        score = summary.best_score,
        "search done"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distances::{CladeOracle, Metric};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tree(newick: &str) -> Tree {
        Tree::from_newick(newick).unwrap()
    }

    fn sample(counts: &[(&str, usize)]) -> Vec<Tree> {
        counts.iter()
            .flat_map(|&(newick, copies)| (0..copies).map(move |_| tree(newick)))
            .collect()
    }

    /// Returns a fixed normalized score per topology, and a marker tree so the
    /// test can tell the oracle's tree from the candidate.
    struct ByTopology(Vec<(&'static str, f64)>);

    impl DistanceOracle for ByTopology {
        fn distance(&self, candidate: &Tree, reference: &[&Tree]) -> Result<(Tree, f64), SummaryError> {
            let key = topology_key(candidate)?;
            let score = self
                .0
                .iter()
                .find(|(k, _)| *k == key)
                .map_or(f64::INFINITY, |(_, s)| *s);
            Ok((Tree::leaf(format!("oracle {key}")), score * score * reference.len() as f64))
        }
    }

    /// Counts calls and records the reference set sizes it saw.
    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl DistanceOracle for Counting {
        fn distance(&self, candidate: &Tree, reference: &[&Tree]) -> Result<(Tree, f64), SummaryError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok((candidate.clone(), reference.len() as f64))
        }
    }

    const T1: &str = "(A,(B,(C,D)));";
    const T2: &str = "((A,B),(C,D));";
    const T3: &str = "(B,(A,(C,D)));";
    const T4: &str = "(C,(D,(A,B)));";

    #[test]
    fn test_empty_sample_is_an_error() {
        let err = summarize(&[], &Counting::default(), &SummaryOptions::default()).unwrap_err();
        assert!(matches!(err, SummaryError::EmptySample));
    }

    #[test]
    fn test_top_picks_lowest_score_and_oracle_tree() {
        let posterior = sample(&[(T1, 3), (T2, 2), (T3, 1)]);
        let oracle = ByTopology(vec![
            ("(A,(B,(C,D)))", 2.0),
            ("((A,B),(C,D))", 0.5),
            ("(B,(A,(C,D)))", 1.0),
        ]);
        let summary = summarize(&posterior, &oracle, &SummaryOptions::default()).unwrap();

        assert_eq!(summary.candidates_tried, 3);
        assert_eq!(summary.best_score, 0.5);
        assert_eq!(summary.best_tree, Some(Tree::leaf("oracle ((A,B),(C,D))")));
        assert!(summary.diagnostics.is_empty());
        assert!(!summary.time_limit_reached);
    }

    #[test]
    fn test_top_reports_tie_at_boundary() {
        let posterior = sample(&[(T1, 3), (T2, 2), (T3, 2), (T4, 2)]);
        let oracle = Counting::default();
        let options = SummaryOptions { selection: Selection::Top { ntops: 2 }, matching_only: false };
        let summary = summarize(&posterior, &oracle, &options).unwrap();

        assert_eq!(summary.candidates_tried, 2);
        assert_eq!(oracle.0.load(Ordering::SeqCst), 2);
        assert_eq!(
            summary.diagnostics,
            vec![Diagnostic::TieAtBoundary { count: 2, support: 2 }]
        );
    }

    #[test]
    fn test_ntops_clamps_to_available() {
        let posterior = sample(&[(T1, 1), (T2, 1)]);
        let options = SummaryOptions { selection: Selection::Top { ntops: 50 }, matching_only: false };
        let summary = summarize(&posterior, &Counting::default(), &options).unwrap();
        assert_eq!(summary.candidates_tried, 2);
        assert!(summary.diagnostics.is_empty());
    }

    #[test]
    fn test_equal_scores_keep_first_candidate() {
        let posterior = sample(&[(T2, 2), (T1, 1)]);
        let oracle = ByTopology(vec![("((A,B),(C,D))", 1.0), ("(A,(B,(C,D)))", 1.0)]);
        let summary = summarize(&posterior, &oracle, &SummaryOptions::default()).unwrap();
        assert_eq!(summary.best_tree, Some(Tree::leaf("oracle ((A,B),(C,D))")));
    }

    #[test]
    fn test_timed_scores_first_candidate_even_with_zero_limit() {
        let posterior = sample(&[(T1, 2), (T2, 1), (T3, 1)]);
        let oracle = Counting::default();
        let options = SummaryOptions {
            selection: Selection::Timed { limit: Duration::ZERO, ties: TieOrder::Stable },
            matching_only: false,
        };
        let summary = summarize(&posterior, &oracle, &options).unwrap();

        assert_eq!(summary.candidates_tried, 1);
        assert_eq!(oracle.0.load(Ordering::SeqCst), 1);
        assert!(summary.time_limit_reached);
        assert!(summary.best_tree.is_some());
    }

    #[test]
    fn test_timed_with_room_tries_everything() {
        let posterior = sample(&[(T1, 2), (T2, 1), (T3, 1)]);
        let options = SummaryOptions {
            selection: Selection::Timed { limit: Duration::from_secs(3600), ties: TieOrder::Shuffled { seed: 7 } },
            matching_only: false,
        };
        let summary = summarize(&posterior, &Counting::default(), &options).unwrap();
        assert_eq!(summary.candidates_tried, 3);
        assert!(!summary.time_limit_reached);
    }

    #[test]
    fn test_shuffle_stays_within_support_levels() {
        let posterior = sample(&[(T1, 3), (T2, 1), (T3, 1), (T4, 1)]);
        let groups = group_by_topology(&posterior).unwrap();

        let encodings = |ties| -> Vec<String> {
            support_order(groups.ranked(), ties)
                .iter()
                .map(|class| class.encoding.to_owned())
                .collect()
        };
        let stable = encodings(TieOrder::Stable);
        let shuffled = encodings(TieOrder::Shuffled { seed: 42 });

        assert_eq!(shuffled, encodings(TieOrder::Shuffled { seed: 42 }));
        assert_eq!(shuffled[0], stable[0]);
        assert_eq!(
            shuffled[1..].iter().sorted().collect::<Vec<_>>(),
            stable[1..].iter().sorted().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_unmatched_target_gives_no_tree() {
        let posterior = sample(&[(T1, 2)]);
        let options = SummaryOptions {
            selection: Selection::Targets(vec![tree(T2)]),
            matching_only: true,
        };
        let summary = summarize(&posterior, &Counting::default(), &options).unwrap();

        assert_eq!(summary.best_tree, None);
        assert_eq!(summary.best_score, f64::INFINITY);
        assert_eq!(summary.candidates_tried, 0);
        assert_eq!(
            summary.diagnostics,
            vec![Diagnostic::NoMatchingTrees { topology: "((A,B),(C,D))".to_owned() }]
        );
    }

    #[test]
    fn test_matching_targets_use_their_class() {
        let posterior = sample(&[(T1, 3), (T2, 1)]);
        let options = SummaryOptions {
            selection: Selection::Targets(vec![tree(T4), tree("((D,C),(B,A));")]),
            matching_only: true,
        };
        // Counting returns |reference| as raw distance, so score = sqrt(1) for T2's class.
        let summary = summarize(&posterior, &Counting::default(), &options).unwrap();
        assert_eq!(summary.candidates_tried, 1);
        assert_eq!(summary.best_score, 1.0);
        assert_eq!(summary.diagnostics.len(), 1);
    }

    #[test]
    fn test_clade_oracle_end_to_end() {
        let posterior = vec![
            tree("((A:1,B:1):1,C:2);"),
            tree("((A:3,B:3):1,C:4);"),
            tree("((A:1,C:1):1,B:2);"),
        ];
        let summary = summarize(&posterior, &CladeOracle::new(Metric::BranchScore), &SummaryOptions::default()).unwrap();
        let best = summary.best_tree.as_ref().unwrap();
        assert_eq!(topology_key(best).unwrap(), "(C,(A,B))");
        assert!(summary.best_score.is_finite());
    }

    #[test]
    fn test_render_with_score() {
        let summary = Summary {
            best_tree: Some(Tree::join(Tree::leaf("B"), Tree::leaf("A"), Some(0.5), Some(1.5))),
            best_score: 0.25,
            ..Summary::default()
        };
        let fmt = NewickFormat::default();
        assert_eq!(summary.render(&fmt, true).unwrap(), "[&W 0.25] (A:1.5,B:0.5);");
        assert_eq!(summary.render(&fmt, false).unwrap(), "(A:1.5,B:0.5);");
        assert_eq!(Summary::default().render(&fmt, true).unwrap(), "[&W inf]");

        let noisy = Summary { best_score: 0.1 + 0.2, ..Summary::default() };
        assert_eq!(noisy.render(&fmt, true).unwrap(), "[&W 0.3]");
        assert_eq!(short_score(1.0 / 3.0), "0.333333");
        assert_eq!(short_score(1234.5678), "1234.57");
    }
}

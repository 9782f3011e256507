use std::time::Duration;
use summary_tree::{
    CladeOracle, Diagnostic, Metric, NewickFormat, Selection, SummaryError, SummaryOptions,
    TieOrder, Tree, TreeSource, group_by_topology, summarize, topology_key,
};

const POSTERIOR: &str = "#NEXUS
Begin trees;
\tTranslate
\t\t1 A,
\t\t2 B,
\t\t3 C,
\t\t4 D
\t\t;
tree STATE_0 = [&R] (1:5.0,(2:5.0,(3:5.0,4:5.0):5.0):5.0);
tree STATE_1 = [&R] ((1:1.0,2:1.0):1.0,(3:1.0,4:1.0):1.0);
tree STATE_2 = [&R] ((1:1.2,2:0.8):1.0,(3:1.0,4:1.0):1.0);
tree STATE_3 = [&R] ((2:1.0,1:1.0):0.8,(4:1.2,3:0.8):1.2);
tree STATE_4 = [&R] (1:[&rate=1]2.0,(2:1.0,(3:0.5,4:0.5):0.5):1.0);
tree STATE_5 = [&R] ((3:1.0,4:1.0):1.0,(1:1.0,2:1.0):1.0);
End;
";

fn posterior(burnin_percent: f64) -> Vec<Tree> {
    let source = TreeSource::from_text(POSTERIOR);
    let start = summary_tree::io::burnin_start(source.count_trees(), burnin_percent).unwrap();
    source
        .read_trees(start, None, 1, true)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

#[test]
fn burnin_and_grouping() {
    let trees = posterior(10.0);
    // floor(0.1 * 6) = 0, nothing dropped
    assert_eq!(trees.len(), 6);

    let trees = posterior(20.0);
    assert_eq!(trees.len(), 5);
    let groups = group_by_topology(&trees).unwrap();
    let ranked = groups.ranked();
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].encoding, "((A,B),(C,D))");
    assert_eq!(ranked[0].support(), 4);
    assert_eq!(ranked[1].encoding, "(A,(B,(C,D)))");
}

#[test]
fn top_mode_picks_majority_topology() {
    let trees = posterior(20.0);
    let summary = summarize(&trees, &CladeOracle::new(Metric::BranchScore), &SummaryOptions::default()).unwrap();

    assert_eq!(summary.candidates_tried, 2);
    assert!(!summary.time_limit_reached);
    assert!(summary.diagnostics.is_empty());
    let best = summary.best_tree.as_ref().unwrap();
    assert_eq!(topology_key(best).unwrap(), "((A,B),(C,D))");

    let newick = summary.to_newick(&NewickFormat::fixed(2)).unwrap().unwrap();
    assert!(newick.starts_with("((A:"));
    assert!(newick.ends_with(");"));

    let line = summary.render(&NewickFormat::fixed(2), true).unwrap();
    assert!(line.starts_with("[&W "));
    assert!(line.ends_with(&newick));
}

#[test]
fn summary_is_reproducible() {
    let trees = posterior(0.0);
    let options = SummaryOptions {
        selection: Selection::Timed {
            limit: Duration::from_secs(600),
            ties: TieOrder::Shuffled { seed: 11 },
        },
        matching_only: false,
    };
    let oracle = CladeOracle::default();
    let fmt = NewickFormat::default();

    let first = summarize(&trees, &oracle, &options).unwrap();
    let second = summarize(&trees, &oracle, &options).unwrap();
    assert_eq!(first.render(&fmt, true).unwrap(), second.render(&fmt, true).unwrap());
    assert_eq!(first.candidates_tried, 2);
}

#[test]
fn targets_with_matching_trees() {
    let trees = posterior(20.0);
    let options = SummaryOptions {
        selection: Selection::Targets(vec![
            Tree::from_newick("(((A,B),C),D);").unwrap(),
            Tree::from_newick("(A,(B,(D,C)));").unwrap(),
        ]),
        matching_only: true,
    };
    let summary = summarize(&trees, &CladeOracle::default(), &options).unwrap();

    // A single matching tree: its own mean lengths fit it exactly.
    assert_eq!(summary.candidates_tried, 1);
    assert_eq!(summary.best_score, 0.0);
    assert_eq!(
        summary.diagnostics,
        vec![Diagnostic::NoMatchingTrees { topology: "(D,(C,(A,B)))".to_owned() }]
    );
    let best = summary.best_tree.unwrap();
    assert_eq!(
        summary_tree::to_newick(&best, &NewickFormat::default()).unwrap(),
        "(A:2,(B:1,(C:0.5,D:0.5):0.5):1);"
    );
}

#[test]
fn empty_sample_after_burnin() {
    let trees = posterior(100.0);
    assert!(trees.is_empty());
    let err = summarize(&trees, &CladeOracle::default(), &SummaryOptions::default()).unwrap_err();
    assert!(matches!(err, SummaryError::EmptySample));
}

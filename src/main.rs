use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use summary_tree::canonical::NewickFormat;
use summary_tree::distances::{CladeOracle, Metric};
use summary_tree::error::SummaryError;
use summary_tree::io::{read_posterior, write_summary};
use summary_tree::summary::{Selection, SummaryOptions, TieOrder, summarize};
use summary_tree::tree::Tree;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

/// Find the summary tree of a posterior tree sample: the sampled topology
/// whose best branch lengths are closest, on average, to all posterior trees.
#[derive(Parser, Debug)]
#[command(name = "summary-tree", version, about = "Summary tree of a posterior tree sample")]
struct Args {
    /// NEXUS (BEAST) or Newick tree file, optionally gzip-compressed
    input: PathBuf,

    /// Burn-in: percentage of trees dropped from the start of the file
    #[arg(short = 'b', long = "burnin", default_value_t = 10.0)]
    burnin: f64,

    /// Thin out: keep one tree out of every N
    #[arg(short = 'e', long = "every", default_value_t = 1)]
    every: usize,

    /// Number of best supported topologies to try
    #[arg(short = 'n', long = "ntops", default_value_t = 10)]
    ntops: usize,

    /// Try topologies by descending support for this many seconds (<= 0: use --ntops)
    #[arg(short = 'l', long = "limit", default_value_t = -1.0, allow_negative_numbers = true)]
    limit: f64,

    /// Score only this topology (Newick); repeat to score several
    #[arg(short = 't', long = "topology")]
    topologies: Vec<String>,

    /// Score each topology only against the posterior trees sharing it
    #[arg(long = "matching", default_value_t = false)]
    matching: bool,

    /// Prefix the tree with its score as a [&W score] annotation
    #[arg(long = "score", default_value_t = false)]
    score: bool,

    /// Report progress on stderr
    #[arg(short = 'p', long = "progress", default_value_t = false)]
    progress: bool,

    /// Shuffle equally supported topologies in timed mode, with this seed
    #[arg(long = "seed")]
    seed: Option<u64>,

    /// Fixed number of decimals for branch lengths
    #[arg(long = "precision")]
    precision: Option<usize>,

    /// Keep numeric taxon ids instead of applying the TRANSLATE block
    #[arg(long = "numeric-taxa", default_value_t = false)]
    numeric_taxa: bool,

    /// Distance between the candidate and the posterior trees
    #[arg(long = "metric", value_enum, default_value_t = MetricArg::BranchScore)]
    metric: MetricArg,

    /// Output path (default stdout); a .gz suffix compresses
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum MetricArg {
    BranchScore,
    Rf,
}

impl From<MetricArg> for Metric {
    fn from(arg: MetricArg) -> Self {
        match arg {
            MetricArg::BranchScore => Metric::BranchScore,
            MetricArg::Rf => Metric::RobinsonFoulds,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    install_tracing(if args.progress { "info" } else { "warn" });

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn exit_code(err: &SummaryError) -> u8 {
    match err {
        SummaryError::Parse { .. } | SummaryError::Io(_) => 2,
        SummaryError::EmptySample => 3,
        _ => 1,
    }
}

/// `RUST_LOG` wins over the level picked from the flags.
fn install_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .with_ansi(false)
        .init();
}

/// Flag combinations that are accepted but probably not what was meant.
fn option_warnings(args: &Args) -> Vec<&'static str> {
    let mut warnings = Vec::new();
    if args.matching && args.topologies.is_empty() {
        warnings.push("using --matching without --topology is dubious");
    }
    if args.limit > 0.0 && !args.topologies.is_empty() {
        warnings.push("--limit is ignored when topologies are given");
    }
    warnings
}

fn selection(args: &Args) -> Result<Selection, SummaryError> {
    if !args.topologies.is_empty() {
        let targets = args
            .topologies
            .iter()
            .enumerate()
            .map(|(index, newick)| {
                Tree::from_newick(newick).map_err(|e| match e {
                    SummaryError::Parse { message, .. } => SummaryError::Parse { index, message },
                    other => other,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Selection::Targets(targets));
    }

    if args.limit > 0.0 {
        let limit = Duration::try_from_secs_f64(args.limit)
            .map_err(|e| SummaryError::InvalidOption(format!("--limit {}: {e}", args.limit)))?;
        let ties = args.seed.map_or(TieOrder::Stable, |seed| TieOrder::Shuffled { seed });
        return Ok(Selection::Timed { limit, ties });
    }

    Ok(Selection::Top { ntops: args.ntops })
}

fn run(args: &Args) -> Result<(), SummaryError> {
    if args.every == 0 {
        return Err(SummaryError::InvalidOption("--every must be at least 1".to_owned()));
    }
    for warning in option_warnings(args) {
        warn!("{warning}");
    }
    let options = SummaryOptions {
        selection: selection(args)?,
        matching_only: args.matching,
    };

    let t0 = Instant::now();
    let posterior = read_posterior(&args.input, args.burnin, args.every, !args.numeric_taxa)?;
    info!(
        trees = posterior.len(),
        seconds = format_args!("{:.3}", t0.elapsed().as_secs_f64()),
        "read posterior sample"
    );

    let oracle = CladeOracle::new(args.metric.into());
    let summary = summarize(&posterior, &oracle, &options)?;
    if summary.best_tree.is_none() {
        warn!("no candidate topology could be scored");
    }

    let format = NewickFormat { precision: args.precision };
    let line = summary.render(&format, args.score)?;
    write_summary(args.output.as_deref(), &line)?;
    info!(
        seconds = format_args!("{:.3}", summary.elapsed.as_secs_f64()),
        "summary written"
    );
    Ok(())
}

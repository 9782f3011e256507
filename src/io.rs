//! Reading posterior tree samples and writing the summary tree.
//!
//! Input is either a NEXUS file as written by BEAST (a `trees` block with an
//! optional `translate` table and `[&...]` annotations) or plain Newick text
//! with one or more `;`-terminated trees. Files may be gzip-compressed; this
//! is detected from the content, not the file name.

use crate::error::SummaryError;
use crate::tree::Tree;
use itertools::Itertools;
use phylotree::tree::Tree as PhyloTree;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, info};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Strip BEAST annotations from Newick strings.
///
/// BEAST format includes annotations like :[&rate=0.123]2.45 where 2.45 is the actual branch length.
/// This function removes the [&...] annotations while preserving the branch lengths.
fn strip_beast_annotations(newick: &str) -> String {
    let mut result = String::with_capacity(newick.len());
    let mut in_annotation = false;
    let mut chars = newick.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '[' && chars.peek() == Some(&'&') {
            in_annotation = true;
        } else if ch == ']' && in_annotation {
            in_annotation = false;
        } else if !in_annotation {
            result.push(ch);
        }
    }

    result
}

fn is_nexus(content: &str) -> bool {
    content
        .trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("#NEXUS"))
}

/// Tree bodies of a NEXUS `trees` block, in file order.
fn collect_tree_blocks(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .skip_while(|line| !line.to_ascii_uppercase().starts_with("TREE "))
        .take_while(|line| !line.to_ascii_uppercase().starts_with("END;"))
        // Header annotations such as `[&lnP=-1234.5]` may contain `=` too.
        .filter_map(|line| {
            let line = strip_beast_annotations(line);
            let (_header, body) = line.split_once('=')?;
            Some(body.trim().to_owned())
        })
        .collect()
}

/// Trees of plain Newick text, one per `;`.
fn collect_newick(content: &str) -> Vec<String> {
    strip_beast_annotations(content)
        .split(';')
        .map(str::trim)
        .filter(|body| !body.is_empty())
        .map(|body| format!("{body};"))
        .collect()
}

fn parse_taxon_block(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .skip_while(|line| !line.trim().to_ascii_uppercase().starts_with("TRANSLATE"))
        .skip(1)
        .take_while_inclusive(|line| !line.trim_end().ends_with(';'))
        // STRUCTURE:
        // 1 '1959.M.CD.59.ZR59',
        // 2 '1960.DRC60A',
        .filter_map(|line| {
            let line = line.trim().trim_end_matches([',', ';']);
            let (id, label) = line.split_once(char::is_whitespace)?;
            Some((id.to_owned(), label.trim().trim_matches('\'').to_owned()))
        })
        .collect()
}

/// Replaces translated leaf names; names missing from the table are kept.
fn rename_leaf_nodes(phylo_tree: &mut PhyloTree, translate: &HashMap<String, String>) {
    for leaf_id in phylo_tree.get_leaves() {
        if let Ok(node) = phylo_tree.get_mut(&leaf_id) {
            if let Some(label) = node.name.as_ref().and_then(|n| translate.get(n)) {
                node.name = Some(label.clone());
            }
        }
    }
}

/// The trees of one posterior sample file, kept as text until read.
#[derive(Debug, Clone, Default)]
pub struct TreeSource {
    bodies: Vec<String>,
    translate: HashMap<String, String>,
}

impl TreeSource {
    /// Loads a NEXUS or Newick file, gzip-compressed or not.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SummaryError> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let content = if bytes.starts_with(&GZIP_MAGIC) {
            let mut text = String::new();
            GzDecoder::new(bytes.as_slice()).read_to_string(&mut text)?;
            text
        } else {
            String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
        };
        let source = Self::from_text(&content);
        debug!(path = %path.display(), trees = source.count_trees(), "loaded tree source");
        Ok(source)
    }

    pub fn from_text(content: &str) -> Self {
        if is_nexus(content) {
            TreeSource {
                bodies: collect_tree_blocks(content),
                translate: parse_taxon_block(content),
            }
        } else {
            TreeSource {
                bodies: collect_newick(content),
                translate: HashMap::new(),
            }
        }
    }

    /// Number of trees in the source, without parsing them.
    pub fn count_trees(&self) -> usize {
        self.bodies.len()
    }

    /// The `translate` table of a NEXUS source (empty for plain Newick).
    pub fn translate(&self) -> &HashMap<String, String> {
        &self.translate
    }

    fn parse(&self, index: usize, body: &str, use_real_taxa: bool) -> Result<Tree, SummaryError> {
        let mut phylo_tree = PhyloTree::from_newick(body).map_err(|e| SummaryError::Parse {
            index,
            message: e.to_string(),
        })?;
        if use_real_taxa && !self.translate.is_empty() {
            rename_leaf_nodes(&mut phylo_tree, &self.translate);
        }
        Tree::from_phylo(&phylo_tree).map_err(|e| match e {
            SummaryError::MalformedTree(message) => SummaryError::Parse { index, message },
            other => other,
        })
    }

    /// Lazily parses trees `start, start + stride, ...` before `stop` (to the
    /// end when `None`). Errors carry the tree's position in the file.
    ///
    /// # Errors
    /// [`SummaryError::InvalidOption`] if `stride` is 0.
    pub fn read_trees(
        &self,
        start: usize,
        stop: Option<usize>,
        stride: usize,
        use_real_taxa: bool,
    ) -> Result<impl Iterator<Item = Result<Tree, SummaryError>> + '_, SummaryError> {
        if stride == 0 {
            return Err(SummaryError::InvalidOption("stride must be at least 1".to_owned()));
        }
        let stop = stop.unwrap_or(self.bodies.len()).min(self.bodies.len());
        Ok(self
            .bodies
            .iter()
            .enumerate()
            .take(stop)
            .skip(start)
            .step_by(stride)
            .map(move |(index, body)| self.parse(index, body, use_real_taxa)))
    }
}

/// Index of the first tree kept after discarding `percent` % of `n` trees.
pub fn burnin_start(n: usize, percent: f64) -> Result<usize, SummaryError> {
    if !(0.0..=100.0).contains(&percent) {
        return Err(SummaryError::InvalidOption(format!(
            "burn-in must be a percentage between 0 and 100, got {percent}"
        )));
    }
    Ok(((percent / 100.0) * n as f64).floor() as usize)
}

/// Reads the posterior sample of a file after burn-in and thinning.
pub fn read_posterior<P: AsRef<Path>>(
    path: P,
    burnin_percent: f64,
    every: usize,
    use_real_taxa: bool,
) -> Result<Vec<Tree>, SummaryError> {
    let path = path.as_ref();
    info!(path = %path.display(), "counting trees");
    let source = TreeSource::from_path(path)?;
    let n = source.count_trees();
    let start = burnin_start(n, burnin_percent)?;
    info!(
        total = n,
        reading = n.saturating_sub(start).div_ceil(every.max(1)),
        "reading trees"
    );
    source.read_trees(start, None, every, use_real_taxa)?.collect()
}

/// Write the summary line to a file or stdout.
/// If `path` ends with `.gz`, the output is gzip-compressed.
/// If `path` is `None` or `-`, the line is written to stdout (uncompressed).
pub fn write_summary(path: Option<&Path>, line: &str) -> io::Result<()> {
    let mut out: Box<dyn Write> = match path {
        None => Box::new(BufWriter::new(io::stdout().lock())),
        Some(p) if p.as_os_str() == "-" => Box::new(BufWriter::new(io::stdout().lock())),
        Some(p) if p.to_string_lossy().ends_with(".gz") => {
            let enc = GzEncoder::new(File::create(p)?, Compression::default());
            Box::new(BufWriter::new(enc))
        }
        Some(p) => Box::new(BufWriter::new(File::create(p)?)),
    };

    writeln!(&mut out, "{line}")?;
    out.flush()?;
    Ok(())
}

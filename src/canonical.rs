//! Canonical Newick encoding.
//!
//! # Overview
//! Two trees with the same rooted topology can be written in many ways,
//! because each internal node may list its two children in either order.
//! The canonical encoding removes that freedom: every subtree is encoded
//! bottom-up and the two child encodings are sorted before they are joined.
//!
//! ```text
//! (A,(B,C))   ((C,B),A)   ((B,C),A)   →   all encode to  (A,(B,C))
//! ```
//!
//! # Child order
//! Child encodings are compared character by character, with the Newick
//! delimiters `( ) , :` ranked after every label character. A bare taxon
//! therefore sorts before any parenthesised subtree, and the encoding reads
//! like the conventional `(A,(B,C))`. Any fixed total order gives a canonical
//! form; this one is just easier to read.
//!
//! # Branch lengths
//! The full encoding appends `:length` to each child *before* the sort, so a
//! child's length takes part in the ordering. The root never gets a length. Formatting is controlled by [`NewickFormat`].

use crate::error::SummaryError;
use crate::tree::{BranchLength, Node, Tree};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt::Write;

/// Characters a taxon label may not contain.
const RESERVED: &[char] = &['(', ')', ',', ':', ';', '[', ']'];

/// Branch length formatting for the full encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NewickFormat {
    /// Fixed number of decimals, or `None` for the shortest text that parses
    /// back to the same `f64`.
    pub precision: Option<usize>,
}

impl NewickFormat {
    pub fn fixed(precision: usize) -> Self {
        NewickFormat { precision: Some(precision) }
    }

    fn write_length(&self, out: &mut String, length: BranchLength) {
        // Writing into a String cannot fail.
        let _ = match self.precision {
            Some(precision) => write!(out, ":{length:.precision$}"),
            None => write!(out, ":{length}"),
        };
    }
}

fn is_delimiter(c: char) -> bool {
    matches!(c, '(' | ')' | ',' | ':')
}

/// Order used between the two child encodings of a node.
pub fn canonical_order(a: &str, b: &str) -> Ordering {
    let key = |c: char| (is_delimiter(c), c);
    a.chars().map(key).cmp(b.chars().map(key))
}

fn check_label<'a>(taxon: &'a str, seen: &mut HashSet<&'a str>) -> Result<(), SummaryError> {
    if taxon.is_empty() {
        return Err(SummaryError::malformed("empty taxon label"));
    }
    if taxon.contains(RESERVED) {
        return Err(SummaryError::malformed(format!(
            "taxon label '{taxon}' contains a Newick delimiter"
        )));
    }
    if !seen.insert(taxon) {
        return Err(SummaryError::malformed(format!("duplicate taxon '{taxon}'")));
    }
    Ok(())
}

/// Encodes `tree` canonically.
///
/// With `topology_only` the result identifies the rooted topology over the
/// taxon set: two trees encode equally iff they share the same clades.
///
/// # Errors
/// Returns [`SummaryError::MalformedTree`] for empty labels, labels containing
/// Newick delimiters, and duplicate labels.
pub fn encode(tree: &Tree, topology_only: bool, format: &NewickFormat) -> Result<String, SummaryError> {
    let mut seen = HashSet::new();
    let mut pending: Vec<String> = Vec::new();

    for v in tree.postorder() {
        let mut rep = match v.node {
            Node::Leaf(taxon) => {
                check_label(taxon, &mut seen)?;
                taxon.clone()
            }
            Node::Internal(_) => {
                let (Some(b), Some(a)) = (pending.pop(), pending.pop()) else {
                    return Err(SummaryError::malformed("internal node without two children"));
                };
                let (first, second) = match canonical_order(&a, &b) {
                    Ordering::Greater => (b, a),
                    _ => (a, b),
                };
                let mut rep = String::with_capacity(first.len() + second.len() + 3);
                rep.push('(');
                rep.push_str(&first);
                rep.push(',');
                rep.push_str(&second);
                rep.push(')');
                rep
            }
        };
        if !topology_only && !v.is_root() {
            if let Some(length) = v.branch_length {
                format.write_length(&mut rep, length);
            }
        }
        pending.push(rep);
    }

    pending
        .pop()
        .ok_or_else(|| SummaryError::malformed("empty tree"))
}

/// Topology-only encoding, the key used to group posterior trees.
pub fn topology_key(tree: &Tree) -> Result<String, SummaryError> {
    encode(tree, true, &NewickFormat::default())
}

/// Full canonical Newick text terminated by `;`.
pub fn to_newick(tree: &Tree, format: &NewickFormat) -> Result<String, SummaryError> {
    let mut newick = encode(tree, false, format)?;
    newick.push(';');
    Ok(newick)
}

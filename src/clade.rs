//! Clade extraction.
//!
//! # Overview
//! The clade of an internal node is the set of taxa below it. Clades are
//! computed bottom-up: a leaf contributes its own taxon, an internal node the
//! union of its two children's clades. With unique taxa the two children's
//! clades are always disjoint; overlapping children mean a taxon occurs twice.
//!
//! # CRITICAL: taxon NAMES map to bits, not node positions
//! A [`TaxonIndex`] sorts taxa alphabetically, so the same taxon always maps
//! to the same bit in every tree built over the same taxon set. This is what
//! makes clades of different posterior trees comparable.

use crate::bitset::Bitset;
use crate::error::SummaryError;
use crate::tree::{BranchLength, Node, Tree, Visit};
use std::collections::{BTreeSet, HashMap};

/// Taxon name → bit position, in alphabetical order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonIndex {
    taxa: Vec<String>,
    positions: HashMap<String, usize>,
}

impl TaxonIndex {
    fn from_sorted(taxa: Vec<String>) -> Self {
        let positions = taxa
            .iter()
            .enumerate()
            .map(|(idx, taxon)| (taxon.clone(), idx))
            .collect();
        TaxonIndex { taxa, positions }
    }

    /// Index over the leaves of a single tree.
    ///
    /// # Errors
    /// Returns [`SummaryError::MalformedTree`] if two leaves share a label.
    pub fn from_tree(tree: &Tree) -> Result<Self, SummaryError> {
        let mut taxa: Vec<String> = tree.leaves().map(str::to_owned).collect();
        taxa.sort_unstable();
        if let Some(pair) = taxa.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(SummaryError::malformed(format!("duplicate taxon '{}'", pair[0])));
        }
        Ok(Self::from_sorted(taxa))
    }

    /// Index over the union of the taxa of several trees.
    pub fn from_trees<'a>(trees: impl IntoIterator<Item = &'a Tree>) -> Self {
        let taxa: BTreeSet<&str> = trees.into_iter().flat_map(|tree| tree.leaves()).collect();
        Self::from_sorted(taxa.into_iter().map(str::to_owned).collect())
    }

    pub fn len(&self) -> usize {
        self.taxa.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taxa.is_empty()
    }

    /// Number of u64 words a clade bitset over this index needs.
    pub fn words(&self) -> usize {
        self.taxa.len().div_ceil(64).max(1)
    }

    pub fn position(&self, taxon: &str) -> Option<usize> {
        self.positions.get(taxon).copied()
    }

    /// Taxon names of a clade, alphabetically.
    pub fn names<'s>(&'s self, clade: &'s Bitset) -> impl Iterator<Item = &'s str> + 's {
        clade.ones().filter_map(|idx| self.taxa.get(idx).map(String::as_str))
    }

    fn leaf_set(&self, taxon: &str) -> Result<Bitset, SummaryError> {
        let idx = self.position(taxon).ok_or_else(|| {
            SummaryError::malformed(format!("taxon '{taxon}' is not in the taxon index"))
        })?;
        Ok(Bitset::singleton(self.words(), idx))
    }
}

/// The taxa below one internal node.
#[derive(Debug, Clone)]
pub struct Clade<'a> {
    pub taxa: Bitset,
    pub node: &'a Node,
}

/// Post-order walk handing every node its clade bitset.
///
/// Keeps a stack of child clades instead of recursing: in post-order the two
/// children of an internal node are always the top two entries.
fn walk<'a>(
    tree: &'a Tree,
    index: &TaxonIndex,
    mut visit: impl FnMut(Visit<'a>, &Bitset),
) -> Result<(), SummaryError> {
    let mut pending: Vec<Bitset> = Vec::new();
    for v in tree.postorder() {
        let taxa = match v.node {
            Node::Leaf(taxon) => index.leaf_set(taxon)?,
            Node::Internal(_) => {
                let (Some(right), Some(mut left)) = (pending.pop(), pending.pop()) else {
                    return Err(SummaryError::malformed("internal node without two children"));
                };
                if !left.is_disjoint(&right) {
                    return Err(SummaryError::malformed("a taxon appears in both subtrees of a node"));
                }
                left.or_assign(&right);
                left
            }
        };
        visit(v, &taxa);
        pending.push(taxa);
    }
    Ok(())
}

/// Clades of every internal node, children before parents.
///
/// A single-leaf tree has no internal node and yields an empty vector.
///
/// # Errors
/// Returns [`SummaryError::MalformedTree`] if a taxon is missing from `index`
/// or occurs twice in `tree`.
pub fn clades_of<'a>(tree: &'a Tree, index: &TaxonIndex) -> Result<Vec<Clade<'a>>, SummaryError> {
    let mut clades = Vec::new();
    walk(tree, index, |v, taxa| {
        if !v.node.is_leaf() {
            clades.push(Clade { taxa: taxa.clone(), node: v.node });
        }
    })?;
    Ok(clades)
}

/// Branch length above every non-root node, keyed by the node's clade.
///
/// Leaves are included (their clade is a single taxon). Missing lengths are
/// treated as 0.0.
pub type CladeLengths = HashMap<Bitset, BranchLength>;

pub fn clade_lengths(tree: &Tree, index: &TaxonIndex) -> Result<CladeLengths, SummaryError> {
    let mut lengths = CladeLengths::new();
    walk(tree, index, |v, taxa| {
        if !v.is_root() {
            lengths.insert(taxa.clone(), v.branch_length.unwrap_or(0.0));
        }
    })?;
    Ok(lengths)
}

/// Copy of `tree` with the same topology, taking each edge length from
/// `lengths` by clade. Clades without an entry get no length.
pub fn with_clade_lengths(
    tree: &Tree,
    index: &TaxonIndex,
    lengths: &CladeLengths,
) -> Result<Tree, SummaryError> {
    let mut built: Vec<(Node, Bitset)> = Vec::new();
    let mut failed = None;
    walk(tree, index, |v, taxa| {
        let node = match v.node {
            Node::Leaf(taxon) => Node::leaf(taxon.clone()),
            Node::Internal(_) => match (built.pop(), built.pop()) {
                (Some((right, right_taxa)), Some((left, left_taxa))) => Node::internal(
                    left,
                    right,
                    lengths.get(&left_taxa).copied(),
                    lengths.get(&right_taxa).copied(),
                ),
                _ => {
                    failed.get_or_insert_with(|| {
                        SummaryError::malformed("internal node without two children")
                    });
                    return;
                }
            },
        };
        built.push((node, taxa.clone()));
    })?;
    if let Some(err) = failed {
        return Err(err);
    }
    match built.pop() {
        Some((root, _)) if built.is_empty() => Ok(Tree::new(root)),
        _ => Err(SummaryError::malformed("tree has no single root")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// ```text
    ///              root
    ///             /    \
    ///         node1     E
    ///         /   \
    ///     node2    D
    ///     /   \
    ///    A    node3
    ///         /   \
    ///        B     C
    /// ```
    fn asymmetric() -> Tree {
        let bc = Tree::join(Tree::leaf("B"), Tree::leaf("C"), Some(0.1), Some(0.1));
        let abc = Tree::join(Tree::leaf("A"), bc, Some(0.2), Some(0.3));
        let abcd = Tree::join(abc, Tree::leaf("D"), Some(0.4), Some(0.5));
        Tree::join(abcd, Tree::leaf("E"), Some(0.6), Some(0.7))
    }

    fn names(index: &TaxonIndex, clade: &Bitset) -> Vec<String> {
        index.names(clade).map(str::to_owned).collect()
    }

    #[test]
    fn test_clades_are_post_order() {
        let tree = asymmetric();
        let index = TaxonIndex::from_tree(&tree).unwrap();
        let clades = clades_of(&tree, &index).unwrap();

        let listed: Vec<_> = clades.iter().map(|c| names(&index, &c.taxa).concat()).collect();
        assert_eq!(listed, vec!["BC", "ABC", "ABCD", "ABCDE"]);
        assert!(std::ptr::eq(clades.last().unwrap().node, tree.root()));
    }

    #[test]
    fn test_clade_union_invariant() {
        let tree = asymmetric();
        let index = TaxonIndex::from_tree(&tree).unwrap();
        let clades = clades_of(&tree, &index).unwrap();

        for clade in &clades {
            let children = clade.node.children().unwrap();
            let child_set = |child: &crate::tree::Child| match child.node() {
                Node::Leaf(taxon) => index.leaf_set(taxon).unwrap(),
                node => clades.iter().find(|c| std::ptr::eq(c.node, node)).unwrap().taxa.clone(),
            };
            let left = child_set(&children[0]);
            let right = child_set(&children[1]);
            assert!(left.is_disjoint(&right));
            let mut union = left.clone();
            union.or_assign(&right);
            assert_eq!(union, clade.taxa);
        }
    }

    #[test]
    fn test_single_leaf_has_no_clades() {
        let tree = Tree::leaf("A");
        let index = TaxonIndex::from_tree(&tree).unwrap();
        assert!(clades_of(&tree, &index).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_taxa_rejected() {
        let tree = Tree::join(Tree::leaf("A"), Tree::leaf("A"), None, None);
        assert!(matches!(TaxonIndex::from_tree(&tree), Err(SummaryError::MalformedTree(_))));

        let index = TaxonIndex::from_trees([&tree]);
        assert!(matches!(clades_of(&tree, &index), Err(SummaryError::MalformedTree(_))));
    }

    #[test]
    fn test_index_is_alphabetical_across_trees() {
        let t1 = Tree::join(Tree::leaf("Human"), Tree::leaf("Chimp"), None, None);
        let t2 = Tree::join(Tree::leaf("Gorilla"), Tree::leaf("Chimp"), None, None);
        let index = TaxonIndex::from_trees([&t1, &t2]);
        assert_eq!(index.len(), 3);
        assert_eq!(index.position("Chimp"), Some(0));
        assert_eq!(index.position("Gorilla"), Some(1));
        assert_eq!(index.position("Human"), Some(2));
    }

    #[test]
    fn test_clade_lengths_skip_root() {
        let tree = asymmetric();
        let index = TaxonIndex::from_tree(&tree).unwrap();
        let lengths = clade_lengths(&tree, &index).unwrap();
        // 5 leaves + 3 non-root internal nodes
        assert_eq!(lengths.len(), 8);

        let mut bc = Bitset::singleton(index.words(), 1);
        bc.set(2);
        assert_eq!(lengths[&bc], 0.3);
    }

    #[test]
    fn test_with_clade_lengths_keeps_topology() {
        let tree = asymmetric();
        let index = TaxonIndex::from_tree(&tree).unwrap();
        let doubled: CladeLengths = clade_lengths(&tree, &index)
            .unwrap()
            .into_iter()
            .map(|(clade, length)| (clade, length * 2.0))
            .collect();

        let rebuilt = with_clade_lengths(&tree, &index, &doubled).unwrap();
        assert_eq!(rebuilt.leaves().collect::<Vec<_>>(), tree.leaves().collect::<Vec<_>>());
        let before: Vec<_> = tree.postorder().filter_map(|v| v.branch_length).collect();
        let after: Vec<_> = rebuilt.postorder().filter_map(|v| v.branch_length).collect();
        assert_eq!(after, before.iter().map(|l| l * 2.0).collect::<Vec<_>>());
    }
}

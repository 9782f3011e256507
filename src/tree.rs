//! Rooted binary tree model.
//!
//! # Overview
//! A [`Tree`] owns a single root [`Node`]. Every node is either a leaf carrying
//! a taxon label or an internal node owning exactly two [`Child`] edges. A
//! child edge holds the subtree and the (optional) branch length leading to it
//! from its parent; the root has no incoming edge, so it has no length.
//!
//! ```text
//!            root
//!           /    \
//!     0.3  /      \  (none)
//!         A      node1
//!               /     \
//!         0.1  /       \  0.2
//!             B         C
//! ```
//!
//! Children are moved into their parent on construction, so a subtree can
//! never hang under two parents. Once built a tree is only handed out by
//! shared reference: there is no API that rewires children or relabels leaves.
//!
//! # Traversal
//! [`Tree::preorder`], [`Tree::postorder`] and [`Tree::leaves`] are lazy
//! iterators driven by an explicit stack, so deep caterpillar trees with
//! thousands of taxa do not hit the recursion limit. Each call starts a fresh
//! traversal.

use crate::error::SummaryError;
use phylotree::tree::Tree as PhyloTree;
use std::collections::HashMap;
use std::mem;

/// Label of a leaf.
pub type Taxon = String;

/// Evolutionary distance from a node to its parent.
pub type BranchLength = f64;

/// A node of a rooted binary tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(Taxon),
    Internal(Box<[Child; 2]>),
}

/// Edge from a parent to one of its two children.
#[derive(Debug, Clone, PartialEq)]
pub struct Child {
    node: Node,
    branch_length: Option<BranchLength>,
}

impl Child {
    pub fn new(node: Node, branch_length: Option<BranchLength>) -> Self {
        Child { node, branch_length }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn branch_length(&self) -> Option<BranchLength> {
        self.branch_length
    }
}

impl Node {
    pub fn leaf(taxon: impl Into<Taxon>) -> Self {
        Node::Leaf(taxon.into())
    }

    /// Joins two subtrees under a new internal node, taking ownership of both.
    pub fn internal(
        left: Node,
        right: Node,
        left_length: Option<BranchLength>,
        right_length: Option<BranchLength>,
    ) -> Self {
        Node::Internal(Box::new([
            Child::new(left, left_length),
            Child::new(right, right_length),
        ]))
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    pub fn taxon(&self) -> Option<&str> {
        match self {
            Node::Leaf(taxon) => Some(taxon),
            Node::Internal(_) => None,
        }
    }

    pub fn children(&self) -> Option<&[Child; 2]> {
        match self {
            Node::Leaf(_) => None,
            Node::Internal(children) => Some(children),
        }
    }
}

/// A node reached during traversal, together with its incoming edge.
#[derive(Debug, Clone, Copy)]
pub struct Visit<'a> {
    pub node: &'a Node,
    /// Length of the edge above `node`; always `None` for the root.
    pub branch_length: Option<BranchLength>,
    /// Number of edges between `node` and the root.
    pub depth: usize,
}

impl<'a> Visit<'a> {
    fn root(node: &'a Node) -> Self {
        Visit { node, branch_length: None, depth: 0 }
    }

    fn child(child: &'a Child, depth: usize) -> Self {
        Visit { node: &child.node, branch_length: child.branch_length, depth }
    }

    pub fn is_root(&self) -> bool {
        self.depth == 0
    }
}

/// A rooted binary phylogenetic tree.
///
/// `Clone`, `PartialEq` and `Drop` walk the tree with an explicit stack.
/// [`Node`]'s own derived impls (and `Debug`) still recurse once per level.
#[derive(Debug)]
pub struct Tree {
    root: Node,
}

impl Tree {
    pub fn new(root: Node) -> Self {
        Tree { root }
    }

    /// Degenerate single-taxon tree.
    pub fn leaf(taxon: impl Into<Taxon>) -> Self {
        Tree::new(Node::leaf(taxon))
    }

    /// Joins two trees under a new root.
    pub fn join(
        left: Tree,
        right: Tree,
        left_length: Option<BranchLength>,
        right_length: Option<BranchLength>,
    ) -> Self {
        Tree::new(Node::internal(left.take_root(), right.take_root(), left_length, right_length))
    }

    fn take_root(mut self) -> Node {
        mem::replace(&mut self.root, Node::Leaf(Taxon::new()))
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn preorder(&self) -> Preorder<'_> {
        Preorder { stack: vec![Visit::root(&self.root)] }
    }

    pub fn postorder(&self) -> Postorder<'_> {
        Postorder { stack: vec![(Visit::root(&self.root), false)] }
    }

    /// Taxon labels, left to right.
    pub fn leaves(&self) -> impl Iterator<Item = &str> + '_ {
        self.preorder().filter_map(|visit| visit.node.taxon())
    }

    pub fn num_leaves(&self) -> usize {
        self.leaves().count()
    }

    /// Converts a parsed `phylotree` tree.
    ///
    /// # Errors
    /// Returns [`SummaryError::MalformedTree`] for unnamed leaves, nodes with
    /// one or more than two children (this includes unrooted trees written
    /// with a trifurcating root), and negative or non-finite branch lengths.
    pub fn from_phylo(tree: &PhyloTree) -> Result<Self, SummaryError> {
        let root_id = tree
            .get_root()
            .map_err(|e| SummaryError::malformed(e.to_string()))?;

        // Bottom-up over node ids; children are moved out of `built` into their parent.
        let mut built: HashMap<usize, Child> = HashMap::new();
        let mut stack = vec![(root_id, false)];
        while let Some((node_id, expanded)) = stack.pop() {
            let node = tree
                .get(&node_id)
                .map_err(|e| SummaryError::malformed(e.to_string()))?;

            if !expanded && !node.children.is_empty() {
                stack.push((node_id, true));
                stack.extend(node.children.iter().map(|&child_id| (child_id, false)));
                continue;
            }

            let subtree = match node.children.as_slice() {
                [] => {
                    let taxon = node
                        .name
                        .clone()
                        .filter(|name| !name.is_empty())
                        .ok_or_else(|| {
                            SummaryError::malformed(format!("leaf {node_id} has no taxon label"))
                        })?;
                    Node::Leaf(taxon)
                }
                [left, right] => {
                    let mut take = |id: &usize| {
                        built.remove(id).ok_or_else(|| {
                            SummaryError::malformed(format!("node {id} is reachable twice"))
                        })
                    };
                    let left = take(left)?;
                    let right = take(right)?;
                    Node::Internal(Box::new([left, right]))
                }
                other => {
                    return Err(SummaryError::malformed(format!(
                        "node {node_id} has {} children, only binary trees are supported",
                        other.len()
                    )));
                }
            };

            let length = match node.parent_edge {
                Some(length) if !length.is_finite() || length < 0.0 => {
                    return Err(SummaryError::malformed(format!(
                        "node {node_id} has invalid branch length {length}"
                    )));
                }
                length => length,
            };
            built.insert(node_id, Child::new(subtree, length));
        }

        let root = built
            .remove(&root_id)
            .ok_or_else(|| SummaryError::malformed("root was never built"))?;
        Ok(Tree::new(root.node))
    }

    /// Parses a single Newick string; the trailing `;` is optional.
    pub fn from_newick(newick: &str) -> Result<Self, SummaryError> {
        let newick = newick.trim();
        let parsed = if newick.ends_with(';') {
            PhyloTree::from_newick(newick)
        } else {
            PhyloTree::from_newick(&format!("{newick};"))
        };
        let parsed = parsed.map_err(|e| SummaryError::Parse { index: 0, message: e.to_string() })?;
        Tree::from_phylo(&parsed)
    }
}

impl Drop for Tree {
    fn drop(&mut self) {
        let mut stack = vec![mem::replace(&mut self.root, Node::Leaf(Taxon::new()))];
        while let Some(node) = stack.pop() {
            if let Node::Internal(children) = node {
                let [left, right] = *children;
                stack.push(left.node);
                stack.push(right.node);
            }
        }
    }
}

impl Clone for Tree {
    fn clone(&self) -> Self {
        let mut built: Vec<Node> = Vec::new();
        for v in self.postorder() {
            let node = match v.node {
                Node::Leaf(taxon) => Node::Leaf(taxon.clone()),
                Node::Internal(children) => match (built.pop(), built.pop()) {
                    (Some(right), Some(left)) => Node::internal(
                        left,
                        right,
                        children[0].branch_length,
                        children[1].branch_length,
                    ),
                    _ => unreachable!("post-order yields both children before their parent"),
                },
            };
            built.push(node);
        }
        match built.pop() {
            Some(root) => Tree::new(root),
            None => unreachable!("post-order always yields the root"),
        }
    }
}

/// Two trees are equal when their pre-order walks match: same shape, same
/// labels, same branch lengths, children in the same order.
impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        fn shape<'a>(v: Visit<'a>) -> (Option<&'a str>, Option<BranchLength>) {
            (v.node.taxon(), v.branch_length)
        }
        self.preorder().map(shape).eq(other.preorder().map(shape))
    }
}

/// Parents before children, left subtree before right.
pub struct Preorder<'a> {
    stack: Vec<Visit<'a>>,
}

impl<'a> Iterator for Preorder<'a> {
    type Item = Visit<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let visit = self.stack.pop()?;
        if let Node::Internal(children) = visit.node {
            for child in children.iter().rev() {
                self.stack.push(Visit::child(child, visit.depth + 1));
            }
        }
        Some(visit)
    }
}

/// Children before parents, left subtree before right. The root comes last.
pub struct Postorder<'a> {
    stack: Vec<(Visit<'a>, bool)>,
}

impl<'a> Iterator for Postorder<'a> {
    type Item = Visit<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((visit, expanded)) = self.stack.pop() {
            match visit.node {
                Node::Internal(children) if !expanded => {
                    self.stack.push((visit, true));
                    for child in children.iter().rev() {
                        self.stack.push((Visit::child(child, visit.depth + 1), false));
                    }
                }
                _ => return Some(visit),
            }
        }
        None
    }
}

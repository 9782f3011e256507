//! Crate root: module orchestration and public re-exports.
//!
//! Modules:
//! - `tree`: immutable rooted binary tree model and its traversals.
//! - `bitset`: compact bitset representation for taxon sets.
//! - `clade`: clade extraction over a shared taxon index.
//! - `canonical`: canonical Newick encoding, the topology identity.
//! - `topology`: grouping a posterior sample by topology.
//! - `distances`: distance oracle trait + built-in clade oracle.
//! - `summary`: candidate search and summary tree selection.
//! - `io`: reading NEXUS/Newick samples and writing the summary tree.
//! - `api`: Python bindings via `pyo3` (gated behind "python" feature).

pub mod bitset;
pub mod canonical;
pub mod clade;
pub mod distances;
pub mod error;
pub mod io;
pub mod summary;
pub mod topology;
pub mod tree;

#[cfg(feature = "python")]
pub mod api;

// Re-export frequently used types & functions
pub use bitset::Bitset;
pub use canonical::{NewickFormat, encode, to_newick, topology_key};
pub use clade::{Clade, TaxonIndex, clades_of};
pub use distances::{CladeOracle, DistanceOracle, Metric};
pub use error::SummaryError;
pub use io::{TreeSource, read_posterior, write_summary};
pub use summary::{Diagnostic, Selection, Summary, SummaryOptions, TieOrder, summarize};
pub use topology::{TopologyClass, TopologyGroups, group_by_topology};
pub use tree::{Node, Tree};

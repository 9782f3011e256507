//! Error taxonomy for tree construction, canonicalization and summary search.
//!
//! Only structural and input problems are errors. Search-level conditions
//! (ties at the selection boundary, targets without matching posterior trees)
//! are reported as [`Diagnostic`](crate::summary::Diagnostic)s on the result.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SummaryError {
    /// Duplicate or invalid leaf labels, wrong arity, bad branch lengths.
    #[error("malformed tree: {0}")]
    MalformedTree(String),

    /// No trees survived burn-in and thinning.
    #[error("no posterior trees left after burn-in and thinning")]
    EmptySample,

    /// Tree text the Newick parser rejected.
    #[error("failed to parse tree {index}: {message}")]
    Parse { index: usize, message: String },

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SummaryError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        SummaryError::MalformedTree(message.into())
    }
}

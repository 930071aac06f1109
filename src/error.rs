//! Error types.
//!
//! Every failure the engine can hit is local to one rule, one text or one
//! write. None of them stop the engine; callers mostly see them in logs and in
//! the counters of [`crate::ScanReport`] / [`crate::EngineStats`].

use crate::document::NodeId;
use thiserror::Error;

/// A rule that could not be turned into a [`crate::MatchUnit`].
#[derive(Debug, Error)]
pub enum RuleCompileError {
    /// `from` was empty.
    #[error("rule has an empty `from` pattern")]
    EmptyPattern,

    /// The escaped pattern was rejected by the regex compiler (usually the size limit).
    #[error("could not compile pattern for {from:?}: {source}")]
    Pattern {
        from: String,
        #[source]
        source: regex::Error,
    },
}

/// A compiled rule that failed while being applied to one text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplicationError {
    /// The replacement would grow the text past the configured maximum.
    #[error("rule {rule_index} would grow text to {len} bytes (limit {limit})")]
    OutputTooLarge { rule_index: usize, len: usize, limit: usize },
}

/// A rewritten value could not be committed to the document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    /// The node is no longer part of the document.
    #[error("node {0:?} is detached")]
    Detached(NodeId),

    /// A text write was attempted on a node that is not a text node.
    #[error("node {0:?} is not a text node")]
    NotText(NodeId),

    /// A field write was attempted on a node that is not an interactive field.
    #[error("node {0:?} is not an interactive field")]
    NotField(NodeId),

    /// The field is of the other shape (value control vs. rich region).
    #[error("node {0:?} has the wrong field kind for this write")]
    WrongFieldKind(NodeId),

    /// The host refused the write.
    #[error("node {0:?} is read-only")]
    ReadOnly(NodeId),
}

/// The external rule source could not supply a rule set.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("rule source unavailable: {0}")]
    Unavailable(String),

    #[error("malformed rule data: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Umbrella error for the public API.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] RuleCompileError),

    #[error(transparent)]
    Apply(#[from] ApplicationError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("invalid options: {0}")]
    Options(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

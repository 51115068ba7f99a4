//! Error types for gcnet.

use std::path::PathBuf;

use thiserror::Error;

/// gcnet error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Shape disagreement between features, adjacency and layer sizes.
    #[error("dimension mismatch in {context}: expected {expected}, got {got}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },

    /// Node index outside `[0, num_nodes)`.
    #[error("node index {index} out of range for graph with {num_nodes} nodes")]
    IndexOutOfRange { index: usize, num_nodes: usize },

    /// Metric or loss requested over an empty partition.
    #[error("index set `{partition}` is empty")]
    EmptyIndexSet { partition: String },

    /// A node assigned to more than one partition.
    #[error("node {index} is in both `{first}` and `{second}`")]
    OverlappingSplits {
        index: usize,
        first: String,
        second: String,
    },

    /// Adjacency entry `(row, col)` without a stored `(col, row)`.
    #[error("adjacency is not symmetric: ({row}, {col}) has no mirror entry")]
    AsymmetricAdjacency { row: usize, col: usize },

    /// Adjacency without a diagonal entry for this node.
    #[error("node {0} has no self-loop in the adjacency")]
    MissingSelfLoop(usize),

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Malformed dataset file.
    #[error("{}:{}: {}", .path.display(), .line, .message)]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// Edge list references a node that has no content row.
    #[error("unknown node id `{0}` in edge list")]
    UnknownNode(String),

    /// Filesystem error while loading a dataset.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for the disk-usage tracking core

use std::path::PathBuf;
use thiserror::Error;

/// Result type for disk-usage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while probing, aggregating, or persisting usage records.
///
/// All per-entity failures are contained at the project or node boundary;
/// nothing below the scheduler's outer loop propagates far enough to stop
/// the calculation subsystem.
#[derive(Error, Debug)]
pub enum Error {
    /// An unreadable or missing path. Callers degrade to a zero
    /// contribution and log a warning.
    #[error("cannot access {path}: {source}")]
    IoAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An agent is offline. The node's contribution is skipped for this
    /// cycle and the last cached value is kept.
    #[error("node '{0}' is unreachable")]
    NodeUnreachable(String),

    /// A referenced sub-project or workspace path no longer exists.
    #[error("hierarchy inconsistency: {0}")]
    HierarchyInconsistency(String),

    /// Reading or writing a cached record failed. The caller falls back
    /// to in-memory data for the cycle.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The background worker itself crashed. The outer loop restarts it.
    #[error("scheduler fault: {0}")]
    SchedulerFault(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a persistence error from any displayable cause.
    pub fn persistence<E: std::fmt::Display>(err: E) -> Self {
        Self::Persistence(err.to_string())
    }
}

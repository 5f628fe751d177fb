//! # Diskwatch
//!
//! Tracks disk-space consumption of build artifacts and execution
//! workspaces across a CI job hierarchy spanning multiple nodes. For every
//! project and every recorded build it maintains the size of persisted
//! outputs, the size of the checked-out workspace (possibly duplicated
//! across several agents), and cumulative sizes over nested matrix
//! sub-jobs.
//!
//! The crate observes and reports; it never deletes files. Sizes are
//! logical byte lengths, not block-allocated sizes.
//!
//! ## Modules
//!
//! - `probe` - Recursive filesystem size probing, tolerant of unreadable entries
//! - `model` - Cached per-build, per-project, and per-node usage records
//! - `hierarchy` - Collaborator traits onto the CI server and record storage
//! - `storage` - JSON file-backed record storage with atomic writes
//! - `workspace` - Workspace sizing across current and historical nodes
//! - `aggregate` - Recursive folds over the project hierarchy
//! - `threshold` - Per-project limits and cleanup candidates
//! - `scheduler` - Background sweeps, build-completion hooks, manual triggers
//! - `config` - TOML-loadable tracker configuration
//! - `logging` - Tracing subscriber setup for embedding hosts
//! - `testing` - In-memory collaborator fixtures

pub mod aggregate;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod logging;
pub mod model;
pub mod probe;
pub mod scheduler;
pub mod storage;
pub mod testing;
pub mod threshold;
pub mod workspace;

pub use aggregate::AggregationEngine;
pub use config::DiskUsageConfig;
pub use error::{Error, Result};
pub use hierarchy::{BuildRef, JobHierarchy, UsageStore};
pub use model::{
    BuildUsage, DiskUsageReport, ExceededPathRecord, ProjectUsage, UsageSummary,
    WorkspaceObservation,
};
pub use probe::{probe, probe_excluding, ProbeOutcome};
pub use scheduler::{DiskUsageContext, RecalcScope, RecalculationScheduler, SweepStats};
pub use storage::JsonUsageStore;
pub use threshold::ThresholdEnforcer;
pub use workspace::WorkspaceTracker;

//! Collaborator interfaces to the CI server and record storage
//!
//! The host's extension points (hierarchy enumeration, workspace
//! resolution, durable record storage) are narrowed down to two traits so
//! the core stays free of host-lifecycle concepts. Implementations supply
//! concrete adapters.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::Result;
use crate::model::{BuildId, NodeId, ProjectId, ProjectUsage};

/// Reference to one recorded execution, as enumerated by the CI server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRef {
    /// Project owning this build.
    pub project: ProjectId,
    pub id: BuildId,
    pub number: u32,
    /// Matrix-configuration executions directly nested under this run.
    pub sub_builds: Vec<BuildRef>,
}

impl BuildRef {
    pub fn new(project: impl Into<ProjectId>, id: impl Into<BuildId>, number: u32) -> Self {
        Self {
            project: project.into(),
            id: id.into(),
            number,
            sub_builds: Vec::new(),
        }
    }
}

/// Read-only view of the CI server's job hierarchy.
#[async_trait]
pub trait JobHierarchy: Send + Sync {
    /// Top-level project identifiers. Children are reached through
    /// [`list_child_projects`](Self::list_child_projects).
    async fn list_projects(&self) -> Vec<ProjectId>;

    /// Ordered child projects of a composite (matrix) project; empty for
    /// leaf jobs.
    async fn list_child_projects(&self, project: &str) -> Vec<ProjectId>;

    /// Builds of a project in chronological order.
    async fn list_builds(&self, project: &str) -> Vec<BuildRef>;

    /// Every node the project is known to have executed on, historically,
    /// not just the current assignment.
    async fn list_known_nodes(&self, project: &str) -> Vec<NodeId>;

    /// Workspace location of a project on a node, if one exists there.
    async fn resolve_workspace_path(&self, node: &str, project: &str) -> Option<PathBuf>;

    /// Root directory holding the project's configuration and metadata.
    async fn project_root(&self, project: &str) -> Option<PathBuf>;

    /// Root directory of one build's persisted outputs.
    async fn build_root(&self, project: &str, build: &str) -> Option<PathBuf>;

    /// Whether the agent is currently online.
    async fn node_reachable(&self, node: &str) -> bool;
}

/// Durable storage for usage records, keyed by project identifier.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn persist(&self, record: &ProjectUsage) -> Result<()>;

    /// Load a project's record. A missing or corrupt record resolves to
    /// `None` ("not yet calculated") rather than an error.
    async fn load(&self, project: &str) -> Result<Option<ProjectUsage>>;

    /// Drop a record when the owning project is deleted.
    async fn remove(&self, project: &str) -> Result<()>;
}

//! Usage record model: per-build, per-project, and per-node cached sizes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Identifier of a CI project (job). Matrix configurations are projects too.
pub type ProjectId = String;

/// Identifier of one recorded execution of a project.
pub type BuildId = String;

/// Identifier of an execution node (agent).
pub type NodeId = String;

/// Cached disk usage of a single build.
///
/// `own_size` covers the build's own persisted metadata and artifacts,
/// excluding directories of nested sub-builds. `cumulative_size` adds the
/// recursive sum over directly nested sub-builds (matrix-configuration
/// executions of the same run).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildUsage {
    pub build_id: BuildId,
    /// Build number; insertion order in `ProjectUsage::builds` is chronological.
    pub number: u32,
    pub own_size: u64,
    pub cumulative_size: u64,
}

/// One (agent, directory) pair ever associated with a project's workspace.
///
/// Observations are kept even after the project moves to a different node,
/// because the old directory keeps occupying disk until someone removes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceObservation {
    pub node: NodeId,
    pub path: PathBuf,
    pub size: u64,
    pub last_seen: DateTime<Utc>,
}

/// A workspace path on a node that no longer matches any live project
/// structure (for example an axis combination removed from a matrix job).
/// Flagged for an external cleanup policy; never deleted by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceededPathRecord {
    pub node: NodeId,
    pub path: PathBuf,
    pub size: u64,
    pub last_seen: DateTime<Utc>,
}

/// Cached usage record for one project.
///
/// Owns its build usages and workspace observations; sub-projects are
/// referenced by identifier only, their records live in the same registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectUsage {
    pub project_id: ProjectId,
    /// Build usages ordered by build number.
    #[serde(default)]
    pub builds: Vec<BuildUsage>,
    /// Size of the job configuration and metadata, excluding build records.
    #[serde(default)]
    pub disk_usage_without_builds: u64,
    /// Accumulated workspace size per node, derived from `observations`.
    #[serde(default)]
    pub workspace_by_node: BTreeMap<NodeId, u64>,
    #[serde(default)]
    pub observations: Vec<WorkspaceObservation>,
    /// Child project identifiers, in hierarchy order. Empty for leaf jobs.
    #[serde(default)]
    pub sub_projects: Vec<ProjectId>,
    /// Stray workspace paths found on nodes during the last scan.
    #[serde(default)]
    pub exceeded_paths: Vec<ExceededPathRecord>,
}

impl ProjectUsage {
    pub fn new(project_id: impl Into<ProjectId>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    /// Sum of own build sizes, without sub-projects.
    pub fn build_usage(&self) -> u64 {
        self.builds.iter().map(|b| b.own_size).sum()
    }

    /// Temporal disk usage: sum of cumulative build sizes. For a matrix
    /// parent this already folds in the configuration sub-builds.
    pub fn all_disk_usage(&self) -> u64 {
        self.builds.iter().map(|b| b.cumulative_size).sum()
    }

    /// Sum of all workspace observations, across every node that ever
    /// held this project's workspace.
    pub fn workspace_usage(&self) -> u64 {
        self.observations.iter().map(|o| o.size).sum()
    }

    pub fn build(&self, build_id: &str) -> Option<&BuildUsage> {
        self.builds.iter().find(|b| b.build_id == build_id)
    }

    /// Insert or replace a build usage, keeping the sequence ordered by
    /// build number.
    pub fn upsert_build(&mut self, usage: BuildUsage) {
        match self.builds.iter_mut().find(|b| b.build_id == usage.build_id) {
            Some(existing) => *existing = usage,
            None => {
                self.builds.push(usage);
                self.builds.sort_by_key(|b| b.number);
            }
        }
    }

    /// Insert or replace the observation for a (node, path) pair and
    /// refresh the per-node accumulation.
    pub fn upsert_observation(&mut self, observation: WorkspaceObservation) {
        match self
            .observations
            .iter_mut()
            .find(|o| o.node == observation.node && o.path == observation.path)
        {
            Some(existing) => *existing = observation,
            None => self.observations.push(observation),
        }
        self.rebuild_workspace_by_node();
    }

    fn rebuild_workspace_by_node(&mut self) {
        self.workspace_by_node.clear();
        for obs in &self.observations {
            *self.workspace_by_node.entry(obs.node.clone()).or_insert(0) += obs.size;
        }
    }
}

/// Per-project usage view handed to collaborators such as the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskUsageReport {
    /// Build usage including sub-projects.
    pub build_usage: u64,
    /// Workspace usage including sub-projects, summed over all nodes.
    pub workspace_usage: u64,
    /// Estimate of the space the next build is likely to need.
    pub predicted_needed_space: u64,
}

/// Running sum over every tracked project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total_build_usage: u64,
    pub total_workspace_usage: u64,
    pub predicted_needed_space: u64,
    /// Free space on the volume holding the usage records.
    pub free_disk_space: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn obs(node: &str, path: &str, size: u64) -> WorkspaceObservation {
        WorkspaceObservation {
            node: node.to_string(),
            path: PathBuf::from(path),
            size,
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn upsert_build_keeps_number_order() {
        let mut usage = ProjectUsage::new("p");
        usage.upsert_build(BuildUsage {
            build_id: "p#3".into(),
            number: 3,
            own_size: 30,
            cumulative_size: 30,
        });
        usage.upsert_build(BuildUsage {
            build_id: "p#1".into(),
            number: 1,
            own_size: 10,
            cumulative_size: 10,
        });
        usage.upsert_build(BuildUsage {
            build_id: "p#2".into(),
            number: 2,
            own_size: 20,
            cumulative_size: 20,
        });
        let numbers: Vec<u32> = usage.builds.iter().map(|b| b.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(usage.build_usage(), 60);
    }

    #[test]
    fn upsert_build_replaces_existing_record() {
        let mut usage = ProjectUsage::new("p");
        usage.upsert_build(BuildUsage {
            build_id: "p#1".into(),
            number: 1,
            own_size: 10,
            cumulative_size: 10,
        });
        usage.upsert_build(BuildUsage {
            build_id: "p#1".into(),
            number: 1,
            own_size: 10,
            cumulative_size: 40,
        });
        assert_eq!(usage.builds.len(), 1);
        assert_eq!(usage.all_disk_usage(), 40);
    }

    #[test]
    fn observations_accumulate_across_nodes() {
        let mut usage = ProjectUsage::new("p");
        usage.upsert_observation(obs("node-a", "/ws/a/p", 1000));
        usage.upsert_observation(obs("node-b", "/ws/b/p", 700));
        // moving back to node-a updates in place rather than double counting
        usage.upsert_observation(obs("node-a", "/ws/a/p", 1200));

        assert_eq!(usage.workspace_usage(), 1900);
        assert_eq!(usage.workspace_by_node["node-a"], 1200);
        assert_eq!(usage.workspace_by_node["node-b"], 700);
    }
}

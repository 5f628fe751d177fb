//! In-memory collaborator fixtures
//!
//! A scriptable [`JobHierarchy`] and [`UsageStore`] for exercising the
//! tracker without a CI server, used by the crate's own tests and usable
//! by adapter implementations for theirs.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::RwLock;

use crate::error::Result;
use crate::hierarchy::{BuildRef, JobHierarchy, UsageStore};
use crate::model::{NodeId, ProjectId, ProjectUsage};

#[derive(Debug, Default, Clone)]
struct FixtureProject {
    top_level: bool,
    children: Vec<ProjectId>,
    nodes: Vec<NodeId>,
    workspaces: HashMap<NodeId, PathBuf>,
    root: Option<PathBuf>,
    builds: Vec<BuildRef>,
    build_roots: HashMap<String, PathBuf>,
}

/// Scriptable job hierarchy backed by plain maps.
#[derive(Default)]
pub struct FixtureHierarchy {
    projects: RwLock<BTreeMap<ProjectId, FixtureProject>>,
    offline: RwLock<HashSet<NodeId>>,
}

impl FixtureHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a top-level project.
    pub fn add_project(&self, project: &str) {
        if let Ok(mut projects) = self.projects.write() {
            projects.entry(project.to_string()).or_default().top_level = true;
        }
    }

    /// Register `child` under `parent`. The child is created if unknown
    /// and does not appear in the top-level listing.
    pub fn add_child(&self, parent: &str, child: &str) {
        if let Ok(mut projects) = self.projects.write() {
            projects.entry(child.to_string()).or_default();
            let entry = projects.entry(parent.to_string()).or_default();
            if !entry.children.iter().any(|c| c == child) {
                entry.children.push(child.to_string());
            }
        }
    }

    /// Remove `child` from `parent`'s live children, as a removed matrix
    /// axis would. The child's directories stay on disk.
    pub fn remove_child(&self, parent: &str, child: &str) {
        if let Ok(mut projects) = self.projects.write() {
            if let Some(entry) = projects.get_mut(parent) {
                entry.children.retain(|c| c != child);
            }
            projects.remove(child);
        }
    }

    /// Associate a node and workspace path with a project. Nodes
    /// accumulate; re-registering an existing node updates its path.
    pub fn add_workspace(&self, project: &str, node: &str, path: impl Into<PathBuf>) {
        if let Ok(mut projects) = self.projects.write() {
            let entry = projects.entry(project.to_string()).or_default();
            if !entry.nodes.iter().any(|n| n == node) {
                entry.nodes.push(node.to_string());
            }
            entry.workspaces.insert(node.to_string(), path.into());
        }
    }

    pub fn set_project_root(&self, project: &str, path: impl Into<PathBuf>) {
        if let Ok(mut projects) = self.projects.write() {
            projects.entry(project.to_string()).or_default().root = Some(path.into());
        }
    }

    /// Record a build and the on-disk root of its outputs. Roots of
    /// nested sub-builds must be registered separately on their own
    /// projects.
    pub fn add_build(&self, build: BuildRef, root: impl Into<PathBuf>) {
        if let Ok(mut projects) = self.projects.write() {
            let entry = projects.entry(build.project.clone()).or_default();
            entry.build_roots.insert(build.id.clone(), root.into());
            match entry.builds.iter_mut().find(|b| b.id == build.id) {
                Some(existing) => *existing = build,
                None => entry.builds.push(build),
            }
        }
    }

    pub fn set_build_root(&self, project: &str, build: &str, root: impl Into<PathBuf>) {
        if let Ok(mut projects) = self.projects.write() {
            projects
                .entry(project.to_string())
                .or_default()
                .build_roots
                .insert(build.to_string(), root.into());
        }
    }

    pub fn set_offline(&self, node: &str, offline: bool) {
        if let Ok(mut set) = self.offline.write() {
            if offline {
                set.insert(node.to_string());
            } else {
                set.remove(node);
            }
        }
    }
}

#[async_trait]
impl JobHierarchy for FixtureHierarchy {
    async fn list_projects(&self) -> Vec<ProjectId> {
        match self.projects.read() {
            Ok(projects) => projects
                .iter()
                .filter(|(_, p)| p.top_level)
                .map(|(id, _)| id.clone())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn list_child_projects(&self, project: &str) -> Vec<ProjectId> {
        match self.projects.read() {
            Ok(projects) => projects
                .get(project)
                .map(|p| p.children.clone())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    async fn list_builds(&self, project: &str) -> Vec<BuildRef> {
        match self.projects.read() {
            Ok(projects) => projects
                .get(project)
                .map(|p| p.builds.clone())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    async fn list_known_nodes(&self, project: &str) -> Vec<NodeId> {
        match self.projects.read() {
            Ok(projects) => projects
                .get(project)
                .map(|p| p.nodes.clone())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    async fn resolve_workspace_path(&self, node: &str, project: &str) -> Option<PathBuf> {
        self.projects
            .read()
            .ok()?
            .get(project)?
            .workspaces
            .get(node)
            .cloned()
    }

    async fn project_root(&self, project: &str) -> Option<PathBuf> {
        self.projects.read().ok()?.get(project)?.root.clone()
    }

    async fn build_root(&self, project: &str, build: &str) -> Option<PathBuf> {
        self.projects
            .read()
            .ok()?
            .get(project)?
            .build_roots
            .get(build)
            .cloned()
    }

    async fn node_reachable(&self, node: &str) -> bool {
        match self.offline.read() {
            Ok(set) => !set.contains(node),
            Err(_) => false,
        }
    }
}

/// Map-backed [`UsageStore`] with no durability.
#[derive(Default)]
pub struct MemoryUsageStore {
    records: RwLock<HashMap<ProjectId, ProjectUsage>>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn persist(&self, record: &ProjectUsage) -> Result<()> {
        if let Ok(mut records) = self.records.write() {
            records.insert(record.project_id.clone(), record.clone());
        }
        Ok(())
    }

    async fn load(&self, project: &str) -> Result<Option<ProjectUsage>> {
        Ok(self
            .records
            .read()
            .ok()
            .and_then(|records| records.get(project).cloned()))
    }

    async fn remove(&self, project: &str) -> Result<()> {
        if let Ok(mut records) = self.records.write() {
            records.remove(project);
        }
        Ok(())
    }
}

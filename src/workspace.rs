//! Workspace usage tracking across execution nodes
//!
//! A project's workspace footprint is the sum over every (node, path)
//! pair that ever held it, not just the current assignment: rebuilding on
//! a different agent leaves the old directory occupying disk until
//! something removes it. For composite projects the tracker also spots
//! stray sub-directories left behind by removed or renamed matrix
//! configurations and reports them instead of counting them.

use chrono::Utc;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::DiskUsageConfig;
use crate::error::Error;
use crate::hierarchy::JobHierarchy;
use crate::model::{ExceededPathRecord, ProjectUsage, WorkspaceObservation};
use crate::probe;

/// Sizes every known workspace location of a project.
pub struct WorkspaceTracker<'a> {
    hierarchy: &'a dyn JobHierarchy,
    config: &'a DiskUsageConfig,
}

impl<'a> WorkspaceTracker<'a> {
    pub fn new(hierarchy: &'a dyn JobHierarchy, config: &'a DiskUsageConfig) -> Self {
        Self { hierarchy, config }
    }

    /// Refresh `record`'s workspace observations, per-node accumulation,
    /// sub-project list, and stray-path report.
    ///
    /// Unreachable nodes keep their last cached observation for this
    /// cycle. I/O problems degrade to partial counts; this never fails.
    pub async fn track(&self, record: &mut ProjectUsage) {
        let project = record.project_id.clone();
        record.sub_projects = self.hierarchy.list_child_projects(&project).await;

        let mut exceeded = Vec::new();

        for node in self.hierarchy.list_known_nodes(&project).await {
            if !self.hierarchy.node_reachable(&node).await {
                let err = Error::NodeUnreachable(node.clone());
                warn!(%project, error = %err, "keeping cached workspace size for this cycle");
                continue;
            }

            let Some(workspace) = self.hierarchy.resolve_workspace_path(&node, &project).await
            else {
                debug!(%project, %node, "no workspace resolved on node");
                continue;
            };

            // Workspaces of live sub-projects are sized on the children
            // and must not be double counted here.
            let mut excluded = Vec::new();
            for child in &record.sub_projects {
                if let Some(path) = self.hierarchy.resolve_workspace_path(&node, child).await {
                    excluded.push(path);
                }
            }

            if self.config.check_workspace_on_node && !record.sub_projects.is_empty() {
                for stray in discover_strays(&workspace, &excluded) {
                    let outcome = probe::probe(&stray);
                    exceeded.push(ExceededPathRecord {
                        node: node.clone(),
                        path: stray.clone(),
                        size: outcome.size,
                        last_seen: Utc::now(),
                    });
                    excluded.push(stray);
                }
            }

            let outcome = probe::probe_excluding(&workspace, &excluded);
            for warning in &outcome.warnings {
                warn!(
                    %project,
                    %node,
                    path = %warning.path.display(),
                    reason = %warning.reason,
                    "workspace entry skipped during sizing"
                );
            }

            record.upsert_observation(WorkspaceObservation {
                node: node.clone(),
                path: workspace,
                size: outcome.size,
                last_seen: Utc::now(),
            });
        }

        record.exceeded_paths = exceeded;
    }
}

/// Find directories that sit next to live sub-project workspaces but
/// belong to no live sub-project: leftovers of removed axis combinations.
///
/// Only directories holding live child workspaces are inspected, so a leaf
/// project's ordinary checkout content is never flagged.
fn discover_strays(workspace: &Path, live: &[PathBuf]) -> Vec<PathBuf> {
    let mut inspect = BTreeSet::new();
    for path in live {
        let mut current = path.parent();
        while let Some(dir) = current {
            if !dir.starts_with(workspace) || dir == workspace {
                break;
            }
            inspect.insert(dir.to_path_buf());
            current = dir.parent();
        }
    }

    let mut strays = Vec::new();
    for dir in inspect {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let referenced = live
                .iter()
                .any(|l| l.starts_with(&path) || path.starts_with(l));
            if !referenced {
                strays.push(path);
            }
        }
    }
    strays.sort();
    strays
}

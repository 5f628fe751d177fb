//! Hierarchical aggregation of usage records
//!
//! Pure folds over the in-memory record map. A composite project's totals
//! are its own figures plus the recursive sum over its sub-projects; a
//! child whose calculation failed contributes its last cached record, or
//! zero if it was never calculated. One broken sub-project never poisons
//! the parent total.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::model::{DiskUsageReport, ProjectId, ProjectUsage};

/// Read-only aggregation over a snapshot of the record map.
pub struct AggregationEngine<'a> {
    records: &'a HashMap<ProjectId, ProjectUsage>,
}

impl<'a> AggregationEngine<'a> {
    pub fn new(records: &'a HashMap<ProjectId, ProjectUsage>) -> Self {
        Self { records }
    }

    /// Build usage of the project and all sub-projects, counting each
    /// build's own size exactly once.
    pub fn all_build_usage(&self, project: &str) -> u64 {
        self.fold(project, &mut HashSet::new(), &|r| r.build_usage())
    }

    /// Temporal disk usage: sum of cumulative build sizes over the
    /// project's own build sequence. Sub-build sizes are already folded
    /// into each parent build's cumulative figure.
    pub fn all_disk_usage(&self, project: &str) -> u64 {
        self.records
            .get(project)
            .map(ProjectUsage::all_disk_usage)
            .unwrap_or(0)
    }

    /// Job configuration/metadata size of the project plus all
    /// sub-projects, excluding build records.
    pub fn all_disk_usage_without_builds(&self, project: &str) -> u64 {
        self.fold(project, &mut HashSet::new(), &|r| {
            r.disk_usage_without_builds
        })
    }

    /// Workspace usage of the project plus all sub-projects, across every
    /// node that ever held a workspace.
    pub fn all_workspace_usage(&self, project: &str) -> u64 {
        self.fold(project, &mut HashSet::new(), &|r| r.workspace_usage())
    }

    /// Usage view for one project. Unknown projects get a zero-valued
    /// report, never an error.
    pub fn report(&self, project: &str) -> DiskUsageReport {
        let predicted = self
            .records
            .get(project)
            .map(|r| {
                let last_build = r.builds.last().map(|b| b.cumulative_size).unwrap_or(0);
                last_build + r.workspace_usage()
            })
            .unwrap_or(0);

        DiskUsageReport {
            build_usage: self.all_build_usage(project),
            workspace_usage: self.all_workspace_usage(project),
            predicted_needed_space: predicted,
        }
    }

    fn fold(
        &self,
        project: &str,
        visiting: &mut HashSet<ProjectId>,
        own: &dyn Fn(&ProjectUsage) -> u64,
    ) -> u64 {
        if !visiting.insert(project.to_string()) {
            // A project referenced along its own ancestry chain; count it
            // once and stop descending.
            debug!(project, "cycle in sub-project references, skipping");
            return 0;
        }

        let Some(record) = self.records.get(project) else {
            // Never calculated; contributes nothing rather than failing.
            return 0;
        };

        let mut total = own(record);
        for child in &record.sub_projects {
            total += self.fold(child, visiting, own);
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BuildUsage;

    fn project(id: &str, without_builds: u64, children: &[&str]) -> ProjectUsage {
        let mut usage = ProjectUsage::new(id);
        usage.disk_usage_without_builds = without_builds;
        usage.sub_projects = children.iter().map(|c| c.to_string()).collect();
        usage
    }

    fn build(project: &str, number: u32, own: u64, cumulative: u64) -> BuildUsage {
        BuildUsage {
            build_id: format!("{project}#{number}"),
            number,
            own_size: own,
            cumulative_size: cumulative,
        }
    }

    #[test]
    fn recursive_sum_holds_for_nested_hierarchy() {
        let mut records = HashMap::new();
        records.insert("root".to_string(), project("root", 100, &["mid"]));
        records.insert("mid".to_string(), project("mid", 20, &["leaf-a", "leaf-b"]));
        records.insert("leaf-a".to_string(), project("leaf-a", 3, &[]));
        records.insert("leaf-b".to_string(), project("leaf-b", 4, &[]));

        let engine = AggregationEngine::new(&records);
        assert_eq!(engine.all_disk_usage_without_builds("leaf-a"), 3);
        assert_eq!(engine.all_disk_usage_without_builds("mid"), 27);
        assert_eq!(engine.all_disk_usage_without_builds("root"), 127);
    }

    #[test]
    fn missing_child_contributes_zero_not_an_error() {
        let mut records = HashMap::new();
        records.insert(
            "root".to_string(),
            project("root", 50, &["never-calculated"]),
        );

        let engine = AggregationEngine::new(&records);
        assert_eq!(engine.all_disk_usage_without_builds("root"), 50);
    }

    #[test]
    fn cyclic_references_terminate() {
        let mut records = HashMap::new();
        records.insert("a".to_string(), project("a", 1, &["b"]));
        records.insert("b".to_string(), project("b", 2, &["a"]));

        let engine = AggregationEngine::new(&records);
        assert_eq!(engine.all_disk_usage_without_builds("a"), 3);
    }

    #[test]
    fn build_usage_counts_own_sizes_across_hierarchy() {
        let mut records = HashMap::new();
        let mut parent = project("matrix", 0, &["matrix/axis=a"]);
        parent.upsert_build(build("matrix", 1, 1000, 1600));
        let mut child = project("matrix/axis=a", 0, &[]);
        child.upsert_build(build("matrix/axis=a", 1, 600, 600));
        records.insert("matrix".to_string(), parent);
        records.insert("matrix/axis=a".to_string(), child);

        let engine = AggregationEngine::new(&records);
        // hierarchical walk counts each build's own size once
        assert_eq!(engine.all_build_usage("matrix"), 1600);
        // temporal walk over the parent's builds reaches the same total
        // through the cumulative figure
        assert_eq!(engine.all_disk_usage("matrix"), 1600);
    }

    #[test]
    fn unknown_project_reports_zeroes() {
        let records = HashMap::new();
        let engine = AggregationEngine::new(&records);
        assert_eq!(engine.report("ghost"), DiskUsageReport::default());
    }

    #[test]
    fn prediction_uses_last_build_and_workspace() {
        let mut records = HashMap::new();
        let mut usage = project("p", 0, &[]);
        usage.upsert_build(build("p", 1, 100, 100));
        usage.upsert_build(build("p", 2, 400, 400));
        usage.upsert_observation(crate::model::WorkspaceObservation {
            node: "node-a".into(),
            path: "/ws/p".into(),
            size: 250,
            last_seen: chrono::Utc::now(),
        });
        records.insert("p".to_string(), usage);

        let engine = AggregationEngine::new(&records);
        assert_eq!(engine.report("p").predicted_needed_space, 650);
    }
}

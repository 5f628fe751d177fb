//! Per-project usage limits and cleanup candidates
//!
//! Compares a project's aggregated disk plus workspace usage against its
//! configured limit. When the limit is exceeded, the workspace paths of
//! the project subtree become cleanup candidates for an external policy,
//! ordered oldest-first. Nothing here deletes files.

use std::collections::{HashMap, HashSet};

use crate::aggregate::AggregationEngine;
use crate::config::DiskUsageConfig;
use crate::model::{ExceededPathRecord, ProjectId, ProjectUsage};

/// Evaluates configured limits against aggregated totals.
pub struct ThresholdEnforcer<'a> {
    config: &'a DiskUsageConfig,
}

impl<'a> ThresholdEnforcer<'a> {
    pub fn new(config: &'a DiskUsageConfig) -> Self {
        Self { config }
    }

    /// Cleanup candidates for a project, oldest observation first.
    /// Empty when no limit is configured or usage is within it.
    pub fn evaluate(
        &self,
        records: &HashMap<ProjectId, ProjectUsage>,
        project: &str,
    ) -> Vec<ExceededPathRecord> {
        let Some(limit) = self.config.threshold(project) else {
            return Vec::new();
        };

        let engine = AggregationEngine::new(records);
        let total = engine.all_disk_usage(project) + engine.all_workspace_usage(project);
        if total <= limit {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        collect_observations(records, project, &mut HashSet::new(), &mut candidates);
        candidates.sort_by_key(|c| c.last_seen);
        candidates
    }
}

fn collect_observations(
    records: &HashMap<ProjectId, ProjectUsage>,
    project: &str,
    visiting: &mut HashSet<ProjectId>,
    out: &mut Vec<ExceededPathRecord>,
) {
    if !visiting.insert(project.to_string()) {
        return;
    }
    let Some(record) = records.get(project) else {
        return;
    };
    for obs in &record.observations {
        out.push(ExceededPathRecord {
            node: obs.node.clone(),
            path: obs.path.clone(),
            size: obs.size,
            last_seen: obs.last_seen,
        });
    }
    for child in &record.sub_projects {
        collect_observations(records, child, visiting, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BuildUsage, WorkspaceObservation};
    use chrono::{Duration, Utc};

    fn config_with_limit(project: &str, limit: u64) -> DiskUsageConfig {
        let mut config = DiskUsageConfig::default();
        config.thresholds.insert(project.to_string(), limit);
        config
    }

    fn records_with_usage(build: u64, ws_old: u64, ws_new: u64) -> HashMap<ProjectId, ProjectUsage> {
        let mut usage = ProjectUsage::new("q");
        usage.upsert_build(BuildUsage {
            build_id: "q#1".into(),
            number: 1,
            own_size: build,
            cumulative_size: build,
        });
        let now = Utc::now();
        usage.upsert_observation(WorkspaceObservation {
            node: "node-old".into(),
            path: "/ws/old/q".into(),
            size: ws_old,
            last_seen: now - Duration::hours(5),
        });
        usage.upsert_observation(WorkspaceObservation {
            node: "node-new".into(),
            path: "/ws/new/q".into(),
            size: ws_new,
            last_seen: now,
        });
        let mut records = HashMap::new();
        records.insert("q".to_string(), usage);
        records
    }

    #[test]
    fn exceeded_usage_yields_candidates_oldest_first() {
        let config = config_with_limit("q", 5000);
        let records = records_with_usage(4000, 1200, 1000);

        let enforcer = ThresholdEnforcer::new(&config);
        let candidates = enforcer.evaluate(&records, "q");
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].node, "node-old");
        assert_eq!(candidates[1].node, "node-new");
    }

    #[test]
    fn usage_within_limit_yields_nothing() {
        let config = config_with_limit("q", 5000);
        let records = records_with_usage(2000, 1200, 1000);

        let enforcer = ThresholdEnforcer::new(&config);
        assert!(enforcer.evaluate(&records, "q").is_empty());
    }

    #[test]
    fn no_configured_limit_means_unbounded() {
        let config = DiskUsageConfig::default();
        let records = records_with_usage(u64::MAX / 4, 1, 1);

        let enforcer = ThresholdEnforcer::new(&config);
        assert!(enforcer.evaluate(&records, "q").is_empty());
    }

    #[test]
    fn lowering_usage_clears_candidates_on_next_evaluation() {
        let config = config_with_limit("q", 5000);
        let enforcer = ThresholdEnforcer::new(&config);

        let over = records_with_usage(4000, 1200, 1000);
        assert!(!enforcer.evaluate(&over, "q").is_empty());

        let under = records_with_usage(3000, 1200, 700);
        assert!(enforcer.evaluate(&under, "q").is_empty());
    }
}

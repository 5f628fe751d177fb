//! Recalculation scheduling and shared record state
//!
//! [`DiskUsageContext`] owns the process-wide usage records: a mutex
//! serializes every read-modify-write, while published snapshots serve
//! readers without blocking the writer. [`RecalculationScheduler`] drives
//! the context from a background periodic task plus on-demand triggers
//! (build completion, manual request). Per-project failures are contained;
//! only a crash of the worker itself is self-healed by restarting it.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::aggregate::AggregationEngine;
use crate::config::DiskUsageConfig;
use crate::error::Error;
use crate::hierarchy::{BuildRef, JobHierarchy, UsageStore};
use crate::model::{
    BuildUsage, DiskUsageReport, ExceededPathRecord, ProjectId, ProjectUsage, UsageSummary,
};
use crate::probe;
use crate::threshold::ThresholdEnforcer;
use crate::workspace::WorkspaceTracker;

/// Scope of a manually requested recalculation.
#[derive(Debug, Clone)]
pub enum RecalcScope {
    Project(ProjectId),
    FullSweep,
}

/// Counters from one sweep over the hierarchy.
#[derive(Debug, Clone, Default)]
pub struct SweepStats {
    pub projects: usize,
    pub failures: usize,
    pub cancelled: bool,
}

/// Process-wide tracking state: configuration, cached records, and the
/// collaborator handles. Replaces any notion of a global plugin instance;
/// its lifetime is tied to the owning process.
pub struct DiskUsageContext {
    config: DiskUsageConfig,
    hierarchy: Arc<dyn JobHierarchy>,
    store: Arc<dyn UsageStore>,
    /// Working records; every read-modify-write holds this lock.
    records: Mutex<HashMap<ProjectId, ProjectUsage>>,
    /// Read-only snapshots for dashboards and cleanup jobs, refreshed
    /// after every successful recalculation.
    published: RwLock<HashMap<ProjectId, ProjectUsage>>,
}

impl DiskUsageContext {
    pub fn new(
        config: DiskUsageConfig,
        hierarchy: Arc<dyn JobHierarchy>,
        store: Arc<dyn UsageStore>,
    ) -> Self {
        Self {
            config,
            hierarchy,
            store,
            records: Mutex::new(HashMap::new()),
            published: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DiskUsageConfig {
        &self.config
    }

    /// Targeted recalculation after one build finishes: sizes that build
    /// (and any nested sub-builds), refreshes the owning project's
    /// workspace data, and re-evaluates its limit. Never fails: the CI
    /// server's build execution must not be blocked by sizing problems.
    pub async fn on_build_completed(&self, build: &BuildRef) {
        let project = build.project.clone();
        if self.config.is_excluded(&project) {
            info!(%project, "project is excluded from disk usage calculation");
            return;
        }

        debug!(%project, build = %build.id, "recalculating disk usage for completed build");
        let mut records = self.records.lock().await;
        self.ensure_loaded(&mut records, &project).await;
        self.measure_build(build, &mut records).await;

        let tracker = WorkspaceTracker::new(self.hierarchy.as_ref(), &self.config);
        if let Some(record) = records.get_mut(&project) {
            tracker.track(record).await;
        }

        let touched = build_projects(build);
        self.persist_and_publish(&records, &touched).await;
        self.log_threshold(&records, &project);
    }

    /// Full recalculation of one project: configuration size, any builds
    /// not yet measured, and workspace usage.
    pub async fn recalculate_project(&self, project: &str) -> crate::error::Result<()> {
        if self.config.is_excluded(project) {
            debug!(project, "skipping excluded project");
            return Ok(());
        }

        let builds = self.hierarchy.list_builds(project).await;
        let children = self.hierarchy.list_child_projects(project).await;
        let root = self.hierarchy.project_root(project).await;
        if root.is_none()
            && builds.is_empty()
            && children.is_empty()
            && self.hierarchy.list_known_nodes(project).await.is_empty()
        {
            return Err(Error::HierarchyInconsistency(format!(
                "project '{project}' is unknown to the hierarchy"
            )));
        }

        let mut records = self.records.lock().await;
        self.ensure_loaded(&mut records, project).await;

        // Job configuration size excludes build records and nested child
        // project directories; those are sized on their own.
        match root {
            Some(root) => {
                let mut excluded = Vec::new();
                for build in &builds {
                    if let Some(path) = self.hierarchy.build_root(&build.project, &build.id).await
                    {
                        excluded.push(path);
                    }
                }
                for child in &children {
                    if let Some(path) = self.hierarchy.project_root(child).await {
                        excluded.push(path);
                    }
                }
                let outcome = probe::probe_excluding(&root, &excluded);
                for warning in &outcome.warnings {
                    warn!(
                        project,
                        path = %warning.path.display(),
                        reason = %warning.reason,
                        "entry skipped while sizing project configuration"
                    );
                }
                if let Some(record) = records.get_mut(project) {
                    record.disk_usage_without_builds = outcome.size;
                }
            }
            None => {
                let err = Error::HierarchyInconsistency(format!(
                    "project '{project}' has no root directory"
                ));
                warn!(project, error = %err, "keeping cached configuration size");
            }
        }

        // Builds are measured once and cached; a finished build's own
        // artifacts do not change, but new sub-builds can still append.
        let mut touched: Vec<ProjectId> = vec![project.to_string()];
        for build in &builds {
            if !build_measured(&records, build) {
                self.measure_build(build, &mut records).await;
                for p in build_projects(build) {
                    if !touched.contains(&p) {
                        touched.push(p);
                    }
                }
            }
        }

        // Workspace sizes can legitimately change build to build.
        let tracker = WorkspaceTracker::new(self.hierarchy.as_ref(), &self.config);
        if let Some(record) = records.get_mut(project) {
            tracker.track(record).await;
        }

        self.persist_and_publish(&records, &touched).await;
        self.log_threshold(&records, project);
        Ok(())
    }

    /// Depth-first sweep over the whole hierarchy, children before
    /// parents. Per-project failures are logged and the sweep continues.
    /// The stop flag is honored between projects, never mid-probe.
    pub async fn run_sweep(&self, stop: &AtomicBool) -> SweepStats {
        info!("starting disk usage sweep");
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = self.hierarchy.list_projects().await;
        while let Some(project) = stack.pop() {
            if !seen.insert(project.clone()) {
                continue;
            }
            for child in self.hierarchy.list_child_projects(&project).await {
                stack.push(child);
            }
            order.push(project);
        }
        // reversed discovery order puts every child before its parent
        order.reverse();

        let mut stats = SweepStats::default();
        for project in order {
            if stop.load(Ordering::SeqCst) {
                info!("disk usage sweep cancelled");
                stats.cancelled = true;
                break;
            }
            match self.recalculate_project(&project).await {
                Ok(()) => stats.projects += 1,
                Err(err) => {
                    warn!(%project, error = %err, "project recalculation failed, continuing sweep");
                    stats.failures += 1;
                }
            }
        }
        info!(
            projects = stats.projects,
            failures = stats.failures,
            "disk usage sweep finished"
        );
        stats
    }

    /// Usage view for a project. Unknown projects yield a zero-valued
    /// report, never an error. Reads published snapshots and does not
    /// block a running recalculation.
    pub async fn get_usage(&self, project: &str) -> DiskUsageReport {
        self.warm_published(project).await;
        match self.published.read() {
            Ok(published) => AggregationEngine::new(&published).report(project),
            Err(_) => DiskUsageReport::default(),
        }
    }

    /// Top-level projects ordered by combined usage, descending, with a
    /// running sum including the free space on the record volume.
    pub async fn list_projects_by_usage_descending(
        &self,
    ) -> (Vec<(ProjectId, DiskUsageReport)>, UsageSummary) {
        let projects = self.hierarchy.list_projects().await;
        for project in &projects {
            self.warm_published(project).await;
        }

        let mut listed: Vec<(ProjectId, DiskUsageReport)> = match self.published.read() {
            Ok(published) => {
                let engine = AggregationEngine::new(&published);
                projects
                    .into_iter()
                    .map(|p| {
                        let report = engine.report(&p);
                        (p, report)
                    })
                    .collect()
            }
            Err(_) => Vec::new(),
        };
        listed.sort_by(|a, b| {
            let a_total = a.1.build_usage + a.1.workspace_usage;
            let b_total = b.1.build_usage + b.1.workspace_usage;
            b_total.cmp(&a_total)
        });

        let mut summary = UsageSummary::default();
        for (_, report) in &listed {
            summary.total_build_usage += report.build_usage;
            summary.total_workspace_usage += report.workspace_usage;
            summary.predicted_needed_space += report.predicted_needed_space;
        }
        summary.free_disk_space = free_disk_space(&self.config.storage_root);
        (listed, summary)
    }

    /// Stray workspace paths recorded for a project and its sub-projects.
    pub async fn get_exceeded_paths(&self, project: &str) -> Vec<ExceededPathRecord> {
        self.warm_published(project).await;
        let Ok(published) = self.published.read() else {
            return Vec::new();
        };

        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![project.to_string()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(record) = published.get(&current) {
                out.extend(record.exceeded_paths.iter().cloned());
                stack.extend(record.sub_projects.iter().cloned());
            }
        }
        out
    }

    /// Cleanup candidates for a project whose configured limit is
    /// exceeded, oldest first.
    pub async fn evaluate_threshold(&self, project: &str) -> Vec<ExceededPathRecord> {
        self.warm_published(project).await;
        match self.published.read() {
            Ok(published) => ThresholdEnforcer::new(&self.config).evaluate(&published, project),
            Err(_) => Vec::new(),
        }
    }

    /// Drop all cached and persisted state for a deleted project.
    pub async fn remove_project(&self, project: &str) -> crate::error::Result<()> {
        let mut records = self.records.lock().await;
        records.remove(project);
        if let Ok(mut published) = self.published.write() {
            published.remove(project);
        }
        self.store.remove(project).await
    }

    /// Size one build tree bottom-up: own artifacts excluding nested
    /// sub-build directories, then cumulative = own + direct sub-builds.
    /// Sub-build usages are recorded on their owning projects.
    async fn measure_build(
        &self,
        build: &BuildRef,
        records: &mut HashMap<ProjectId, ProjectUsage>,
    ) -> u64 {
        let mut order: Vec<&BuildRef> = Vec::new();
        let mut stack = vec![build];
        while let Some(current) = stack.pop() {
            order.push(current);
            for sub in &current.sub_builds {
                stack.push(sub);
            }
        }
        // reversed pre-order: descendants precede their parent
        order.reverse();

        let mut cumulative: HashMap<&str, u64> = HashMap::new();
        for current in order {
            let own = match self.hierarchy.build_root(&current.project, &current.id).await {
                Some(root) => {
                    let mut excluded = Vec::new();
                    for sub in &current.sub_builds {
                        if let Some(path) =
                            self.hierarchy.build_root(&sub.project, &sub.id).await
                        {
                            excluded.push(path);
                        }
                    }
                    let outcome = probe::probe_excluding(&root, &excluded);
                    for warning in &outcome.warnings {
                        warn!(
                            project = %current.project,
                            build = %current.id,
                            path = %warning.path.display(),
                            reason = %warning.reason,
                            "entry skipped while sizing build"
                        );
                    }
                    outcome.size
                }
                None => {
                    let err = Error::HierarchyInconsistency(format!(
                        "build '{}' of '{}' has no root directory",
                        current.id, current.project
                    ));
                    warn!(error = %err, "build contributes zero bytes");
                    0
                }
            };

            let subs: u64 = current
                .sub_builds
                .iter()
                .map(|s| cumulative.get(s.id.as_str()).copied().unwrap_or(0))
                .sum();
            let total = own + subs;
            cumulative.insert(current.id.as_str(), total);

            self.ensure_loaded(records, &current.project).await;
            if let Some(record) = records.get_mut(&current.project) {
                record.upsert_build(BuildUsage {
                    build_id: current.id.clone(),
                    number: current.number,
                    own_size: own,
                    cumulative_size: total,
                });
            }
        }
        cumulative.get(build.id.as_str()).copied().unwrap_or(0)
    }

    /// Lazy load-through from the store; a missing or unreadable record
    /// starts fresh rather than failing the caller.
    async fn ensure_loaded(
        &self,
        records: &mut HashMap<ProjectId, ProjectUsage>,
        project: &str,
    ) {
        if records.contains_key(project) {
            return;
        }
        let record = match self.store.load(project).await {
            Ok(Some(record)) => record,
            Ok(None) => ProjectUsage::new(project),
            Err(err) => {
                warn!(project, error = %err, "failed to load usage record, starting fresh");
                ProjectUsage::new(project)
            }
        };
        records.insert(project.to_string(), record);
    }

    /// Make a persisted record visible to readers before the first
    /// recalculation of this process lifetime.
    async fn warm_published(&self, project: &str) {
        let known = match self.published.read() {
            Ok(published) => published.contains_key(project),
            Err(_) => true,
        };
        if known {
            return;
        }
        if let Ok(Some(record)) = self.store.load(project).await {
            let children = record.sub_projects.clone();
            if let Ok(mut published) = self.published.write() {
                published.entry(project.to_string()).or_insert(record);
            }
            for child in children {
                Box::pin(self.warm_published(&child)).await;
            }
        }
    }

    /// Persist the given records and refresh their published snapshots.
    /// A persistence failure leaves the in-memory record authoritative
    /// for this cycle.
    async fn persist_and_publish(
        &self,
        records: &HashMap<ProjectId, ProjectUsage>,
        projects: &[ProjectId],
    ) {
        for project in projects {
            let Some(record) = records.get(project) else {
                continue;
            };
            if let Err(err) = self.store.persist(record).await {
                warn!(%project, error = %err, "failed to persist usage record, keeping in memory");
            }
            if let Ok(mut published) = self.published.write() {
                published.insert(project.clone(), record.clone());
            }
        }
    }

    fn log_threshold(&self, records: &HashMap<ProjectId, ProjectUsage>, project: &str) {
        let candidates = ThresholdEnforcer::new(&self.config).evaluate(records, project);
        if !candidates.is_empty() {
            warn!(
                project,
                candidates = candidates.len(),
                "project exceeds its configured disk usage limit"
            );
        }
    }
}

/// Every project owning a build in the given build tree.
fn build_projects(build: &BuildRef) -> Vec<ProjectId> {
    let mut out = Vec::new();
    let mut stack = vec![build];
    while let Some(current) = stack.pop() {
        if !out.contains(&current.project) {
            out.push(current.project.clone());
        }
        for sub in &current.sub_builds {
            stack.push(sub);
        }
    }
    out
}

/// A build counts as measured when it and all its direct sub-builds are
/// already recorded; a new sub-build appearing forces a re-measure.
fn build_measured(records: &HashMap<ProjectId, ProjectUsage>, build: &BuildRef) -> bool {
    let recorded = records
        .get(&build.project)
        .and_then(|r| r.build(&build.id))
        .is_some();
    recorded && build.sub_builds.iter().all(|s| build_measured(records, s))
}

/// Available space on the volume holding `path`, by longest matching
/// mount point.
fn free_disk_space(path: &Path) -> u64 {
    let resolved: PathBuf = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .iter()
        .filter(|d| resolved.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| d.available_space())
        .unwrap_or(0)
}

/// Background periodic sweep plus on-demand triggers, all driving one
/// shared [`DiskUsageContext`].
pub struct RecalculationScheduler {
    ctx: Arc<DiskUsageContext>,
    /// Set while a sweep is in flight; ticks finding it set are skipped.
    running: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    worker: StdMutex<Option<JoinHandle<()>>>,
}

impl RecalculationScheduler {
    pub fn new(ctx: Arc<DiskUsageContext>) -> Self {
        Self {
            ctx,
            running: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            worker: StdMutex::new(None),
        }
    }

    pub fn context(&self) -> &Arc<DiskUsageContext> {
        &self.ctx
    }

    /// Whether a sweep is currently in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the background worker. Idempotent; a second call while the
    /// worker lives is a no-op.
    pub fn start(&self) {
        let Ok(mut guard) = self.worker.lock() else {
            return;
        };
        if guard.is_some() {
            return;
        }
        *guard = Some(spawn_supervisor(
            Arc::clone(&self.ctx),
            Arc::clone(&self.running),
            Arc::clone(&self.stop),
            Arc::clone(&self.shutdown),
            self.ctx.config().recalc_interval,
        ));
    }

    /// Stop the worker and wait for it to wind down. A sweep in flight
    /// finishes its current project first.
    pub async fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        let handle = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Manual recalculation. Returns `false` when a full sweep was
    /// requested while one is already in flight.
    pub async fn trigger(&self, scope: RecalcScope) -> bool {
        match scope {
            RecalcScope::Project(project) => {
                if let Err(err) = self.ctx.recalculate_project(&project).await {
                    warn!(%project, error = %err, "manual recalculation failed");
                }
                true
            }
            RecalcScope::FullSweep => {
                if self
                    .running
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    info!("sweep already in progress, manual trigger skipped");
                    return false;
                }
                self.ctx.run_sweep(&self.stop).await;
                self.running.store(false, Ordering::SeqCst);
                true
            }
        }
    }

    /// Build-completion hook, delegated to the context. Runs on the
    /// caller's task, concurrently with the background worker; record
    /// mutation is serialized inside the context.
    pub async fn on_build_completed(&self, build: &BuildRef) {
        self.ctx.on_build_completed(build).await;
    }
}

/// Outer self-healing loop: the worker crashing is the one condition that
/// warrants an automatic restart rather than a one-shot skip.
fn spawn_supervisor(
    ctx: Arc<DiskUsageContext>,
    running: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let worker = tokio::spawn(worker_loop(
                Arc::clone(&ctx),
                Arc::clone(&running),
                Arc::clone(&stop),
                Arc::clone(&shutdown),
                period,
            ));
            match worker.await {
                Ok(()) => break,
                Err(err) => {
                    let fault = Error::SchedulerFault(err.to_string());
                    error!(error = %fault, "disk usage worker crashed, restarting");
                    running.store(false, Ordering::SeqCst);
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                }
            }
        }
    })
}

async fn worker_loop(
    ctx: Arc<DiskUsageContext>,
    running: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // the first tick of a fresh interval completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if stop.load(Ordering::SeqCst) {
                    return;
                }
                if running
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    debug!("previous sweep still running, skipping tick");
                    continue;
                }
                ctx.run_sweep(&stop).await;
                running.store(false, Ordering::SeqCst);
                // a shutdown notification during the sweep will have been
                // missed by the select arm
                if stop.load(Ordering::SeqCst) {
                    return;
                }
            }
            _ = shutdown.notified() => return,
        }
    }
}

//! Lifecycle state machine for the seccomp and biolatency trace jobs.
//!
//! State is derived fresh from every snapshot with
//! [`tracedeck_reconcile::derive_state`]. Intents (`start`, `stop`,
//! `restart`) are expressed as JSON patches against the singleton trace
//! resource; local state only moves optimistically and is reconciled by the
//! next poll.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::future::join_all;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracedeck_id::Namespace;
use tracedeck_reconcile::{derive_state, Derivation, JobSnapshot, LifecycleState, RemoteState};
use tracing::{debug, info, warn};

use crate::cluster::{annotation_path, ClusterApi, JobId, PatchOp, TraceJob, GADGET_NAMESPACE};
use crate::error::{ItemFailure, Result, TraceError};

/// Annotation carrying the requested operation.
pub const OPERATION_ANNOTATION: &str = "gadget.kinvolk.io/operation";

// =============================================================================
// Job kinds
// =============================================================================

/// The two annotation-driven trace jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Syscall tracing that generates one seccomp profile per running pod.
    Seccomp,
    /// Block I/O latency capture reported through `status.output`.
    Biolatency,
}

impl JobKind {
    pub fn resource_name(&self) -> &'static str {
        match self {
            Self::Seccomp => "seccomp",
            Self::Biolatency => "biolatency",
        }
    }

    /// Annotation whose presence means a run is in progress.
    pub fn running_key(&self) -> &'static str {
        match self {
            Self::Seccomp => "headlampSeccompTimestamp",
            Self::Biolatency => "headlampTimestamp",
        }
    }

    pub fn start_key(&self) -> &'static str {
        match self {
            Self::Seccomp => "headlampSeccompStartTimestamp",
            Self::Biolatency => "headlampStartTimestamp",
        }
    }

    pub fn final_key(&self) -> &'static str {
        match self {
            Self::Seccomp => "headlampSeccompFinalTimestamp",
            Self::Biolatency => "headlampFinalTimestamp",
        }
    }

    /// Whether stopping must first ask for per-pod profile generation.
    pub fn generates_profiles(&self) -> bool {
        matches!(self, Self::Seccomp)
    }

    pub fn job_id(&self) -> JobId {
        JobId::new(GADGET_NAMESPACE, self.resource_name())
    }

    /// Extract the fields that drive derivation.
    pub fn snapshot(&self, job: &TraceJob) -> JobSnapshot {
        JobSnapshot {
            running_since: job.annotation(self.running_key()).map(str::to_string),
            started_at: job.annotation(self.start_key()).map(str::to_string),
            finished_at: job.annotation(self.final_key()).map(str::to_string),
            state: job.status.state.as_deref().map(RemoteState::parse),
            operation_error: job.status.operation_error.clone(),
            output: job.status.output.clone(),
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.resource_name())
    }
}

impl std::str::FromStr for JobKind {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "seccomp" => Ok(Self::Seccomp),
            "biolatency" => Ok(Self::Biolatency),
            other => Err(TraceError::Config(format!("unknown job kind: {other}"))),
        }
    }
}

// =============================================================================
// Timestamps
// =============================================================================

/// Epoch milliseconds as written into timestamp annotations.
pub fn timestamp_millis(at: DateTime<Utc>) -> String {
    at.timestamp_millis().to_string()
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = value.trim().parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

/// Renders a duration as `{h}h{m}m{s}s`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Patch ops writing annotations. When the object has none yet the whole map
/// is added, since JSON patch cannot add below a missing parent.
fn annotate(job: &TraceJob, entries: &[(&str, String)]) -> Vec<PatchOp> {
    if job.metadata.annotations.is_empty() {
        let map: Map<String, Value> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.clone())))
            .collect();
        return vec![PatchOp::add("/metadata/annotations", Value::Object(map))];
    }

    entries
        .iter()
        .map(|(k, v)| PatchOp::add(annotation_path(k), v.clone()))
        .collect()
}

// =============================================================================
// State machine
// =============================================================================

/// Outcome of the generation phase of `stop()`.
#[derive(Debug, Default)]
pub struct StopReport {
    /// `<namespace>/<pod>` for every generation patch that succeeded.
    pub generated: Vec<String>,
    pub failures: Vec<ItemFailure>,
}

impl StopReport {
    /// Turns generation failures into [`TraceError::GenerationIncomplete`].
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.failures.is_empty() {
            Ok(self.generated)
        } else {
            Err(TraceError::GenerationIncomplete {
                failures: self.failures,
            })
        }
    }
}

/// Long-lived lifecycle of one trace job.
pub struct JobLifecycle {
    cluster: Arc<dyn ClusterApi>,
    kind: JobKind,
    job: JobId,
    state: LifecycleState,
    latest: Option<TraceJob>,
    notice: Option<String>,
    output: Option<String>,
    started_observed_at: Option<DateTime<Utc>>,
}

impl JobLifecycle {
    pub fn new(cluster: Arc<dyn ClusterApi>, kind: JobKind) -> Self {
        Self {
            cluster,
            kind,
            job: kind.job_id(),
            state: LifecycleState::NotStarted,
            latest: None,
            notice: None,
            output: None,
            started_observed_at: None,
        }
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn job(&self) -> &JobId {
        &self.job
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Standing error notice, if any.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn dismiss_notice(&mut self) {
        self.notice = None;
    }

    /// Output captured from the last completed run.
    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn latest(&self) -> Option<&TraceJob> {
        self.latest.as_ref()
    }

    /// Derive state from a new snapshot.
    pub fn observe(&mut self, job: TraceJob) -> Derivation {
        let derivation = derive_state(self.state, &self.kind.snapshot(&job));

        if derivation.state != self.state {
            info!(
                job = %self.job,
                from = %self.state,
                to = %derivation.state,
                "Trace job state changed"
            );
            if derivation.state == LifecycleState::Started {
                self.started_observed_at = Some(Utc::now());
            }
        }

        if let Some(error) = &derivation.error {
            if self.notice.as_deref() != Some(error) {
                warn!(job = %self.job, error = %error, "Trace job reported an error");
            }
            self.notice = Some(error.clone());
        }
        if let Some(output) = &derivation.output {
            self.output = Some(output.clone());
        }

        self.state = derivation.state;
        self.latest = Some(job);
        derivation
    }

    /// Fetch a fresh snapshot and derive from it.
    pub async fn refresh(&mut self) -> Result<Derivation> {
        let job = self.cluster.get_trace_job(&self.job).await?;
        Ok(self.observe(job))
    }

    async fn current(&mut self) -> Result<TraceJob> {
        match &self.latest {
            Some(job) => Ok(job.clone()),
            None => {
                self.refresh().await?;
                self.latest
                    .clone()
                    .ok_or_else(|| TraceError::lookup(self.job.to_string(), "no snapshot"))
            }
        }
    }

    /// Ask the gadget to start collecting.
    ///
    /// Local state moves to `Started` before the patch is sent and stays
    /// there if it fails; the failure becomes the standing notice.
    pub async fn start(&mut self, namespace: Option<&Namespace>) -> Result<()> {
        let current = self.current().await?;
        let now = Utc::now();

        let mut ops = Vec::new();
        if self.kind.generates_profiles() {
            let ns = namespace.map(Namespace::as_str).unwrap_or_default();
            ops.push(PatchOp::replace("/spec/filter/namespace", ns));
        }
        ops.extend(annotate(
            &current,
            &[
                (OPERATION_ANNOTATION, "start".to_string()),
                (self.kind.start_key(), timestamp_millis(now)),
            ],
        ));

        self.state = LifecycleState::Started;
        self.started_observed_at = Some(now);
        self.notice = None;
        self.output = None;

        info!(job = %self.job, namespace = ?namespace.map(Namespace::as_str), "Starting trace job");
        if let Err(e) = self.cluster.patch_trace_job(&self.job, &ops).await {
            warn!(job = %self.job, error = %e, "Start patch failed");
            self.notice = Some(e.to_string());
            return Err(e);
        }

        self.record_annotations(&[
            (OPERATION_ANNOTATION, "start".to_string()),
            (self.kind.start_key(), timestamp_millis(now)),
        ]);
        Ok(())
    }

    /// Mirror annotations just written so follow-up patches see them before
    /// the next poll.
    fn record_annotations(&mut self, entries: &[(&str, String)]) {
        if let Some(latest) = &mut self.latest {
            for (key, value) in entries {
                latest
                    .metadata
                    .annotations
                    .insert(key.to_string(), value.clone());
            }
        }
    }

    /// `start()` reapplied.
    pub async fn restart(&mut self, namespace: Option<&Namespace>) -> Result<()> {
        self.start(namespace).await
    }

    /// Record the running timestamp if the job is `Started` but unmarked.
    ///
    /// Returns true when a patch was issued.
    pub async fn mark_running(&mut self) -> Result<bool> {
        if self.state != LifecycleState::Started {
            return Ok(false);
        }
        let current = self.current().await?;
        if current.annotation(self.kind.running_key()).is_some() {
            return Ok(false);
        }

        let entries = [(self.kind.running_key(), timestamp_millis(Utc::now()))];
        let ops = annotate(&current, &entries);
        self.cluster.patch_trace_job(&self.job, &ops).await?;

        self.record_annotations(&entries);
        debug!(job = %self.job, "Marked trace job as running");
        Ok(true)
    }

    /// Stop the job without losing partial results.
    ///
    /// For profile-generating jobs, one generation patch is issued per
    /// running pod in `namespace` and all of them are awaited, successes and
    /// failures alike, before the stop patch goes out. Generation failures
    /// are returned in the report; they never prevent the stop.
    pub async fn stop(&mut self, namespace: Option<&Namespace>) -> Result<StopReport> {
        let mut report = StopReport::default();

        if self.kind.generates_profiles() {
            let ns = namespace.map(Namespace::as_str);
            let pods = self.cluster.list_pods(ns).await?;
            let running: Vec<_> = pods.into_iter().filter(|p| p.is_running()).collect();
            debug!(job = %self.job, pods = running.len(), "Requesting profile generation");

            let results = join_all(running.iter().map(|pod| {
                let ops = generation_ops(pod.metadata.namespace_or_default(), &pod.metadata.name);
                let cluster = Arc::clone(&self.cluster);
                let job = self.job.clone();
                async move { cluster.patch_trace_job(&job, &ops).await }
            }))
            .await;

            for (pod, result) in running.iter().zip(results) {
                match result {
                    Ok(()) => report.generated.push(pod.qualified_name()),
                    Err(e) => {
                        warn!(pod = %pod.qualified_name(), error = %e, "Profile generation failed");
                        report.failures.push(ItemFailure::new(pod.qualified_name(), e));
                    }
                }
            }
        }

        // Another writer may have marked the job running since our last look.
        self.refresh().await?;
        let current = self.current().await?;
        let mut ops = annotate(&current, &[(OPERATION_ANNOTATION, "stop".to_string())]);
        if current.annotation(self.kind.running_key()).is_some() {
            ops.push(PatchOp::remove(annotation_path(self.kind.running_key())));
        }

        info!(job = %self.job, "Stopping trace job");
        if let Err(e) = self.cluster.patch_trace_job(&self.job, &ops).await {
            self.notice = Some(e.to_string());
            return Err(e);
        }

        let mut stopped = current;
        stopped
            .metadata
            .annotations
            .insert(OPERATION_ANNOTATION.to_string(), "stop".to_string());
        stopped.metadata.annotations.remove(self.kind.running_key());

        let finished = timestamp_millis(Utc::now());
        let final_ops = annotate(&stopped, &[(self.kind.final_key(), finished.clone())]);
        match self.cluster.patch_trace_job(&self.job, &final_ops).await {
            Ok(()) => {
                stopped
                    .metadata
                    .annotations
                    .insert(self.kind.final_key().to_string(), finished);
            }
            Err(e) => {
                warn!(job = %self.job, error = %e, "Failed to record final timestamp");
                self.notice = Some(e.to_string());
            }
        }

        self.latest = Some(stopped);
        self.state = LifecycleState::Stopped;
        if !report.failures.is_empty() {
            self.notice = Some(format!(
                "Profile generation failed for {} pod(s)",
                report.failures.len()
            ));
        }
        Ok(report)
    }

    /// Time since the run began, from the running annotation or, failing
    /// that, from when this machine saw the job start.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.state != LifecycleState::Started {
            return None;
        }
        let since = self
            .latest
            .as_ref()
            .and_then(|job| job.annotation(self.kind.running_key()))
            .and_then(parse_timestamp)
            .or(self.started_observed_at)?;
        (now - since).to_std().ok()
    }

    /// Start and final timestamps of the last recorded run.
    pub fn recorded_window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let job = self.latest.as_ref()?;
        let start = parse_timestamp(job.annotation(self.kind.start_key())?)?;
        let end = parse_timestamp(job.annotation(self.kind.final_key())?)?;
        Some((start, end))
    }
}

/// Generation request for one pod.
fn generation_ops(namespace: &str, pod: &str) -> Vec<PatchOp> {
    vec![
        PatchOp::add(annotation_path(OPERATION_ANNOTATION), "generate"),
        PatchOp::add("/spec/filter/podname", pod),
        PatchOp::replace("/spec/output", format!("{namespace}/{pod}")),
    ]
}

// =============================================================================
// Elapsed ticker
// =============================================================================

/// Cancellable one-second ticker publishing the formatted elapsed time.
pub struct ElapsedTicker {
    handle: Option<JoinHandle<()>>,
    rx: watch::Receiver<String>,
}

impl ElapsedTicker {
    /// Tick from an elapsed offset of `already`.
    pub fn spawn(already: Duration) -> Self {
        let (tx, rx) = watch::channel(format_elapsed(already));
        let handle = tokio::spawn(async move {
            let base = tokio::time::Instant::now();
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                if tx.send(format_elapsed(already + base.elapsed())).is_err() {
                    break;
                }
            }
        });

        Self {
            handle: Some(handle),
            rx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.rx.clone()
    }

    pub fn current(&self) -> String {
        self.rx.borrow().clone()
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for ElapsedTicker {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::fixtures;
    use crate::cluster::{FailPoint, FakeCluster, Mutation};
    use serde_json::json;

    async fn setup(kind: JobKind) -> (Arc<FakeCluster>, JobLifecycle) {
        let cluster = Arc::new(FakeCluster::new());
        cluster.insert_trace(fixtures::trace(kind.resource_name())).await;
        let lifecycle = JobLifecycle::new(cluster.clone(), kind);
        (cluster, lifecycle)
    }

    fn trace_patches(mutations: &[Mutation]) -> Vec<Vec<PatchOp>> {
        mutations
            .iter()
            .filter_map(|m| match m {
                Mutation::PatchTrace { ops, .. } => Some(ops.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "0h0m0s");
        assert_eq!(format_elapsed(Duration::from_secs(3725)), "1h2m5s");
    }

    #[test]
    fn test_parse_timestamp() {
        let at = parse_timestamp("1700000000000").unwrap();
        assert_eq!(timestamp_millis(at), "1700000000000");
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_job_kind_keys() {
        assert_eq!(JobKind::Seccomp.running_key(), "headlampSeccompTimestamp");
        assert_eq!(JobKind::Biolatency.final_key(), "headlampFinalTimestamp");
        assert_eq!(JobKind::Biolatency.job_id(), JobId::new("gadget", "biolatency"));
        assert_eq!("seccomp".parse::<JobKind>().unwrap(), JobKind::Seccomp);
        assert!("exec".parse::<JobKind>().is_err());
    }

    #[tokio::test]
    async fn test_start_seccomp_writes_namespace_and_annotations() {
        let (cluster, mut lifecycle) = setup(JobKind::Seccomp).await;
        let ns = Namespace::parse("shop").unwrap();

        lifecycle.start(Some(&ns)).await.unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Started);

        let job = cluster.trace(lifecycle.job()).await.unwrap();
        assert_eq!(job.spec["filter"]["namespace"], "shop");
        assert_eq!(job.annotation(OPERATION_ANNOTATION), Some("start"));
        assert!(job.annotation("headlampSeccompStartTimestamp").is_some());
    }

    #[tokio::test]
    async fn test_start_failure_keeps_optimistic_state() {
        let (cluster, mut lifecycle) = setup(JobKind::Biolatency).await;
        lifecycle.refresh().await.unwrap();
        cluster.fail(FailPoint::PatchTrace).await;

        assert!(lifecycle.start(None).await.is_err());
        assert_eq!(lifecycle.state(), LifecycleState::Started);
        assert!(lifecycle.notice().unwrap().contains("injected failure"));

        lifecycle.dismiss_notice();
        assert!(lifecycle.notice().is_none());
    }

    #[tokio::test]
    async fn test_observe_captures_output_and_error() {
        let (cluster, mut lifecycle) = setup(JobKind::Biolatency).await;
        lifecycle.start(None).await.unwrap();

        cluster
            .set_trace_status(
                lifecycle.job(),
                json!({"state": "Completed", "output": "usecs : count"}),
            )
            .await;
        lifecycle.refresh().await.unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
        assert_eq!(lifecycle.output(), Some("usecs : count"));

        cluster
            .set_trace_status(lifecycle.job(), json!({"operationError": "node not found"}))
            .await;
        lifecycle.refresh().await.unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
        assert_eq!(lifecycle.notice(), Some("node not found"));
    }

    #[tokio::test]
    async fn test_mark_running_once() {
        let (cluster, mut lifecycle) = setup(JobKind::Biolatency).await;
        assert!(!lifecycle.mark_running().await.unwrap());

        lifecycle.start(None).await.unwrap();
        assert!(lifecycle.mark_running().await.unwrap());
        assert!(!lifecycle.mark_running().await.unwrap());

        lifecycle.refresh().await.unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Started);
        let job = cluster.trace(lifecycle.job()).await.unwrap();
        assert!(job.annotation("headlampTimestamp").is_some());
        assert!(lifecycle.elapsed(Utc::now()).is_some());
    }

    #[tokio::test]
    async fn test_stop_generates_before_stopping() {
        let (cluster, mut lifecycle) = setup(JobKind::Seccomp).await;
        cluster.insert_pod(fixtures::pod("shop", "web-1", "Running")).await;
        cluster.insert_pod(fixtures::pod("shop", "web-2", "Running")).await;
        cluster.insert_pod(fixtures::pod("shop", "job-1", "Succeeded")).await;
        cluster.fail(FailPoint::GenerateFor("web-2".into())).await;

        let ns = Namespace::parse("shop").unwrap();
        lifecycle.start(Some(&ns)).await.unwrap();
        lifecycle.mark_running().await.unwrap();

        let report = lifecycle.stop(Some(&ns)).await.unwrap();
        assert_eq!(report.generated, vec!["shop/web-1"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].target, "shop/web-2");
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
        assert!(lifecycle.notice().unwrap().contains("1 pod(s)"));

        let patches = trace_patches(&cluster.mutations().await);
        // start, mark_running, two generations, stop, final timestamp
        assert_eq!(patches.len(), 6);
        let stop = &patches[4];
        assert!(stop.contains(&PatchOp::add(annotation_path(OPERATION_ANNOTATION), "stop")));
        assert!(stop.contains(&PatchOp::remove(annotation_path("headlampSeccompTimestamp"))));
        assert!(patches[5][0].path().ends_with("headlampSeccompFinalTimestamp"));

        let job = cluster.trace(lifecycle.job()).await.unwrap();
        assert!(job.annotation("headlampSeccompTimestamp").is_none());
        assert!(lifecycle.recorded_window().is_some());
        assert!(report.into_result().is_err());
    }

    #[tokio::test]
    async fn test_stop_without_running_key_skips_remove() {
        let (cluster, mut lifecycle) = setup(JobKind::Biolatency).await;
        lifecycle.start(None).await.unwrap();

        let report = lifecycle.stop(None).await.unwrap();
        assert!(report.generated.is_empty());

        let patches = trace_patches(&cluster.mutations().await);
        let stop = &patches[1];
        assert!(stop.iter().all(|op| !matches!(op, PatchOp::Remove { .. })));
    }

    #[tokio::test]
    async fn test_stop_removes_running_key_written_elsewhere() {
        let (cluster, mut lifecycle) = setup(JobKind::Biolatency).await;
        lifecycle.start(None).await.unwrap();

        let mut watcher = JobLifecycle::new(cluster.clone(), JobKind::Biolatency);
        cluster
            .set_trace_status(lifecycle.job(), json!({"state": "Started"}))
            .await;
        watcher.refresh().await.unwrap();
        assert!(watcher.mark_running().await.unwrap());

        lifecycle.stop(None).await.unwrap();

        let patches = trace_patches(&cluster.mutations().await);
        // start, mark_running, stop, final timestamp
        assert_eq!(patches.len(), 4);
        assert!(patches[2].contains(&PatchOp::remove(annotation_path("headlampTimestamp"))));
        let job = cluster.trace(lifecycle.job()).await.unwrap();
        assert!(job.annotation("headlampTimestamp").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_ticker() {
        let mut ticker = ElapsedTicker::spawn(Duration::from_secs(59));
        let mut rx = ticker.subscribe();
        assert_eq!(ticker.current(), "0h0m59s");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        rx.changed().await.unwrap();
        assert_eq!(ticker.current(), "0h1m0s");

        ticker.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.changed().await.is_err());
    }
}

//! Headless watch loop.
//!
//! The reconciler:
//! - Polls every configured trace job and derives its lifecycle state
//! - Logs state transitions, job errors and biolatency histograms
//! - Periodically refreshes the seccomp policy buckets

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;
use tracedeck_id::Namespace;
use tracedeck_reconcile::LifecycleState;
use tracing::{debug, error, info, warn};

use crate::cluster::{wait_cancelled, ClusterApi};
use crate::histogram::parse_histogram;
use crate::lifecycle::{JobKind, JobLifecycle};
use crate::policies::PolicyReconciler;
use crate::poller::JobPoller;

/// Reconciliation loop configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Interval between trace job polls.
    pub poll_interval: Duration,

    /// Interval between policy listing refreshes.
    pub refresh_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            refresh_interval: Duration::from_secs(30),
        }
    }
}

/// Latest derived state per job.
pub type JobStates = HashMap<JobKind, LifecycleState>;

/// Watches trace jobs and policies until shutdown.
pub struct Reconciler {
    cluster: Arc<dyn ClusterApi>,
    jobs: Vec<JobKind>,
    namespace: Option<Namespace>,
    config: ReconcilerConfig,
    states: watch::Sender<JobStates>,
}

impl Reconciler {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        jobs: Vec<JobKind>,
        namespace: Option<Namespace>,
        config: ReconcilerConfig,
    ) -> Self {
        let (states, _) = watch::channel(JobStates::new());
        Self {
            cluster,
            jobs,
            namespace,
            config,
            states,
        }
    }

    /// Receives the job states after every poll.
    pub fn subscribe(&self) -> watch::Receiver<JobStates> {
        self.states.subscribe()
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!(
            jobs = ?self.jobs,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            refresh_interval_secs = self.config.refresh_interval.as_secs(),
            "Starting reconciliation loop"
        );

        let jobs = join_all(
            self.jobs
                .iter()
                .map(|kind| self.watch_job(*kind, shutdown.clone())),
        );

        if self.jobs.contains(&JobKind::Seccomp) {
            tokio::join!(jobs, self.watch_policies(shutdown));
        } else {
            jobs.await;
        }

        info!("Reconciler shutting down");
    }

    async fn watch_job(&self, kind: JobKind, mut shutdown: watch::Receiver<bool>) {
        let mut lifecycle = JobLifecycle::new(Arc::clone(&self.cluster), kind);
        let mut subscription = JobPoller::new(Arc::clone(&self.cluster), kind.job_id())
            .with_interval(self.config.poll_interval)
            .subscribe();
        let mut last_output: Option<String> = None;

        loop {
            tokio::select! {
                item = subscription.next() => match item {
                    Some(Ok(job)) => {
                        let derivation = lifecycle.observe(job);
                        self.states.send_modify(|s| {
                            s.insert(kind, derivation.state);
                        });

                        if derivation.state == LifecycleState::Started {
                            match lifecycle.mark_running().await {
                                Ok(true) => info!(job = %kind, "Trace job is running"),
                                Ok(false) => {}
                                Err(e) => warn!(job = %kind, error = %e, "Failed to mark job running"),
                            }
                        }

                        if kind == JobKind::Biolatency && derivation.output != last_output {
                            if let Some(output) = &derivation.output {
                                log_histogram(output);
                            }
                            last_output = derivation.output;
                        }
                    }
                    // The poller already logged the failure.
                    Some(Err(e)) => debug!(job = %kind, error = %e, "Poll failed"),
                    None => break,
                },
                _ = wait_cancelled(&mut shutdown) => break,
            }
        }

        subscription.cancel().await;
        debug!(job = %kind, "Job watch stopped");
    }

    async fn watch_policies(&self, mut shutdown: watch::Receiver<bool>) {
        let mut policies = PolicyReconciler::new(Arc::clone(&self.cluster), self.namespace.clone());
        let mut ticker = tokio::time::interval(self.config.refresh_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = policies.refresh().await {
                        error!(error = %e, "Policy refresh failed");
                    }
                }
                _ = wait_cancelled(&mut shutdown) => break,
            }
        }
    }
}

fn log_histogram(output: &str) {
    let buckets = parse_histogram(output);
    let total: u64 = buckets.iter().map(|b| b.count).sum();
    let peak = buckets.iter().max_by_key(|b| b.count);
    info!(
        buckets = buckets.len(),
        total,
        peak_usecs = peak.map(|b| b.usecs.as_str()).unwrap_or("-"),
        "Block I/O latency captured"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::fixtures;
    use crate::cluster::{annotation_path, FakeCluster, Mutation, PatchOp};
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_tracks_job_states_until_shutdown() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.insert_trace(fixtures::trace("seccomp")).await;
        cluster.insert_trace(fixtures::trace("biolatency")).await;
        cluster.insert_pod(fixtures::pod("shop", "web-1", "Running")).await;
        cluster
            .insert_policy(fixtures::policy("shop", "a", Some("shop/web-1")))
            .await;

        let reconciler = Arc::new(Reconciler::new(
            cluster.clone(),
            vec![JobKind::Seccomp, JobKind::Biolatency],
            None,
            ReconcilerConfig {
                poll_interval: Duration::from_millis(100),
                refresh_interval: Duration::from_millis(500),
            },
        ));
        let mut states = reconciler.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let run = tokio::spawn({
            let reconciler = Arc::clone(&reconciler);
            async move { reconciler.run(shutdown_rx).await }
        });

        cluster
            .set_trace_status(
                &JobKind::Biolatency.job_id(),
                json!({"state": "Started"}),
            )
            .await;
        tokio::time::sleep(Duration::from_millis(350)).await;
        states.mark_changed();
        states.changed().await.unwrap();
        assert_eq!(
            states.borrow().get(&JobKind::Biolatency),
            Some(&LifecycleState::Started)
        );
        assert_eq!(
            states.borrow().get(&JobKind::Seccomp),
            Some(&LifecycleState::NotStarted)
        );

        shutdown_tx.send(true).unwrap();
        run.await.unwrap();

        // Only the started job gets its running timestamp.
        let mutations: Vec<Mutation> = cluster.mutations().await;
        assert_eq!(mutations.len(), 1);
        assert!(matches!(
            &mutations[0],
            Mutation::PatchTrace { job, .. } if *job == JobKind::Biolatency.job_id()
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_marks_started_job_running_once() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.insert_trace(fixtures::trace("seccomp")).await;
        cluster
            .set_trace_status(&JobKind::Seccomp.job_id(), json!({"state": "Started"}))
            .await;

        let reconciler = Arc::new(Reconciler::new(
            cluster.clone(),
            vec![JobKind::Seccomp],
            None,
            ReconcilerConfig {
                poll_interval: Duration::from_millis(100),
                refresh_interval: Duration::from_millis(500),
            },
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let run = tokio::spawn({
            let reconciler = Arc::clone(&reconciler);
            async move { reconciler.run(shutdown_rx).await }
        });

        tokio::time::sleep(Duration::from_millis(450)).await;
        shutdown_tx.send(true).unwrap();
        run.await.unwrap();

        let running_key = JobKind::Seccomp.running_key();
        let patches: Vec<Vec<PatchOp>> = cluster
            .mutations()
            .await
            .into_iter()
            .filter_map(|m| match m {
                Mutation::PatchTrace { ops, .. } => Some(ops),
                _ => None,
            })
            .collect();
        // Later polls see the key and leave it alone.
        assert_eq!(patches.len(), 1);
        assert!(patches[0].iter().any(|op| match op {
            PatchOp::Add { path, value } => {
                path == &annotation_path(running_key)
                    || (path == "/metadata/annotations" && value.get(running_key).is_some())
            }
            _ => false,
        }));

        let job = cluster.trace(&JobKind::Seccomp.job_id()).await.unwrap();
        assert!(job.annotation(running_key).is_some());
    }

    #[test]
    fn test_default_config() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.refresh_interval, Duration::from_secs(30));
    }
}

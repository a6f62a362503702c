//! Job status poller.
//!
//! Exposes a singleton trace resource as a one-shot `get` or as a cancellable
//! polling subscription. Lookup failures are delivered as items and never
//! end the subscription.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cluster::{ClusterApi, JobId, TraceJob};
use crate::error::Result;

/// Default interval between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Polls one trace resource.
#[derive(Clone)]
pub struct JobPoller {
    cluster: Arc<dyn ClusterApi>,
    job: JobId,
    interval: Duration,
}

impl JobPoller {
    pub fn new(cluster: Arc<dyn ClusterApi>, job: JobId) -> Self {
        Self {
            cluster,
            job,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn job(&self) -> &JobId {
        &self.job
    }

    /// Fetch the current snapshot once.
    pub async fn get(&self) -> Result<TraceJob> {
        self.cluster.get_trace_job(&self.job).await
    }

    /// Start polling. The first snapshot is fetched immediately.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(8);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let cluster = Arc::clone(&self.cluster);
        let job = self.job.clone();
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let snapshot = cluster.get_trace_job(&job).await;
                        if let Err(e) = &snapshot {
                            warn!(job = %job, error = %e, "Trace lookup failed");
                        }
                        if tx.send(snapshot).await.is_err() {
                            break;
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!(job = %job, "Poller stopped");
                            break;
                        }
                    }
                }
            }
        });

        Subscription {
            rx,
            shutdown: shutdown_tx,
            handle: Some(handle),
        }
    }
}

/// Live polling subscription. Dropping it stops polling.
pub struct Subscription {
    rx: mpsc::Receiver<Result<TraceJob>>,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Next snapshot or lookup error; `None` after cancellation.
    pub async fn next(&mut self) -> Option<Result<TraceJob>> {
        self.rx.recv().await
    }

    /// Stop polling and wait for the task to exit.
    pub async fn cancel(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

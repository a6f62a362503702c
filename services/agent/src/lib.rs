//! tracedeck agent library
//!
//! Drives Inspektor Gadget trace jobs through annotations on singleton
//! `Trace` resources and reconciles the seccomp policies they generate
//! against live workloads.
//!
//! ## Modules
//!
//! - `cluster`: the [`ClusterApi`] capability, its Kubernetes client and an
//!   in-memory fake
//! - `poller`: one-shot and polling access to a trace resource
//! - `lifecycle`: start/stop/restart intents and derived job state
//! - `ownership`: owner-reference walk to the root workload
//! - `policies`: policy buckets and bulk apply/delete
//! - `logtail`: debounced accumulation of exec output
//! - `traces`: traceloop trace records held by gadget pods
//! - `plugin`: registration adapters for a dashboard host

pub mod cluster;
pub mod error;
pub mod histogram;
pub mod lifecycle;
pub mod logtail;
pub mod ownership;
pub mod plugin;
pub mod policies;
pub mod poller;
pub mod traces;

// Exposed for the binary and integration tests
pub mod config;
pub mod reconciler;

// Re-export commonly used types
pub use cluster::{ClusterApi, ClusterConfig, ExecTarget, FakeCluster, KubeClient};
pub use error::{ItemFailure, Result, TraceError};
pub use lifecycle::{JobKind, JobLifecycle, StopReport};
pub use logtail::{LogFollower, LogSnapshot, LogTailSession};
pub use ownership::OwnershipResolver;
pub use policies::{ApplyReport, DeleteReport, PolicyEntry, PolicyReconciler};
pub use poller::JobPoller;

//! Reconciliation decision primitives.
//!
//! This library holds the decision logic layered on top of cluster reads,
//! with no I/O of its own. Key concepts:
//!
//! - **Lifecycle derivation**: what state a remote trace job is in, computed
//!   fresh from every polled snapshot.
//! - **Classification**: how generated policies relate to live pods
//!   (available, applied, dangling).
//! - **Optimistic buckets**: local bucket state that is marked pending while a
//!   mutation is in flight and then committed or rolled back.
//!
//! # Invariants
//!
//! - Derivation is deterministic given the previous state and a snapshot
//! - Buckets always form a disjoint partition of the non-terminating policies
//! - Refreshing buckets from a newer listing is idempotent

mod buckets;
mod classify;
mod lifecycle;

pub use buckets::{PendingOp, PolicyBuckets};
pub use classify::{classify, Bucket, Buckets, PolicyView};
pub use lifecycle::{derive_state, Derivation, JobSnapshot, LifecycleState, RemoteState};

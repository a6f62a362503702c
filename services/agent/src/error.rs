//! Error taxonomy for trace jobs, policies and log streams.
//!
//! No variant is fatal to the process. Bulk operations collect per-item
//! failures into [`ItemFailure`] lists instead of aborting.

use thiserror::Error;
use tracedeck_id::WorkloadRef;

/// Convenience alias used throughout the agent.
pub type Result<T, E = TraceError> = std::result::Result<T, E>;

/// Errors from cluster operations and the components layered on them.
#[derive(Debug, Error)]
pub enum TraceError {
    /// A get or list call failed.
    #[error("Lookup failed for {what}: {message}")]
    LookupFailed { what: String, message: String },

    /// A single mutation was refused, by validation or by transport.
    #[error("Patch rejected for {target}: {message}")]
    PatchRejected { target: String, message: String },

    /// A lookup failed somewhere along an ownership chain.
    #[error("Root workload lookup failed for {object}")]
    OwnershipResolutionFailed {
        object: WorkloadRef,
        #[source]
        source: Box<TraceError>,
    },

    /// An ownership chain revisited a node.
    #[error("Ownership cycle detected at {at} while resolving {object}")]
    OwnershipCycle { object: WorkloadRef, at: WorkloadRef },

    #[error("{} of {total} operations failed", failures.len())]
    PartialBatchFailure {
        total: usize,
        failures: Vec<ItemFailure>,
    },

    /// One or more per-pod profile generation patches failed during stop.
    #[error("Profile generation failed for {} pod(s)", failures.len())]
    GenerationIncomplete { failures: Vec<ItemFailure> },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TraceError {
    pub fn lookup(what: impl Into<String>, message: impl ToString) -> Self {
        Self::LookupFailed {
            what: what.into(),
            message: message.to_string(),
        }
    }

    pub fn rejected(target: impl Into<String>, message: impl ToString) -> Self {
        Self::PatchRejected {
            target: target.into(),
            message: message.to_string(),
        }
    }

    /// Per-item failures carried by batch errors, empty otherwise.
    pub fn item_failures(&self) -> &[ItemFailure] {
        match self {
            Self::PartialBatchFailure { failures, .. } | Self::GenerationIncomplete { failures } => {
                failures
            }
            _ => &[],
        }
    }
}

/// Failure of one item inside a batch.
#[derive(Debug, Error)]
#[error("{target}: {error}")]
pub struct ItemFailure {
    /// Human-readable identity of the item, e.g. `shop/web-1`.
    pub target: String,
    #[source]
    pub error: TraceError,
}

impl ItemFailure {
    pub fn new(target: impl Into<String>, error: TraceError) -> Self {
        Self {
            target: target.into(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use tracedeck_id::WorkloadKind;

    #[test]
    fn test_batch_error_display() {
        let err = TraceError::PartialBatchFailure {
            total: 3,
            failures: vec![ItemFailure::new(
                "shop/web",
                TraceError::rejected("Deployment(shop/web)", "forbidden"),
            )],
        };
        assert_eq!(err.to_string(), "1 of 3 operations failed");
        assert_eq!(err.item_failures().len(), 1);
        assert_eq!(
            err.item_failures()[0].to_string(),
            "shop/web: Patch rejected for Deployment(shop/web): forbidden"
        );
    }

    #[test]
    fn test_ownership_error_keeps_source() {
        let err = TraceError::OwnershipResolutionFailed {
            object: WorkloadRef::pod("web-1", "shop"),
            source: Box::new(TraceError::lookup("replicasets/web-7d", "404 Not Found")),
        };
        assert_eq!(
            err.to_string(),
            "Root workload lookup failed for Pod(shop/web-1)"
        );
        let source = err.source().map(|s| s.to_string());
        assert_eq!(
            source.as_deref(),
            Some("Lookup failed for replicasets/web-7d: 404 Not Found")
        );

        let cycle = TraceError::OwnershipCycle {
            object: WorkloadRef::pod("web-1", "shop"),
            at: WorkloadRef::new(WorkloadKind::ReplicaSet, "web-7d", "shop"),
        };
        assert!(cycle.to_string().contains("ReplicaSet(shop/web-7d)"));
        assert!(cycle.item_failures().is_empty());
    }
}

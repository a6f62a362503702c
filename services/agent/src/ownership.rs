//! Ownership resolution: climb owner references to the top-level workload.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use tracedeck_id::{WorkloadKind, WorkloadRef};
use tracing::debug;

use crate::cluster::ClusterApi;
use crate::error::{Result, TraceError};

/// Resolves root workloads one hop at a time.
#[derive(Clone)]
pub struct OwnershipResolver {
    cluster: Arc<dyn ClusterApi>,
}

impl OwnershipResolver {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// Find the root workload of `object`.
    ///
    /// Only the first owner reference is followed. The walk stops at an
    /// object without owners, or at one whose first owner has an
    /// unrecognized kind; that object is the root. Any lookup failure aborts
    /// the walk, and revisiting a node is reported as a cycle.
    pub async fn resolve(&self, object: &WorkloadRef) -> Result<WorkloadRef> {
        let mut current = object.clone();
        let mut visited = HashSet::new();

        loop {
            if !visited.insert(current.clone()) {
                return Err(TraceError::OwnershipCycle {
                    object: object.clone(),
                    at: current,
                });
            }

            let owners = self
                .cluster
                .owner_references(&current)
                .await
                .map_err(|e| TraceError::OwnershipResolutionFailed {
                    object: object.clone(),
                    source: Box::new(e),
                })?;

            let Some(owner) = owners.first() else {
                debug!(object = %object, root = %current, "Resolved root workload");
                return Ok(current);
            };

            let kind = WorkloadKind::parse(&owner.kind);
            if !kind.is_recognized() {
                debug!(
                    object = %object,
                    root = %current,
                    owner_kind = %owner.kind,
                    "Stopping at unrecognized owner"
                );
                return Ok(current);
            }

            current = WorkloadRef::new(kind, owner.name.clone(), current.namespace.clone());
        }
    }

    /// Resolve several objects concurrently; each result is independent.
    pub async fn resolve_all(&self, objects: &[WorkloadRef]) -> Vec<Result<WorkloadRef>> {
        join_all(objects.iter().map(|o| self.resolve(o))).await
    }
}

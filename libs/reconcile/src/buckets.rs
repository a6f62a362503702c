//! Local policy buckets with two-phase optimistic updates.
//!
//! A bulk operation first marks each targeted policy as pending, then on
//! settlement either commits (the local change is applied) or rolls back
//! (the marker is cleared and the policy stays where it was). A refresh from
//! a newer listing replaces the buckets wholesale and only keeps markers for
//! policies that still exist.

use std::collections::BTreeMap;

use tracedeck_id::PolicyId;

use crate::classify::{Bucket, Buckets, PolicyView};

/// Mutation a pending marker stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOp {
    Apply,
    Delete,
}

/// Bucket store owned by the policy reconciler.
#[derive(Debug, Clone)]
pub struct PolicyBuckets<P> {
    buckets: Buckets<P>,
    pending: BTreeMap<PolicyId, PendingOp>,
}

impl<P> Default for PolicyBuckets<P> {
    fn default() -> Self {
        Self {
            buckets: Buckets::default(),
            pending: BTreeMap::new(),
        }
    }
}

impl<P: PolicyView> PolicyBuckets<P> {
    pub fn new(buckets: Buckets<P>) -> Self {
        Self {
            buckets,
            pending: BTreeMap::new(),
        }
    }

    pub fn buckets(&self) -> &Buckets<P> {
        &self.buckets
    }

    pub fn available(&self) -> &[P] {
        &self.buckets.available
    }

    pub fn applied(&self) -> &[P] {
        &self.buckets.applied
    }

    pub fn dangling(&self) -> &[P] {
        &self.buckets.dangling
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut P> {
        self.buckets.iter_mut()
    }

    /// Finds a policy by uid in any bucket.
    pub fn find_by_uid(&self, uid: &str) -> Option<(Bucket, &P)> {
        [Bucket::Available, Bucket::Applied, Bucket::Dangling]
            .into_iter()
            .find_map(|b| {
                self.buckets
                    .bucket(b)
                    .iter()
                    .find(|p| p.id().uid == uid)
                    .map(|p| (b, p))
            })
    }

    pub fn locate(&self, id: &PolicyId) -> Option<(Bucket, &P)> {
        self.buckets.locate(id)
    }

    /// Replace the buckets with a fresh classification.
    ///
    /// Markers for policies that disappeared are dropped; markers for
    /// policies still listed survive so an in-flight settlement can commit.
    pub fn refresh(&mut self, buckets: Buckets<P>) {
        self.pending
            .retain(|id, _| buckets.locate(id).is_some());
        self.buckets = buckets;
    }

    /// Phase one: mark a policy as having a mutation in flight.
    ///
    /// Returns false if the policy is not in any bucket.
    pub fn mark_pending(&mut self, id: &PolicyId, op: PendingOp) -> bool {
        if self.buckets.locate(id).is_none() {
            return false;
        }
        self.pending.insert(id.clone(), op);
        true
    }

    pub fn pending(&self, id: &PolicyId) -> Option<PendingOp> {
        self.pending.get(id).copied()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Phase two, success: apply the local effect of the pending operation.
    ///
    /// An apply removes the policy from `available`; a delete removes it from
    /// every bucket. Committing an unknown or already removed policy is a
    /// no-op.
    pub fn commit(&mut self, id: &PolicyId) {
        let Some(op) = self.pending.remove(id) else {
            return;
        };
        match op {
            PendingOp::Apply => self.remove_from(Bucket::Available, id),
            PendingOp::Delete => {
                for b in [Bucket::Available, Bucket::Applied, Bucket::Dangling] {
                    self.remove_from(b, id);
                }
            }
        }
    }

    /// Phase two, failure: clear the marker and leave the policy in place.
    pub fn rollback(&mut self, id: &PolicyId) {
        self.pending.remove(id);
    }

    fn remove_from(&mut self, bucket: Bucket, id: &PolicyId) {
        self.buckets.bucket_mut(bucket).retain(|p| p.id() != id);
    }
}

//! Policy reconciler.
//!
//! Lists generated seccomp policies next to the live pods of a namespace,
//! sorts them into available / applied / dangling buckets and runs bulk
//! apply and delete against the cluster. Bulk operations fan out one call
//! per policy, wait for every call to settle, and then commit or roll back
//! the pending marker of each policy individually.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use tracedeck_id::{Namespace, PolicyId, WorkloadKind, WorkloadRef};
use tracedeck_reconcile::{classify, Bucket, PendingOp, PolicyBuckets, PolicyView};
use tracing::{debug, info, warn};

use crate::cluster::{ClusterApi, PatchOp, SecurityPolicy};
use crate::error::{ItemFailure, Result, TraceError};
use crate::ownership::OwnershipResolver;

/// Annotation naming the pod a policy was generated for.
pub const POD_ANNOTATION: &str = "seccomp.gadget.kinvolk.io/pod";

/// Annotation naming the container a policy was generated for.
pub const CONTAINER_ANNOTATION: &str = "seccomp.gadget.kinvolk.io/container";

// =============================================================================
// Helpers
// =============================================================================

/// What a generation annotation records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationTarget {
    Pod,
    Container,
}

impl GenerationTarget {
    pub fn annotation(&self) -> &'static str {
        match self {
            Self::Pod => POD_ANNOTATION,
            Self::Container => CONTAINER_ANNOTATION,
        }
    }
}

/// Name the policy was generated for, without the `<namespace>/` prefix.
pub fn generated_for(policy: &SecurityPolicy, target: GenerationTarget) -> Option<&str> {
    let value = policy.metadata.annotation(target.annotation())?;
    let prefix = format!("{}/", policy.metadata.namespace_or_default());
    Some(value.strip_prefix(prefix.as_str()).unwrap_or(value))
}

/// Returns true if a pod security context carries no effective seccomp
/// profile: absent, empty, or explicitly `Unconfined`.
pub fn is_policy_unapplied(security_context: Option<&Value>) -> bool {
    let Some(ctx) = security_context else {
        return true;
    };
    if ctx.as_object().is_none_or(|o| o.is_empty()) {
        return true;
    }
    ctx.pointer("/seccompProfile/type").and_then(Value::as_str) == Some("Unconfined")
}

/// Policy count per namespace, including namespaces without policies.
pub fn count_by_namespace<'a>(
    namespaces: impl IntoIterator<Item = &'a str>,
    policies: &[SecurityPolicy],
) -> BTreeMap<String, usize> {
    let mut counts: BTreeMap<String, usize> =
        namespaces.into_iter().map(|ns| (ns.to_string(), 0)).collect();
    for policy in policies {
        *counts
            .entry(policy.metadata.namespace_or_default().to_string())
            .or_default() += 1;
    }
    counts
}

/// JSON pointer of the seccomp profile field in a workload's pod template.
pub fn profile_path(kind: &WorkloadKind) -> &'static str {
    match kind {
        WorkloadKind::Pod => "/spec/securityContext/seccompProfile",
        WorkloadKind::CronJob => "/spec/jobTemplate/spec/template/spec/securityContext/seccompProfile",
        _ => "/spec/template/spec/securityContext/seccompProfile",
    }
}

fn localhost_profile(profile: &str) -> Value {
    json!({
        "type": "Localhost",
        "localhostProfile": profile,
    })
}

// =============================================================================
// Entries
// =============================================================================

/// A listed policy with the attributes derived during refresh.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEntry {
    pub policy: SecurityPolicy,
    pub id: PolicyId,

    /// Pod the policy was generated for, without the `<namespace>/` prefix.
    pub generated_for: Option<String>,

    /// `<namespace>/<pod>` key matched against the live pod set. The pod is
    /// always looked up in the policy's own namespace.
    pub pod_key: Option<String>,

    /// The live pod the policy was generated for.
    pub attributed_pod: Option<WorkloadRef>,

    /// Top-level workload of the attributed pod, when resolution succeeded.
    pub root_workload: Option<WorkloadRef>,
}

impl PolicyEntry {
    fn new(policy: SecurityPolicy, live_pods: &HashSet<String>) -> Self {
        let id = policy.id();
        let generated_for = generated_for(&policy, GenerationTarget::Pod).map(str::to_string);
        let pod_key = generated_for
            .as_deref()
            .map(|pod| format!("{}/{pod}", id.namespace));
        let attributed_pod = generated_for
            .as_deref()
            .zip(pod_key.as_deref())
            .filter(|(_, key)| live_pods.contains(*key))
            .map(|(pod, _)| WorkloadRef::pod(pod, id.namespace.clone()));

        Self {
            policy,
            id,
            generated_for,
            pod_key,
            attributed_pod,
            root_workload: None,
        }
    }
}

impl PolicyView for PolicyEntry {
    fn id(&self) -> &PolicyId {
        &self.id
    }

    fn is_terminating(&self) -> bool {
        self.policy.is_terminating()
    }

    fn is_applied(&self) -> bool {
        !self.policy.status.active_workloads.is_empty()
    }

    fn generated_for_pod(&self) -> Option<&str> {
        self.pod_key.as_deref()
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Why a selected policy was left out of an apply batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The root workload is a bare pod.
    NoOwningWorkload,
    /// The root workload could not be resolved.
    Unresolved,
    /// The policy has no installed localhost profile yet.
    MissingProfile,
    /// No listed policy has the selected uid.
    NotFound,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NoOwningWorkload => "cannot be applied: no owning workload",
            Self::Unresolved => "cannot be applied: owning workload unknown",
            Self::MissingProfile => "cannot be applied: profile not installed",
            Self::NotFound => "not found",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    /// Policy identity, or the selected uid when no policy matched.
    pub policy: String,
    pub reason: RejectReason,
}

/// Outcome of [`PolicyReconciler::apply_bulk`].
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub applied: Vec<PolicyId>,
    pub rejected: Vec<Rejection>,
    pub failures: Vec<ItemFailure>,
}

impl ApplyReport {
    /// Number of workload patches issued.
    pub fn attempted(&self) -> usize {
        self.applied.len() + self.failures.len()
    }

    /// Collapse into an error if any patch failed.
    pub fn into_result(self) -> Result<Vec<PolicyId>> {
        if self.failures.is_empty() {
            return Ok(self.applied);
        }
        Err(TraceError::PartialBatchFailure {
            total: self.attempted(),
            failures: self.failures,
        })
    }
}

/// Outcome of [`PolicyReconciler::delete_bulk`].
#[derive(Debug, Default)]
pub struct DeleteReport {
    pub deleted: Vec<PolicyId>,
    pub failures: Vec<ItemFailure>,
    /// Selected uids with no listed policy.
    pub missing: Vec<String>,
}

impl DeleteReport {
    pub fn into_result(self) -> Result<Vec<PolicyId>> {
        if self.failures.is_empty() {
            return Ok(self.deleted);
        }
        Err(TraceError::PartialBatchFailure {
            total: self.deleted.len() + self.failures.len(),
            failures: self.failures,
        })
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Owns the local bucket snapshot for one namespace (or all namespaces).
pub struct PolicyReconciler {
    cluster: Arc<dyn ClusterApi>,
    resolver: OwnershipResolver,
    namespace: Option<Namespace>,
    buckets: PolicyBuckets<PolicyEntry>,
}

impl PolicyReconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>, namespace: Option<Namespace>) -> Self {
        Self {
            resolver: OwnershipResolver::new(Arc::clone(&cluster)),
            cluster,
            namespace,
            buckets: PolicyBuckets::default(),
        }
    }

    pub fn namespace(&self) -> Option<&Namespace> {
        self.namespace.as_ref()
    }

    pub fn buckets(&self) -> &PolicyBuckets<PolicyEntry> {
        &self.buckets
    }

    /// Re-list pods and policies, classify, and resolve root workloads.
    ///
    /// A failed resolution leaves `root_workload` unset for that policy
    /// only. Listing failures leave the previous snapshot untouched.
    pub async fn refresh(&mut self) -> Result<()> {
        let ns = self.namespace.as_ref().map(Namespace::as_str);
        let (pods, policies) = tokio::try_join!(
            self.cluster.list_pods(ns),
            self.cluster.list_policies(ns)
        )?;

        let live: HashSet<String> = pods.iter().map(|p| p.qualified_name()).collect();
        let mut entries: Vec<PolicyEntry> = policies
            .into_iter()
            .map(|p| PolicyEntry::new(p, &live))
            .collect();

        let resolver = &self.resolver;
        let roots = join_all(entries.iter().map(|entry| async move {
            match &entry.attributed_pod {
                Some(pod) => Some(resolver.resolve(pod).await),
                None => None,
            }
        }))
        .await;

        for (entry, root) in entries.iter_mut().zip(roots) {
            match root {
                Some(Ok(root)) => entry.root_workload = Some(root),
                Some(Err(e)) => {
                    warn!(policy = %entry.id, error = %e, "Root workload resolution failed");
                }
                None => {}
            }
        }

        let buckets = classify(entries, &live);
        info!(
            namespace = ns.unwrap_or("*"),
            available = buckets.available.len(),
            applied = buckets.applied.len(),
            dangling = buckets.dangling.len(),
            "Policies refreshed"
        );
        self.buckets.refresh(buckets);
        Ok(())
    }

    /// Apply the selected policies to their root workloads.
    ///
    /// Policies whose root is a bare pod, or whose root is unknown, are
    /// rejected without touching the cluster. Every other policy gets one
    /// workload patch; a success removes it from `available`, a failure
    /// leaves it where it was.
    pub async fn apply_bulk(&mut self, uids: &[String]) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut targets = Vec::new();
        let mut seen = HashSet::new();

        for uid in uids {
            if !seen.insert(uid.as_str()) {
                continue;
            }
            let Some((_, entry)) = self.buckets.find_by_uid(uid) else {
                report.rejected.push(Rejection {
                    policy: uid.clone(),
                    reason: RejectReason::NotFound,
                });
                continue;
            };

            let reason = match (&entry.root_workload, &entry.policy.status.localhost_profile) {
                (None, _) => RejectReason::Unresolved,
                (Some(root), _) if root.is_pod() => RejectReason::NoOwningWorkload,
                (Some(_), None) => RejectReason::MissingProfile,
                (Some(root), Some(profile)) => {
                    targets.push((entry.id.clone(), root.clone(), profile.clone()));
                    continue;
                }
            };
            debug!(policy = %entry.id, %reason, "Policy rejected from apply");
            report.rejected.push(Rejection {
                policy: entry.id.to_string(),
                reason,
            });
        }

        for (id, _, _) in &targets {
            self.buckets.mark_pending(id, PendingOp::Apply);
        }

        let cluster = &self.cluster;
        let results = join_all(targets.iter().map(|(_, root, profile)| async move {
            let ops = [PatchOp::add(profile_path(&root.kind), localhost_profile(profile))];
            cluster.patch_workload(root, &ops).await
        }))
        .await;

        for ((id, root, _), result) in targets.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    info!(policy = %id, workload = %root, "Policy applied");
                    self.buckets.commit(&id);
                    report.applied.push(id);
                }
                Err(e) => {
                    warn!(policy = %id, workload = %root, error = %e, "Policy apply failed");
                    self.buckets.rollback(&id);
                    report.failures.push(ItemFailure::new(id.to_string(), e));
                }
            }
        }

        report
    }

    /// Delete the selected policies, which may span buckets.
    ///
    /// Every targeted policy leaves the local buckets once its call
    /// settles, whether or not the delete succeeded; failures are still
    /// reported.
    pub async fn delete_bulk(&mut self, uids: &[String]) -> DeleteReport {
        let mut report = DeleteReport::default();
        let mut targets: Vec<PolicyId> = Vec::new();

        for uid in uids {
            match self.buckets.find_by_uid(uid) {
                Some((_, entry)) if !targets.contains(&entry.id) => targets.push(entry.id.clone()),
                Some(_) => {}
                None => report.missing.push(uid.clone()),
            }
        }

        for id in &targets {
            self.buckets.mark_pending(id, PendingOp::Delete);
        }

        let cluster = &self.cluster;
        let results = join_all(targets.iter().map(|id| cluster.delete_policy(id))).await;

        for (id, result) in targets.into_iter().zip(results) {
            // Targets leave the buckets whatever the outcome; a refresh
            // brings back anything that still exists.
            self.buckets.commit(&id);
            match result {
                Ok(()) => {
                    info!(policy = %id, "Policy deleted");
                    report.deleted.push(id);
                }
                Err(e) => {
                    warn!(policy = %id, error = %e, "Policy delete failed");
                    report.failures.push(ItemFailure::new(id.to_string(), e));
                }
            }
        }

        report
    }

    /// Replace a policy with an edited copy.
    pub async fn update_policy(&self, policy: &SecurityPolicy) -> Result<()> {
        self.cluster.update_policy(policy).await?;
        info!(policy = %policy.id(), "Policy updated");
        Ok(())
    }

    /// Which bucket currently holds the policy with `uid`.
    pub fn bucket_of(&self, uid: &str) -> Option<Bucket> {
        self.buckets.find_by_uid(uid).map(|(b, _)| b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::fixtures;
    use crate::cluster::{FailPoint, FakeCluster, Mutation, OwnerReference};
    use rstest::rstest;

    fn names(entries: &[PolicyEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.id.name.as_str()).collect()
    }

    fn uids(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| format!("uid-{n}")).collect()
    }

    fn applied(mut policy: SecurityPolicy) -> SecurityPolicy {
        policy.status.active_workloads = vec!["web".to_string()];
        policy
    }

    /// `shop/web-7d-x` belongs to Deployment `web`; `shop/solo` is bare.
    async fn cluster() -> Arc<FakeCluster> {
        let cluster = Arc::new(FakeCluster::new());
        cluster
            .insert_pod(fixtures::owned_pod(
                "shop",
                "web-7d-x",
                OwnerReference::new("ReplicaSet", "web-7d"),
            ))
            .await;
        cluster.insert_pod(fixtures::pod("shop", "solo", "Running")).await;
        cluster
            .insert_workload(
                WorkloadRef::new(WorkloadKind::ReplicaSet, "web-7d", "shop"),
                vec![OwnerReference::new("Deployment", "web")],
            )
            .await;
        cluster
            .insert_workload(WorkloadRef::new(WorkloadKind::Deployment, "web", "shop"), vec![])
            .await;
        cluster
    }

    async fn reconciler(cluster: &Arc<FakeCluster>) -> PolicyReconciler {
        let mut r = PolicyReconciler::new(cluster.clone(), Some(Namespace::parse("shop").unwrap()));
        r.refresh().await.unwrap();
        r
    }

    #[tokio::test]
    async fn test_refresh_classifies_and_resolves() {
        let cluster = cluster().await;
        cluster
            .insert_policy(fixtures::policy("shop", "a", Some("shop/web-7d-x")))
            .await;
        cluster
            .insert_policy(applied(fixtures::policy("shop", "b", Some("shop/web-7d-x"))))
            .await;
        cluster
            .insert_policy(fixtures::policy("shop", "c", Some("shop/gone")))
            .await;
        let mut terminating = fixtures::policy("shop", "d", Some("shop/web-7d-x"));
        terminating.status.status = Some("Terminating".to_string());
        cluster.insert_policy(terminating).await;

        let r = reconciler(&cluster).await;
        let buckets = r.buckets();
        assert_eq!(names(buckets.available()), vec!["a"]);
        assert_eq!(names(buckets.applied()), vec!["b"]);
        assert_eq!(names(buckets.dangling()), vec!["c"]);

        let a = &buckets.available()[0];
        assert_eq!(a.attributed_pod, Some(WorkloadRef::pod("web-7d-x", "shop")));
        assert_eq!(
            a.root_workload,
            Some(WorkloadRef::new(WorkloadKind::Deployment, "web", "shop"))
        );
        assert!(buckets.dangling()[0].root_workload.is_none());
    }

    #[tokio::test]
    async fn test_refresh_attributes_bare_pod_annotation() {
        let cluster = cluster().await;
        cluster
            .insert_policy(fixtures::policy("shop", "a", Some("web-7d-x")))
            .await;
        cluster
            .insert_policy(fixtures::policy("shop", "b", Some("other/web-7d-x")))
            .await;

        let r = reconciler(&cluster).await;
        assert_eq!(names(r.buckets().available()), vec!["a"]);
        assert_eq!(names(r.buckets().dangling()), vec!["b"]);

        let a = &r.buckets().available()[0];
        assert_eq!(a.generated_for.as_deref(), Some("web-7d-x"));
        assert_eq!(a.attributed_pod, Some(WorkloadRef::pod("web-7d-x", "shop")));
        assert_eq!(
            a.root_workload,
            Some(WorkloadRef::new(WorkloadKind::Deployment, "web", "shop"))
        );
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_snapshot() {
        let cluster = cluster().await;
        cluster
            .insert_policy(fixtures::policy("shop", "a", Some("shop/solo")))
            .await;
        let mut r = reconciler(&cluster).await;

        cluster.fail(FailPoint::ListPolicies).await;
        assert!(r.refresh().await.is_err());
        assert_eq!(names(r.buckets().available()), vec!["a"]);
    }

    #[tokio::test]
    async fn test_apply_rejects_bare_pods() {
        let cluster = cluster().await;
        cluster
            .insert_policy(fixtures::policy("shop", "a", Some("shop/web-7d-x")))
            .await;
        cluster
            .insert_policy(fixtures::policy("shop", "b", Some("shop/solo")))
            .await;
        let mut r = reconciler(&cluster).await;

        let report = r.apply_bulk(&uids(&["a", "b"])).await;
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.applied[0].name, "a");
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].reason, RejectReason::NoOwningWorkload);
        assert_eq!(report.rejected[0].policy, "shop/b");

        let patches: Vec<_> = cluster
            .mutations()
            .await
            .into_iter()
            .filter_map(|m| match m {
                Mutation::PatchWorkload { workload, .. } => Some(workload),
                _ => None,
            })
            .collect();
        assert_eq!(
            patches,
            vec![WorkloadRef::new(WorkloadKind::Deployment, "web", "shop")]
        );

        let doc = cluster
            .workload(&WorkloadRef::new(WorkloadKind::Deployment, "web", "shop"))
            .await
            .unwrap();
        assert_eq!(
            doc.pointer("/spec/template/spec/securityContext/seccompProfile/localhostProfile"),
            Some(&json!("operator/shop/a.json"))
        );

        assert_eq!(names(r.buckets().available()), vec!["b"]);
    }

    #[tokio::test]
    async fn test_apply_failure_keeps_policy_available() {
        let cluster = cluster().await;
        cluster
            .insert_policy(fixtures::policy("shop", "a", Some("shop/web-7d-x")))
            .await;
        let mut r = reconciler(&cluster).await;
        cluster
            .fail(FailPoint::PatchWorkload(WorkloadRef::new(
                WorkloadKind::Deployment,
                "web",
                "shop",
            )))
            .await;

        let report = r.apply_bulk(&uids(&["a"])).await;
        assert!(report.applied.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(names(r.buckets().available()), vec!["a"]);
        assert_eq!(r.buckets().pending_count(), 0);

        let err = report.into_result().unwrap_err();
        assert!(matches!(err, TraceError::PartialBatchFailure { total: 1, .. }));
    }

    #[tokio::test]
    async fn test_apply_unresolved_and_unknown() {
        let cluster = cluster().await;
        cluster
            .insert_policy(fixtures::policy("shop", "a", Some("shop/web-7d-x")))
            .await;
        cluster
            .fail(FailPoint::OwnerLookup(WorkloadRef::new(
                WorkloadKind::ReplicaSet,
                "web-7d",
                "shop",
            )))
            .await;
        let mut r = reconciler(&cluster).await;

        let report = r.apply_bulk(&uids(&["a", "zz"])).await;
        let reasons: Vec<_> = report.rejected.iter().map(|r| r.reason).collect();
        assert_eq!(reasons, vec![RejectReason::Unresolved, RejectReason::NotFound]);
        assert_eq!(report.attempted(), 0);
    }

    #[tokio::test]
    async fn test_delete_removes_targets_even_on_failure() {
        let cluster = cluster().await;
        cluster
            .insert_policy(fixtures::policy("shop", "a", Some("shop/solo")))
            .await;
        cluster
            .insert_policy(fixtures::policy("shop", "b", Some("shop/solo")))
            .await;
        cluster
            .insert_policy(applied(fixtures::policy("shop", "c", Some("shop/solo"))))
            .await;
        let mut r = reconciler(&cluster).await;
        assert_eq!(names(r.buckets().available()), vec!["a", "b"]);
        assert_eq!(names(r.buckets().applied()), vec!["c"]);

        cluster.fail(FailPoint::DeletePolicy("c".into())).await;
        let report = r.delete_bulk(&uids(&["b", "c"])).await;

        assert_eq!(names(r.buckets().available()), vec!["a"]);
        assert!(r.buckets().applied().is_empty());
        assert!(r.buckets().dangling().is_empty());
        assert_eq!(report.deleted.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].target, "shop/c");

        // The failed delete reappears on the next listing.
        r.refresh().await.unwrap();
        assert_eq!(names(r.buckets().applied()), vec!["c"]);
    }

    #[test]
    fn test_generated_for_strips_namespace() {
        let mut policy = fixtures::policy("shop", "a", Some("shop/web-1"));
        policy
            .metadata
            .annotations
            .insert(CONTAINER_ANNOTATION.to_string(), "shop/nginx".to_string());
        assert_eq!(generated_for(&policy, GenerationTarget::Pod), Some("web-1"));
        assert_eq!(generated_for(&policy, GenerationTarget::Container), Some("nginx"));

        let bare = fixtures::policy("shop", "b", None);
        assert_eq!(generated_for(&bare, GenerationTarget::Pod), None);
    }

    #[test]
    fn test_is_policy_unapplied() {
        assert!(is_policy_unapplied(None));
        assert!(is_policy_unapplied(Some(&json!({}))));
        assert!(is_policy_unapplied(Some(
            &json!({"seccompProfile": {"type": "Unconfined"}})
        )));
        assert!(!is_policy_unapplied(Some(
            &json!({"seccompProfile": {"type": "Localhost", "localhostProfile": "x.json"}})
        )));
    }

    #[test]
    fn test_count_by_namespace() {
        let policies = vec![
            fixtures::policy("shop", "a", None),
            fixtures::policy("shop", "b", None),
            fixtures::policy("api", "c", None),
        ];
        let counts = count_by_namespace(["shop", "api", "idle"], &policies);
        let flat: Vec<_> = counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        assert_eq!(flat, vec![("api", 1), ("idle", 0), ("shop", 2)]);
    }

    #[rstest]
    #[case(WorkloadKind::Pod, "/spec/securityContext/seccompProfile")]
    #[case(WorkloadKind::Deployment, "/spec/template/spec/securityContext/seccompProfile")]
    #[case(WorkloadKind::StatefulSet, "/spec/template/spec/securityContext/seccompProfile")]
    #[case(WorkloadKind::DaemonSet, "/spec/template/spec/securityContext/seccompProfile")]
    #[case(
        WorkloadKind::CronJob,
        "/spec/jobTemplate/spec/template/spec/securityContext/seccompProfile"
    )]
    fn test_profile_path_per_kind(#[case] kind: WorkloadKind, #[case] expected: &str) {
        assert_eq!(profile_path(&kind), expected);
    }
}

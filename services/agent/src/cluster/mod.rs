//! Cluster capability used by every component.
//!
//! The trait exposes the handful of get/list/patch/delete/exec primitives the
//! decision logic needs. [`KubeClient`] talks to a real API server;
//! [`FakeCluster`] keeps objects in memory for tests and local development.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracedeck_id::{PolicyId, WorkloadKind, WorkloadRef};

use crate::error::Result;

pub mod fake;
pub mod kube;

pub use fake::{ExecScript, FailPoint, FakeCluster, Mutation};
pub use kube::{ClusterConfig, KubeClient, IN_CLUSTER_URL};

/// Namespace holding the singleton trace resources.
pub const GADGET_NAMESPACE: &str = "gadget";

// =============================================================================
// Capability
// =============================================================================

/// Get/list/patch/delete/exec primitives consumed by the core.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch a trace resource.
    async fn get_trace_job(&self, job: &JobId) -> Result<TraceJob>;

    /// Apply a JSON patch to a trace resource.
    async fn patch_trace_job(&self, job: &JobId, ops: &[PatchOp]) -> Result<()>;

    /// List pods, across all namespaces when `namespace` is `None`.
    async fn list_pods(&self, namespace: Option<&str>) -> Result<Vec<Pod>>;

    /// Owner references of a workload object.
    async fn owner_references(&self, object: &WorkloadRef) -> Result<Vec<OwnerReference>>;

    /// List generated seccomp policies.
    async fn list_policies(&self, namespace: Option<&str>) -> Result<Vec<SecurityPolicy>>;

    /// Replace a policy object wholesale.
    async fn update_policy(&self, policy: &SecurityPolicy) -> Result<()>;

    async fn delete_policy(&self, id: &PolicyId) -> Result<()>;

    /// Apply a JSON patch to a workload object.
    async fn patch_workload(&self, workload: &WorkloadRef, ops: &[PatchOp]) -> Result<()>;

    /// Run a command in a container and stream its raw frames.
    async fn exec(&self, target: &ExecTarget, command: &[String]) -> Result<ExecStream>;
}

// =============================================================================
// Object model
// =============================================================================

/// Subset of Kubernetes object metadata the core reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<String>,
}

impl ObjectMeta {
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn namespace_or_default(&self) -> &str {
        self.namespace.as_deref().unwrap_or("default")
    }
}

/// Back-link from a managed object to its controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    #[serde(default)]
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,
}

impl OwnerReference {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl Pod {
    pub fn is_running(&self) -> bool {
        self.status.phase.as_deref() == Some("Running")
    }

    /// `<namespace>/<name>`, the form used by generation annotations.
    pub fn qualified_name(&self) -> String {
        format!(
            "{}/{}",
            self.metadata.namespace_or_default(),
            self.metadata.name
        )
    }
}

/// Identity of a singleton trace resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId {
    pub namespace: String,
    pub name: String,
}

impl JobId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "traces/{}/{}", self.namespace, self.name)
    }
}

/// A `gadget.kinvolk.io/v1alpha1` Trace, used as a mailbox.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceJob {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Value,
    #[serde(default)]
    pub status: TraceStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl TraceJob {
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotation(key)
    }
}

/// A `security-profiles-operator.x-k8s.io/v1beta1` SeccompProfile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicy {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Value,
    #[serde(default)]
    pub status: PolicyStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    /// Lifecycle phase, e.g. `Installed` or `Terminating`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub active_workloads: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localhost_profile: Option<String>,
}

impl SecurityPolicy {
    /// Identity, defaulting a missing namespace or uid to empty strings.
    pub fn id(&self) -> PolicyId {
        PolicyId::new(
            self.metadata.namespace_or_default(),
            self.metadata.name.clone(),
            self.metadata.uid.clone().unwrap_or_default(),
        )
    }

    pub fn is_terminating(&self) -> bool {
        self.status.status.as_deref() == Some("Terminating")
    }
}

/// Kubernetes list envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

// =============================================================================
// Patches
// =============================================================================

/// One RFC 6902 operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: Value },
    Replace { path: String, value: Value },
    Remove { path: String },
}

impl PatchOp {
    pub fn add(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Add {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn replace(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Replace {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self::Remove { path: path.into() }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. } | Self::Replace { path, .. } | Self::Remove { path } => path,
        }
    }
}

/// Escapes one JSON pointer reference token.
pub fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// JSON pointer to an annotation, e.g. `gadget.kinvolk.io/operation`
/// becomes `/metadata/annotations/gadget.kinvolk.io~1operation`.
pub fn annotation_path(key: &str) -> String {
    format!("/metadata/annotations/{}", escape_pointer_token(key))
}

// =============================================================================
// Exec
// =============================================================================

/// Container a command runs in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecTarget {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

impl ExecTarget {
    pub fn new(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: container.into(),
        }
    }
}

impl fmt::Display for ExecTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.pod, self.container)
    }
}

/// Running remote command. Frames are `[channel byte][payload]`.
///
/// Dropping the stream or calling [`ExecStream::cancel`] terminates the
/// remote side.
pub struct ExecStream {
    frames: mpsc::Receiver<Result<Bytes>>,
    cancel: watch::Sender<bool>,
}

impl ExecStream {
    /// Build a stream from a frame channel. The producer must stop when the
    /// returned cancel receiver flips to `true` or its sender is dropped.
    pub fn channel(buffer: usize) -> (ExecStreamSender, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        (
            ExecStreamSender {
                frames: tx,
                cancelled: cancel_rx,
            },
            Self {
                frames: rx,
                cancel: cancel_tx,
            },
        )
    }

    /// Next raw frame, `None` once the remote command finished.
    pub async fn next_frame(&mut self) -> Option<Result<Bytes>> {
        self.frames.recv().await
    }

    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }
}

impl fmt::Debug for ExecStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecStream")
            .field("cancelled", &*self.cancel.borrow())
            .finish()
    }
}

/// Producer half of an [`ExecStream`].
pub struct ExecStreamSender {
    pub frames: mpsc::Sender<Result<Bytes>>,
    pub cancelled: watch::Receiver<bool>,
}

impl ExecStreamSender {
    /// Resolves once the consumer cancelled or went away.
    pub async fn closed(&mut self) {
        wait_cancelled(&mut self.cancelled).await
    }
}

/// Resolves once `cancelled` flips to `true` or its sender is dropped.
pub async fn wait_cancelled(cancelled: &mut watch::Receiver<bool>) {
    loop {
        if *cancelled.borrow_and_update() {
            return;
        }
        if cancelled.changed().await.is_err() {
            return;
        }
    }
}

/// REST path prefix (`api/v1` or `apis/<group>/<version>`) and plural
/// resource for a workload kind.
pub fn workload_resource(kind: &WorkloadKind) -> Option<(String, String)> {
    let (group, version) = kind.group_version()?;
    let prefix = if group.is_empty() {
        format!("api/{version}")
    } else {
        format!("apis/{group}/{version}")
    };
    Some((prefix, kind.plural()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_annotation_path_escapes_slash_and_tilde() {
        assert_eq!(
            annotation_path("gadget.kinvolk.io/operation"),
            "/metadata/annotations/gadget.kinvolk.io~1operation"
        );
        assert_eq!(
            annotation_path("a~b/c"),
            "/metadata/annotations/a~0b~1c"
        );
        assert_eq!(
            annotation_path("headlampTimestamp"),
            "/metadata/annotations/headlampTimestamp"
        );
    }

    #[test]
    fn test_patch_op_serialization() {
        let ops = vec![
            PatchOp::add(annotation_path("gadget.kinvolk.io/operation"), "start"),
            PatchOp::replace("/spec/filter/namespace", "shop"),
            PatchOp::remove(annotation_path("headlampTimestamp")),
        ];
        let value = serde_json::to_value(&ops).unwrap();
        assert_eq!(
            value,
            json!([
                {"op": "add", "path": "/metadata/annotations/gadget.kinvolk.io~1operation", "value": "start"},
                {"op": "replace", "path": "/spec/filter/namespace", "value": "shop"},
                {"op": "remove", "path": "/metadata/annotations/headlampTimestamp"},
            ])
        );
    }

    #[test]
    fn test_policy_deserialization() {
        let policy: SecurityPolicy = serde_json::from_value(json!({
            "apiVersion": "security-profiles-operator.x-k8s.io/v1beta1",
            "kind": "SeccompProfile",
            "metadata": {
                "name": "web-1-nginx",
                "namespace": "shop",
                "uid": "u-1",
                "annotations": {"seccomp.gadget.kinvolk.io/pod": "shop/web-1"}
            },
            "spec": {"defaultAction": "SCMP_ACT_ERRNO"},
            "status": {
                "status": "Installed",
                "activeWorkloads": ["shop/web"],
                "localhostProfile": "operator/shop/web-1-nginx.json"
            }
        }))
        .unwrap();

        assert_eq!(policy.id(), PolicyId::new("shop", "web-1-nginx", "u-1"));
        assert_eq!(policy.status.active_workloads, vec!["shop/web"]);
        assert!(!policy.is_terminating());
    }

    #[test]
    fn test_trace_job_tolerates_missing_status() {
        let job: TraceJob = serde_json::from_value(json!({
            "metadata": {"name": "seccomp", "namespace": "gadget"},
            "spec": {"gadget": "seccomp"}
        }))
        .unwrap();
        assert!(job.status.state.is_none());
        assert!(job.annotation("headlampSeccompTimestamp").is_none());
    }

    #[test]
    fn test_workload_resource() {
        assert_eq!(
            workload_resource(&WorkloadKind::Pod),
            Some(("api/v1".to_string(), "pods".to_string()))
        );
        assert_eq!(
            workload_resource(&WorkloadKind::CronJob),
            Some(("apis/batch/v1".to_string(), "cronjobs".to_string()))
        );
        assert!(workload_resource(&WorkloadKind::Other("Rollout".into())).is_none());
    }

    #[tokio::test]
    async fn test_exec_stream_cancel_reaches_producer() {
        let (mut sender, stream) = ExecStream::channel(4);
        stream.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), sender.closed())
            .await
            .unwrap();

        let (mut sender, stream) = ExecStream::channel(4);
        drop(stream);
        tokio::time::timeout(std::time::Duration::from_secs(1), sender.closed())
            .await
            .unwrap();
    }
}

//! In-memory cluster for tests and local development.
//!
//! Objects live as JSON documents so patches are applied the same way the API
//! server would. Every mutation attempt is recorded, failures can be injected
//! per call site, and exec streams replay scripted frames.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracedeck_id::{PolicyId, WorkloadKind, WorkloadRef};
use tracing::debug;

use super::{
    wait_cancelled, ClusterApi, ExecStream, ExecStreamSender, ExecTarget, JobId, ObjectMeta,
    OwnerReference, PatchOp, PolicyStatus, Pod, PodStatus, SecurityPolicy, TraceJob,
    GADGET_NAMESPACE,
};
use crate::error::{Result, TraceError};

/// Call site at which [`FakeCluster`] can be told to fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailPoint {
    GetTrace,
    /// Any patch of a trace resource.
    PatchTrace,
    /// Generation patches targeting the given pod name.
    GenerateFor(String),
    ListPods,
    ListPolicies,
    OwnerLookup(WorkloadRef),
    PatchWorkload(WorkloadRef),
    UpdatePolicy(String),
    /// Deletion of the policy with the given name.
    DeletePolicy(String),
    Exec,
}

/// A recorded mutation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    PatchTrace { job: JobId, ops: Vec<PatchOp> },
    PatchWorkload { workload: WorkloadRef, ops: Vec<PatchOp> },
    UpdatePolicy(PolicyId),
    DeletePolicy(PolicyId),
}

/// Frames an exec call replays.
#[derive(Debug, Clone, Default)]
pub struct ExecScript {
    /// Delay before each frame, then the raw frame bytes.
    pub frames: Vec<(Duration, Vec<u8>)>,

    /// Keep the stream open after the last frame until cancelled.
    pub hold_open: bool,
}

impl ExecScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame on `channel` after `delay`.
    pub fn frame(mut self, delay: Duration, channel: u8, payload: &str) -> Self {
        let mut raw = vec![channel];
        raw.extend_from_slice(payload.as_bytes());
        self.frames.push((delay, raw));
        self
    }

    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

#[derive(Default)]
struct FakeState {
    traces: HashMap<JobId, Value>,
    pods: Vec<Pod>,
    workloads: HashMap<WorkloadRef, Value>,
    policies: Vec<SecurityPolicy>,
    failures: HashSet<FailPoint>,
    mutations: Vec<Mutation>,
    exec_scripts: VecDeque<ExecScript>,
    exec_calls: Vec<(ExecTarget, Vec<String>)>,
}

impl FakeState {
    fn check(&self, point: FailPoint, message: impl FnOnce() -> TraceError) -> Result<()> {
        if self.failures.contains(&point) {
            return Err(message());
        }
        Ok(())
    }
}

/// In-memory [`ClusterApi`].
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<FakeState>,
    exec_cancellations: Arc<AtomicUsize>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_trace(&self, job: TraceJob) {
        let id = JobId::new(
            job.metadata.namespace_or_default().to_string(),
            job.metadata.name.clone(),
        );
        let value = serde_json::to_value(&job).unwrap_or(Value::Null);
        self.state.lock().await.traces.insert(id, value);
    }

    pub async fn trace(&self, job: &JobId) -> Option<TraceJob> {
        let state = self.state.lock().await;
        let value = state.traces.get(job)?;
        serde_json::from_value(value.clone()).ok()
    }

    /// Overwrite `status` of a stored trace, as the gadget would.
    pub async fn set_trace_status(&self, job: &JobId, status: Value) {
        if let Some(doc) = self.state.lock().await.traces.get_mut(job) {
            doc["status"] = status;
        }
    }

    pub async fn insert_pod(&self, pod: Pod) {
        self.state.lock().await.pods.push(pod);
    }

    pub async fn remove_pod(&self, namespace: &str, name: &str) {
        self.state.lock().await.pods.retain(|p| {
            !(p.metadata.name == name && p.metadata.namespace_or_default() == namespace)
        });
    }

    /// Store a controller object with the given owners and an empty pod
    /// template security context.
    pub async fn insert_workload(&self, workload: WorkloadRef, owners: Vec<OwnerReference>) {
        let template = json!({"spec": {"securityContext": {}}});
        let spec = if workload.kind == WorkloadKind::CronJob {
            json!({"jobTemplate": {"spec": {"template": template}}})
        } else {
            json!({"template": template})
        };
        let doc = json!({
            "kind": workload.kind.as_str(),
            "metadata": {
                "name": workload.name,
                "namespace": workload.namespace,
                "ownerReferences": owners,
            },
            "spec": spec,
        });
        self.state.lock().await.workloads.insert(workload, doc);
    }

    pub async fn workload(&self, workload: &WorkloadRef) -> Option<Value> {
        self.state.lock().await.workloads.get(workload).cloned()
    }

    pub async fn insert_policy(&self, policy: SecurityPolicy) {
        self.state.lock().await.policies.push(policy);
    }

    pub async fn policies(&self) -> Vec<SecurityPolicy> {
        self.state.lock().await.policies.clone()
    }

    pub async fn fail(&self, point: FailPoint) {
        self.state.lock().await.failures.insert(point);
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failures.clear();
    }

    pub async fn mutations(&self) -> Vec<Mutation> {
        self.state.lock().await.mutations.clone()
    }

    /// Queue a script for the next exec call.
    pub async fn script_exec(&self, script: ExecScript) {
        self.state.lock().await.exec_scripts.push_back(script);
    }

    pub async fn exec_calls(&self) -> Vec<(ExecTarget, Vec<String>)> {
        self.state.lock().await.exec_calls.clone()
    }

    /// Number of exec streams closed by their consumer before finishing.
    pub fn exec_cancellations(&self) -> usize {
        self.exec_cancellations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_trace_job(&self, job: &JobId) -> Result<TraceJob> {
        let state = self.state.lock().await;
        state.check(FailPoint::GetTrace, || {
            TraceError::lookup(job.to_string(), "injected failure")
        })?;

        let doc = state
            .traces
            .get(job)
            .ok_or_else(|| TraceError::lookup(job.to_string(), "404 Not Found"))?;
        serde_json::from_value(doc.clone()).map_err(|e| TraceError::lookup(job.to_string(), e))
    }

    async fn patch_trace_job(&self, job: &JobId, ops: &[PatchOp]) -> Result<()> {
        let mut state = self.state.lock().await;
        state.mutations.push(Mutation::PatchTrace {
            job: job.clone(),
            ops: ops.to_vec(),
        });

        state.check(FailPoint::PatchTrace, || {
            TraceError::rejected(job.to_string(), "injected failure")
        })?;
        if let Some(pod) = generation_target(ops) {
            state.check(FailPoint::GenerateFor(pod.to_string()), || {
                TraceError::rejected(job.to_string(), format!("generation for {pod} refused"))
            })?;
        }

        let doc = state
            .traces
            .get_mut(job)
            .ok_or_else(|| TraceError::rejected(job.to_string(), "404 Not Found"))?;
        apply_patch(doc, ops).map_err(|e| TraceError::rejected(job.to_string(), e))
    }

    async fn list_pods(&self, namespace: Option<&str>) -> Result<Vec<Pod>> {
        let state = self.state.lock().await;
        state.check(FailPoint::ListPods, || TraceError::lookup("pods", "injected failure"))?;

        Ok(state
            .pods
            .iter()
            .filter(|p| namespace.is_none_or(|ns| p.metadata.namespace_or_default() == ns))
            .cloned()
            .collect())
    }

    async fn owner_references(&self, object: &WorkloadRef) -> Result<Vec<OwnerReference>> {
        let state = self.state.lock().await;
        state.check(FailPoint::OwnerLookup(object.clone()), || {
            TraceError::lookup(object.to_string(), "injected failure")
        })?;

        if object.is_pod() {
            return state
                .pods
                .iter()
                .find(|p| {
                    p.metadata.name == object.name
                        && p.metadata.namespace_or_default() == object.namespace
                })
                .map(|p| p.metadata.owner_references.clone())
                .ok_or_else(|| TraceError::lookup(object.to_string(), "404 Not Found"));
        }

        let doc = state
            .workloads
            .get(object)
            .ok_or_else(|| TraceError::lookup(object.to_string(), "404 Not Found"))?;
        let meta: ObjectMeta = serde_json::from_value(doc["metadata"].clone())
            .map_err(|e| TraceError::lookup(object.to_string(), e))?;
        Ok(meta.owner_references)
    }

    async fn list_policies(&self, namespace: Option<&str>) -> Result<Vec<SecurityPolicy>> {
        let state = self.state.lock().await;
        state.check(FailPoint::ListPolicies, || {
            TraceError::lookup("seccompprofiles", "injected failure")
        })?;

        Ok(state
            .policies
            .iter()
            .filter(|p| namespace.is_none_or(|ns| p.metadata.namespace_or_default() == ns))
            .cloned()
            .collect())
    }

    async fn update_policy(&self, policy: &SecurityPolicy) -> Result<()> {
        let mut state = self.state.lock().await;
        let id = policy.id();
        state.mutations.push(Mutation::UpdatePolicy(id.clone()));
        state.check(FailPoint::UpdatePolicy(id.name.clone()), || {
            TraceError::rejected(id.to_string(), "injected failure")
        })?;

        let slot = state
            .policies
            .iter_mut()
            .find(|p| p.id().namespace == id.namespace && p.id().name == id.name)
            .ok_or_else(|| TraceError::rejected(id.to_string(), "404 Not Found"))?;
        *slot = policy.clone();
        Ok(())
    }

    async fn delete_policy(&self, id: &PolicyId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.mutations.push(Mutation::DeletePolicy(id.clone()));
        state.check(FailPoint::DeletePolicy(id.name.clone()), || {
            TraceError::rejected(id.to_string(), "injected failure")
        })?;

        let before = state.policies.len();
        state.policies.retain(|p| &p.id() != id);
        if state.policies.len() == before {
            return Err(TraceError::rejected(id.to_string(), "404 Not Found"));
        }
        Ok(())
    }

    async fn patch_workload(&self, workload: &WorkloadRef, ops: &[PatchOp]) -> Result<()> {
        let mut state = self.state.lock().await;
        state.mutations.push(Mutation::PatchWorkload {
            workload: workload.clone(),
            ops: ops.to_vec(),
        });
        state.check(FailPoint::PatchWorkload(workload.clone()), || {
            TraceError::rejected(workload.to_string(), "injected failure")
        })?;

        let doc = state
            .workloads
            .get_mut(workload)
            .ok_or_else(|| TraceError::rejected(workload.to_string(), "404 Not Found"))?;
        apply_patch(doc, ops).map_err(|e| TraceError::rejected(workload.to_string(), e))
    }

    async fn exec(&self, target: &ExecTarget, command: &[String]) -> Result<ExecStream> {
        let script = {
            let mut state = self.state.lock().await;
            state
                .exec_calls
                .push((target.clone(), command.to_vec()));
            state.check(FailPoint::Exec, || {
                TraceError::Stream(format!("{target}: injected failure"))
            })?;
            state
                .exec_scripts
                .pop_front()
                .ok_or_else(|| TraceError::Stream(format!("{target}: no scripted output")))?
        };

        let (sender, stream) = ExecStream::channel(16);
        let cancellations = Arc::clone(&self.exec_cancellations);
        let target = target.clone();

        tokio::spawn(async move {
            let ExecStreamSender {
                frames,
                mut cancelled,
            } = sender;

            for (delay, raw) in script.frames {
                tokio::select! {
                    _ = wait_cancelled(&mut cancelled) => {
                        debug!(target = %target, "Fake exec cancelled");
                        cancellations.fetch_add(1, Ordering::SeqCst);
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                if frames.send(Ok(Bytes::from(raw))).await.is_err() {
                    cancellations.fetch_add(1, Ordering::SeqCst);
                    return;
                }
            }

            if script.hold_open {
                wait_cancelled(&mut cancelled).await;
                cancellations.fetch_add(1, Ordering::SeqCst);
            }
        });

        Ok(stream)
    }
}

/// Pod name targeted by a generation patch, if `ops` is one.
fn generation_target(ops: &[PatchOp]) -> Option<&str> {
    ops.iter().find_map(|op| match op {
        PatchOp::Add { path, value } if path == "/spec/filter/podname" => value.as_str(),
        _ => None,
    })
}

// =============================================================================
// JSON patch
// =============================================================================

/// Apply RFC 6902 operations atomically. Only object members are addressed.
pub fn apply_patch(doc: &mut Value, ops: &[PatchOp]) -> std::result::Result<(), String> {
    let mut working = doc.clone();

    for op in ops {
        let path = op.path();
        let (parent, token) = split_pointer(path)?;
        match op {
            PatchOp::Add { value, .. } => {
                let target = working
                    .pointer_mut(&parent)
                    .and_then(Value::as_object_mut)
                    .ok_or_else(|| format!("add: parent of {path} does not exist"))?;
                target.insert(token, value.clone());
            }
            PatchOp::Replace { value, .. } => {
                let target = working
                    .pointer_mut(path)
                    .ok_or_else(|| format!("replace: {path} does not exist"))?;
                *target = value.clone();
            }
            PatchOp::Remove { .. } => {
                working
                    .pointer_mut(&parent)
                    .and_then(Value::as_object_mut)
                    .and_then(|o| o.remove(&token))
                    .ok_or_else(|| format!("remove: {path} does not exist"))?;
            }
        }
    }

    *doc = working;
    Ok(())
}

/// Split a pointer into its parent pointer and unescaped last token.
fn split_pointer(path: &str) -> std::result::Result<(String, String), String> {
    let idx = path
        .rfind('/')
        .ok_or_else(|| format!("invalid JSON pointer {path:?}"))?;
    let token = path[idx + 1..].replace("~1", "/").replace("~0", "~");
    Ok((path[..idx].to_string(), token))
}

// =============================================================================
// Fixtures
// =============================================================================

/// Builders for objects commonly stored in a [`FakeCluster`].
pub mod fixtures {
    use super::*;

    /// A trace resource in the gadget namespace with an empty filter.
    pub fn trace(name: &str) -> TraceJob {
        TraceJob {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: Some(GADGET_NAMESPACE.to_string()),
                ..Default::default()
            },
            spec: json!({
                "gadget": name,
                "runMode": "Manual",
                "filter": {"namespace": ""},
                "output": "",
            }),
            status: Default::default(),
        }
    }

    pub fn pod(namespace: &str, name: &str, phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: Some(namespace.to_string()),
                uid: Some(format!("pod-{name}")),
                ..Default::default()
            },
            spec: Default::default(),
            status: PodStatus {
                phase: Some(phase.to_string()),
            },
        }
    }

    /// A pod owned by `owner`.
    pub fn owned_pod(namespace: &str, name: &str, owner: OwnerReference) -> Pod {
        let mut pod = pod(namespace, name, "Running");
        pod.metadata.owner_references.push(owner);
        pod
    }

    /// An installed policy generated for `pod` (`<namespace>/<name>`).
    pub fn policy(namespace: &str, name: &str, pod: Option<&str>) -> SecurityPolicy {
        let mut metadata = ObjectMeta {
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{name}")),
            ..Default::default()
        };
        if let Some(pod) = pod {
            metadata.annotations.insert(
                "seccomp.gadget.kinvolk.io/pod".to_string(),
                pod.to_string(),
            );
        }

        SecurityPolicy {
            api_version: "security-profiles-operator.x-k8s.io/v1beta1".to_string(),
            kind: "SeccompProfile".to_string(),
            metadata,
            spec: json!({"defaultAction": "SCMP_ACT_ERRNO"}),
            status: PolicyStatus {
                status: Some("Installed".to_string()),
                active_workloads: Vec::new(),
                localhost_profile: Some(format!("operator/{namespace}/{name}.json")),
            },
        }
    }
}

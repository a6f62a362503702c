//! Kubernetes API server client.
//!
//! REST calls go through reqwest with JSON patches sent as
//! `application/json-patch+json`. Exec uses a WebSocket speaking the
//! `v4.channel.k8s.io` subprotocol, whose binary frames are
//! `[channel byte][payload]`.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tracedeck_id::{PolicyId, WorkloadRef};
use tracing::{debug, warn};

use super::{
    wait_cancelled, workload_resource, ClusterApi, ExecStream, ExecStreamSender, ExecTarget,
    JobId, ObjectList, ObjectMeta, OwnerReference, PatchOp, Pod, SecurityPolicy, TraceJob,
};
use crate::error::{Result, TraceError};

const TRACE_API: &str = "apis/gadget.kinvolk.io/v1alpha1";
const POLICY_API: &str = "apis/security-profiles-operator.x-k8s.io/v1beta1";
const JSON_PATCH: &str = "application/json-patch+json";
const EXEC_SUBPROTOCOL: &str = "v4.channel.k8s.io";

/// Default API server address inside a cluster.
pub const IN_CLUSTER_URL: &str = "https://kubernetes.default.svc";

/// Connection settings shared by the agent and the CLI.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// API server base URL.
    pub api_url: String,

    /// Bearer token, if any.
    pub token: Option<String>,

    /// Skip TLS certificate verification.
    pub insecure_tls: bool,

    /// Timeout for REST calls and for establishing exec streams.
    pub request_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            api_url: IN_CLUSTER_URL.to_string(),
            token: None,
            insecure_tls: false,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Kubernetes `Status` body returned on failures.
#[derive(Debug, Deserialize)]
struct StatusBody {
    #[serde(default)]
    message: Option<String>,
}

/// [`ClusterApi`] over the Kubernetes REST and exec APIs.
#[derive(Debug, Clone)]
pub struct KubeClient {
    http: reqwest::Client,
    base_url: String,
    config: ClusterConfig,
}

impl KubeClient {
    pub fn new(config: ClusterConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| TraceError::Config(format!("invalid token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.insecure_tls)
            .build()
            .map_err(|e| TraceError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        debug!(url = %url, "GET");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| TraceError::lookup(path, e))?;

        let response = check_status(response)
            .await
            .map_err(|message| TraceError::lookup(path, message))?;

        response
            .json()
            .await
            .map_err(|e| TraceError::lookup(path, format!("failed to parse response: {e}")))
    }

    async fn patch(&self, path: &str, ops: &[PatchOp]) -> Result<()> {
        let body = serde_json::to_vec(ops).map_err(|e| TraceError::rejected(path, e))?;
        debug!(path = %path, ops = ops.len(), "PATCH");

        let response = self
            .http
            .patch(self.url(path))
            .header(CONTENT_TYPE, JSON_PATCH)
            .body(body)
            .send()
            .await
            .map_err(|e| TraceError::rejected(path, e))?;

        check_status(response)
            .await
            .map(|_| ())
            .map_err(|message| TraceError::rejected(path, message))
    }

    fn exec_url(&self, target: &ExecTarget, command: &[String]) -> Result<Url> {
        let path = format!(
            "api/v1/namespaces/{}/pods/{}/exec",
            target.namespace, target.pod
        );
        let mut url = Url::parse(&self.url(&path))
            .map_err(|e| TraceError::Config(format!("invalid API URL: {e}")))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("container", &target.container);
            for arg in command {
                query.append_pair("command", arg);
            }
            query.append_pair("stdout", "true");
            query.append_pair("stderr", "true");
        }

        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(TraceError::Config(format!(
                    "unsupported API URL scheme: {other}"
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| TraceError::Config(format!("cannot switch {url} to {scheme}")))?;

        Ok(url)
    }
}

/// Returns the response on success, or the server's message on failure.
async fn check_status(response: reqwest::Response) -> std::result::Result<reqwest::Response, String> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<StatusBody>(&body)
        .ok()
        .and_then(|s| s.message)
        .unwrap_or(body);
    Err(format!("{status}: {message}"))
}

fn trace_path(job: &JobId) -> String {
    format!(
        "{TRACE_API}/namespaces/{}/traces/{}",
        job.namespace, job.name
    )
}

fn pods_path(namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!("api/v1/namespaces/{ns}/pods"),
        None => "api/v1/pods".to_string(),
    }
}

fn policies_path(namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!("{POLICY_API}/namespaces/{ns}/seccompprofiles"),
        None => format!("{POLICY_API}/seccompprofiles"),
    }
}

fn policy_path(namespace: &str, name: &str) -> String {
    format!("{POLICY_API}/namespaces/{namespace}/seccompprofiles/{name}")
}

fn workload_path(workload: &WorkloadRef) -> Result<String> {
    let (prefix, plural) = workload_resource(&workload.kind).ok_or_else(|| {
        TraceError::lookup(
            workload.to_string(),
            format!("unsupported workload kind {}", workload.kind),
        )
    })?;
    Ok(format!(
        "{prefix}/namespaces/{}/{plural}/{}",
        workload.namespace, workload.name
    ))
}

/// Object envelope used when only metadata is needed.
#[derive(Debug, Deserialize)]
struct MetadataOnly {
    #[serde(default)]
    metadata: ObjectMeta,
}

#[async_trait]
impl ClusterApi for KubeClient {
    async fn get_trace_job(&self, job: &JobId) -> Result<TraceJob> {
        self.get_json(&trace_path(job)).await
    }

    async fn patch_trace_job(&self, job: &JobId, ops: &[PatchOp]) -> Result<()> {
        self.patch(&trace_path(job), ops).await
    }

    async fn list_pods(&self, namespace: Option<&str>) -> Result<Vec<Pod>> {
        let list: ObjectList<Pod> = self.get_json(&pods_path(namespace)).await?;
        Ok(list.items)
    }

    async fn owner_references(&self, object: &WorkloadRef) -> Result<Vec<OwnerReference>> {
        let path = workload_path(object)?;
        let object: MetadataOnly = self.get_json(&path).await?;
        Ok(object.metadata.owner_references)
    }

    async fn list_policies(&self, namespace: Option<&str>) -> Result<Vec<SecurityPolicy>> {
        let list: ObjectList<SecurityPolicy> = self.get_json(&policies_path(namespace)).await?;
        Ok(list.items)
    }

    async fn update_policy(&self, policy: &SecurityPolicy) -> Result<()> {
        let path = policy_path(policy.metadata.namespace_or_default(), &policy.metadata.name);
        debug!(path = %path, "PUT");

        let response = self
            .http
            .put(self.url(&path))
            .json(policy)
            .send()
            .await
            .map_err(|e| TraceError::rejected(&path, e))?;

        check_status(response)
            .await
            .map(|_| ())
            .map_err(|message| TraceError::rejected(path, message))
    }

    async fn delete_policy(&self, id: &PolicyId) -> Result<()> {
        let path = policy_path(&id.namespace, &id.name);
        debug!(path = %path, "DELETE");

        let response = self
            .http
            .delete(self.url(&path))
            .send()
            .await
            .map_err(|e| TraceError::rejected(&path, e))?;

        check_status(response)
            .await
            .map(|_| ())
            .map_err(|message| TraceError::rejected(path, message))
    }

    async fn patch_workload(&self, workload: &WorkloadRef, ops: &[PatchOp]) -> Result<()> {
        let path = workload_path(workload)?;
        self.patch(&path, ops).await
    }

    async fn exec(&self, target: &ExecTarget, command: &[String]) -> Result<ExecStream> {
        let url = self.exec_url(target, command)?;
        let stream_err = |e: &dyn std::fmt::Display| TraceError::Stream(format!("{target}: {e}"));

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| stream_err(&e))?;
        let headers = request.headers_mut();
        headers.insert(
            "Sec-WebSocket-Protocol",
            EXEC_SUBPROTOCOL.parse().map_err(|e| stream_err(&e))?,
        );
        if let Some(token) = &self.config.token {
            headers.insert(
                "Authorization",
                format!("Bearer {token}").parse().map_err(|e| stream_err(&e))?,
            );
        }

        let connector = if self.config.insecure_tls {
            let tls = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .build()
                .map_err(|e| stream_err(&e))?;
            Some(tokio_tungstenite::Connector::NativeTls(tls))
        } else {
            None
        };

        let connect =
            tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector);
        let (ws_stream, _) = tokio::time::timeout(self.config.request_timeout, connect)
            .await
            .map_err(|_| {
                TraceError::Stream(format!(
                    "{target}: connect timed out after {}s",
                    self.config.request_timeout.as_secs()
                ))
            })?
            .map_err(|e| stream_err(&e))?;

        debug!(target = %target, "Exec stream connected");

        let (sender, stream) = ExecStream::channel(64);
        let target = target.clone();
        tokio::spawn(async move {
            let ExecStreamSender {
                frames,
                mut cancelled,
            } = sender;
            let (mut ws_write, mut ws_read) = ws_stream.split();

            loop {
                tokio::select! {
                    _ = wait_cancelled(&mut cancelled) => {
                        debug!(target = %target, "Exec stream cancelled");
                        let _ = ws_write.send(Message::Close(None)).await;
                        break;
                    }
                    msg = ws_read.next() => {
                        match msg {
                            Some(Ok(Message::Binary(data))) => {
                                if frames.send(Ok(data)).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {
                                // Text, ping and pong frames carry no output.
                            }
                            Some(Err(e)) => {
                                warn!(target = %target, error = %e, "Exec stream failed");
                                let _ = frames
                                    .send(Err(TraceError::Stream(format!("{target}: {e}"))))
                                    .await;
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(stream)
    }
}

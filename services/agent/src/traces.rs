//! Traceloop trace listing.
//!
//! Gadget pods publish the traces they hold as a JSON array in a pod
//! annotation. Each trace can be dumped through the traceloop socket inside
//! the gadget container.

use std::collections::BTreeSet;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cluster::{ClusterApi, ExecTarget, Pod, GADGET_NAMESPACE};
use crate::error::{Result, TraceError};

/// Pod label selecting gadget pods.
pub const GADGET_LABEL: (&str, &str) = ("k8s-app", "gadget");

/// Annotation holding a gadget pod's trace records.
pub const TRACE_STATE_ANNOTATION: &str = "traceloop.kinvolk.io/state";

/// Container the traceloop socket lives in.
pub const GADGET_CONTAINER: &str = "gadget";

pub const READY_STATUS: &str = "ready";

/// Line counts offered for log dumps.
pub const LOG_LINE_CHOICES: [usize; 4] = [100, 500, 1000, 2500];
pub const DEFAULT_LOG_LINES: usize = 100;

const DUMP_URL: &str = "http://localhost/dump-by-traceid";

/// One record from the trace state annotation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    #[serde(default)]
    pub traceid: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub podname: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub timecreation: String,
}

/// A trace record and the gadget pod holding it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEntry {
    #[serde(flatten)]
    pub record: TraceRecord,
    pub gadget_namespace: String,
    pub gadget_pod: String,
}

pub fn is_gadget_pod(pod: &Pod) -> bool {
    pod.metadata.labels.get(GADGET_LABEL.0).map(String::as_str) == Some(GADGET_LABEL.1)
}

/// Records of one gadget pod. Records without a pod name are skipped, as
/// is an unparsable annotation.
pub fn pod_traces(pod: &Pod) -> Vec<TraceEntry> {
    let Some(raw) = pod.metadata.annotation(TRACE_STATE_ANNOTATION) else {
        return Vec::new();
    };
    let records: Vec<TraceRecord> = match serde_json::from_str(raw) {
        Ok(records) => records,
        Err(e) => {
            warn!(pod = %pod.qualified_name(), error = %e, "Unreadable trace state");
            return Vec::new();
        }
    };

    records
        .into_iter()
        .filter(|r| !r.podname.is_empty())
        .map(|record| TraceEntry {
            record,
            gadget_namespace: pod.metadata.namespace_or_default().to_string(),
            gadget_pod: pod.metadata.name.clone(),
        })
        .collect()
}

/// All traces held by the gadget pods among `pods`.
pub fn list_traces(pods: &[Pod]) -> Vec<TraceEntry> {
    pods.iter()
        .filter(|p| is_gadget_pod(p))
        .flat_map(pod_traces)
        .collect()
}

/// List gadget pods and collect their traces.
pub async fn fetch_traces(cluster: &dyn ClusterApi) -> Result<Vec<TraceEntry>> {
    let pods = cluster.list_pods(Some(GADGET_NAMESPACE)).await?;
    Ok(list_traces(&pods))
}

/// Traces that are not ready first; order is otherwise preserved.
pub fn sort_traces(traces: &mut [TraceEntry]) {
    traces.sort_by_key(|t| t.record.status == READY_STATUS);
}

/// Namespace and free-text filter over trace entries.
#[derive(Debug, Clone, Default)]
pub struct TraceFilter {
    pub namespaces: BTreeSet<String>,
    pub search: Option<String>,
}

impl TraceFilter {
    /// A record without a namespace passes the namespace filter. The search
    /// is a case-insensitive substring match on namespace, pod name and
    /// status.
    pub fn matches(&self, record: &TraceRecord) -> bool {
        if !record.namespace.is_empty()
            && !self.namespaces.is_empty()
            && !self.namespaces.contains(&record.namespace)
        {
            return false;
        }

        let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) else {
            return true;
        };
        let needle = search.to_lowercase();
        [&record.namespace, &record.podname, &record.status]
            .iter()
            .any(|field| field.to_lowercase().contains(&needle))
    }

    pub fn apply(&self, traces: Vec<TraceEntry>) -> Vec<TraceEntry> {
        traces.into_iter().filter(|t| self.matches(&t.record)).collect()
    }
}

/// The trace recorded for pod `namespace/name`, if any gadget pod holds one.
pub fn find_trace_for_pod(pods: &[Pod], namespace: &str, name: &str) -> Option<TraceEntry> {
    list_traces(pods)
        .into_iter()
        .find(|t| t.record.podname == name && t.record.namespace == namespace)
}

/// Shell command dumping the last `lines` lines of a trace.
pub fn log_command(trace_id: &str, lines: usize) -> Result<Vec<String>> {
    let url = Url::parse_with_params(DUMP_URL, &[("traceid", trace_id)])
        .map_err(|e| TraceError::Config(format!("invalid trace id {trace_id:?}: {e}")))?;
    Ok(vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        format!("curl --silent --unix-socket /run/traceloop.socket '{url}' | tail -n{lines}"),
    ])
}

/// Where to run [`log_command`] for `entry`.
pub fn log_target(entry: &TraceEntry) -> ExecTarget {
    ExecTarget::new(
        entry.gadget_namespace.clone(),
        entry.gadget_pod.clone(),
        GADGET_CONTAINER,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::fixtures;
    use serde_json::json;

    fn gadget_pod(name: &str, records: serde_json::Value) -> Pod {
        let mut pod = fixtures::pod(GADGET_NAMESPACE, name, "Running");
        pod.metadata
            .labels
            .insert(GADGET_LABEL.0.to_string(), GADGET_LABEL.1.to_string());
        pod.metadata
            .annotations
            .insert(TRACE_STATE_ANNOTATION.to_string(), records.to_string());
        pod
    }

    fn pods() -> Vec<Pod> {
        vec![
            gadget_pod(
                "gadget-a",
                json!([
                    {"traceid": "00001", "namespace": "shop", "podname": "web-1", "status": "ready"},
                    {"traceid": "00002", "namespace": "shop", "podname": "", "status": "ready"},
                    {"traceid": "00003", "namespace": "api", "podname": "api-1", "status": "deleted"},
                ]),
            ),
            gadget_pod(
                "gadget-b",
                json!([{"traceid": "00004", "namespace": "shop", "podname": "web-2", "status": "ready"}]),
            ),
            fixtures::pod("shop", "web-1", "Running"),
        ]
    }

    fn ids(traces: &[TraceEntry]) -> Vec<&str> {
        traces.iter().map(|t| t.record.traceid.as_str()).collect()
    }

    #[test]
    fn test_list_skips_unnamed_and_non_gadget() {
        let traces = list_traces(&pods());
        assert_eq!(ids(&traces), vec!["00001", "00003", "00004"]);
        assert_eq!(traces[2].gadget_pod, "gadget-b");
    }

    #[test]
    fn test_unreadable_annotation() {
        let mut pod = gadget_pod("gadget-c", json!([]));
        pod.metadata
            .annotations
            .insert(TRACE_STATE_ANNOTATION.to_string(), "{not json".to_string());
        assert!(pod_traces(&pod).is_empty());
    }

    #[test]
    fn test_sort_not_ready_first() {
        let mut traces = list_traces(&pods());
        sort_traces(&mut traces);
        assert_eq!(ids(&traces), vec!["00003", "00001", "00004"]);
    }

    #[test]
    fn test_filter() {
        let traces = list_traces(&pods());

        let by_ns = TraceFilter {
            namespaces: ["api".to_string()].into_iter().collect(),
            search: None,
        };
        assert_eq!(ids(&by_ns.apply(traces.clone())), vec!["00003"]);

        let by_search = TraceFilter {
            search: Some("WEB".to_string()),
            ..Default::default()
        };
        assert_eq!(ids(&by_search.apply(traces.clone())), vec!["00001", "00004"]);

        let by_status = TraceFilter {
            search: Some("delet".to_string()),
            ..Default::default()
        };
        assert_eq!(ids(&by_status.apply(traces)), vec!["00003"]);
    }

    #[test]
    fn test_find_trace_for_pod() {
        let found = find_trace_for_pod(&pods(), "shop", "web-2").unwrap();
        assert_eq!(found.record.traceid, "00004");
        assert_eq!(log_target(&found), ExecTarget::new("gadget", "gadget-b", "gadget"));
        assert!(find_trace_for_pod(&pods(), "api", "web-2").is_none());
    }

    #[test]
    fn test_log_command_encodes_trace_id() {
        let cmd = log_command("abc 'x'&y", 500).unwrap();
        assert_eq!(cmd[0], "/bin/sh");
        assert_eq!(
            cmd[2],
            "curl --silent --unix-socket /run/traceloop.socket \
             'http://localhost/dump-by-traceid?traceid=abc+%27x%27%26y' | tail -n500"
        );
    }
}

//! Configuration for the agent.

use std::time::Duration;

use anyhow::{Context, Result};
use tracedeck_id::Namespace;

use crate::cluster::{ClusterConfig, IN_CLUSTER_URL};
use crate::lifecycle::JobKind;

/// Service account token mounted into every pod.
pub const IN_CLUSTER_TOKEN_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server connection.
    pub cluster: ClusterConfig,

    /// Namespace whose policies are reconciled; all namespaces if unset.
    pub namespace: Option<Namespace>,

    /// Trace jobs to watch.
    pub jobs: Vec<JobKind>,

    /// Job poll interval in seconds.
    pub poll_interval_secs: u64,

    /// Policy listing refresh interval in seconds.
    pub refresh_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_url = var("TRACEDECK_API_URL").unwrap_or_else(|| IN_CLUSTER_URL.to_string());

        let token = match var("TRACEDECK_TOKEN") {
            Some(token) => Some(token),
            None => {
                let path = var("TRACEDECK_TOKEN_FILE");
                read_token(path.as_deref())?
            }
        };

        let insecure_tls = var("TRACEDECK_INSECURE_TLS")
            .map(|s| matches!(s.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let request_timeout_secs = var("TRACEDECK_REQUEST_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let namespace = var("TRACEDECK_NAMESPACE")
            .filter(|s| !s.is_empty())
            .map(|s| Namespace::parse(&s))
            .transpose()
            .context("invalid TRACEDECK_NAMESPACE")?;

        let jobs = match var("TRACEDECK_JOBS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse)
                .collect::<Result<Vec<JobKind>, _>>()
                .context("invalid TRACEDECK_JOBS")?,
            None => vec![JobKind::Seccomp, JobKind::Biolatency],
        };

        let poll_interval_secs = var("TRACEDECK_POLL_INTERVAL_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let refresh_interval_secs = var("TRACEDECK_REFRESH_INTERVAL_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let log_level = var("TRACEDECK_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            cluster: ClusterConfig {
                api_url,
                token,
                insecure_tls,
                request_timeout: Duration::from_secs(request_timeout_secs),
            },
            namespace,
            jobs,
            poll_interval_secs,
            refresh_interval_secs,
            log_level,
        })
    }
}

/// Read a bearer token. An explicit path must exist; the in-cluster default
/// is optional.
fn read_token(path: Option<&str>) -> Result<Option<String>> {
    match path {
        Some(path) => {
            let token = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read token file {path}"))?;
            Ok(Some(token.trim().to_string()))
        }
        None => Ok(std::fs::read_to_string(IN_CLUSTER_TOKEN_FILE)
            .ok()
            .map(|t| t.trim().to_string())),
    }
}

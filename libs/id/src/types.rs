//! Name, kind, and reference types for cluster objects.

use serde::{Deserialize, Serialize};

use crate::{define_name, IdError};

/// Maximum length of a DNS-1123 label.
pub const MAX_LABEL_LEN: usize = 63;

/// Maximum length of a DNS-1123 subdomain.
pub const MAX_SUBDOMAIN_LEN: usize = 253;

// =============================================================================
// Validators
// =============================================================================

fn validate_dns(what: &'static str, s: &str, max: usize, allow_dot: bool) -> Result<(), IdError> {
    if s.is_empty() {
        return Err(IdError::Empty { what });
    }
    if s.len() > max {
        return Err(IdError::TooLong {
            what,
            value: s.to_string(),
            max,
        });
    }
    if let Some(ch) = s
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || (allow_dot && *c == '.')))
    {
        return Err(IdError::InvalidCharacter {
            what,
            value: s.to_string(),
            ch,
        });
    }

    let is_alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    let starts = s.chars().next().is_some_and(is_alnum);
    let ends = s.chars().last().is_some_and(is_alnum);
    if !starts || !ends {
        return Err(IdError::InvalidBoundary {
            what,
            value: s.to_string(),
        });
    }

    Ok(())
}

/// Validates a DNS-1123 label.
pub fn validate_label(what: &'static str, s: &str) -> Result<(), IdError> {
    validate_dns(what, s, MAX_LABEL_LEN, false)
}

/// Validates a DNS-1123 subdomain.
pub fn validate_subdomain(what: &'static str, s: &str) -> Result<(), IdError> {
    validate_dns(what, s, MAX_SUBDOMAIN_LEN, true)
}

define_name!(Namespace, "namespace", validate_label);
define_name!(ObjectName, "object name", validate_subdomain);

// =============================================================================
// Workload kinds
// =============================================================================

/// Kind of a workload object that can own pods.
///
/// Anything outside the recognized set is kept verbatim in `Other` so that
/// ownership resolution can stop at it without losing the original kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WorkloadKind {
    Pod,
    Deployment,
    DaemonSet,
    StatefulSet,
    ReplicaSet,
    Job,
    CronJob,
    Other(String),
}

impl WorkloadKind {
    /// Every kind the ownership resolver is allowed to follow.
    pub const RECOGNIZED: [WorkloadKind; 7] = [
        WorkloadKind::Pod,
        WorkloadKind::Deployment,
        WorkloadKind::DaemonSet,
        WorkloadKind::StatefulSet,
        WorkloadKind::ReplicaSet,
        WorkloadKind::Job,
        WorkloadKind::CronJob,
    ];

    /// Maps a `kind` string as found in owner references. Never fails.
    pub fn parse(kind: &str) -> Self {
        match kind {
            "Pod" => Self::Pod,
            "Deployment" => Self::Deployment,
            "DaemonSet" => Self::DaemonSet,
            "StatefulSet" => Self::StatefulSet,
            "ReplicaSet" => Self::ReplicaSet,
            "Job" => Self::Job,
            "CronJob" => Self::CronJob,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pod => "Pod",
            Self::Deployment => "Deployment",
            Self::DaemonSet => "DaemonSet",
            Self::StatefulSet => "StatefulSet",
            Self::ReplicaSet => "ReplicaSet",
            Self::Job => "Job",
            Self::CronJob => "CronJob",
            Self::Other(kind) => kind,
        }
    }

    /// Returns true for the built-in workload kinds.
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    /// API group and version serving this kind. `None` for unrecognized kinds.
    pub fn group_version(&self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Pod => Some(("", "v1")),
            Self::Deployment | Self::DaemonSet | Self::StatefulSet | Self::ReplicaSet => {
                Some(("apps", "v1"))
            }
            Self::Job | Self::CronJob => Some(("batch", "v1")),
            Self::Other(_) => None,
        }
    }

    /// Lowercase plural resource name, e.g. `deployments`.
    pub fn plural(&self) -> String {
        format!("{}s", self.as_str().to_lowercase())
    }
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for WorkloadKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for WorkloadKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

// =============================================================================
// References
// =============================================================================

/// Reference to a workload object, produced at every hop of ownership
/// resolution.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkloadRef {
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: String,
}

impl WorkloadRef {
    pub fn new(kind: WorkloadKind, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Shorthand for a pod reference.
    pub fn pod(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::new(WorkloadKind::Pod, name, namespace)
    }

    /// Returns true if this reference is a bare pod.
    pub fn is_pod(&self) -> bool {
        self.kind == WorkloadKind::Pod
    }
}

impl std::fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({}/{})", self.kind, self.namespace, self.name)
    }
}

/// Identity of a generated security policy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyId {
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

impl PolicyId {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        uid: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            uid: uid.into(),
        }
    }
}

impl std::fmt::Display for PolicyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Splits a `<namespace>/<name>` reference into validated parts.
pub fn parse_qualified(s: &str) -> Result<(Namespace, ObjectName), IdError> {
    let Some((ns, name)) = s.split_once('/') else {
        return Err(IdError::InvalidReference(s.to_string()));
    };
    Ok((Namespace::parse(ns)?, ObjectName::parse(name)?))
}

// =============================================================================
// Tests
// =============================================================================

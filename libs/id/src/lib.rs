//! # tracedeck-id
//!
//! Identity types for the cluster objects tracedeck reads and mutates.
//!
//! ## Design Principles
//!
//! - Names coming from operators are validated once at the boundary
//! - Workload kinds are a closed set plus an explicit `Other` escape hatch
//! - References carry their namespace so they can be followed without context
//!
//! ## Name Format
//!
//! Namespaces follow DNS-1123 label rules (at most 63 characters of
//! `[a-z0-9-]`, alphanumeric at both ends). Object names follow DNS-1123
//! subdomain rules (at most 253 characters, `.` also allowed).
//!
//! Examples:
//! - `kube-system` (namespace)
//! - `web-7d4b9c8f6-x2kqp` (pod name)
//! - `default.seccomp.profile` (object name)

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

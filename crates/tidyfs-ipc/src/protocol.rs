//! Wire types for the control plane
//!
//! Requests and responses are single JSON objects, one per line. The
//! method set is deliberately small: everything else the daemon does is
//! driven by the configuration file and filesystem events.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tidyfs_core::state::RuleStats;

/// A control request from a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Request {
    /// Structured snapshot of the daemon's state.
    Status,
    /// Re-read the configuration and restart watching with the new rules.
    Reload,
    /// Start watching if stopped.
    Enable,
    /// Stop watching; the control socket stays alive.
    Disable,
}

/// A control response to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    Status(StatusReport),
    Ok { message: String },
    Error { message: String },
}

/// Snapshot of the daemon returned by [`Request::Status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub config_path: PathBuf,
    /// Whether watching is currently active (false after `disable`).
    pub enabled: bool,
    /// Number of live watch entries.
    pub watch_count: usize,
    pub rules: BTreeMap<String, RuleStatus>,
}

/// Per-rule slice of the status report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleStatus {
    pub enabled: bool,
    /// Stats of the last completed execution, if the rule ever ran.
    pub stats: Option<RuleStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_string(&Request::Status).unwrap();
        assert_eq!(json, r#"{"method":"status"}"#);

        let parsed: Request = serde_json::from_str(r#"{"method":"reload"}"#).unwrap();
        assert_eq!(parsed, Request::Reload);
    }

    #[test]
    fn test_response_roundtrip() {
        let report = StatusReport {
            config_path: PathBuf::from("/etc/tidyfs.yaml"),
            enabled: true,
            watch_count: 3,
            rules: BTreeMap::new(),
        };
        let response = Response::Status(report.clone());

        let json = serde_json::to_string(&response).unwrap();
        let parsed: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Response::Status(report));
    }

    #[test]
    fn test_error_response() {
        let json = serde_json::to_string(&Response::Error { message: "bad config".into() }).unwrap();
        assert!(json.contains(r#""result":"error""#));
    }
}

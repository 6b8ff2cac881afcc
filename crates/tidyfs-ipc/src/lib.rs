//! tidyfs control-plane IPC
//!
//! The daemon listens on a local Unix domain socket and speaks
//! newline-delimited JSON: one request line in, one response line out,
//! connection per request. This crate holds the protocol types, the
//! endpoint path resolution (with stale-socket cleanup), and the client
//! side used by the CLI. The serving loop lives in the daemon crate,
//! where the controller is.

pub mod client;
pub mod endpoint;
pub mod protocol;

pub use client::request;
pub use endpoint::socket_path;
pub use protocol::{Request, Response, RuleStatus, StatusReport};

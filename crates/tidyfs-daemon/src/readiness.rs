//! Service-manager readiness notifications
//!
//! Under systemd (Type=notify) these report startup completion and the
//! beginning of shutdown. Without a NOTIFY_SOCKET both calls are no-ops,
//! so other init systems and foreground runs need no special casing.

use sd_notify::NotifyState;
use tracing::debug;

pub fn notify_ready() {
    if let Err(err) = sd_notify::notify(&[NotifyState::Ready]) {
        debug!(error = %err, "Readiness notification failed");
    }
}

pub fn notify_stopping() {
    if let Err(err) = sd_notify::notify(&[NotifyState::Stopping]) {
        debug!(error = %err, "Stopping notification failed");
    }
}

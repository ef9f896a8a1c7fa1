//! Coded fleet alerts.
//!
//! Alerts are keyed by a stable error code plus the affected node URL, kept
//! open in an in-process registry, and streamed to the external reporting
//! layer. Raising an already-open alert is a no-op so flapping conditions do
//! not spam the event channel.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Stable error codes, part of the external reporting contract
pub mod codes {
    /// A node only accepts the previous certificate generation
    pub const TLS_OLD_CERT: &str = "ERR00080";
    /// A node stayed unreachable through the whole connection ladder
    pub const NODE_UNREACHABLE: &str = "ERR00090";
    /// A proxy stopped answering reachability checks
    pub const PROXY_UNREACHABLE: &str = "ERR00091";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// One open, coded condition on one endpoint
#[derive(Debug, Clone)]
pub struct Alert {
    pub code: &'static str,
    pub url: String,
    pub severity: Severity,
    pub message: String,
}

/// Change notification for the external reporting layer
#[derive(Debug, Clone)]
pub enum AlertEvent {
    Raised(Alert),
    Resolved { code: &'static str, url: String },
}

/// Registry of open alerts plus the event stream feeding the external layer
pub struct AlertRegistry {
    open: DashMap<(&'static str, String), Alert>,
    tx: mpsc::UnboundedSender<AlertEvent>,
}

impl AlertRegistry {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<AlertEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                open: DashMap::new(),
                tx,
            }),
            rx,
        )
    }

    /// Open an alert. Returns true only when it was not already open.
    pub fn raise(
        &self,
        code: &'static str,
        url: &str,
        severity: Severity,
        message: String,
    ) -> bool {
        let key = (code, url.to_string());
        if self.open.contains_key(&key) {
            return false;
        }
        let alert = Alert {
            code,
            url: url.to_string(),
            severity,
            message,
        };
        match severity {
            Severity::Warning => {
                warn!(code = code, node = url, "{}", alert.message);
            }
            Severity::Error => {
                error!(code = code, node = url, "{}", alert.message);
            }
        }
        self.open.insert(key, alert.clone());
        let _ = self.tx.send(AlertEvent::Raised(alert));
        true
    }

    /// Close an alert. Returns true only when it was open.
    pub fn resolve(&self, code: &'static str, url: &str) -> bool {
        let removed = self.open.remove(&(code, url.to_string())).is_some();
        if removed {
            info!(code = code, node = url, "Alert resolved");
            let _ = self.tx.send(AlertEvent::Resolved {
                code,
                url: url.to_string(),
            });
        }
        removed
    }

    pub fn is_open(&self, code: &'static str, url: &str) -> bool {
        self.open.contains_key(&(code, url.to_string()))
    }

    pub fn open_alerts(&self) -> Vec<Alert> {
        self.open.iter().map(|e| e.value().clone()).collect()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}

use crate::apis::mirror::ObjectKey;
use thiserror::Error;

/// Controller-level errors
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::Error),

    #[error("Kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a backend rule could not be turned into a route
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error("rule for service {service} has no host")]
    MissingHost { service: String },

    #[error("service {service} has no port {port}")]
    UnknownServicePort { service: String, port: String },

    #[error("target port {target} of service {service} cannot be resolved")]
    UnresolvableTargetPort { service: String, target: String },

    #[error("service {service} has no ready endpoint addresses")]
    NoUpstreams { service: String },
}

/// Admin API push failures
#[derive(Error, Debug)]
pub enum PushError {
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("admin API returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Outcome of a single reconciliation step
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("{kind} {key} not found")]
    Lookup { kind: &'static str, key: ObjectKey },

    #[error("unresolvable backend: {0}")]
    Translate(#[from] TranslateError),

    #[error("mirrors not synced after {0:?}")]
    SyncTimeout(std::time::Duration),

    #[error("shutdown requested while waiting for mirrors")]
    Cancelled,

    #[error(transparent)]
    Push(#[from] PushError),
}

impl ReconcileError {
    /// Metric label for this error
    pub fn label(&self) -> &'static str {
        match self {
            ReconcileError::Lookup { .. } => "lookup_miss",
            ReconcileError::Translate(_) => "unresolvable",
            ReconcileError::SyncTimeout(_) => "sync_timeout",
            ReconcileError::Cancelled => "cancelled",
            ReconcileError::Push(_) => "push_failed",
        }
    }

    /// Already logged with full context where it happened (pusher, sync gate)
    pub fn logged_at_source(&self) -> bool {
        matches!(self, ReconcileError::Push(_) | ReconcileError::SyncTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_push_and_sync_failures_are_logged_at_source() {
        let push = ReconcileError::Push(PushError::Status {
            status: 500,
            body: "boom".to_string(),
        });
        assert!(push.logged_at_source());
        assert!(ReconcileError::SyncTimeout(Duration::from_secs(1)).logged_at_source());

        let lookup = ReconcileError::Lookup {
            kind: "Service",
            key: ObjectKey::new("default", "svc1"),
        };
        assert!(!lookup.logged_at_source());
        assert!(!ReconcileError::Cancelled.logged_at_source());
    }
}

//! Model-client error taxonomies.
//!
//! Both clients classify failures into a small set of kinds that drive
//! retry predicates and tier fallback decisions. Kinds can also be
//! recovered from a raw server error message, since the model servers
//! report most failures as free text.

use thiserror::Error;

/// Errors from the local model endpoint.
#[derive(Error, Debug)]
pub enum LocalModelError {
    /// Could not reach the model server.
    #[error("connection error: {0}")]
    Connection(String),

    /// The request exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// The requested model is missing or failed to load.
    #[error("model error: {0}")]
    Model(String),

    /// The model refused the input on content/safety grounds.
    #[error("content rejected: {0}")]
    Content(String),

    /// The model service ran out of memory or other resources.
    #[error("model resources exhausted: {0}")]
    Memory(String),

    /// Anything that does not fit the kinds above.
    #[error("model request failed: {0}")]
    Unknown(String),
}

impl LocalModelError {
    /// Classify a raw server error message into a kind.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if contains_any(&lower, &["connect", "connection", "network", "unreachable", "refused"]) {
            LocalModelError::Connection(message)
        } else if contains_any(&lower, &["timeout", "timed out", "too long"]) {
            LocalModelError::Timeout
        } else if contains_any(&lower, &["memory", "resources", "capacity"]) {
            LocalModelError::Memory(message)
        } else if contains_any(&lower, &["model", "not found", "doesn't exist"]) {
            LocalModelError::Model(message)
        } else if contains_any(&lower, &["content", "filter", "safety", "inappropriate"]) {
            LocalModelError::Content(message)
        } else {
            LocalModelError::Unknown(message)
        }
    }

    /// `true` for failures that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, LocalModelError::Connection(_) | LocalModelError::Timeout)
    }

    /// `true` for failures caused by the model itself rather than the
    /// transport or the input.
    pub fn is_model_related(&self) -> bool {
        matches!(self, LocalModelError::Model(_) | LocalModelError::Memory(_))
    }

    /// Stable label used in metrics and usage records.
    pub fn kind(&self) -> &'static str {
        match self {
            LocalModelError::Connection(_) => "connection",
            LocalModelError::Timeout => "timeout",
            LocalModelError::Model(_) => "model",
            LocalModelError::Content(_) => "content",
            LocalModelError::Memory(_) => "memory",
            LocalModelError::Unknown(_) => "unknown",
        }
    }
}

/// Errors from the remote model endpoint.
#[derive(Error, Debug)]
pub enum RemoteModelError {
    /// Could not reach the remote service.
    #[error("connection error: {0}")]
    Connection(String),

    /// The request exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// The requested model does not exist or is not accessible.
    #[error("model error: {0}")]
    Model(String),

    /// The service refused the input on content/safety grounds.
    #[error("content rejected: {0}")]
    Content(String),

    /// Admission denied by the usage ledger or throttled by the service.
    #[error("quota exceeded: {reason}")]
    Quota {
        /// Which limit was hit.
        reason: String,
        /// `true` when the remote service throttled the call; `false`
        /// for a ledger admission denial, which will not clear between
        /// retry attempts.
        throttled: bool,
    },

    /// Anything that does not fit the kinds above.
    #[error("remote request failed: {0}")]
    Unknown(String),
}

impl RemoteModelError {
    /// Classify a raw service error message into a kind.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if contains_any(&lower, &["connect", "connection", "network", "unreachable", "refused"]) {
            RemoteModelError::Connection(message)
        } else if contains_any(&lower, &["timeout", "timed out", "too long"]) {
            RemoteModelError::Timeout
        } else if contains_any(&lower, &["quota", "limit", "throttl", "rate"]) {
            // Message-sniffed quota failures come from the service side.
            RemoteModelError::Quota {
                reason: message,
                throttled: true,
            }
        } else if contains_any(&lower, &["model", "not found", "doesn't exist"]) {
            RemoteModelError::Model(message)
        } else if contains_any(&lower, &["content", "filter", "safety", "inappropriate"]) {
            RemoteModelError::Content(message)
        } else {
            RemoteModelError::Unknown(message)
        }
    }

    /// `true` for failures that may succeed on retry. Service throttling
    /// counts (the window may reopen between attempts); a ledger
    /// admission denial does not — the daily/hourly/monthly windows will
    /// not clear within a backoff delay.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteModelError::Connection(_)
                | RemoteModelError::Timeout
                | RemoteModelError::Quota { throttled: true, .. }
        )
    }

    /// Stable label used in metrics and usage records.
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteModelError::Connection(_) => "connection",
            RemoteModelError::Timeout => "timeout",
            RemoteModelError::Model(_) => "model",
            RemoteModelError::Content(_) => "content",
            RemoteModelError::Quota { .. } => "quota",
            RemoteModelError::Unknown(_) => "unknown",
        }
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_classification_from_message() {
        assert!(matches!(
            LocalModelError::from_message("connection refused by host"),
            LocalModelError::Connection(_)
        ));
        assert!(matches!(
            LocalModelError::from_message("request timed out after 30s"),
            LocalModelError::Timeout
        ));
        assert!(matches!(
            LocalModelError::from_message("model 'llama9' not found"),
            LocalModelError::Model(_)
        ));
        assert!(matches!(
            LocalModelError::from_message("blocked by safety filter"),
            LocalModelError::Content(_)
        ));
        assert!(matches!(
            LocalModelError::from_message("out of memory"),
            LocalModelError::Memory(_)
        ));
        assert!(matches!(
            LocalModelError::from_message("something odd happened"),
            LocalModelError::Unknown(_)
        ));
    }

    #[test]
    fn memory_wins_over_model_keyword() {
        // "model ran out of memory" mentions both; resource exhaustion is
        // the more specific classification.
        assert!(matches!(
            LocalModelError::from_message("model ran out of memory"),
            LocalModelError::Memory(_)
        ));
    }

    #[test]
    fn local_transient_kinds() {
        assert!(LocalModelError::Connection("x".into()).is_transient());
        assert!(LocalModelError::Timeout.is_transient());
        assert!(!LocalModelError::Model("x".into()).is_transient());
        assert!(!LocalModelError::Content("x".into()).is_transient());
    }

    #[test]
    fn local_model_related_kinds() {
        assert!(LocalModelError::Model("x".into()).is_model_related());
        assert!(LocalModelError::Memory("x".into()).is_model_related());
        assert!(!LocalModelError::Timeout.is_model_related());
    }

    #[test]
    fn remote_classification_from_message() {
        assert!(matches!(
            RemoteModelError::from_message("throttling: rate exceeded"),
            RemoteModelError::Quota { throttled: true, .. }
        ));
        assert!(matches!(
            RemoteModelError::from_message("model not found"),
            RemoteModelError::Model(_)
        ));
        assert!(matches!(
            RemoteModelError::from_message("inappropriate content detected"),
            RemoteModelError::Content(_)
        ));
    }

    #[test]
    fn remote_transient_includes_throttle_but_not_denial() {
        assert!(RemoteModelError::Quota {
            reason: "rate exceeded".into(),
            throttled: true,
        }
        .is_transient());
        assert!(!RemoteModelError::Quota {
            reason: "daily token limit exceeded".into(),
            throttled: false,
        }
        .is_transient());
        assert!(RemoteModelError::Timeout.is_transient());
        assert!(!RemoteModelError::Content("x".into()).is_transient());
        assert!(!RemoteModelError::Model("x".into()).is_transient());
    }

    #[test]
    fn kind_labels() {
        assert_eq!(LocalModelError::Timeout.kind(), "timeout");
        assert_eq!(
            RemoteModelError::Quota {
                reason: "x".into(),
                throttled: false,
            }
            .kind(),
            "quota"
        );
        assert_eq!(RemoteModelError::Unknown("x".into()).kind(), "unknown");
    }
}

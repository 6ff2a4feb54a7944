//! Error types for the RPC layer.

use std::time::Duration;

/// Why an RPC call did not produce a successful response.
///
/// Every variant names the correlation id it belongs to. Each error is
/// delivered to exactly one caller, the one awaiting that id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// No response arrived within the timeout.
    #[error("request {id} timed out after {timeout:?}")]
    Timeout { id: String, timeout: Duration },

    /// The request was cancelled, on its own or through `cancel_all`.
    #[error("request {id} was cancelled")]
    Cancelled { id: String },

    /// The peer answered with an error.
    #[error("request {id} failed on the remote side: {message}")]
    Remote { id: String, message: String },

    /// The peer's answer arrived but couldn't be read as a response.
    #[error("request {id} got an unreadable response: {reason}")]
    Malformed { id: String, reason: String },

    /// The caller's send function rejected the request. The request never
    /// became pending.
    #[error("request {id} could not be sent: {reason}")]
    Send { id: String, reason: String },

    /// The manager was dropped while the request was pending.
    #[error("request {id} was abandoned before it resolved")]
    Closed { id: String },

    /// `issue` was called outside a Tokio runtime, so there's nothing to
    /// drive the timeout.
    #[error("no tokio runtime to drive the timeout of request {id}")]
    NoRuntime { id: String },
}

impl RpcError {
    /// The correlation id of the failed request.
    pub fn id(&self) -> &str {
        match self {
            Self::Timeout { id, .. }
            | Self::Cancelled { id }
            | Self::Remote { id, .. }
            | Self::Malformed { id, .. }
            | Self::Send { id, .. }
            | Self::Closed { id }
            | Self::NoRuntime { id } => id,
        }
    }

    /// Whether trying the same call again may succeed.
    ///
    /// Only a timeout qualifies. A remote error is the peer's answer, and
    /// a cancellation was asked for.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable_only_for_timeout() {
        let timeout = RpcError::Timeout {
            id: "rpc-1".into(),
            timeout: Duration::from_millis(50),
        };
        assert!(timeout.is_retryable());
        assert!(!RpcError::Cancelled { id: "rpc-1".into() }.is_retryable());
        assert!(
            !RpcError::Remote {
                id: "rpc-1".into(),
                message: "boom".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_malformed_is_not_retryable() {
        let err = RpcError::Malformed {
            id: "rpc-3".into(),
            reason: "bad ok".into(),
        };
        assert_eq!(err.id(), "rpc-3");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_display_names_the_request() {
        let err = RpcError::Remote {
            id: "rpc-7".into(),
            message: "no such method".into(),
        };
        assert_eq!(err.id(), "rpc-7");
        assert_eq!(
            err.to_string(),
            "request rpc-7 failed on the remote side: no such method"
        );
    }
}

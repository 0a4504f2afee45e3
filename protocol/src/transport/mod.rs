//! # Transport Seam
//!
//! The dissemination engine never touches sockets or streams. It talks to
//! its peers through the [`Transport`] trait, which offers exactly two
//! primitives:
//!
//! - [`Transport::send`] — fire-and-forget, used for replies.
//! - [`Transport::call`] — request/response bounded by a deadline.
//!
//! The only failure the engine treats as recoverable is
//! [`TransportError::Timeout`]. Everything else means the transport itself
//! misbehaved, and the caller decides how loudly to complain.
//!
//! The production implementation (newline-delimited JSON over stdio) lives
//! in the node binary. [`mock::MockTransport`] is a scripted stand-in for
//! tests and simulations.

pub mod mock;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::TYPE_ERROR;
use crate::wire::ErrorCode;

/// Errors surfaced by [`Transport::call`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No reply arrived before the deadline, or the peer reported a timeout.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// The peer answered with an error body.
    #[error("{dest} rejected request with {code}: {text}")]
    Rejected {
        /// Node that sent the error.
        dest: String,
        /// Error code from the reply.
        code: ErrorCode,
        /// Error text from the reply.
        text: String,
    },

    /// The outbound stream is gone; nothing can be sent anymore.
    #[error("transport closed")]
    Closed,

    /// The body could not be turned into a wire message.
    #[error("cannot encode message: {0}")]
    Encoding(String),
}

impl TransportError {
    /// `true` for the one failure mode delivery logic retries on.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Request/response messaging with this node's peers.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// ID of the node this transport sends from.
    fn node_id(&self) -> &str;

    /// Sends `body` to `dest` without waiting for anything.
    fn send(&self, dest: &str, body: Value) -> Result<(), TransportError>;

    /// Sends `body` to `dest` and waits up to `timeout` for the reply body.
    ///
    /// Error replies are turned into errors via [`classify_reply`]; a
    /// successful return always carries a non-error body.
    async fn call(&self, dest: &str, body: Value, timeout: Duration) -> Result<Value, TransportError>;
}

/// Splits a reply body into success or [`TransportError`].
///
/// An `error` reply with code 0 means the peer itself gave up waiting and is
/// reported as [`TransportError::Timeout`], so callers retry it like a
/// local deadline. Any other error code is [`TransportError::Rejected`].
pub fn classify_reply(dest: &str, timeout: Duration, body: Value) -> Result<Value, TransportError> {
    if body.get("type").and_then(Value::as_str) != Some(TYPE_ERROR) {
        return Ok(body);
    }

    let code = body
        .get("code")
        .and_then(Value::as_u64)
        .map(|c| u32::try_from(c).map_or(ErrorCode::Other(u32::MAX), ErrorCode::from_u32))
        .unwrap_or(ErrorCode::Crash);

    if code == ErrorCode::Timeout {
        return Err(TransportError::Timeout(timeout));
    }

    let text = body
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Err(TransportError::Rejected {
        dest: dest.to_string(),
        code,
        text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DEADLINE: Duration = Duration::from_millis(100);

    #[test]
    fn ok_reply_passes_through() {
        let body = json!({"type": "broadcast_ok", "in_reply_to": 1});
        assert_eq!(classify_reply("n1", DEADLINE, body.clone()), Ok(body));
    }

    #[test]
    fn error_code_zero_is_a_timeout() {
        let body = json!({"type": "error", "code": 0, "text": "timed out"});
        let err = classify_reply("n1", DEADLINE, body).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn oversized_error_code_is_not_mistaken_for_timeout() {
        let body = json!({"type": "error", "code": 4_294_967_296u64, "text": "?"});
        let err = classify_reply("n1", DEADLINE, body).unwrap_err();

        assert!(!err.is_timeout());
        assert!(matches!(
            err,
            TransportError::Rejected { code: ErrorCode::Other(u32::MAX), .. }
        ));
    }

    #[test]
    fn other_error_codes_are_rejections() {
        let body = json!({"type": "error", "code": 13, "text": "boom"});
        let err = classify_reply("n1", DEADLINE, body).unwrap_err();

        assert!(!err.is_timeout());
        assert_eq!(
            err,
            TransportError::Rejected {
                dest: "n1".into(),
                code: ErrorCode::Crash,
                text: "boom".into(),
            }
        );
    }
}

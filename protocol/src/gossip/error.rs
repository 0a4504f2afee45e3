//! Error types for the dissemination engine.

use thiserror::Error;

use crate::transport::TransportError;
use crate::wire::MessageValue;

/// Errors raised by topology installs and retry workers.
///
/// Retry workers hand `DeliveryFailed` and `UnexpectedReply` to the fatal
/// error channel (see [`super::FatalErrors`]); the node runtime shuts the
/// process down when one arrives. On the first-attempt path the same
/// conditions are only logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GossipError {
    /// The topology map has no adjacency list for this node.
    #[error("topology has no entry for node {0}")]
    MissingSelfEntry(String),

    /// The transport failed with something other than a timeout.
    #[error("delivering {value} to {neighbor} failed: {source}")]
    DeliveryFailed {
        /// Neighbor the delivery was addressed to.
        neighbor: String,
        /// Value being delivered.
        value: MessageValue,
        /// Underlying transport failure.
        #[source]
        source: TransportError,
    },

    /// The neighbor answered, but not with `broadcast_ok`.
    #[error("{neighbor} answered delivery of {value} with {marker:?} instead of broadcast_ok")]
    UnexpectedReply {
        /// Neighbor that sent the reply.
        neighbor: String,
        /// Value being delivered.
        value: MessageValue,
        /// The reply's `type` tag, empty if it had none.
        marker: String,
    },
}

//! # Wire Format
//!
//! Rumor nodes exchange one JSON object per line. Every object is an
//! [`Envelope`] carrying a source, a destination and an opaque body:
//!
//! ```text
//! {"src":"c1","dest":"n0","body":{"type":"broadcast","msg_id":7,"message":42}}
//! {"src":"n0","dest":"c1","body":{"type":"broadcast_ok","in_reply_to":7}}
//! ```
//!
//! Bodies stay untyped ([`serde_json::Value`]) inside the envelope so the
//! runtime can read `msg_id`/`in_reply_to` even when the rest of the body is
//! garbage, and answer malformed requests with a proper error reply. Typed
//! parsing happens in [`Request::parse`].
//!
//! ## Message Index
//!
//! | Request     | Reply          | Payload                               |
//! |-------------|----------------|---------------------------------------|
//! | `init`      | `init_ok`      | `node_id`, `node_ids`                 |
//! | `broadcast` | `broadcast_ok` | `message`                             |
//! | `read`      | `read_ok`      | reply carries `messages`              |
//! | `topology`  | `topology_ok`  | `topology`                            |
//! | `generate`  | `generate_ok`  | reply carries `id`                    |

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A gossiped value. Identity is integer equality, nothing more.
pub type MessageValue = i64;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A single line on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Node or client that sent the message.
    pub src: String,
    /// Node the message is addressed to.
    pub dest: String,
    /// Message body. Always a JSON object for well-formed traffic.
    pub body: Value,
}

impl Envelope {
    /// Creates an envelope around an already-built body.
    pub fn new(src: impl Into<String>, dest: impl Into<String>, body: Value) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
            body,
        }
    }

    /// The body's `type` tag, if present.
    pub fn kind(&self) -> Option<&str> {
        self.body.get("type").and_then(Value::as_str)
    }

    /// The request identifier assigned by the sender.
    pub fn msg_id(&self) -> Option<u64> {
        self.body.get("msg_id").and_then(Value::as_u64)
    }

    /// The request this envelope answers, if it is a reply.
    pub fn in_reply_to(&self) -> Option<u64> {
        self.body.get("in_reply_to").and_then(Value::as_u64)
    }
}

/// Sets `key` on a JSON object body. Returns `false` if the body is not an
/// object and therefore cannot carry protocol fields.
pub fn set_field(body: &mut Value, key: &str, value: impl Into<Value>) -> bool {
    match body.as_object_mut() {
        Some(map) => {
            map.insert(key.to_string(), value.into());
            true
        }
        None => false,
    }
}

/// Copy of `body` without the sender-specific `msg_id`/`in_reply_to` fields.
/// Used when a request body is forwarded to another node.
pub fn strip_routing(body: &Value) -> Value {
    let mut forwarded = body.clone();
    if let Some(map) = forwarded.as_object_mut() {
        map.remove("msg_id");
        map.remove("in_reply_to");
    }
    forwarded
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Requests a node knows how to serve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// One-time handshake assigning this node its identity.
    Init {
        /// This node's ID.
        node_id: String,
        /// Every node in the cluster, this one included.
        node_ids: Vec<String>,
    },
    /// A value to record and gossip. Sent by clients and by peers.
    Broadcast {
        /// The gossiped value.
        message: MessageValue,
    },
    /// Return every value this node has seen.
    Read,
    /// Install the cluster adjacency map.
    Topology {
        /// Node ID to the IDs of its direct neighbors.
        topology: HashMap<String, Vec<String>>,
    },
    /// Return a cluster-wide unique identifier.
    Generate,
}

impl Request {
    /// Body `type` tags this node serves.
    pub const KINDS: [&'static str; 5] = ["init", "broadcast", "read", "topology", "generate"];

    /// Parses a request body.
    ///
    /// Distinguishes bodies whose `type` this node does not serve
    /// ([`ParseError::Unsupported`]) from bodies that claim a known type but
    /// do not carry its fields ([`ParseError::Malformed`]).
    pub fn parse(body: &Value) -> Result<Self, ParseError> {
        let kind = body
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ParseError::Malformed("body has no string `type` field".into()))?;

        if !Self::KINDS.contains(&kind) {
            return Err(ParseError::Unsupported(kind.to_string()));
        }

        serde_json::from_value(body.clone())
            .map_err(|e| ParseError::Malformed(format!("invalid `{}` body: {}", kind, e)))
    }

    /// Serializes the request into a body ready for the transport.
    pub fn to_body(&self) -> Value {
        // Every variant is a map of strings, integers and string lists.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Why a request body could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The body is not a valid instance of any request type.
    #[error("malformed request: {0}")]
    Malformed(String),
    /// The body names a request type this node does not serve.
    #[error("unsupported request type: {0}")]
    Unsupported(String),
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Replies a node sends back to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Handshake accepted.
    InitOk,
    /// Broadcast accepted. Sent before dissemination finishes.
    BroadcastOk,
    /// Every value this node has seen.
    ReadOk {
        /// Known values, ascending.
        messages: Vec<MessageValue>,
    },
    /// Topology installed.
    TopologyOk,
    /// A freshly generated unique ID.
    GenerateOk {
        /// UUID v4 in hyphenated form.
        id: String,
    },
    /// The request failed.
    Error {
        /// Numeric error code, see [`ErrorCode`].
        code: u32,
        /// Human-readable description.
        text: String,
    },
}

impl Response {
    /// Builds an error reply.
    pub fn error(code: ErrorCode, text: impl Into<String>) -> Self {
        Self::Error {
            code: code.as_u32(),
            text: text.into(),
        }
    }

    /// Serializes the response into a body ready for the transport.
    pub fn to_body(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Error Codes
// ---------------------------------------------------------------------------

/// Error codes carried in `error` replies.
///
/// Codes below 1000 are shared by every node speaking this protocol:
/// - `0`: timeout (the request may or may not have taken effect)
/// - `1`: node not found
/// - `10`: not supported
/// - `11`: temporarily unavailable
/// - `12`: malformed request
/// - `13`: crash
/// - `14`: abort
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The request did not complete in time.
    Timeout,
    /// The destination node does not exist.
    NodeNotFound,
    /// The request type is not served by this node.
    NotSupported,
    /// The node cannot serve the request right now.
    TemporarilyUnavailable,
    /// The request body is invalid.
    MalformedRequest,
    /// The node hit an internal failure.
    Crash,
    /// The request was aborted.
    Abort,
    /// Any code outside the shared range.
    Other(u32),
}

impl ErrorCode {
    /// Numeric code on the wire.
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Timeout => 0,
            Self::NodeNotFound => 1,
            Self::NotSupported => 10,
            Self::TemporarilyUnavailable => 11,
            Self::MalformedRequest => 12,
            Self::Crash => 13,
            Self::Abort => 14,
            Self::Other(code) => code,
        }
    }

    /// Maps a wire code back to its variant.
    pub fn from_u32(code: u32) -> Self {
        match code {
            0 => Self::Timeout,
            1 => Self::NodeNotFound,
            10 => Self::NotSupported,
            11 => Self::TemporarilyUnavailable,
            12 => Self::MalformedRequest,
            13 => Self::Crash,
            14 => Self::Abort,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::NodeNotFound => write!(f, "node-not-found"),
            Self::NotSupported => write!(f, "not-supported"),
            Self::TemporarilyUnavailable => write!(f, "temporarily-unavailable"),
            Self::MalformedRequest => write!(f, "malformed-request"),
            Self::Crash => write!(f, "crash"),
            Self::Abort => write!(f, "abort"),
            Self::Other(code) => write!(f, "error-{}", code),
        }
    }
}

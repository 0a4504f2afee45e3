//! # Broadcast Node
//!
//! `BroadcastNode` is the request-serving face of a Rumor node. It owns the
//! deduplication store and the topology, and turns each inbound request
//! into calls on the dissemination engine:
//!
//! ```text
//! broadcast ─► MessageStore::record_if_novel ─► (novel) Disseminator, in background
//!          └─► broadcast_ok, immediately
//! read      ─► MessageStore::snapshot         ─► read_ok
//! topology  ─► TopologyManager::install       ─► topology_ok
//! generate  ─► UUID v4                        ─► generate_ok
//! ```
//!
//! The node is created after the `init` handshake, so its identity is fixed
//! for its whole lifetime.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::config::GossipConfig;
use crate::gossip::courier::Courier;
use crate::gossip::{
    Delivery, Disseminator, FanOutReport, FatalErrors, GossipError, MessageStore, TopologyManager,
};
use crate::metrics::GossipMetrics;
use crate::transport::Transport;
use crate::wire::{strip_routing, ErrorCode, MessageValue, ParseError, Request, Response};

// ---------------------------------------------------------------------------
// Node Identity
// ---------------------------------------------------------------------------

/// Who this node is, as assigned by the `init` handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    /// This node's ID.
    pub node_id: String,
    /// Every node in the cluster, this one included.
    pub node_ids: Vec<String>,
}

impl NodeIdentity {
    /// Creates an identity.
    pub fn new(node_id: impl Into<String>, node_ids: Vec<String>) -> Self {
        Self {
            node_id: node_id.into(),
            node_ids,
        }
    }
}

// ---------------------------------------------------------------------------
// Broadcast Node
// ---------------------------------------------------------------------------

/// Serves `broadcast`, `read`, `topology` and `generate` requests.
pub struct BroadcastNode {
    identity: NodeIdentity,
    store: MessageStore,
    topology: Arc<TopologyManager>,
    disseminator: Disseminator,
    metrics: GossipMetrics,
}

impl BroadcastNode {
    /// Creates a node sending through `transport`.
    ///
    /// Also returns the receiving end of the fatal error channel. The caller
    /// must watch it: an error there means a retry worker gave up for good.
    pub fn new(
        identity: NodeIdentity,
        transport: Arc<dyn Transport>,
        config: GossipConfig,
        metrics: GossipMetrics,
    ) -> (Arc<Self>, FatalErrors) {
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        let courier = Arc::new(Courier::new(transport, config, metrics.clone(), fatal_tx));
        let topology = Arc::new(TopologyManager::new());

        info!(
            node_id = %identity.node_id,
            cluster_size = identity.node_ids.len(),
            "broadcast node ready"
        );

        let node = Arc::new(Self {
            identity,
            store: MessageStore::new(),
            disseminator: Disseminator::new(Arc::clone(&topology), courier),
            topology,
            metrics,
        });
        (node, fatal_rx)
    }

    /// Handles one request from `src` and returns the reply body to send.
    pub async fn handle(&self, src: &str, body: &Value) -> Result<Response, HandlerError> {
        match Request::parse(body)? {
            Request::Broadcast { message } => {
                self.accept_broadcast(src, message, body);
                Ok(Response::BroadcastOk)
            }
            Request::Read => Ok(Response::ReadOk {
                messages: self.store.snapshot(),
            }),
            Request::Topology { topology } => {
                self.topology.install(&topology, &self.identity.node_id)?;
                self.metrics.topology_installs_total.inc();
                Ok(Response::TopologyOk)
            }
            Request::Generate => Ok(Response::GenerateOk {
                id: uuid::Uuid::new_v4().to_string(),
            }),
            Request::Init { .. } => Err(HandlerError::AlreadyInitialized),
        }
    }

    /// Records a broadcast value and, if it is new, starts disseminating it.
    ///
    /// Returns the fan-out task for novel values, `None` for duplicates. The
    /// task runs on its own; callers that only need the reply can drop the
    /// handle.
    pub fn accept_broadcast(
        &self,
        src: &str,
        value: MessageValue,
        body: &Value,
    ) -> Option<JoinHandle<FanOutReport>> {
        self.metrics.broadcasts_received_total.inc();

        // A neighbor that sent us the value has it.
        if let Some(link) = self.topology.link(src) {
            link.acks.mark_acked(value);
        }

        if !self.store.record_if_novel(value) {
            self.metrics.duplicate_broadcasts_total.inc();
            trace!(src, value, "duplicate broadcast");
            return None;
        }
        self.metrics.messages_known.set(self.store.len() as i64);
        debug!(src, value, "new value");

        let delivery = Delivery {
            value,
            body: strip_routing(body),
        };
        let disseminator = self.disseminator.clone();
        let sender = src.to_string();
        Some(tokio::spawn(async move {
            disseminator.disseminate(delivery, Some(sender.as_str())).await
        }))
    }

    /// This node's identity.
    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Every value seen so far, ascending.
    pub fn messages(&self) -> Vec<MessageValue> {
        self.store.snapshot()
    }

    /// The topology manager, for inspecting neighbor state.
    pub fn topology(&self) -> &TopologyManager {
        &self.topology
    }

    /// Metric handles shared with the engine.
    pub fn metrics(&self) -> &GossipMetrics {
        &self.metrics
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Request failures, each answered with an `error` reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// The body could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// The engine rejected the request.
    #[error(transparent)]
    Gossip(#[from] GossipError),
    /// `init` arrived after the handshake was done.
    #[error("node is already initialized")]
    AlreadyInitialized,
}

impl HandlerError {
    /// Error code for the reply.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Parse(ParseError::Unsupported(_)) => ErrorCode::NotSupported,
            Self::Parse(ParseError::Malformed(_)) => ErrorCode::MalformedRequest,
            Self::Gossip(GossipError::MissingSelfEntry(_)) => ErrorCode::MalformedRequest,
            Self::Gossip(_) => ErrorCode::Crash,
            Self::AlreadyInitialized => ErrorCode::MalformedRequest,
        }
    }

    /// The `error` reply for this failure.
    pub fn to_response(&self) -> Response {
        Response::error(self.code(), self.to_string())
    }
}

//! Single delivery attempts, shared by first attempts and retry workers.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::error;

use super::error::GossipError;
use crate::config::{GossipConfig, TYPE_BROADCAST_OK};
use crate::metrics::GossipMetrics;
use crate::transport::{Transport, TransportError};
use crate::wire::MessageValue;

/// A value and the body that carries it to a neighbor.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// The gossiped value, used for ack bookkeeping.
    pub value: MessageValue,
    /// Broadcast body sent to the neighbor, without routing fields.
    pub body: Value,
}

/// How one delivery attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Attempt {
    /// The neighbor replied `broadcast_ok`.
    Acked,
    /// No reply before the deadline.
    TimedOut,
    /// The neighbor replied with some other `type`.
    Unexpected(String),
    /// The transport failed for a reason other than a timeout.
    Failed(TransportError),
}

/// Everything a delivery needs besides the neighbor's own state: the
/// transport, timing, metrics, and the channel fatal errors go to.
pub(crate) struct Courier {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) config: GossipConfig,
    pub(crate) metrics: GossipMetrics,
    fatal_tx: mpsc::UnboundedSender<GossipError>,
}

impl Courier {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        config: GossipConfig,
        metrics: GossipMetrics,
        fatal_tx: mpsc::UnboundedSender<GossipError>,
    ) -> Self {
        Self {
            transport,
            config,
            metrics,
            fatal_tx,
        }
    }

    /// Sends `delivery` to `neighbor` once, bounded by `timeout`.
    pub(crate) async fn attempt(
        &self,
        neighbor: &str,
        delivery: &Delivery,
        timeout: Duration,
    ) -> Attempt {
        match self
            .transport
            .call(neighbor, delivery.body.clone(), timeout)
            .await
        {
            Ok(reply) => {
                let marker = reply.get("type").and_then(Value::as_str).unwrap_or_default();
                if marker == TYPE_BROADCAST_OK {
                    self.metrics.deliveries_acked_total.inc();
                    Attempt::Acked
                } else {
                    Attempt::Unexpected(marker.to_string())
                }
            }
            Err(e) if e.is_timeout() => {
                self.metrics.delivery_timeouts_total.inc();
                Attempt::TimedOut
            }
            Err(e) => Attempt::Failed(e),
        }
    }

    /// Reports an unrecoverable delivery error to the node runtime.
    pub(crate) fn escalate(&self, err: GossipError) {
        error!(error = %err, "fatal delivery error");
        if self.fatal_tx.send(err).is_err() {
            error!("fatal error channel closed, nobody is left to shut the node down");
        }
    }
}

//! # Dissemination Coordinator
//!
//! For every newly seen value the coordinator runs one fan-out: a concurrent
//! first attempt to each current neighbor except the one that sent us the
//! value. Outcomes per neighbor:
//!
//! | First attempt                  | Action                              |
//! |--------------------------------|-------------------------------------|
//! | `broadcast_ok`                 | mark acked                          |
//! | other reply type               | warn, give up on this neighbor      |
//! | timeout                        | hand over to the neighbor's queue   |
//! | any other transport failure    | warn, give up on this neighbor      |
//!
//! Only timeouts are retried: a slow peer is expected, a transport that
//! errors in any other way is not something resending will fix.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use super::courier::{Attempt, Courier, Delivery};
use super::retry;
use super::topology::{NeighborLink, TopologyManager};
use crate::transport::TransportError;

/// Result of one neighbor's first attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FirstAttempt {
    /// The neighbor acknowledged the value.
    Delivered,
    /// The attempt timed out; the delivery is in the neighbor's retry queue.
    Queued,
    /// The neighbor replied with the given `type` instead of `broadcast_ok`.
    Unexpected(String),
    /// The transport failed with a non-timeout error.
    Failed(TransportError),
    /// The first-attempt task itself died before reporting.
    Aborted,
}

/// Per-neighbor outcomes of one fan-out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanOutReport {
    /// Topology generation the fan-out ran against.
    pub generation: u64,
    /// `(neighbor, outcome)` in topology order.
    pub outcomes: Vec<(String, FirstAttempt)>,
}

impl FanOutReport {
    /// Neighbors the fan-out contacted.
    pub fn targets(&self) -> Vec<&str> {
        self.outcomes.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Outcome for `neighbor`, if it was contacted.
    pub fn outcome(&self, neighbor: &str) -> Option<&FirstAttempt> {
        self.outcomes
            .iter()
            .find(|(n, _)| n == neighbor)
            .map(|(_, outcome)| outcome)
    }
}

/// Fans novel values out to the current neighbor set.
#[derive(Clone)]
pub struct Disseminator {
    topology: Arc<TopologyManager>,
    courier: Arc<Courier>,
}

impl Disseminator {
    pub(crate) fn new(topology: Arc<TopologyManager>, courier: Arc<Courier>) -> Self {
        Self { topology, courier }
    }

    /// Delivers `delivery` to every current neighbor except `sender` and
    /// those already known to have the value.
    ///
    /// Each neighbor gets its own task; this future resolves once every
    /// first attempt has either succeeded, failed, or been handed to a retry
    /// queue. Retries continue in the background after it returns.
    pub async fn disseminate(&self, delivery: Delivery, sender: Option<&str>) -> FanOutReport {
        let topology = self.topology.snapshot();

        let targets: Vec<Arc<NeighborLink>> = topology
            .neighbors()
            .iter()
            .filter(|n| Some(n.as_str()) != sender)
            .filter_map(|n| topology.link(n))
            .filter(|link| !link.acks.is_acked(delivery.value))
            .cloned()
            .collect();

        debug!(
            value = delivery.value,
            sender = sender.unwrap_or("-"),
            generation = topology.generation(),
            targets = targets.len(),
            "disseminating"
        );

        let tasks = targets.iter().map(|link| {
            let link = Arc::clone(link);
            let courier = Arc::clone(&self.courier);
            let delivery = delivery.clone();
            tokio::spawn(async move { first_attempt(&link, delivery, &courier).await })
        });
        let results = join_all(tasks).await;

        let outcomes = targets
            .iter()
            .zip(results)
            .map(|(link, result)| {
                let outcome = result.unwrap_or_else(|e| {
                    warn!(neighbor = %link.neighbor, error = %e, "first attempt task aborted");
                    FirstAttempt::Aborted
                });
                (link.neighbor.clone(), outcome)
            })
            .collect();

        FanOutReport {
            generation: topology.generation(),
            outcomes,
        }
    }
}

async fn first_attempt(link: &Arc<NeighborLink>, delivery: Delivery, courier: &Arc<Courier>) -> FirstAttempt {
    let timeout = courier.config.first_attempt_timeout();
    courier.metrics.first_attempts_total.inc();

    match courier.attempt(&link.neighbor, &delivery, timeout).await {
        Attempt::Acked => {
            link.acks.mark_acked(delivery.value);
            FirstAttempt::Delivered
        }
        Attempt::TimedOut => {
            debug!(neighbor = %link.neighbor, value = delivery.value, "first attempt timed out, queueing retry");
            retry::schedule(link, delivery, courier);
            FirstAttempt::Queued
        }
        Attempt::Unexpected(marker) => {
            warn!(
                neighbor = %link.neighbor,
                value = delivery.value,
                marker = %marker,
                "unexpected reply to delivery, not retrying"
            );
            FirstAttempt::Unexpected(marker)
        }
        Attempt::Failed(e) => {
            warn!(
                neighbor = %link.neighbor,
                value = delivery.value,
                error = %e,
                "delivery failed, not retrying"
            );
            FirstAttempt::Failed(e)
        }
    }
}

//! # Gossip Metrics
//!
//! Prometheus counters and gauges for the dissemination engine. All metrics
//! live in a dedicated [`prometheus::Registry`] with the `rumor` prefix so
//! several nodes in one test process never collide on a global registry.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Metric handles shared by the store, the coordinator and retry workers.
///
/// Cloning is cheap: prometheus handles are reference-counted internally.
#[derive(Clone)]
pub struct GossipMetrics {
    registry: Registry,
    /// Broadcast requests received, duplicates included.
    pub broadcasts_received_total: IntCounter,
    /// Broadcast requests whose value was already known.
    pub duplicate_broadcasts_total: IntCounter,
    /// Distinct values in the deduplication store.
    pub messages_known: IntGauge,
    /// First delivery attempts issued by fan-outs.
    pub first_attempts_total: IntCounter,
    /// Deliveries confirmed with `broadcast_ok`, first attempt or retry.
    pub deliveries_acked_total: IntCounter,
    /// Delivery attempts that ran into their deadline.
    pub delivery_timeouts_total: IntCounter,
    /// Delivery attempts made by retry workers.
    pub retry_attempts_total: IntCounter,
    /// Queued deliveries dropped because the neighbor had already acked.
    pub retries_skipped_total: IntCounter,
    /// Deliveries currently waiting in retry queues.
    pub retry_queue_depth: IntGauge,
    /// Successful topology installs.
    pub topology_installs_total: IntCounter,
}

impl GossipMetrics {
    /// Creates and registers all metrics.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("rumor".into()), None)
            .expect("static registry prefix is valid");

        let counter = |name: &str, help: &str| {
            let metric = IntCounter::new(name, help).expect("metric creation");
            registry
                .register(Box::new(metric.clone()))
                .expect("metric registration");
            metric
        };
        let gauge = |name: &str, help: &str| {
            let metric = IntGauge::new(name, help).expect("metric creation");
            registry
                .register(Box::new(metric.clone()))
                .expect("metric registration");
            metric
        };

        Self {
            broadcasts_received_total: counter(
                "broadcasts_received_total",
                "Broadcast requests received, duplicates included",
            ),
            duplicate_broadcasts_total: counter(
                "duplicate_broadcasts_total",
                "Broadcast requests carrying an already known value",
            ),
            messages_known: gauge("messages_known", "Distinct values seen by this node"),
            first_attempts_total: counter(
                "first_attempts_total",
                "First delivery attempts issued by fan-outs",
            ),
            deliveries_acked_total: counter(
                "deliveries_acked_total",
                "Deliveries confirmed by the receiving neighbor",
            ),
            delivery_timeouts_total: counter(
                "delivery_timeouts_total",
                "Delivery attempts that exceeded their deadline",
            ),
            retry_attempts_total: counter(
                "retry_attempts_total",
                "Delivery attempts made by retry workers",
            ),
            retries_skipped_total: counter(
                "retries_skipped_total",
                "Queued deliveries dropped because the neighbor already had the value",
            ),
            retry_queue_depth: gauge(
                "retry_queue_depth",
                "Deliveries waiting in retry queues across all neighbors",
            ),
            topology_installs_total: counter(
                "topology_installs_total",
                "Successful topology installs",
            ),
            registry,
        }
    }

    /// Encodes every registered metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for GossipMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_includes_prefixed_names() {
        let metrics = GossipMetrics::new();
        metrics.broadcasts_received_total.inc();
        metrics.retry_queue_depth.set(3);

        let text = metrics.encode().unwrap();
        assert!(text.contains("rumor_broadcasts_received_total 1"));
        assert!(text.contains("rumor_retry_queue_depth 3"));
    }

    #[test]
    fn separate_instances_do_not_share_state() {
        let a = GossipMetrics::new();
        let b = GossipMetrics::new();
        a.first_attempts_total.inc_by(5);
        assert_eq!(b.first_attempts_total.get(), 0);
    }
}

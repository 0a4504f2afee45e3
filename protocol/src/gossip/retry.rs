//! # Per-Neighbor Retry Queues
//!
//! A delivery whose first attempt timed out is handed to the neighbor's
//! [`RetryQueue`]. One worker task drains each queue, oldest first, and keeps
//! re-sending the item at its head until the neighbor acknowledges it.
//!
//! ## State Machine
//!
//! ```text
//!            enqueue (spawns worker)
//!   ┌──────┐ ─────────────────────► ┌────────┐
//!   │ Idle │                        │ Active │ ── enqueue: append only
//!   └──────┘ ◄───────────────────── └────────┘
//!            worker finds queue empty     │
//!                                         │ fatal delivery error
//!                                         ▼
//!                                    ┌────────┐
//!                                    │ Halted │ ── enqueue: append only
//!                                    └────────┘
//! ```
//!
//! Both transitions out of `Idle` and back into it happen under the queue's
//! mutex, so a producer either sees `Active` (and the running worker is
//! guaranteed to pop its item) or flips `Idle → Active` itself and spawns
//! the one new worker. The lock is never held across a delivery attempt.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::courier::{Attempt, Courier, Delivery};
use super::error::GossipError;
use super::topology::NeighborLink;
use crate::wire::MessageValue;

/// Lifecycle of a retry queue's worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// No worker running.
    Idle,
    /// A worker is draining the queue.
    Active,
    /// The worker hit a fatal error; the queue keeps items but never
    /// starts another worker.
    Halted,
}

/// What [`RetryQueue::enqueue`] did with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueued {
    /// The queue went `Idle → Active`; the caller starts the worker.
    Activated,
    /// A worker is already running and will reach the item.
    Queued,
    /// The queue is halted; the item is parked and never delivered.
    Parked,
}

#[derive(Debug)]
struct QueueInner {
    pending: VecDeque<Delivery>,
    state: QueueState,
}

/// FIFO of deliveries waiting for one neighbor.
#[derive(Debug)]
pub struct RetryQueue {
    inner: Mutex<QueueInner>,
}

impl Default for RetryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryQueue {
    /// Creates an empty, idle queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                pending: VecDeque::new(),
                state: QueueState::Idle,
            }),
        }
    }

    /// Appends `delivery`. The state check and the `Idle → Active` flip
    /// happen under the same lock as the append.
    pub(crate) fn enqueue(&self, delivery: Delivery) -> Enqueued {
        let mut inner = self.inner.lock();
        inner.pending.push_back(delivery);
        match inner.state {
            QueueState::Idle => {
                inner.state = QueueState::Active;
                Enqueued::Activated
            }
            QueueState::Active => Enqueued::Queued,
            QueueState::Halted => Enqueued::Parked,
        }
    }

    /// Pops the oldest delivery. When the queue is empty the worker is done:
    /// the state drops back to `Idle` in the same critical section.
    pub(crate) fn next(&self) -> Option<Delivery> {
        let mut inner = self.inner.lock();
        let next = inner.pending.pop_front();
        if next.is_none() && inner.state == QueueState::Active {
            inner.state = QueueState::Idle;
        }
        next
    }

    /// Parks the queue after a fatal error. Returns how many deliveries
    /// were left waiting.
    pub(crate) fn halt(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.state = QueueState::Halted;
        inner.pending.len()
    }

    /// Current worker state.
    pub fn state(&self) -> QueueState {
        self.inner.lock().state
    }

    /// Number of deliveries waiting, not counting the one in flight.
    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }

    /// Values waiting, oldest first.
    pub fn pending_values(&self) -> Vec<MessageValue> {
        self.inner.lock().pending.iter().map(|d| d.value).collect()
    }
}

/// Queues `delivery` for `link`, starting the neighbor's worker if it was idle.
pub(crate) fn schedule(link: &Arc<NeighborLink>, delivery: Delivery, courier: &Arc<Courier>) {
    let value = delivery.value;
    // Counted before the append so a worker popping it right away never
    // drives the gauge negative.
    courier.metrics.retry_queue_depth.inc();

    match link.queue.enqueue(delivery) {
        Enqueued::Activated => {
            debug!(neighbor = %link.neighbor, value, generation = link.generation, "starting retry worker");
            tokio::spawn(drain(Arc::clone(link), Arc::clone(courier)));
        }
        Enqueued::Queued => {
            trace!(neighbor = %link.neighbor, value, "queued behind running retry worker");
        }
        Enqueued::Parked => {
            courier.metrics.retry_queue_depth.dec();
            warn!(neighbor = %link.neighbor, value, "retry queue halted, delivery parked");
        }
    }
}

/// Halts `link`'s queue and takes its leftovers out of the depth gauge.
fn halt(link: &NeighborLink, courier: &Courier) {
    let stranded = link.queue.halt();
    courier.metrics.retry_queue_depth.sub(stranded as i64);
}

/// Worker loop: deliver queued items in order until the queue is empty.
async fn drain(link: Arc<NeighborLink>, courier: Arc<Courier>) {
    let timeout = courier.config.retry_timeout();

    while let Some(delivery) = link.queue.next() {
        courier.metrics.retry_queue_depth.dec();

        loop {
            if link.acks.is_acked(delivery.value) {
                courier.metrics.retries_skipped_total.inc();
                trace!(neighbor = %link.neighbor, value = delivery.value, "already acked, skipping retry");
                break;
            }

            courier.metrics.retry_attempts_total.inc();
            match courier.attempt(&link.neighbor, &delivery, timeout).await {
                Attempt::Acked => {
                    link.acks.mark_acked(delivery.value);
                    debug!(neighbor = %link.neighbor, value = delivery.value, "retry delivered");
                    break;
                }
                Attempt::TimedOut => {
                    trace!(neighbor = %link.neighbor, value = delivery.value, "retry timed out, trying again");
                }
                Attempt::Unexpected(marker) => {
                    halt(&link, &courier);
                    courier.escalate(GossipError::UnexpectedReply {
                        neighbor: link.neighbor.clone(),
                        value: delivery.value,
                        marker,
                    });
                    return;
                }
                Attempt::Failed(source) => {
                    halt(&link, &courier);
                    courier.escalate(GossipError::DeliveryFailed {
                        neighbor: link.neighbor.clone(),
                        value: delivery.value,
                        source,
                    });
                    return;
                }
            }
        }
    }

    info!(neighbor = %link.neighbor, generation = link.generation, "retry queue drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    use crate::config::GossipConfig;
    use crate::metrics::GossipMetrics;
    use crate::transport::mock::{eventually, MockTransport, Outcome};
    use crate::transport::TransportError;

    fn delivery(value: MessageValue) -> Delivery {
        Delivery {
            value,
            body: json!({"type": "broadcast", "message": value}),
        }
    }

    fn setup() -> (
        Arc<MockTransport>,
        Arc<Courier>,
        Arc<NeighborLink>,
        mpsc::UnboundedReceiver<GossipError>,
    ) {
        let mock = Arc::new(MockTransport::new("n0"));
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        let courier = Arc::new(Courier::new(
            mock.clone(),
            GossipConfig::default(),
            GossipMetrics::new(),
            fatal_tx,
        ));
        let link = Arc::new(NeighborLink::new("n1", 1));
        (mock, courier, link, fatal_rx)
    }

    #[test]
    fn only_first_enqueue_activates() {
        let queue = RetryQueue::new();
        assert_eq!(queue.state(), QueueState::Idle);

        assert_eq!(queue.enqueue(delivery(1)), Enqueued::Activated);
        assert_eq!(queue.enqueue(delivery(2)), Enqueued::Queued);
        assert_eq!(queue.state(), QueueState::Active);
        assert_eq!(queue.pending_values(), vec![1, 2]);

        assert_eq!(queue.next().map(|d| d.value), Some(1));
        assert_eq!(queue.next().map(|d| d.value), Some(2));
        assert_eq!(queue.state(), QueueState::Active);

        assert!(queue.next().is_none());
        assert_eq!(queue.state(), QueueState::Idle);

        // Reactivates on the next enqueue.
        assert_eq!(queue.enqueue(delivery(3)), Enqueued::Activated);
    }

    #[test]
    fn halted_queue_never_reactivates() {
        let queue = RetryQueue::new();
        assert_eq!(queue.enqueue(delivery(1)), Enqueued::Activated);
        assert_eq!(queue.halt(), 1);

        assert_eq!(queue.enqueue(delivery(2)), Enqueued::Parked);
        assert_eq!(queue.state(), QueueState::Halted);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_retries_until_ack_then_idles() {
        let (mock, courier, link, _fatal_rx) = setup();
        mock.push_n("n1", Outcome::Timeout, 4);

        schedule(&link, delivery(9), &courier);

        eventually(|| link.queue.state() == QueueState::Idle).await;
        assert!(link.acks.is_acked(9));
        assert_eq!(mock.calls_to("n1").len(), 5);
        assert!(mock
            .calls_to("n1")
            .iter()
            .all(|c| c.timeout == courier.config.retry_timeout()));
        assert_eq!(courier.metrics.retry_attempts_total.get(), 5);
        assert_eq!(courier.metrics.retry_queue_depth.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn items_are_delivered_in_enqueue_order() {
        let (mock, courier, link, _fatal_rx) = setup();
        mock.push_n("n1", Outcome::Timeout, 2);

        for value in [5, 6, 7] {
            schedule(&link, delivery(value), &courier);
        }

        eventually(|| link.queue.state() == QueueState::Idle).await;
        let delivered: Vec<_> = mock.calls_to("n1").iter().filter_map(|c| c.message()).collect();
        assert_eq!(delivered, vec![5, 5, 5, 6, 7]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_producers_share_one_worker() {
        let (mock, courier, link, _fatal_rx) = setup();
        mock.push_n("n1", Outcome::Timeout, 2);

        let barrier = Arc::new(tokio::sync::Barrier::new(16));
        let producers: Vec<_> = (0..16)
            .map(|value| {
                let link = Arc::clone(&link);
                let courier = Arc::clone(&courier);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    schedule(&link, delivery(value), &courier);
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }

        eventually(|| link.queue.state() == QueueState::Idle).await;

        // One worker means one call in flight at a time.
        assert_eq!(mock.peak_in_flight("n1"), 1);
        assert!(link.queue.is_empty());
        assert_eq!(link.acks.acked_count(), 16);
        assert_eq!(courier.metrics.retry_queue_depth.get(), 0);

        // The head item absorbs both timeouts; everything else goes once.
        let calls = mock.calls_to("n1");
        assert_eq!(calls.len(), 18);
        let mut per_value: Vec<usize> = (0..16)
            .map(|v| calls.iter().filter(|c| c.message() == Some(v)).count())
            .collect();
        per_value.sort_unstable();
        assert_eq!(per_value[..15], [1; 15]);
        assert_eq!(per_value[15], 3);
    }

    #[tokio::test(start_paused = true)]
    async fn acked_items_are_skipped_without_a_call() {
        let (mock, courier, link, _fatal_rx) = setup();
        link.acks.mark_acked(4);

        schedule(&link, delivery(4), &courier);

        eventually(|| link.queue.state() == QueueState::Idle).await;
        assert!(mock.calls().is_empty());
        assert_eq!(courier.metrics.retries_skipped_total.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_halts_queue_and_escalates_once() {
        let (mock, courier, link, mut fatal_rx) = setup();
        mock.push("n1", Outcome::Fail(TransportError::Closed));

        schedule(&link, delivery(1), &courier);
        schedule(&link, delivery(2), &courier);

        let err = fatal_rx.recv().await.unwrap();
        assert_eq!(
            err,
            GossipError::DeliveryFailed {
                neighbor: "n1".into(),
                value: 1,
                source: TransportError::Closed,
            }
        );
        assert_eq!(link.queue.state(), QueueState::Halted);
        assert_eq!(link.queue.pending_values(), vec![2]);
        assert!(fatal_rx.try_recv().is_err());
        assert!(!link.acks.is_acked(1));
        assert_eq!(courier.metrics.retry_queue_depth.get(), 0);

        // Later deliveries park without touching the gauge.
        schedule(&link, delivery(3), &courier);
        assert_eq!(link.queue.pending_values(), vec![2, 3]);
        assert_eq!(courier.metrics.retry_queue_depth.get(), 0);
        assert_eq!(mock.calls_to("n1").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_marker_on_retry_is_fatal() {
        let (mock, courier, link, mut fatal_rx) = setup();
        mock.push("n1", Outcome::Reply(json!({"type": "read_ok"})));

        schedule(&link, delivery(3), &courier);

        match fatal_rx.recv().await.unwrap() {
            GossipError::UnexpectedReply { neighbor, value, marker } => {
                assert_eq!(neighbor, "n1");
                assert_eq!(value, 3);
                assert_eq!(marker, "read_ok");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(link.queue.state(), QueueState::Halted);
    }
}

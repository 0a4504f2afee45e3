//! Scripted in-memory [`Transport`].
//!
//! Each destination has a queue of [`Outcome`]s consumed one per call, plus
//! a fallback outcome used once the queue is empty (a `broadcast_ok` reply
//! unless changed with [`MockTransport::always`]). Every call and send is
//! recorded so tests can assert on exactly what went over the "wire".
//!
//! Timeouts are simulated by sleeping for the caller's deadline, so tests
//! running on a paused tokio clock see realistic ordering without waiting.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::{Transport, TransportError};
use crate::config::{TYPE_BROADCAST, TYPE_BROADCAST_OK};

/// What the mock does with one call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Reply immediately with this body.
    Reply(Value),
    /// Wait out the caller's deadline, then fail with a timeout.
    Timeout,
    /// Fail immediately with this error.
    Fail(TransportError),
}

impl Outcome {
    /// A `broadcast_ok` acknowledgement.
    pub fn ack() -> Self {
        Self::Reply(json!({ "type": TYPE_BROADCAST_OK }))
    }
}

/// A recorded [`Transport::call`].
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Destination node.
    pub dest: String,
    /// Body as handed to the transport.
    pub body: Value,
    /// Deadline the caller asked for.
    pub timeout: Duration,
}

impl Call {
    /// The `message` field, if this call carried a broadcast.
    pub fn message(&self) -> Option<i64> {
        if self.body.get("type").and_then(Value::as_str) != Some(TYPE_BROADCAST) {
            return None;
        }
        self.body.get("message").and_then(Value::as_i64)
    }
}

/// Scripted transport for tests.
pub struct MockTransport {
    node_id: String,
    scripts: Mutex<HashMap<String, VecDeque<Outcome>>>,
    fallbacks: Mutex<HashMap<String, Outcome>>,
    calls: Mutex<Vec<Call>>,
    sent: Mutex<Vec<(String, Value)>>,
    in_flight: Mutex<HashMap<String, (usize, usize)>>,
}

/// Counts one call as in flight for its destination until dropped.
struct InFlight<'a> {
    counts: &'a Mutex<HashMap<String, (usize, usize)>>,
    dest: String,
}

impl<'a> InFlight<'a> {
    fn enter(counts: &'a Mutex<HashMap<String, (usize, usize)>>, dest: &str) -> Self {
        let mut counts_guard = counts.lock();
        let (current, peak) = counts_guard.entry(dest.to_string()).or_default();
        *current += 1;
        *peak = (*peak).max(*current);
        drop(counts_guard);
        Self {
            counts,
            dest: dest.to_string(),
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some((current, _)) = self.counts.lock().get_mut(&self.dest) {
            *current -= 1;
        }
    }
}

impl MockTransport {
    /// Creates a mock sending as `node_id` that acknowledges every call.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            scripts: Mutex::new(HashMap::new()),
            fallbacks: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Queues `outcome` for the next unscripted call to `dest`.
    pub fn push(&self, dest: &str, outcome: Outcome) {
        self.scripts
            .lock()
            .entry(dest.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Queues `outcome` `times` times for `dest`.
    pub fn push_n(&self, dest: &str, outcome: Outcome, times: usize) {
        for _ in 0..times {
            self.push(dest, outcome.clone());
        }
    }

    /// Uses `outcome` for every call to `dest` once its queue is empty.
    pub fn always(&self, dest: &str, outcome: Outcome) {
        self.fallbacks.lock().insert(dest.to_string(), outcome);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Calls made to `dest`, in order.
    pub fn calls_to(&self, dest: &str) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.dest == dest)
            .cloned()
            .collect()
    }

    /// Most calls to `dest` that were ever outstanding at the same time.
    pub fn peak_in_flight(&self, dest: &str) -> usize {
        self.in_flight.lock().get(dest).map_or(0, |(_, peak)| *peak)
    }

    /// Fire-and-forget messages sent so far.
    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().clone()
    }

    fn next_outcome(&self, dest: &str) -> Outcome {
        if let Some(outcome) = self
            .scripts
            .lock()
            .get_mut(dest)
            .and_then(VecDeque::pop_front)
        {
            return outcome;
        }
        self.fallbacks
            .lock()
            .get(dest)
            .cloned()
            .unwrap_or_else(Outcome::ack)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn send(&self, dest: &str, body: Value) -> Result<(), TransportError> {
        self.sent.lock().push((dest.to_string(), body));
        Ok(())
    }

    async fn call(&self, dest: &str, body: Value, timeout: Duration) -> Result<Value, TransportError> {
        self.calls.lock().push(Call {
            dest: dest.to_string(),
            body,
            timeout,
        });
        let _in_flight = InFlight::enter(&self.in_flight, dest);

        match self.next_outcome(dest) {
            Outcome::Reply(reply) => Ok(reply),
            Outcome::Timeout => {
                tokio::time::sleep(timeout).await;
                Err(TransportError::Timeout(timeout))
            }
            Outcome::Fail(err) => Err(err),
        }
    }
}

/// Polls `condition` until it holds, yielding to other tasks in between.
///
/// Panics after a generous number of rounds so a broken test fails instead
/// of hanging. Intended for paused-clock tests, where each round advances
/// virtual time by a millisecond.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..100_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition never became true");
}

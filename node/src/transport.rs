//! # Stdio Transport
//!
//! [`Transport`] implementation writing one JSON envelope per line to an
//! outbound channel, which a writer task flushes to stdout.
//!
//! Request/response correlation works through a table of pending calls:
//! [`StdioTransport::call`] stamps the body with a fresh `msg_id`, parks a
//! oneshot sender under that ID and waits on the receiver. When the runtime
//! reads a line whose body carries `in_reply_to`, it hands the body to
//! [`StdioTransport::resolve`], which completes the matching call. A call
//! that times out or is abandoned removes its own entry, so late replies
//! find nothing and are dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace};

use rumor_protocol::transport::{classify_reply, Transport, TransportError};
use rumor_protocol::wire::{set_field, Envelope, Response};

/// Newline-delimited JSON transport over the process's standard streams.
pub struct StdioTransport {
    node_id: String,
    next_msg_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    outbound: mpsc::UnboundedSender<String>,
}

impl StdioTransport {
    /// Creates a transport sending as `node_id` into `outbound`.
    pub fn new(node_id: impl Into<String>, outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            node_id: node_id.into(),
            next_msg_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            outbound,
        }
    }

    /// Answers `request` with `response`, echoing its `msg_id` as
    /// `in_reply_to`.
    pub fn reply(&self, request: &Envelope, response: &Response) -> Result<(), TransportError> {
        let mut body = response.to_body();
        if let Some(msg_id) = request.msg_id() {
            if !set_field(&mut body, "in_reply_to", msg_id) {
                return Err(TransportError::Encoding("reply body is not an object".into()));
            }
        }
        self.send(&request.src, body)
    }

    /// Completes the pending call `in_reply_to` with `body`. Returns `false`
    /// when no call is waiting, e.g. because it already timed out.
    pub fn resolve(&self, in_reply_to: u64, body: Value) -> bool {
        let waiter = self.pending.lock().remove(&in_reply_to);
        match waiter {
            Some(tx) => tx.send(body).is_ok(),
            None => false,
        }
    }

    /// Number of calls waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.pending.lock().len()
    }

    fn write(&self, dest: &str, body: Value) -> Result<(), TransportError> {
        let envelope = Envelope::new(self.node_id.as_str(), dest, body);
        let line = serde_json::to_string(&envelope)
            .map_err(|e| TransportError::Encoding(e.to_string()))?;
        trace!(%line, "outbound");
        self.outbound.send(line).map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn send(&self, dest: &str, body: Value) -> Result<(), TransportError> {
        self.write(dest, body)
    }

    async fn call(&self, dest: &str, mut body: Value, timeout: Duration) -> Result<Value, TransportError> {
        let msg_id = self.next_msg_id.fetch_add(1, Ordering::Relaxed);
        if !set_field(&mut body, "msg_id", msg_id) {
            return Err(TransportError::Encoding("request body is not an object".into()));
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(msg_id, tx);
        // Removes the entry however this call ends: reply, timeout, write
        // failure, or the caller dropping the future.
        let _pending = PendingCall {
            pending: &self.pending,
            msg_id,
        };

        self.write(dest, body)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => classify_reply(dest, timeout, reply),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                debug!(dest, msg_id, ?timeout, "call timed out");
                Err(TransportError::Timeout(timeout))
            }
        }
    }
}

struct PendingCall<'a> {
    pending: &'a Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    msg_id: u64,
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.msg_id);
    }
}

/// Drains `outbound` into `output`, one line per message, flushing after
/// each so peers see replies immediately.
pub async fn write_lines<W>(mut outbound: mpsc::UnboundedReceiver<String>, mut output: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(mut line) = outbound.recv().await {
        line.push('\n');
        let written = async {
            output.write_all(line.as_bytes()).await?;
            output.flush().await
        };
        if let Err(e) = written.await {
            error!(error = %e, "stdout closed, dropping outbound messages");
            return;
        }
    }
}

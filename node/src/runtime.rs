//! # Stdio Runtime
//!
//! Drives a [`BroadcastNode`] from newline-delimited JSON on an input stream:
//!
//! 1. Wait for `init`. Anything else before the handshake is logged and
//!    dropped, since there is no identity to answer with yet.
//! 2. Build the transport and node, reply `init_ok`.
//! 3. Route every following line. Replies to our own calls go to
//!    [`StdioTransport::resolve`]; requests are handled on their own task so
//!    a slow handler never blocks the reader.
//!
//! The loop ends cleanly at end of input. A fatal gossip error ends it with
//! an error, which the binary turns into a non-zero exit.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, Split};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use rumor_protocol::wire::{Envelope, Request, Response};
use rumor_protocol::{BroadcastNode, GossipConfig, GossipMetrics, NodeIdentity};

use crate::transport::{write_lines, StdioTransport};

/// Owns the settings a node is started with.
pub struct Runtime {
    config: GossipConfig,
    metrics: GossipMetrics,
}

impl Runtime {
    pub fn new(config: GossipConfig, metrics: GossipMetrics) -> Self {
        Self { config, metrics }
    }

    /// Serves `input` until it closes, writing all traffic to `output`.
    pub async fn run<R, W>(&self, input: R, output: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.config.validate().context("invalid gossip configuration")?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_lines(outbound_rx, output));

        // Raw byte lines: a line that is not UTF-8 is bad input, not a read failure.
        let mut lines = BufReader::new(input).split(b'\n');
        let Some((init, identity)) = wait_for_init(&mut lines).await? else {
            info!("input closed before init");
            return Ok(());
        };

        let transport = Arc::new(StdioTransport::new(identity.node_id.clone(), outbound_tx));
        let (node, mut fatal) = BroadcastNode::new(
            identity,
            transport.clone(),
            self.config.clone(),
            self.metrics.clone(),
        );
        transport
            .reply(&init, &Response::InitOk)
            .map_err(|e| anyhow!("failed to send init_ok: {}", e))?;

        loop {
            tokio::select! {
                line = lines.next_segment() => {
                    match line.context("failed to read input")? {
                        Some(line) => dispatch(&node, &transport, &line),
                        None => {
                            info!(pending_calls = transport.pending_calls(), "input closed, stopping");
                            return Ok(());
                        }
                    }
                }
                Some(err) = fatal.recv() => {
                    return Err(anyhow::Error::new(err).context("gossip engine halted"));
                }
            }
        }
    }
}

/// Reads lines until an `init` request arrives. Returns `None` on end of
/// input.
async fn wait_for_init<R>(lines: &mut Split<BufReader<R>>) -> Result<Option<(Envelope, NodeIdentity)>>
where
    R: AsyncRead + Unpin,
{
    while let Some(line) = lines.next_segment().await.context("failed to read input")? {
        let envelope = match serde_json::from_slice::<Envelope>(&line) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "dropping unparseable line");
                continue;
            }
        };

        match Request::parse(&envelope.body) {
            Ok(Request::Init { node_id, node_ids }) => {
                info!(%node_id, cluster_size = node_ids.len(), "init received");
                return Ok(Some((envelope, NodeIdentity::new(node_id, node_ids))));
            }
            _ => warn!(src = %envelope.src, kind = ?envelope.kind(), "message before init dropped"),
        }
    }
    Ok(None)
}

/// Routes one inbound line.
fn dispatch(node: &Arc<BroadcastNode>, transport: &Arc<StdioTransport>, line: &[u8]) {
    let envelope = match serde_json::from_slice::<Envelope>(line) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "dropping unparseable line");
            return;
        }
    };

    if let Some(in_reply_to) = envelope.in_reply_to() {
        if !transport.resolve(in_reply_to, envelope.body) {
            debug!(src = %envelope.src, in_reply_to, "reply for no pending call");
        }
        return;
    }

    let node = Arc::clone(node);
    let transport = Arc::clone(transport);
    tokio::spawn(async move {
        let response = match node.handle(&envelope.src, &envelope.body).await {
            Ok(response) => response,
            Err(e) => {
                warn!(src = %envelope.src, kind = ?envelope.kind(), error = %e, "request failed");
                e.to_response()
            }
        };
        if let Err(e) = transport.reply(&envelope, &response) {
            warn!(dest = %envelope.src, error = %e, "failed to send reply");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::io::{AsyncWriteExt, DuplexStream, Lines, ReadHalf, WriteHalf};
    use tokio::task::JoinHandle;

    struct Harness {
        input: WriteHalf<DuplexStream>,
        output: Lines<BufReader<ReadHalf<DuplexStream>>>,
        runtime: JoinHandle<Result<()>>,
        metrics: GossipMetrics,
    }

    impl Harness {
        fn start() -> Self {
            let (client, server) = tokio::io::duplex(64 * 1024);
            let (server_read, server_write) = tokio::io::split(server);
            let (client_read, client_write) = tokio::io::split(client);

            let metrics = GossipMetrics::new();
            let runtime = Runtime::new(GossipConfig::default(), metrics.clone());
            let handle = tokio::spawn(async move { runtime.run(server_read, server_write).await });

            Self {
                input: client_write,
                output: BufReader::new(client_read).lines(),
                runtime: handle,
                metrics,
            }
        }

        async fn send(&mut self, src: &str, body: Value) {
            let line = format!("{}\n", json!({"src": src, "dest": "n0", "body": body}));
            self.input.write_all(line.as_bytes()).await.unwrap();
        }

        async fn recv(&mut self) -> Envelope {
            let line = self.output.next_line().await.unwrap().expect("output closed");
            serde_json::from_str(&line).unwrap()
        }

        async fn init(&mut self) {
            self.send(
                "c0",
                json!({"type": "init", "msg_id": 1, "node_id": "n0", "node_ids": ["n0", "n1", "n2"]}),
            )
            .await;
            let reply = self.recv().await;
            assert_eq!(reply.kind(), Some("init_ok"));
        }

        async fn close(mut self) -> Result<()> {
            self.input.shutdown().await.unwrap();
            self.runtime.await.unwrap()
        }
    }

    #[tokio::test]
    async fn init_is_answered_with_init_ok() {
        let mut h = Harness::start();
        h.send(
            "c0",
            json!({"type": "init", "msg_id": 1, "node_id": "n0", "node_ids": ["n0", "n1"]}),
        )
        .await;

        let reply = h.recv().await;
        assert_eq!(reply.src, "n0");
        assert_eq!(reply.dest, "c0");
        assert_eq!(reply.body, json!({"type": "init_ok", "in_reply_to": 1}));
        h.close().await.unwrap();
    }

    #[tokio::test]
    async fn requests_before_init_are_dropped() {
        let mut h = Harness::start();
        h.send("c1", json!({"type": "read", "msg_id": 5})).await;
        h.init().await;

        h.send("c1", json!({"type": "read", "msg_id": 6})).await;
        let reply = h.recv().await;
        assert_eq!(reply.in_reply_to(), Some(6));
        h.close().await.unwrap();
    }

    #[tokio::test]
    async fn broadcast_then_read() {
        let mut h = Harness::start();
        h.init().await;

        h.send("c1", json!({"type": "broadcast", "msg_id": 2, "message": 42})).await;
        let reply = h.recv().await;
        assert_eq!(reply.body, json!({"type": "broadcast_ok", "in_reply_to": 2}));

        h.send("c1", json!({"type": "read", "msg_id": 3})).await;
        let reply = h.recv().await;
        assert_eq!(reply.body, json!({"type": "read_ok", "in_reply_to": 3, "messages": [42]}));
        h.close().await.unwrap();
    }

    #[tokio::test]
    async fn bad_requests_get_error_replies() {
        let mut h = Harness::start();
        h.init().await;

        h.input.write_all(b"this is not json\n").await.unwrap();
        h.send("c1", json!({"type": "broadcast", "msg_id": 2})).await;
        let reply = h.recv().await;
        assert_eq!(reply.in_reply_to(), Some(2));
        assert_eq!(reply.body["type"], "error");
        assert_eq!(reply.body["code"], 12);

        h.send("c1", json!({"type": "cas", "msg_id": 3})).await;
        let reply = h.recv().await;
        assert_eq!(reply.body["code"], 10);
        h.close().await.unwrap();
    }

    #[tokio::test]
    async fn non_utf8_line_is_dropped_and_node_keeps_serving() {
        let mut h = Harness::start();
        h.init().await;

        h.input.write_all(b"\xff\xfe garbage\n").await.unwrap();
        h.send("c1", json!({"type": "read", "msg_id": 2})).await;

        let reply = h.recv().await;
        assert_eq!(reply.body, json!({"type": "read_ok", "in_reply_to": 2, "messages": []}));
        assert!(!h.runtime.is_finished());
        h.close().await.unwrap();
    }

    #[tokio::test]
    async fn peer_ack_completes_delivery() {
        let mut h = Harness::start();
        h.init().await;

        h.send("c0", json!({"type": "topology", "msg_id": 2, "topology": {"n0": ["n1"]}})).await;
        assert_eq!(h.recv().await.kind(), Some("topology_ok"));

        h.send("c1", json!({"type": "broadcast", "msg_id": 3, "message": 9})).await;

        // The client reply and the forward to n1 race; collect both.
        let mut forward = None;
        for _ in 0..2 {
            let line = h.recv().await;
            if line.dest == "n1" {
                forward = Some(line);
            } else {
                assert_eq!(line.kind(), Some("broadcast_ok"));
            }
        }
        let forward = forward.expect("broadcast forwarded to n1");
        assert_eq!(forward.body["message"], 9);
        let msg_id = forward.msg_id().expect("forward carries msg_id");

        h.send("n1", json!({"type": "broadcast_ok", "in_reply_to": msg_id})).await;
        while h.metrics.deliveries_acked_total.get() == 0 {
            tokio::task::yield_now().await;
        }
        h.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_retry_stops_the_runtime() {
        let mut h = Harness::start();
        h.init().await;
        h.send("c0", json!({"type": "topology", "msg_id": 2, "topology": {"n0": ["n1"]}})).await;
        assert_eq!(h.recv().await.kind(), Some("topology_ok"));

        h.send("c1", json!({"type": "broadcast", "msg_id": 3, "message": 9})).await;

        // First attempt goes unanswered; the retry is refused.
        let mut forwards = Vec::new();
        while forwards.len() < 2 {
            let line = h.recv().await;
            if line.dest == "n1" {
                forwards.push(line);
            }
        }
        let retry_id = forwards[1].msg_id().unwrap();
        h.send(
            "n1",
            json!({"type": "error", "in_reply_to": retry_id, "code": 13, "text": "crashed"}),
        )
        .await;

        let err = h.runtime.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("halted"));
    }

    #[tokio::test]
    async fn invalid_config_is_refused() {
        let config = GossipConfig {
            first_attempt_timeout_ms: 100,
            retry_timeout_ms: 200,
        };
        let runtime = Runtime::new(config, GossipMetrics::new());
        let (_client, server) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(server);

        assert!(runtime.run(read, write).await.is_err());
    }
}

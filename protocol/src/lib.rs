// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Rumor Protocol — Core Library
//!
//! Rumor is a gossip broadcast node for small, fixed clusters: every value
//! broadcast to any node eventually reaches every reachable node, each node
//! stores each value exactly once, and a slow or partitioned neighbor never
//! holds up anyone else.
//!
//! ## Architecture
//!
//! - **wire** — Envelope, request and response bodies, error codes.
//! - **transport** — The `Transport` trait the engine sends through, plus a
//!   scripted mock for tests.
//! - **gossip** — Deduplication store, per-neighbor ack tracking and retry
//!   queues, topology, and the fan-out coordinator.
//! - **node** — Request handlers gluing the wire to the engine.
//! - **metrics** — Prometheus counters for everything above.
//! - **config** — Timing constants and the tunable `GossipConfig`.
//!
//! ## Design Philosophy
//!
//! 1. At-least-once, never at-most-once: a timeout means "try again", not
//!    "give up".
//! 2. The request path never waits on the network. Replies go out before
//!    dissemination finishes.
//! 3. Library code reports failures; only the binary decides to exit.

pub mod config;
pub mod gossip;
pub mod metrics;
pub mod node;
pub mod transport;
pub mod wire;

pub use config::GossipConfig;
pub use gossip::{FatalErrors, GossipError};
pub use metrics::GossipMetrics;
pub use node::{BroadcastNode, HandlerError, NodeIdentity};
pub use transport::{Transport, TransportError};
pub use wire::{Envelope, ErrorCode, MessageValue, Request, Response};

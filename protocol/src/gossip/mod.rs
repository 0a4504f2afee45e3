//! # Dissemination Engine
//!
//! Everything that decides who hears about a value, and how hard we try.
//!
//! ## Architecture
//!
//! ```text
//! store.rs        — deduplication store, the source of truth for `read`
//! ack.rs          — per-neighbor record of values the neighbor already has
//! retry.rs        — per-neighbor FIFO retry queue and its single worker
//! topology.rs     — neighbor set, swapped wholesale on every `topology`
//! coordinator.rs  — first-attempt fan-out for each novel value
//! courier.rs      — one delivery attempt, classified
//! ```
//!
//! ## Design Decisions
//!
//! - The store is a sharded `DashSet`: the novelty check is a single
//!   insert, so two handlers racing on the same value can never both see it
//!   as new.
//! - Per-neighbor state (acks, retry queue) lives behind per-neighbor
//!   `parking_lot` locks. No lock spans a network call.
//! - The topology is an immutable snapshot behind one `RwLock<Arc<_>>`.
//!   Installing a topology builds the next snapshot off to the side and
//!   swaps the pointer.
//! - Retry workers never kill the process. Fatal delivery errors go to the
//!   [`FatalErrors`] channel and the runtime decides what dying means.

pub mod ack;
pub mod coordinator;
pub mod courier;
pub mod retry;
pub mod store;
pub mod topology;

mod error;

pub use ack::AckTracker;
pub use coordinator::{Disseminator, FanOutReport, FirstAttempt};
pub use courier::Delivery;
pub use error::GossipError;
pub use retry::{QueueState, RetryQueue};
pub use store::MessageStore;
pub use topology::{NeighborLink, Topology, TopologyManager};

/// Receiving end of the fatal error channel. Every error arriving here comes
/// from a retry worker that halted its queue.
pub type FatalErrors = tokio::sync::mpsc::UnboundedReceiver<GossipError>;

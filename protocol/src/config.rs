//! # Protocol Configuration & Constants
//!
//! Every timing knob and wire constant Rumor depends on lives here. The
//! defaults are tuned for a Maelstrom-style cluster: single-digit
//! millisecond links, occasional partitions, and a harness that counts
//! every message we put on the wire.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Timing Constants
// ---------------------------------------------------------------------------

/// Deadline for the first delivery attempt issued at broadcast time.
///
/// A neighbor that cannot answer within this window is handed over to its
/// retry queue. Half a second comfortably covers a healthy round trip while
/// keeping partitioned peers from stalling the fan-out task.
pub const FIRST_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(500);

/// Deadline for each attempt made by a retry worker.
///
/// Deliberately shorter than [`FIRST_ATTEMPT_TIMEOUT`]: a queued neighbor is
/// already known to be slow or unreachable, so the worker probes it more
/// often instead of waiting out long silences.
pub const RETRY_TIMEOUT: Duration = Duration::from_millis(200);

// ---------------------------------------------------------------------------
// Message Types
// ---------------------------------------------------------------------------

/// Body `type` of a broadcast request (client or peer delivery).
pub const TYPE_BROADCAST: &str = "broadcast";

/// Body `type` a peer uses to acknowledge a delivery.
pub const TYPE_BROADCAST_OK: &str = "broadcast_ok";

/// Body `type` of an error reply.
pub const TYPE_ERROR: &str = "error";

// ---------------------------------------------------------------------------
// Gossip Configuration
// ---------------------------------------------------------------------------

/// Runtime-tunable timing for the dissemination engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipConfig {
    /// First-attempt deadline in milliseconds.
    pub first_attempt_timeout_ms: u64,
    /// Per-attempt deadline used by retry workers, in milliseconds.
    pub retry_timeout_ms: u64,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            first_attempt_timeout_ms: FIRST_ATTEMPT_TIMEOUT.as_millis() as u64,
            retry_timeout_ms: RETRY_TIMEOUT.as_millis() as u64,
        }
    }
}

impl GossipConfig {
    /// First-attempt deadline as a [`Duration`].
    pub fn first_attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.first_attempt_timeout_ms)
    }

    /// Retry deadline as a [`Duration`].
    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }

    /// Checks that both deadlines are non-zero and that retries probe faster
    /// than the first attempt.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.first_attempt_timeout_ms == 0 || self.retry_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.retry_timeout_ms >= self.first_attempt_timeout_ms {
            return Err(ConfigError::RetryNotShorter {
                retry_ms: self.retry_timeout_ms,
                first_attempt_ms: self.first_attempt_timeout_ms,
            });
        }
        Ok(())
    }
}

/// Rejected [`GossipConfig`] values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A deadline of zero would time out every attempt.
    #[error("delivery timeouts must be greater than zero")]
    ZeroTimeout,
    /// The retry deadline must be strictly shorter than the first attempt.
    #[error("retry timeout ({retry_ms}ms) must be shorter than first-attempt timeout ({first_attempt_ms}ms)")]
    RetryNotShorter {
        /// Configured retry deadline.
        retry_ms: u64,
        /// Configured first-attempt deadline.
        first_attempt_ms: u64,
    },
}

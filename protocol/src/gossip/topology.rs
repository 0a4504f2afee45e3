//! # Topology Manager
//!
//! Owns the neighbor set. Each `topology` request builds a brand-new
//! [`Topology`] snapshot (fresh ack tracker and retry queue per neighbor)
//! and swaps it in behind a single write lock. Readers clone the current
//! `Arc<Topology>` and work on that snapshot, so a concurrent install never
//! hands anyone a half-built neighbor set.
//!
//! Links from an older generation are simply dropped from the snapshot.
//! Retry workers still holding an `Arc<NeighborLink>` from that generation
//! finish draining their queue and exit on their own.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use super::ack::AckTracker;
use super::error::GossipError;
use super::retry::RetryQueue;

/// Delivery state for one neighbor within one topology generation.
#[derive(Debug)]
pub struct NeighborLink {
    /// The neighbor's node ID.
    pub neighbor: String,
    /// Generation of the topology that created this link.
    pub generation: u64,
    /// Values the neighbor is known to have.
    pub acks: AckTracker,
    /// Deliveries waiting for a retry.
    pub queue: RetryQueue,
}

impl NeighborLink {
    /// Creates a link with no acks and an idle queue.
    pub fn new(neighbor: impl Into<String>, generation: u64) -> Self {
        Self {
            neighbor: neighbor.into(),
            generation,
            acks: AckTracker::new(),
            queue: RetryQueue::new(),
        }
    }
}

/// An immutable neighbor set plus its per-neighbor links.
#[derive(Debug, Default)]
pub struct Topology {
    generation: u64,
    neighbors: Vec<String>,
    links: HashMap<String, Arc<NeighborLink>>,
}

impl Topology {
    fn build(generation: u64, neighbors: Vec<String>) -> Self {
        let links = neighbors
            .iter()
            .map(|n| (n.clone(), Arc::new(NeighborLink::new(n.clone(), generation))))
            .collect();
        Self {
            generation,
            neighbors,
            links,
        }
    }

    /// Install count that produced this snapshot; 0 before any install.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Neighbors in the order the topology listed them.
    pub fn neighbors(&self) -> &[String] {
        &self.neighbors
    }

    /// The link for `neighbor`, if it is a neighbor in this snapshot.
    pub fn link(&self, neighbor: &str) -> Option<&Arc<NeighborLink>> {
        self.links.get(neighbor)
    }

    /// Whether `node` is a neighbor in this snapshot.
    pub fn contains(&self, node: &str) -> bool {
        self.links.contains_key(node)
    }
}

/// Holder of the current [`Topology`] snapshot.
#[derive(Debug, Default)]
pub struct TopologyManager {
    current: RwLock<Arc<Topology>>,
}

impl TopologyManager {
    /// Creates a manager with an empty generation-0 topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs this node's adjacency list from a full topology map.
    ///
    /// Fails without touching the current snapshot if `self_id` has no entry.
    /// Duplicate neighbor entries and self-loops are dropped.
    pub fn install(
        &self,
        topology: &HashMap<String, Vec<String>>,
        self_id: &str,
    ) -> Result<Vec<String>, GossipError> {
        let listed = topology
            .get(self_id)
            .ok_or_else(|| GossipError::MissingSelfEntry(self_id.to_string()))?;

        let mut neighbors: Vec<String> = Vec::with_capacity(listed.len());
        for peer in listed {
            if peer != self_id && !neighbors.contains(peer) {
                neighbors.push(peer.clone());
            }
        }

        let mut current = self.current.write();
        let generation = current.generation + 1;
        *current = Arc::new(Topology::build(generation, neighbors.clone()));
        drop(current);

        info!(node = self_id, generation, neighbors = ?neighbors, "topology installed");
        Ok(neighbors)
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<Topology> {
        Arc::clone(&self.current.read())
    }

    /// Current neighbor IDs.
    pub fn neighbors(&self) -> Vec<String> {
        self.snapshot().neighbors.clone()
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    /// The current link for `neighbor`.
    pub fn link(&self, neighbor: &str) -> Option<Arc<NeighborLink>> {
        self.snapshot().link(neighbor).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[test]
    fn install_extracts_own_adjacency() {
        let manager = TopologyManager::new();
        let topology = map(&[("n0", &["n1", "n2"]), ("n1", &["n0"]), ("n2", &["n0"])]);

        let neighbors = manager.install(&topology, "n0").unwrap();

        assert_eq!(neighbors, vec!["n1".to_string(), "n2".to_string()]);
        assert_eq!(manager.neighbors(), neighbors);
        assert_eq!(manager.generation(), 1);
        assert!(manager.link("n1").is_some());
        assert!(manager.link("n0").is_none());
    }

    #[test]
    fn missing_self_entry_leaves_state_untouched() {
        let manager = TopologyManager::new();
        manager.install(&map(&[("n0", &["n1"])]), "n0").unwrap();

        let err = manager
            .install(&map(&[("n1", &["n2"]), ("n2", &["n1"])]), "n0")
            .unwrap_err();

        assert_eq!(err, GossipError::MissingSelfEntry("n0".into()));
        assert_eq!(manager.neighbors(), vec!["n1".to_string()]);
        assert_eq!(manager.generation(), 1);
    }

    #[test]
    fn reinstall_replaces_links() {
        let manager = TopologyManager::new();
        let topology = map(&[("n0", &["n1"])]);

        manager.install(&topology, "n0").unwrap();
        let old = manager.link("n1").unwrap();
        old.acks.mark_acked(7);

        manager.install(&topology, "n0").unwrap();
        let new = manager.link("n1").unwrap();

        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(new.generation, 2);
        assert!(!new.acks.is_acked(7));
    }

    #[test]
    fn duplicates_and_self_loops_are_dropped() {
        let manager = TopologyManager::new();
        let neighbors = manager
            .install(&map(&[("n0", &["n1", "n0", "n1", "n2"])]), "n0")
            .unwrap();
        assert_eq!(neighbors, vec!["n1".to_string(), "n2".to_string()]);
    }

    #[test]
    fn snapshot_survives_later_install() {
        let manager = TopologyManager::new();
        manager.install(&map(&[("n0", &["n1"])]), "n0").unwrap();
        let before = manager.snapshot();

        manager.install(&map(&[("n0", &["n2", "n3"])]), "n0").unwrap();

        assert_eq!(before.neighbors(), ["n1".to_string()]);
        assert_eq!(manager.snapshot().neighbors().len(), 2);
    }
}

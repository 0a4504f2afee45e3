//! Deduplication store: every value this node has ever seen.

use dashmap::DashSet;

use crate::wire::MessageValue;

/// Append-only set of gossiped values.
///
/// Backed by a sharded [`DashSet`], so concurrent broadcast handlers only
/// contend when their values hash to the same shard. Insertion is the
/// novelty check: exactly one of several concurrent callers recording the
/// same value sees `true`.
#[derive(Debug, Default)]
pub struct MessageStore {
    seen: DashSet<MessageValue>,
}

impl MessageStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `value`; returns `true` iff it was not known before.
    pub fn record_if_novel(&self, value: MessageValue) -> bool {
        self.seen.insert(value)
    }

    /// Whether `value` has been recorded.
    pub fn contains(&self, value: MessageValue) -> bool {
        self.seen.contains(&value)
    }

    /// Every recorded value, ascending.
    pub fn snapshot(&self) -> Vec<MessageValue> {
        let mut values: Vec<MessageValue> = self.seen.iter().map(|v| *v).collect();
        values.sort_unstable();
        values
    }

    /// Number of distinct values recorded.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn duplicates_are_recorded_once() {
        let store = MessageStore::new();

        assert!(store.record_if_novel(3));
        assert!(store.record_if_novel(1));
        assert!(!store.record_if_novel(3));
        assert!(store.record_if_novel(2));
        assert!(!store.record_if_novel(1));

        assert_eq!(store.snapshot(), vec![1, 2, 3]);
        assert_eq!(store.len(), 3);
        assert!(store.contains(2));
        assert!(!store.contains(4));
    }

    #[test]
    fn concurrent_inserts_have_one_winner_per_value() {
        let store = Arc::new(MessageStore::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || (0..500).filter(|v| store.record_if_novel(*v)).count())
            })
            .collect();

        let novel: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(novel, 500);
        assert_eq!(store.len(), 500);
    }
}

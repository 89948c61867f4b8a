//! Destination → subscription-id bookkeeping.
//!
//! The table itself is plain data. The engine wraps it in a mutex and holds
//! that lock across "send the frame, then update the table" so concurrent
//! subscribe/unsubscribe calls never observe a half-applied change.

use std::collections::HashMap;

/// Active subscriptions for one session.
///
/// At most one subscription per destination. Ids come from the engine's
/// counter and are never reused within a session.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    by_destination: HashMap<String, u64>,
}

impl SubscriptionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscription id for `destination`, if subscribed.
    pub fn get(&self, destination: &str) -> Option<u64> {
        self.by_destination.get(destination).copied()
    }

    /// Returns true if `destination` has an active subscription.
    pub fn contains(&self, destination: &str) -> bool {
        self.by_destination.contains_key(destination)
    }

    /// Record a subscription. Returns false (and leaves the table alone) if
    /// the destination is already subscribed.
    pub fn insert(&mut self, destination: &str, id: u64) -> bool {
        if self.contains(destination) {
            return false;
        }
        self.by_destination.insert(destination.to_string(), id);
        true
    }

    /// Drop the subscription for `destination`, returning its id.
    pub fn remove(&mut self, destination: &str) -> Option<u64> {
        self.by_destination.remove(destination)
    }

    /// Forget every subscription.
    pub fn clear(&mut self) {
        self.by_destination.clear();
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        self.by_destination.len()
    }

    /// Returns true if nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.by_destination.is_empty()
    }

    /// `(destination, id)` pairs sorted by id.
    pub fn entries(&self) -> Vec<(String, u64)> {
        let mut entries: Vec<_> = self
            .by_destination
            .iter()
            .map(|(destination, id)| (destination.clone(), *id))
            .collect();
        entries.sort_by_key(|(_, id)| *id);
        entries
    }
}

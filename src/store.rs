//! Channel → events store.
//!
//! Shared between the receive thread, which appends MESSAGE events, and the
//! caller thread, which replaces a channel on `report` and reads channels
//! for summaries. Every operation takes the single store lock once, so a
//! reader never sees half of a replaced batch.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::event::Event;

/// Separator the broker puts in front of topic names.
pub const TOPIC_PREFIX: char = '/';

/// Thread-safe event store.
#[derive(Debug, Default)]
pub struct EventStore {
    channels: Mutex<HashMap<String, Vec<Event>>>,
}

impl EventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Event>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one event to `channel`, keeping arrival order.
    pub fn append(&self, channel: &str, event: Event) {
        self.lock().entry(channel.to_string()).or_default().push(event);
    }

    /// Replace everything stored for `channel`.
    pub fn replace(&self, channel: &str, events: Vec<Event>) {
        self.lock().insert(channel.to_string(), events);
    }

    /// Snapshot of the events stored for `channel`.
    pub fn events(&self, channel: &str) -> Option<Vec<Event>> {
        self.lock().get(channel).cloned()
    }

    /// Known channel names, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Total number of stored events across channels.
    pub(crate) fn len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    /// Resolve `channel` for a summary and return the resolved name with the
    /// events owned by `user`.
    ///
    /// Lookup order: `channel` as given, then `/channel`, then (when
    /// `channel` starts with `/`) the name with the prefix stripped. If none
    /// exists an empty entry is created under the last name tried, so an
    /// unknown channel reads as a channel with no events.
    pub fn owned_events(&self, channel: &str, user: &str) -> (String, Vec<Event>) {
        let mut channels = self.lock();

        let mut candidates = vec![channel.to_string(), format!("{TOPIC_PREFIX}{channel}")];
        if let Some(stripped) = channel.strip_prefix(TOPIC_PREFIX) {
            candidates.push(stripped.to_string());
        }

        let resolved = match candidates.iter().find(|name| channels.contains_key(*name)) {
            Some(name) => name.clone(),
            None => {
                let fallback = candidates.pop().unwrap_or_default();
                log::info!("[store] Channel {channel} not found, using empty channel {fallback}");
                channels.entry(fallback.clone()).or_default();
                fallback
            }
        };

        let owned = channels
            .get(&resolved)
            .map(|events| {
                events
                    .iter()
                    .filter(|event| event.owner() == user)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        (resolved, owned)
    }
}

//! Delayed processables: due-time computation and the registry of
//! outstanding timer callbacks.

use crate::core::{Processable, ProcessableId};
use crate::ports::CancelToken;
use crate::utils::{add_duration, Timestamp};
use dashmap::DashMap;

/// Due time of a delayed processable scheduled at `now`.
///
/// Returns `None` when the processable has no `start_in`.
#[must_use]
pub fn due_time(processable: &Processable, now: Timestamp) -> Option<Timestamp> {
    processable.start_in.map(|start_in| add_duration(now, start_in))
}

/// Outstanding timer callbacks, keyed by processable.
#[derive(Debug, Default)]
pub struct DelayRegistry {
    tokens: DashMap<ProcessableId, CancelToken>,
}

impl DelayRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the token of a scheduled callback.
    pub fn register(&self, id: ProcessableId, token: CancelToken) {
        self.tokens.insert(id, token);
    }

    /// Removes and returns the token for `id`.
    pub fn take(&self, id: ProcessableId) -> Option<CancelToken> {
        self.tokens.remove(&id).map(|(_, token)| token)
    }

    /// Returns true if a callback is outstanding for `id`.
    #[must_use]
    pub fn contains(&self, id: ProcessableId) -> bool {
        self.tokens.contains_key(&id)
    }

    /// Number of outstanding callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns true if no callback is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

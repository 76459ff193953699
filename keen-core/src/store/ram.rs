//! Volatile, bounded in-memory event store
//!
//! Events live in a map keyed by a numeric id, with one FIFO of ids per
//! collection. Everything is lost when the process exits, which makes this
//! the default for short-lived or test clients rather than production use.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::event::validate_collection;

use super::{
    AttemptMap, AttemptTracker, EventStore, PendingHandles, StoreHandle,
    DEFAULT_MAX_EVENTS_PER_COLLECTION,
};

/// Handle issued by [`RamStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemHandle(u64);

impl MemHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mem:{}", self.0)
    }
}

impl StoreHandle for MemHandle {
    fn key(&self) -> String {
        self.0.to_string()
    }
}

struct StoredEvent {
    collection: String,
    body: String,
}

#[derive(Default)]
struct RamState {
    next_id: u64,
    events: HashMap<u64, StoredEvent>,
    collections: HashMap<String, VecDeque<u64>>,
}

impl RamState {
    /// Next id not currently in use, wrapping at `u64::MAX`.
    fn allocate_id(&mut self) -> u64 {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if !self.events.contains_key(&id) {
                return id;
            }
        }
    }
}

/// In-memory [`EventStore`] holding at most `max_events` per collection.
pub struct RamStore {
    max_events: usize,
    state: Mutex<RamState>,
    attempts: Mutex<HashMap<(String, String), AttemptMap>>,
}

impl Default for RamStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RamStore {
    pub fn new() -> Self {
        Self::with_max_events(DEFAULT_MAX_EVENTS_PER_COLLECTION)
    }

    /// Create a store keeping at most `max_events` per collection (minimum 1).
    pub fn with_max_events(max_events: usize) -> Self {
        Self {
            max_events: max_events.max(1),
            state: Mutex::new(RamState::default()),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_events(&self) -> usize {
        self.max_events
    }

    /// Number of events currently held across all collections.
    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn starting_at(max_events: usize, next_id: u64) -> Self {
        let store = Self::with_max_events(max_events);
        store.state.lock().next_id = next_id;
        store
    }
}

impl EventStore for RamStore {
    type Handle = MemHandle;

    fn store(&self, collection: &str, event: &str) -> Result<MemHandle> {
        validate_collection(collection)?;

        let mut state = self.state.lock();
        let id = state.allocate_id();
        let RamState {
            events,
            collections,
            ..
        } = &mut *state;

        let queue = collections.entry(collection.to_string()).or_default();
        let mut evicted = 0usize;
        while queue.len() >= self.max_events {
            match queue.pop_front() {
                Some(old) => {
                    events.remove(&old);
                    evicted += 1;
                }
                None => break,
            }
        }
        if evicted > 0 {
            tracing::debug!(collection, evicted, "Evicted oldest in-memory events");
        }

        events.insert(
            id,
            StoredEvent {
                collection: collection.to_string(),
                body: event.to_string(),
            },
        );
        queue.push_back(id);

        Ok(MemHandle(id))
    }

    fn get(&self, handle: &MemHandle) -> Result<String> {
        self.state
            .lock()
            .events
            .get(&handle.0)
            .map(|stored| stored.body.clone())
            .ok_or_else(|| Error::EventNotFound(handle.to_string()))
    }

    fn remove(&self, handle: &MemHandle) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(stored) = state.events.remove(&handle.0) {
            if let Some(queue) = state.collections.get_mut(&stored.collection) {
                queue.retain(|id| *id != handle.0);
                if queue.is_empty() {
                    state.collections.remove(&stored.collection);
                }
            }
        }
        Ok(())
    }

    fn get_pending_handles(&self) -> Result<PendingHandles<MemHandle>> {
        let mut state = self.state.lock();
        let RamState {
            events,
            collections,
            ..
        } = &mut *state;

        let mut pending = PendingHandles::new();
        collections.retain(|collection, queue| {
            // Drop ids whose event disappeared
            queue.retain(|id| events.contains_key(id));
            if queue.is_empty() {
                return false;
            }
            pending.insert(
                collection.clone(),
                queue.iter().copied().map(MemHandle).collect(),
            );
            true
        });

        Ok(pending)
    }

    fn attempt_tracker(&self) -> Option<&dyn AttemptTracker> {
        Some(self)
    }
}

impl AttemptTracker for RamStore {
    fn get_attempts(&self, project_id: &str, collection: &str) -> Result<AttemptMap> {
        Ok(self
            .attempts
            .lock()
            .get(&(project_id.to_string(), collection.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn set_attempts(
        &self,
        project_id: &str,
        collection: &str,
        attempts: &AttemptMap,
    ) -> Result<()> {
        let key = (project_id.to_string(), collection.to_string());
        let mut maps = self.attempts.lock();
        if attempts.is_empty() {
            maps.remove(&key);
        } else {
            maps.insert(key, attempts.clone());
        }
        Ok(())
    }
}

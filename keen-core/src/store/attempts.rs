//! Per-event retry budgets
//!
//! A store that implements [`AttemptTracker`] persists, for each
//! (project, collection) pair, a map from handle key to the number of flushes
//! the event may still be part of. [`AttemptLedger`] owns the
//! read-modify-write cycle over that map.
//!
//! Budgets are bookkeeping only. When the map cannot be read or written the
//! failure is logged and the ledger carries on, which at worst costs one extra
//! delivery of an event.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::Result;

use super::{EventStore, StoreHandle};

/// Budget recorded for an event that gave up but has not been removed yet
const EXHAUSTED: i32 = -1;

/// Remaining attempts keyed by handle key
pub type AttemptMap = HashMap<String, i32>;

/// Optional store capability persisting retry budgets.
pub trait AttemptTracker: Send + Sync {
    /// Load the map for one collection. A missing map is an empty map.
    fn get_attempts(&self, project_id: &str, collection: &str) -> Result<AttemptMap>;

    /// Replace the map for one collection.
    fn set_attempts(&self, project_id: &str, collection: &str, attempts: &AttemptMap)
        -> Result<()>;
}

/// What to do with one pending event in the current flush
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptDecision<H> {
    /// Include the event; `remaining` attempts are left after this one
    Send { handle: H, remaining: i32 },
    /// Budget exhausted, drop the event without sending it
    GiveUp { handle: H },
}

/// Serialized access to attempt maps for one project.
///
/// All map updates go through one lock, separate from the flush lock, so
/// seeding from `queue` and decrementing from `flush` never lose updates.
pub struct AttemptLedger {
    project_id: String,
    max_attempts: i32,
    lock: Mutex<()>,
}

impl AttemptLedger {
    pub fn new(project_id: impl Into<String>, max_attempts: i32) -> Self {
        Self {
            project_id: project_id.into(),
            max_attempts,
            lock: Mutex::new(()),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    /// Store an event and give it a full budget, when the store tracks
    /// attempts.
    pub fn enqueue<S: EventStore>(
        &self,
        store: &S,
        collection: &str,
        body: &str,
    ) -> Result<S::Handle> {
        let handle = store.store(collection, body)?;
        if let Some(tracker) = store.attempt_tracker() {
            self.seed(tracker, collection, &handle.key());
        }
        Ok(handle)
    }

    /// Record a full budget for a freshly stored event.
    pub fn seed(&self, tracker: &dyn AttemptTracker, collection: &str, key: &str) {
        let _guard = self.lock.lock();
        let mut attempts = self.load(tracker, collection);
        attempts.insert(key.to_string(), self.max_attempts);
        self.save(tracker, collection, &attempts);
    }

    /// Charge one attempt to every handle and decide whether it is sent.
    ///
    /// The decremented budgets are persisted before this returns, i.e. before
    /// any network call, so a crash mid-flush still counts the attempt.
    /// Entries for handles that are no longer pending are pruned. Events that
    /// give up keep an exhausted entry until [`AttemptLedger::forget`] confirms
    /// their removal, so a file that survives deletion never gets a fresh
    /// budget.
    pub fn charge<H: StoreHandle>(
        &self,
        tracker: &dyn AttemptTracker,
        collection: &str,
        handles: Vec<H>,
    ) -> Vec<AttemptDecision<H>> {
        let _guard = self.lock.lock();
        let stored = self.load(tracker, collection);
        let mut updated = AttemptMap::with_capacity(handles.len());
        let mut decisions = Vec::with_capacity(handles.len());

        for handle in handles {
            let key = handle.key();
            let remaining = stored.get(&key).copied().unwrap_or(self.max_attempts) - 1;
            if remaining >= 0 {
                updated.insert(key, remaining);
                decisions.push(AttemptDecision::Send { handle, remaining });
            } else {
                tracing::debug!(collection, handle = %key, "Attempt budget exhausted");
                updated.insert(key, EXHAUSTED);
                decisions.push(AttemptDecision::GiveUp { handle });
            }
        }

        self.save(tracker, collection, &updated);
        decisions
    }

    /// Drop the budgets of events that were retired.
    pub fn forget(&self, tracker: &dyn AttemptTracker, collection: &str, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        let _guard = self.lock.lock();
        let mut attempts = self.load(tracker, collection);
        let before = attempts.len();
        for key in keys {
            attempts.remove(key);
        }
        if attempts.len() != before {
            self.save(tracker, collection, &attempts);
        }
    }

    fn load(&self, tracker: &dyn AttemptTracker, collection: &str) -> AttemptMap {
        match tracker.get_attempts(&self.project_id, collection) {
            Ok(attempts) => attempts,
            Err(e) => {
                tracing::warn!(
                    project_id = %self.project_id,
                    collection,
                    error = %e,
                    "Failed to read attempt counts, using defaults"
                );
                AttemptMap::new()
            }
        }
    }

    fn save(&self, tracker: &dyn AttemptTracker, collection: &str, attempts: &AttemptMap) {
        if let Err(e) = tracker.set_attempts(&self.project_id, collection, attempts) {
            tracing::warn!(
                project_id = %self.project_id,
                collection,
                error = %e,
                "Failed to persist attempt counts"
            );
        }
    }
}

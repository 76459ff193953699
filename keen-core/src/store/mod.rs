//! Local persistence for events awaiting delivery
//!
//! Every backend implements [`EventStore`]. A store hands out opaque handles
//! for the events it persists; the publisher uses them to fetch, retire and
//! budget individual events. Handles are typed per backend, so a handle from
//! one store can never be passed to another.
//!
//! ## Backends
//!
//! - [`RamStore`]: bounded in-memory map, lost on restart
//! - [`FileStore`]: `<root>/keen/<collection>/<timestampMillis>.<n>`, one file per event
//! - [`AnyStore`]: either of the above, chosen from configuration
//!
//! Both concrete backends also implement [`AttemptTracker`], which the
//! publisher discovers through [`EventStore::attempt_tracker`].

mod any;
mod attempts;
mod file;
mod ram;

pub use any::{AnyHandle, AnyStore};
pub use attempts::{AttemptDecision, AttemptLedger, AttemptMap, AttemptTracker};
pub use file::{FileHandle, FileStore};
pub use ram::{MemHandle, RamStore};

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::error::Result;

/// Default number of pending events kept per collection
pub const DEFAULT_MAX_EVENTS_PER_COLLECTION: usize = 10_000;

/// Default number of events forgotten when a file-backed collection is full
pub const DEFAULT_FORGET_COUNT: usize = 100;

/// Pending handles per collection, oldest first
pub type PendingHandles<H> = BTreeMap<String, Vec<H>>;

/// A store-issued reference to one persisted event.
pub trait StoreHandle: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    /// Stable key identifying the event inside its collection.
    ///
    /// Used to key attempt bookkeeping, so it must survive process restarts
    /// for persistent backends.
    fn key(&self) -> String;
}

/// Persistence contract for queued events.
pub trait EventStore: Send + Sync {
    /// Handle type issued by this backend
    type Handle: StoreHandle;

    /// Persist an already-serialized event and return its handle.
    ///
    /// May evict the oldest events of the collection to stay within bounds.
    fn store(&self, collection: &str, event: &str) -> Result<Self::Handle>;

    /// Read back the exact text passed to [`EventStore::store`].
    ///
    /// Fails with [`crate::Error::EventNotFound`] once the event is gone.
    fn get(&self, handle: &Self::Handle) -> Result<String>;

    /// Delete the event. Removing an unknown handle is a no-op.
    ///
    /// An `Err` means the event may still be there; callers treat it as
    /// bookkeeping and keep going.
    fn remove(&self, handle: &Self::Handle) -> Result<()>;

    /// All live handles grouped by collection, in insertion order.
    fn get_pending_handles(&self) -> Result<PendingHandles<Self::Handle>>;

    /// Attempt bookkeeping, if this backend supports it.
    fn attempt_tracker(&self) -> Option<&dyn AttemptTracker> {
        None
    }
}

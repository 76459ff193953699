//! Backend chosen at runtime from configuration

use std::path::Path;

use crate::config::{ClientConfig, StoreKind};
use crate::error::{Error, Result};

use super::{
    AttemptTracker, EventStore, FileHandle, FileStore, MemHandle, PendingHandles, RamStore,
    StoreHandle,
};

/// Either backend behind one type
pub enum AnyStore {
    Ram(RamStore),
    File(FileStore),
}

/// Handle issued by [`AnyStore`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AnyHandle {
    Mem(MemHandle),
    File(FileHandle),
}

impl StoreHandle for AnyHandle {
    fn key(&self) -> String {
        match self {
            AnyHandle::Mem(handle) => handle.key(),
            AnyHandle::File(handle) => handle.key(),
        }
    }
}

impl AnyStore {
    /// Build the backend named by `config.store`.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        match config.store {
            StoreKind::Ram => Ok(AnyStore::Ram(RamStore::with_max_events(
                config.max_events_per_collection,
            ))),
            StoreKind::File => Self::file(
                &config.cache_root(),
                config.max_events_per_collection,
                config.forget_count,
            ),
        }
    }

    pub fn file(root: &Path, max_events: usize, forget_count: usize) -> Result<Self> {
        Ok(AnyStore::File(FileStore::with_limits(
            root,
            max_events,
            forget_count,
        )?))
    }

    pub fn kind(&self) -> StoreKind {
        match self {
            AnyStore::Ram(_) => StoreKind::Ram,
            AnyStore::File(_) => StoreKind::File,
        }
    }
}

fn foreign(handle: &AnyHandle) -> Error {
    Error::EventNotFound(format!("{:?} was not issued by this store", handle))
}

impl EventStore for AnyStore {
    type Handle = AnyHandle;

    fn store(&self, collection: &str, event: &str) -> Result<AnyHandle> {
        match self {
            AnyStore::Ram(store) => store.store(collection, event).map(AnyHandle::Mem),
            AnyStore::File(store) => store.store(collection, event).map(AnyHandle::File),
        }
    }

    fn get(&self, handle: &AnyHandle) -> Result<String> {
        match (self, handle) {
            (AnyStore::Ram(store), AnyHandle::Mem(h)) => store.get(h),
            (AnyStore::File(store), AnyHandle::File(h)) => store.get(h),
            _ => Err(foreign(handle)),
        }
    }

    fn remove(&self, handle: &AnyHandle) -> Result<()> {
        match (self, handle) {
            (AnyStore::Ram(store), AnyHandle::Mem(h)) => store.remove(h),
            (AnyStore::File(store), AnyHandle::File(h)) => store.remove(h),
            // Nothing of ours to remove
            _ => Ok(()),
        }
    }

    fn get_pending_handles(&self) -> Result<PendingHandles<AnyHandle>> {
        Ok(match self {
            AnyStore::Ram(store) => store
                .get_pending_handles()?
                .into_iter()
                .map(|(c, hs)| (c, hs.into_iter().map(AnyHandle::Mem).collect()))
                .collect(),
            AnyStore::File(store) => store
                .get_pending_handles()?
                .into_iter()
                .map(|(c, hs)| (c, hs.into_iter().map(AnyHandle::File).collect()))
                .collect(),
        })
    }

    fn attempt_tracker(&self) -> Option<&dyn AttemptTracker> {
        match self {
            AnyStore::Ram(store) => store.attempt_tracker(),
            AnyStore::File(store) => store.attempt_tracker(),
        }
    }
}

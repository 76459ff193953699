//! Directory-per-collection event store
//!
//! ## Layout
//!
//! ```text
//! <root>/keen/
//! ├── clicks/
//! │   ├── 1718000000000.0      one serialized event per file
//! │   └── 1718000000000.1
//! ├── views/
//! │   └── 1718000000123.0
//! └── .attempts/
//!     └── <project_id>/
//!         └── clicks.json      retry budgets for "clicks"
//! ```
//!
//! File names are `<timestampMillis>.<n>`, so sorting them gives insertion
//! order. Entries starting with `.` (bookkeeping, in-flight temp files) are
//! never treated as collections or events.
//!
//! Writes go to a temp file, are synced, then renamed into place, so a reader
//! never sees a partially written event.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::event::validate_collection;

use super::{
    AttemptMap, AttemptTracker, EventStore, PendingHandles, StoreHandle, DEFAULT_FORGET_COUNT,
    DEFAULT_MAX_EVENTS_PER_COLLECTION,
};

/// Directory created under the configured root
const CACHE_DIR_NAME: &str = "keen";

/// Bookkeeping directory under the cache directory
const ATTEMPTS_DIR_NAME: &str = ".attempts";

/// Handle issued by [`FileStore`]: the event's file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileHandle {
    path: PathBuf,
}

impl FileHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StoreHandle for FileHandle {
    fn key(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }
}

/// Sort key for event files: numeric `(timestamp, n)` when the name parses,
/// otherwise the raw name after all well-formed ones.
#[derive(Debug, PartialEq, Eq)]
enum FileKey {
    Stamped(i64, u64),
    Other(String),
}

impl FileKey {
    fn parse(name: &str) -> Self {
        name.split_once('.')
            .and_then(|(millis, n)| {
                Some(FileKey::Stamped(millis.parse().ok()?, n.parse().ok()?))
            })
            .unwrap_or_else(|| FileKey::Other(name.to_string()))
    }

    fn stamp(&self) -> Option<EventName> {
        match self {
            FileKey::Stamped(millis, n) => Some((*millis, *n)),
            FileKey::Other(_) => None,
        }
    }
}

/// `(timestampMillis, n)` pair an event file is named after
type EventName = (i64, u64);

/// Pick the name for a new event: the current millisecond, or one past
/// `floor` when the clock has not moved beyond it.
///
/// Names only ever grow, so a freed name is never handed out again and file
/// order stays insertion order.
fn next_event_name(now_millis: i64, floor: Option<EventName>) -> EventName {
    match floor {
        Some((millis, n)) if now_millis <= millis => (millis, n + 1),
        _ => (now_millis, 0),
    }
}

impl Ord for FileKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (FileKey::Stamped(a, x), FileKey::Stamped(b, y)) => (a, x).cmp(&(b, y)),
            (FileKey::Stamped(..), FileKey::Other(_)) => Ordering::Less,
            (FileKey::Other(_), FileKey::Stamped(..)) => Ordering::Greater,
            (FileKey::Other(a), FileKey::Other(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for FileKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// File-backed [`EventStore`] that survives restarts.
pub struct FileStore {
    cache_dir: PathBuf,
    max_events: usize,
    forget_count: usize,
    /// Last name issued by this store. Also serializes eviction and name
    /// selection between writers.
    last_issued: Mutex<Option<EventName>>,
}

impl FileStore {
    /// Open a store under `<root>/keen`, creating it if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        Self::with_limits(
            root,
            DEFAULT_MAX_EVENTS_PER_COLLECTION,
            DEFAULT_FORGET_COUNT,
        )
    }

    /// Open a store with explicit per-collection limits.
    ///
    /// When a collection holds `max_events` files, the oldest `forget_count`
    /// (plus any overflow) are deleted before the next write.
    pub fn with_limits(
        root: impl AsRef<Path>,
        max_events: usize,
        forget_count: usize,
    ) -> Result<Self> {
        let cache_dir = root.as_ref().join(CACHE_DIR_NAME);
        fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            cache_dir,
            max_events: max_events.max(1),
            forget_count: forget_count.max(1),
            last_issued: Mutex::new(None),
        })
    }

    /// The `<root>/keen` directory
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        self.cache_dir.join(collection)
    }

    fn attempts_path(&self, project_id: &str, collection: &str) -> PathBuf {
        self.cache_dir
            .join(ATTEMPTS_DIR_NAME)
            .join(project_id)
            .join(format!("{}.json", collection))
    }

    /// Event files in a collection directory, oldest first.
    fn event_files(dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if is_hidden(name) || !entry.file_type()?.is_file() {
                continue;
            }
            files.push((FileKey::parse(name), entry.path()));
        }

        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }

    /// Delete the oldest of `files` so one more event fits.
    fn make_room(&self, collection: &str, files: &[PathBuf]) {
        if files.len() < self.max_events {
            return;
        }

        let overflow = files.len() - self.max_events;
        let to_forget = (overflow + self.forget_count).min(files.len());
        tracing::warn!(
            collection,
            pending = files.len(),
            forgetting = to_forget,
            "Collection is full, forgetting oldest events"
        );

        for path in &files[..to_forget] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to forget event");
                }
            }
        }
    }
}

fn event_path(dir: &Path, (millis, n): EventName) -> PathBuf {
    dir.join(format!("{}.{}", millis, n))
}

fn newest_name(files: &[PathBuf]) -> Option<EventName> {
    files
        .iter()
        .filter_map(|path| path.file_name()?.to_str())
        .filter_map(|name| FileKey::parse(name).stamp())
        .max()
}

/// Write `contents` to `path` through a synced temp file and a rename.
fn write_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let temp_path = dir.join(format!(".{}.tmp", name.to_string_lossy()));

    let result = (|| {
        let mut file = File::create(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

impl EventStore for FileStore {
    type Handle = FileHandle;

    fn store(&self, collection: &str, event: &str) -> Result<FileHandle> {
        validate_collection(collection)?;

        let mut last_issued = self.last_issued.lock();
        let dir = self.collection_dir(collection);
        fs::create_dir_all(&dir)?;

        // Files left by an earlier process count too, evicted ones included
        let files = Self::event_files(&dir)?;
        let floor = newest_name(&files).max(*last_issued);
        self.make_room(collection, &files);

        let mut name = next_event_name(Utc::now().timestamp_millis(), floor);
        let mut path = event_path(&dir, name);
        while path.exists() {
            name.1 += 1;
            path = event_path(&dir, name);
        }
        write_atomically(&path, event.as_bytes())?;
        *last_issued = Some(name);
        tracing::trace!(collection, path = %path.display(), "Stored event");

        Ok(FileHandle { path })
    }

    fn get(&self, handle: &FileHandle) -> Result<String> {
        match fs::read_to_string(&handle.path) {
            Ok(body) => Ok(body),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::EventNotFound(handle.path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, handle: &FileHandle) -> Result<()> {
        match fs::remove_file(&handle.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn get_pending_handles(&self) -> Result<PendingHandles<FileHandle>> {
        let mut pending = PendingHandles::new();

        let entries = match fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(pending),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(collection) = name.to_str() else {
                continue;
            };
            if is_hidden(collection) || !entry.file_type()?.is_dir() {
                continue;
            }

            let handles: Vec<FileHandle> = Self::event_files(&entry.path())?
                .into_iter()
                .map(|path| FileHandle { path })
                .collect();
            if !handles.is_empty() {
                pending.insert(collection.to_string(), handles);
            }
        }

        Ok(pending)
    }

    fn attempt_tracker(&self) -> Option<&dyn AttemptTracker> {
        Some(self)
    }
}

impl AttemptTracker for FileStore {
    fn get_attempts(&self, project_id: &str, collection: &str) -> Result<AttemptMap> {
        let path = self.attempts_path(project_id, collection);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(serde_json::from_str::<HashMap<String, i32>>(&contents)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(AttemptMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn set_attempts(
        &self,
        project_id: &str,
        collection: &str,
        attempts: &AttemptMap,
    ) -> Result<()> {
        let path = self.attempts_path(project_id, collection);

        if attempts.is_empty() {
            return match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            };
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_vec(attempts)?;
        write_atomically(&path, &contents)?;
        Ok(())
    }
}

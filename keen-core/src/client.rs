//! Caller-facing client
//!
//! [`KeenClient`] validates and enriches events, queues them through the
//! [`Publisher`], and runs flushes either inline or on the tokio runtime.
//! [`SyncKeenClient`] wraps it with blocking methods for synchronous code.
//!
//! Clients are plain values: build one at startup and share it by reference
//! or `Arc`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::event::prepare_event;
use crate::publish::{FlushReport, HttpTransport, Publisher, Transport};
use crate::store::{AnyStore, EventStore, StoreHandle};

/// Notified when a flush finishes
pub trait FlushCallback: Send + Sync {
    fn on_success(&self, report: &FlushReport);
    fn on_failure(&self, error: &Error);
}

/// Invoke a callback, containing any panic it raises.
fn notify(callback: &dyn FlushCallback, result: &Result<FlushReport>) {
    let outcome = catch_unwind(AssertUnwindSafe(|| match result {
        Ok(report) => callback.on_success(report),
        Err(e) => callback.on_failure(e),
    }));
    if outcome.is_err() {
        tracing::error!("Flush callback panicked, ignoring");
    }
}

/// Queues, sends and reconciles analytics events for one project
pub struct KeenClient<S: EventStore, T: Transport> {
    publisher: Arc<Publisher<S, T>>,
    global_properties: Map<String, Value>,
}

impl KeenClient<AnyStore, HttpTransport> {
    /// Build a client with the configured store and the HTTP transport.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        config.validate_for_publish()?;

        let project_id = config
            .project_id
            .clone()
            .ok_or_else(|| Error::Config("client.project_id is required".to_string()))?;
        let store = Arc::new(AnyStore::from_config(config)?);
        let transport = HttpTransport::new(config)?;

        tracing::debug!(
            project_id = %project_id,
            store = ?config.store,
            "Created client"
        );

        let publisher = Publisher::new(store, transport, project_id, config.max_attempts);
        Ok(Self::new(publisher).with_global_properties(config.global_properties.clone()))
    }
}

impl<S, T> KeenClient<S, T>
where
    S: EventStore + 'static,
    T: Transport + 'static,
{
    pub fn new(publisher: Publisher<S, T>) -> Self {
        Self {
            publisher: Arc::new(publisher),
            global_properties: Map::new(),
        }
    }

    /// Properties merged into every event; the event's own values win.
    pub fn with_global_properties(mut self, properties: Map<String, Value>) -> Self {
        self.global_properties = properties;
        self
    }

    pub fn publisher(&self) -> &Arc<Publisher<S, T>> {
        &self.publisher
    }

    /// Validate and store an event for a later flush.
    pub fn queue_event(&self, collection: &str, event: Map<String, Value>) -> Result<S::Handle> {
        self.queue_event_with(collection, event, None)
    }

    /// Like [`KeenClient::queue_event`], with explicit `keen` properties
    /// (e.g. a caller-supplied timestamp).
    pub fn queue_event_with(
        &self,
        collection: &str,
        event: Map<String, Value>,
        keen_properties: Option<Map<String, Value>>,
    ) -> Result<S::Handle> {
        let body = prepare_event(&self.global_properties, collection, event, keen_properties)?;
        let handle = self.publisher.enqueue(collection, &body)?;
        tracing::debug!(collection, handle = %handle.key(), "Queued event");
        Ok(handle)
    }

    /// Validate and send one event immediately, without queueing it.
    pub async fn add_event(&self, collection: &str, event: Map<String, Value>) -> Result<()> {
        let body = prepare_event(&self.global_properties, collection, event, None)?;
        self.publisher.publish_one(collection, body).await
    }

    /// Flush the queue once.
    pub async fn send_queued_events(&self) -> Result<FlushReport> {
        self.publisher.flush().await
    }

    /// Flush the queue once and report the result to `callback`.
    pub async fn send_queued_events_with(
        &self,
        callback: &dyn FlushCallback,
    ) -> Result<FlushReport> {
        let result = self.publisher.flush().await;
        notify(callback, &result);
        result
    }

    /// Start a flush on the current tokio runtime and return immediately.
    ///
    /// Must be called from within a runtime context.
    pub fn spawn_send_queued_events(
        &self,
        callback: Option<Arc<dyn FlushCallback>>,
    ) -> tokio::task::JoinHandle<Result<FlushReport>> {
        let publisher = Arc::clone(&self.publisher);
        tokio::spawn(async move {
            let result = publisher.flush().await;
            if let Err(e) = &result {
                tracing::warn!(error = %e, "Background flush failed");
            }
            if let Some(callback) = callback {
                notify(callback.as_ref(), &result);
            }
            result
        })
    }

    /// Number of events waiting in the store
    pub fn pending_count(&self) -> Result<usize> {
        self.publisher.pending_count()
    }
}

/// Blocking wrapper for [`KeenClient`]
///
/// Owns a current-thread runtime and drives each call to completion.
pub struct SyncKeenClient<S: EventStore, T: Transport> {
    inner: KeenClient<S, T>,
    runtime: tokio::runtime::Runtime,
}

impl SyncKeenClient<AnyStore, HttpTransport> {
    /// Build a blocking client from configuration
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::new(KeenClient::from_config(config)?)
    }
}

impl<S, T> SyncKeenClient<S, T>
where
    S: EventStore + 'static,
    T: Transport + 'static,
{
    pub fn new(inner: KeenClient<S, T>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Config(format!("failed to create runtime: {}", e)))?;
        Ok(Self { inner, runtime })
    }

    pub fn client(&self) -> &KeenClient<S, T> {
        &self.inner
    }

    /// Validate and store an event for a later flush
    pub fn queue_event(&self, collection: &str, event: Map<String, Value>) -> Result<S::Handle> {
        self.inner.queue_event(collection, event)
    }

    /// Validate and send one event immediately (blocking)
    pub fn add_event(&self, collection: &str, event: Map<String, Value>) -> Result<()> {
        self.runtime.block_on(self.inner.add_event(collection, event))
    }

    /// Flush the queue once (blocking)
    pub fn send_queued_events(&self) -> Result<FlushReport> {
        self.runtime.block_on(self.inner.send_queued_events())
    }

    /// Flush the queue once and notify `callback` (blocking)
    pub fn send_queued_events_with(&self, callback: &dyn FlushCallback) -> Result<FlushReport> {
        self.runtime
            .block_on(self.inner.send_queued_events_with(callback))
    }

    /// Number of events waiting in the store
    pub fn pending_count(&self) -> Result<usize> {
        self.inner.pending_count()
    }
}

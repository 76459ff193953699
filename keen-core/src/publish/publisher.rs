//! Flush orchestration
//!
//! The [`Publisher`] owns the path from the store to the network and back:
//! pending handles are charged an attempt, resolved to their bodies, sent as
//! one batch, and retired or kept according to the per-event outcomes.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::store::{AttemptDecision, AttemptLedger, EventStore, PendingHandles, StoreHandle};

use super::batch::{parse_response, Batch, BatchResponse, Resolution};
use super::transport::Transport;

/// Reachability check consulted before every flush
pub trait NetworkStatus: Send + Sync {
    fn is_connected(&self) -> bool;
}

/// Assumes the network is always reachable
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysConnected;

impl NetworkStatus for AlwaysConnected {
    fn is_connected(&self) -> bool {
        true
    }
}

impl<F> NetworkStatus for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_connected(&self) -> bool {
        self()
    }
}

/// What one flush did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushReport {
    /// Events included in the batch request
    pub sent: usize,
    /// Events the server accepted (removed)
    pub delivered: usize,
    /// Events removed as permanently invalid
    pub rejected: usize,
    /// Events dropped because their attempt budget ran out
    pub exhausted: usize,
    /// Sent events left pending for the next flush
    pub retained: usize,
}

/// Sends queued events and reconciles the results.
///
/// At most one flush runs at a time per publisher. Queueing is not blocked by
/// a running flush; an event queued meanwhile may or may not ride along.
pub struct Publisher<S: EventStore, T: Transport> {
    store: Arc<S>,
    transport: T,
    network: Box<dyn NetworkStatus>,
    ledger: AttemptLedger,
    flush_lock: tokio::sync::Mutex<()>,
}

impl<S: EventStore, T: Transport> Publisher<S, T> {
    pub fn new(
        store: Arc<S>,
        transport: T,
        project_id: impl Into<String>,
        max_attempts: i32,
    ) -> Self {
        Self {
            store,
            transport,
            network: Box::new(AlwaysConnected),
            ledger: AttemptLedger::new(project_id, max_attempts),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Replace the reachability check.
    pub fn with_network_status(mut self, network: impl NetworkStatus + 'static) -> Self {
        self.network = Box::new(network);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn project_id(&self) -> &str {
        self.ledger.project_id()
    }

    /// Persist a serialized event and give it a full attempt budget.
    pub fn enqueue(&self, collection: &str, body: &str) -> Result<S::Handle> {
        self.ledger.enqueue(self.store.as_ref(), collection, body)
    }

    /// Number of events waiting in the store
    pub fn pending_count(&self) -> Result<usize> {
        Ok(self
            .store
            .get_pending_handles()?
            .values()
            .map(Vec::len)
            .sum())
    }

    /// Send one event straight to its collection, bypassing the store.
    pub async fn publish_one(&self, collection: &str, body: String) -> Result<()> {
        if !self.network.is_connected() {
            return Err(Error::NetworkUnavailable);
        }
        self.transport
            .post_event(self.project_id(), collection, body)
            .await?;
        Ok(())
    }

    /// Run one flush cycle.
    ///
    /// Per-event failures are handled here and never returned. An `Err` means
    /// the flush as a whole failed (no network, transport failure, bad
    /// response) and no event was retired by reconciliation.
    pub async fn flush(&self) -> Result<FlushReport> {
        let _flush = self.flush_lock.lock().await;

        if !self.network.is_connected() {
            tracing::info!("Network not connected, skipping flush");
            return Err(Error::NetworkUnavailable);
        }

        let pending = self.store.get_pending_handles()?;
        let mut report = FlushReport::default();
        if pending.is_empty() {
            return Ok(report);
        }

        let batch = self.prepare(pending, &mut report);
        if batch.is_empty() {
            return Ok(report);
        }

        let body = batch.to_request_body()?;
        report.sent = batch.len();

        let response = match self.transport.post_batch(self.project_id(), body).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    project_id = %self.project_id(),
                    events = report.sent,
                    error = %e,
                    "Failed to publish event batch"
                );
                return Err(e);
            }
        };

        let outcomes = match parse_response(&response) {
            Ok(outcomes) => outcomes,
            Err(e) => {
                tracing::warn!(error = %e, "Leaving batch pending");
                return Err(e);
            }
        };

        self.reconcile(&batch, outcomes, &mut report);

        tracing::info!(
            project_id = %self.project_id(),
            sent = report.sent,
            delivered = report.delivered,
            rejected = report.rejected,
            exhausted = report.exhausted,
            retained = report.retained,
            "Flushed queued events"
        );
        Ok(report)
    }

    /// Charge attempts and load bodies for everything still eligible.
    fn prepare(
        &self,
        pending: PendingHandles<S::Handle>,
        report: &mut FlushReport,
    ) -> Batch<S::Handle> {
        let tracker = self.store.attempt_tracker();
        let mut batch = Batch::new();

        for (collection, handles) in pending {
            // Budgets to drop once their events are confirmed gone
            let mut retired = Vec::new();
            let eligible = match tracker {
                Some(tracker) => {
                    let mut eligible = Vec::with_capacity(handles.len());
                    for decision in self.ledger.charge(tracker, &collection, handles) {
                        match decision {
                            AttemptDecision::Send { handle, .. } => eligible.push(handle),
                            AttemptDecision::GiveUp { handle } => {
                                tracing::info!(
                                    collection = %collection,
                                    handle = %handle.key(),
                                    "Dropping event after exhausting its attempts"
                                );
                                if self.retire(&handle) {
                                    retired.push(handle.key());
                                }
                                report.exhausted += 1;
                            }
                        }
                    }
                    eligible
                }
                None => handles,
            };

            for handle in eligible {
                let body = match self.store.get(&handle) {
                    Ok(body) => body,
                    Err(Error::EventNotFound(_)) => {
                        tracing::debug!(
                            collection = %collection,
                            handle = %handle.key(),
                            "Event vanished before flush"
                        );
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(
                            collection = %collection,
                            handle = %handle.key(),
                            error = %e,
                            "Failed to read queued event, will retry next flush"
                        );
                        continue;
                    }
                };

                if let Err(e) = batch.push(&collection, handle.clone(), body) {
                    tracing::warn!(
                        collection = %collection,
                        handle = %handle.key(),
                        error = %e,
                        "Dropping queued event that is not valid JSON"
                    );
                    if self.retire(&handle) {
                        retired.push(handle.key());
                    }
                    report.rejected += 1;
                }
            }

            if let Some(tracker) = tracker {
                self.ledger.forget(tracker, &collection, &retired);
            }
        }

        batch
    }

    /// Match outcomes to the handles sent and retire the resolved ones.
    fn reconcile(
        &self,
        batch: &Batch<S::Handle>,
        response: BatchResponse,
        report: &mut FlushReport,
    ) {
        let tracker = self.store.attempt_tracker();
        let mut resolved = 0usize;

        for (collection, outcomes) in response {
            let Some(handles) = batch.handles(&collection) else {
                tracing::warn!(
                    collection = %collection,
                    "Response names a collection that was not sent"
                );
                continue;
            };
            if outcomes.len() != handles.len() {
                tracing::warn!(
                    collection = %collection,
                    sent = handles.len(),
                    outcomes = outcomes.len(),
                    "Outcome count does not match events sent, leaving collection pending"
                );
                continue;
            }

            let mut retired = Vec::new();
            for (handle, outcome) in handles.into_iter().zip(&outcomes) {
                match outcome.resolution() {
                    Resolution::Delivered => {
                        report.delivered += 1;
                    }
                    Resolution::Rejected => {
                        tracing::warn!(
                            collection = %collection,
                            handle = %handle.key(),
                            error = ?outcome.error,
                            "Event permanently rejected, dropping it"
                        );
                        report.rejected += 1;
                    }
                    Resolution::Retry => {
                        tracing::debug!(
                            collection = %collection,
                            handle = %handle.key(),
                            error = ?outcome.error,
                            "Event failed, keeping it for retry"
                        );
                        continue;
                    }
                }
                resolved += 1;
                if self.retire(handle) {
                    retired.push(handle.key());
                }
            }

            if let Some(tracker) = tracker {
                self.ledger.forget(tracker, &collection, &retired);
            }
        }

        report.retained = report.sent.saturating_sub(resolved);
    }

    /// Remove an event, logging instead of failing. Returns whether it is gone.
    fn retire(&self, handle: &S::Handle) -> bool {
        match self.store.remove(handle) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    handle = %handle.key(),
                    error = %e,
                    "Failed to remove event, it may be sent again"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AttemptMap, AttemptTracker, MemHandle, RamStore};
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    type Responder = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

    /// Records requests and answers them with a scripted responder
    struct FakeTransport {
        requests: Mutex<Vec<String>>,
        responder: Responder,
        delay: Duration,
    }

    impl FakeTransport {
        fn new(responder: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                responder: Box::new(responder),
                delay: Duration::ZERO,
            }
        }

        /// Answer every event of every collection with the same outcome
        fn uniform(outcome: &'static str) -> Self {
            Self::new(move |request| Ok(answer_all(request, outcome)))
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().clone()
        }
    }

    impl Transport for FakeTransport {
        async fn post_batch(&self, _project_id: &str, body: String) -> Result<String> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let response = (self.responder)(&body);
            self.requests.lock().push(body);
            response
        }

        async fn post_event(
            &self,
            _project_id: &str,
            _collection: &str,
            body: String,
        ) -> Result<String> {
            self.requests.lock().push(body);
            Ok(r#"{"created":true}"#.to_string())
        }
    }

    fn answer_all(request: &str, outcome: &str) -> String {
        let request: BTreeMap<String, Vec<serde_json::Value>> =
            serde_json::from_str(request).unwrap();
        let outcome: serde_json::Value = serde_json::from_str(outcome).unwrap();
        let response: BTreeMap<_, _> = request
            .into_iter()
            .map(|(collection, events)| (collection, vec![outcome.clone(); events.len()]))
            .collect();
        serde_json::to_string(&response).unwrap()
    }

    const SUCCESS: &str = r#"{"success":true}"#;
    const TRANSIENT: &str = r#"{"success":false,"error":{"name":"ServiceUnavailable"}}"#;

    /// Store without attempt tracking that counts enumerations
    #[derive(Default)]
    struct PlainStore {
        inner: RamStore,
        enumerations: AtomicUsize,
    }

    impl EventStore for PlainStore {
        type Handle = MemHandle;

        fn store(&self, collection: &str, event: &str) -> Result<MemHandle> {
            self.inner.store(collection, event)
        }

        fn get(&self, handle: &MemHandle) -> Result<String> {
            self.inner.get(handle)
        }

        fn remove(&self, handle: &MemHandle) -> Result<()> {
            self.inner.remove(handle)
        }

        fn get_pending_handles(&self) -> Result<PendingHandles<MemHandle>> {
            self.enumerations.fetch_add(1, Ordering::SeqCst);
            self.inner.get_pending_handles()
        }
    }

    /// Attempt bookkeeping that fails on every call
    struct FailingTracker;

    impl AttemptTracker for FailingTracker {
        fn get_attempts(&self, _: &str, _: &str) -> Result<AttemptMap> {
            Err(Error::Io(std::io::Error::other("attempts unreadable")))
        }

        fn set_attempts(&self, _: &str, _: &str, _: &AttemptMap) -> Result<()> {
            Err(Error::Io(std::io::Error::other("attempts unwritable")))
        }
    }

    /// Store whose attempt bookkeeping is broken
    #[derive(Default)]
    struct BrokenBookkeepingStore {
        inner: RamStore,
    }

    impl EventStore for BrokenBookkeepingStore {
        type Handle = MemHandle;

        fn store(&self, collection: &str, event: &str) -> Result<MemHandle> {
            self.inner.store(collection, event)
        }

        fn get(&self, handle: &MemHandle) -> Result<String> {
            self.inner.get(handle)
        }

        fn remove(&self, handle: &MemHandle) -> Result<()> {
            self.inner.remove(handle)
        }

        fn get_pending_handles(&self) -> Result<PendingHandles<MemHandle>> {
            self.inner.get_pending_handles()
        }

        fn attempt_tracker(&self) -> Option<&dyn AttemptTracker> {
            Some(&FailingTracker)
        }
    }

    /// Store whose removals always fail, as with an undeletable file
    #[derive(Default)]
    struct StickyStore {
        inner: RamStore,
    }

    impl EventStore for StickyStore {
        type Handle = MemHandle;

        fn store(&self, collection: &str, event: &str) -> Result<MemHandle> {
            self.inner.store(collection, event)
        }

        fn get(&self, handle: &MemHandle) -> Result<String> {
            self.inner.get(handle)
        }

        fn remove(&self, _handle: &MemHandle) -> Result<()> {
            Err(Error::Io(std::io::Error::other("permission denied")))
        }

        fn get_pending_handles(&self) -> Result<PendingHandles<MemHandle>> {
            self.inner.get_pending_handles()
        }

        fn attempt_tracker(&self) -> Option<&dyn AttemptTracker> {
            Some(&self.inner)
        }
    }

    fn publisher<T: Transport>(transport: T) -> Publisher<RamStore, T> {
        Publisher::new(Arc::new(RamStore::new()), transport, "p1", 3)
    }

    #[tokio::test]
    async fn test_mixed_outcomes_reconciled_by_position() {
        let transport = FakeTransport::new(|_| {
            Ok(r#"{"clicks":[
                {"success":true},
                {"success":false,"error":{"name":"InvalidPropertyNameError"}},
                {"success":false,"error":{"name":"SomeTransientError"}}
            ]}"#
            .to_string())
        });
        let publisher = publisher(transport);
        let handles: Vec<_> = (0..3)
            .map(|i| publisher.enqueue("clicks", &format!(r#"{{"i":{}}}"#, i)).unwrap())
            .collect();

        let report = publisher.flush().await.unwrap();

        assert_eq!(
            report,
            FlushReport {
                sent: 3,
                delivered: 1,
                rejected: 1,
                exhausted: 0,
                retained: 1,
            }
        );
        let pending = publisher.store().get_pending_handles().unwrap();
        assert_eq!(pending["clicks"], vec![handles[2]]);
        assert_eq!(
            publisher.transport.requests(),
            vec![r#"{"clicks":[{"i":0},{"i":1},{"i":2}]}"#.to_string()]
        );
    }

    #[tokio::test]
    async fn test_unreachable_network_leaves_store_untouched() {
        let store = Arc::new(PlainStore::default());
        let publisher = Publisher::new(store.clone(), FakeTransport::uniform(SUCCESS), "p1", 3)
            .with_network_status(|| false);
        publisher.enqueue("clicks", r#"{"a":1}"#).unwrap();

        let err = publisher.flush().await.unwrap_err();

        assert!(matches!(err, Error::NetworkUnavailable));
        assert_eq!(err.to_string(), "network not connected");
        assert_eq!(store.enumerations.load(Ordering::SeqCst), 0);
        assert!(publisher.transport.requests().is_empty());
        assert_eq!(store.inner.len(), 1);
    }

    #[tokio::test]
    async fn test_network_status_is_checked_each_flush() {
        let online = Arc::new(AtomicBool::new(false));
        let flag = online.clone();
        let publisher = publisher(FakeTransport::uniform(SUCCESS))
            .with_network_status(move || flag.load(Ordering::SeqCst));
        publisher.enqueue("clicks", r#"{"a":1}"#).unwrap();

        assert!(publisher.flush().await.is_err());
        online.store(true, Ordering::SeqCst);
        assert_eq!(publisher.flush().await.unwrap().delivered, 1);
        assert_eq!(publisher.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retry_exhaustion() {
        let publisher = publisher(FakeTransport::uniform(TRANSIENT));
        publisher.enqueue("clicks", r#"{"a":1}"#).unwrap();

        let mut attempts = 0;
        for cycle in 1..=4 {
            let report = publisher.flush().await.unwrap();
            attempts += report.sent;
            if cycle < 4 {
                assert_eq!(report.retained, 1, "cycle {cycle}");
            } else {
                assert_eq!(report.exhausted, 1);
                assert_eq!(report.sent, 0);
            }
        }

        assert!(attempts <= 4);
        assert_eq!(attempts, 3);
        assert_eq!(publisher.pending_count().unwrap(), 0);
        assert_eq!(publisher.transport.requests().len(), 3);
        let tracker = publisher.store().attempt_tracker().unwrap();
        assert!(tracker.get_attempts("p1", "clicks").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delivered_events_are_never_resent() {
        let publisher = publisher(FakeTransport::uniform(SUCCESS));
        publisher.enqueue("clicks", r#"{"a":1}"#).unwrap();
        publisher.enqueue("views", r#"{"b":2}"#).unwrap();

        let report = publisher.flush().await.unwrap();
        assert_eq!(report.delivered, 2);

        let report = publisher.flush().await.unwrap();
        assert_eq!(report, FlushReport::default());
        assert_eq!(publisher.transport.requests().len(), 1);

        let tracker = publisher.store().attempt_tracker().unwrap();
        assert!(tracker.get_attempts("p1", "clicks").unwrap().is_empty());
        assert!(tracker.get_attempts("p1", "views").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_removes_nothing() {
        let publisher = publisher(FakeTransport::new(|_| {
            Err(Error::Transport("connection reset".to_string()))
        }));
        let handle = publisher.enqueue("clicks", r#"{"a":1}"#).unwrap();

        assert!(matches!(publisher.flush().await, Err(Error::Transport(_))));

        assert_eq!(publisher.store().get(&handle).unwrap(), r#"{"a":1}"#);
        // The attempt was still charged before the request went out
        let tracker = publisher.store().attempt_tracker().unwrap();
        assert_eq!(tracker.get_attempts("p1", "clicks").unwrap()[&handle.key()], 2);
    }

    #[tokio::test]
    async fn test_malformed_response_removes_nothing() {
        let publisher = publisher(FakeTransport::new(|_| Ok("<html>oops</html>".to_string())));
        publisher.enqueue("clicks", r#"{"a":1}"#).unwrap();

        assert!(matches!(publisher.flush().await, Err(Error::Response(_))));
        assert_eq!(publisher.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_misaligned_collection_left_pending() {
        let publisher = publisher(FakeTransport::new(|_| {
            Ok(concat!(
                r#"{"clicks":[{"success":true}],"#,
                r#""views":[{"success":true}],"#,
                r#""ghost":[{"success":true}]}"#
            )
            .to_string())
        }));
        publisher.enqueue("clicks", r#"{"a":1}"#).unwrap();
        publisher.enqueue("clicks", r#"{"a":2}"#).unwrap();
        publisher.enqueue("views", r#"{"b":1}"#).unwrap();

        let report = publisher.flush().await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.retained, 2);
        let pending = publisher.store().get_pending_handles().unwrap();
        assert_eq!(pending["clicks"].len(), 2);
        assert!(!pending.contains_key("views"));
    }

    #[tokio::test]
    async fn test_store_without_tracker_never_gives_up() {
        let store = Arc::new(PlainStore::default());
        let publisher = Publisher::new(store.clone(), FakeTransport::uniform(TRANSIENT), "p1", 1);
        publisher.enqueue("clicks", r#"{"a":1}"#).unwrap();

        for _ in 0..5 {
            let report = publisher.flush().await.unwrap();
            assert_eq!(report.sent, 1);
            assert_eq!(report.exhausted, 0);
        }
        assert_eq!(store.inner.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_event_is_dropped_before_sending() {
        let publisher = publisher(FakeTransport::uniform(SUCCESS));
        publisher.enqueue("clicks", "{truncated").unwrap();
        publisher.enqueue("clicks", r#"{"ok":true}"#).unwrap();

        let report = publisher.flush().await.unwrap();

        assert_eq!(report.rejected, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(publisher.pending_count().unwrap(), 0);
        assert_eq!(
            publisher.transport.requests(),
            vec![r#"{"clicks":[{"ok":true}]}"#.to_string()]
        );
    }

    #[tokio::test]
    async fn test_empty_store_makes_no_request() {
        let publisher = publisher(FakeTransport::uniform(SUCCESS));
        assert_eq!(publisher.flush().await.unwrap(), FlushReport::default());
        assert!(publisher.transport.requests().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_flushes_are_serialized() {
        let mut transport = FakeTransport::uniform(SUCCESS);
        transport.delay = Duration::from_millis(50);
        let publisher = Arc::new(publisher(transport));
        for i in 0..10 {
            publisher
                .enqueue("clicks", &format!(r#"{{"i":{}}}"#, i))
                .unwrap();
        }

        let first = tokio::spawn({
            let publisher = publisher.clone();
            async move { publisher.flush().await }
        });
        let second = tokio::spawn({
            let publisher = publisher.clone();
            async move { publisher.flush().await }
        });
        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        assert_eq!(first.delivered + second.delivered, 10);
        assert_eq!(publisher.transport.requests().len(), 1);
        assert_eq!(publisher.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_broken_bookkeeping_does_not_resend_delivered_events() {
        let store = Arc::new(BrokenBookkeepingStore::default());
        let publisher = Publisher::new(store.clone(), FakeTransport::uniform(SUCCESS), "p1", 3);
        publisher.enqueue("clicks", r#"{"a":1}"#).unwrap();
        publisher.enqueue("clicks", r#"{"a":2}"#).unwrap();

        let report = publisher.flush().await.unwrap();
        assert_eq!(report.sent, 2);
        assert_eq!(report.delivered, 2);

        let report = publisher.flush().await.unwrap();
        assert_eq!(report, FlushReport::default());
        assert_eq!(publisher.transport.requests().len(), 1);
        assert!(store.inner.is_empty());
    }

    #[tokio::test]
    async fn test_broken_bookkeeping_still_retries() {
        let store = Arc::new(BrokenBookkeepingStore::default());
        let publisher = Publisher::new(store.clone(), FakeTransport::uniform(TRANSIENT), "p1", 3);
        publisher.enqueue("clicks", r#"{"a":1}"#).unwrap();

        let report = publisher.flush().await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(report.retained, 1);
        assert_eq!(store.inner.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_event_stays_exhausted_when_removal_fails() {
        let store = Arc::new(StickyStore::default());
        let publisher = Publisher::new(store.clone(), FakeTransport::uniform(TRANSIENT), "p1", 1);
        let handle = publisher.enqueue("clicks", r#"{"a":1}"#).unwrap();

        assert_eq!(publisher.flush().await.unwrap().sent, 1);
        for _ in 0..3 {
            let report = publisher.flush().await.unwrap();
            assert_eq!(report.sent, 0);
            assert_eq!(report.exhausted, 1);
        }

        assert_eq!(publisher.transport.requests().len(), 1);
        let attempts = store.inner.get_attempts("p1", "clicks").unwrap();
        assert!(attempts[&handle.key()] < 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_enqueue_during_flush_is_not_blocked_or_lost() {
        let mut transport = FakeTransport::uniform(SUCCESS);
        transport.delay = Duration::from_millis(200);
        let publisher = Arc::new(publisher(transport));
        publisher.enqueue("clicks", r#"{"i":0}"#).unwrap();

        let flush = tokio::spawn({
            let publisher = publisher.clone();
            async move { publisher.flush().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        publisher.enqueue("clicks", r#"{"i":1}"#).unwrap();
        assert!(!flush.is_finished());

        let first = flush.await.unwrap().unwrap();
        let second = publisher.flush().await.unwrap();

        assert_eq!(first.delivered + second.delivered, 2);
        assert_eq!(publisher.pending_count().unwrap(), 0);

        let sent: Vec<serde_json::Value> = publisher
            .transport
            .requests()
            .iter()
            .flat_map(|request| {
                let request: BTreeMap<String, Vec<serde_json::Value>> =
                    serde_json::from_str(request).unwrap();
                request.into_values().flatten()
            })
            .collect();
        assert_eq!(sent.len(), 2);
        assert!(sent.contains(&serde_json::json!({"i": 0})));
        assert!(sent.contains(&serde_json::json!({"i": 1})));
    }

    #[tokio::test]
    async fn test_publish_one_bypasses_store() {
        let publisher = publisher(FakeTransport::uniform(SUCCESS));
        publisher
            .publish_one("clicks", r#"{"a":1}"#.to_string())
            .await
            .unwrap();

        assert_eq!(publisher.pending_count().unwrap(), 0);
        assert_eq!(publisher.transport.requests(), vec![r#"{"a":1}"#.to_string()]);
    }

    #[test]
    fn test_enqueue_seeds_full_budget() {
        let publisher = publisher(FakeTransport::uniform(SUCCESS));
        let handle = publisher.enqueue("clicks", r#"{"a":1}"#).unwrap();

        let tracker: &dyn AttemptTracker = publisher.store().attempt_tracker().unwrap();
        assert_eq!(tracker.get_attempts("p1", "clicks").unwrap()[&handle.key()], 3);
    }
}

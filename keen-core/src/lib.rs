//! # keen-core
//!
//! Offline analytics event queue.
//!
//! This library provides:
//! - Bounded local storage for pending events (in-memory or one file per event)
//! - Batched publishing with per-event reconciliation
//! - Attempt-limited retry with budgets persisted before each send
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Lifecycle of an event
//!
//! - **Queued:** validated, enriched and written to the store
//! - **Pending:** included in every flush until resolved
//! - **Retired:** removed once delivered, rejected as permanently invalid,
//!   or out of attempts
//!
//! ## Example
//!
//! ```rust,no_run
//! use keen_core::{Config, SyncKeenClient};
//! use serde_json::json;
//!
//! let config = Config::load().expect("failed to load config");
//! let client = SyncKeenClient::from_config(&config.client).expect("failed to build client");
//!
//! let event = json!({"button": "buy"}).as_object().cloned().unwrap();
//! client.queue_event("clicks", event).expect("failed to queue event");
//!
//! let report = client.send_queued_events().expect("flush failed");
//! println!("delivered {} event(s)", report.delivered);
//! ```

// Re-export commonly used items at the crate root
pub use client::{FlushCallback, KeenClient, SyncKeenClient};
pub use config::Config;
pub use error::{Error, Result};
pub use publish::{FlushReport, NetworkStatus, Publisher};
pub use store::{AnyStore, EventStore, FileStore, RamStore};

// Public modules
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod publish;
pub mod store;

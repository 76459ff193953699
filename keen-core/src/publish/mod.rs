//! Publishing queued events to the ingestion API
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐ pending  ┌───────────┐  batch   ┌───────────┐
//! │ EventStore │ ───────► │ Publisher │ ───────► │ Transport │
//! │            │ ◄─────── │           │ ◄─────── │  (HTTP)   │
//! └────────────┘  remove  └───────────┘ outcomes └───────────┘
//! ```
//!
//! Delivery is at-least-once: an event is only removed after the server
//! accepted it, rejected it as permanently invalid, or its attempt budget ran
//! out. Anything else stays in the store for the next flush.

mod batch;
mod publisher;
mod transport;

pub use batch::{
    parse_response, Batch, BatchResponse, EventOutcome, OutcomeError, Resolution, PERMANENT_ERRORS,
};
pub use publisher::{AlwaysConnected, FlushReport, NetworkStatus, Publisher};
pub use transport::{HttpTransport, Transport};

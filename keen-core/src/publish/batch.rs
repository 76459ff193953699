//! Batch request and response bodies
//!
//! ## Request
//!
//! ```json
//! { "clicks": [ {...}, {...} ], "views": [ {...} ] }
//! ```
//!
//! Event bodies are embedded exactly as stored.
//!
//! ## Response
//!
//! ```json
//! { "clicks": [ { "success": true },
//!               { "success": false, "error": { "name": "...", "description": "..." } } ] }
//! ```
//!
//! Outcome *i* of a collection belongs to event *i* of that collection in the
//! request.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::value::RawValue;

use crate::error::{Error, Result};

/// Error names that will never succeed on retry
pub const PERMANENT_ERRORS: [&str; 3] = [
    "InvalidCollectionNameError",
    "InvalidPropertyNameError",
    "InvalidPropertyValueError",
];

/// Events of one flush, grouped by collection, paired with their handles
#[derive(Debug)]
pub struct Batch<H> {
    collections: BTreeMap<String, Vec<(H, Box<RawValue>)>>,
}

impl<H> Default for Batch<H> {
    fn default() -> Self {
        Self {
            collections: BTreeMap::new(),
        }
    }
}

impl<H> Batch<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stored event body.
    ///
    /// Fails if the body is not valid JSON; such an event can never be sent.
    pub fn push(&mut self, collection: &str, handle: H, body: String) -> Result<()> {
        let raw = RawValue::from_string(body)?;
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push((handle, raw));
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Number of events across all collections
    pub fn len(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    /// Handles of one collection in request order
    pub fn handles(&self, collection: &str) -> Option<Vec<&H>> {
        self.collections
            .get(collection)
            .map(|events| events.iter().map(|(handle, _)| handle).collect())
    }

    /// Serialize the request body.
    pub fn to_request_body(&self) -> Result<String> {
        let body: BTreeMap<&str, Vec<&RawValue>> = self
            .collections
            .iter()
            .map(|(collection, events)| {
                (
                    collection.as_str(),
                    events.iter().map(|(_, raw)| &**raw).collect(),
                )
            })
            .collect();
        Ok(serde_json::to_string(&body)?)
    }
}

/// Error reported for one event
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutcomeError {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Server verdict for one event
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventOutcome {
    pub success: bool,
    #[serde(default)]
    pub error: Option<OutcomeError>,
}

/// What reconciliation does with one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Accepted, remove it
    Delivered,
    /// Permanently invalid, remove it
    Rejected,
    /// Keep it for the next flush
    Retry,
}

impl EventOutcome {
    pub fn resolution(&self) -> Resolution {
        if self.success {
            return Resolution::Delivered;
        }
        match &self.error {
            Some(error) if PERMANENT_ERRORS.contains(&error.name.as_str()) => Resolution::Rejected,
            _ => Resolution::Retry,
        }
    }
}

/// Per-collection outcomes, positionally aligned with the request
pub type BatchResponse = BTreeMap<String, Vec<EventOutcome>>;

/// Parse a batch response body.
pub fn parse_response(body: &str) -> Result<BatchResponse> {
    serde_json::from_str(body)
        .map_err(|e| Error::Response(format!("failed to parse batch response: {}", e)))
}

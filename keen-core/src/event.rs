//! Event validation and enrichment
//!
//! Events are checked here before they reach a store or the network. Anything
//! rejected here is never persisted and never retried.
//!
//! Accepted events are merged with the configured global properties and
//! stamped with a `keen.timestamp`, then serialized to the text the stores
//! keep byte-for-byte.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Longest property name accepted, in characters
pub const MAX_NAME_LENGTH: usize = 256;

/// Longest collection name accepted, in bytes.
///
/// Collections become directory names and `<name>.json` attempt files, and
/// the attempt file is written through `.<name>.json.tmp`, which has to fit
/// the common 255-byte file name limit.
pub const MAX_COLLECTION_NAME_BYTES: usize = 245;

/// Deepest object nesting accepted
pub const MAX_EVENT_DEPTH: usize = 1000;

/// Longest string property value accepted, in characters
pub const MAX_STRING_VALUE_LENGTH: usize = 10_000;

/// Reserved root-level property holding client-managed metadata
pub const KEEN_PROPERTY: &str = "keen";

/// Check that a collection name is acceptable to the API and safe to use as a
/// directory name.
pub fn validate_collection(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_collection(name, "must not be empty"));
    }
    if name.len() > MAX_COLLECTION_NAME_BYTES {
        return Err(Error::invalid_collection(
            name,
            format!("must not be longer than {} bytes", MAX_COLLECTION_NAME_BYTES),
        ));
    }
    if name.starts_with('$') || name.starts_with('.') {
        return Err(Error::invalid_collection(
            name,
            "must not start with '$' or '.'",
        ));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(Error::invalid_collection(
            name,
            "must not contain path separators or NUL",
        ));
    }
    Ok(())
}

/// Check an event's shape and property names.
pub fn validate_event(event: &Map<String, Value>) -> Result<()> {
    if event.is_empty() {
        return Err(Error::InvalidEvent(
            "an event must be a non-empty object".to_string(),
        ));
    }
    if event.contains_key(KEEN_PROPERTY) {
        return Err(Error::InvalidEvent(format!(
            "an event cannot contain a root-level property named '{}'",
            KEEN_PROPERTY
        )));
    }
    validate_object(event, 1)
}

fn validate_object(object: &Map<String, Value>, depth: usize) -> Result<()> {
    if depth > MAX_EVENT_DEPTH {
        return Err(Error::InvalidEvent(format!(
            "an event's nesting depth cannot exceed {}",
            MAX_EVENT_DEPTH
        )));
    }
    for (name, value) in object {
        validate_property_name(name)?;
        validate_value(value, depth)?;
    }
    Ok(())
}

fn validate_value(value: &Value, depth: usize) -> Result<()> {
    match value {
        Value::String(s) if s.chars().count() >= MAX_STRING_VALUE_LENGTH => {
            Err(Error::InvalidEvent(format!(
                "string property values must be shorter than {} characters",
                MAX_STRING_VALUE_LENGTH
            )))
        }
        Value::Object(object) => validate_object(object, depth + 1),
        Value::Array(items) => items.iter().try_for_each(|item| validate_value(item, depth)),
        _ => Ok(()),
    }
}

fn validate_property_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidEvent(
            "property names must not be empty".to_string(),
        ));
    }
    if name.contains('.') {
        return Err(Error::InvalidEvent(format!(
            "property {:?} contains the period (.) character",
            name
        )));
    }
    if name.starts_with('$') {
        return Err(Error::InvalidEvent(format!(
            "property {:?} starts with the dollar sign ($) character",
            name
        )));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(Error::InvalidEvent(format!(
            "property names must not be longer than {} characters",
            MAX_NAME_LENGTH
        )));
    }
    Ok(())
}

/// Build the event body that gets stored or sent.
///
/// Global properties are applied first so the event's own properties win.
/// `keen` properties supplied by the caller are kept; `keen.timestamp`
/// defaults to now.
pub fn build_event(
    global_properties: &Map<String, Value>,
    event: Map<String, Value>,
    keen_properties: Option<Map<String, Value>>,
) -> Map<String, Value> {
    let mut merged: Map<String, Value> = global_properties
        .iter()
        .filter(|(name, _)| name.as_str() != KEEN_PROPERTY)
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    merged.extend(event);

    let mut keen = keen_properties.unwrap_or_default();
    keen.entry("timestamp").or_insert_with(|| {
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
    });
    merged.insert(KEEN_PROPERTY.to_string(), Value::Object(keen));
    merged
}

/// Validate, enrich and serialize an event in one step.
pub fn prepare_event(
    global_properties: &Map<String, Value>,
    collection: &str,
    event: Map<String, Value>,
    keen_properties: Option<Map<String, Value>>,
) -> Result<String> {
    validate_collection(collection)?;
    validate_event(&event)?;
    let body = build_event(global_properties, event, keen_properties);
    Ok(serde_json::to_string(&body)?)
}

//! Projection of a validated tracking payload into a [`TrackingSummary`].
//!
//! The payload keeps locations in a flat keyed list and refers to them by
//! key everywhere else (route endpoints, container events). A lookup is
//! built once and every reference goes through it; dangling keys resolve to
//! [`UNKNOWN`]. The projection never fails and never mutates its input.

use crate::types::{LineItem, LineItemEvent, ResolvedTimestamp, TrackingSummary, Vehicle, UNKNOWN};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Route endpoints read for the origin, in preference order.
const ORIGIN_KEYS: [&str; 2] = ["prepol", "pol"];
/// Route endpoints read for the destination, in preference order.
const DESTINATION_KEYS: [&str; 2] = ["pod", "postpod"];

/// Key → display name lookup over `data.locations`.
#[derive(Debug, Default)]
pub struct LocationIndex {
    names: HashMap<String, String>,
}

impl LocationIndex {
    pub fn build(locations: &Value) -> Self {
        let mut names = HashMap::new();
        for loc in locations.as_array().into_iter().flatten() {
            let Some(key) = loc.get("id").and_then(location_key) else {
                continue;
            };
            names.insert(key, display_name(loc));
        }
        Self { names }
    }

    /// Resolve a location reference, falling back to [`UNKNOWN`].
    pub fn resolve(&self, reference: Option<&Value>) -> String {
        reference
            .and_then(location_key)
            .and_then(|key| self.names.get(&key))
            .cloned()
            .unwrap_or_else(|| UNKNOWN.to_string())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn location_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn display_name(loc: &Value) -> String {
    let name = text(loc.get("name"));
    let country = text(loc.get("country")).or_else(|| text(loc.get("country_code")));
    match (name, country) {
        (Some(name), Some(country)) => format!("{name}, {country}"),
        (Some(name), None) => name,
        (None, _) => text(loc.get("locode")).unwrap_or_else(|| UNKNOWN.to_string()),
    }
}

/// Non-empty string or number as text.
fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text_or_unknown(value: Option<&Value>) -> String {
    text(value).unwrap_or_else(|| UNKNOWN.to_string())
}

/// Pick the actual timestamp of a route endpoint over the estimated one.
///
/// Accepts explicit `actual_date`/`estimated_date` fields as well as the
/// `date` + `actual` flag form, with `predictive_eta` as a last estimate.
pub fn resolve_timestamp(endpoint: Option<&Value>) -> ResolvedTimestamp {
    let Some(endpoint) = endpoint else {
        return ResolvedTimestamp::unknown();
    };
    let flagged_actual = endpoint.get("actual").and_then(Value::as_bool).unwrap_or(false);
    let date = text(endpoint.get("date"));

    let actual = text(endpoint.get("actual_date")).or_else(|| date.clone().filter(|_| flagged_actual));
    if let Some(value) = actual {
        return ResolvedTimestamp::actual(value);
    }

    let estimated = text(endpoint.get("estimated_date"))
        .or(date)
        .or_else(|| text(endpoint.get("predictive_eta")));
    match estimated {
        Some(value) => ResolvedTimestamp::estimated(value),
        None => ResolvedTimestamp::unknown(),
    }
}

fn first_endpoint<'a>(route: Option<&'a Map<String, Value>>, keys: &[&str]) -> Option<&'a Value> {
    let route = route?;
    keys.iter()
        .filter_map(|key| route.get(*key))
        .find(|endpoint| endpoint.is_object())
}

fn line_item(container: &Value, index: &LocationIndex) -> LineItem {
    let events = container
        .get("events")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let latest_event = events.last().map(|event| LineItemEvent {
        description: text_or_unknown(event.get("description")),
        date: text(event.get("date")),
        location: index.resolve(event.get("location")),
        actual: event.get("actual").and_then(Value::as_bool).unwrap_or(false),
    });

    LineItem {
        number: text_or_unknown(container.get("number")),
        size_type: text(container.get("size_type"))
            .or_else(|| text(container.get("iso_code")))
            .unwrap_or_else(|| UNKNOWN.to_string()),
        status: text_or_unknown(container.get("status")),
        event_count: events.len(),
        latest_event,
    }
}

fn vehicle(vessel: &Value) -> Vehicle {
    Vehicle {
        name: text_or_unknown(vessel.get("name")),
        imo: vessel.get("imo").and_then(|imo| match imo {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }),
        flag: text(vessel.get("flag")),
        voyage: text(vessel.get("voyage")),
        loading_port: None,
        discharge_port: None,
    }
}

/// Build the summary of a payload that validated as `Valid`.
pub fn normalize(payload: &Value) -> TrackingSummary {
    let empty = Value::Null;
    let data = payload.get("data").unwrap_or(&empty);
    let metadata = data.get("metadata");
    let route = data.get("route").and_then(Value::as_object);

    let index = LocationIndex::build(data.get("locations").unwrap_or(&empty));

    let origin = first_endpoint(route, &ORIGIN_KEYS);
    let destination = first_endpoint(route, &DESTINATION_KEYS);

    let line_items = data
        .get("containers")
        .and_then(Value::as_array)
        .map(|containers| containers.iter().map(|c| line_item(c, &index)).collect())
        .unwrap_or_default();

    let vehicles = data
        .get("vessels")
        .and_then(Value::as_array)
        .map(|vessels| vessels.iter().map(vehicle).collect())
        .unwrap_or_default();

    let field = |key: &str| metadata.and_then(|m| m.get(key));

    TrackingSummary {
        subject_id: text_or_unknown(field("number")),
        status: text_or_unknown(field("status")),
        carrier_name: text(field("sealine_name"))
            .or_else(|| text(field("sealine")))
            .unwrap_or_else(|| UNKNOWN.to_string()),
        origin_location: index.resolve(origin.and_then(|e| e.get("location"))),
        destination_location: index.resolve(destination.and_then(|e| e.get("location"))),
        departure: resolve_timestamp(origin),
        arrival: resolve_timestamp(destination),
        line_items,
        vehicles,
        last_updated: text_or_unknown(field("updated_at")),
    }
}

//! DOM fallback: build a summary from the rendered tracking card.
//!
//! Used only when no captured payload produced a summary. Relies on the
//! card's `data-test-id` hooks where they exist and on the page's generated
//! class names for the date strip and vessel panel, so it is expected to
//! degrade over time; every field falls back to an explicit unknown.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use shiptrace::{LineItem, LineItemEvent, ResolvedTimestamp, TrackingSummary, Vehicle, UNKNOWN};
use std::sync::OnceLock;

const REFERENCE: &str = "[data-reference]";
const STATUS: &str = "[data-test-id^='card-status-']";
const ORIGIN: &str = "[data-test-id^='card-direction-from-']";
const DESTINATION: &str = "[data-test-id^='card-direction-to-']";
const CARRIER_LOGO: &str = "img[class*='RhAQya'][alt]";
const DATE_LABEL: &str = "div[class*='LPPMfj']";
const VESSEL_BLOCK: &str = "div[class*='g0DglG']";
const VESSEL_FIELD: &str = "div[class*='V3_o9s']";
const VESSEL_LABEL: &str = "div[class*='HKyeYq']";
const VESSEL_VALUE: &str = "div[class*='BGIaYF']";
const CONTAINER_INFO: &str = "div[class*='NVumUP']";
const ROUTE_BLOCK: &str = "div[class*='CL5ccK']";
const ROUTE_LOCATION: &str = "div[class*='XMtlrn']";
const ROUTE_COLUMN: &str = "div[class*='WJvyRD']";
const ROUTE_ENTRY: &str = "div[class*='jKvQbb']";
/// Class fragment marking a timeline entry that already happened.
const COMPLETED_MARK: &str = "SbA_5C";

fn container_number() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z]{4}\d{7}$").expect("container regex is valid"))
}

fn date_label() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(ATD|ATA|ETD|ETA)\s*(.*)$").expect("date label regex is valid"))
}

fn container_info() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)\s*x\s*(.+)").expect("container info regex is valid"))
}

fn select<'a>(doc: &'a Html, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(sel) => doc.select(&sel).collect(),
        Err(_) => Vec::new(),
    }
}

fn select_in<'a>(el: ElementRef<'a>, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(sel) => el.select(&sel).collect(),
        Err(_) => Vec::new(),
    }
}

fn text_of(el: ElementRef<'_>) -> Option<String> {
    let text = el.text().collect::<Vec<_>>().join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

fn first_text(doc: &Html, css: &str) -> Option<String> {
    select(doc, css).into_iter().find_map(text_of)
}

/// Dates from the card's date strip, keyed by label.
#[derive(Debug, Default, PartialEq, Eq)]
struct CardDates {
    atd: Option<String>,
    ata: Option<String>,
    etd: Option<String>,
    eta: Option<String>,
}

fn card_dates(doc: &Html) -> CardDates {
    let mut dates = CardDates::default();
    for text in select(doc, DATE_LABEL).into_iter().filter_map(text_of) {
        let Some(caps) = date_label().captures(&text) else {
            continue;
        };
        let value = caps[2].trim().to_string();
        if value.is_empty() {
            continue;
        }
        let slot = match &caps[1] {
            "ATD" => &mut dates.atd,
            "ATA" => &mut dates.ata,
            "ETD" => &mut dates.etd,
            _ => &mut dates.eta,
        };
        slot.get_or_insert(value);
    }
    dates
}

fn resolve(actual: Option<String>, estimated: Option<String>) -> ResolvedTimestamp {
    match (actual, estimated) {
        (Some(v), _) => ResolvedTimestamp::actual(v),
        (None, Some(v)) => ResolvedTimestamp::estimated(v),
        (None, None) => ResolvedTimestamp::unknown(),
    }
}

/// Container numbers appearing as standalone text, deduplicated, in page order.
fn container_numbers(doc: &Html) -> Vec<String> {
    let mut seen = Vec::new();
    for node in doc.root_element().descendants() {
        if let Some(text) = node.value().as_text() {
            let candidate = text.trim();
            if container_number().is_match(candidate) && !seen.iter().any(|s| s == candidate) {
                seen.push(candidate.to_string());
            }
        }
    }
    seen
}

fn vessels(doc: &Html) -> Vec<Vehicle> {
    select(doc, VESSEL_BLOCK)
        .into_iter()
        .filter_map(|block| {
            let mut fields = std::collections::HashMap::new();
            for field in select_in(block, VESSEL_FIELD) {
                let label = select_in(field, VESSEL_LABEL).into_iter().find_map(text_of);
                let value = select_in(field, VESSEL_VALUE).into_iter().find_map(text_of);
                if let (Some(label), Some(value)) = (label, value) {
                    fields.entry(label).or_insert(value);
                }
            }
            Some(Vehicle {
                name: fields.remove("Vessel")?,
                imo: None,
                flag: None,
                voyage: fields.remove("Voyage"),
                loading_port: fields.remove("Loading"),
                discharge_port: fields.remove("Discharge"),
            })
        })
        .collect()
}

/// `"2 x 40' High Cube"` → `(2, "40' High Cube")`.
fn container_summary(doc: &Html) -> Option<(usize, String)> {
    let text = first_text(doc, CONTAINER_INFO)?;
    let caps = container_info().captures(&text)?;
    let count = caps[1].parse().ok()?;
    Some((count, caps[2].trim().to_string()))
}

/// Shipment timeline: per location, a column of descriptions and a column
/// of timestamps matched by position.
fn route_events(doc: &Html) -> Vec<LineItemEvent> {
    let mut events = Vec::new();
    for block in select(doc, ROUTE_BLOCK) {
        let Some(location) = select_in(block, ROUTE_LOCATION).into_iter().find_map(text_of) else {
            continue;
        };
        let columns = select_in(block, ROUTE_COLUMN);
        let [descriptions, timestamps, ..] = columns.as_slice() else {
            continue;
        };
        let stamps: Vec<Option<String>> = select_in(*timestamps, ROUTE_ENTRY).into_iter().map(text_of).collect();
        for (i, entry) in select_in(*descriptions, ROUTE_ENTRY).into_iter().enumerate() {
            let Some(description) = text_of(entry) else {
                continue;
            };
            events.push(LineItemEvent {
                description,
                date: stamps.get(i).cloned().flatten(),
                location: location.clone(),
                actual: entry.value().attr("class").is_some_and(|c| c.contains(COMPLETED_MARK)),
            });
        }
    }
    events
}

/// Extract a fallback summary from page HTML.
///
/// Returns `None` when the page shows no tracking card at all (challenge
/// page, error page, empty result).
pub fn extract_summary(html: &str, subject: &str) -> Option<TrackingSummary> {
    let doc = Html::parse_document(html);

    let reference = select(&doc, REFERENCE)
        .into_iter()
        .find_map(|el| el.value().attr("data-reference").map(str::trim).map(str::to_string))
        .filter(|r| !r.is_empty());
    let status = first_text(&doc, STATUS);
    let origin = first_text(&doc, ORIGIN);
    let destination = first_text(&doc, DESTINATION);
    let containers = container_numbers(&doc);

    if reference.is_none() && status.is_none() && origin.is_none() && destination.is_none() && containers.is_empty() {
        return None;
    }

    let carrier = select(&doc, CARRIER_LOGO)
        .into_iter()
        .find_map(|img| img.value().attr("alt").map(str::trim).map(str::to_string))
        .filter(|alt| !alt.is_empty());
    let dates = card_dates(&doc);
    let timeline = route_events(&doc);
    let latest = timeline.iter().rev().find(|e| e.actual).cloned();
    let (count, size_type) = match container_summary(&doc) {
        Some((count, size_type)) => (Some(count), size_type),
        None => (None, UNKNOWN.to_string()),
    };
    if let Some(count) = count.filter(|n| *n != containers.len()) {
        tracing::debug!("{subject}: card lists {count} container(s), {} number(s) found", containers.len());
    }

    Some(TrackingSummary {
        subject_id: reference.unwrap_or_else(|| subject.to_string()),
        status: status.unwrap_or_else(|| UNKNOWN.to_string()),
        carrier_name: carrier.unwrap_or_else(|| UNKNOWN.to_string()),
        origin_location: origin.unwrap_or_else(|| UNKNOWN.to_string()),
        destination_location: destination.unwrap_or_else(|| UNKNOWN.to_string()),
        departure: resolve(dates.atd, dates.etd),
        arrival: resolve(dates.ata, dates.eta),
        line_items: containers
            .into_iter()
            .map(|number| LineItem {
                number,
                size_type: size_type.clone(),
                status: UNKNOWN.to_string(),
                event_count: timeline.len(),
                latest_event: latest.clone(),
            })
            .collect(),
        vehicles: vessels(&doc),
        last_updated: UNKNOWN.to_string(),
    })
}

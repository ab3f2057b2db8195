//! Defensive extraction of schema.org Event data from JSON-LD payloads.
//!
//! JSON-LD in the wild is unpredictable: single objects, arrays,
//! `@graph` wrappers, strings where objects belong. Every projected
//! field is independently optional; a bad property degrades only that
//! field, never the whole parse.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaOrgStatus {
    Available,
    NotFound,
    Invalid,
    Error,
}

/// Flattened projection of a schema.org Event node onto the catalog's
/// own field names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaOrgData {
    pub name: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub venue_name: Option<String>,
    pub venue_address: Option<String>,
    pub venue_city: Option<String>,
    pub venue_state: Option<String>,
    pub venue_lat: Option<f64>,
    pub venue_lng: Option<f64>,
    pub image_url: Option<String>,
    pub ticket_url: Option<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub event_status: Option<String>,
    pub organizer_name: Option<String>,
    pub organizer_url: Option<String>,
}

/// Outcome of one JSON-LD parse attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaOrgParse {
    pub raw_json_ld: Value,
    pub data: Option<SchemaOrgData>,
    pub status: SchemaOrgStatus,
    pub error: Option<String>,
}

fn type_is_event(type_value: &Value) -> bool {
    match type_value {
        Value::String(s) => s == "Event" || s.contains("Event"),
        Value::Array(items) => items.iter().any(type_is_event),
        _ => false,
    }
}

fn is_event_object(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|obj| obj.get("@type"))
        .map(type_is_event)
        .unwrap_or(false)
}

/// Finds the first schema.org Event node in a JSON-LD payload: a direct
/// object, an element of a top-level array, or an `@graph` member.
pub fn find_event_node(value: &Value) -> Option<&Value> {
    if is_event_object(value) {
        return Some(value);
    }
    if let Some(items) = value.as_array() {
        return items.iter().find(|item| is_event_object(item));
    }
    if let Some(graph) = value.get("@graph").and_then(Value::as_array) {
        return graph.iter().find(|item| is_event_object(item));
    }
    None
}

fn string_field(node: &Value, key: &str) -> Option<String> {
    node.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn number_field(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

/// Lenient ISO-8601 parsing; date-only values land at midnight UTC.
pub fn parse_schema_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
    }
    None
}

fn date_field(node: &Value, key: &str) -> Option<DateTime<Utc>> {
    node.get(key)
        .and_then(Value::as_str)
        .and_then(parse_schema_date)
}

/// `location` is usually a Place object but sometimes a bare string.
fn extract_location(data: &mut SchemaOrgData, node: &Value) {
    let Some(location) = node.get("location") else {
        return;
    };
    match location {
        Value::String(name) => {
            let trimmed = name.trim();
            if !trimmed.is_empty() {
                data.venue_name = Some(trimmed.to_string());
            }
        }
        Value::Object(_) => {
            data.venue_name = string_field(location, "name");
            match location.get("address") {
                Some(Value::String(addr)) => {
                    data.venue_address = Some(addr.trim().to_string());
                }
                Some(addr @ Value::Object(_)) => {
                    data.venue_address = string_field(addr, "streetAddress");
                    data.venue_city = string_field(addr, "addressLocality");
                    data.venue_state = string_field(addr, "addressRegion");
                }
                _ => {}
            }
            if let Some(geo) = location.get("geo") {
                data.venue_lat = geo.get("latitude").and_then(number_field);
                data.venue_lng = geo.get("longitude").and_then(number_field);
            }
        }
        _ => {}
    }
}

/// `offers` may be one Offer or an array; prices may be numbers or
/// strings, flat `price` or a `lowPrice`/`highPrice` range.
fn extract_offers(data: &mut SchemaOrgData, node: &Value) {
    let offers: Vec<&Value> = match node.get("offers") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single @ Value::Object(_)) => vec![single],
        _ => return,
    };
    for offer in offers {
        if data.ticket_url.is_none() {
            data.ticket_url = string_field(offer, "url");
        }
        let low = offer.get("lowPrice").and_then(number_field);
        let high = offer.get("highPrice").and_then(number_field);
        let flat = offer.get("price").and_then(number_field);
        for price in [low, flat] {
            if let Some(p) = price {
                data.price_min = Some(data.price_min.map_or(p, |cur: f64| cur.min(p)));
            }
        }
        for price in [high, flat] {
            if let Some(p) = price {
                data.price_max = Some(data.price_max.map_or(p, |cur: f64| cur.max(p)));
            }
        }
    }
}

/// `image` may be a URL string, an array of them, or an ImageObject.
fn extract_image(node: &Value) -> Option<String> {
    match node.get("image")? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Array(items) => items.iter().find_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            obj @ Value::Object(_) => string_field(obj, "url"),
            _ => None,
        }),
        obj @ Value::Object(_) => string_field(obj, "url"),
        _ => None,
    }
}

fn extract_organizer(data: &mut SchemaOrgData, node: &Value) {
    match node.get("organizer") {
        Some(Value::String(name)) => {
            data.organizer_name = Some(name.trim().to_string()).filter(|s| !s.is_empty());
        }
        Some(org @ Value::Object(_)) => {
            data.organizer_name = string_field(org, "name");
            data.organizer_url = string_field(org, "url");
        }
        _ => {}
    }
}

fn project_event_node(node: &Value) -> SchemaOrgData {
    let mut data = SchemaOrgData {
        name: string_field(node, "name"),
        description: string_field(node, "description"),
        start_date: date_field(node, "startDate"),
        end_date: date_field(node, "endDate"),
        image_url: extract_image(node),
        event_status: string_field(node, "eventStatus")
            .map(|s| s.trim_start_matches("https://schema.org/").to_string()),
        ..Default::default()
    };
    extract_location(&mut data, node);
    extract_offers(&mut data, node);
    extract_organizer(&mut data, node);
    if data.ticket_url.is_none() {
        data.ticket_url = string_field(node, "url");
    }
    data
}

/// Parses a JSON-LD payload into the flattened Event projection.
///
/// `available` requires an Event node with at least a name; a node
/// without one is `invalid`; a payload without an Event node is
/// `not_found`.
pub fn parse_json_ld(raw: &Value) -> SchemaOrgParse {
    let Some(node) = find_event_node(raw) else {
        return SchemaOrgParse {
            raw_json_ld: raw.clone(),
            data: None,
            status: SchemaOrgStatus::NotFound,
            error: Some("no schema.org Event node in payload".to_string()),
        };
    };

    let data = project_event_node(node);
    if data.name.is_none() {
        return SchemaOrgParse {
            raw_json_ld: raw.clone(),
            data: None,
            status: SchemaOrgStatus::Invalid,
            error: Some("Event node has no usable name".to_string()),
        };
    }

    SchemaOrgParse {
        raw_json_ld: raw.clone(),
        data: Some(data),
        status: SchemaOrgStatus::Available,
        error: None,
    }
}

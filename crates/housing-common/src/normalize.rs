//! Normalizes loosely-typed CKAN datastore rows into [`PropertyRecord`] values.
//!
//! CKAN resources uploaded from spreadsheets store most columns as text. Numeric columns are
//! parsed with leading-number semantics and default to 0; boolean columns accept the usual
//! spreadsheet spellings. Rows without usable coordinates are dropped.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::ckan::{CkanClient, DatastoreSearchOptions};
use crate::model::{Amenities, Contact, PriceBucket, PropertyRecord};

type Row = Map<String, Value>;

/// Normalizes every row, dropping the ones without valid coordinates.
pub fn normalize_records(rows: &[Row]) -> Vec<PropertyRecord> {
    let records: Vec<PropertyRecord> = rows.iter().filter_map(normalize_record).collect();
    let dropped = rows.len() - records.len();
    if dropped > 0 {
        debug!(dropped, kept = records.len(), "dropped rows without valid coordinates");
    }
    records
}

/// Normalizes a single row. Returns `None` when latitude or longitude is missing or invalid.
pub fn normalize_record(row: &Row) -> Option<PropertyRecord> {
    let latitude = number_field(row, &["latitude", "lat"]);
    let longitude = number_field(row, &["longitude", "lng", "lon"]);
    if !valid_coordinates(latitude, longitude) {
        return None;
    }

    let name = text_field(row, &["name", "apartment_name", "title"]).unwrap_or_default();
    let id = text_field(row, &["id", "_id"])
        .unwrap_or_else(|| format!("{name}-{latitude}-{longitude}"));

    let mut amenities = Amenities::default();
    for column in Amenities::COLUMNS {
        if let Some(value) = row.get(column) {
            amenities.set(column, parse_bool(value));
        }
    }

    let monthly_min_price = number_field(row, &["monthly_min_price"]);
    Some(PropertyRecord {
        id,
        name,
        latitude,
        longitude,
        monthly_min_price,
        monthly_max_price: number_field(row, &["monthly_max_price"]),
        daily_min_price: number_field(row, &["daily_min_price"]),
        daily_max_price: number_field(row, &["daily_max_price"]),
        room_size_min: number_field(row, &["room_size_min", "size_min"]),
        room_size_max: number_field(row, &["room_size_max", "size_max"]),
        room_type: text_field(row, &["room_type"]),
        contact: Contact {
            phone: text_field(row, &["phone", "tel"]),
            line_id: text_field(row, &["line_id"]),
            email: text_field(row, &["email"]),
            address: text_field(row, &["address"]),
        },
        price_bucket: PriceBucket::for_monthly_price(monthly_min_price),
        amenity_score: amenities.score(),
        amenities,
    })
}

/// Fetches and normalizes a property resource. CKAN failures degrade to an empty set.
pub async fn load_properties(
    client: &CkanClient,
    resource_id: &str,
    limit: u32,
) -> Vec<PropertyRecord> {
    let options = DatastoreSearchOptions {
        limit: Some(limit),
        ..Default::default()
    };
    match client.datastore_search(resource_id, &options).await {
        Ok(result) => normalize_records(&result.records),
        Err(e) => {
            warn!(error = %e, resource_id, "failed to load properties, returning empty set");
            Vec::new()
        }
    }
}

/// Coordinates are valid when finite, non-zero and inside the WGS84 range.
/// Zero is what a missing or unparsable cell turns into.
pub fn valid_coordinates(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && latitude != 0.0
        && longitude != 0.0
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}

/// Lenient numeric coercion: numbers pass through, strings are read up to the first
/// non-numeric character (thousands separators removed), everything else is 0.
pub fn parse_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => parse_leading_float(&s.replace(',', "")).unwrap_or(0.0),
        _ => 0.0,
    }
}

pub fn parse_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() == Some(1.0),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "y" | "1"
        ),
        _ => false,
    }
}

fn number_field(row: &Row, keys: &[&str]) -> f64 {
    keys.iter()
        .find_map(|k| row.get(*k).filter(|v| !v.is_null()))
        .map(parse_number)
        .unwrap_or(0.0)
}

fn text_field(row: &Row, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match row.get(*k)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn parse_leading_float(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    let mut digits = 0;

    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
        digits += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return None;
    }
    // Exponent only counts when at least one digit follows it.
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }
    s[..end].parse::<f64>().ok()
}

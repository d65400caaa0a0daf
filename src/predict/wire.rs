//! JSON bodies exchanged with the prediction service.
//!
//! Coordinates travel as `start_x` = latitude, `start_y` = longitude (and
//! likewise `end_x` / `end_y`). The backend depends on this mapping.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::geo::GeoPoint;
use crate::session::PlayerId;

/// Stage 1 request body. `POST /predictlocation/{player_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRequest {
    pub start_x: f64,
    pub start_y: f64,
    pub shot_id: u32,
}

impl LocationRequest {
    pub fn new(shot_id: u32, start: GeoPoint) -> Self {
        Self {
            start_x: start.latitude,
            start_y: start.longitude,
            shot_id,
        }
    }
}

/// Stage 2 request body. `POST /predictclub/{player_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClubRequest {
    pub start_x: f64,
    pub start_y: f64,
    pub end_x: f64,
    pub end_y: f64,
    pub shot_id: u32,
}

impl ClubRequest {
    pub fn new(shot_id: u32, start: GeoPoint, landing: GeoPoint) -> Self {
        Self {
            start_x: start.latitude,
            start_y: start.longitude,
            end_x: landing.latitude,
            end_y: landing.longitude,
            shot_id,
        }
    }
}

pub fn location_path(player: &PlayerId) -> String {
    format!("/predictlocation/{}", encode_segment(player.as_str()))
}

pub fn club_path(player: &PlayerId) -> String {
    format!("/predictclub/{}", encode_segment(player.as_str()))
}

/// Everything outside the RFC 3986 unreserved set.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn encode_segment(s: &str) -> String {
    utf8_percent_encode(s, PATH_SEGMENT).to_string()
}

/// Decode a stage 1 response: `{"latitude": f64, "longitude": f64}`.
///
/// Both fields must be present, numeric and finite. The error string
/// carries the backend's own `"error"` message when it sent one.
pub fn decode_location(body: &Value) -> Result<GeoPoint, String> {
    let obj = body
        .as_object()
        .ok_or_else(|| format!("expected an object, got {}", kind_of(body)))?;

    if let Some(msg) = obj.get("error").and_then(Value::as_str) {
        return Err(format!("service error: {msg}"));
    }

    let field = |name: &str| -> Result<f64, String> {
        match obj.get(name) {
            None => Err(format!("missing {name}")),
            Some(v) => v
                .as_f64()
                .filter(|f| f.is_finite())
                .ok_or_else(|| format!("{name} is not a finite number ({})", kind_of(v))),
        }
    };

    Ok(GeoPoint::new(field("latitude")?, field("longitude")?))
}

/// Decode a stage 2 response: `{"Club": "7-Iron"}`.
pub fn decode_club(body: &Value) -> Result<String, String> {
    let obj = body
        .as_object()
        .ok_or_else(|| format!("expected an object, got {}", kind_of(body)))?;

    if let Some(msg) = obj.get("error").and_then(Value::as_str) {
        return Err(format!("service error: {msg}"));
    }

    match obj.get("Club") {
        None => Err("missing Club".into()),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(v) => Err(format!("Club is not a non-empty string ({})", kind_of(v))),
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

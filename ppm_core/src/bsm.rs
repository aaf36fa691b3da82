//! BSM document model - parse, inspect, redact, re-emit.
//!
//! An inbound payload is UTF-8 JSON. The handler parses it once, caches
//! the fields the filter gates need (identifier, position, speed,
//! trajectory), and keeps the full value tree so that everything it does
//! not understand survives re-serialisation untouched.

use serde_json::Value;
use thiserror::Error;

use crate::geo::Point;

/// Errors raised while interpreting an inbound payload.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The payload was not well-formed JSON.
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field was absent.
    #[error("BSM lacks required field {0}")]
    MissingField(&'static str),

    /// A field was present but unusable.
    #[error("BSM field {0} has the wrong type or is out of range")]
    BadField(&'static str),
}

/// A parsed Basic Safety Message.
///
/// Constructed per inbound message, mutated only by redaction, dropped
/// after produce.
#[derive(Debug, Clone)]
pub struct Bsm {
    doc: Value,
    id: String,
    position: Point,
    speed_mps: f64,
    trajectory: Vec<Point>,
}

impl Bsm {
    /// Parses a payload byte buffer into a BSM.
    ///
    /// Fails when the payload is not well-formed JSON or lacks
    /// `coreData.id` / `coreData.position`.
    pub fn from_slice(payload: &[u8]) -> Result<Self, ParseError> {
        let doc: Value = serde_json::from_slice(payload)?;

        let core = doc
            .get("coreData")
            .ok_or(ParseError::MissingField("coreData"))?;

        let id = core
            .get("id")
            .ok_or(ParseError::MissingField("coreData.id"))?
            .as_str()
            .ok_or(ParseError::BadField("coreData.id"))?
            .to_string();

        let position = parse_position(
            core.get("position")
                .ok_or(ParseError::MissingField("coreData.position"))?,
            "coreData.position",
        )?;

        // Speed is optional on the wire; an absent value reads as zero
        // so the velocity gate still applies.
        let speed_mps = match core.get("speed_mps") {
            None | Some(Value::Null) => 0.0,
            Some(v) => {
                let speed = v.as_f64().ok_or(ParseError::BadField("coreData.speed_mps"))?;
                if speed < 0.0 {
                    return Err(ParseError::BadField("coreData.speed_mps"));
                }
                speed
            }
        };

        let mut trajectory = vec![position];
        collect_crumbs(&doc, &mut trajectory)?;

        Ok(Self {
            doc,
            id,
            position,
            speed_mps,
            trajectory,
        })
    }

    /// The vehicle identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The current reported position.
    pub fn position(&self) -> Point {
        self.position
    }

    /// Reported speed in metres per second; zero when absent.
    pub fn speed_mps(&self) -> f64 {
        self.speed_mps
    }

    /// Elevation in metres, when reported.
    pub fn elevation(&self) -> Option<f64> {
        self.doc
            .get("coreData")
            .and_then(|c| c.get("position"))
            .and_then(|p| p.get("elevation"))
            .and_then(Value::as_f64)
    }

    /// Current position followed by path-history crumbs, earliest first.
    pub fn trajectory(&self) -> &[Point] {
        &self.trajectory
    }

    /// Overwrites `coreData.id` in place; every other field is untouched.
    pub fn redact_id(&mut self, replacement: &str) {
        if let Some(id) = self
            .doc
            .get_mut("coreData")
            .and_then(|c| c.get_mut("id"))
        {
            *id = Value::String(replacement.to_string());
        }
        self.id = replacement.to_string();
    }

    /// Re-emits the document as JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ParseError> {
        Ok(serde_json::to_vec(&self.doc)?)
    }

    /// The underlying value tree.
    pub fn document(&self) -> &Value {
        &self.doc
    }

    /// One-line summary for retain/suppress log records.
    pub fn log_string(&self) -> String {
        format!(
            "id={} pos={} speed={:.1} trajectory={}",
            self.id,
            self.position,
            self.speed_mps,
            self.trajectory.len()
        )
    }
}

fn parse_position(value: &Value, field: &'static str) -> Result<Point, ParseError> {
    let lat = value
        .get("latitude")
        .and_then(Value::as_f64)
        .ok_or(ParseError::BadField(field))?;
    let lon = value
        .get("longitude")
        .and_then(Value::as_f64)
        .ok_or(ParseError::BadField(field))?;
    let p = Point::new(lat, lon);
    if !p.is_valid() {
        return Err(ParseError::BadField(field));
    }
    Ok(p)
}

/// Appends path-history crumb positions in their encoded order.
fn collect_crumbs(doc: &Value, out: &mut Vec<Point>) -> Result<(), ParseError> {
    let Some(part2) = doc.get("partII").and_then(Value::as_array) else {
        return Ok(());
    };
    for entry in part2 {
        let Some(crumbs) = entry
            .get("pathHistory")
            .and_then(|h| h.get("crumbs"))
            .and_then(Value::as_array)
        else {
            continue;
        };
        for crumb in crumbs {
            let position = crumb
                .get("position")
                .ok_or(ParseError::MissingField("pathHistory.crumbs.position"))?;
            out.push(parse_position(position, "pathHistory.crumbs.position")?);
        }
    }
    Ok(())
}

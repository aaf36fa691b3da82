//! Filter policy - decides what happens to each BSM.
//!
//! Four gates, cheapest first, first failure wins:
//! 1. velocity (closed range)
//! 2. geofence rectangle (every trajectory point must be inside)
//! 3. region inclusion (some point or segment must touch a shape)
//! 4. identifier pattern (match means redact, otherwise retain)
//!
//! Redaction is a retention outcome; the message is still produced.

use regex::Regex;

use crate::bsm::Bsm;
use crate::config::PolicyConfig;
use crate::quad::Quadtree;

/// Why a message was suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// Speed outside the configured closed range.
    Velocity,
    /// Some trajectory point left the geofence rectangle.
    OutsideGeofence,
    /// No trajectory point or segment touched a configured shape.
    NotInRegion,
    /// The payload could not be interpreted as a BSM.
    Parse,
}

impl std::fmt::Display for SuppressReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Velocity => "velocity",
            Self::OutsideGeofence => "outside-geofence",
            Self::NotInRegion => "not-in-region",
            Self::Parse => "parse",
        };
        f.write_str(s)
    }
}

/// The outcome of assessing one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Republish unchanged.
    Retain,
    /// Republish with the identifier overwritten.
    Redact,
    /// Drop.
    Suppress(SuppressReason),
}

impl Decision {
    /// True for the outcomes that produce a message.
    pub fn is_retained(&self) -> bool {
        matches!(self, Self::Retain | Self::Redact)
    }
}

/// Immutable filter policy: thresholds, identifier pattern, and the
/// geofence index.
#[derive(Debug)]
pub struct FilterPolicy {
    velocity_min: f64,
    velocity_max: f64,
    id_pattern: Option<Regex>,
    redaction_value: String,
    fence: Quadtree,
}

impl FilterPolicy {
    /// Builds the policy from resolved configuration and a built index.
    pub fn from_config(config: &PolicyConfig, fence: Quadtree) -> Result<Self, regex::Error> {
        let id_pattern = config
            .id_inclusion_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()?;
        Ok(Self {
            velocity_min: config.velocity_min,
            velocity_max: config.velocity_max,
            id_pattern,
            redaction_value: config.id_redaction_value.clone(),
            fence,
        })
    }

    /// The geofence index backing the inclusion gate.
    pub fn fence(&self) -> &Quadtree {
        &self.fence
    }

    /// Runs the gates against a parsed BSM without mutating it.
    pub fn assess(&self, bsm: &Bsm) -> Decision {
        let speed = bsm.speed_mps();
        if speed < self.velocity_min || speed > self.velocity_max {
            return Decision::Suppress(SuppressReason::Velocity);
        }

        let trajectory = bsm.trajectory();
        let bounds = self.fence.bounds();
        if trajectory.iter().any(|p| !bounds.contains(p)) {
            return Decision::Suppress(SuppressReason::OutsideGeofence);
        }

        let in_region = trajectory.iter().any(|p| self.fence.contains(p))
            || trajectory
                .windows(2)
                .any(|w| self.fence.intersects(&w[0], &w[1]));
        if !in_region {
            return Decision::Suppress(SuppressReason::NotInRegion);
        }

        match &self.id_pattern {
            Some(pattern) if pattern.is_match(bsm.id()) => Decision::Redact,
            _ => Decision::Retain,
        }
    }

    /// Assesses the BSM and applies redaction in place when called for.
    pub fn apply(&self, bsm: &mut Bsm) -> Decision {
        let decision = self.assess(bsm);
        if decision == Decision::Redact {
            bsm.redact_id(&self.redaction_value);
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{BoundingBox, Point};
    use crate::shapes::parse_record;

    fn fence() -> Quadtree {
        let bounds = BoundingBox::new(Point::new(35.90, -84.10), Point::new(35.92, -84.08));
        let edge = parse_record("edge,1,35.910;-84.095:35.911;-84.090,width=20").unwrap();
        Quadtree::build(bounds, vec![edge]).unwrap()
    }

    fn policy(pattern: Option<&str>) -> FilterPolicy {
        FilterPolicy {
            velocity_min: 1.0,
            velocity_max: 35.0,
            id_pattern: pattern.map(|p| Regex::new(p).unwrap()),
            redaction_value: "ANON".to_string(),
            fence: fence(),
        }
    }

    fn bsm(id: &str, lat: f64, lon: f64, speed: f64) -> Bsm {
        let raw = format!(
            r#"{{"coreData":{{"id":"{id}","position":{{"latitude":{lat},"longitude":{lon}}},"speed_mps":{speed}}}}}"#
        );
        Bsm::from_slice(raw.as_bytes()).unwrap()
    }

    #[test]
    fn test_retain_in_fence() {
        let p = policy(None);
        assert_eq!(p.assess(&bsm("VEH-7", 35.9105, -84.0925, 10.0)), Decision::Retain);
    }

    #[test]
    fn test_suppress_outside_geofence() {
        let p = policy(None);
        assert_eq!(
            p.assess(&bsm("VEH-7", 36.0, -84.0, 10.0)),
            Decision::Suppress(SuppressReason::OutsideGeofence)
        );
    }

    #[test]
    fn test_suppress_velocity() {
        let p = policy(None);
        assert_eq!(
            p.assess(&bsm("VEH-7", 35.9105, -84.0925, 0.1)),
            Decision::Suppress(SuppressReason::Velocity)
        );
        assert_eq!(
            p.assess(&bsm("VEH-7", 35.9105, -84.0925, 90.0)),
            Decision::Suppress(SuppressReason::Velocity)
        );
    }

    #[test]
    fn test_velocity_range_is_closed() {
        let p = policy(None);
        assert_eq!(p.assess(&bsm("V", 35.9105, -84.0925, 1.0)), Decision::Retain);
        assert_eq!(p.assess(&bsm("V", 35.9105, -84.0925, 35.0)), Decision::Retain);
    }

    #[test]
    fn test_gate_order_first_fail_wins() {
        // Both too slow and outside the fence: the velocity gate fires
        // before any spatial query.
        let p = policy(None);
        assert_eq!(
            p.assess(&bsm("V", 36.0, -84.0, 0.1)),
            Decision::Suppress(SuppressReason::Velocity)
        );
    }

    #[test]
    fn test_suppress_not_in_region() {
        // Inside the rectangle, far from the edge corridor.
        let p = policy(None);
        assert_eq!(
            p.assess(&bsm("V", 35.918, -84.098, 10.0)),
            Decision::Suppress(SuppressReason::NotInRegion)
        );
    }

    #[test]
    fn test_crumb_segment_crossing_retains() {
        // Neither the current position nor the crumb is inside the
        // corridor, but the path between them crosses it.
        let raw = r#"{
            "coreData": {
                "id": "V",
                "position": { "latitude": 35.9120, "longitude": -84.0925 },
                "speed_mps": 10.0
            },
            "partII": [{"pathHistory":{"crumbs":[
                { "position": { "latitude": 35.9080, "longitude": -84.0925 }, "deltaTime": 1.5 }
            ]}}]
        }"#;
        let bsm = Bsm::from_slice(raw.as_bytes()).unwrap();
        let p = policy(None);
        assert_eq!(p.assess(&bsm), Decision::Retain);
    }

    #[test]
    fn test_crumb_outside_fence_suppresses() {
        let raw = r#"{
            "coreData": {
                "id": "V",
                "position": { "latitude": 35.9105, "longitude": -84.0925 },
                "speed_mps": 10.0
            },
            "partII": [{"pathHistory":{"crumbs":[
                { "position": { "latitude": 36.5, "longitude": -84.0925 }, "deltaTime": 1.5 }
            ]}}]
        }"#;
        let bsm = Bsm::from_slice(raw.as_bytes()).unwrap();
        let p = policy(None);
        assert_eq!(
            p.assess(&bsm),
            Decision::Suppress(SuppressReason::OutsideGeofence)
        );
    }

    #[test]
    fn test_redact_matching_id() {
        let p = policy(Some("^VEH-.*"));
        let mut msg = bsm("VEH-7", 35.9105, -84.0925, 10.0);
        assert_eq!(p.apply(&mut msg), Decision::Redact);
        assert_eq!(msg.id(), "ANON");
        assert_eq!(msg.document()["coreData"]["id"], "ANON");
    }

    #[test]
    fn test_non_matching_id_retained_unchanged() {
        let p = policy(Some("^VEH-.*"));
        let mut msg = bsm("TRUCK-9", 35.9105, -84.0925, 10.0);
        assert_eq!(p.apply(&mut msg), Decision::Retain);
        assert_eq!(msg.id(), "TRUCK-9");
    }
}

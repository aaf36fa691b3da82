//! Geographic primitives - points, bounding boxes, and metric distance.
//!
//! Everything downstream (shapes, the quadtree, the filter gates) is built
//! on the operations here:
//! - Great-circle (haversine) distance in metres
//! - Perpendicular point-to-segment distance along the sphere
//! - Closed-interval containment and intersection for lat/lon rectangles

use serde::{Deserialize, Serialize};

/// Mean Earth radius in metres (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A geographic position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Latitude in decimal degrees, [-90, 90].
    pub lat: f64,
    /// Longitude in decimal degrees, [-180, 180].
    pub lon: f64,
}

impl Point {
    /// Creates a point from latitude and longitude in decimal degrees.
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// True when both coordinates are within their valid ranges.
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lon)
    }
}

/// An axis-aligned lat/lon rectangle.
///
/// Closed on all edges: a point exactly on a boundary is inside. The box
/// must not cross the antimeridian (`sw.lon <= ne.lon`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// South-west corner.
    pub sw: Point,
    /// North-east corner.
    pub ne: Point,
}

impl BoundingBox {
    /// Creates a bounding box from its south-west and north-east corners.
    pub fn new(sw: Point, ne: Point) -> Self {
        Self { sw, ne }
    }

    /// True when the corners describe a non-degenerate, non-inverted box.
    pub fn is_valid(&self) -> bool {
        self.sw.is_valid() && self.ne.is_valid() && self.sw.lat < self.ne.lat && self.sw.lon < self.ne.lon
    }

    /// Closed containment test.
    pub fn contains(&self, p: &Point) -> bool {
        p.lat >= self.sw.lat && p.lat <= self.ne.lat && p.lon >= self.sw.lon && p.lon <= self.ne.lon
    }

    /// Closed intersection test with another box.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.sw.lat <= other.ne.lat
            && self.ne.lat >= other.sw.lat
            && self.sw.lon <= other.ne.lon
            && self.ne.lon >= other.sw.lon
    }

    /// The centre of the box.
    pub fn center(&self) -> Point {
        Point::new(
            (self.sw.lat + self.ne.lat) / 2.0,
            (self.sw.lon + self.ne.lon) / 2.0,
        )
    }

    /// Returns this box grown by `margin_m` metres on every side.
    pub fn inflate(&self, margin_m: f64) -> BoundingBox {
        let dlat = meters_to_lat_degrees(margin_m);
        // Widen by the longitude delta at the pole-most latitude of the box.
        let worst_lat = if self.sw.lat.abs() > self.ne.lat.abs() {
            self.sw.lat
        } else {
            self.ne.lat
        };
        let dlon = meters_to_lon_degrees(margin_m, worst_lat);
        BoundingBox::new(
            Point::new(self.sw.lat - dlat, self.sw.lon - dlon),
            Point::new(self.ne.lat + dlat, self.ne.lon + dlon),
        )
    }

    /// True when the segment `a`-`b` touches this box.
    ///
    /// Either an endpoint lies inside, or the segment crosses one of the
    /// four edges.
    pub fn intersects_segment(&self, a: &Point, b: &Point) -> bool {
        if self.contains(a) || self.contains(b) {
            return true;
        }
        let nw = Point::new(self.ne.lat, self.sw.lon);
        let se = Point::new(self.sw.lat, self.ne.lon);
        segments_intersect(a, b, &self.sw, &nw)
            || segments_intersect(a, b, &nw, &self.ne)
            || segments_intersect(a, b, &self.ne, &se)
            || segments_intersect(a, b, &se, &self.sw)
    }
}

/// Converts a metric distance to a latitude delta in degrees.
pub fn meters_to_lat_degrees(m: f64) -> f64 {
    (m / EARTH_RADIUS_M).to_degrees()
}

/// Converts a metric distance to a longitude delta in degrees at `lat`.
pub fn meters_to_lon_degrees(m: f64, lat: f64) -> f64 {
    let cos_lat = lat.to_radians().cos().max(1e-12);
    (m / (EARTH_RADIUS_M * cos_lat)).to_degrees()
}

/// Great-circle distance between two points in metres.
pub fn haversine_m(a: &Point, b: &Point) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let dphi = (b.lat - a.lat).to_radians();
    let dlambda = (b.lon - a.lon).to_radians();

    let h = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Initial bearing from `a` to `b` in radians.
fn bearing_rad(a: &Point, b: &Point) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let dlambda = (b.lon - a.lon).to_radians();

    let y = dlambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();
    y.atan2(x)
}

/// Shortest distance in metres from `p` to the great-circle segment `a`-`b`.
///
/// Projections falling beyond an endpoint clamp to that endpoint, so the
/// result is the true minimum over the segment, not the infinite circle.
pub fn point_to_segment_m(p: &Point, a: &Point, b: &Point) -> f64 {
    let d_ab = haversine_m(a, b);
    if d_ab == 0.0 {
        return haversine_m(p, a);
    }

    let d_ap = haversine_m(a, p);
    if d_ap == 0.0 {
        return 0.0;
    }

    let theta_ab = bearing_rad(a, b);
    let theta_ap = bearing_rad(a, p);
    let delta = theta_ap - theta_ab;

    // Projection falls behind `a`.
    if delta.cos() < 0.0 {
        return d_ap;
    }

    let sigma_ap = d_ap / EARTH_RADIUS_M;
    let xt = (sigma_ap.sin() * delta.sin()).asin();
    let at = (sigma_ap.cos() / xt.cos()).clamp(-1.0, 1.0).acos() * EARTH_RADIUS_M;

    // Projection falls beyond `b`.
    if at > d_ab {
        return haversine_m(p, b);
    }

    (xt * EARTH_RADIUS_M).abs()
}

/// Shortest distance in metres between two segments.
pub fn segment_to_segment_m(a1: &Point, a2: &Point, b1: &Point, b2: &Point) -> f64 {
    if segments_intersect(a1, a2, b1, b2) {
        return 0.0;
    }
    point_to_segment_m(a1, b1, b2)
        .min(point_to_segment_m(a2, b1, b2))
        .min(point_to_segment_m(b1, a1, a2))
        .min(point_to_segment_m(b2, a1, a2))
}

/// Planar cross-product orientation of `c` relative to `a`-`b`.
fn orientation(a: &Point, b: &Point, c: &Point) -> f64 {
    (b.lon - a.lon) * (c.lat - a.lat) - (b.lat - a.lat) * (c.lon - a.lon)
}

fn on_segment(a: &Point, b: &Point, c: &Point) -> bool {
    c.lat >= a.lat.min(b.lat)
        && c.lat <= a.lat.max(b.lat)
        && c.lon >= a.lon.min(b.lon)
        && c.lon <= a.lon.max(b.lon)
}

/// Planar segment intersection in degree space.
///
/// Geofence regions are small enough that degree space is effectively flat
/// for a crossing test; metric precision comes from the distance functions.
pub fn segments_intersect(a1: &Point, a2: &Point, b1: &Point, b2: &Point) -> bool {
    let o1 = orientation(a1, a2, b1);
    let o2 = orientation(a1, a2, b2);
    let o3 = orientation(b1, b2, a1);
    let o4 = orientation(b1, b2, a2);

    if ((o1 > 0.0 && o2 < 0.0) || (o1 < 0.0 && o2 > 0.0))
        && ((o3 > 0.0 && o4 < 0.0) || (o3 < 0.0 && o4 > 0.0))
    {
        return true;
    }

    // Collinear overlap cases.
    (o1 == 0.0 && on_segment(a1, a2, b1))
        || (o2 == 0.0 && on_segment(a1, a2, b2))
        || (o3 == 0.0 && on_segment(b1, b2, a1))
        || (o4 == 0.0 && on_segment(b1, b2, a2))
}

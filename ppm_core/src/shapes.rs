//! Shape catalog - the geographic entities a geofence is built from.
//!
//! Three entity kinds, one uniform capability surface:
//! - `Circle`: a point of interest with a metric radius
//! - `Edge`: a road segment with an influence corridor
//! - `Grid`: an axis-aligned cell, mostly for coverage testing
//!
//! Shapes come from a mapfile of CSV records, one shape per line:
//!
//! ```text
//! # kind,id,geography[,key=value...]
//! circle,1,35.9106;-84.0926,radius=50
//! edge,2,35.910;-84.095:35.911;-84.090,way_type=secondary
//! grid,3,35.90;-84.10:35.91;-84.09,row=4,col=7
//! ```
//!
//! Geography is one or more `lat;lon` points joined by `:`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use thiserror::Error;

use crate::geo::{
    haversine_m, meters_to_lat_degrees, meters_to_lon_degrees, point_to_segment_m,
    segment_to_segment_m, BoundingBox, Point,
};

/// Errors raised while reading or interpreting a mapfile.
#[derive(Debug, Error)]
pub enum ShapeError {
    /// The mapfile could not be opened or read.
    #[error("cannot read mapfile: {0}")]
    Io(#[from] std::io::Error),

    /// A record failed to parse.
    #[error("malformed shape record at line {line}: {reason}")]
    Malformed {
        /// 1-based line number in the mapfile.
        line: usize,
        /// What was wrong with the record.
        reason: String,
    },
}

/// OSM-style road classification for an edge.
///
/// The classification carries a default corridor width, used when a record
/// does not override it with an explicit `width=` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WayType {
    Motorway,
    Trunk,
    Primary,
    Secondary,
    Tertiary,
    Residential,
    Service,
    UserDefined,
}

impl WayType {
    /// Parses a way type name; unknown names map to `UserDefined`.
    pub fn parse(s: &str) -> Self {
        match s {
            "motorway" => Self::Motorway,
            "trunk" => Self::Trunk,
            "primary" => Self::Primary,
            "secondary" => Self::Secondary,
            "tertiary" => Self::Tertiary,
            "residential" => Self::Residential,
            "service" => Self::Service,
            _ => Self::UserDefined,
        }
    }

    /// Default corridor width in metres for this classification.
    pub fn default_width_m(&self) -> f64 {
        match self {
            Self::Motorway => 24.0,
            Self::Trunk => 18.0,
            Self::Primary => 16.0,
            Self::Secondary => 12.0,
            Self::Tertiary => 10.0,
            Self::Residential => 10.0,
            Self::Service => 8.0,
            Self::UserDefined => 10.0,
        }
    }
}

/// A geographic entity in the geofence catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// A point of interest with a metric radius.
    Circle {
        /// Record identifier from the mapfile.
        id: u64,
        /// Centre of the circle.
        center: Point,
        /// Radius in metres, > 0.
        radius_m: f64,
    },
    /// A road segment with an influence corridor of half-width `width_m / 2`.
    Edge {
        /// Record identifier from the mapfile.
        id: u64,
        /// First endpoint.
        a: Point,
        /// Second endpoint.
        b: Point,
        /// Full corridor width in metres, > 0.
        width_m: f64,
        /// Road classification.
        way_type: WayType,
    },
    /// An axis-aligned rectangular cell.
    Grid {
        /// Cell bounds.
        bbox: BoundingBox,
        /// Row index in the source grid.
        row: u32,
        /// Column index in the source grid.
        col: u32,
    },
}

impl Shape {
    /// The axis-aligned bounds of this shape, corridor and radius included.
    pub fn bbox(&self) -> BoundingBox {
        match self {
            Shape::Circle { center, radius_m, .. } => {
                let dlat = meters_to_lat_degrees(*radius_m);
                let dlon = meters_to_lon_degrees(*radius_m, center.lat);
                BoundingBox::new(
                    Point::new(center.lat - dlat, center.lon - dlon),
                    Point::new(center.lat + dlat, center.lon + dlon),
                )
            }
            Shape::Edge { a, b, width_m, .. } => {
                let raw = BoundingBox::new(
                    Point::new(a.lat.min(b.lat), a.lon.min(b.lon)),
                    Point::new(a.lat.max(b.lat), a.lon.max(b.lon)),
                );
                raw.inflate(width_m / 2.0)
            }
            Shape::Grid { bbox, .. } => *bbox,
        }
    }

    /// True when `p` lies within this shape.
    ///
    /// For an edge this means inside the corridor: perpendicular distance
    /// to the segment no greater than half the width.
    pub fn contains(&self, p: &Point) -> bool {
        match self {
            Shape::Circle { center, radius_m, .. } => haversine_m(center, p) <= *radius_m,
            Shape::Edge { a, b, width_m, .. } => point_to_segment_m(p, a, b) <= width_m / 2.0,
            Shape::Grid { bbox, .. } => bbox.contains(p),
        }
    }

    /// True when the segment `a`-`b` touches this shape.
    pub fn intersects_segment(&self, a: &Point, b: &Point) -> bool {
        match self {
            Shape::Circle { center, radius_m, .. } => {
                point_to_segment_m(center, a, b) <= *radius_m
            }
            Shape::Edge {
                a: ea,
                b: eb,
                width_m,
                ..
            } => segment_to_segment_m(a, b, ea, eb) <= width_m / 2.0,
            Shape::Grid { bbox, .. } => bbox.intersects_segment(a, b),
        }
    }
}

/// Reads every shape record from a mapfile.
///
/// Blank lines and lines starting with `#` are skipped. Any malformed
/// record aborts the read; a geofence built from a partially-understood
/// mapfile would silently pass traffic it should not.
pub fn read_mapfile(path: &Path) -> Result<Vec<Shape>, ShapeError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut shapes = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let shape = parse_record(trimmed).map_err(|reason| ShapeError::Malformed {
            line: idx + 1,
            reason,
        })?;
        shapes.push(shape);
    }

    Ok(shapes)
}

/// Parses a single `kind,id,geography[,key=value...]` record.
pub fn parse_record(record: &str) -> Result<Shape, String> {
    let fields: Vec<&str> = record.split(',').map(str::trim).collect();
    if fields.len() < 3 {
        return Err("expected at least kind,id,geography".to_string());
    }

    let kind = fields[0];
    let id: u64 = fields[1]
        .parse()
        .map_err(|_| format!("bad id: {}", fields[1]))?;
    let points = parse_points(fields[2])?;
    let attrs = parse_attributes(&fields[3..])?;

    match kind {
        "circle" => {
            let center = single_point(&points, "circle")?;
            let radius_m = attr_f64(&attrs, "radius")?
                .ok_or_else(|| "circle requires a radius attribute".to_string())?;
            if radius_m <= 0.0 {
                return Err(format!("circle radius must be positive, got {radius_m}"));
            }
            Ok(Shape::Circle { id, center, radius_m })
        }
        "edge" => {
            if points.len() != 2 {
                return Err(format!("edge requires two points, got {}", points.len()));
            }
            let way_type = WayType::parse(attr_str(&attrs, "way_type").unwrap_or("user_defined"));
            let width_m = match attr_f64(&attrs, "width")? {
                Some(w) if w > 0.0 => w,
                Some(w) => return Err(format!("edge width must be positive, got {w}")),
                None => way_type.default_width_m(),
            };
            Ok(Shape::Edge {
                id,
                a: points[0],
                b: points[1],
                width_m,
                way_type,
            })
        }
        "grid" => {
            if points.len() != 2 {
                return Err(format!("grid requires sw:ne points, got {}", points.len()));
            }
            let bbox = BoundingBox::new(points[0], points[1]);
            if !bbox.is_valid() {
                return Err("grid corners are inverted or degenerate".to_string());
            }
            let row = attr_u32(&attrs, "row")?.unwrap_or(0);
            let col = attr_u32(&attrs, "col")?.unwrap_or(0);
            Ok(Shape::Grid { bbox, row, col })
        }
        other => Err(format!("unknown shape kind: {other}")),
    }
}

fn parse_points(geography: &str) -> Result<Vec<Point>, String> {
    geography
        .split(':')
        .map(|part| {
            let mut coords = part.split(';');
            let lat: f64 = coords
                .next()
                .ok_or_else(|| "missing latitude".to_string())?
                .trim()
                .parse()
                .map_err(|_| format!("bad latitude in point: {part}"))?;
            let lon: f64 = coords
                .next()
                .ok_or_else(|| format!("missing longitude in point: {part}"))?
                .trim()
                .parse()
                .map_err(|_| format!("bad longitude in point: {part}"))?;
            if coords.next().is_some() {
                return Err(format!("too many fields in point: {part}"));
            }
            let p = Point::new(lat, lon);
            if !p.is_valid() {
                return Err(format!("point out of range: {part}"));
            }
            Ok(p)
        })
        .collect()
}

fn parse_attributes<'a>(fields: &[&'a str]) -> Result<Vec<(&'a str, &'a str)>, String> {
    fields
        .iter()
        .map(|f| {
            f.split_once('=')
                .map(|(k, v)| (k.trim(), v.trim()))
                .ok_or_else(|| format!("attribute is not key=value: {f}"))
        })
        .collect()
}

fn single_point(points: &[Point], kind: &str) -> Result<Point, String> {
    match points {
        [p] => Ok(*p),
        _ => Err(format!("{kind} requires exactly one point, got {}", points.len())),
    }
}

fn attr_str<'a>(attrs: &[(&'a str, &'a str)], key: &str) -> Option<&'a str> {
    attrs.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

fn attr_f64(attrs: &[(&str, &str)], key: &str) -> Result<Option<f64>, String> {
    attr_str(attrs, key)
        .map(|v| v.parse().map_err(|_| format!("bad numeric attribute {key}={v}")))
        .transpose()
}

fn attr_u32(attrs: &[(&str, &str)], key: &str) -> Result<Option<u32>, String> {
    attr_str(attrs, key)
        .map(|v| v.parse().map_err(|_| format!("bad integer attribute {key}={v}")))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_circle() {
        let shape = parse_record("circle,7,35.9106;-84.0926,radius=50").unwrap();
        match shape {
            Shape::Circle { id, center, radius_m } => {
                assert_eq!(id, 7);
                assert_eq!(center, Point::new(35.9106, -84.0926));
                assert_eq!(radius_m, 50.0);
            }
            other => panic!("expected circle, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_edge_with_default_width() {
        let shape = parse_record("edge,2,35.910;-84.095:35.911;-84.090,way_type=secondary").unwrap();
        match shape {
            Shape::Edge { width_m, way_type, .. } => {
                assert_eq!(way_type, WayType::Secondary);
                assert_eq!(width_m, WayType::Secondary.default_width_m());
            }
            other => panic!("expected edge, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_edge_explicit_width() {
        let shape =
            parse_record("edge,2,35.910;-84.095:35.911;-84.090,way_type=user_defined,width=20")
                .unwrap();
        match shape {
            Shape::Edge { width_m, .. } => assert_eq!(width_m, 20.0),
            other => panic!("expected edge, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_grid() {
        let shape = parse_record("grid,3,35.90;-84.10:35.91;-84.09,row=4,col=7").unwrap();
        match shape {
            Shape::Grid { row, col, bbox } => {
                assert_eq!((row, col), (4, 7));
                assert!(bbox.contains(&Point::new(35.905, -84.095)));
            }
            other => panic!("expected grid, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_record("circle,7").is_err());
        assert!(parse_record("circle,x,35.9;-84.1,radius=50").is_err());
        assert!(parse_record("circle,7,35.9;-84.1").is_err()); // no radius
        assert!(parse_record("circle,7,35.9;-84.1,radius=-5").is_err());
        assert!(parse_record("edge,2,35.910;-84.095,way_type=primary").is_err()); // one point
        assert!(parse_record("pyramid,1,35.9;-84.1,radius=10").is_err());
        assert!(parse_record("circle,7,95.0;-84.1,radius=10").is_err()); // lat out of range
    }

    #[test]
    fn test_edge_corridor_contains() {
        let edge = parse_record("edge,1,35.910;-84.095:35.910;-84.090,width=20").unwrap();

        // On the segment itself.
        assert!(edge.contains(&Point::new(35.910, -84.0925)));
        // ~8 m north of the centreline, inside a 10 m half-width.
        assert!(edge.contains(&Point::new(35.91007, -84.0925)));
        // ~55 m north, outside.
        assert!(!edge.contains(&Point::new(35.9105, -84.0925)));
    }

    #[test]
    fn test_circle_contains_and_bbox() {
        let circle = parse_record("circle,1,35.9106;-84.0926,radius=50").unwrap();
        assert!(circle.contains(&Point::new(35.9106, -84.0926)));
        // ~30 m east.
        assert!(circle.contains(&Point::new(35.9106, -84.09227)));
        // ~550 m east.
        assert!(!circle.contains(&Point::new(35.9106, -84.0865)));

        let bbox = circle.bbox();
        assert!(bbox.contains(&Point::new(35.9106, -84.0926)));
        assert!(bbox.ne.lat > 35.9106 && bbox.sw.lat < 35.9106);
    }

    #[test]
    fn test_segment_intersection_per_kind() {
        let circle = parse_record("circle,1,35.9106;-84.0926,radius=50").unwrap();
        // Passes straight through the centre latitude.
        assert!(circle.intersects_segment(
            &Point::new(35.9106, -84.0950),
            &Point::new(35.9106, -84.0900)
        ));
        assert!(!circle.intersects_segment(
            &Point::new(35.9200, -84.0950),
            &Point::new(35.9200, -84.0900)
        ));

        let grid = parse_record("grid,1,35.90;-84.10:35.91;-84.09").unwrap();
        assert!(grid.intersects_segment(
            &Point::new(35.905, -84.11),
            &Point::new(35.905, -84.08)
        ));
    }

    #[test]
    fn test_read_mapfile() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# test fence").unwrap();
        writeln!(file, "circle,1,35.9106;-84.0926,radius=50").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "edge,2,35.910;-84.095:35.911;-84.090,way_type=primary").unwrap();

        let shapes = read_mapfile(file.path()).unwrap();
        assert_eq!(shapes.len(), 2);
    }

    #[test]
    fn test_read_mapfile_rejects_bad_record() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "circle,1,35.9106;-84.0926,radius=50").unwrap();
        writeln!(file, "edge,oops").unwrap();

        let err = read_mapfile(file.path()).unwrap_err();
        match err {
            ShapeError::Malformed { line, .. } => assert_eq!(line, 2),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_read_mapfile_missing_file() {
        let err = read_mapfile(Path::new("/nonexistent/fence.csv")).unwrap_err();
        assert!(matches!(err, ShapeError::Io(_)));
    }
}

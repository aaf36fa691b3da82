//! Quadtree index over the shape catalog.
//!
//! Region-subdividing spatial index bounded by the geofence rectangle.
//! Answers two queries for the filter policy:
//! - `contains(p)`: does any shape hold this point?
//! - `intersects(a, b)`: does the segment touch any shape?
//!
//! Nodes live in a flat arena (`Vec<Node>`) and reference children by
//! index; shapes live in a flat vector and leaves store shape indices. A
//! shape whose bounds span several quadrants is indexed in each of them.

use thiserror::Error;
use tracing::{debug, warn};

use crate::geo::{BoundingBox, Point};
use crate::shapes::Shape;

/// Maximum shapes in a leaf before it splits.
pub const FANOUT: usize = 4;

/// Maximum subdivision depth; leaves at this depth overflow instead.
pub const MAX_DEPTH: u8 = 16;

/// Errors raised while building the index.
#[derive(Debug, Error)]
pub enum QuadError {
    /// The geofence rectangle is degenerate or inverted.
    #[error("geofence bounds are empty or inverted: sw={sw}, ne={ne}")]
    InvalidBounds {
        /// Configured south-west corner.
        sw: Point,
        /// Configured north-east corner.
        ne: Point,
    },

    /// The shape lies entirely outside the geofence rectangle.
    #[error("shape bounds fall entirely outside the geofence")]
    OutsideFence,

    /// No shape survived insertion; an empty fence must not start.
    #[error("geofence contains no shapes")]
    EmptyFence,
}

#[derive(Debug)]
enum NodeKind {
    Leaf(Vec<usize>),
    /// Children in NW, NE, SW, SE order.
    Internal([usize; 4]),
}

#[derive(Debug)]
struct Node {
    bbox: BoundingBox,
    depth: u8,
    kind: NodeKind,
}

/// Size and shape counters for a built index.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuadStats {
    /// Shapes indexed.
    pub shapes: usize,
    /// Total arena nodes.
    pub nodes: usize,
    /// Leaf nodes.
    pub leaves: usize,
    /// Deepest node created.
    pub max_depth: u8,
}

/// The geofence spatial index.
#[derive(Debug)]
pub struct Quadtree {
    bounds: BoundingBox,
    nodes: Vec<Node>,
    shapes: Vec<Shape>,
}

impl Quadtree {
    /// Creates an empty index over the given geofence rectangle.
    pub fn new(bounds: BoundingBox) -> Result<Self, QuadError> {
        if !bounds.is_valid() {
            return Err(QuadError::InvalidBounds {
                sw: bounds.sw,
                ne: bounds.ne,
            });
        }
        Ok(Self {
            bounds,
            nodes: vec![Node {
                bbox: bounds,
                depth: 0,
                kind: NodeKind::Leaf(Vec::new()),
            }],
            shapes: Vec::new(),
        })
    }

    /// Builds the index from a shape list, skipping (with a warning) any
    /// shape outside the fence. Fails closed when nothing survives.
    pub fn build(bounds: BoundingBox, shapes: Vec<Shape>) -> Result<Self, QuadError> {
        let mut quad = Self::new(bounds)?;
        for shape in shapes {
            if let Err(QuadError::OutsideFence) = quad.insert(shape) {
                warn!("dropping shape outside the geofence rectangle");
            }
        }
        if quad.shapes.is_empty() {
            return Err(QuadError::EmptyFence);
        }
        let stats = quad.stats();
        debug!(
            "geofence index built: {} shapes, {} nodes, depth {}",
            stats.shapes, stats.nodes, stats.max_depth
        );
        Ok(quad)
    }

    /// The geofence rectangle this index covers.
    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    /// Inserts a shape, replicating it into every leaf whose quadrant its
    /// bounds touch. Shapes entirely outside the fence are rejected.
    pub fn insert(&mut self, shape: Shape) -> Result<(), QuadError> {
        let sb = shape.bbox();
        if !self.bounds.intersects(&sb) {
            return Err(QuadError::OutsideFence);
        }

        let shape_idx = self.shapes.len();
        self.shapes.push(shape);

        let mut stack = vec![0usize];
        while let Some(n) = stack.pop() {
            match &self.nodes[n].kind {
                NodeKind::Internal(children) => {
                    let children = *children;
                    for c in children {
                        if self.nodes[c].bbox.intersects(&sb) {
                            stack.push(c);
                        }
                    }
                }
                NodeKind::Leaf(entries) => {
                    if entries.len() < FANOUT || self.nodes[n].depth >= MAX_DEPTH {
                        if let NodeKind::Leaf(entries) = &mut self.nodes[n].kind {
                            entries.push(shape_idx);
                        }
                    } else {
                        self.split(n);
                        stack.push(n);
                    }
                }
            }
        }
        Ok(())
    }

    /// True when any indexed shape contains `p`.
    ///
    /// Descends to the unique leaf holding `p`; points outside the fence
    /// are never contained. Performs no allocation.
    pub fn contains(&self, p: &Point) -> bool {
        if !self.bounds.contains(p) {
            return false;
        }
        let mut n = 0usize;
        loop {
            match &self.nodes[n].kind {
                NodeKind::Internal(children) => {
                    let c = self.nodes[n].bbox.center();
                    n = children[quadrant_of(p, &c)];
                }
                NodeKind::Leaf(entries) => {
                    return entries.iter().any(|&i| self.shapes[i].contains(p));
                }
            }
        }
    }

    /// True when the segment `a`-`b` touches any indexed shape.
    ///
    /// Traverses every quadrant the segment crosses. Performs no
    /// allocation.
    pub fn intersects(&self, a: &Point, b: &Point) -> bool {
        if !self.bounds.intersects_segment(a, b) {
            return false;
        }
        self.segment_query(0, a, b)
    }

    fn segment_query(&self, n: usize, a: &Point, b: &Point) -> bool {
        match &self.nodes[n].kind {
            NodeKind::Internal(children) => children.iter().any(|&c| {
                self.nodes[c].bbox.intersects_segment(a, b) && self.segment_query(c, a, b)
            }),
            NodeKind::Leaf(entries) => entries
                .iter()
                .any(|&i| self.shapes[i].intersects_segment(a, b)),
        }
    }

    /// Counters describing the built index.
    pub fn stats(&self) -> QuadStats {
        let mut stats = QuadStats {
            shapes: self.shapes.len(),
            nodes: self.nodes.len(),
            ..QuadStats::default()
        };
        for node in &self.nodes {
            stats.max_depth = stats.max_depth.max(node.depth);
            if matches!(node.kind, NodeKind::Leaf(_)) {
                stats.leaves += 1;
            }
        }
        stats
    }

    /// Splits leaf `n` into four quadrant children and redistributes its
    /// shapes; each may land in several children.
    fn split(&mut self, n: usize) {
        let entries = match std::mem::replace(&mut self.nodes[n].kind, NodeKind::Leaf(Vec::new())) {
            NodeKind::Leaf(entries) => entries,
            NodeKind::Internal(_) => return,
        };
        let depth = self.nodes[n].depth;
        let boxes = quadrants(&self.nodes[n].bbox);

        let mut children = [0usize; 4];
        for (slot, bbox) in children.iter_mut().zip(boxes) {
            *slot = self.nodes.len();
            self.nodes.push(Node {
                bbox,
                depth: depth + 1,
                kind: NodeKind::Leaf(Vec::new()),
            });
        }

        for shape_idx in entries {
            let sb = self.shapes[shape_idx].bbox();
            for &c in &children {
                if self.nodes[c].bbox.intersects(&sb) {
                    if let NodeKind::Leaf(list) = &mut self.nodes[c].kind {
                        list.push(shape_idx);
                    }
                }
            }
        }

        self.nodes[n].kind = NodeKind::Internal(children);
    }
}

/// The four quadrant boxes of `b`, in NW, NE, SW, SE order.
fn quadrants(b: &BoundingBox) -> [BoundingBox; 4] {
    let c = b.center();
    [
        BoundingBox::new(Point::new(c.lat, b.sw.lon), Point::new(b.ne.lat, c.lon)),
        BoundingBox::new(c, b.ne),
        BoundingBox::new(b.sw, c),
        BoundingBox::new(Point::new(b.sw.lat, c.lon), Point::new(c.lat, b.ne.lon)),
    ]
}

/// Child slot for a point, given the parent centre.
///
/// A point exactly on a quadrant boundary goes to the west then south
/// child, so every point resolves to exactly one leaf.
fn quadrant_of(p: &Point, c: &Point) -> usize {
    let west = p.lon <= c.lon;
    let south = p.lat <= c.lat;
    match (south, west) {
        (false, true) => 0,  // NW
        (false, false) => 1, // NE
        (true, true) => 2,   // SW
        (true, false) => 3,  // SE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::parse_record;

    fn fence() -> BoundingBox {
        BoundingBox::new(Point::new(35.90, -84.10), Point::new(35.92, -84.08))
    }

    #[test]
    fn test_rejects_bad_bounds() {
        let inverted = BoundingBox::new(Point::new(35.92, -84.08), Point::new(35.90, -84.10));
        assert!(matches!(
            Quadtree::new(inverted),
            Err(QuadError::InvalidBounds { .. })
        ));
    }

    #[test]
    fn test_empty_fence_fails_closed() {
        assert!(matches!(
            Quadtree::build(fence(), vec![]),
            Err(QuadError::EmptyFence)
        ));

        // A single out-of-fence shape is dropped, leaving the fence empty.
        let far = parse_record("circle,1,40.0;-80.0,radius=50").unwrap();
        assert!(matches!(
            Quadtree::build(fence(), vec![far]),
            Err(QuadError::EmptyFence)
        ));
    }

    #[test]
    fn test_insert_query_roundtrip() {
        let circle = parse_record("circle,1,35.9106;-84.0926,radius=50").unwrap();
        let edge =
            parse_record("edge,2,35.910;-84.095:35.911;-84.090,width=20").unwrap();
        let grid = parse_record("grid,3,35.915;-84.088:35.918;-84.084").unwrap();

        let quad = Quadtree::build(fence(), vec![circle, edge, grid]).unwrap();

        // Circle centre, edge endpoint, grid interior.
        assert!(quad.contains(&Point::new(35.9106, -84.0926)));
        assert!(quad.contains(&Point::new(35.910, -84.095)));
        assert!(quad.contains(&Point::new(35.916, -84.086)));

        // In the fence but in no shape.
        assert!(!quad.contains(&Point::new(35.919, -84.099)));
        // Outside the fence entirely.
        assert!(!quad.contains(&Point::new(36.0, -84.0)));
    }

    #[test]
    fn test_leaf_splits_past_fanout() {
        let mut shapes = Vec::new();
        for i in 0..(FANOUT + 3) {
            let lat = 35.901 + (i as f64) * 0.002;
            shapes.push(parse_record(&format!("circle,{i},{lat};-84.0926,radius=30")).unwrap());
        }
        let quad = Quadtree::build(fence(), shapes).unwrap();

        let stats = quad.stats();
        assert!(stats.nodes > 1, "expected a split, stats={stats:?}");
        assert_eq!(stats.shapes, FANOUT + 3);

        // Every centre still resolves after redistribution.
        for i in 0..(FANOUT + 3) {
            let lat = 35.901 + (i as f64) * 0.002;
            assert!(quad.contains(&Point::new(lat, -84.0926)), "shape {i} lost");
        }
    }

    #[test]
    fn test_max_depth_overflow_terminates() {
        // Coincident shapes can never be separated by subdivision; the
        // leaf at MAX_DEPTH must absorb the overflow.
        let mut shapes = Vec::new();
        for i in 0..(FANOUT * 3) {
            shapes.push(parse_record(&format!("circle,{i},35.9106;-84.0926,radius=0.1")).unwrap());
        }
        let quad = Quadtree::build(fence(), shapes).unwrap();
        assert!(quad.stats().max_depth <= MAX_DEPTH);
        assert!(quad.contains(&Point::new(35.9106, -84.0926)));
    }

    #[test]
    fn test_boundary_point_resolves_west_south() {
        let c = Point::new(35.91, -84.09);
        assert_eq!(quadrant_of(&c, &c), 2); // both boundaries: SW
        assert_eq!(quadrant_of(&Point::new(35.911, -84.09), &c), 0); // lon tie: west
        assert_eq!(quadrant_of(&Point::new(35.91, -84.089), &c), 3); // lat tie: south
    }

    #[test]
    fn test_segment_query() {
        let edge = parse_record("edge,1,35.910;-84.095:35.911;-84.090,width=20").unwrap();
        let quad = Quadtree::build(fence(), vec![edge]).unwrap();

        // Crosses the corridor even though neither endpoint is inside it.
        assert!(quad.intersects(
            &Point::new(35.9120, -84.0925),
            &Point::new(35.9080, -84.0925)
        ));
        // Parallel track well clear of the corridor.
        assert!(!quad.intersects(
            &Point::new(35.9180, -84.0950),
            &Point::new(35.9180, -84.0900)
        ));
    }

    #[test]
    fn test_shape_spanning_quadrants_found_in_each() {
        // An edge crossing the fence centre is replicated into several
        // quadrants once enough inserts force a split.
        let spanning =
            parse_record("edge,0,35.905;-84.095:35.915;-84.085,width=20").unwrap();
        let mut shapes = vec![spanning];
        for i in 0..FANOUT + 1 {
            let lat = 35.902 + (i as f64) * 0.001;
            shapes.push(parse_record(&format!("circle,{i},{lat};-84.099,radius=20")).unwrap());
        }
        let quad = Quadtree::build(fence(), shapes).unwrap();

        assert!(quad.contains(&Point::new(35.905, -84.095)));
        assert!(quad.contains(&Point::new(35.915, -84.085)));
        assert!(quad.contains(&Point::new(35.910, -84.090)));
    }
}

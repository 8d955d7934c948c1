//! Projected integer grid for polygon tests.
//!
//! Coordinates are projected into a `2^30`-wide integer grid; every
//! polygon/rectangle predicate the cover algorithms use runs on integers
//! only, so two nodes always agree on whether a cell intersects a polygon.

use crate::error::{NodeError, Result};
use crate::model::{Coordinates, SpatialRange};

pub const GRID_BITS: u32 = 30;
pub const GRID_WIDTH: i64 = 1 << GRID_BITS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridPoint {
    pub x: i64,
    pub y: i64,
}

/// Project a coordinate into the grid. `y` grows southward so rectangles
/// read top-down like the cell decoding does.
pub fn project(c: Coordinates) -> GridPoint {
    let (lat, lon) = super::normalize(c.lat, c.lon);
    let x = ((lon + 180.0) * GRID_WIDTH as f64 / 360.0) as i64;
    let y = ((90.0 - lat) * GRID_WIDTH as f64 / 180.0) as i64;
    GridPoint { x, y }
}

/// An axis-aligned grid rectangle anchored at its upper-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridRect {
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
}

impl GridRect {
    pub fn from_range(range: &SpatialRange) -> GridRect {
        let (upper_left, lower_right) = range.corner_points();
        let ul = project(upper_left);
        let lr = project(lower_right);
        GridRect {
            x: ul.x,
            y: ul.y,
            w: lr.x - ul.x,
            h: lr.y - ul.y,
        }
    }

    pub fn contains_point(&self, p: GridPoint) -> bool {
        p.x >= self.x && p.x <= self.x + self.w && p.y >= self.y && p.y <= self.y + self.h
    }

    pub fn contains_rect(&self, other: &GridRect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x + other.w <= self.x + self.w
            && other.y + other.h <= self.y + self.h
    }

    pub fn overlaps(&self, other: &GridRect) -> bool {
        self.x <= other.x + other.w
            && other.x <= self.x + self.w
            && self.y <= other.y + other.h
            && other.y <= self.y + self.h
    }

    pub fn corners(&self) -> [GridPoint; 4] {
        [
            GridPoint { x: self.x, y: self.y },
            GridPoint { x: self.x + self.w, y: self.y },
            GridPoint { x: self.x + self.w, y: self.y + self.h },
            GridPoint { x: self.x, y: self.y + self.h },
        ]
    }

    fn edges(&self) -> [(GridPoint, GridPoint); 4] {
        let [a, b, c, d] = self.corners();
        [(a, b), (b, c), (c, d), (d, a)]
    }
}

/// A polygon projected onto the grid, with its bounding box cached.
#[derive(Debug, Clone)]
pub struct GridPolygon {
    points: Vec<GridPoint>,
    bounds: GridRect,
}

impl GridPolygon {
    pub fn new(coords: &[Coordinates]) -> Result<GridPolygon> {
        if coords.is_empty() {
            return Err(NodeError::Validation("empty polygon".into()));
        }
        let points: Vec<GridPoint> = coords.iter().map(|&c| project(c)).collect();
        let mut min_x = i64::MAX;
        let mut max_x = i64::MIN;
        let mut min_y = i64::MAX;
        let mut max_y = i64::MIN;
        for p in &points {
            min_x = min_x.min(p.x);
            max_x = max_x.max(p.x);
            min_y = min_y.min(p.y);
            max_y = max_y.max(p.y);
        }
        Ok(GridPolygon {
            points,
            bounds: GridRect {
                x: min_x,
                y: min_y,
                w: max_x - min_x,
                h: max_y - min_y,
            },
        })
    }

    pub fn bounds(&self) -> GridRect {
        self.bounds
    }

    /// Even-odd interior test by horizontal ray casting. Comparisons are
    /// cross-multiplied so no division ever happens.
    pub fn contains_point(&self, p: GridPoint) -> bool {
        let n = self.points.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let a = self.points[i];
            let b = self.points[j];
            if (a.y > p.y) != (b.y > p.y) {
                let lhs = (p.x - a.x) * (b.y - a.y);
                let rhs = (b.x - a.x) * (p.y - a.y);
                let crossed = if b.y > a.y { lhs < rhs } else { lhs > rhs };
                if crossed {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    pub fn intersects_rect(&self, rect: &GridRect) -> bool {
        if !self.bounds.overlaps(rect) {
            return false;
        }
        if rect.corners().iter().any(|&c| self.contains_point(c)) {
            return true;
        }
        if self.points.iter().any(|&p| rect.contains_point(p)) {
            return true;
        }
        self.any_edge_crosses(rect)
    }

    /// Whether the polygon fully contains the rectangle. Conservative on
    /// boundary contact: a `false` here only means the caller keeps
    /// refining.
    pub fn contains_rect(&self, rect: &GridRect) -> bool {
        if !rect.corners().iter().all(|&c| self.contains_point(c)) {
            return false;
        }
        !self.any_edge_crosses(rect)
    }

    fn any_edge_crosses(&self, rect: &GridRect) -> bool {
        let n = self.points.len();
        for i in 0..n {
            let a = self.points[i];
            let b = self.points[(i + 1) % n];
            for (c, d) in rect.edges() {
                if segments_intersect(a, b, c, d) {
                    return true;
                }
            }
        }
        false
    }
}

fn orient(a: GridPoint, b: GridPoint, c: GridPoint) -> i64 {
    ((b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)).signum()
}

fn on_segment(a: GridPoint, b: GridPoint, p: GridPoint) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

fn segments_intersect(a: GridPoint, b: GridPoint, c: GridPoint, d: GridPoint) -> bool {
    let o1 = orient(a, b, c);
    let o2 = orient(a, b, d);
    let o3 = orient(c, d, a);
    let o4 = orient(c, d, b);
    if o1 != o2 && o3 != o4 {
        return true;
    }
    (o1 == 0 && on_segment(a, b, c))
        || (o2 == 0 && on_segment(a, b, d))
        || (o3 == 0 && on_segment(c, d, a))
        || (o4 == 0 && on_segment(c, d, b))
}

use serde::{Deserialize, Serialize};

use crate::geometry::Position;

/// Axis-aligned lng/lat bounding box.
///
/// Serialized as `[[min_lng, min_lat], [max_lng, max_lat]]`, the layout used by
/// chunk manifests.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[[f64; 2]; 2]", into = "[[f64; 2]; 2]")]
pub struct BBox {
    pub min: Position,
    pub max: Position,
}

impl BBox {
    pub fn new(min: Position, max: Position) -> Self {
        BBox { min, max }
    }

    pub fn from_point(p: Position) -> Self {
        BBox { min: p, max: p }
    }

    pub fn min_lng(&self) -> f64 {
        self.min[0]
    }

    pub fn min_lat(&self) -> f64 {
        self.min[1]
    }

    pub fn max_lng(&self) -> f64 {
        self.max[0]
    }

    pub fn max_lat(&self) -> f64 {
        self.max[1]
    }

    /// Grow the box to include `p`.
    pub fn extend(&mut self, p: Position) {
        self.min[0] = self.min[0].min(p[0]);
        self.min[1] = self.min[1].min(p[1]);
        self.max[0] = self.max[0].max(p[0]);
        self.max[1] = self.max[1].max(p[1]);
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox::new(
            [self.min[0].min(other.min[0]), self.min[1].min(other.min[1])],
            [self.max[0].max(other.max[0]), self.max[1].max(other.max[1])],
        )
    }

    /// Inclusive overlap test: boxes that only share an edge or a corner intersect.
    pub fn intersects(&self, other: &BBox) -> bool {
        self.min[0] <= other.max[0]
            && self.max[0] >= other.min[0]
            && self.min[1] <= other.max[1]
            && self.max[1] >= other.min[1]
    }

    pub fn contains(&self, p: Position) -> bool {
        p[0] >= self.min[0] && p[0] <= self.max[0] && p[1] >= self.min[1] && p[1] <= self.max[1]
    }

    /// Pad every side by `degrees`. Negative padding is treated as zero.
    pub fn expand(&self, degrees: f64) -> BBox {
        let d = if degrees.is_finite() { degrees.max(0.0) } else { 0.0 };
        BBox::new(
            [self.min[0] - d, self.min[1] - d],
            [self.max[0] + d, self.max[1] + d],
        )
    }

    pub fn center(&self) -> Position {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
        ]
    }
}

impl From<[[f64; 2]; 2]> for BBox {
    fn from(v: [[f64; 2]; 2]) -> Self {
        BBox::new(v[0], v[1])
    }
}

impl From<BBox> for [[f64; 2]; 2] {
    fn from(b: BBox) -> Self {
        [b.min, b.max]
    }
}

/// Free-function form of [`BBox::intersects`].
pub fn intersects_bounds(a: &BBox, b: &BBox) -> bool {
    a.intersects(b)
}

//! Polygon geometry over lng/lat positions.
//!
//! Boundary chunks only carry `Polygon` and `MultiPolygon` features, so the
//! geometry type is closed over those two shapes. Coordinate traversal goes
//! through [`CoordinateTree`], which is implemented for every nesting depth.

use crate::bounds::BBox;

/// `[lng, lat]` in degrees.
pub type Position = [f64; 2];

/// A linear ring. Closure (first == last) is optional.
pub type Ring = Vec<Position>;

/// Outer ring first, then holes.
pub type PolygonRings = Vec<Ring>;

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Polygon(PolygonRings),
    MultiPolygon(Vec<PolygonRings>),
}

impl Geometry {
    pub fn kind(&self) -> &'static str {
        match self {
            Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPolygon(_) => "MultiPolygon",
        }
    }

    /// Outer ring of every polygon part, in order. Parts without rings are skipped.
    pub fn outer_rings(&self) -> Vec<&[Position]> {
        match self {
            Geometry::Polygon(rings) => rings.first().map(|r| r.as_slice()).into_iter().collect(),
            Geometry::MultiPolygon(polys) => polys
                .iter()
                .filter_map(|rings| rings.first().map(|r| r.as_slice()))
                .collect(),
        }
    }
}

/// Anything that bottoms out in `[lng, lat]` leaves.
pub trait CoordinateTree {
    /// Fold every finite leaf into `acc`. Non-finite leaves are ignored.
    fn extend_bounds(&self, acc: &mut Option<BBox>);
}

impl CoordinateTree for Position {
    fn extend_bounds(&self, acc: &mut Option<BBox>) {
        if !self[0].is_finite() || !self[1].is_finite() {
            return;
        }
        match acc {
            Some(b) => b.extend(*self),
            None => *acc = Some(BBox::from_point(*self)),
        }
    }
}

impl<T: CoordinateTree> CoordinateTree for [T] {
    fn extend_bounds(&self, acc: &mut Option<BBox>) {
        for child in self {
            child.extend_bounds(acc);
        }
    }
}

impl<T: CoordinateTree> CoordinateTree for Vec<T> {
    fn extend_bounds(&self, acc: &mut Option<BBox>) {
        self.as_slice().extend_bounds(acc);
    }
}

impl CoordinateTree for Geometry {
    fn extend_bounds(&self, acc: &mut Option<BBox>) {
        match self {
            Geometry::Polygon(rings) => rings.extend_bounds(acc),
            Geometry::MultiPolygon(polys) => polys.extend_bounds(acc),
        }
    }
}

/// Bounds of every finite leaf position.
///
/// Returns `None` when the tree holds no finite position (empty or malformed
/// geometry). Callers must skip such features rather than assume `[0, 0]`.
pub fn compute_bounds<T: CoordinateTree + ?Sized>(coords: &T) -> Option<BBox> {
    let mut acc = None;
    coords.extend_bounds(&mut acc);
    acc
}

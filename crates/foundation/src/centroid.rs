use crate::geometry::{Geometry, Position};

/// Centroid of a single ring together with its unsigned area.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RingCentroid {
    pub centroid: Position,
    /// Area magnitude in squared degrees. Zero for degenerate rings.
    pub area: f64,
}

/// Shoelace centroid of a ring.
///
/// The ring is closed implicitly (the last vertex pairs with the first), so an
/// explicit closing vertex is harmless. Degenerate rings (zero signed area)
/// fall back to the arithmetic mean of the given vertices with `area == 0`.
///
/// Returns `None` for an empty ring or a non-finite result.
pub fn ring_centroid(ring: &[Position]) -> Option<RingCentroid> {
    let last = ring.last()?;

    let mut area2 = 0.0;
    let mut sx = 0.0;
    let mut sy = 0.0;
    let mut prev = *last;
    for &cur in ring {
        let [xj, yj] = prev;
        let [xi, yi] = cur;
        let cross = xj * yi - xi * yj;
        area2 += cross;
        sx += (xj + xi) * cross;
        sy += (yj + yi) * cross;
        prev = cur;
    }

    let area = area2 / 2.0;
    let out = if area == 0.0 {
        let n = ring.len() as f64;
        let (mx, my) = ring
            .iter()
            .fold((0.0, 0.0), |(ax, ay), p| (ax + p[0], ay + p[1]));
        RingCentroid {
            centroid: [mx / n, my / n],
            area: 0.0,
        }
    } else {
        RingCentroid {
            centroid: [sx / (6.0 * area), sy / (6.0 * area)],
            area: area.abs(),
        }
    };

    if out.centroid[0].is_finite() && out.centroid[1].is_finite() && out.area.is_finite() {
        Some(out)
    } else {
        None
    }
}

/// Label point for a polygonal geometry.
///
/// Holes are ignored: a `Polygon` uses its outer ring only, and a
/// `MultiPolygon` takes the area-weighted mean of its parts' outer-ring
/// centroids. A `MultiPolygon` whose parts are all degenerate has no centroid.
pub fn compute_centroid(geometry: &Geometry) -> Option<Position> {
    match geometry {
        Geometry::Polygon(rings) => {
            let outer = rings.first()?;
            ring_centroid(outer).map(|c| c.centroid)
        }
        Geometry::MultiPolygon(_) => {
            let mut total = 0.0;
            let mut cx = 0.0;
            let mut cy = 0.0;
            for ring in geometry.outer_rings() {
                let Some(part) = ring_centroid(ring) else {
                    continue;
                };
                total += part.area;
                cx += part.centroid[0] * part.area;
                cy += part.centroid[1] * part.area;
            }
            if total == 0.0 {
                return None;
            }
            Some([cx / total, cy / total])
        }
    }
}

//! Owner-region neighbor graph from chunk bounding boxes.
//!
//! Two regions are neighbors when any of their chunks' bboxes intersect
//! (touching edges included). Bbox overlap over-approximates true polygon
//! adjacency; that is accepted for legend scoping and needs no loaded geometry.

use std::collections::{BTreeMap, BTreeSet};

use crate::manifest::ChunkManifest;

pub type NeighborMap = BTreeMap<String, BTreeSet<String>>;

/// Pairwise O(n²) over non-border chunks.
///
/// Every non-border owner region gets a key, possibly with no neighbors. Chunks
/// of the same owner are never compared.
pub fn build_region_adjacency(manifest: &ChunkManifest) -> NeighborMap {
    let chunks: Vec<_> = manifest.regular_chunks().collect();

    let mut neighbors: NeighborMap = BTreeMap::new();
    for c in &chunks {
        neighbors.entry(c.owner_region_id.clone()).or_default();
    }

    for (i, a) in chunks.iter().enumerate() {
        for b in &chunks[i + 1..] {
            if a.owner_region_id == b.owner_region_id {
                continue;
            }
            if !a.bbox.intersects(&b.bbox) {
                continue;
            }
            if let Some(set) = neighbors.get_mut(&a.owner_region_id) {
                set.insert(b.owner_region_id.clone());
            }
            if let Some(set) = neighbors.get_mut(&b.owner_region_id) {
                set.insert(a.owner_region_id.clone());
            }
        }
    }

    neighbors
}

/// `region` plus its neighbors; empty when the region is unknown.
pub fn legend_scope(neighbors: &NeighborMap, region: &str) -> BTreeSet<String> {
    let Some(adjacent) = neighbors.get(region) else {
        return BTreeSet::new();
    };
    let mut scope = adjacent.clone();
    scope.insert(region.to_string());
    scope
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use foundation::BBox;
    use formats::FeatureCollection;
    use pretty_assertions::assert_eq;

    use super::{build_region_adjacency, legend_scope};
    use crate::error::ChunkSourceError;
    use crate::manifest::{BoxFuture, ChunkLoader, ChunkManifest, ChunkMeta};

    struct NoopLoader;

    impl ChunkLoader for NoopLoader {
        fn load(&self) -> BoxFuture<'_, Result<FeatureCollection, ChunkSourceError>> {
            Box::pin(async { Ok(FeatureCollection::default()) })
        }
    }

    fn chunk(id: &str, owner: &str, min: [f64; 2], max: [f64; 2]) -> ChunkMeta {
        ChunkMeta::new(id, owner, id, BBox::new(min, max), Arc::new(NoopLoader))
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn overlapping_regions_are_mutual_neighbors() {
        let m = ChunkManifest::new(
            "XX",
            vec![
                chunk("A", "1", [0.0, 0.0], [1.0, 1.0]),
                chunk("B", "2", [0.5, 0.5], [1.5, 1.5]),
                chunk("C", "3", [5.0, 5.0], [6.0, 6.0]),
            ],
        );
        let n = build_region_adjacency(&m);
        assert_eq!(n.len(), 3);
        assert_eq!(n["1"], set(&["2"]));
        assert_eq!(n["2"], set(&["1"]));
        assert_eq!(n["3"], set(&[]));
    }

    #[test]
    fn graph_is_symmetric_and_excludes_border() {
        let m = ChunkManifest::new(
            "XX",
            vec![
                chunk("a0", "1", [0.0, 0.0], [1.0, 1.0]),
                chunk("a1", "1", [0.9, 0.0], [2.0, 1.0]),
                chunk("b0", "2", [2.0, 0.0], [3.0, 1.0]),
                chunk("c0", "3", [3.0, 1.0], [4.0, 2.0]),
                chunk("d0", "4", [-1.0, 3.0], [0.0, 4.0]),
                chunk("edge", "border", [-10.0, -10.0], [10.0, 10.0]),
            ],
        );
        let n = build_region_adjacency(&m);

        assert!(!n.contains_key("border"));
        for (r1, adjacent) in &n {
            assert!(!adjacent.contains("border"));
            assert!(!adjacent.contains(r1), "{r1} lists itself");
            for r2 in adjacent {
                assert!(n[r2].contains(r1), "{r1} -> {r2} is not mirrored");
            }
        }
        // a1 touches b0 at x=2; b0 touches c0 at the corner (3, 1).
        assert_eq!(n["1"], set(&["2"]));
        assert_eq!(n["2"], set(&["1", "3"]));
        assert_eq!(n["4"], set(&[]));
    }

    #[test]
    fn legend_scope_includes_self() {
        let m = ChunkManifest::new(
            "XX",
            vec![
                chunk("A", "1", [0.0, 0.0], [1.0, 1.0]),
                chunk("B", "2", [1.0, 0.0], [2.0, 1.0]),
            ],
        );
        let n = build_region_adjacency(&m);
        assert_eq!(legend_scope(&n, "1"), set(&["1", "2"]));
        assert!(legend_scope(&n, "border").is_empty());
    }
}

//! Per-region boundary cache.
//!
//! Chunks are materialized on demand and indexed by sub-area key so lookups
//! are plain map reads. Consumers share one [`RegionCache`] (it is a cheap
//! `Arc` handle) and never trigger loading through lookups.
//!
//! Concurrency contract:
//! - Loads requested in one call run concurrently and may finish in any order.
//! - A chunk's features are merged under a single write lock together with its
//!   "loaded" mark, so a chunk is either fully indexed or not at all.
//! - A chunk id already being fetched is awaited, never fetched twice.
//! - Viewport requests carry a generation; a request overtaken by a newer one
//!   reports [`ViewportLoad::Superseded`] instead of its chunk list.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use formats::{AreaFeature, FeatureCollection};
use foundation::{BBox, Position, compute_bounds, compute_centroid};
use futures_util::future::{FutureExt, Shared, join_all};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::adjacency::{NeighborMap, build_region_adjacency, legend_scope};
use crate::config::ChunkCacheConfig;
use crate::error::ChunkLoadError;
use crate::manifest::{BoxFuture, ChunkManifest, ChunkMeta, ChunkSummary};

type SharedLoad = Shared<BoxFuture<'static, Result<(), ChunkLoadError>>>;

/// Outcome of [`RegionCache::ensure_chunks_for_viewport`].
#[derive(Debug, Clone, PartialEq)]
pub enum ViewportLoad {
    /// Chunks relevant to the requested viewport, all resident.
    Current {
        generation: u64,
        chunks: Vec<ChunkSummary>,
    },
    /// A newer viewport request started while this one was loading.
    Superseded { generation: u64 },
}

impl ViewportLoad {
    pub fn chunks(&self) -> Option<&[ChunkSummary]> {
        match self {
            ViewportLoad::Current { chunks, .. } => Some(chunks),
            ViewportLoad::Superseded { .. } => None,
        }
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, ViewportLoad::Superseded { .. })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegionCacheStats {
    pub loaded_chunks: usize,
    pub inflight_chunks: usize,
    pub features: usize,
    pub with_bounds: usize,
    pub with_centroid: usize,
}

#[derive(Debug, Default)]
struct RegionIndex {
    loaded_chunk_ids: BTreeSet<String>,
    features: HashMap<String, Arc<AreaFeature>>,
    bounds: HashMap<String, BBox>,
    centroids: HashMap<String, Position>,
    owner_region_name_by_area: HashMap<String, String>,
    owner_region_id_by_area: HashMap<String, String>,
    /// Each resident chunk's own view of its sub-areas.
    chunk_to_areas: HashMap<String, BTreeMap<String, ChunkArea>>,
    area_key_to_chunk_id: HashMap<String, String>,
}

/// A sub-area as one chunk describes it.
#[derive(Debug, Clone)]
struct ChunkArea {
    feature: Arc<AreaFeature>,
    owner_region_id: String,
    owner_region_name: String,
}

/// Geometry products computed outside the index lock.
struct PreparedArea {
    feature: Arc<AreaFeature>,
    owner_region_id: String,
    owner_region_name: String,
    /// `None` when the key already had products before this load started.
    products: Option<(Option<BBox>, Option<Position>)>,
}

impl RegionIndex {
    fn is_loaded(&self, chunk_id: &str) -> bool {
        self.loaded_chunk_ids.contains(chunk_id)
    }

    fn has_products(&self, key: &str) -> bool {
        self.bounds.contains_key(key) || self.centroids.contains_key(key)
    }

    fn mark_empty_loaded(&mut self, chunk_id: &str) {
        self.loaded_chunk_ids.insert(chunk_id.to_string());
        self.chunk_to_areas.entry(chunk_id.to_string()).or_default();
    }

    fn merge(&mut self, chunk_id: &str, areas: Vec<PreparedArea>) {
        let own = self.chunk_to_areas.entry(chunk_id.to_string()).or_default();
        for area in &areas {
            own.insert(
                area.feature.key().to_string(),
                ChunkArea {
                    feature: Arc::clone(&area.feature),
                    owner_region_id: area.owner_region_id.clone(),
                    owner_region_name: area.owner_region_name.clone(),
                },
            );
        }

        for area in areas {
            let key = area.feature.key().to_string();
            if let Some((bounds, centroid)) = area.products {
                // Another chunk may have indexed the key while this one was in flight.
                if !self.bounds.contains_key(&key) && !self.centroids.contains_key(&key) {
                    if let Some(b) = bounds {
                        self.bounds.insert(key.clone(), b);
                    }
                    if let Some(c) = centroid {
                        self.centroids.insert(key.clone(), c);
                    }
                }
            }
            self.owner_region_id_by_area
                .insert(key.clone(), area.owner_region_id);
            self.owner_region_name_by_area
                .insert(key.clone(), area.owner_region_name);
            self.area_key_to_chunk_id
                .insert(key.clone(), chunk_id.to_string());
            self.features.insert(key, area.feature);
        }

        self.loaded_chunk_ids.insert(chunk_id.to_string());
    }

    fn remove_chunk(&mut self, chunk_id: &str) {
        self.loaded_chunk_ids.remove(chunk_id);
        let Some(areas) = self.chunk_to_areas.remove(chunk_id) else {
            return;
        };

        for key in areas.into_keys() {
            // A sub-area split across chunks stays while another resident chunk lists it,
            // and takes that chunk's feature and owner.
            let survivor = self
                .chunk_to_areas
                .iter()
                .filter(|(id, _)| self.loaded_chunk_ids.contains(*id))
                .find_map(|(id, own)| own.get(&key).map(|area| (id.clone(), area.clone())));
            match survivor {
                Some((owner_chunk, area)) => {
                    self.owner_region_id_by_area
                        .insert(key.clone(), area.owner_region_id);
                    self.owner_region_name_by_area
                        .insert(key.clone(), area.owner_region_name);
                    self.features.insert(key.clone(), area.feature);
                    self.area_key_to_chunk_id.insert(key, owner_chunk);
                }
                None => {
                    self.features.remove(&key);
                    self.bounds.remove(&key);
                    self.centroids.remove(&key);
                    self.owner_region_id_by_area.remove(&key);
                    self.owner_region_name_by_area.remove(&key);
                    self.area_key_to_chunk_id.remove(&key);
                }
            }
        }
    }
}

struct Inner {
    manifest: Arc<ChunkManifest>,
    neighbors: NeighborMap,
    config: ChunkCacheConfig,
    index: RwLock<RegionIndex>,
    inflight: Mutex<HashMap<String, SharedLoad>>,
    generation: AtomicU64,
}

/// Boundary cache for one region code.
#[derive(Clone)]
pub struct RegionCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RegionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionCache")
            .field("region_code", &self.region_code())
            .field("stats", &self.stats())
            .finish()
    }
}

impl RegionCache {
    /// Builds the neighbor graph once; nothing is loaded yet.
    pub fn new(manifest: Arc<ChunkManifest>, config: ChunkCacheConfig) -> Self {
        let neighbors = build_region_adjacency(&manifest);
        debug!(
            "region {}: {} chunks, {} owner regions",
            manifest.region_code(),
            manifest.len(),
            neighbors.len()
        );
        Self {
            inner: Arc::new(Inner {
                manifest,
                neighbors,
                config,
                index: RwLock::new(RegionIndex::default()),
                inflight: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn region_code(&self) -> &str {
        self.inner.manifest.region_code()
    }

    pub fn manifest(&self) -> &ChunkManifest {
        &self.inner.manifest
    }

    pub fn config(&self) -> &ChunkCacheConfig {
        &self.inner.config
    }

    pub fn neighbors_by_owner_region(&self) -> &NeighborMap {
        &self.inner.neighbors
    }

    pub fn neighbors(&self, owner_region_id: &str) -> Option<&BTreeSet<String>> {
        self.inner.neighbors.get(owner_region_id)
    }

    /// The region plus its bbox neighbors, for scoping legend ranges.
    pub fn legend_scope(&self, owner_region_id: &str) -> BTreeSet<String> {
        legend_scope(&self.inner.neighbors, owner_region_id)
    }

    /// Make every listed chunk resident.
    ///
    /// All loads are issued together and awaited as a group. Chunks that are
    /// resident return immediately; chunks already in flight are awaited. The
    /// border chunk is marked loaded with no features and never fetched.
    ///
    /// The first error (in request order of discovery) is returned after every
    /// load has settled; successfully loaded chunks stay resident.
    pub async fn ensure_chunks_loaded<S: AsRef<str>>(
        &self,
        chunk_ids: &[S],
    ) -> Result<(), ChunkLoadError> {
        let mut first_err: Option<ChunkLoadError> = None;
        let mut pending: Vec<SharedLoad> = Vec::new();

        for id in chunk_ids {
            match self.load_handle(id.as_ref()) {
                Ok(Some(load)) => pending.push(load),
                Ok(None) => {}
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }

        for result in join_all(pending).await {
            if let Err(e) = result {
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Load every non-border chunk whose bbox meets `bounds` padded by
    /// `padding_deg`, and describe them.
    pub async fn ensure_chunks_for_viewport(
        &self,
        bounds: BBox,
        padding_deg: f64,
    ) -> Result<ViewportLoad, ChunkLoadError> {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let padded = bounds.expand(padding_deg);

        let chunks: Vec<ChunkSummary> = self
            .inner
            .manifest
            .regular_chunks()
            .filter(|c| c.bbox.intersects(&padded))
            .map(ChunkMeta::summary)
            .collect();
        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();

        self.ensure_chunks_loaded(&ids[..]).await?;

        let latest = self.inner.generation.load(Ordering::SeqCst);
        if latest != generation {
            debug!(
                "region {}: viewport generation {generation} superseded by {latest}",
                self.region_code()
            );
            return Ok(ViewportLoad::Superseded { generation });
        }
        Ok(ViewportLoad::Current { generation, chunks })
    }

    /// Drop every resident chunk not in `keep`, with all of its sub-areas.
    ///
    /// Returns the pruned chunk ids in sorted order.
    pub fn prune_chunks(&self, keep: &HashSet<String>) -> Vec<String> {
        let mut index = self.inner.index.write();
        let doomed: Vec<String> = index
            .loaded_chunk_ids
            .iter()
            .filter(|id| !keep.contains(*id))
            .cloned()
            .collect();
        for id in &doomed {
            index.remove_chunk(id);
        }
        if !doomed.is_empty() {
            debug!(
                "region {}: pruned {} chunks, {} features remain",
                self.region_code(),
                doomed.len(),
                index.features.len()
            );
        }
        doomed
    }

    pub fn feature(&self, key: &str) -> Option<Arc<AreaFeature>> {
        self.inner.index.read().features.get(key).cloned()
    }

    pub fn bounds(&self, key: &str) -> Option<BBox> {
        self.inner.index.read().bounds.get(key).copied()
    }

    pub fn centroid(&self, key: &str) -> Option<Position> {
        self.inner.index.read().centroids.get(key).copied()
    }

    pub fn owner_region_name(&self, key: &str) -> Option<String> {
        self.inner
            .index
            .read()
            .owner_region_name_by_area
            .get(key)
            .cloned()
    }

    pub fn owner_region_id(&self, key: &str) -> Option<String> {
        self.inner
            .index
            .read()
            .owner_region_id_by_area
            .get(key)
            .cloned()
    }

    pub fn chunk_for_area(&self, key: &str) -> Option<String> {
        self.inner
            .index
            .read()
            .area_key_to_chunk_id
            .get(key)
            .cloned()
    }

    /// Sorted sub-area keys of a resident chunk.
    pub fn area_keys_for_chunk(&self, chunk_id: &str) -> Vec<String> {
        self.inner
            .index
            .read()
            .chunk_to_areas
            .get(chunk_id)
            .map(|areas| areas.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_chunk_loaded(&self, chunk_id: &str) -> bool {
        self.inner.index.read().is_loaded(chunk_id)
    }

    pub fn loaded_chunk_ids(&self) -> Vec<String> {
        self.inner
            .index
            .read()
            .loaded_chunk_ids
            .iter()
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> RegionCacheStats {
        let inflight_chunks = self.inner.inflight.lock().len();
        let index = self.inner.index.read();
        RegionCacheStats {
            loaded_chunks: index.loaded_chunk_ids.len(),
            inflight_chunks,
            features: index.features.len(),
            with_bounds: index.bounds.len(),
            with_centroid: index.centroids.len(),
        }
    }

    /// `Ok(None)` when there is nothing to wait for.
    fn load_handle(&self, chunk_id: &str) -> Result<Option<SharedLoad>, ChunkLoadError> {
        let Some(meta) = self.inner.manifest.get(chunk_id) else {
            return Err(ChunkLoadError::UnknownChunk {
                chunk_id: chunk_id.to_string(),
            });
        };

        if self.inner.manifest.is_border(meta) {
            self.inner.index.write().mark_empty_loaded(chunk_id);
            return Ok(None);
        }

        // Residency is checked under the in-flight lock; a finishing load marks
        // the chunk loaded before it leaves the in-flight map.
        let mut inflight = self.inner.inflight.lock();
        if self.inner.index.read().is_loaded(chunk_id) {
            return Ok(None);
        }
        if let Some(existing) = inflight.get(chunk_id) {
            return Ok(Some(existing.clone()));
        }

        let load = load_chunk(
            Arc::downgrade(&self.inner),
            meta.clone(),
            self.inner.config.clone(),
        )
        .boxed()
        .shared();
        inflight.insert(chunk_id.to_string(), load.clone());
        Ok(Some(load))
    }
}

/// Holds only a weak handle while the fetch is pending, so an in-flight entry
/// whose callers all went away does not keep the cache alive.
async fn load_chunk(
    inner: Weak<Inner>,
    meta: ChunkMeta,
    config: ChunkCacheConfig,
) -> Result<(), ChunkLoadError> {
    let fetched = fetch(&meta, &config).await;
    let Some(inner) = inner.upgrade() else {
        return Err(ChunkLoadError::Fetch {
            chunk_id: meta.id,
            message: "region cache was dropped".to_string(),
        });
    };

    let outcome = fetched.map(|collection| {
        let areas = prepare_areas(&inner.index, &meta, collection);
        let count = areas.len();
        inner.index.write().merge(&meta.id, areas);
        debug!(
            "region {}: chunk {} resident with {count} features",
            inner.manifest.region_code(),
            meta.id
        );
    });
    inner.inflight.lock().remove(&meta.id);
    if let Err(e) = &outcome {
        warn!("region {}: {e}", inner.manifest.region_code());
    }
    outcome
}

async fn fetch(
    meta: &ChunkMeta,
    config: &ChunkCacheConfig,
) -> Result<FeatureCollection, ChunkLoadError> {
    let fetch = meta.loader.load();
    let fetched = match config.load_timeout() {
        Some(limit) => match tokio::time::timeout(limit, fetch).await {
            Ok(r) => r,
            Err(_) => {
                return Err(ChunkLoadError::TimedOut {
                    chunk_id: meta.id.clone(),
                    timeout_ms: config.load_timeout_ms,
                });
            }
        },
        None => fetch.await,
    };
    fetched.map_err(|e| ChunkLoadError::Fetch {
        chunk_id: meta.id.clone(),
        message: e.to_string(),
    })
}

fn prepare_areas(
    index: &RwLock<RegionIndex>,
    meta: &ChunkMeta,
    collection: FeatureCollection,
) -> Vec<PreparedArea> {
    let known: HashSet<String> = {
        let index = index.read();
        collection
            .features
            .iter()
            .filter(|f| index.has_products(f.key()))
            .map(|f| f.key().to_string())
            .collect()
    };

    collection
        .features
        .into_iter()
        .map(|feature| {
            let products = if known.contains(feature.key()) {
                None
            } else {
                let geometry = feature.geometry.as_ref();
                Some((
                    geometry.and_then(|g| compute_bounds(g)),
                    geometry.and_then(compute_centroid),
                ))
            };
            let owner_region_id = feature
                .properties
                .owner_region_id
                .clone()
                .unwrap_or_else(|| meta.owner_region_id.clone());
            let owner_region_name = feature
                .properties
                .owner_region_name
                .clone()
                .unwrap_or_else(|| meta.name.clone());
            PreparedArea {
                feature: Arc::new(feature),
                owner_region_id,
                owner_region_name,
                products,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use formats::{AreaFeature, AreaProperties, FeatureCollection};
    use foundation::{BBox, Geometry};
    use pretty_assertions::assert_eq;
    use tokio::sync::Semaphore;

    use super::{RegionCache, ViewportLoad};
    use crate::config::ChunkCacheConfig;
    use crate::error::{ChunkLoadError, ChunkSourceError};
    use crate::manifest::{BoxFuture, ChunkLoader, ChunkManifest, ChunkMeta};

    fn square(x: f64, y: f64, size: f64) -> Geometry {
        Geometry::Polygon(vec![vec![
            [x, y],
            [x + size, y],
            [x + size, y + size],
            [x, y + size],
            [x, y],
        ]])
    }

    fn area(key: &str, geometry: Option<Geometry>) -> AreaFeature {
        AreaFeature {
            properties: AreaProperties {
                sub_area_key: key.to_string(),
                ..AreaProperties::default()
            },
            geometry,
        }
    }

    /// Counts invocations; optionally waits on a gate or fails.
    struct TestLoader {
        features: Vec<AreaFeature>,
        calls: AtomicUsize,
        gate: Option<Arc<Semaphore>>,
        fail_first: usize,
    }

    impl TestLoader {
        fn new(features: Vec<AreaFeature>) -> Arc<Self> {
            Arc::new(Self {
                features,
                calls: AtomicUsize::new(0),
                gate: None,
                fail_first: 0,
            })
        }

        fn gated(features: Vec<AreaFeature>, gate: Arc<Semaphore>) -> Arc<Self> {
            Arc::new(Self {
                features,
                calls: AtomicUsize::new(0),
                gate: Some(gate),
                fail_first: 0,
            })
        }

        fn failing_once(features: Vec<AreaFeature>) -> Arc<Self> {
            Arc::new(Self {
                features,
                calls: AtomicUsize::new(0),
                gate: None,
                fail_first: 1,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ChunkLoader for TestLoader {
        fn load(&self) -> BoxFuture<'_, Result<FeatureCollection, ChunkSourceError>> {
            Box::pin(async move {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                if let Some(gate) = &self.gate {
                    let _permit = gate
                        .acquire()
                        .await
                        .map_err(|e| ChunkSourceError::with_source("gate closed", e))?;
                }
                if call < self.fail_first {
                    return Err(ChunkSourceError::new("network down"));
                }
                Ok(FeatureCollection::new(self.features.clone()))
            })
        }
    }

    fn meta(id: &str, owner: &str, bbox: BBox, loader: Arc<TestLoader>) -> ChunkMeta {
        ChunkMeta::new(id, owner, format!("{owner} county"), bbox, loader)
    }

    fn cache(chunks: Vec<ChunkMeta>) -> RegionCache {
        RegionCache::new(
            Arc::new(ChunkManifest::new("XX", chunks)),
            ChunkCacheConfig::default(),
        )
    }

    fn keep(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn end_to_end_neighbors_and_centroid() {
        let a = TestLoader::new(vec![area("Z1", Some(square(0.0, 0.0, 1.0)))]);
        let c = cache(vec![
            meta("A", "1", BBox::new([0.0, 0.0], [1.0, 1.0]), a.clone()),
            meta("B", "2", BBox::new([0.5, 0.5], [1.5, 1.5]), TestLoader::new(vec![])),
            meta("C", "3", BBox::new([5.0, 5.0], [6.0, 6.0]), TestLoader::new(vec![])),
        ]);

        let n = c.neighbors_by_owner_region();
        assert_eq!(n.len(), 3);
        assert_eq!(n["1"].iter().collect::<Vec<_>>(), vec!["2"]);
        assert_eq!(n["2"].iter().collect::<Vec<_>>(), vec!["1"]);
        assert!(n["3"].is_empty());

        assert_eq!(c.centroid("Z1"), None);
        c.ensure_chunks_loaded(&["A"]).await.expect("load A");
        assert_eq!(c.centroid("Z1"), Some([0.5, 0.5]));
        assert_eq!(c.bounds("Z1"), Some(BBox::new([0.0, 0.0], [1.0, 1.0])));
        assert_eq!(c.owner_region_id("Z1").as_deref(), Some("1"));
        assert_eq!(c.owner_region_name("Z1").as_deref(), Some("1 county"));
        assert_eq!(c.chunk_for_area("Z1").as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn sequential_loads_fetch_once() {
        let a = TestLoader::new(vec![
            area("Z1", Some(square(0.0, 0.0, 1.0))),
            area("Z2", Some(square(1.0, 0.0, 1.0))),
        ]);
        let c = cache(vec![meta("A", "1", BBox::new([0.0, 0.0], [2.0, 1.0]), a.clone())]);

        c.ensure_chunks_loaded(&["A"]).await.unwrap();
        let before = c.stats();
        c.ensure_chunks_loaded(&["A"]).await.unwrap();

        assert_eq!(a.calls(), 1);
        assert_eq!(c.stats(), before);
        assert_eq!(before.features, 2);
        assert_eq!(c.area_keys_for_chunk("A"), vec!["Z1", "Z2"]);
    }

    #[tokio::test]
    async fn overlapping_concurrent_loads_share_one_fetch() {
        let gate = Arc::new(Semaphore::new(0));
        let a = TestLoader::gated(vec![area("Z1", Some(square(0.0, 0.0, 1.0)))], gate.clone());
        let c = cache(vec![meta("A", "1", BBox::new([0.0, 0.0], [1.0, 1.0]), a.clone())]);

        let first = c.ensure_chunks_loaded(&["A"]);
        let second = c.ensure_chunks_loaded(&["A", "A"]);
        let (r1, r2) = tokio::join!(first, async {
            gate.add_permits(1);
            second.await
        });

        assert!(r1.is_ok() && r2.is_ok());
        assert_eq!(a.calls(), 1);
        assert!(c.is_chunk_loaded("A"));
        assert_eq!(c.stats().inflight_chunks, 0);
    }

    #[tokio::test]
    async fn failed_load_is_not_marked_and_can_retry() {
        let a = TestLoader::failing_once(vec![area("Z1", Some(square(0.0, 0.0, 1.0)))]);
        let c = cache(vec![meta("A", "1", BBox::new([0.0, 0.0], [1.0, 1.0]), a.clone())]);

        let err = c.ensure_chunks_loaded(&["A"]).await.unwrap_err();
        assert!(matches!(err, ChunkLoadError::Fetch { ref chunk_id, .. } if chunk_id == "A"));
        assert!(!c.is_chunk_loaded("A"));
        assert!(c.feature("Z1").is_none());

        c.ensure_chunks_loaded(&["A"]).await.expect("retry");
        assert_eq!(a.calls(), 2);
        assert!(c.feature("Z1").is_some());
    }

    #[tokio::test]
    async fn stalled_load_times_out_without_indexing() {
        let gate = Arc::new(Semaphore::new(0));
        let a = TestLoader::gated(vec![area("Z1", Some(square(0.0, 0.0, 1.0)))], gate);
        let c = RegionCache::new(
            Arc::new(ChunkManifest::new(
                "XX",
                vec![meta("A", "1", BBox::new([0.0, 0.0], [1.0, 1.0]), a)],
            )),
            ChunkCacheConfig {
                load_timeout_ms: 20,
                ..ChunkCacheConfig::default()
            },
        );

        let err = tokio::time::timeout(Duration::from_secs(5), c.ensure_chunks_loaded(&["A"]))
            .await
            .expect("timeout must fire first")
            .unwrap_err();
        assert_eq!(
            err,
            ChunkLoadError::TimedOut {
                chunk_id: "A".to_string(),
                timeout_ms: 20
            }
        );
        assert!(!c.is_chunk_loaded("A"));
        assert_eq!(c.stats().features, 0);
    }

    #[tokio::test]
    async fn border_chunk_is_never_fetched() {
        let border = TestLoader::new(vec![area("Z9", Some(square(0.0, 0.0, 50.0)))]);
        let c = cache(vec![meta(
            "edge",
            "border",
            BBox::new([-10.0, -10.0], [10.0, 10.0]),
            border.clone(),
        )]);

        c.ensure_chunks_loaded(&["edge"]).await.unwrap();
        assert_eq!(border.calls(), 0);
        assert!(c.is_chunk_loaded("edge"));
        assert!(c.area_keys_for_chunk("edge").is_empty());

        let load = c
            .ensure_chunks_for_viewport(BBox::new([0.0, 0.0], [1.0, 1.0]), 0.0)
            .await
            .unwrap();
        assert_eq!(load.chunks().map(|c| c.len()), Some(0));
        assert!(!c.neighbors_by_owner_region().contains_key("border"));
    }

    #[tokio::test]
    async fn unknown_chunk_does_not_block_others() {
        let a = TestLoader::new(vec![area("Z1", Some(square(0.0, 0.0, 1.0)))]);
        let c = cache(vec![meta("A", "1", BBox::new([0.0, 0.0], [1.0, 1.0]), a)]);

        let err = c.ensure_chunks_loaded(&["missing", "A"]).await.unwrap_err();
        assert_eq!(err.chunk_id(), "missing");
        assert!(c.is_chunk_loaded("A"));
    }

    #[tokio::test]
    async fn malformed_geometry_is_indexed_without_products() {
        let a = TestLoader::new(vec![
            area("Z1", None),
            area("Z2", Some(Geometry::Polygon(vec![]))),
            area("Z3", Some(square(2.0, 2.0, 2.0))),
        ]);
        let c = cache(vec![meta("A", "1", BBox::new([0.0, 0.0], [4.0, 4.0]), a)]);
        c.ensure_chunks_loaded(&["A"]).await.unwrap();

        for key in ["Z1", "Z2"] {
            assert!(c.feature(key).is_some(), "{key} missing");
            assert_eq!(c.bounds(key), None);
            assert_eq!(c.centroid(key), None);
        }
        assert_eq!(c.centroid("Z3"), Some([3.0, 3.0]));
    }

    #[tokio::test]
    async fn viewport_selects_padded_chunks_and_prune_drops_the_rest() {
        let a = TestLoader::new(vec![area("Z1", Some(square(0.0, 0.0, 1.0)))]);
        let b = TestLoader::new(vec![area("Z2", Some(square(2.0, 0.0, 1.0)))]);
        let far = TestLoader::new(vec![area("Z3", Some(square(9.0, 9.0, 1.0)))]);
        let c = cache(vec![
            meta("A", "1", BBox::new([0.0, 0.0], [1.0, 1.0]), a),
            meta("B", "2", BBox::new([2.0, 0.0], [3.0, 1.0]), b),
            meta("F", "3", BBox::new([9.0, 9.0], [10.0, 10.0]), far.clone()),
        ]);

        // Viewport only covers A; padding of 1 degree reaches B.
        let tight = c
            .ensure_chunks_for_viewport(BBox::new([0.0, 0.0], [0.5, 0.5]), 0.0)
            .await
            .unwrap();
        let ids: Vec<&str> = tight.chunks().unwrap().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["A"]);

        let padded = c
            .ensure_chunks_for_viewport(BBox::new([0.0, 0.0], [1.0, 1.0]), 1.0)
            .await
            .unwrap();
        let ids: Vec<&str> = padded.chunks().unwrap().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(far.calls(), 0);

        let pruned = c.prune_chunks(&keep(&["B"]));
        assert_eq!(pruned, vec!["A"]);
        assert!(c.feature("Z1").is_none());
        assert!(c.bounds("Z1").is_none());
        assert!(c.centroid("Z1").is_none());
        assert!(c.owner_region_id("Z1").is_none());
        assert!(c.feature("Z2").is_some());
        assert!(c.centroid("Z2").is_some());
        assert_eq!(c.loaded_chunk_ids(), vec!["B"]);
    }

    #[tokio::test]
    async fn prune_keeps_sub_areas_shared_with_kept_chunks() {
        let a = TestLoader::new(vec![
            area("Z1", Some(square(0.0, 0.0, 1.0))),
            area("S", Some(square(0.5, 0.0, 1.0))),
        ]);
        let b = TestLoader::new(vec![area("S", Some(square(0.5, 0.0, 1.0)))]);
        let c = cache(vec![
            meta("A", "1", BBox::new([0.0, 0.0], [1.5, 1.0]), a),
            meta("B", "2", BBox::new([1.0, 0.0], [2.0, 1.0]), b),
        ]);
        c.ensure_chunks_loaded(&["A", "B"]).await.unwrap();

        c.prune_chunks(&keep(&["B"]));
        assert!(c.feature("Z1").is_none());
        assert!(c.feature("S").is_some());
        assert_eq!(c.chunk_for_area("S").as_deref(), Some("B"));

        c.prune_chunks(&keep(&[]));
        assert!(c.feature("S").is_none());
        assert_eq!(c.stats().features, 0);
        assert_eq!(c.stats().with_bounds, 0);
    }

    #[tokio::test]
    async fn superseded_viewport_discards_its_result() {
        let gate = Arc::new(Semaphore::new(0));
        let slow = TestLoader::gated(vec![area("Z1", Some(square(0.0, 0.0, 1.0)))], gate.clone());
        let fast = TestLoader::new(vec![area("Z2", Some(square(5.0, 5.0, 1.0)))]);
        let c = cache(vec![
            meta("A", "1", BBox::new([0.0, 0.0], [1.0, 1.0]), slow),
            meta("B", "2", BBox::new([5.0, 5.0], [6.0, 6.0]), fast),
        ]);

        let first = c.ensure_chunks_for_viewport(BBox::new([0.0, 0.0], [1.0, 1.0]), 0.0);
        let second = c.ensure_chunks_for_viewport(BBox::new([5.0, 5.0], [6.0, 6.0]), 0.0);
        let (r1, r2) = tokio::join!(first, async {
            let r = second.await;
            gate.add_permits(1);
            r
        });

        let r1 = r1.unwrap();
        let r2 = r2.unwrap();
        assert_eq!(r1, ViewportLoad::Superseded { generation: 1 });
        assert!(!r2.is_superseded());
        assert_eq!(r2.chunks().unwrap()[0].id, "B");
        // The overtaken load still completes and is eligible for pruning.
        assert!(c.is_chunk_loaded("A"));
    }

    #[tokio::test]
    async fn loads_finishing_out_of_order_merge_whole_chunks() {
        let gate_a = Arc::new(Semaphore::new(0));
        let gate_b = Arc::new(Semaphore::new(0));
        let a = TestLoader::gated(vec![area("Z1", Some(square(0.0, 0.0, 1.0)))], gate_a.clone());
        let b = TestLoader::gated(
            vec![
                area("Z2", Some(square(2.0, 0.0, 1.0))),
                area("Z3", Some(square(3.0, 0.0, 1.0))),
            ],
            gate_b.clone(),
        );
        let c = cache(vec![
            meta("A", "1", BBox::new([0.0, 0.0], [1.0, 1.0]), a),
            meta("B", "2", BBox::new([2.0, 0.0], [4.0, 1.0]), b),
        ]);

        let (result, ()) = tokio::join!(c.ensure_chunks_loaded(&["A", "B"]), async {
            // B was requested second but finishes first.
            gate_b.add_permits(1);
            while !c.is_chunk_loaded("B") {
                tokio::task::yield_now().await;
            }
            assert!(!c.is_chunk_loaded("A"));
            assert!(c.feature("Z1").is_none());
            assert!(c.area_keys_for_chunk("A").is_empty());
            assert_eq!(c.area_keys_for_chunk("B"), vec!["Z2", "Z3"]);
            for key in ["Z2", "Z3"] {
                assert!(c.feature(key).is_some(), "{key} feature");
                assert!(c.bounds(key).is_some(), "{key} bounds");
                assert!(c.centroid(key).is_some(), "{key} centroid");
                assert_eq!(c.chunk_for_area(key).as_deref(), Some("B"));
            }
            gate_a.add_permits(1);
        });

        result.expect("both chunks load");
        assert_eq!(c.loaded_chunk_ids(), vec!["A", "B"]);
        assert_eq!(c.centroid("Z1"), Some([0.5, 0.5]));
        assert_eq!(c.chunk_for_area("Z1").as_deref(), Some("A"));
        assert_eq!(c.chunk_for_area("Z3").as_deref(), Some("B"));
        assert_eq!(c.stats().features, 3);
    }

    #[tokio::test]
    async fn rehomed_sub_area_takes_surviving_chunk_owner() {
        let a_shape = square(0.5, 0.0, 1.0);
        let b_shape = square(0.6, 0.0, 0.9);
        let a = TestLoader::new(vec![area("S", Some(a_shape.clone()))]);
        let b = TestLoader::new(vec![area("S", Some(b_shape))]);
        let c = cache(vec![
            meta("A", "1", BBox::new([0.0, 0.0], [1.5, 1.0]), a),
            meta("B", "2", BBox::new([1.0, 0.0], [2.0, 1.0]), b),
        ]);
        c.ensure_chunks_loaded(&["A"]).await.unwrap();
        c.ensure_chunks_loaded(&["B"]).await.unwrap();
        assert_eq!(c.chunk_for_area("S").as_deref(), Some("B"));
        assert_eq!(c.owner_region_id("S").as_deref(), Some("2"));

        c.prune_chunks(&keep(&["A"]));
        assert_eq!(c.chunk_for_area("S").as_deref(), Some("A"));
        assert_eq!(c.owner_region_id("S").as_deref(), Some("1"));
        assert_eq!(c.owner_region_name("S").as_deref(), Some("1 county"));
        assert_eq!(
            c.feature("S").and_then(|f| f.geometry.clone()),
            Some(a_shape)
        );
        assert!(c.centroid("S").is_some());
    }

    #[tokio::test]
    async fn abandoned_load_does_not_keep_cache_alive() {
        let gate = Arc::new(Semaphore::new(0));
        let a = TestLoader::gated(vec![area("Z1", Some(square(0.0, 0.0, 1.0)))], gate);
        let c = cache(vec![meta("A", "1", BBox::new([0.0, 0.0], [1.0, 1.0]), a)]);

        let waited =
            tokio::time::timeout(Duration::from_millis(10), c.ensure_chunks_loaded(&["A"])).await;
        assert!(waited.is_err());
        assert_eq!(c.stats().inflight_chunks, 1);

        let weak = Arc::downgrade(&c.inner);
        drop(c);
        assert!(weak.upgrade().is_none());
    }
}

//! Runtime chunk manifest: one [`ChunkMeta`] per spatial partition, each with
//! a loader that fetches the partition's GeoJSON on demand.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use formats::{FeatureCollection, ManifestFile};
use foundation::BBox;
use serde::Serialize;
use tracing::warn;

use crate::error::ChunkSourceError;

/// Owner region id marking the sentinel chunk when a manifest names none.
pub const DEFAULT_BORDER_REGION_ID: &str = "border";

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Fetches one chunk's features.
///
/// Implementations resolve to a complete collection or fail; partial results
/// are not part of the contract.
pub trait ChunkLoader: Send + Sync {
    fn load(&self) -> BoxFuture<'_, Result<FeatureCollection, ChunkSourceError>>;
}

/// Reads a GeoJSON chunk file from disk.
#[derive(Debug, Clone)]
pub struct FileChunkLoader {
    path: PathBuf,
}

impl FileChunkLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChunkLoader for FileChunkLoader {
    fn load(&self) -> BoxFuture<'_, Result<FeatureCollection, ChunkSourceError>> {
        Box::pin(async move {
            let payload = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
                ChunkSourceError::with_source(format!("read {}", self.path.display()), e)
            })?;
            FeatureCollection::from_geojson_str(&payload).map_err(|e| {
                ChunkSourceError::with_source(format!("parse {}", self.path.display()), e)
            })
        })
    }
}

/// Static description of one spatial partition.
#[derive(Clone)]
pub struct ChunkMeta {
    pub id: String,
    pub owner_region_id: String,
    pub name: String,
    pub bbox: BBox,
    pub loader: Arc<dyn ChunkLoader>,
}

impl ChunkMeta {
    pub fn new(
        id: impl Into<String>,
        owner_region_id: impl Into<String>,
        name: impl Into<String>,
        bbox: BBox,
        loader: Arc<dyn ChunkLoader>,
    ) -> Self {
        Self {
            id: id.into(),
            owner_region_id: owner_region_id.into(),
            name: name.into(),
            bbox,
            loader,
        }
    }

    pub fn summary(&self) -> ChunkSummary {
        ChunkSummary {
            id: self.id.clone(),
            owner_region_id: self.owner_region_id.clone(),
            name: self.name.clone(),
            bbox: self.bbox,
        }
    }
}

impl std::fmt::Debug for ChunkMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkMeta")
            .field("id", &self.id)
            .field("owner_region_id", &self.owner_region_id)
            .field("name", &self.name)
            .field("bbox", &self.bbox)
            .finish_non_exhaustive()
    }
}

/// Loader-free view of a chunk, handed back to viewport callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkSummary {
    pub id: String,
    pub owner_region_id: String,
    pub name: String,
    pub bbox: BBox,
}

/// All chunks of one region code, in manifest order.
#[derive(Debug, Clone)]
pub struct ChunkManifest {
    region_code: String,
    border_region_id: String,
    chunks: Vec<ChunkMeta>,
    by_id: HashMap<String, usize>,
}

impl ChunkManifest {
    /// Duplicate chunk ids keep their first entry.
    pub fn new(region_code: impl Into<String>, chunks: Vec<ChunkMeta>) -> Self {
        let region_code = region_code.into();
        let mut kept = Vec::with_capacity(chunks.len());
        let mut by_id = HashMap::with_capacity(chunks.len());
        for chunk in chunks {
            if by_id.contains_key(&chunk.id) {
                warn!("manifest {region_code}: duplicate chunk id {}", chunk.id);
                continue;
            }
            by_id.insert(chunk.id.clone(), kept.len());
            kept.push(chunk);
        }
        Self {
            region_code,
            border_region_id: DEFAULT_BORDER_REGION_ID.to_string(),
            chunks: kept,
            by_id,
        }
    }

    pub fn with_border_region_id(mut self, border_region_id: impl Into<String>) -> Self {
        self.border_region_id = border_region_id.into();
        self
    }

    /// Build file-backed metas; chunk paths resolve against `base_dir`.
    pub fn from_manifest_file(file: ManifestFile, base_dir: &Path) -> Self {
        let chunks = file
            .chunks
            .into_iter()
            .map(|c| {
                let loader: Arc<dyn ChunkLoader> =
                    Arc::new(FileChunkLoader::new(base_dir.join(&c.path)));
                ChunkMeta::new(c.id, c.owner_region_id, c.name, c.bbox, loader)
            })
            .collect();
        let manifest = Self::new(file.region_code, chunks);
        match file.border_region_id {
            Some(border) => manifest.with_border_region_id(border),
            None => manifest,
        }
    }

    pub fn region_code(&self) -> &str {
        &self.region_code
    }

    pub fn border_region_id(&self) -> &str {
        &self.border_region_id
    }

    pub fn chunks(&self) -> &[ChunkMeta] {
        &self.chunks
    }

    pub fn get(&self, id: &str) -> Option<&ChunkMeta> {
        self.by_id.get(id).map(|&i| &self.chunks[i])
    }

    pub fn is_border(&self, chunk: &ChunkMeta) -> bool {
        chunk.owner_region_id == self.border_region_id
    }

    /// Chunks eligible for automatic loading and adjacency.
    pub fn regular_chunks(&self) -> impl Iterator<Item = &ChunkMeta> {
        self.chunks.iter().filter(|c| !self.is_border(c))
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

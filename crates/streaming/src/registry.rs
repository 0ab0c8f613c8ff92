use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use formats::ManifestFile;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::ChunkCacheConfig;
use crate::error::ChunkSourceError;
use crate::manifest::ChunkManifest;
use crate::region_cache::RegionCache;

/// Owns one [`RegionCache`] per registered region code.
///
/// Caches are created on first request and then shared, so every consumer of a
/// region sees the same resident chunks.
#[derive(Debug, Default)]
pub struct RegionCacheRegistry {
    config: ChunkCacheConfig,
    manifests: RwLock<HashMap<String, Arc<ChunkManifest>>>,
    caches: RwLock<HashMap<String, RegionCache>>,
}

impl RegionCacheRegistry {
    pub fn new(config: ChunkCacheConfig) -> Self {
        Self {
            config,
            manifests: RwLock::new(HashMap::new()),
            caches: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_manifest(self, manifest: ChunkManifest) -> Self {
        self.register(manifest);
        self
    }

    pub fn config(&self) -> &ChunkCacheConfig {
        &self.config
    }

    /// Registering a code again replaces its manifest and drops its cache.
    pub fn register(&self, manifest: ChunkManifest) {
        let code = manifest.region_code().to_string();
        debug!("registering region {code} ({} chunks)", manifest.len());
        self.caches.write().remove(&code);
        self.manifests.write().insert(code, Arc::new(manifest));
    }

    /// Read a manifest JSON file and register it; chunk paths are relative to
    /// the file's directory.
    pub async fn register_file(&self, path: &Path) -> Result<String, ChunkSourceError> {
        let payload = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ChunkSourceError::with_source(format!("read {}", path.display()), e))?;
        let file = ManifestFile::from_json_str(&payload)
            .map_err(|e| ChunkSourceError::with_source(format!("parse {}", path.display()), e))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let manifest = ChunkManifest::from_manifest_file(file, base_dir);
        let code = manifest.region_code().to_string();
        info!(
            "loaded manifest {} for region {code} ({} chunks)",
            path.display(),
            manifest.len()
        );
        self.register(manifest);
        Ok(code)
    }

    pub fn region_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.manifests.read().keys().cloned().collect();
        codes.sort();
        codes
    }

    /// The shared cache for `region_code`, or `None` when it is not registered.
    pub fn region(&self, region_code: &str) -> Option<RegionCache> {
        if let Some(cache) = self.caches.read().get(region_code) {
            return Some(cache.clone());
        }

        let manifest = self.manifests.read().get(region_code).cloned()?;
        let mut caches = self.caches.write();
        let cache = caches
            .entry(region_code.to_string())
            .or_insert_with(|| RegionCache::new(manifest, self.config.clone()));
        Some(cache.clone())
    }
}

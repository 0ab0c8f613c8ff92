use foundation::BBox;
use serde::{Deserialize, Serialize};

pub const MANIFEST_VERSION: &str = "1.0";

/// On-disk description of one region's boundary chunks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestFile {
    pub version: String,
    pub region_code: String,
    /// Owner region id of the sentinel chunk(s) that are never auto-loaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_region_id: Option<String>,
    pub chunks: Vec<ManifestChunk>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestChunk {
    pub id: String,
    pub owner_region_id: String,
    pub name: String,
    pub bbox: BBox,
    /// GeoJSON path, relative to the manifest file.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_count: Option<u32>,
}

impl ManifestFile {
    pub fn new(region_code: impl Into<String>) -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            region_code: region_code.into(),
            border_region_id: None,
            chunks: Vec::new(),
        }
    }

    pub fn from_json_str(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

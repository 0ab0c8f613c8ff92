use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Bumped whenever a record layout changes; a mismatch wipes every store.
pub const SCHEMA_VERSION: u32 = 3;

/// One row of a parent area's stat summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatSummaryRow {
    pub stat_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub date: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub count: u64,
    pub sum: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRecord {
    pub key: String,
    pub saved_at: u64,
    pub parent_area: String,
    pub boundary_type: String,
    pub rows: Vec<StatSummaryRow>,
}

/// Per-sub-area values of one stat, as handed to
/// [`PersistentStatCache::write_stat_map`](crate::PersistentStatCache::write_stat_map).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatMapPayload {
    pub stat_id: String,
    pub parent_area: String,
    pub boundary_type: String,
    pub date: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: BTreeMap<String, f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_updated_at: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatMapRecord {
    pub key: String,
    pub saved_at: u64,
    /// LRU sort key; refreshed on every read.
    pub last_accessed_at: u64,
    pub stat_id: String,
    pub parent_area: String,
    pub boundary_type: String,
    pub date: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: BTreeMap<String, f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_updated_at: Option<u64>,
}

impl StatMapRecord {
    pub fn from_payload(payload: StatMapPayload, now_ms: u64) -> Self {
        Self {
            key: stat_map_key(
                &payload.stat_id,
                &payload.parent_area,
                &payload.boundary_type,
            ),
            saved_at: now_ms,
            last_accessed_at: now_ms,
            stat_id: payload.stat_id,
            parent_area: payload.parent_area,
            boundary_type: payload.boundary_type,
            date: payload.date,
            kind: payload.kind,
            data: payload.data,
            min: payload.min,
            max: payload.max,
            summary_updated_at: payload.summary_updated_at,
        }
    }
}

pub fn summary_key(parent_area: &str, boundary_type: &str) -> String {
    format!("v{SCHEMA_VERSION}|{parent_area}|{boundary_type}")
}

pub fn stat_map_key(stat_id: &str, parent_area: &str, boundary_type: &str) -> String {
    format!("v{SCHEMA_VERSION}|{stat_id}|{parent_area}|{boundary_type}")
}

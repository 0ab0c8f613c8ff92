//! On-demand boundary chunks for one or more regions.
//!
//! A [`RegionCache`] owns the resident sub-areas of one region code; the
//! [`RegionCacheRegistry`] hands out shared caches per code.

pub mod adjacency;
pub mod config;
pub mod error;
pub mod manifest;
pub mod region_cache;
pub mod registry;

pub use adjacency::*;
pub use config::*;
pub use error::*;
pub use manifest::*;
pub use region_cache::*;
pub use registry::*;

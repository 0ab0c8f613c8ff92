//! Persisted stat cache: summaries and per-sub-area stat maps with LRU
//! eviction, schema versioning and change broadcast between handles.

pub mod channel;
pub mod config;
pub mod records;
pub mod stat_cache;
pub mod store;

pub use channel::*;
pub use config::*;
pub use records::*;
pub use stat_cache::*;
pub use store::*;

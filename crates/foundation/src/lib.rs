pub mod bounds;
pub mod centroid;
pub mod geometry;

// Foundation crate: small, well-tested geometry primitives only.
pub use bounds::*;
pub use centroid::*;
pub use geometry::*;

//! Parse Potree 1.x octree metadata.
//!
//! This crate holds the pure, synchronous pieces of the Potree on-disk
//! layout: the `cloud.js` description, `.hrc` hierarchy chunks, node names
//! and paths, bounding box subdivision and point attribute schemas. It also
//! defines the [`Decoder`] boundary that turns node bytes into attribute
//! buffers.
//!
//! Nothing here performs I/O; the `potree` crate fetches bytes and feeds them
//! through these functions.

mod aabb;
mod attributes;
mod decode;
mod error;
mod hierarchy;
mod metadata;
pub mod name;
mod version;

pub use aabb::Aabb;
pub use attributes::{
    AttributeBuffer, DecoderKind, PointAttributeName, PointAttributes, PointLayout,
};
pub use decode::{ByteLayoutDecoder, DecodeParams, DecodeRequest, DecodedNode, Decoder};
pub use error::{DecodeError, DecodeResult};
pub use hierarchy::{HIERARCHY_RECORD_SIZE, HierarchyEntry, parse_hierarchy};
pub use metadata::{CloudMetadata, parse_cloud_metadata};
pub use version::Version;

//! The decode boundary between fetched node bytes and attribute buffers.
//!
//! Decoders run on background workers. A request carries everything the
//! decoder needs, so a decoder instance keeps no state between requests
//! and can be reused for any node of any octree.

use glam::DVec3;

use crate::aabb::Aabb;
use crate::attributes::{AttributeBuffer, PointLayout};
use crate::error::{DecodeError, DecodeResult};
use crate::version::Version;

/// Per-node parameters a decoder needs besides the bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeParams {
    /// Node name.
    pub name: String,
    /// Point storage layout.
    pub layout: PointLayout,
    /// Format version of the octree.
    pub version: Version,
    /// Position quantization scale.
    pub scale: f64,
    /// Octree offset (bounding box minimum in source coordinates).
    pub offset: DVec3,
    /// Nominal node box in octree-local coordinates.
    pub bounding_box: Aabb,
    /// Nominal point spacing of the node.
    pub spacing: f64,
    /// Whether the node has children.
    pub has_children: bool,
}

/// A node's fetched bytes plus its decode parameters.
#[derive(Debug, Clone)]
pub struct DecodeRequest {
    /// Decode parameters.
    pub params: DecodeParams,
    /// Raw node file contents.
    pub bytes: Vec<u8>,
}

/// Output of a successful decode.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedNode {
    /// Attribute buffers, one per decoded attribute.
    pub buffers: Vec<AttributeBuffer>,
    /// Exact number of points in the node.
    pub num_points: u64,
    /// Box fitted to the decoded points, octree-local.
    pub tight_bounding_box: Aabb,
    /// Mean of the decoded positions; positions are stored relative to it.
    pub mean: DVec3,
    /// Spacing estimated from the decoded points, if the decoder computes it.
    pub estimated_spacing: Option<f64>,
}

/// Turns node bytes into attribute buffers.
pub trait Decoder: Send + Sync {
    /// Decode one node.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes do not match the expected layout.
    fn decode(&self, request: DecodeRequest) -> DecodeResult<DecodedNode>;
}

/// Layout-level decoder for Potree binary records.
///
/// Validates that the buffer is a whole number of records, counts the points
/// and splits the interleaved records into one packed column per attribute.
/// Attribute values are left uninterpreted, so the tight box and mean fall
/// back to the nominal node box.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteLayoutDecoder;

impl Decoder for ByteLayoutDecoder {
    fn decode(&self, request: DecodeRequest) -> DecodeResult<DecodedNode> {
        let DecodeRequest { params, bytes } = request;
        let PointLayout::Binary(attributes) = &params.layout else {
            return Err(DecodeError::UnsupportedLayout {
                decoder: "byte layout decoder",
                layout: params.layout.to_string(),
            });
        };

        let record_size = attributes.byte_size();
        if record_size == 0 {
            return Err(DecodeError::InvalidFormat {
                context: "point attributes",
                detail: "record has no attributes".to_string(),
            });
        }
        if !bytes.len().is_multiple_of(record_size) {
            return Err(DecodeError::MisalignedBuffer {
                len: bytes.len(),
                record_size,
            });
        }

        let num_points = bytes.len() / record_size;
        let buffers = attributes
            .offsets()
            .map(|(attribute, offset)| {
                let width = attribute.byte_size();
                let mut column = Vec::with_capacity(num_points * width);
                for record in bytes.chunks_exact(record_size) {
                    column.extend_from_slice(&record[offset..offset + width]);
                }
                AttributeBuffer::Packed {
                    attribute,
                    bytes: column,
                }
            })
            .collect();

        Ok(DecodedNode {
            buffers,
            num_points: num_points as u64,
            tight_bounding_box: params.bounding_box,
            mean: params.bounding_box.center(),
            estimated_spacing: None,
        })
    }
}

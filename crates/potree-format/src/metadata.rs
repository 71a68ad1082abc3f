//! `cloud.js` metadata parsing.

use serde::Deserialize;

use crate::aabb::{Aabb, BoxJson};
use crate::attributes::PointLayout;
use crate::error::{DecodeError, DecodeResult};
use crate::version::Version;

/// Top-level description of a Potree octree.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudMetadata {
    /// Format version.
    pub version: Version,
    /// Directory holding node and hierarchy files, relative to `cloud.js`.
    pub octree_dir: String,
    /// Total number of points, if recorded.
    pub points: Option<u64>,
    /// Cubic bounding box of the octree root.
    pub bounding_box: Aabb,
    /// Box fitted to the actual points.
    pub tight_bounding_box: Option<Aabb>,
    /// How points are stored.
    pub point_layout: PointLayout,
    /// Point spacing at the root level.
    pub spacing: f64,
    /// Quantization scale of stored positions.
    pub scale: f64,
    /// Number of levels described by one hierarchy chunk.
    pub hierarchy_step_size: u32,
    /// Spatial reference, if any.
    pub projection: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloudJson {
    version: Version,
    octree_dir: String,
    #[serde(default)]
    points: Option<u64>,
    bounding_box: BoxJson,
    #[serde(default)]
    tight_bounding_box: Option<BoxJson>,
    point_attributes: PointLayout,
    spacing: f64,
    scale: f64,
    hierarchy_step_size: u32,
    #[serde(default)]
    projection: Option<String>,
}

/// Parse and validate the contents of a `cloud.js` file.
///
/// # Errors
///
/// Returns an error if the JSON is malformed, a required field is missing,
/// or spacing, scale or hierarchy step size are not positive.
pub fn parse_cloud_metadata(data: &[u8]) -> DecodeResult<CloudMetadata> {
    let json: CloudJson = serde_json::from_slice(data).map_err(|e| DecodeError::InvalidFormat {
        context: "cloud.js",
        detail: e.to_string(),
    })?;

    if json.spacing.partial_cmp(&0.0) != Some(std::cmp::Ordering::Greater) {
        return Err(invalid(format!("spacing must be positive, got {}", json.spacing)));
    }
    if json.scale.partial_cmp(&0.0) != Some(std::cmp::Ordering::Greater) {
        return Err(invalid(format!("scale must be positive, got {}", json.scale)));
    }
    if json.hierarchy_step_size == 0 {
        return Err(invalid("hierarchyStepSize must be positive".to_string()));
    }

    Ok(CloudMetadata {
        version: json.version,
        octree_dir: json.octree_dir,
        points: json.points,
        bounding_box: json.bounding_box.into(),
        tight_bounding_box: json.tight_bounding_box.map(Aabb::from),
        point_layout: json.point_attributes,
        spacing: json.spacing,
        scale: json.scale,
        hierarchy_step_size: json.hierarchy_step_size,
        projection: json.projection.filter(|p| !p.is_empty()),
    })
}

fn invalid(detail: String) -> DecodeError {
    DecodeError::InvalidFormat {
        context: "cloud.js",
        detail,
    }
}

//! Point attribute schemas and decoded attribute buffers.

use std::fmt;

use serde::Deserialize;

/// A per-point attribute as named in `cloud.js`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PointAttributeName {
    /// Quantized x, y, z (3 × i32).
    PositionCartesian,
    /// Red, green, blue, alpha (4 × u8).
    ColorPacked,
    /// Uncompressed normal (3 × f32).
    #[serde(alias = "NORMAL_FLOATS")]
    Normal,
    /// Padding byte.
    #[serde(rename = "FILLER_1B")]
    Filler1B,
    /// LiDAR return intensity (u16).
    Intensity,
    /// LAS classification (u8).
    Classification,
    /// Sphere-mapped normal (2 × u8).
    NormalSpheremapped,
    /// Octahedron-encoded normal (2 × u8).
    #[serde(rename = "NORMAL_OCT16")]
    NormalOct16,
    /// Return number (u8).
    ReturnNumber,
    /// Number of returns (u8).
    NumberOfReturns,
    /// Point source id (u16).
    SourceId,
    /// Point index (u32).
    Indices,
    /// Per-point spacing (f32).
    Spacing,
    /// GPS timestamp (f64).
    GpsTime,
}

impl PointAttributeName {
    /// Size of one value of this attribute in a point record.
    #[must_use]
    pub const fn byte_size(self) -> usize {
        match self {
            Self::PositionCartesian | Self::Normal => 12,
            Self::ColorPacked | Self::Indices | Self::Spacing => 4,
            Self::Intensity
            | Self::NormalSpheremapped
            | Self::NormalOct16
            | Self::SourceId => 2,
            Self::Filler1B
            | Self::Classification
            | Self::ReturnNumber
            | Self::NumberOfReturns => 1,
            Self::GpsTime => 8,
        }
    }

    /// Name of the geometry attribute a decoded buffer is bound to, if any.
    ///
    /// All three normal encodings decode to the same `normal` attribute.
    #[must_use]
    pub const fn semantic(self) -> Option<&'static str> {
        match self {
            Self::PositionCartesian => Some("position"),
            Self::ColorPacked => Some("color"),
            Self::Intensity => Some("intensity"),
            Self::Classification => Some("classification"),
            Self::Normal | Self::NormalSpheremapped | Self::NormalOct16 => Some("normal"),
            Self::Indices => Some("indices"),
            Self::Spacing => Some("spacing"),
            Self::Filler1B
            | Self::ReturnNumber
            | Self::NumberOfReturns
            | Self::SourceId
            | Self::GpsTime => None,
        }
    }
}

/// The ordered attributes of one interleaved point record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointAttributes {
    attributes: Vec<PointAttributeName>,
    byte_size: usize,
}

impl PointAttributes {
    /// Build a schema from attribute names in record order.
    #[must_use]
    pub fn new(attributes: Vec<PointAttributeName>) -> Self {
        let byte_size = attributes.iter().map(|a| a.byte_size()).sum();
        Self {
            attributes,
            byte_size,
        }
    }

    /// Size of one point record in bytes.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Attributes in record order.
    #[must_use]
    pub fn attributes(&self) -> &[PointAttributeName] {
        &self.attributes
    }

    /// Byte offset of each attribute within a record.
    pub fn offsets(&self) -> impl Iterator<Item = (PointAttributeName, usize)> + '_ {
        self.attributes.iter().scan(0, |offset, &attribute| {
            let start = *offset;
            *offset += attribute.byte_size();
            Some((attribute, start))
        })
    }
}

/// How points are stored in node files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointLayout {
    /// Potree binary records with the given schema.
    Binary(PointAttributes),
    /// Uncompressed LAS files.
    Las,
    /// LAZ-compressed LAS files.
    Laz,
}

impl PointLayout {
    /// The decoder lane that handles this layout.
    #[must_use]
    pub fn decoder_kind(&self) -> DecoderKind {
        match self {
            Self::Binary(_) => DecoderKind::Binary,
            Self::Las => DecoderKind::Las,
            Self::Laz => DecoderKind::Laz,
        }
    }

    /// Extension appended to node file names, if the format uses one.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Binary(_) => ".bin",
            Self::Las => ".las",
            Self::Laz => ".laz",
        }
    }
}

impl fmt::Display for PointLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary(attributes) => write!(f, "binary ({} bytes/point)", attributes.byte_size()),
            Self::Las => f.write_str("LAS"),
            Self::Laz => f.write_str("LAZ"),
        }
    }
}

impl<'de> Deserialize<'de> for PointLayout {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Names(Vec<PointAttributeName>),
            Format(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Names(names) => Ok(Self::Binary(PointAttributes::new(names))),
            Raw::Format(format) => match format.as_str() {
                "LAS" => Ok(Self::Las),
                "LAZ" => Ok(Self::Laz),
                other => Err(serde::de::Error::custom(format!(
                    "unknown point attribute format '{other}'"
                ))),
            },
        }
    }
}

/// Kind of decoder needed for a node, used to pick a worker lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecoderKind {
    /// Potree binary records.
    Binary,
    /// LAS files.
    Las,
    /// LAZ files.
    Laz,
}

/// A decoded per-point attribute array.
///
/// Each variant is bound to exactly one geometry attribute, so routing a
/// buffer to the renderer is a match rather than a lookup by numeric id.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeBuffer {
    /// xyz positions relative to the node's mean.
    Position(Vec<f32>),
    /// RGBA colors.
    Color(Vec<u8>),
    /// Intensity values.
    Intensity(Vec<f32>),
    /// Classification codes.
    Classification(Vec<u8>),
    /// xyz normals.
    Normal(Vec<f32>),
    /// Point indices packed as RGBA bytes.
    Indices(Vec<u8>),
    /// Per-point spacing.
    Spacing(Vec<f32>),
    /// Raw bytes of one attribute, split out of the interleaved records but
    /// not interpreted.
    Packed {
        /// Attribute the bytes belong to.
        attribute: PointAttributeName,
        /// `num_points * attribute.byte_size()` bytes.
        bytes: Vec<u8>,
    },
}

impl AttributeBuffer {
    /// Geometry attribute name this buffer is bound to.
    #[must_use]
    pub fn semantic(&self) -> Option<&'static str> {
        match self {
            Self::Position(_) => Some("position"),
            Self::Color(_) => Some("color"),
            Self::Intensity(_) => Some("intensity"),
            Self::Classification(_) => Some("classification"),
            Self::Normal(_) => Some("normal"),
            Self::Indices(_) => Some("indices"),
            Self::Spacing(_) => Some("spacing"),
            Self::Packed { attribute, .. } => attribute.semantic(),
        }
    }

    /// Number of bytes held by the buffer.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Position(v) | Self::Intensity(v) | Self::Normal(v) | Self::Spacing(v) => {
                v.len() * size_of::<f32>()
            }
            Self::Color(v) | Self::Classification(v) | Self::Indices(v) => v.len(),
            Self::Packed { bytes, .. } => bytes.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_size() {
        let attrs = PointAttributes::new(vec![
            PointAttributeName::PositionCartesian,
            PointAttributeName::ColorPacked,
            PointAttributeName::Intensity,
        ]);
        assert_eq!(attrs.byte_size(), 18);
        let offsets: Vec<_> = attrs.offsets().map(|(_, o)| o).collect();
        assert_eq!(offsets, vec![0, 12, 16]);
    }

    #[test]
    fn test_layout_from_names() {
        let layout: PointLayout =
            serde_json::from_str(r#"["POSITION_CARTESIAN", "COLOR_PACKED", "NORMAL_OCT16"]"#)
                .unwrap();
        let PointLayout::Binary(attrs) = &layout else {
            panic!("expected binary layout");
        };
        assert_eq!(attrs.byte_size(), 18);
        assert_eq!(layout.decoder_kind(), DecoderKind::Binary);
        assert_eq!(layout.extension(), ".bin");
    }

    #[test]
    fn test_layout_laz() {
        let layout: PointLayout = serde_json::from_str(r#""LAZ""#).unwrap();
        assert_eq!(layout, PointLayout::Laz);
        assert_eq!(layout.decoder_kind(), DecoderKind::Laz);
        assert!(serde_json::from_str::<PointLayout>(r#""PLY""#).is_err());
    }

    #[test]
    fn test_normals_share_semantic() {
        for name in [
            PointAttributeName::Normal,
            PointAttributeName::NormalSpheremapped,
            PointAttributeName::NormalOct16,
        ] {
            assert_eq!(name.semantic(), Some("normal"));
        }
        assert_eq!(PointAttributeName::GpsTime.semantic(), None);
    }

    #[test]
    fn test_buffer_routing() {
        let buffer = AttributeBuffer::Packed {
            attribute: PointAttributeName::ColorPacked,
            bytes: vec![0; 8],
        };
        assert_eq!(buffer.semantic(), Some("color"));
        assert_eq!(buffer.byte_len(), 8);
        assert_eq!(AttributeBuffer::Position(vec![0.0; 6]).byte_len(), 24);
    }
}

//! Axis-aligned bounding boxes and octant subdivision.

use glam::DVec3;
use serde::Deserialize;

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner.
    pub min: DVec3,
    /// Maximum corner.
    pub max: DVec3,
}

impl Aabb {
    /// Create a box from its two corners.
    #[must_use]
    pub const fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// Center of the box.
    #[must_use]
    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    /// Edge lengths of the box.
    #[must_use]
    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    /// Radius of the bounding sphere (half the diagonal).
    #[must_use]
    pub fn radius(&self) -> f64 {
        self.size().length() * 0.5
    }

    /// The same box moved by `offset`.
    #[must_use]
    pub fn translated(&self, offset: DVec3) -> Self {
        Self {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    /// Check if a point lies inside the box (inclusive).
    #[must_use]
    pub fn contains_point(&self, p: DVec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Bounding box of the child octant `index`.
    ///
    /// Octant bits follow the Potree convention: bit 0 selects the upper
    /// half along z, bit 1 along y and bit 2 along x.
    ///
    /// # Panics
    ///
    /// Debug builds panic when `index` is not in `0..8`.
    #[must_use]
    pub fn child(&self, index: u8) -> Self {
        debug_assert!(index < 8, "octant index {index} out of range");
        let half = self.size() * 0.5;
        let mut min = self.min;
        let mut max = self.max;

        if index & 0b001 != 0 {
            min.z += half.z;
        } else {
            max.z -= half.z;
        }
        if index & 0b010 != 0 {
            min.y += half.y;
        } else {
            max.y -= half.y;
        }
        if index & 0b100 != 0 {
            min.x += half.x;
        } else {
            max.x -= half.x;
        }

        Self { min, max }
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::new(DVec3::ZERO, DVec3::ZERO)
    }
}

/// Bounding box as written in `cloud.js` (`lx`, `ly`, `lz`, `ux`, `uy`, `uz`).
#[derive(Debug, Clone, Copy, Deserialize)]
pub(crate) struct BoxJson {
    lx: f64,
    ly: f64,
    lz: f64,
    ux: f64,
    uy: f64,
    uz: f64,
}

impl From<BoxJson> for Aabb {
    fn from(b: BoxJson) -> Self {
        Self::new(DVec3::new(b.lx, b.ly, b.lz), DVec3::new(b.ux, b.uy, b.uz))
    }
}

//! Scripted orbit camera standing in for user input.
//!
//! The camera circles the point cloud at a fixed elevation and slowly dollies
//! in and out, so a run exercises both refinement and eviction.

use std::f64::consts::{FRAC_PI_4, TAU};
use std::time::Duration;

use glam::DVec3;
use potree::{Aabb, CameraView};

/// Vertical field of view.
pub const FOV_Y: f64 = FRAC_PI_4;
/// Elevation of the orbit above the target, in radians.
const ELEVATION: f64 = 0.5;
/// Orbit distance at the far end of the dolly, in bounding radii.
const FAR_RADII: f64 = 3.0;
/// Orbit distance at the near end of the dolly, in bounding radii.
const NEAR_RADII: f64 = 0.6;

/// A camera orbiting a target in a z-up world.
#[derive(Debug, Clone)]
pub struct OrbitCamera {
    target: DVec3,
    radius: f64,
    period: Duration,
    elapsed: Duration,
}

impl OrbitCamera {
    /// Create a camera orbiting `bounds` once per `period`.
    #[must_use]
    pub fn around(bounds: &Aabb, period: Duration) -> Self {
        Self {
            target: bounds.center(),
            radius: bounds.radius().max(1.0),
            period,
            elapsed: Duration::ZERO,
        }
    }

    /// Advance the orbit by `dt`.
    pub fn advance(&mut self, dt: Duration) {
        self.elapsed += dt;
    }

    /// Current phase in turns, in `[0, 1)`.
    fn phase(&self) -> f64 {
        (self.elapsed.as_secs_f64() / self.period.as_secs_f64()).fract()
    }

    /// Current camera position.
    #[must_use]
    pub fn position(&self) -> DVec3 {
        let angle = self.phase() * TAU;
        // Dolly in during the first half turn and out during the second.
        let dolly = 0.5 - 0.5 * angle.cos();
        let distance = self.radius * (FAR_RADII + (NEAR_RADII - FAR_RADII) * dolly);

        let horizontal = distance * ELEVATION.cos();
        self.target
            + DVec3::new(
                horizontal * angle.cos(),
                horizontal * angle.sin(),
                distance * ELEVATION.sin(),
            )
    }

    /// Visibility and LOD inputs for the current position.
    #[must_use]
    pub fn view(&self, aspect: f64, screen_height: f64) -> CameraView {
        CameraView::look_at(self.position(), self.target, FOV_Y, aspect, screen_height)
    }
}

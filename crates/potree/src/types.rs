//! Camera-side types used for visibility and LOD decisions.

use glam::{DMat4, DVec3};
use potree_format::Aabb;

/// A view frustum for culling node bounding boxes.
#[derive(Debug, Clone, Copy)]
pub struct Frustum {
    /// Left, right, bottom, top, near and far planes as (normal, distance),
    /// normals pointing inward.
    planes: [(DVec3, f64); 6],
}

impl Frustum {
    /// Create a frustum from a view-projection matrix.
    #[must_use]
    pub fn from_matrix(vp: DMat4) -> Self {
        let m = vp.to_cols_array_2d();
        let row = |i: usize| [m[0][i], m[1][i], m[2][i], m[3][i]];
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));

        let plane = |a: [f64; 4], b: [f64; 4], sign: f64| {
            Self::normalize_plane(
                a[0] + sign * b[0],
                a[1] + sign * b[1],
                a[2] + sign * b[2],
                a[3] + sign * b[3],
            )
        };

        Self {
            planes: [
                plane(r3, r0, 1.0),
                plane(r3, r0, -1.0),
                plane(r3, r1, 1.0),
                plane(r3, r1, -1.0),
                // glam's right-handed projections map depth to [0, 1].
                Self::normalize_plane(r2[0], r2[1], r2[2], r2[3]),
                plane(r3, r2, -1.0),
            ],
        }
    }

    fn normalize_plane(a: f64, b: f64, c: f64, d: f64) -> (DVec3, f64) {
        let normal = DVec3::new(a, b, c);
        let length = normal.length();
        if length > 0.0 {
            (normal / length, d / length)
        } else {
            (DVec3::ZERO, 0.0)
        }
    }

    /// Test if an axis-aligned box intersects the frustum.
    ///
    /// Conservative: boxes near frustum corners may be reported as
    /// intersecting when they are not.
    #[must_use]
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.planes.iter().all(|&(normal, distance)| {
            // Corner furthest along the plane normal.
            let p = DVec3::select(normal.cmpge(DVec3::ZERO), aabb.max, aabb.min);
            normal.dot(p) + distance >= 0.0
        })
    }
}

/// Projected-size metric for LOD decisions.
#[derive(Debug, Clone, Copy)]
pub struct LodMetrics {
    /// Camera position in world space.
    pub camera_position: DVec3,
    /// Half the screen height divided by `tan(fov_y / 2)`.
    pub projection_factor: f64,
}

impl LodMetrics {
    /// Create LOD metrics from camera parameters.
    #[must_use]
    pub fn new(camera_position: DVec3, fov_y: f64, screen_height: f64) -> Self {
        let projection_factor = (screen_height / 2.0) / (fov_y / 2.0).tan();
        Self {
            camera_position,
            projection_factor,
        }
    }

    /// Projected radius in pixels of a bounding sphere.
    ///
    /// Infinite when the camera is inside the sphere, so nodes around the
    /// camera always win the priority order.
    #[must_use]
    pub fn projected_size(&self, center: DVec3, radius: f64) -> f64 {
        let distance = self.camera_position.distance(center);
        if distance <= radius {
            return f64::INFINITY;
        }
        radius * self.projection_factor / distance
    }

    /// Distance from the camera to `point`.
    #[must_use]
    pub fn distance(&self, point: DVec3) -> f64 {
        self.camera_position.distance(point)
    }
}

/// Everything the scheduler needs to know about the camera for one frame.
#[derive(Debug, Clone, Copy)]
pub struct CameraView {
    /// View frustum in world space.
    pub frustum: Frustum,
    /// LOD metrics.
    pub lod: LodMetrics,
}

impl CameraView {
    /// Create a view from a view-projection matrix and projection parameters.
    #[must_use]
    pub fn from_view_projection(
        view_projection: DMat4,
        camera_position: DVec3,
        fov_y: f64,
        screen_height: f64,
    ) -> Self {
        Self {
            frustum: Frustum::from_matrix(view_projection),
            lod: LodMetrics::new(camera_position, fov_y, screen_height),
        }
    }

    /// Create a perspective view of a z-up scene looking from `eye` at
    /// `target`.
    #[must_use]
    pub fn look_at(
        eye: DVec3,
        target: DVec3,
        fov_y: f64,
        aspect: f64,
        screen_height: f64,
    ) -> Self {
        let view = DMat4::look_at_rh(eye, target, DVec3::Z);
        let projection = DMat4::perspective_rh(fov_y, aspect, 0.1, 1.0e7);
        Self::from_view_projection(projection * view, eye, fov_y, screen_height)
    }
}

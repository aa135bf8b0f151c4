use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

use riftgate_shared::transform::look_rotation;

/// Rectangle in normalized frame coordinates, origin at the bottom left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ViewportRect {
    pub const FULL: Self = Self {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    pub fn from_min_max(min: Vec2, max: Vec2) -> Self {
        Self {
            x: min.x,
            y: min.y,
            width: max.x - min.x,
            height: max.y - min.y,
        }
    }

    pub fn min(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    pub fn max(&self) -> Vec2 {
        Vec2::new(self.x + self.width, self.y + self.height)
    }

    pub fn size(&self) -> Vec2 {
        Vec2::new(self.width, self.height)
    }

    pub fn overlaps(&self, other: &ViewportRect) -> bool {
        let min = self.min().max(other.min());
        let max = self.max().min(other.max());
        max.x > min.x && max.y > min.y
    }

    /// `(x, y, width, height)`, the layout the surface shader expects.
    pub fn as_vec4(&self) -> Vec4 {
        Vec4::new(self.x, self.y, self.width, self.height)
    }
}

impl Default for ViewportRect {
    fn default() -> Self {
        Self::FULL
    }
}

/// Complete camera configuration. Cloning it is the snapshot that portal
/// rendering saves and restores around every recursive step.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub rotation: Quat,
    /// Vertical field of view in radians.
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub viewport: ViewportRect,
    pub projection: Mat4,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(
            Vec3::new(0.0, 1.7, 0.0),
            Quat::IDENTITY,
            70.0_f32.to_radians(),
            16.0 / 9.0,
            0.1,
            1000.0,
        )
    }
}

impl Camera {
    pub fn new(position: Vec3, rotation: Quat, fov: f32, aspect: f32, near: f32, far: f32) -> Self {
        let mut camera = Self {
            position,
            rotation,
            fov,
            aspect,
            near,
            far,
            viewport: ViewportRect::FULL,
            projection: Mat4::IDENTITY,
        };
        camera.reset_projection();
        camera
    }

    pub fn look_at(&mut self, target: Vec3) {
        let forward = (target - self.position).normalize_or_zero();
        if forward != Vec3::ZERO {
            // Camera looks down local -Z.
            self.rotation = look_rotation(-forward, Vec3::Y);
        }
    }

    /// Symmetric perspective matching the current fov, aspect and clip planes.
    pub fn reset_projection(&mut self) {
        self.projection = Mat4::perspective_rh(
            self.fov,
            self.aspect.max(0.0001),
            self.near.max(0.0001),
            self.far.max(self.near + 0.0001),
        );
    }

    pub fn forward_direction(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    pub fn up_direction(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward_direction(), self.up_direction())
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection * self.view_matrix()
    }

    /// Signed distance of `point` in front of the camera plane.
    pub fn plane_distance(&self, point: Vec3) -> f32 {
        (point - self.position).dot(self.forward_direction())
    }

    /// Projects into normalized frame coordinates, already offset into this
    /// camera's viewport. `None` when the point is behind the camera plane.
    pub fn world_to_viewport_point(&self, point: Vec3) -> Option<Vec2> {
        let clip = self.view_projection_matrix() * point.extend(1.0);
        if clip.w <= f32::EPSILON {
            return None;
        }
        let ndc = clip.truncate().truncate() / clip.w;
        let uv = ndc * 0.5 + Vec2::splat(0.5);
        Some(self.viewport.min() + uv * self.viewport.size())
    }
}

use std::f32::consts::PI;
use std::fmt;

use glam::{Mat3, Quat, Vec3};

/// Rigid placement of a portal or a traveler in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// The same pose turned half a revolution about its own up axis.
    pub fn mirrored(&self) -> Self {
        Self {
            position: self.position,
            rotation: self.rotation * Quat::from_rotation_y(PI),
        }
    }

    pub fn inverse_transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation.inverse() * (point - self.position)
    }

    pub fn transform_point(&self, local: Vec3) -> Vec3 {
        self.position + self.rotation * local
    }

    pub fn inverse_transform_direction(&self, direction: Vec3) -> Vec3 {
        self.rotation.inverse() * direction
    }

    pub fn transform_direction(&self, local: Vec3) -> Vec3 {
        self.rotation * local
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformError {
    MissingDestination,
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingDestination => write!(f, "portal has no destination"),
        }
    }
}

impl std::error::Error for TransformError {}

pub fn scale_ratio(source_height: f32, destination_height: f32) -> f32 {
    destination_height / source_height
}

/// Maps a world-space point entering `source` to where it emerges from
/// `destination`, scaled by `scale_ratio`.
pub fn position_through(source: &Pose, destination: &Pose, scale_ratio: f32, point: Vec3) -> Vec3 {
    let local = source.inverse_transform_point(point) * scale_ratio;
    destination.mirrored().transform_point(local)
}

pub fn direction_through(source: &Pose, destination: &Pose, direction: Vec3) -> Vec3 {
    let local = source.inverse_transform_direction(direction);
    destination.mirrored().transform_direction(local)
}

pub fn rotation_through(source: &Pose, destination: &Pose, rotation: Quat) -> Quat {
    let forward = direction_through(source, destination, rotation * Vec3::Z);
    let up = direction_through(source, destination, rotation * Vec3::Y);
    look_rotation(forward, up)
}

/// Builds an orthonormal rotation whose local +Z is `forward` and whose
/// local +Y lies in the plane spanned by `forward` and `up`.
pub fn look_rotation(forward: Vec3, up: Vec3) -> Quat {
    let forward = forward.normalize_or_zero();
    if forward == Vec3::ZERO {
        return Quat::IDENTITY;
    }

    let mut right = up.cross(forward).normalize_or_zero();
    if right == Vec3::ZERO {
        right = forward.any_orthonormal_vector();
    }
    let up = forward.cross(right);

    Quat::from_mat3(&Mat3::from_cols(right, up, forward)).normalize()
}

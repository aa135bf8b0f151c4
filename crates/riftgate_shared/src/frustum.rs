use glam::{Mat4, Vec3, Vec4};

use crate::physics::AABB;

/// Six normalized planes; `dot(plane.xyz, p) + plane.w >= 0` is inside.
/// Extraction assumes a `[0, 1]` clip depth range.
#[derive(Debug, Clone, Copy)]
pub struct Frustum {
    pub planes: [Vec4; 6],
}

impl Frustum {
    pub fn from_view_proj(vp: Mat4) -> Self {
        let row0 = vp.row(0);
        let row1 = vp.row(1);
        let row2 = vp.row(2);
        let row3 = vp.row(3);

        let mut planes = [
            row3 + row0,
            row3 - row0,
            row3 + row1,
            row3 - row1,
            row2,
            row3 - row2,
        ];

        for plane in &mut planes {
            let len = plane.truncate().length();
            if len > 0.0001 {
                *plane /= len;
            }
        }
        Self { planes }
    }

    pub fn contains_aabb(&self, bounds: &AABB) -> bool {
        let center = bounds.center();
        let half = bounds.half_extents();
        for plane in &self.planes {
            let normal = plane.truncate();
            let d = normal.dot(center) + plane.w;
            let r = half.dot(normal.abs());
            if d < -r {
                return false;
            }
        }
        true
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(point) + plane.w >= 0.0)
    }
}

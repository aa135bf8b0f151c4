use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use riftgate_shared::portal::Portal;

use super::ImageHandle;
use crate::camera::ViewportRect;

pub const PORTAL_SURFACE_SHADER: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/shaders/portal_surface.wgsl"
));

const PORTAL_SURFACE_OFFSET: f32 = 0.001;

/// Image composited onto a portal surface, together with the viewport of
/// the camera that draws that surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceBinding {
    pub image: ImageHandle,
    pub viewport: ViewportRect,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct PortalSurfaceUniform {
    pub model: [[f32; 4]; 4],
    pub viewport: [f32; 4],
    pub fallback_color: [f32; 4],
    pub enabled: f32,
    pub _padding: [f32; 3],
}

impl PortalSurfaceUniform {
    pub fn new(portal: &Portal, binding: Option<&SurfaceBinding>, fallback_color: [f32; 4]) -> Self {
        Self {
            model: portal_model_matrix(portal).to_cols_array_2d(),
            viewport: binding
                .map(|binding| binding.viewport.as_vec4().to_array())
                .unwrap_or([0.0, 0.0, 1.0, 1.0]),
            fallback_color,
            enabled: if binding.is_some() { 1.0 } else { 0.0 },
            _padding: [0.0; 3],
        }
    }
}

/// Maps the unit quad `[-1, 1]^2` onto the portal rectangle, nudged off the
/// wall along the front normal.
pub fn portal_model_matrix(portal: &Portal) -> Mat4 {
    let half = portal.half_extents();
    let right = portal.right() * half.x.max(0.001);
    let up = portal.up() * half.y.max(0.001);
    let normal = portal.normal();
    let translation = portal.pose().position + normal * PORTAL_SURFACE_OFFSET;

    Mat4::from_cols(
        right.extend(0.0),
        up.extend(0.0),
        normal.extend(0.0),
        translation.extend(1.0),
    )
}

#[cfg(test)]
mod tests {
    use glam::{Quat, Vec2, Vec3, Vec4};
    use riftgate_shared::portal::{PortalDesc, PortalSet};

    use super::{portal_model_matrix, PortalSurfaceUniform, SurfaceBinding};
    use crate::camera::ViewportRect;
    use crate::renderer::ImageHandle;

    /// Mirrors the lookup in `fs_main`.
    fn sample_uv(viewport: Vec4, local_screen_uv: Vec2) -> Vec2 {
        Vec2::new(viewport.x, viewport.y) + Vec2::new(viewport.z, viewport.w) * local_screen_uv
    }

    #[test]
    fn sample_uv_remaps_into_viewport() {
        let viewport = Vec4::new(0.25, 0.5, 0.5, 0.25);
        assert_eq!(sample_uv(viewport, Vec2::ZERO), Vec2::new(0.25, 0.5));
        assert_eq!(sample_uv(viewport, Vec2::ONE), Vec2::new(0.75, 0.75));
        assert_eq!(sample_uv(viewport, Vec2::splat(0.5)), Vec2::new(0.5, 0.625));
    }

    #[test]
    fn model_matrix_maps_unit_quad_to_corners() {
        let mut portals = PortalSet::new();
        let id = portals
            .activate(PortalDesc::new(Vec3::new(1.0, 2.0, 3.0), Quat::IDENTITY, 2.0, 0.5))
            .unwrap();
        let portal = portals.get(id).unwrap();
        let model = portal_model_matrix(portal);

        let top_right = model.transform_point3(Vec3::new(1.0, 1.0, 0.0));
        assert!((top_right - portal.corners().top_right).length() < 0.01);
    }

    #[test]
    fn unbound_surface_is_disabled() {
        let mut portals = PortalSet::new();
        let id = portals
            .activate(PortalDesc::new(Vec3::ZERO, Quat::IDENTITY, 1.0, 1.0))
            .unwrap();
        let portal = portals.get(id).unwrap();

        let unbound = PortalSurfaceUniform::new(portal, None, [0.1, 0.1, 0.1, 1.0]);
        assert_eq!(unbound.enabled, 0.0);

        let binding = SurfaceBinding {
            image: ImageHandle(3),
            viewport: ViewportRect {
                x: 0.5,
                y: 0.0,
                width: 0.5,
                height: 1.0,
            },
        };
        let bound = PortalSurfaceUniform::new(portal, Some(&binding), [0.1, 0.1, 0.1, 1.0]);
        assert_eq!(bound.enabled, 1.0);
        assert_eq!(bound.viewport, [0.5, 0.0, 0.5, 1.0]);
    }
}

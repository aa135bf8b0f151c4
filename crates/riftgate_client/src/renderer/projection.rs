//! Projection math for portal views: screen rectangles of portal
//! surfaces, off-axis frusta for sub-viewports and oblique near planes.
//!
//! All matrices are right-handed with a `[0, 1]` clip depth range, matching
//! `glam::Mat4::perspective_rh` and wgpu.

use glam::{Mat4, UVec2, Vec2, Vec3, Vec4};

use crate::camera::{Camera, ViewportRect};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScreenRect {
    Projected(ViewportRect),
    /// At least one corner is behind the camera plane, so the projected
    /// rectangle cannot be trusted.
    BehindCamera,
}

pub fn project_corners(corners: &[Vec3; 4], camera: &Camera) -> ScreenRect {
    let mut min = Vec2::splat(f32::INFINITY);
    let mut max = Vec2::splat(f32::NEG_INFINITY);
    for corner in corners {
        let Some(point) = camera.world_to_viewport_point(*corner) else {
            return ScreenRect::BehindCamera;
        };
        min = min.min(point);
        max = max.max(point);
    }
    ScreenRect::Projected(ViewportRect::from_min_max(min, max))
}

/// Floors the minimum and ceils the maximum in pixels, then clamps to the
/// parent viewport. `None` when nothing of positive area is left.
pub fn snap_to_pixels(
    rect: ViewportRect,
    parent: ViewportRect,
    output_size: UVec2,
) -> Option<ViewportRect> {
    let size = output_size.max(UVec2::ONE).as_vec2();
    let parent_min = (parent.min() * size).round();
    let parent_max = (parent.max() * size).round();

    let min = (rect.min() * size).floor().max(parent_min).min(parent_max);
    let max = (rect.max() * size).ceil().max(parent_min).min(parent_max);
    let extent = max - min;
    if extent.x <= 0.0 || extent.y <= 0.0 {
        return None;
    }
    Some(ViewportRect::from_min_max(min / size, max / size))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewportPlan {
    Rect(ViewportRect),
    /// A corner was behind the parent camera, so the whole parent viewport
    /// is used.
    FullParent(ViewportRect),
    OffScreen,
    ZeroArea,
}

/// Sub-viewport a portal occupies inside `parent`'s view.
pub fn plan_viewport(corners: &[Vec3; 4], parent: &Camera, output_size: UVec2) -> ViewportPlan {
    let (rect, full_parent) = match project_corners(corners, parent) {
        ScreenRect::Projected(rect) => {
            if !rect.overlaps(&parent.viewport) {
                return ViewportPlan::OffScreen;
            }
            (rect, false)
        }
        // TODO: clip the portal polygon against the near plane instead of
        // widening to the whole parent viewport.
        ScreenRect::BehindCamera => (parent.viewport, true),
    };
    match snap_to_pixels(rect, parent.viewport, output_size) {
        Some(snapped) if full_parent => ViewportPlan::FullParent(snapped),
        Some(snapped) => ViewportPlan::Rect(snapped),
        None => ViewportPlan::ZeroArea,
    }
}

pub fn perspective_off_center_rh(
    left: f32,
    right: f32,
    bottom: f32,
    top: f32,
    near: f32,
    far: f32,
) -> Mat4 {
    let width = right - left;
    let height = top - bottom;
    let depth = near - far;
    Mat4::from_cols(
        Vec4::new(2.0 * near / width, 0.0, 0.0, 0.0),
        Vec4::new(0.0, 2.0 * near / height, 0.0, 0.0),
        Vec4::new(
            (right + left) / width,
            (top + bottom) / height,
            far / depth,
            -1.0,
        ),
        Vec4::new(0.0, 0.0, near * far / depth, 0.0),
    )
}

/// Frustum covering exactly `viewport` of the symmetric frustum described
/// by `fov` and `aspect`.
pub fn off_axis_projection(
    fov: f32,
    aspect: f32,
    near: f32,
    far: f32,
    viewport: &ViewportRect,
) -> Mat4 {
    let near = near.max(0.0001);
    let far = far.max(near + 0.0001);
    let top = near * (fov * 0.5).tan();
    let bottom = -top;
    let right = top * aspect.max(0.0001);
    let left = -right;

    let min = viewport.min();
    let max = viewport.max();
    perspective_off_center_rh(
        lerp(left, right, min.x),
        lerp(left, right, max.x),
        lerp(bottom, top, min.y),
        lerp(bottom, top, max.y),
        near,
        far,
    )
}

pub fn world_plane_to_camera(view: Mat4, plane_world: Vec4) -> Vec4 {
    view.inverse().transpose() * plane_world
}

/// Replaces the near plane of `proj` with `clip_plane_camera` (camera
/// space, kept side positive). The camera origin must lie on the negative
/// side; otherwise the projection is returned unchanged.
pub fn apply_oblique_clip(proj: Mat4, clip_plane_camera: Vec4) -> Mat4 {
    if clip_plane_camera.w >= 0.0 {
        return proj;
    }

    let q = proj.inverse()
        * Vec4::new(
            clip_plane_camera.x.signum(),
            clip_plane_camera.y.signum(),
            1.0,
            1.0,
        );
    let denom = clip_plane_camera.dot(q);
    if denom.abs() < 1e-5 {
        return proj;
    }

    let c = clip_plane_camera * (proj.row(3).dot(q) / denom);
    let mut m = proj.to_cols_array_2d();
    m[0][2] = c.x;
    m[1][2] = c.y;
    m[2][2] = c.z;
    m[3][2] = c.w;
    Mat4::from_cols_array_2d(&m)
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Quat, UVec2, Vec3, Vec4};

    use super::{
        apply_oblique_clip, off_axis_projection, plan_viewport, project_corners, snap_to_pixels,
        ScreenRect, ViewportPlan,
    };
    use crate::camera::{Camera, ViewportRect};

    fn approx_eq_mat4(a: Mat4, b: Mat4) -> bool {
        a.to_cols_array()
            .iter()
            .zip(b.to_cols_array().iter())
            .all(|(x, y)| (x - y).abs() < 1.0e-4)
    }

    fn origin_camera() -> Camera {
        Camera::new(Vec3::ZERO, Quat::IDENTITY, 60.0_f32.to_radians(), 2.0, 0.1, 100.0)
    }

    #[test]
    fn full_viewport_matches_symmetric_perspective() {
        let fov = 60.0_f32.to_radians();
        let proj = off_axis_projection(fov, 2.0, 0.1, 100.0, &ViewportRect::FULL);
        assert!(approx_eq_mat4(proj, Mat4::perspective_rh(fov, 2.0, 0.1, 100.0)));
    }

    #[test]
    fn sub_viewport_projection_maps_its_rectangle_to_full_ndc() {
        let camera = origin_camera();
        let viewport = ViewportRect {
            x: 0.25,
            y: 0.5,
            width: 0.5,
            height: 0.25,
        };
        let sub = off_axis_projection(camera.fov, camera.aspect, 0.1, 100.0, &viewport);

        let point = Vec3::new(0.7, 1.1, -6.0);
        let full_uv = camera.world_to_viewport_point(point).unwrap();
        let clip = sub * point.extend(1.0);
        let sub_uv = clip.truncate().truncate() / clip.w * 0.5 + glam::Vec2::splat(0.5);

        let expected = (full_uv - viewport.min()) / viewport.size();
        assert!((sub_uv - expected).length() < 1.0e-4);
    }

    #[test]
    fn snapping_floors_min_ceils_max_and_clamps_to_parent() {
        let rect = ViewportRect {
            x: 0.101,
            y: -0.25,
            width: 0.3,
            height: 0.5,
        };
        let snapped = snap_to_pixels(rect, ViewportRect::FULL, UVec2::new(100, 100)).unwrap();
        assert!((snapped.x - 0.10).abs() < 1.0e-6);
        assert!((snapped.width - 0.31).abs() < 1.0e-6);
        assert!((snapped.y - 0.0).abs() < 1.0e-6);
        assert!((snapped.height - 0.25).abs() < 1.0e-6);

        let outside = ViewportRect {
            x: 1.2,
            y: 0.0,
            width: 0.1,
            height: 0.1,
        };
        assert!(snap_to_pixels(outside, ViewportRect::FULL, UVec2::new(100, 100)).is_none());
    }

    #[test]
    fn corners_behind_camera_fall_back_to_parent_viewport() {
        let mut camera = origin_camera();
        camera.viewport = ViewportRect {
            x: 0.25,
            y: 0.25,
            width: 0.5,
            height: 0.5,
        };
        let behind = [
            Vec3::new(-1.0, 1.0, 3.0),
            Vec3::new(1.0, 1.0, 3.0),
            Vec3::new(-1.0, -1.0, 3.0),
            Vec3::new(1.0, -1.0, 3.0),
        ];

        assert_eq!(project_corners(&behind, &camera), ScreenRect::BehindCamera);
        let ViewportPlan::FullParent(planned) = plan_viewport(&behind, &camera, UVec2::new(1280, 720))
        else {
            panic!("expected the full parent viewport");
        };
        assert!((planned.x - 0.25).abs() < 1.0e-6);
        assert!((planned.y - 0.25).abs() < 1.0e-6);
        assert!((planned.width - 0.5).abs() < 1.0e-6);
        assert!((planned.height - 0.5).abs() < 1.0e-6);
    }

    #[test]
    fn off_screen_portal_has_no_viewport() {
        let camera = origin_camera();
        let far_right = [
            Vec3::new(50.0, 1.0, -5.0),
            Vec3::new(52.0, 1.0, -5.0),
            Vec3::new(50.0, -1.0, -5.0),
            Vec3::new(52.0, -1.0, -5.0),
        ];
        let plan = plan_viewport(&far_right, &camera, UVec2::new(1280, 720));
        assert_eq!(plan, ViewportPlan::OffScreen);
    }

    #[test]
    fn oblique_clip_moves_near_plane_onto_the_clip_plane() {
        let proj = Mat4::perspective_rh(60.0_f32.to_radians(), 1.0, 0.1, 100.0);
        // Keep everything farther than five units down -Z.
        let plane = Vec4::new(0.0, 0.0, -1.0, -5.0);
        let oblique = apply_oblique_clip(proj, plane);

        let depth = |p: Vec3| {
            let clip = oblique * p.extend(1.0);
            clip.z / clip.w
        };
        assert!(depth(Vec3::new(0.0, 0.0, -5.0)).abs() < 1.0e-4);
        assert!(depth(Vec3::new(1.0, 1.0, -5.0)).abs() < 1.0e-4);
        assert!(depth(Vec3::new(0.0, 0.0, -4.0)) < 0.0);
        let inside = depth(Vec3::new(0.0, 0.0, -20.0));
        assert!(inside > 0.0 && inside <= 1.0);
    }

    #[test]
    fn oblique_clip_ignores_planes_facing_the_camera() {
        let proj = Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0);
        let plane = Vec4::new(0.0, 0.0, 1.0, 5.0);
        assert_eq!(apply_oblique_clip(proj, plane), proj);
    }
}

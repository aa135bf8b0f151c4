use std::fmt;

use riftgate_shared::frustum::Frustum;
use riftgate_shared::portal::{Portal, PortalConfigError, PortalDesc, PortalId, PortalSet};
use riftgate_shared::transform;
use tracing::{debug, trace};

use super::lights::{DirectionalLight, LightId, LightSet};
use super::projection::{
    apply_oblique_clip, off_axis_projection, plan_viewport, world_plane_to_camera, ViewportPlan,
};
use super::surface::SurfaceBinding;
use super::{ImageHandle, RenderBackend, ViewRequest};
use crate::camera::Camera;
use crate::settings::RenderSettings;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortalRenderConfig {
    pub max_recursion: u32,
    pub min_near_clip: f32,
    /// Distance the oblique clip plane is pulled toward the camera.
    pub clip_plane_offset: f32,
}

impl Default for PortalRenderConfig {
    fn default() -> Self {
        Self::from(&RenderSettings::default())
    }
}

impl From<&RenderSettings> for PortalRenderConfig {
    fn from(settings: &RenderSettings) -> Self {
        Self {
            max_recursion: settings.max_recursion,
            min_near_clip: settings.min_near_clip,
            clip_plane_offset: settings.clip_plane_offset,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Culled,
    Rendered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    OutOfOrder {
        expected: FramePhase,
        found: FramePhase,
    },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfOrder { expected, found } => write!(
                f,
                "frame phase out of order: expected {expected:?}, found {found:?}"
            ),
        }
    }
}

impl std::error::Error for FrameError {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortalFrameStats {
    pub attempts: u32,
    pub nested_attempts: u32,
    pub rendered: u32,
    pub skipped_no_destination: u32,
    pub skipped_not_facing: u32,
    pub skipped_frustum: u32,
    pub skipped_off_screen: u32,
    pub skipped_zero_area: u32,
    pub full_viewport_fallbacks: u32,
    pub recursion_limited: u32,
    pub max_depth: u32,
    pub images_acquired: u32,
    pub images_released: u32,
}

impl PortalFrameStats {
    pub fn skipped(&self) -> u32 {
        self.skipped_no_destination
            + self.skipped_not_facing
            + self.skipped_frustum
            + self.skipped_off_screen
            + self.skipped_zero_area
    }
}

/// Live portals, live lights and the one scratch camera shared by every
/// portal view of a frame.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    pub portals: PortalSet,
    pub lights: LightSet,
    scratch: Camera,
}

impl RenderContext {
    pub fn new(portals: PortalSet, lights: LightSet) -> Self {
        Self {
            portals,
            lights,
            scratch: Camera::default(),
        }
    }
}

/// Plans and drives the recursive portal views of each frame.
///
/// A frame runs `pre_cull`, `render_main` and `post_render` in that order.
/// Portal images are rendered during `pre_cull` so they are bound before the
/// main view draws the portal surfaces.
pub struct PortalRenderer {
    config: PortalRenderConfig,
    context: RenderContext,
    phase: FramePhase,
    frame_images: Vec<ImageHandle>,
    stats: PortalFrameStats,
}

impl PortalRenderer {
    pub fn new(config: PortalRenderConfig, context: RenderContext) -> Self {
        Self {
            config,
            context,
            phase: FramePhase::Idle,
            frame_images: Vec::new(),
            stats: PortalFrameStats::default(),
        }
    }

    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut RenderContext {
        &mut self.context
    }

    pub fn register_portal(&mut self, desc: PortalDesc) -> Result<PortalId, PortalConfigError> {
        self.context.portals.activate(desc)
    }

    pub fn unregister_portal(&mut self, id: PortalId) -> Option<Portal> {
        self.context.portals.deactivate(id)
    }

    pub fn register_light(&mut self, light: DirectionalLight) -> LightId {
        self.context.lights.register(light)
    }

    pub fn unregister_light(&mut self, id: LightId) -> bool {
        self.context.lights.unregister(id)
    }

    /// Renders every visible portal view for `viewer` and binds the results
    /// to the portal surfaces. `occupied` is the portal whose trigger zone
    /// the traveler is standing in, if any.
    pub fn pre_cull<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        viewer: &Camera,
        occupied: Option<PortalId>,
    ) -> Result<(), FrameError> {
        self.expect_phase(FramePhase::Idle)?;
        self.stats = PortalFrameStats::default();
        self.context.scratch = viewer.clone();

        let ids = self.context.portals.ids().to_vec();
        let mut bindings = Vec::with_capacity(ids.len());
        for id in ids {
            let destination = self
                .context
                .portals
                .get(id)
                .and_then(|portal| portal.destination());
            let show_traveler = !(occupied == Some(id) && destination != Some(id));
            let image = self.try_render_portal(backend, id, 0, show_traveler);
            if let Some(image) = image {
                self.frame_images.push(image);
            }
            bindings.push((id, image));
        }

        for (id, image) in bindings {
            backend.bind_surface(
                id,
                image.map(|image| SurfaceBinding {
                    image,
                    viewport: viewer.viewport,
                }),
            );
        }

        self.phase = FramePhase::Culled;
        Ok(())
    }

    pub fn render_main<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        viewer: &Camera,
    ) -> Result<(), FrameError> {
        self.expect_phase(FramePhase::Culled)?;
        backend.render_view(
            &ViewRequest {
                camera: viewer,
                depth: 0,
                show_traveler: true,
                lights: &self.context.lights,
            },
            None,
        );
        self.phase = FramePhase::Rendered;
        Ok(())
    }

    /// Releases the frame's top-level images and resets light propagation.
    pub fn post_render<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
    ) -> Result<PortalFrameStats, FrameError> {
        self.expect_phase(FramePhase::Rendered)?;
        while let Some(image) = self.frame_images.pop() {
            backend.release_image(image);
            self.stats.images_released += 1;
        }
        self.context.lights.reset_offset();
        self.phase = FramePhase::Idle;

        debug!(
            "Portal frame: {} attempts, {} nested, {} rendered, {} skipped, depth {}",
            self.stats.attempts,
            self.stats.nested_attempts,
            self.stats.rendered,
            self.stats.skipped(),
            self.stats.max_depth
        );
        Ok(self.stats)
    }

    pub fn render_frame<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        viewer: &Camera,
        occupied: Option<PortalId>,
    ) -> Result<PortalFrameStats, FrameError> {
        self.pre_cull(backend, viewer, occupied)?;
        self.render_main(backend, viewer)?;
        self.post_render(backend)
    }

    fn expect_phase(&self, expected: FramePhase) -> Result<(), FrameError> {
        if self.phase != expected {
            return Err(FrameError::OutOfOrder {
                expected,
                found: self.phase,
            });
        }
        Ok(())
    }

    /// One portal attempt using the scratch camera as the parent view.
    /// The scratch camera and light offset are restored and every nested
    /// image is released before this returns, whatever the outcome.
    fn try_render_portal<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        id: PortalId,
        depth: u32,
        show_traveler: bool,
    ) -> Option<ImageHandle> {
        if depth == 0 {
            self.stats.attempts += 1;
        } else {
            self.stats.nested_attempts += 1;
        }

        let parent = self.context.scratch.clone();
        let light_offset = self.context.lights.offset();
        let mut nested = Vec::new();

        let image = self.render_portal_level(backend, id, &parent, depth, show_traveler, &mut nested);

        while let Some(nested_image) = nested.pop() {
            backend.release_image(nested_image);
            self.stats.images_released += 1;
        }
        self.context.scratch = parent;
        self.context.lights.set_offset(light_offset);
        image
    }

    fn render_portal_level<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        id: PortalId,
        parent: &Camera,
        depth: u32,
        show_traveler: bool,
        nested: &mut Vec<ImageHandle>,
    ) -> Option<ImageHandle> {
        let portals = &self.context.portals;
        let portal = portals.get(id)?;
        let Some(destination) = portals.destination_of(id) else {
            trace!("Skipping {id} at depth {depth}: no destination");
            self.stats.skipped_no_destination += 1;
            return None;
        };
        if !portal.faces(parent.position) {
            trace!("Skipping {id} at depth {depth}: facing away");
            self.stats.skipped_not_facing += 1;
            return None;
        }
        if !Frustum::from_view_proj(parent.view_projection_matrix()).contains_aabb(portal.bounds()) {
            trace!("Skipping {id} at depth {depth}: outside frustum");
            self.stats.skipped_frustum += 1;
            return None;
        }

        let viewport = match plan_viewport(&portal.corners().to_array(), parent, backend.output_size()) {
            ViewportPlan::Rect(rect) => rect,
            ViewportPlan::FullParent(rect) => {
                self.stats.full_viewport_fallbacks += 1;
                rect
            }
            ViewportPlan::OffScreen => {
                trace!("Skipping {id} at depth {depth}: off screen");
                self.stats.skipped_off_screen += 1;
                return None;
            }
            ViewportPlan::ZeroArea => {
                trace!("Skipping {id} at depth {depth}: empty viewport");
                self.stats.skipped_zero_area += 1;
                return None;
            }
        };

        let dest_id = destination.id();
        let dest_position = destination.pose().position;
        let dest_normal = destination.normal();
        let dest_corners = destination.corners().to_array();
        let scale = transform::scale_ratio(portal.height(), destination.height());
        let position = portals.position_through(id, parent.position);
        let rotation = portals.rotation_through(id, parent.rotation);
        let light_offset = portals.rotation_through(id, self.context.lights.offset());

        let camera = &mut self.context.scratch;
        camera.position = position;
        camera.rotation = rotation;
        camera.viewport = viewport;
        let nearest = dest_corners
            .iter()
            .map(|corner| camera.plane_distance(*corner))
            .fold(f32::INFINITY, f32::min);
        camera.near = nearest.max(self.config.min_near_clip);
        camera.far = (parent.far * scale).max(camera.near + 0.001);
        camera.projection =
            off_axis_projection(camera.fov, camera.aspect, camera.near, camera.far, &viewport);
        self.context.lights.set_offset(light_offset);
        self.stats.max_depth = self.stats.max_depth.max(depth);

        let recurse = depth < self.config.max_recursion;
        if !recurse {
            self.stats.recursion_limited += 1;
        }
        let ids = self.context.portals.ids().to_vec();
        let mut bindings = Vec::with_capacity(ids.len());
        for child in ids {
            let image = if recurse && child != dest_id {
                self.try_render_portal(backend, child, depth + 1, true)
            } else {
                None
            };
            if let Some(image) = image {
                nested.push(image);
            }
            bindings.push((child, image));
        }
        let viewport = self.context.scratch.viewport;
        for (child, image) in bindings {
            backend.bind_surface(child, image.map(|image| SurfaceBinding { image, viewport }));
        }

        let camera = &mut self.context.scratch;
        let clip_normal = if (camera.position - dest_position).dot(dest_normal) >= 0.0 {
            -dest_normal
        } else {
            dest_normal
        };
        let clip_point = dest_position - clip_normal * self.config.clip_plane_offset;
        let plane_world = clip_normal.extend(-clip_normal.dot(clip_point));
        let plane_camera = world_plane_to_camera(camera.view_matrix(), plane_world);
        camera.projection = apply_oblique_clip(camera.projection, plane_camera);

        let image = backend.acquire_image();
        self.stats.images_acquired += 1;
        backend.render_view(
            &ViewRequest {
                camera: &self.context.scratch,
                depth,
                show_traveler,
                lights: &self.context.lights,
            },
            Some(image),
        );
        self.stats.rendered += 1;
        trace!("Rendered {id} at depth {depth} into {:?}", image);
        Some(image)
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use glam::{Quat, UVec2, Vec3};
    use riftgate_shared::portal::{PortalDesc, PortalId, PortalSet};

    use super::{FrameError, FramePhase, PortalRenderConfig, PortalRenderer, RenderContext};
    use crate::camera::{Camera, ViewportRect};
    use crate::renderer::lights::{DirectionalLight, LightSet};
    use crate::renderer::projection::off_axis_projection;
    use crate::renderer::recording::{BackendCall, RecordingBackend};
    use crate::renderer::ImageHandle;

    fn viewer_at(position: Vec3) -> Camera {
        Camera::new(position, Quat::IDENTITY, 70.0_f32.to_radians(), 16.0 / 9.0, 0.1, 1000.0)
    }

    fn renderer(portals: PortalSet, max_recursion: u32) -> PortalRenderer {
        PortalRenderer::new(
            PortalRenderConfig {
                max_recursion,
                ..PortalRenderConfig::default()
            },
            RenderContext::new(portals, LightSet::new()),
        )
    }

    fn backend() -> RecordingBackend {
        RecordingBackend::new(UVec2::new(1280, 720))
    }

    /// `a` at the origin leads to `b`, which sits far away with `c` in
    /// plain view behind it. `c` leads back to `a`; `b` is unlinked.
    fn corridor() -> (PortalSet, PortalId, PortalId, PortalId) {
        let mut portals = PortalSet::new();
        let a = portals
            .activate(PortalDesc::new(Vec3::ZERO, Quat::IDENTITY, 2.0, 1.0))
            .unwrap();
        let b = portals
            .activate(PortalDesc::new(
                Vec3::new(40.0, 0.0, 10.0),
                Quat::from_rotation_y(PI),
                2.0,
                1.0,
            ))
            .unwrap();
        let c = portals
            .activate(PortalDesc::new(Vec3::new(40.0, 0.0, 0.0), Quat::IDENTITY, 2.0, 1.0))
            .unwrap();
        portals.link(a, Some(b)).unwrap();
        portals.link(c, Some(a)).unwrap();
        (portals, a, b, c)
    }

    fn single_portal(linked: bool) -> (PortalSet, PortalId) {
        let mut portals = PortalSet::new();
        let a = portals
            .activate(PortalDesc::new(Vec3::ZERO, Quat::IDENTITY, 2.0, 1.0))
            .unwrap();
        if linked {
            portals.link(a, Some(a)).unwrap();
        }
        (portals, a)
    }

    fn image_calls(backend: &RecordingBackend) -> Vec<BackendCall> {
        backend
            .calls()
            .iter()
            .filter(|call| !matches!(call, BackendCall::Bind { .. }))
            .cloned()
            .collect()
    }

    #[test]
    fn zero_recursion_renders_one_level_without_nested_attempts() {
        let (portals, _, _, _) = corridor();
        let mut renderer = renderer(portals, 0);
        let mut backend = backend();
        let viewer = viewer_at(Vec3::new(0.0, 0.0, 5.0));

        let stats = renderer.render_frame(&mut backend, &viewer, None).unwrap();

        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.nested_attempts, 0);
        assert_eq!(stats.rendered, 1);
        assert_eq!(stats.skipped_no_destination, 1);
        assert_eq!(stats.skipped_frustum, 1);
        assert_eq!(stats.recursion_limited, 1);
        assert_eq!(backend.renders().count(), 2);
    }

    #[test]
    fn nested_images_are_released_bottom_up() {
        let (portals, a, _, c) = corridor();
        let mut renderer = renderer(portals, 1);
        let mut backend = backend();
        let viewer = viewer_at(Vec3::new(0.0, 0.0, 5.0));

        let stats = renderer.render_frame(&mut backend, &viewer, None).unwrap();

        assert_eq!(stats.nested_attempts, 2);
        assert_eq!(stats.rendered, 2);
        assert_eq!(stats.max_depth, 1);
        assert_eq!(stats.images_acquired, 2);
        assert_eq!(stats.images_released, 2);
        assert_eq!(backend.live_image_count(), 0);

        let calls = image_calls(&backend);
        assert_eq!(calls.len(), 7);
        assert_eq!(calls[0], BackendCall::Acquire(ImageHandle(0)));
        assert!(matches!(
            calls[1],
            BackendCall::Render { target: Some(ImageHandle(0)), depth: 1, .. }
        ));
        assert_eq!(calls[2], BackendCall::Acquire(ImageHandle(1)));
        assert!(matches!(
            calls[3],
            BackendCall::Render { target: Some(ImageHandle(1)), depth: 0, .. }
        ));
        assert_eq!(calls[4], BackendCall::Release(ImageHandle(0)));
        assert!(matches!(calls[5], BackendCall::Render { target: None, .. }));
        assert_eq!(calls[6], BackendCall::Release(ImageHandle(1)));

        let bound_to_a = backend.calls().iter().rev().find_map(|call| match call {
            BackendCall::Bind { portal, binding } if *portal == a => Some(*binding),
            _ => None,
        });
        let binding = bound_to_a.flatten().unwrap();
        assert_eq!(binding.image, ImageHandle(1));
        assert_eq!(binding.viewport, ViewportRect::FULL);

        let nested_binding = backend.calls().iter().find_map(|call| match call {
            BackendCall::Bind {
                portal,
                binding: Some(binding),
            } if *portal == c => Some(*binding),
            _ => None,
        });
        let nested_binding = nested_binding.unwrap();
        assert_eq!(nested_binding.image, ImageHandle(0));
        assert!(nested_binding.viewport.width < 0.5);
    }

    #[test]
    fn portal_views_use_destination_near_plane_and_propagated_light() {
        let (portals, _, _, _) = corridor();
        let mut renderer = renderer(portals, 1);
        let mut backend = backend();
        let viewer = viewer_at(Vec3::new(0.0, 0.0, 5.0));

        renderer.render_frame(&mut backend, &viewer, None).unwrap();

        let mut renders = backend.renders();
        let Some(BackendCall::Render {
            near, light_offset, ..
        }) = renders.next()
        else {
            panic!("expected the nested render first");
        };
        assert!((near - 15.0).abs() < 1.0e-3);
        assert!((*light_offset * Vec3::Z - Vec3::NEG_Z).length() < 1.0e-4);

        let Some(BackendCall::Render {
            near,
            position,
            light_offset,
            ..
        }) = renders.next()
        else {
            panic!("expected the first level render");
        };
        assert!((near - 5.0).abs() < 1.0e-3);
        assert!((*position - Vec3::new(40.0, 0.0, 15.0)).length() < 1.0e-3);
        assert!((*light_offset * Vec3::Z - Vec3::Z).length() < 1.0e-4);
    }

    #[test]
    fn scratch_camera_and_lights_are_restored() {
        let (portals, _, _, _) = corridor();
        let mut renderer = renderer(portals, 2);
        let mut backend = backend();
        let viewer = viewer_at(Vec3::new(0.0, 0.0, 5.0));

        renderer.pre_cull(&mut backend, &viewer, None).unwrap();
        assert_eq!(renderer.context().scratch, viewer);
        assert_eq!(renderer.context().lights.offset(), Quat::IDENTITY);
        assert_eq!(renderer.phase, FramePhase::Culled);

        renderer.render_main(&mut backend, &viewer).unwrap();
        renderer.post_render(&mut backend).unwrap();
        assert_eq!(renderer.phase, FramePhase::Idle);
        assert_eq!(backend.live_image_count(), 0);
    }

    #[test]
    fn missing_destination_and_back_facing_portals_are_skipped() {
        let (portals, a) = single_portal(false);
        let mut renderer = renderer(portals, 4);
        let mut backend = backend();
        let stats = renderer
            .render_frame(&mut backend, &viewer_at(Vec3::new(0.0, 0.0, 5.0)), None)
            .unwrap();
        assert_eq!(stats.skipped_no_destination, 1);
        assert_eq!(stats.rendered, 0);
        assert!(backend
            .calls()
            .contains(&BackendCall::Bind { portal: a, binding: None }));

        let (portals, _) = single_portal(true);
        let mut renderer = PortalRenderer::new(
            PortalRenderConfig::default(),
            RenderContext::new(portals, LightSet::new()),
        );
        let mut behind = viewer_at(Vec3::new(0.0, 0.0, -5.0));
        behind.look_at(Vec3::ZERO);
        let stats = renderer.render_frame(&mut backend, &behind, None).unwrap();
        assert_eq!(stats.skipped_not_facing, 1);
        assert_eq!(stats.rendered, 0);
    }

    #[test]
    fn corner_behind_camera_falls_back_to_full_viewport() {
        let (portals, _) = single_portal(true);
        let mut renderer = renderer(portals, 0);
        let mut backend = backend();
        let mut viewer = viewer_at(Vec3::new(0.0, 0.0, 0.5));
        viewer.look_at(Vec3::new(-1.0, 0.0, 0.3));

        let stats = renderer.render_frame(&mut backend, &viewer, None).unwrap();

        assert_eq!(stats.full_viewport_fallbacks, 1);
        assert_eq!(stats.rendered, 1);
        let Some(BackendCall::Render { viewport, near, .. }) = backend.renders().next() else {
            panic!("expected a portal render");
        };
        assert_eq!(*viewport, ViewportRect::FULL);
        assert!(*near >= 0.01);
    }

    #[test]
    fn traveler_is_hidden_only_inside_a_non_self_portal() {
        let (portals, a, _, _) = corridor();
        let mut renderer = renderer(portals, 0);
        let mut backend = backend();
        let viewer = viewer_at(Vec3::new(0.0, 0.0, 5.0));
        renderer.render_frame(&mut backend, &viewer, Some(a)).unwrap();
        assert!(matches!(
            backend.renders().next(),
            Some(BackendCall::Render { show_traveler: false, .. })
        ));

        let (portals, a) = single_portal(true);
        let mut renderer = PortalRenderer::new(
            PortalRenderConfig {
                max_recursion: 0,
                ..PortalRenderConfig::default()
            },
            RenderContext::new(portals, LightSet::new()),
        );
        let mut backend = RecordingBackend::new(UVec2::new(640, 480));
        renderer.render_frame(&mut backend, &viewer, Some(a)).unwrap();
        assert!(matches!(
            backend.renders().next(),
            Some(BackendCall::Render { show_traveler: true, target: Some(_), .. })
        ));
    }

    #[test]
    fn portal_view_clips_geometry_between_camera_and_destination() {
        let mut portals = PortalSet::new();
        let a = portals
            .activate(PortalDesc::new(Vec3::ZERO, Quat::IDENTITY, 2.0, 1.0))
            .unwrap();
        let d = portals
            .activate(PortalDesc::new(
                Vec3::new(40.0, 0.0, 10.0),
                Quat::from_rotation_y(PI),
                2.0,
                1.0,
            ))
            .unwrap();
        portals.link(a, Some(d)).unwrap();
        let destination = portals.get(d).unwrap().clone();

        // Seen at an angle so the destination plane is slanted in the portal view.
        let mut viewer = viewer_at(Vec3::new(3.0, 0.0, 5.0));
        viewer.look_at(Vec3::ZERO);
        let mapped_rotation = portals.rotation_through(a, viewer.rotation);

        let mut renderer = renderer(portals, 0);
        let mut backend = backend();
        renderer.render_frame(&mut backend, &viewer, None).unwrap();

        let Some(BackendCall::Render {
            target: Some(_),
            position,
            viewport,
            near,
            far,
            projection,
            ..
        }) = backend.renders().next()
        else {
            panic!("expected a portal view");
        };
        let mut camera = viewer.clone();
        camera.position = *position;
        camera.rotation = mapped_rotation;
        let view = camera.view_matrix();

        let toward_camera = if destination.signed_distance(camera.position) < 0.0 {
            -destination.normal()
        } else {
            destination.normal()
        };
        let far_corner = destination
            .corners()
            .to_array()
            .into_iter()
            .max_by(|l, r| camera.plane_distance(*l).total_cmp(&camera.plane_distance(*r)))
            .unwrap();

        // Behind the destination surface but past the near plane.
        let hidden = far_corner + toward_camera * 0.3;
        assert!(camera.plane_distance(hidden) > *near);

        let clip = *projection * view * hidden.extend(1.0);
        assert!(clip.w > 0.0);
        assert!(clip.z < 0.0);

        let plain = off_axis_projection(camera.fov, camera.aspect, *near, *far, viewport);
        let unclipped = plain * view * hidden.extend(1.0);
        assert!(unclipped.z / unclipped.w > 0.0);

        let beyond = destination.pose().position - toward_camera * 2.0;
        let clip = *projection * view * beyond.extend(1.0);
        let depth = clip.z / clip.w;
        assert!(depth > 0.0 && depth <= 1.0);
    }

    #[test]
    fn far_clip_scales_with_destination_height() {
        let mut portals = PortalSet::new();
        let a = portals
            .activate(PortalDesc::new(Vec3::ZERO, Quat::IDENTITY, 2.0, 1.0))
            .unwrap();
        let tall = portals
            .activate(PortalDesc::new(
                Vec3::new(40.0, 0.0, 10.0),
                Quat::from_rotation_y(PI),
                6.0,
                1.0,
            ))
            .unwrap();
        portals.link(a, Some(tall)).unwrap();
        let ratio = portals.scale_ratio(a).unwrap();
        assert!((ratio - 3.0).abs() < 1.0e-6);

        let mut renderer = renderer(portals, 0);
        let mut backend = backend();
        let viewer = viewer_at(Vec3::new(0.0, 0.0, 5.0));
        renderer.render_frame(&mut backend, &viewer, None).unwrap();

        let Some(BackendCall::Render {
            target: Some(_),
            near,
            far,
            ..
        }) = backend.renders().next()
        else {
            panic!("expected a portal view");
        };
        assert!((far - viewer.far * ratio).abs() < 1.0e-2);
        assert!((near - 15.0).abs() < 1.0e-3);
    }

    #[test]
    fn unregistered_portal_is_neither_attempted_nor_bound() {
        let (portals, a, _, _) = corridor();
        let mut renderer = renderer(portals, 0);
        let mut backend = backend();
        let viewer = viewer_at(Vec3::new(0.0, 0.0, 5.0));

        let first = renderer.render_frame(&mut backend, &viewer, None).unwrap();
        assert_eq!(first.attempts, 3);
        assert_eq!(first.rendered, 1);

        assert!(renderer.unregister_portal(a).is_some());
        backend.take_calls();
        let second = renderer.render_frame(&mut backend, &viewer, None).unwrap();

        assert_eq!(second.attempts, 2);
        assert_eq!(second.rendered, 0);
        assert!(!backend.calls().iter().any(|call| matches!(
            call,
            BackendCall::Bind { portal, .. } if *portal == a
        )));
    }

    #[test]
    fn unregistered_light_is_not_passed_to_views() {
        let (portals, _) = single_portal(true);
        let mut renderer = renderer(portals, 0);
        let sun = renderer.register_light(DirectionalLight {
            base_rotation: Quat::IDENTITY,
            intensity: 1.0,
        });
        let moon = renderer.register_light(DirectionalLight {
            base_rotation: Quat::from_rotation_x(PI),
            intensity: 0.2,
        });
        let mut backend = backend();
        let viewer = viewer_at(Vec3::new(0.0, 0.0, 5.0));

        renderer.render_frame(&mut backend, &viewer, None).unwrap();
        assert!(backend.renders().all(|call| matches!(
            call,
            BackendCall::Render { lights, .. } if *lights == vec![sun, moon]
        )));

        assert!(renderer.unregister_light(sun));
        backend.take_calls();
        renderer.render_frame(&mut backend, &viewer, None).unwrap();

        let views: Vec<_> = backend.renders().collect();
        assert_eq!(views.len(), 2);
        assert!(views.iter().all(|call| matches!(
            call,
            BackendCall::Render { lights, .. } if *lights == vec![moon]
        )));
    }

    #[test]
    fn phases_must_run_in_order() {
        let (portals, _) = single_portal(true);
        let mut renderer = renderer(portals, 1);
        let mut backend = backend();
        let viewer = viewer_at(Vec3::new(0.0, 0.0, 5.0));

        assert_eq!(
            renderer.render_main(&mut backend, &viewer),
            Err(FrameError::OutOfOrder {
                expected: FramePhase::Culled,
                found: FramePhase::Idle,
            })
        );
        renderer.pre_cull(&mut backend, &viewer, None).unwrap();
        assert!(renderer.pre_cull(&mut backend, &viewer, None).is_err());
        assert!(renderer.post_render(&mut backend).is_err());
    }
}

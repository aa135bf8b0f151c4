use glam::{Mat4, Quat, UVec2, Vec3};
use riftgate_shared::portal::PortalId;
use rustc_hash::FxHashSet;
use tracing::{trace, warn};

use super::lights::LightId;
use super::surface::SurfaceBinding;
use super::{ImageHandle, RenderBackend, ViewRequest};
use crate::camera::ViewportRect;

#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Acquire(ImageHandle),
    Release(ImageHandle),
    Render {
        target: Option<ImageHandle>,
        depth: u32,
        position: Vec3,
        viewport: ViewportRect,
        near: f32,
        far: f32,
        projection: Mat4,
        show_traveler: bool,
        light_offset: Quat,
        lights: Vec<LightId>,
    },
    Bind {
        portal: PortalId,
        binding: Option<SurfaceBinding>,
    },
}

/// Headless backend that only records what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    output_size: UVec2,
    next_image: u32,
    live_images: FxHashSet<ImageHandle>,
    calls: Vec<BackendCall>,
    recorded_calls: usize,
}

impl RecordingBackend {
    pub fn new(output_size: UVec2) -> Self {
        Self {
            output_size: output_size.max(UVec2::ONE),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<BackendCall> {
        std::mem::take(&mut self.calls)
    }

    /// Calls drained by `end_frame` so far.
    pub fn recorded_calls(&self) -> usize {
        self.recorded_calls
    }

    pub fn live_image_count(&self) -> usize {
        self.live_images.len()
    }

    pub fn renders(&self) -> impl Iterator<Item = &BackendCall> {
        self.calls
            .iter()
            .filter(|call| matches!(call, BackendCall::Render { .. }))
    }
}

impl RenderBackend for RecordingBackend {
    fn output_size(&self) -> UVec2 {
        self.output_size
    }

    fn acquire_image(&mut self) -> ImageHandle {
        let image = ImageHandle(self.next_image);
        self.next_image += 1;
        self.live_images.insert(image);
        self.calls.push(BackendCall::Acquire(image));
        image
    }

    fn release_image(&mut self, image: ImageHandle) {
        if !self.live_images.remove(&image) {
            warn!("Released unknown image {:?}", image);
        }
        self.calls.push(BackendCall::Release(image));
    }

    fn render_view(&mut self, view: &ViewRequest<'_>, target: Option<ImageHandle>) {
        self.calls.push(BackendCall::Render {
            target,
            depth: view.depth,
            position: view.camera.position,
            viewport: view.camera.viewport,
            near: view.camera.near,
            far: view.camera.far,
            projection: view.camera.projection,
            show_traveler: view.show_traveler,
            light_offset: view.lights.offset(),
            lights: view.lights.directions().map(|(id, _, _)| id).collect(),
        });
    }

    fn bind_surface(&mut self, portal: PortalId, binding: Option<SurfaceBinding>) {
        self.calls.push(BackendCall::Bind { portal, binding });
    }

    /// Drops the frame's calls so a long run does not keep every frame.
    fn end_frame(&mut self) {
        trace!(
            "Recorded {} calls with {} views this frame",
            self.calls().len(),
            self.renders().count()
        );
        self.recorded_calls += self.take_calls().len();
    }
}

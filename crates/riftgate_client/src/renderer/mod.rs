pub mod gpu;
pub mod lights;
pub mod portal_renderer;
pub mod projection;
pub mod recording;
pub mod surface;

use glam::UVec2;
use riftgate_shared::portal::PortalId;

use crate::camera::Camera;
use lights::LightSet;
use surface::SurfaceBinding;

/// Opaque handle to a temporary render image owned by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle(pub u32);

/// Everything a backend needs to draw one view.
#[derive(Debug, Clone, Copy)]
pub struct ViewRequest<'a> {
    pub camera: &'a Camera,
    /// 0 for the viewer's own pass and first-level portal views.
    pub depth: u32,
    pub show_traveler: bool,
    pub lights: &'a LightSet,
}

/// The drawing side of portal rendering.
///
/// Portal rendering decides what to draw and where; a backend owns the
/// images and the scene. Calls arrive strictly in order on one thread.
pub trait RenderBackend {
    fn output_size(&self) -> UVec2;

    /// Allocates an image sized to the full output.
    fn acquire_image(&mut self) -> ImageHandle;

    fn release_image(&mut self, image: ImageHandle);

    /// `None` targets the final output.
    fn render_view(&mut self, view: &ViewRequest<'_>, target: Option<ImageHandle>);

    /// `None` disables the surface so it draws its fallback color.
    fn bind_surface(&mut self, portal: PortalId, binding: Option<SurfaceBinding>);

    /// Called by the frame loop once a frame's views are done.
    fn end_frame(&mut self) {}
}

use std::cell::RefCell;
use std::env;
use std::f32::consts::{FRAC_PI_2, PI};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use glam::{Quat, UVec2, Vec3};
use riftgate_core::events::ObserverId;
use riftgate_shared::physics::{ColliderScene, HitTarget, AABB};
use riftgate_shared::portal::{PortalConfigError, PortalDesc, PortalId, PortalSet};
use riftgate_shared::portal_raycast::raycast;
use riftgate_shared::transform::Pose;
use tracing::{debug, error, info, warn};

use crate::camera::Camera;
use crate::renderer::gpu::GpuBackend;
use crate::renderer::lights::{DirectionalLight, LightId, LightSet};
use crate::renderer::portal_renderer::{
    FrameError, PortalFrameStats, PortalRenderConfig, PortalRenderer, RenderContext,
};
use crate::renderer::recording::RecordingBackend;
use crate::renderer::RenderBackend;
use crate::settings::RenderSettings;
use crate::teleport::{GrabLink, TeleportEvent, TeleportGateway};

const DEFAULT_FRAMES: u32 = 60;
const SETTINGS_FILE: &str = "riftgate.toml";
const WALK_STEP: f32 = 0.2;
const EYE_OFFSET: Vec3 = Vec3::new(0.0, 0.6, 0.0);
const GAZE_TARGET: Vec3 = Vec3::new(0.0, 0.4, -4.0);
const CROSSING_OFFSET: Vec3 = Vec3::new(0.0, 0.5, 0.0);
const RAYCAST_DISTANCE: f32 = 100.0;
const HELD_OBJECT: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
struct Options {
    frames: u32,
    settings_path: PathBuf,
    gpu: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            frames: DEFAULT_FRAMES,
            settings_path: PathBuf::from(SETTINGS_FILE),
            gpu: false,
        }
    }
}

/// `Ok(None)` means help was requested.
fn parse_args<I>(args: I) -> Result<Option<Options>, String>
where
    I: IntoIterator<Item = String>,
{
    let mut options = Options::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--frames" => {
                let Some(value) = args.next() else {
                    return Err("--frames expects a numeric argument".to_string());
                };
                options.frames = value
                    .parse::<u32>()
                    .map_err(|err| format!("invalid frame count '{value}': {err}"))?;
            }
            "--settings" => {
                let Some(value) = args.next() else {
                    return Err("--settings expects a path argument".to_string());
                };
                options.settings_path = PathBuf::from(value);
            }
            "--gpu" => options.gpu = true,
            "--help" | "-h" => return Ok(None),
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(Some(options))
}

struct DemoScene {
    renderer: PortalRenderer,
    colliders: ColliderScene,
    gateway: TeleportGateway,
    grab: Rc<RefCell<GrabLink>>,
    grab_observer: ObserverId,
    lights: Vec<LightId>,
    camera: Camera,
}

impl DemoScene {
    /// Drops the held object and unregisters every portal, light and
    /// observer the demo set up.
    fn teardown(&mut self) {
        if let Some(held) = self.grab.borrow_mut().release() {
            debug!("Released object {}", held.object);
        }
        if !self.gateway.unregister_observer(self.grab_observer) {
            warn!("Grab observer was already unregistered");
        }

        let portals: Vec<PortalId> = self
            .renderer
            .context()
            .portals
            .iter()
            .map(|portal| portal.id())
            .collect();
        for id in portals {
            self.renderer.unregister_portal(id);
            self.colliders.remove_portal_receiver(id);
        }
        for light in self.lights.drain(..) {
            self.renderer.unregister_light(light);
        }

        let lights = &self.renderer.context().lights;
        if lights.is_empty() {
            debug!("Demo scene torn down");
        } else {
            warn!("{} lights still registered after teardown", lights.len());
        }
    }
}

/// Two equal-sized portals joined at a right angle and a pair whose exit
/// is twice as tall as its entry. The traveler starts in front of the
/// first portal, holding an object.
fn build_demo_scene(settings: &RenderSettings) -> Result<DemoScene, PortalConfigError> {
    let mut renderer = PortalRenderer::new(
        PortalRenderConfig::from(settings),
        RenderContext::new(PortalSet::new(), LightSet::new()),
    );
    let entry = renderer.register_portal(PortalDesc::new(
        Vec3::new(0.0, 1.25, 0.0),
        Quat::IDENTITY,
        2.5,
        0.8,
    ))?;
    let exit = renderer.register_portal(PortalDesc::new(
        Vec3::new(20.0, 1.25, -10.0),
        Quat::from_rotation_y(FRAC_PI_2),
        2.5,
        0.8,
    ))?;
    let small = renderer.register_portal(PortalDesc::new(
        Vec3::new(-12.0, 0.75, 0.0),
        Quat::IDENTITY,
        1.5,
        0.8,
    ))?;
    let large = renderer.register_portal(PortalDesc::new(
        Vec3::new(-12.0, 1.5, -30.0),
        Quat::from_rotation_y(PI),
        3.0,
        0.8,
    ))?;
    let portals = &mut renderer.context_mut().portals;
    portals.link(entry, Some(exit))?;
    portals.link(exit, Some(entry))?;
    portals.link(small, Some(large))?;
    portals.link(large, Some(small))?;

    let mut colliders = ColliderScene::new();
    for portal in renderer.context().portals.iter() {
        colliders.add_portal_receiver(portal);
    }
    colliders.add_solid(
        1,
        AABB::from_center_half_extents(Vec3::new(0.0, -0.5, -15.0), Vec3::new(60.0, 0.5, 60.0)),
    );
    colliders.add_solid(
        2,
        AABB::from_center_half_extents(Vec3::new(40.0, 2.0, -10.0), Vec3::new(0.5, 2.0, 10.0)),
    );

    let sun = renderer.register_light(DirectionalLight {
        base_rotation: Quat::from_rotation_x(-0.8),
        intensity: 1.0,
    });

    let grab = Rc::new(RefCell::new(GrabLink::new()));
    grab.borrow_mut().grab(HELD_OBJECT);

    let mut gateway = TeleportGateway::new(Pose::new(Vec3::new(0.0, 1.0, 6.0), Quat::IDENTITY))
        .with_test_offset(CROSSING_OFFSET);
    gateway.register_observer(|event: &TeleportEvent| {
        info!(
            "Traveler crossed {} into {}, scale now {:.2}",
            event.portal, event.destination, event.new_scale
        );
    });
    let grab_link = Rc::clone(&grab);
    let grab_observer = gateway.register_observer(move |event: &TeleportEvent| {
        grab_link.borrow_mut().on_teleport(event);
    });

    let camera = Camera::new(
        Vec3::ZERO,
        Quat::IDENTITY,
        settings.fov_degrees.to_radians(),
        settings.aspect(),
        settings.near_clip,
        settings.far_clip,
    );

    Ok(DemoScene {
        renderer,
        colliders,
        gateway,
        grab,
        grab_observer,
        lights: vec![sun],
        camera,
    })
}

#[derive(Debug, Default)]
struct DemoSummary {
    frames: u32,
    teleports: u32,
    portal_views: u32,
    deepest: u32,
}

fn run_frames<B: RenderBackend + ?Sized>(
    scene: &mut DemoScene,
    backend: &mut B,
    settings: &RenderSettings,
    frames: u32,
) -> Result<DemoSummary, FrameError> {
    let mut summary = DemoSummary::default();
    let mut trail = Vec::new();

    for frame in 0..frames {
        let pose = *scene.gateway.pose();
        let step = pose.rotation * Vec3::NEG_Z * WALK_STEP * scene.gateway.cumulative_scale();
        scene
            .gateway
            .set_pose(Pose::new(pose.position + step, pose.rotation));

        let portals = &scene.renderer.context().portals;
        scene
            .gateway
            .update_occupancy(portals, settings.trigger_depth);
        if scene.gateway.update(portals).is_some() {
            summary.teleports += 1;
        }

        let pose = *scene.gateway.pose();
        scene.camera.position =
            pose.transform_point(EYE_OFFSET * scene.gateway.cumulative_scale());
        scene
            .camera
            .look_at(pose.transform_point(GAZE_TARGET * scene.gateway.cumulative_scale()));

        let stats: PortalFrameStats =
            scene
                .renderer
                .render_frame(backend, &scene.camera, scene.gateway.occupied())?;
        summary.frames += 1;
        summary.portal_views += stats.rendered;
        summary.deepest = summary.deepest.max(stats.max_depth);

        let portals = &scene.renderer.context().portals;
        let hit = raycast(
            &scene.colliders,
            portals,
            scene.camera.position,
            scene.camera.forward_direction(),
            RAYCAST_DISTANCE,
            settings.raycast_max_hops,
            Some(&mut trail),
        );
        match hit.map(|hit| hit.target) {
            Some(HitTarget::Solid(id)) => debug!(
                "Frame {frame}: {} portal views, gaze hits solid {id} through {} portals",
                stats.rendered,
                trail.len()
            ),
            Some(HitTarget::PortalReceiver(portal)) => {
                warn!("Frame {frame}: gaze trace ended on {portal}")
            }
            None => debug!("Frame {frame}: {} portal views, gaze hits nothing", stats.rendered),
        }
        backend.end_frame();
    }

    Ok(summary)
}

pub fn run() {
    let _ = tracing_subscriber::fmt().with_target(false).try_init();

    let options = match parse_args(env::args().skip(1)) {
        Ok(Some(options)) => options,
        Ok(None) => {
            println!("Usage: riftgate_client [--frames <n>] [--settings <path>] [--gpu]");
            return;
        }
        Err(message) => {
            eprintln!("{message}");
            std::process::exit(2);
        }
    };

    let settings = load_or_create_settings(&options.settings_path);

    let mut scene = match build_demo_scene(&settings) {
        Ok(scene) => scene,
        Err(err) => {
            error!("Failed to build demo scene: {err}");
            std::process::exit(1);
        }
    };

    let output_size = UVec2::new(settings.output_width, settings.output_height);
    let result = if options.gpu {
        let mut backend = match GpuBackend::new_headless(output_size) {
            Ok(backend) => backend,
            Err(err) => {
                error!("Failed to create GPU backend: {err}");
                std::process::exit(1);
            }
        };
        backend.sync_portals(&scene.renderer.context().portals);
        let result = run_frames(&mut scene, &mut backend, &settings, options.frames);
        info!(
            "GPU backend rendered {} views with {} pooled images",
            backend.views_rendered(),
            backend.pooled_image_count()
        );
        result
    } else {
        let mut backend = RecordingBackend::new(output_size);
        let result = run_frames(&mut scene, &mut backend, &settings, options.frames);
        if backend.live_image_count() > 0 {
            warn!("{} images still live after the last frame", backend.live_image_count());
        }
        info!("Recording backend captured {} calls", backend.recorded_calls());
        result
    };

    match result {
        Ok(summary) => {
            let holding = scene.grab.borrow().held().is_some();
            info!(
                "Rendered {} frames: {} portal views, deepest recursion {}, {} teleports, final scale {:.2}, still holding: {holding}",
                summary.frames,
                summary.portal_views,
                summary.deepest,
                summary.teleports,
                scene.gateway.cumulative_scale()
            );
        }
        Err(err) => {
            error!("Frame loop aborted: {err}");
            std::process::exit(1);
        }
    }
    scene.teardown();
}

/// Writes the defaults out when no settings file exists yet.
fn load_or_create_settings(path: &Path) -> RenderSettings {
    if !path.exists() {
        let settings = RenderSettings::default();
        if let Err(err) = settings.save(path) {
            warn!("Failed to create default settings at {}: {err}", path.display());
        }
        return settings;
    }
    match RenderSettings::load(path) {
        Ok(settings) => settings,
        Err(err) => {
            warn!("Failed to load settings from {}: {err}", path.display());
            RenderSettings::default()
        }
    }
}

use std::fmt;
use std::mem;

use bytemuck::{Pod, Zeroable};
use glam::UVec2;
use riftgate_shared::portal::{Portal, PortalId, PortalSet};
use rustc_hash::FxHashMap;
use tracing::{info, warn};
use wgpu::util::DeviceExt;

use super::surface::{PortalSurfaceUniform, SurfaceBinding, PORTAL_SURFACE_SHADER};
use super::{ImageHandle, RenderBackend, ViewRequest};
use crate::camera::ViewportRect;

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const FALLBACK_COLOR: [f32; 4] = [0.08, 0.08, 0.1, 1.0];

#[derive(Debug)]
pub enum GpuBackendError {
    RequestAdapter(wgpu::RequestAdapterError),
    RequestDevice(wgpu::RequestDeviceError),
}

impl fmt::Display for GpuBackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestAdapter(err) => write!(f, "failed to request adapter: {err}"),
            Self::RequestDevice(err) => write!(f, "failed to request device: {err}"),
        }
    }
}

impl std::error::Error for GpuBackendError {}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct SurfaceVertex {
    position: [f32; 3],
}

impl SurfaceVertex {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<SurfaceVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x3,
            }],
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct CameraUniform {
    view_proj: [[f32; 4]; 4],
}

/// Color and depth pair sized to the output, plus the bind group used to
/// sample its color from a portal surface.
struct RenderImage {
    _color_texture: wgpu::Texture,
    color_view: wgpu::TextureView,
    _depth_texture: wgpu::Texture,
    depth_view: wgpu::TextureView,
    sample_bind_group: wgpu::BindGroup,
}

struct SurfaceSlot {
    portal: Portal,
    binding: Option<SurfaceBinding>,
    params_buffer: wgpu::Buffer,
    params_bind_group: wgpu::BindGroup,
}

/// wgpu backend that renders every view into pooled offscreen images.
/// Scene content is reduced to a depth-tinted clear plus the composited
/// portal surfaces.
pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    output_size: UVec2,
    surface_pipeline: wgpu::RenderPipeline,
    texture_bind_group_layout: wgpu::BindGroupLayout,
    params_bind_group_layout: wgpu::BindGroupLayout,
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    sampler: wgpu::Sampler,
    surface_vertex_buffer: wgpu::Buffer,
    surface_index_buffer: wgpu::Buffer,
    surface_index_count: u32,
    output: RenderImage,
    placeholder: RenderImage,
    free_images: Vec<RenderImage>,
    live_images: FxHashMap<ImageHandle, RenderImage>,
    next_image: u32,
    surfaces: FxHashMap<PortalId, SurfaceSlot>,
    views_rendered: u32,
}

impl GpuBackend {
    pub fn new_headless(output_size: UVec2) -> Result<Self, GpuBackendError> {
        let output_size = output_size.max(UVec2::ONE);
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(GpuBackendError::RequestAdapter)?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Riftgate Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(GpuBackendError::RequestDevice)?;
        info!("Using adapter {}", adapter.get_info().name);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Portal Surface Shader"),
            source: wgpu::ShaderSource::Wgsl(PORTAL_SURFACE_SHADER.into()),
        });

        let camera_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Camera Bind Group Layout"),
                entries: &[uniform_layout_entry(wgpu::ShaderStages::VERTEX)],
            });
        let texture_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Portal Texture Bind Group Layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            multisampled: false,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            });
        let params_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Portal Params Bind Group Layout"),
                entries: &[uniform_layout_entry(wgpu::ShaderStages::VERTEX_FRAGMENT)],
            });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Portal Image Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Portal Surface Pipeline Layout"),
            bind_group_layouts: &[
                &camera_bind_group_layout,
                &texture_bind_group_layout,
                &params_bind_group_layout,
            ],
            push_constant_ranges: &[],
        });
        let surface_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Portal Surface Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[SurfaceVertex::desc()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: Some(wgpu::Face::Back),
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Camera Uniform Buffer"),
            contents: bytemuck::bytes_of(&CameraUniform {
                view_proj: glam::Mat4::IDENTITY.to_cols_array_2d(),
            }),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Camera Bind Group"),
            layout: &camera_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
        });

        // Front face is +Z, counter-clockwise seen from the front.
        let surface_vertices = [
            SurfaceVertex {
                position: [-1.0, -1.0, 0.0],
            },
            SurfaceVertex {
                position: [1.0, -1.0, 0.0],
            },
            SurfaceVertex {
                position: [1.0, 1.0, 0.0],
            },
            SurfaceVertex {
                position: [-1.0, 1.0, 0.0],
            },
        ];
        let surface_indices: [u16; 6] = [0, 1, 2, 0, 2, 3];
        let surface_vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Portal Surface Vertex Buffer"),
            contents: bytemuck::cast_slice(&surface_vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let surface_index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Portal Surface Index Buffer"),
            contents: bytemuck::cast_slice(&surface_indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        let output = create_image(
            &device,
            "Output",
            output_size,
            &texture_bind_group_layout,
            &sampler,
        );
        let placeholder = create_image(
            &device,
            "Placeholder",
            UVec2::ONE,
            &texture_bind_group_layout,
            &sampler,
        );

        Ok(Self {
            device,
            queue,
            output_size,
            surface_pipeline,
            texture_bind_group_layout,
            params_bind_group_layout,
            camera_buffer,
            camera_bind_group,
            sampler,
            surface_vertex_buffer,
            surface_index_buffer,
            surface_index_count: surface_indices.len() as u32,
            output,
            placeholder,
            free_images: Vec::new(),
            live_images: FxHashMap::default(),
            next_image: 0,
            surfaces: FxHashMap::default(),
            views_rendered: 0,
        })
    }

    /// Mirrors the live portal set so surfaces can be drawn. Portals are
    /// static once placed, so this only needs calling after registration
    /// changes.
    pub fn sync_portals(&mut self, portals: &PortalSet) {
        self.surfaces.retain(|id, _| portals.get(*id).is_some());
        for portal in portals.iter() {
            if let Some(slot) = self.surfaces.get_mut(&portal.id()) {
                slot.portal = portal.clone();
                continue;
            }
            let params_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Portal Params Buffer"),
                contents: bytemuck::bytes_of(&PortalSurfaceUniform::new(
                    portal,
                    None,
                    FALLBACK_COLOR,
                )),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
            let params_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Portal Params Bind Group"),
                layout: &self.params_bind_group_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                }],
            });
            self.surfaces.insert(
                portal.id(),
                SurfaceSlot {
                    portal: portal.clone(),
                    binding: None,
                    params_buffer,
                    params_bind_group,
                },
            );
        }
    }

    pub fn views_rendered(&self) -> u32 {
        self.views_rendered
    }

    pub fn pooled_image_count(&self) -> usize {
        self.free_images.len() + self.live_images.len()
    }

    fn image(&self, target: Option<ImageHandle>) -> Option<&RenderImage> {
        match target {
            Some(handle) => self.live_images.get(&handle),
            None => Some(&self.output),
        }
    }
}

impl RenderBackend for GpuBackend {
    fn output_size(&self) -> UVec2 {
        self.output_size
    }

    fn acquire_image(&mut self) -> ImageHandle {
        let image = match self.free_images.pop() {
            Some(image) => image,
            None => create_image(
                &self.device,
                "Portal",
                self.output_size,
                &self.texture_bind_group_layout,
                &self.sampler,
            ),
        };
        let handle = ImageHandle(self.next_image);
        self.next_image = self.next_image.wrapping_add(1);
        self.live_images.insert(handle, image);
        handle
    }

    fn release_image(&mut self, image: ImageHandle) {
        match self.live_images.remove(&image) {
            Some(image) => self.free_images.push(image),
            None => warn!("Released unknown image {:?}", image),
        }
    }

    fn render_view(&mut self, view: &ViewRequest<'_>, target: Option<ImageHandle>) {
        let Some(image) = self.image(target) else {
            warn!("Render target {:?} is not a live image", target);
            return;
        };

        self.queue.write_buffer(
            &self.camera_buffer,
            0,
            bytemuck::bytes_of(&CameraUniform {
                view_proj: view.camera.view_projection_matrix().to_cols_array_2d(),
            }),
        );
        for slot in self.surfaces.values() {
            let binding = slot
                .binding
                .filter(|binding| {
                    Some(binding.image) != target && self.live_images.contains_key(&binding.image)
                });
            self.queue.write_buffer(
                &slot.params_buffer,
                0,
                bytemuck::bytes_of(&PortalSurfaceUniform::new(
                    &slot.portal,
                    binding.as_ref(),
                    FALLBACK_COLOR,
                )),
            );
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Portal View Encoder"),
            });
        {
            let tint = 0.1 + 0.08 * view.depth as f64;
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Portal View Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &image.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: tint,
                            g: tint * 1.2,
                            b: 0.25 + tint,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &image.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let (x, y, width, height) = pixel_viewport(&view.camera.viewport, self.output_size);
            render_pass.set_viewport(x, y, width, height, 0.0, 1.0);
            render_pass.set_pipeline(&self.surface_pipeline);
            render_pass.set_bind_group(0, &self.camera_bind_group, &[]);
            render_pass.set_vertex_buffer(0, self.surface_vertex_buffer.slice(..));
            render_pass.set_index_buffer(
                self.surface_index_buffer.slice(..),
                wgpu::IndexFormat::Uint16,
            );
            for slot in self.surfaces.values() {
                let texture_bind_group = slot
                    .binding
                    .filter(|binding| Some(binding.image) != target)
                    .and_then(|binding| self.live_images.get(&binding.image))
                    .map(|image| &image.sample_bind_group)
                    .unwrap_or(&self.placeholder.sample_bind_group);
                render_pass.set_bind_group(1, texture_bind_group, &[]);
                render_pass.set_bind_group(2, &slot.params_bind_group, &[]);
                render_pass.draw_indexed(0..self.surface_index_count, 0, 0..1);
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        self.views_rendered += 1;
    }

    fn bind_surface(&mut self, portal: PortalId, binding: Option<SurfaceBinding>) {
        if let Some(slot) = self.surfaces.get_mut(&portal) {
            slot.binding = binding;
        }
    }
}

/// Converts a bottom-left normalized viewport into wgpu's top-left pixel
/// space.
fn pixel_viewport(viewport: &ViewportRect, output_size: UVec2) -> (f32, f32, f32, f32) {
    let size = output_size.as_vec2();
    let x = (viewport.x * size.x).clamp(0.0, size.x);
    let y = ((1.0 - viewport.y - viewport.height) * size.y).clamp(0.0, size.y);
    let width = (viewport.width * size.x).min(size.x - x).max(1.0);
    let height = (viewport.height * size.y).min(size.y - y).max(1.0);
    (x, y, width, height)
}

fn uniform_layout_entry(visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn create_image(
    device: &wgpu::Device,
    label: &str,
    size: UVec2,
    texture_bind_group_layout: &wgpu::BindGroupLayout,
    sampler: &wgpu::Sampler,
) -> RenderImage {
    let extent = wgpu::Extent3d {
        width: size.x.max(1),
        height: size.y.max(1),
        depth_or_array_layers: 1,
    };

    let color_label = format!("{label} Color Texture");
    let color_texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(&color_label),
        size: extent,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: COLOR_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let color_view = color_texture.create_view(&wgpu::TextureViewDescriptor::default());

    let depth_label = format!("{label} Depth Texture");
    let depth_texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(&depth_label),
        size: extent,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let depth_view = depth_texture.create_view(&wgpu::TextureViewDescriptor::default());

    let bind_group_label = format!("{label} Sample Bind Group");
    let sample_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(&bind_group_label),
        layout: texture_bind_group_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&color_view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    });

    RenderImage {
        _color_texture: color_texture,
        color_view,
        _depth_texture: depth_texture,
        depth_view,
        sample_bind_group,
    }
}

//! Display-List Renderer (§4.4, §5 concurrency model).
//!
//! Grounded in `m3/r3d.c`'s per-frame sequence: bind the program, clear
//! the dynamic model cache, then for each of the four priority layers
//! clear depth/stencil, walk every viewport at that priority, and drain
//! both model caches (static before dynamic, matching "VROM before
//! polygon RAM") at both polygon states (opaque before alpha).
//!
//! Model vertices sit in cache-local space; the per-instance `model_view`
//! a `DisplayListNode::ModelInstance` carries is only known at drain
//! time, so every draw gets its own `projection * model_view` uploaded
//! into a dynamic-offset slot of one shared uniform buffer rather than
//! baking a transform into the vertex stream.

use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use r3d_formats::polygon::PolyState;

use crate::error::{InitError, R3dError, Result};
use crate::model::cache::ModelCache;
use crate::model::display_list::{DisplayListNode, ViewportParams};
use crate::scene::viewport::ScreenTransform;
use crate::vertex::Vertex;

const PRIORITY_COUNT: u8 = 4;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;
const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
const NEAR_PLANE: f32 = 0.1;
const FAR_PLANE: f32 = 100_000.0;

/// Spacing between successive draws' uniform slots. Fixed rather than
/// queried from `device.limits()` since every backend wgpu targets
/// guarantees `min_uniform_buffer_offset_alignment <= 256`.
const UNIFORM_STRIDE: u64 = 256;
const MAX_DRAWS_PER_FRAME: u64 = 8192;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct FrameUniforms {
    view_proj: [[f32; 4]; 4],
    sun_direction: [f32; 3],
    sun_intensity: f32,
    fog_color: [f32; 3],
    fog_density: f32,
    ambient_intensity: f32,
    fog_start: f32,
    spotlight_color_index: u32,
    _pad: u32,
}

impl FrameUniforms {
    fn new(vp: &ViewportParams, mvp: Mat4) -> Self {
        Self {
            view_proj: mvp.to_cols_array_2d(),
            sun_direction: vp.sun_direction,
            sun_intensity: vp.sun_intensity,
            fog_color: [
                vp.fog_color[0] as f32 / 255.0,
                vp.fog_color[1] as f32 / 255.0,
                vp.fog_color[2] as f32 / 255.0,
            ],
            fog_density: vp.fog_density,
            ambient_intensity: vp.ambient_intensity,
            fog_start: vp.fog_start,
            spotlight_color_index: vp.spotlight_color_index,
            _pad: 0,
        }
    }
}

/// One queued draw, collected while walking the display lists and
/// issued against a render pass once every priority's draws are known.
struct DrawCmd {
    priority: u8,
    is_alpha: bool,
    cache_is_dynamic: bool,
    viewport_rect: (f32, f32, f32, f32),
    vbo_start: u32,
    vbo_count: u32,
    uniform_offset: u64,
}

#[derive(Default)]
struct BoundState {
    pipeline_is_alpha: Option<bool>,
    vertex_buffer_is_dynamic: Option<bool>,
    viewport_rect: Option<(f32, f32, f32, f32)>,
}

pub struct FrameRenderer {
    pipeline_opaque: wgpu::RenderPipeline,
    pipeline_alpha: wgpu::RenderPipeline,
    frame_bind_group_layout: wgpu::BindGroupLayout,
    texture_bind_group_layout: wgpu::BindGroupLayout,
    frame_bind_group: wgpu::BindGroup,
    uniform_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    depth_view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl FrameRenderer {
    pub fn new(
        device: &wgpu::Device,
        width: u32,
        height: u32,
        shader_override: Option<&str>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(R3dError::Init(InitError::NoMemory));
        }

        let shader_src = shader_override.unwrap_or(include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/shaders/r3d.wgsl"
        )));
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("r3d-shader"),
            source: wgpu::ShaderSource::Wgsl(shader_src.into()),
        });

        let frame_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("r3d-frame-bgl"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(std::mem::size_of::<FrameUniforms>() as u64),
                    },
                    count: None,
                }],
            });

        let texture_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("r3d-texture-bgl"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2Array,
                            multisampled: false,
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

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("r3d-pipeline-layout"),
            bind_group_layouts: &[&frame_bind_group_layout, &texture_bind_group_layout],
            push_constant_ranges: &[],
        });

        let vertex_buffers = [Vertex::vertex_buffer_layout()];

        let pipeline_opaque = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("r3d-pipeline-opaque"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &vertex_buffers,
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: Some(wgpu::Face::Back),
                ..Default::default()
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

        let pipeline_alpha = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("r3d-pipeline-alpha"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &vertex_buffers,
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: Some(wgpu::Face::Back),
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: false,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("r3d-frame-uniforms"),
            size: UNIFORM_STRIDE * MAX_DRAWS_PER_FRAME,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("r3d-frame-bg"),
            layout: &frame_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &uniform_buffer,
                    offset: 0,
                    size: NonZeroU64::new(std::mem::size_of::<FrameUniforms>() as u64),
                }),
            }],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("r3d-sheet-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let depth_view = Self::make_depth_view(device, width, height);

        Ok(Self {
            pipeline_opaque,
            pipeline_alpha,
            frame_bind_group_layout,
            texture_bind_group_layout,
            frame_bind_group,
            uniform_buffer,
            sampler,
            depth_view,
            width,
            height,
        })
    }

    fn make_depth_view(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("r3d-depth-stencil"),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        texture.create_view(&wgpu::TextureViewDescriptor::default())
    }

    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if width == 0 || height == 0 || (width, height) == (self.width, self.height) {
            return;
        }
        self.depth_view = Self::make_depth_view(device, width, height);
        self.width = width;
        self.height = height;
    }

    pub fn texture_bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.texture_bind_group_layout
    }

    pub fn frame_bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.frame_bind_group_layout
    }

    pub fn make_texture_bind_group(
        &self,
        device: &wgpu::Device,
        array_view: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("r3d-texture-bg"),
            layout: &self.texture_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(array_view) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(&self.sampler) },
            ],
        })
    }

    /// Walks both model caches at both polygon states, uploading one
    /// uniform slot per draw and issuing draws grouped by priority.
    #[allow(clippy::too_many_arguments)]
    pub fn render_frame(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        color_view: &wgpu::TextureView,
        texture_bind_group: &wgpu::BindGroup,
        screen: &ScreenTransform,
        wide_screen: bool,
        static_cache: &ModelCache,
        dynamic_cache: &ModelCache,
        stats: &mut crate::stats::RenderStats,
    ) {
        let mut draws = Vec::new();
        let mut next_slot = 0u64;
        for &state in &[PolyState::Opaque, PolyState::Alpha] {
            self.collect_draws(queue, static_cache, state, false, screen, wide_screen, &mut next_slot, &mut draws, stats);
            self.collect_draws(queue, dynamic_cache, state, true, screen, wide_screen, &mut next_slot, &mut draws, stats);
        }

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("r3d-frame-encoder"),
        });

        for priority in 0..PRIORITY_COUNT {
            let color_ops = if priority == 0 {
                wgpu::Operations { load: wgpu::LoadOp::Clear(wgpu::Color::BLACK), store: wgpu::StoreOp::Store }
            } else {
                wgpu::Operations { load: wgpu::LoadOp::Load, store: wgpu::StoreOp::Store }
            };

            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("r3d-priority-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color_view,
                    resolve_target: None,
                    ops: color_ops,
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Clear(1.0), store: wgpu::StoreOp::Store }),
                    stencil_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Clear(0), store: wgpu::StoreOp::Store }),
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_bind_group(1, texture_bind_group, &[]);

            let mut bound = BoundState::default();
            for cmd in draws.iter().filter(|c| c.priority == priority) {
                if bound.pipeline_is_alpha != Some(cmd.is_alpha) {
                    pass.set_pipeline(if cmd.is_alpha { &self.pipeline_alpha } else { &self.pipeline_opaque });
                    bound.pipeline_is_alpha = Some(cmd.is_alpha);
                }
                if bound.vertex_buffer_is_dynamic != Some(cmd.cache_is_dynamic) {
                    let cache = if cmd.cache_is_dynamic { dynamic_cache } else { static_cache };
                    pass.set_vertex_buffer(0, cache.vertex_buffer().slice(..));
                    bound.vertex_buffer_is_dynamic = Some(cmd.cache_is_dynamic);
                }
                if bound.viewport_rect != Some(cmd.viewport_rect) {
                    let r = cmd.viewport_rect;
                    pass.set_viewport(r.0, r.1, r.2.max(1.0), r.3.max(1.0), 0.0, 1.0);
                    bound.viewport_rect = Some(cmd.viewport_rect);
                }
                pass.set_bind_group(0, &self.frame_bind_group, &[cmd.uniform_offset as u32]);
                pass.draw(cmd.vbo_start..cmd.vbo_start + cmd.vbo_count, 0..1);
                stats.vertices_emitted += cmd.vbo_count;
            }
        }

        queue.submit(std::iter::once(encoder.finish()));
    }

    #[allow(clippy::too_many_arguments)]
    fn collect_draws(
        &self,
        queue: &wgpu::Queue,
        cache: &ModelCache,
        state: PolyState,
        cache_is_dynamic: bool,
        screen: &ScreenTransform,
        wide_screen: bool,
        next_slot: &mut u64,
        out: &mut Vec<DrawCmd>,
        stats: &mut crate::stats::RenderStats,
    ) {
        let is_alpha = matches!(state, PolyState::Alpha);
        let mut current: Option<(ViewportParams, Mat4, (f32, f32, f32, f32))> = None;

        cache.drain(state, |node| {
            match node {
                DisplayListNode::Viewport(params) => {
                    let rect = screen.map_rect(params.rect, wide_screen);
                    let aspect = if rect.3 > 0.0 { rect.2 / rect.3 } else { 1.0 };
                    let projection =
                        Mat4::perspective_rh(params.fov_y_degrees.to_radians(), aspect, NEAR_PLANE, FAR_PLANE)
                            * params.projection;
                    current = Some((*params, projection, rect));
                    stats.display_list_nodes_drained += 1;
                }
                DisplayListNode::ModelInstance { model_view, vbo_start, vbo_count, .. } => {
                    let Some((params, projection, rect)) = current else { return };
                    if *next_slot >= MAX_DRAWS_PER_FRAME {
                        tracing::warn!("frame draw budget exhausted, dropping remaining draws");
                        return;
                    }
                    let mvp = projection * *model_view;
                    let uniforms = FrameUniforms::new(&params, mvp);
                    let offset = *next_slot * UNIFORM_STRIDE;
                    queue.write_buffer(&self.uniform_buffer, offset, bytemuck::bytes_of(&uniforms));
                    *next_slot += 1;

                    out.push(DrawCmd {
                        priority: params.priority,
                        is_alpha,
                        cache_is_dynamic,
                        viewport_rect: rect,
                        vbo_start: *vbo_start,
                        vbo_count: *vbo_count,
                        uniform_offset: offset,
                    });
                    stats.display_list_nodes_drained += 1;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vp() -> ViewportParams {
        ViewportParams {
            priority: 2,
            fov_y_degrees: 45.0,
            projection: Mat4::IDENTITY,
            rect: (0.0, 0.0, 496.0, 384.0),
            sun_direction: [0.0, -1.0, 0.0],
            sun_intensity: 0.8,
            ambient_intensity: 0.25,
            spotlight_color_index: 3,
            fog_color: [10, 20, 30],
            fog_density: 0.5,
            fog_start: 100.0,
        }
    }

    #[test]
    fn frame_uniforms_carry_fog_and_sun_state() {
        let params = vp();
        let u = FrameUniforms::new(&params, Mat4::IDENTITY);
        assert_eq!(u.sun_intensity, 0.8);
        assert_eq!(u.ambient_intensity, 0.25);
        assert_eq!(u.spotlight_color_index, 3);
        assert!((u.fog_color[0] - 10.0 / 255.0).abs() < 1e-6);
        assert_eq!(u.fog_start, 100.0);
    }

    #[test]
    fn frame_uniforms_struct_fits_inside_one_uniform_stride() {
        assert!(std::mem::size_of::<FrameUniforms>() as u64 <= UNIFORM_STRIDE);
    }
}

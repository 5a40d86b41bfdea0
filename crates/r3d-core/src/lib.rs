//! Cycle-driven Real3D scene-graph traversal, model caching and
//! rasterization pipeline, plus the tile generator, for a mid-1990s
//! tile/polygon arcade platform.
//!
//! `Renderer` is the single entry point: attach the host's memory
//! regions with [`Renderer::attach_memory`], then each frame call
//! [`Renderer::begin_frame`], [`Renderer::render_frame`] and
//! [`Renderer::end_frame`] in sequence. Everything else (the PowerPC
//! core, PCI/SCSI/RTC/EEPROM, sound, controls, ROM loading and
//! save-states) lives outside this crate.

pub mod config;
pub mod error;
pub mod memory;
pub mod model;
pub mod render;
pub mod scene;
pub mod stats;
pub mod texture;
pub mod tilegen;
pub mod vertex;

use glam::Mat4;
use r3d_formats::polygon::PolygonHeader;
use smallvec::SmallVec;

pub use config::{DebugConfig, RendererConfig};
pub use error::{InitError, R3dError, Result};
pub use memory::MemoryViews;
pub use r3d_formats::stepping::Stepping;
pub use stats::RenderStats;

use crate::memory::ModelRegion;
use crate::model::cache::CacheKind;
use crate::model::display_list::{ViewportParams, Winding};
use crate::model::{ModelCache, ModelDecoder, PolygonDecodeCtx};
use crate::render::FrameRenderer;
use crate::scene::{ModelVisit, ScreenTransform, SceneTraversal};
use crate::texture::sheet::{WgpuUploader, SHEET_SIDE};
use crate::texture::{TextureRefSet, TextureSheetManager};
use crate::tilegen::{PaletteCache, TileGenerator};

/// Scene address of the first viewport of a frame, fixed by the
/// hardware's culling-RAM layout.
const ROOT_VIEWPORT_ADDR: u32 = 0x0080_0000;
/// Bound against a viewport chain that never reaches its end marker.
const MAX_VIEWPORTS: usize = 64;
/// Bound against a polygon run whose terminator word never appears.
const MAX_POLYGONS_PER_MODEL: usize = 4096;

const STATIC_MAX_VERTICES: u32 = 1_500_000;
const STATIC_SCRATCH_VERTICES: u32 = 65_536;
const STATIC_MAX_MODELS: u32 = 16_384;
const STATIC_LUT_SIZE: u32 = 16_381;
const STATIC_DISPLAY_LIST_SIZE: usize = 32_768;

const DYNAMIC_MAX_VERTICES: u32 = 400_000;
const DYNAMIC_SCRATCH_VERTICES: u32 = 16_384;
const DYNAMIC_MAX_MODELS: u32 = 4_096;
const DYNAMIC_LUT_SIZE: u32 = 4_093;
const DYNAMIC_DISPLAY_LIST_SIZE: usize = 8_192;

/// Owns the GPU-side caches, texture sheets, tile generator and frame
/// renderer; the borrowed memory regions it reads are reattached every
/// time the host rebinds them (e.g. after a bank switch).
pub struct Renderer<'a> {
    config: RendererConfig,
    stepping: Stepping,
    device: wgpu::Device,
    queue: wgpu::Queue,
    memory: Option<MemoryViews<'a>>,
    static_cache: ModelCache,
    dynamic_cache: ModelCache,
    texture_mgr: TextureSheetManager,
    texture_array: wgpu::Texture,
    texture_bind_group: wgpu::BindGroup,
    frame_renderer: FrameRenderer,
    tilegen: TileGenerator,
    palette: PaletteCache,
    screen: ScreenTransform,
    stats: RenderStats,
}

impl<'a> Renderer<'a> {
    /// Build every GPU resource the renderer needs: the model caches'
    /// vertex buffers, the texture-sheet array, and the pipelines.
    /// Fails only on the `InitError` conditions named in §6.
    pub fn init(
        device: wgpu::Device,
        queue: wgpu::Queue,
        width: u32,
        height: u32,
        config: RendererConfig,
    ) -> Result<Self> {
        let config = config.sanitized();
        let stepping = Stepping::default();

        let mut texture_mgr = TextureSheetManager::new();
        texture_mgr.resolve_layout(
            config.max_tex_maps,
            SHEET_SIDE * config.max_tex_map_extent as u32,
            None,
        )?;

        let map_side = texture_mgr.map_side();
        let map_count = (texture_mgr.map_count() as u32).max(1);
        let texture_array = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("r3d-texture-array"),
            size: wgpu::Extent3d {
                width: map_side,
                height: map_side,
                depth_or_array_layers: map_count,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let texture_array_view = texture_array.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            ..Default::default()
        });

        let shader_override = config
            .vertex_shader
            .as_ref()
            .map(|path| {
                std::fs::read_to_string(path).map_err(|_| R3dError::Init(InitError::NoShader))
            })
            .transpose()?;
        let frame_renderer = FrameRenderer::new(&device, width, height, shader_override.as_deref())?;
        let texture_bind_group = frame_renderer.make_texture_bind_group(&device, &texture_array_view);

        let static_cache = ModelCache::new(
            &device,
            STATIC_MAX_VERTICES,
            STATIC_SCRATCH_VERTICES,
            STATIC_MAX_MODELS,
            STATIC_LUT_SIZE,
            STATIC_DISPLAY_LIST_SIZE,
            CacheKind::Static,
        )?;
        let dynamic_cache = ModelCache::new(
            &device,
            DYNAMIC_MAX_VERTICES,
            DYNAMIC_SCRATCH_VERTICES,
            DYNAMIC_MAX_MODELS,
            DYNAMIC_LUT_SIZE,
            DYNAMIC_DISPLAY_LIST_SIZE,
            CacheKind::Dynamic,
        )?;

        Ok(Self {
            config,
            stepping,
            device,
            queue,
            memory: None,
            static_cache,
            dynamic_cache,
            texture_mgr,
            texture_array,
            texture_bind_group,
            frame_renderer,
            tilegen: TileGenerator::new(),
            palette: PaletteCache::new(),
            screen: ScreenTransform::new(0.0, 0.0, width as f32, height as f32),
            stats: RenderStats::default(),
        })
    }

    /// Rebind the borrowed culling/polygon/VROM/texture-RAM views the
    /// host owns. Call whenever the host hands the renderer a new
    /// frame's memory (every frame, in practice).
    pub fn attach_memory(&mut self, memory: MemoryViews<'a>) {
        self.memory = Some(memory);
    }

    pub fn set_stepping(&mut self, stepping: Stepping) {
        self.stepping = stepping;
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.frame_renderer.resize(&self.device, width, height);
        self.screen = ScreenTransform::new(0.0, 0.0, width as f32, height as f32);
    }

    /// Force a texture region to redecode on next reference, e.g. after
    /// the host writes new texel data into texture RAM.
    pub fn invalidate_texture_region(&mut self, fmt: u8, x: u32, y: u32, w: u32, h: u32) {
        self.texture_mgr.invalidate(fmt, x, y, w, h);
    }

    /// Reset per-frame counters, clear the dynamic (polygon-RAM) model
    /// cache, and optionally flush the static cache when debugging.
    pub fn begin_frame(&mut self) {
        self.stats.reset();
        self.dynamic_cache.clear();
        if self.config.debug.force_flush_models {
            self.static_cache.clear();
        }
    }

    /// Walk the attached scene graph, cache any model not already
    /// resident, build both caches' display lists, and draw every
    /// priority layer into `color_view`.
    pub fn render_frame(&mut self, color_view: &wgpu::TextureView) -> Result<()> {
        let Some(memory) = self.memory else {
            tracing::warn!("render_frame called with no memory attached");
            return Ok(());
        };

        let traversal = SceneTraversal::new(memory, self.stepping);
        let viewports = traversal.walk_frame(ROOT_VIEWPORT_ADDR, MAX_VIEWPORTS);

        for vv in &viewports {
            let vp = &vv.viewport;
            let params = ViewportParams {
                priority: vp.priority,
                fov_y_degrees: vp.fov_y_degrees,
                projection: Mat4::IDENTITY,
                rect: (vp.x, vp.y, vp.width, vp.height),
                sun_direction: vp.sun_direction,
                sun_intensity: vp.sun_intensity,
                ambient_intensity: vp.ambient_intensity,
                spotlight_color_index: vp.spotlight_color_index,
                fog_color: vp.fog_color,
                fog_density: vp.fog_density,
                fog_start: vp.fog_start,
            };
            self.append_viewport_with_retry(params);

            for visit in &vv.models {
                self.cache_and_instance_model(memory, visit);
            }
        }

        self.frame_renderer.render_frame(
            &self.device,
            &self.queue,
            color_view,
            &self.texture_bind_group,
            &self.screen,
            self.config.wide_screen,
            &self.static_cache,
            &self.dynamic_cache,
            &mut self.stats,
        );
        Ok(())
    }

    pub fn end_frame(&self) -> &RenderStats {
        &self.stats
    }

    pub fn write_tile_register(&mut self, index: u32, value: u32) {
        self.tilegen.write_register(index, value);
    }

    pub fn notify_vram_write(&mut self, byte_addr: u32, old: u32, new: u32) {
        self.tilegen.notify_vram_write(byte_addr, old, new);
    }

    pub fn rasterize_tile_layer(&mut self, layer: usize, vram: &[u8]) {
        self.tilegen.rasterize(layer, vram);
    }

    pub fn composite_tile_layer(&self, layer: usize) -> Vec<[u8; 4]> {
        self.tilegen.composite(layer, &self.palette)
    }

    pub fn update_palette(&mut self, index: usize, raw: u16) {
        self.palette.update(index, raw);
    }

    /// Append a viewport node to both caches' display lists. On
    /// `ListFull` both caches are drained and cleared and the append
    /// retried exactly once; a second failure drops the viewport and
    /// is logged rather than aborting the frame (§6 propagation
    /// policy: only init errors abort the process).
    fn append_viewport_with_retry(&mut self, params: ViewportParams) {
        if let Err(R3dError::ListFull(addr)) = self.append_viewport_to_both(params) {
            tracing::warn!(addr, "display list full; draining both caches and retrying once");
            self.static_cache.clear();
            self.dynamic_cache.clear();
            self.stats.cache_drain_retries += 1;
            if let Err(e) = self.append_viewport_to_both(params) {
                tracing::error!(%e, "viewport dropped: display list still full after drain-and-retry");
            }
        }
    }

    fn append_viewport_to_both(&mut self, params: ViewportParams) -> Result<()> {
        self.static_cache.append_viewport(params)?;
        self.dynamic_cache.append_viewport(params)
    }

    /// Look a model up by (address, texture-offset state); decode and
    /// cache it on miss, then append the per-viewport instance node to
    /// the owning cache's display list. Addresses below the VROM
    /// threshold select the dynamic cache, matching
    /// `MemoryViews::model_region`.
    ///
    /// On `VboFull`/`ListFull` both caches are drained and cleared and
    /// the whole lookup-decode-instance sequence retried exactly once;
    /// a second failure surfaces `UnableToCache` (logged) and aborts
    /// just this model rather than the frame.
    fn cache_and_instance_model(&mut self, memory: MemoryViews<'a>, visit: &ModelVisit) {
        let tex_key = (visit.tex_offset_state.state & 0x7FFF) as u16;
        let region = match memory.model_region(visit.addr) {
            Ok(r) => r,
            Err(_) => {
                self.stats.polygons_dropped_bad_address += 1;
                return;
            }
        };
        let (is_static, words) = match region {
            ModelRegion::PolygonRam(w) => (false, w),
            ModelRegion::Vrom(w) => (true, w),
        };

        match self.cache_and_instance_once(is_static, visit, tex_key, words, memory) {
            Ok(decoded) => {
                if decoded {
                    self.stats.models_cached += 1;
                }
            }
            Err(R3dError::VboFull(addr)) | Err(R3dError::ListFull(addr)) => {
                tracing::warn!(addr, "model cache full; draining both caches and retrying once");
                self.static_cache.clear();
                self.dynamic_cache.clear();
                self.stats.cache_drain_retries += 1;
                match self.cache_and_instance_once(is_static, visit, tex_key, words, memory) {
                    Ok(decoded) => {
                        if decoded {
                            self.stats.models_cached += 1;
                        }
                    }
                    Err(_) => {
                        self.stats.models_aborted += 1;
                        let err = R3dError::UnableToCache(visit.addr);
                        tracing::error!(%err, "model dropped after drain-and-retry");
                    }
                }
            }
            // BadAddress/LocalOverflow inside the polygon run: already
            // accounted for in decode_model's stats, nothing further to do.
            Err(_) => {}
        }
    }

    /// One attempt at looking up, decoding and instancing `visit`'s
    /// model. Returns whether the lookup missed and a fresh decode ran
    /// (the caller only counts a model as cached once, across retries).
    fn cache_and_instance_once(
        &mut self,
        is_static: bool,
        visit: &ModelVisit,
        tex_key: u16,
        words: &[u32],
        memory: MemoryViews<'a>,
    ) -> Result<bool> {
        let cache = if is_static {
            &mut self.static_cache
        } else {
            &mut self.dynamic_cache
        };

        let (model_idx, decoded) = match cache.lookup(visit.addr, tex_key) {
            Some(idx) => (idx, false),
            None => {
                let idx = decode_model(
                    cache,
                    self.stepping,
                    visit,
                    tex_key,
                    words,
                    memory.polygon_ram,
                    memory.texture_ram,
                    &self.queue,
                    &self.texture_array,
                    &mut self.texture_mgr,
                    &mut self.stats,
                )?;
                (idx, true)
            }
        };

        cache.append_model_instance(visit.addr, model_idx, visit.model_view, Winding::Ccw)?;
        Ok(decoded)
    }
}

/// Decode one model's polygon run into cached GPU vertices, decode any
/// newly referenced textures, and return the cache's model index.
#[allow(clippy::too_many_arguments)]
fn decode_model(
    cache: &mut ModelCache,
    stepping: Stepping,
    visit: &ModelVisit,
    tex_key: u16,
    words: &[u32],
    polygon_ram: &[u32],
    texture_ram: &[u16],
    queue: &wgpu::Queue,
    texture_array: &wgpu::Texture,
    texture_mgr: &mut TextureSheetManager,
    stats: &mut RenderStats,
) -> Result<u32> {
    cache.begin_model();
    let mut decoder = ModelDecoder::new();
    let ctx = PolygonDecodeCtx {
        color_table_addr: visit.color_table_addr,
        tex_offset_state: visit.tex_offset_state,
        winding_sign: visit.winding_sign,
        vertex_factor: stepping.vertex_factor(),
    };
    let mut refs = TextureRefSet::new();
    let mut use_stencil = false;
    let mut cursor = 0usize;

    for _ in 0..MAX_POLYGONS_PER_MODEL {
        let Some(header_words) = words.get(cursor..cursor + 7) else {
            stats.polygons_dropped_bad_address += 1;
            break;
        };
        let header = PolygonHeader(header_words.try_into().unwrap());
        cursor += 7;
        if header.is_terminator() {
            break;
        }

        let num_verts = header.num_verts() as usize;
        let mut fresh: SmallVec<[[u32; 4]; 4]> = SmallVec::new();
        let mut truncated = false;
        for i in 0..num_verts {
            if header.reuse_mask() & (1 << i) != 0 {
                continue;
            }
            let Some(vw) = words.get(cursor..cursor + 4) else {
                truncated = true;
                break;
            };
            fresh.push(vw.try_into().unwrap());
            cursor += 4;
        }
        if truncated {
            stats.polygons_dropped_bad_address += 1;
            break;
        }

        let tris = decoder.decode_polygon(&header, &fresh, &ctx, polygon_ram);
        if header.is_valid() {
            if let Err(e) = cache.insert_polygon(visit.addr, &tris) {
                // `VboFull` is recoverable by the caller's drain-and-retry;
                // only count and abort here for the non-retryable case.
                if matches!(e, R3dError::LocalOverflow(_)) {
                    stats.polygons_dropped_overflow += 1;
                    stats.models_aborted += 1;
                }
                return Err(e);
            }
            if header.texture_enable() {
                let bank_term = header.tex_bank_raw() ^ ctx.tex_offset_state.switch_bank;
                let raw_x = (header.tex_base_x_raw() + ctx.tex_offset_state.x) & (SHEET_SIDE - 1);
                let raw_y = ((header.tex_base_y_raw() + ctx.tex_offset_state.y) ^ bank_term)
                    & (SHEET_SIDE - 1);
                refs.add(r3d_formats::texref::TextureRef::new(
                    header.tex_format(),
                    raw_x as u16,
                    raw_y as u16,
                    header.tex_width() as u16,
                    header.tex_height() as u16,
                ));
            }
            if header.contributes_to_stencil() {
                use_stencil = true;
            }
        }

        if header.is_last_polygon() {
            break;
        }
    }

    if !refs.is_empty() {
        let mut uploader = WgpuUploader {
            queue,
            array_texture: texture_array,
        };
        refs.decode_all(texture_mgr, texture_ram, &mut uploader);
        stats.texture_decodes += refs.len() as u32;
    }

    cache.end_model(queue, visit.addr, tex_key, use_stencil, refs)
}

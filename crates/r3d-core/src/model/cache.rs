//! Model Cache (§4.3).
//!
//! Owns one GPU vertex buffer, a model array with an address-keyed
//! LUT, and a per-frame display list. Two instances exist in
//! `Renderer`: static (VROM-resident models) and dynamic (palette-
//! referencing RAM models, cleared every frame).

use glam::Mat4;
use r3d_formats::polygon::PolyState;

use crate::error::{InitError, R3dError, Result};
use crate::model::display_list::{DisplayList, ViewportParams, Winding};
use crate::texture::refs::TextureRefSet;
use crate::vertex::Vertex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Static,
    Dynamic,
}

/// A cached model's metadata ("VBORef").
pub struct VboRef {
    /// `(start_vertex, count)` for Opaque (index 0) and Alpha (index 1).
    pub vbo_range: [(u32, u32); 2],
    pub tex_offset_state: u16,
    pub use_stencil: bool,
    pub refs: TextureRefSet,
    /// Index of the next entry sharing this LUT slot's model address
    /// but a different texture-offset state.
    pub forward_link: Option<u32>,
}

fn state_idx(state: PolyState) -> usize {
    match state {
        PolyState::Opaque => 0,
        PolyState::Alpha => 1,
    }
}

pub struct ModelCache {
    kind: CacheKind,
    vertex_buffer: wgpu::Buffer,
    vertex_capacity: u32,
    vbo_used: u32,
    scratch: [Vec<Vertex>; 2],
    scratch_capacity: u32,
    models: Vec<VboRef>,
    max_models: u32,
    lut: Vec<i32>,
    display_list: DisplayList,
}

impl ModelCache {
    pub fn new(
        device: &wgpu::Device,
        max_vertices: u32,
        scratch_vertices: u32,
        max_models: u32,
        lut_size: u32,
        display_list_size: usize,
        kind: CacheKind,
    ) -> Result<Self> {
        let (vertex_buffer, vertex_capacity) =
            Self::allocate_vbo(device, max_vertices, scratch_vertices)?;
        Ok(Self {
            kind,
            vertex_buffer,
            vertex_capacity,
            vbo_used: 0,
            scratch: [
                Vec::with_capacity(scratch_vertices as usize),
                Vec::with_capacity(scratch_vertices as usize),
            ],
            scratch_capacity: scratch_vertices,
            models: Vec::with_capacity(max_models as usize),
            max_models,
            lut: vec![-1; lut_size.max(1) as usize],
            display_list: DisplayList::new(display_list_size),
        })
    }

    fn allocate_vbo(
        device: &wgpu::Device,
        max_vertices: u32,
        floor_vertices: u32,
    ) -> Result<(wgpu::Buffer, u32)> {
        let vertex_size = std::mem::size_of::<Vertex>() as u64;
        let max_buffer_size = device.limits().max_buffer_size;
        let mut vertices = max_vertices.max(1);
        loop {
            let size = vertices as u64 * vertex_size;
            if size <= max_buffer_size {
                let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("r3d-model-vbo"),
                    size,
                    usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                tracing::debug!(vertices, "allocated model-cache vertex buffer");
                return Ok((buffer, vertices));
            }
            if vertices <= floor_vertices {
                return Err(R3dError::Init(InitError::NoMemory));
            }
            vertices /= 2;
            tracing::warn!(vertices, "halving model-cache vertex buffer request");
        }
    }

    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    pub fn num_models(&self) -> usize {
        self.models.len()
    }

    pub fn vbo_used(&self) -> u32 {
        self.vbo_used
    }

    /// Resets used counters and invalidates LUT entries. Dynamic
    /// caches call this every frame; static caches only on overflow
    /// recovery or explicit request.
    pub fn clear(&mut self) {
        self.vbo_used = 0;
        self.models.clear();
        self.lut.fill(-1);
        self.display_list.clear();
    }

    pub fn lookup(&self, addr: u32, tex_offset_state: u16) -> Option<u32> {
        let slot = (addr as usize) % self.lut.len();
        let mut cur = self.lut[slot];
        while cur >= 0 {
            let entry = &self.models[cur as usize];
            if entry.tex_offset_state == tex_offset_state {
                return Some(cur as u32);
            }
            cur = entry.forward_link.map(|i| i as i32).unwrap_or(-1);
        }
        None
    }

    pub fn entry(&self, index: u32) -> &VboRef {
        &self.models[index as usize]
    }

    /// Begin decoding a new model: resets the local scratch buffers.
    pub fn begin_model(&mut self) {
        self.scratch[0].clear();
        self.scratch[1].clear();
    }

    /// Append triangles produced by `ModelDecoder::decode_polygon`.
    pub fn insert_polygon(
        &mut self,
        addr: u32,
        triangles: &[crate::model::parser::DecodedTriangle],
    ) -> Result<()> {
        for tri in triangles {
            let si = state_idx(tri.state);
            if self.scratch[si].len() as u32 + 3 > self.scratch_capacity {
                return Err(R3dError::LocalOverflow(addr));
            }
            let projected = self.vbo_used
                + self.scratch[0].len() as u32
                + self.scratch[1].len() as u32
                + 3;
            if projected > self.vertex_capacity {
                return Err(R3dError::VboFull(addr));
            }
            self.scratch[si].extend_from_slice(&tri.vertices);
        }
        Ok(())
    }

    /// Finalize the open model: upload scratch vertices to the VBO at
    /// contiguous offsets (opaque range immediately precedes alpha),
    /// and insert at the head of the LUT chain for `addr`.
    pub fn end_model(
        &mut self,
        queue: &wgpu::Queue,
        addr: u32,
        tex_offset_state: u16,
        use_stencil: bool,
        refs: TextureRefSet,
    ) -> Result<u32> {
        if self.models.len() as u32 >= self.max_models {
            return Err(R3dError::VboFull(addr));
        }
        let vertex_size = std::mem::size_of::<Vertex>() as u64;
        let opaque_count = self.scratch[0].len() as u32;
        let opaque_start = self.vbo_used;
        if opaque_count > 0 {
            queue.write_buffer(
                &self.vertex_buffer,
                opaque_start as u64 * vertex_size,
                bytemuck::cast_slice(&self.scratch[0]),
            );
        }
        let alpha_start = opaque_start + opaque_count;
        let alpha_count = self.scratch[1].len() as u32;
        if alpha_count > 0 {
            queue.write_buffer(
                &self.vertex_buffer,
                alpha_start as u64 * vertex_size,
                bytemuck::cast_slice(&self.scratch[1]),
            );
        }
        self.vbo_used = alpha_start + alpha_count;

        let slot = (addr as usize) % self.lut.len();
        let prior_head = self.lut[slot];
        let model_idx = self.models.len() as u32;
        self.models.push(VboRef {
            vbo_range: [(opaque_start, opaque_count), (alpha_start, alpha_count)],
            tex_offset_state,
            use_stencil,
            refs,
            forward_link: if prior_head >= 0 {
                Some(prior_head as u32)
            } else {
                None
            },
        });
        self.lut[slot] = model_idx as i32;
        self.scratch[0].clear();
        self.scratch[1].clear();
        Ok(model_idx)
    }

    pub fn append_viewport(&mut self, params: ViewportParams) -> Result<()> {
        self.display_list.append_viewport(params)
    }

    pub fn append_model_instance(
        &mut self,
        addr: u32,
        model_idx: u32,
        model_view: Mat4,
        winding: Winding,
    ) -> Result<()> {
        let entry_use_stencil = self.models[model_idx as usize].use_stencil;
        for &state in &[PolyState::Opaque, PolyState::Alpha] {
            let (start, count) = self.models[model_idx as usize].vbo_range[state_idx(state)];
            self.display_list
                .append_model(addr, state, model_view, start, count, winding, entry_use_stencil)?;
        }
        Ok(())
    }

    pub fn vertex_buffer(&self) -> &wgpu::Buffer {
        &self.vertex_buffer
    }

    pub fn drain(&self, state: PolyState, visit: impl FnMut(&crate::model::display_list::DisplayListNode)) {
        self.display_list.drain(state, visit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parser::DecodedTriangle;
    use crate::model::display_list::DisplayListNode;
    use crate::vertex::SHININESS_DISABLED;

    /// Headless/CI-safe device: a fallback (software) adapter with no
    /// surface. Returns `None` if the test environment has no adapter
    /// at all, in which case callers skip rather than fail.
    fn test_device_and_queue() -> Option<(wgpu::Device, wgpu::Queue)> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::None,
                    compatible_surface: None,
                    force_fallback_adapter: true,
                })
                .await
                .ok()?;
            adapter
                .request_device(&wgpu::DeviceDescriptor::default())
                .await
                .ok()
        })
    }

    fn dummy_vertex() -> Vertex {
        Vertex {
            position: [0.0; 3],
            normal: [0.0; 3],
            color: [1.0; 3],
            translucence: 1.0,
            light_enable: 0.0,
            specular_coefficient: 0.0,
            shininess: SHININESS_DISABLED,
            fog_intensity: 0.0,
            uv: [0.0; 2],
            tex_base: [0.0; 4],
            tex_params: 0,
            tex_format: 0,
            sheet_index: 0,
        }
    }

    fn triangle(state: PolyState) -> DecodedTriangle {
        DecodedTriangle {
            vertices: [dummy_vertex(), dummy_vertex(), dummy_vertex()],
            state,
        }
    }

    /// §8: `lookup(A,S)` either returns `None` or an entry whose
    /// `tex_offset_state == S`.
    #[test]
    fn lookup_returns_entry_with_matching_tex_offset_state() {
        let Some((device, queue)) = test_device_and_queue() else { return };
        let mut cache = ModelCache::new(&device, 64, 16, 8, 17, 32, CacheKind::Dynamic).unwrap();

        cache.begin_model();
        cache.insert_polygon(0x10, &[triangle(PolyState::Opaque)]).unwrap();
        let idx = cache
            .end_model(&queue, 0x10, 0x1234, false, crate::texture::TextureRefSet::new())
            .unwrap();

        assert_eq!(cache.lookup(0x10, 0x1234), Some(idx));
        assert_eq!(cache.entry(idx).tex_offset_state, 0x1234);
        assert_eq!(cache.lookup(0x10, 0x9999), None);
    }

    #[test]
    fn clear_resets_counters_and_lut() {
        let Some((device, queue)) = test_device_and_queue() else { return };
        let mut cache = ModelCache::new(&device, 64, 16, 8, 17, 32, CacheKind::Dynamic).unwrap();

        cache.begin_model();
        cache.insert_polygon(0x10, &[triangle(PolyState::Opaque)]).unwrap();
        cache
            .end_model(&queue, 0x10, 0, false, crate::texture::TextureRefSet::new())
            .unwrap();
        assert!(cache.vbo_used() > 0);
        assert_eq!(cache.num_models(), 1);

        cache.clear();
        assert_eq!(cache.vbo_used(), 0);
        assert_eq!(cache.num_models(), 0);
        assert_eq!(cache.lookup(0x10, 0), None);
    }

    /// §8: two models' opaque vertex ranges don't overlap and stay
    /// inside `[0, vbo_used)`.
    #[test]
    fn vertex_ranges_stay_disjoint_and_in_bounds() {
        let Some((device, queue)) = test_device_and_queue() else { return };
        let mut cache = ModelCache::new(&device, 64, 16, 8, 17, 32, CacheKind::Dynamic).unwrap();

        cache.begin_model();
        cache.insert_polygon(0x10, &[triangle(PolyState::Opaque)]).unwrap();
        let idx_a = cache
            .end_model(&queue, 0x10, 0, false, crate::texture::TextureRefSet::new())
            .unwrap();

        cache.begin_model();
        cache.insert_polygon(0x20, &[triangle(PolyState::Opaque)]).unwrap();
        let idx_b = cache
            .end_model(&queue, 0x20, 0, false, crate::texture::TextureRefSet::new())
            .unwrap();

        let (start_a, count_a) = cache.entry(idx_a).vbo_range[0];
        let (start_b, count_b) = cache.entry(idx_b).vbo_range[0];
        assert_eq!(start_a + count_a, start_b);
        assert!(start_b + count_b <= cache.vbo_used());
    }

    #[test]
    fn append_model_instance_skips_zero_length_ranges() {
        let Some((device, queue)) = test_device_and_queue() else { return };
        let mut cache = ModelCache::new(&device, 64, 16, 8, 17, 32, CacheKind::Dynamic).unwrap();

        cache.begin_model();
        cache.insert_polygon(0x10, &[triangle(PolyState::Opaque)]).unwrap();
        let idx = cache
            .end_model(&queue, 0x10, 0, false, crate::texture::TextureRefSet::new())
            .unwrap();
        cache
            .append_model_instance(0x10, idx, Mat4::IDENTITY, Winding::Ccw)
            .unwrap();

        let mut opaque = 0;
        let mut alpha = 0;
        cache.drain(PolyState::Opaque, |n| {
            if matches!(n, DisplayListNode::ModelInstance { .. }) {
                opaque += 1;
            }
        });
        cache.drain(PolyState::Alpha, |n| {
            if matches!(n, DisplayListNode::ModelInstance { .. }) {
                alpha += 1;
            }
        });
        assert_eq!(opaque, 1);
        assert_eq!(alpha, 0);
    }
}

//! GPU vertex layout (§3 "Vertex").
//!
//! One `Vertex` is emitted per decoded triangle corner; the field order
//! and `vertex_buffer_layout` mirror the teacher's `VertexFormatInfo`
//! table, adapted to a single fixed layout since this pipeline has only
//! one vertex format (unlike the teacher's per-game selectable formats).

use bytemuck::{Pod, Zeroable};

/// Packed per-vertex state: texture-parameter bits, format, sheet
/// index. Kept as a single u32 so the GPU-side layout stays compact.
pub const TEX_ENABLE_BIT: u32 = 1 << 0;
pub const TEX_CONTOUR_BIT: u32 = 1 << 1;
pub const TEX_U_WRAP_BIT: u32 = 1 << 2;
pub const TEX_V_WRAP_BIT: u32 = 1 << 3;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    /// Material color premultiplied by shading intensity.
    pub color: [f32; 3],
    pub translucence: f32,
    pub light_enable: f32,
    pub specular_coefficient: f32,
    /// Shininess power, or `SHININESS_DISABLED` when specular is off.
    pub shininess: f32,
    pub fog_intensity: f32,
    pub uv: [f32; 2],
    /// Sub-texture base (x, y, w, h) within the sheet, in texels.
    pub tex_base: [f32; 4],
    pub tex_params: u32,
    pub tex_format: u32,
    pub sheet_index: u32,
}

pub const SHININESS_DISABLED: f32 = -1.0;

impl Vertex {
    pub fn vertex_buffer_layout() -> wgpu::VertexBufferLayout<'static> {
        use std::mem::size_of;
        const ATTRS: &[wgpu::VertexAttribute] = &wgpu::vertex_attr_array![
            0 => Float32x3, // position
            1 => Float32x3, // normal
            2 => Float32x3, // color
            3 => Float32,   // translucence
            4 => Float32,   // light_enable
            5 => Float32,   // specular_coefficient
            6 => Float32,   // shininess
            7 => Float32,   // fog_intensity
            8 => Float32x2, // uv
            9 => Float32x4, // tex_base
            10 => Uint32,   // tex_params
            11 => Uint32,   // tex_format
            12 => Uint32,   // sheet_index
        ];
        wgpu::VertexBufferLayout {
            array_stride: size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: ATTRS,
        }
    }
}

//! Model polygon decode (§4.4 "Model polygon decode").
//!
//! Turns a run of polygon headers plus their vertex records into GPU
//! `Vertex` triangles. Vertex reuse (`Prev[0..4]`), shading-mode
//! selection, winding, and color modulation all live here; the format
//! bit extraction itself is `r3d_formats::polygon`.

use r3d_formats::polygon::{Material, PolyState, PolygonHeader, VertexWord};
use r3d_formats::scene_node::TextureOffsetState;
use smallvec::SmallVec;

use crate::texture::sheet::SHEET_SIDE;
use crate::vertex::{Vertex, TEX_CONTOUR_BIT, TEX_ENABLE_BIT, TEX_U_WRAP_BIT, TEX_V_WRAP_BIT};

/// Per-polygon context carried in from scene traversal: the running
/// color-table address, the active texture-offset state, the sign
/// correction for winding (from coordinate-matrix entry m13), and the
/// stepping's vertex scale.
#[derive(Debug, Clone, Copy)]
pub struct PolygonDecodeCtx {
    pub color_table_addr: u32,
    pub tex_offset_state: TextureOffsetState,
    pub winding_sign: f32,
    pub vertex_factor: f32,
}

/// One decoded triangle, tagged with the state list it belongs on.
pub struct DecodedTriangle {
    pub vertices: [Vertex; 3],
    pub state: PolyState,
}

/// Holds the four most recently decoded vertices of a model so
/// subsequent polygons can reuse them via `header[0] & 0xF`.
pub struct ModelDecoder {
    prev: [VertexWord; 4],
}

impl ModelDecoder {
    pub fn new() -> Self {
        let zero = VertexWord::decode([0, 0, 0, 0], 1.0, 1.0);
        Self { prev: [zero; 4] }
    }

    /// Decode one polygon. `fresh_words` supplies one 4-word record per
    /// vertex slot not covered by the reuse mask, in header order.
    /// Returns up to four triangles (two if a quad, doubled again if
    /// double-sided).
    pub fn decode_polygon(
        &mut self,
        header: &PolygonHeader,
        fresh_words: &[[u32; 4]],
        ctx: &PolygonDecodeCtx,
        polygon_ram: &[u32],
    ) -> SmallVec<[DecodedTriangle; 4]> {
        let num_verts = header.num_verts() as usize;
        let reuse_mask = header.reuse_mask();
        let mut verts: SmallVec<[VertexWord; 4]> = SmallVec::new();
        let mut fresh_iter = fresh_words.iter();
        for i in 0..num_verts {
            if reuse_mask & (1 << i) != 0 {
                verts.push(self.prev[i]);
            } else {
                let words = fresh_iter.next().copied().unwrap_or([0; 4]);
                verts.push(VertexWord::decode(words, ctx.vertex_factor, header.uv_scale()));
            }
        }
        for (i, v) in verts.iter().enumerate() {
            self.prev[i] = *v;
        }

        let state = header.classify_state();
        let gpu_verts: SmallVec<[Vertex; 4]> = verts
            .iter()
            .map(|v| self.build_vertex(header, v, ctx, polygon_ram))
            .collect();

        let reversed = self.is_ccw(header, &verts, ctx.winding_sign);
        let mut tris = SmallVec::new();
        self.emit_triangles(&gpu_verts, reversed, state, &mut tris);
        if header.double_sided() {
            let negated: SmallVec<[Vertex; 4]> = gpu_verts
                .iter()
                .map(|v| {
                    let mut v = *v;
                    v.normal = [-v.normal[0], -v.normal[1], -v.normal[2]];
                    v
                })
                .collect();
            self.emit_triangles(&negated, !reversed, state, &mut tris);
        }
        tris
    }

    fn is_ccw(&self, header: &PolygonHeader, verts: &[VertexWord], winding_sign: f32) -> bool {
        if verts.len() < 3 {
            return false;
        }
        let v0 = [verts[0].x, verts[0].y, verts[0].z];
        let v1 = [verts[1].x, verts[1].y, verts[1].z];
        let v2 = [verts[2].x, verts[2].y, verts[2].z];
        let e1 = sub(v0, v1);
        let e2 = sub(v2, v1);
        let cross = cross3(e1, e2);
        let n = header.polygon_normal();
        let dot = cross[0] * n[0] + cross[1] * n[1] + cross[2] * n[2];
        (dot * winding_sign) < 0.0
    }

    fn emit_triangles(
        &self,
        verts: &[Vertex],
        reversed: bool,
        state: PolyState,
        out: &mut SmallVec<[DecodedTriangle; 4]>,
    ) {
        let push = |a: usize, b: usize, c: usize, out: &mut SmallVec<[DecodedTriangle; 4]>| {
            let (b, c) = if reversed { (c, b) } else { (b, c) };
            out.push(DecodedTriangle {
                vertices: [verts[a], verts[b], verts[c]],
                state,
            });
        };
        if verts.len() >= 3 {
            push(0, 1, 2, out);
        }
        if verts.len() == 4 {
            push(0, 2, 3, out);
        }
    }

    fn build_vertex(
        &self,
        header: &PolygonHeader,
        v: &VertexWord,
        ctx: &PolygonDecodeCtx,
        polygon_ram: &[u32],
    ) -> Vertex {
        let material = header.material(ctx.color_table_addr, polygon_ram);
        let (base_r, base_g, base_b) = match material {
            Material::Direct { r, g, b } => (r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0),
            Material::Palette { index } => {
                let r = ((index >> 16) & 0xFF) as f32 / 255.0;
                let g = ((index >> 8) & 0xFF) as f32 / 255.0;
                let b = (index & 0xFF) as f32 / 255.0;
                (r, g, b)
            }
        };

        let collapse_to_scalar =
            header.fixed_shading() && !header.lighting_disabled() && !header.smooth_shading();
        let (normal, light_enable) = if header.smooth_shading() {
            (v.normalized_normal(), !header.lighting_disabled())
        } else {
            (header.polygon_normal(), !header.lighting_disabled() && !collapse_to_scalar)
        };

        let shade = if collapse_to_scalar {
            v.intensity
        } else {
            1.0
        };
        let modulate = header.modulates_with_material_color();
        let (r, g, b) = if modulate {
            (base_r * shade, base_g * shade, base_b * shade)
        } else {
            (shade, shade, shade)
        };

        let (specular_coefficient, shininess) = match header.specular() {
            Some((coeff, shiny)) => (coeff, shiny),
            None => (0.0, crate::vertex::SHININESS_DISABLED),
        };

        let bank_term = header.tex_bank_raw() ^ ctx.tex_offset_state.switch_bank;
        let raw_x = (header.tex_base_x_raw() + ctx.tex_offset_state.x) & (SHEET_SIDE - 1);
        let raw_y =
            ((header.tex_base_y_raw() + ctx.tex_offset_state.y) ^ bank_term) & (SHEET_SIDE - 1);

        let mut tex_params = 0u32;
        if header.texture_enable() {
            tex_params |= TEX_ENABLE_BIT;
        }
        if header.contour_enable() {
            tex_params |= TEX_CONTOUR_BIT;
        }
        if header.u_wrap() {
            tex_params |= TEX_U_WRAP_BIT;
        }
        if header.v_wrap() {
            tex_params |= TEX_V_WRAP_BIT;
        }

        Vertex {
            position: [v.x, v.y, v.z],
            normal,
            color: [r, g, b],
            translucence: header.translucence(),
            light_enable: if light_enable { 1.0 } else { 0.0 },
            specular_coefficient,
            shininess,
            fog_intensity: header.fog_intensity(),
            uv: [v.u, v.v],
            tex_base: [
                raw_x as f32,
                raw_y as f32,
                header.tex_width() as f32,
                header.tex_height() as f32,
            ],
            tex_params,
            tex_format: header.tex_format() as u32,
            sheet_index: header.tex_format() as u32,
        }
    }
}

impl Default for ModelDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn cross3(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> PolygonDecodeCtx {
        PolygonDecodeCtx {
            color_table_addr: 0,
            tex_offset_state: TextureOffsetState::default(),
            winding_sign: 1.0,
            vertex_factor: 1.0 / 2048.0,
        }
    }

    fn vw(x: i32, y: i32, z: i32) -> [u32; 4] {
        [
            ((x << 8) as u32),
            ((y << 8) as u32),
            ((z << 8) as u32),
            0,
        ]
    }

    #[test]
    fn triangle_emits_one_triangle() {
        let mut dec = ModelDecoder::new();
        let header = PolygonHeader([0, 0x04, 0, 0, 0xFFFFFFFF, 0, 0x0080_0400]);
        let words = [vw(0, 0, -100), vw(100, 0, -100), vw(0, 100, -100)];
        let tris = dec.decode_polygon(&header, &words, &ctx(), &[]);
        assert_eq!(tris.len(), 1);
        assert_eq!(tris[0].state, PolyState::Opaque);
    }

    #[test]
    fn quad_emits_two_triangles() {
        let mut dec = ModelDecoder::new();
        let header = PolygonHeader([0x40, 0x04, 0, 0, 0xFFFFFFFF, 0, 0x0080_0400]);
        let words = [
            vw(0, 0, -100),
            vw(100, 0, -100),
            vw(100, 100, -100),
            vw(0, 100, -100),
        ];
        let tris = dec.decode_polygon(&header, &words, &ctx(), &[]);
        assert_eq!(tris.len(), 2);
    }

    #[test]
    fn double_sided_doubles_triangle_count() {
        let mut dec = ModelDecoder::new();
        let header = PolygonHeader([0, 0x14, 0, 0, 0xFFFFFFFF, 0, 0x0080_0400]);
        let words = [vw(0, 0, -100), vw(100, 0, -100), vw(0, 100, -100)];
        let tris = dec.decode_polygon(&header, &words, &ctx(), &[]);
        assert_eq!(tris.len(), 2);
    }

    #[test]
    fn reuse_mask_pulls_from_prev_cache() {
        let mut dec = ModelDecoder::new();
        let header1 = PolygonHeader([0, 0x04, 0, 0, 0xFFFFFFFF, 0, 0x0080_0400]);
        let words1 = [vw(0, 0, -100), vw(100, 0, -100), vw(0, 100, -100)];
        dec.decode_polygon(&header1, &words1, &ctx(), &[]);

        // header[0] & 0xF = 0x3 reuses Prev[0], Prev[1]; one fresh vertex.
        let header2 = PolygonHeader([0x3, 0x04, 0, 0, 0xFFFFFFFF, 0, 0x0080_0400]);
        let words2 = [vw(50, 50, -150)];
        let tris = dec.decode_polygon(&header2, &words2, &ctx(), &[]);
        assert_eq!(tris.len(), 1);
        let expected_z = -100.0 / 2048.0;
        assert!((tris[0].vertices[0].position[2] - expected_z).abs() < 1e-6);
    }
}

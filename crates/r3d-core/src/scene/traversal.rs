//! Scene-graph traversal (§4.3 "Scene-graph traversal").
//!
//! Walks the viewport chain, then within each viewport the culling-node
//! graph, accumulating one `ModelVisit` per model reference reached.
//! Grounded directly in `CLegacy3D::RenderViewport` /
//! `DescendCullingNode` / `DescendPointerList` / `DescendNodePtr`: the
//! recursion-depth caps, the LOD-table branch, and the pointer-list scan
//! order are all carried over from there.

use glam::Mat4;
use r3d_formats::scene_node::{
    decode_node_ptr, pointer_list_targets, NodePtrKind, SceneNode, TextureOffsetState, Viewport,
};
use r3d_formats::stepping::Stepping;

use crate::memory::MemoryViews;
use crate::scene::matrix::MatrixStack;

/// Safety net against runaway recursion through malformed culling-node
/// graphs (stack depth of 64 proved too small for some titles; the
/// original doubles it and adds headroom).
const MAX_CULLING_DEPTH: u32 = 512 + 64;
/// Several stepping 2.1 titles rely on this cap to avoid infinite
/// pointer-list cycles.
const MAX_POINTER_LIST_DEPTH: u32 = 3;
const NODE_WORDS: usize = 9;
const VIEWPORT_WORDS: usize = 0x30;
const MAX_POINTER_LIST_WORDS: usize = 256;
/// Matrix table read bound: matrix indices are 12 bits (up to 4096
/// entries), each 12 floats.
const MAX_MATRIX_FLOATS: usize = 12 * 4096;

/// One model reference reached during traversal, with the transform and
/// shading state in effect at the point it was visited.
#[derive(Debug, Clone, Copy)]
pub struct ModelVisit {
    pub addr: u32,
    pub model_view: Mat4,
    pub color_table_addr: u32,
    pub tex_offset_state: TextureOffsetState,
    pub winding_sign: f32,
}

/// One decoded viewport and the model references found beneath it.
pub struct ViewportVisit {
    pub viewport: Viewport,
    pub models: Vec<ModelVisit>,
}

pub struct SceneTraversal<'a> {
    memory: MemoryViews<'a>,
    stepping: Stepping,
}

impl<'a> SceneTraversal<'a> {
    pub fn new(memory: MemoryViews<'a>, stepping: Stepping) -> Self {
        Self { memory, stepping }
    }

    fn read_node(&self, addr: u32) -> Option<[u32; NODE_WORDS]> {
        let slice = self.memory.culling_slice(addr, NODE_WORDS).ok()?;
        let mut words = [0u32; NODE_WORDS];
        words.copy_from_slice(slice);
        Some(words)
    }

    fn read_matrix_floats(&self, addr: u32, max_words: usize) -> Vec<f32> {
        match self.memory.culling_slice_up_to(addr, max_words) {
            Ok(slice) => slice.iter().map(|w| f32::from_bits(*w)).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Walk the viewport chain starting at `root_addr` (always
    /// `0x800000` in practice), collecting every viewport whose
    /// `node_addr` points at a valid scene graph, bounded by
    /// `max_viewports` against malformed chains that never terminate.
    pub fn walk_frame(&self, root_addr: u32, max_viewports: usize) -> Vec<ViewportVisit> {
        let mut out = Vec::new();
        let mut addr = root_addr;
        let mut color_table_addr = 0u32;
        for _ in 0..max_viewports {
            let Ok(words) = self.memory.culling_slice(addr, VIEWPORT_WORDS) else {
                break;
            };
            let vp = Viewport::decode(words);
            if vp.is_uninitialized() {
                break;
            }

            if vp.node_addr != 0 {
                let matrix_base = self.read_matrix_floats(vp.base_matrix_addr, MAX_MATRIX_FLOATS);
                let mut matrices = MatrixStack::new();
                matrices.load_base(&matrix_base, self.stepping.coord_matrix_scale());
                let winding_sign = MatrixStack::coord_matrix_m13_sign(&matrix_base);
                let mut tex_offset = TextureOffsetState::default();
                let mut models = Vec::new();
                self.visit_node_ptr(
                    vp.node_addr,
                    0,
                    0,
                    &mut matrices,
                    &matrix_base,
                    &mut color_table_addr,
                    &mut tex_offset,
                    winding_sign,
                    &mut models,
                );
                out.push(ViewportVisit { viewport: vp, models });
            }

            if vp.is_chain_end() {
                break;
            }
            addr = vp.next_addr;
        }
        out
    }

    fn visit_node_ptr(
        &self,
        ptr: u32,
        depth: u32,
        list_depth: u32,
        matrices: &mut MatrixStack,
        matrix_base: &[f32],
        color_table_addr: &mut u32,
        tex_offset: &mut TextureOffsetState,
        winding_sign: f32,
        out: &mut Vec<ModelVisit>,
    ) {
        match decode_node_ptr(ptr) {
            NodePtrKind::CullingNode(addr) => self.visit_culling_node(
                addr,
                depth,
                list_depth,
                matrices,
                matrix_base,
                color_table_addr,
                tex_offset,
                winding_sign,
                out,
            ),
            NodePtrKind::Model(addr) => out.push(ModelVisit {
                addr,
                model_view: matrices.top(),
                color_table_addr: *color_table_addr,
                tex_offset_state: *tex_offset,
                winding_sign,
            }),
            NodePtrKind::PointerList(addr) => self.visit_pointer_list(
                addr,
                depth,
                list_depth,
                matrices,
                matrix_base,
                color_table_addr,
                tex_offset,
                winding_sign,
                out,
            ),
            NodePtrKind::Unknown => {}
        }
    }

    fn visit_culling_node(
        &self,
        addr: u32,
        depth: u32,
        list_depth: u32,
        matrices: &mut MatrixStack,
        matrix_base: &[f32],
        color_table_addr: &mut u32,
        tex_offset: &mut TextureOffsetState,
        winding_sign: f32,
        out: &mut Vec<ModelVisit>,
    ) {
        if depth >= MAX_CULLING_DEPTH {
            return;
        }
        let Some(words) = self.read_node(addr) else {
            return;
        };
        let node = SceneNode::new(&words, self.stepping);

        if node.updates_color_table() {
            *color_table_addr = node.color_table_addr();
        }

        let saved_tex_offset = *tex_offset;
        if let Some(new_state) = node.texture_offset_update(self.stepping) {
            *tex_offset = new_state;
        }

        matrices.push();
        if node.translation_only() {
            let (x, y, z) = node.translation();
            matrices.translate(x, y, z);
        } else {
            let idx = node.matrix_index();
            if idx != 0 {
                matrices.mult_matrix(matrix_base, idx);
            }
        }

        if node.has_lod_table() {
            if let Some(lod_words) = self.read_node(node.node1_ptr() & 0x00FF_FFFF) {
                let lod_entry = lod_words[0] & 0x00FF_FFFF;
                if node.lod_entry_is_culling_node() {
                    self.visit_culling_node(
                        lod_entry,
                        depth + 1,
                        list_depth,
                        matrices,
                        matrix_base,
                        color_table_addr,
                        tex_offset,
                        winding_sign,
                        out,
                    );
                } else if lod_entry != 0 {
                    out.push(ModelVisit {
                        addr: lod_entry,
                        model_view: matrices.top(),
                        color_table_addr: *color_table_addr,
                        tex_offset_state: *tex_offset,
                        winding_sign,
                    });
                }
            }
        } else {
            self.visit_node_ptr(
                node.node1_ptr(),
                depth + 1,
                list_depth,
                matrices,
                matrix_base,
                color_table_addr,
                tex_offset,
                winding_sign,
                out,
            );
        }

        matrices.pop();

        if node.second_link_valid() {
            self.visit_node_ptr(
                node.node2_ptr(),
                depth + 1,
                list_depth,
                matrices,
                matrix_base,
                color_table_addr,
                tex_offset,
                winding_sign,
                out,
            );
        }

        *tex_offset = saved_tex_offset;
    }

    fn visit_pointer_list(
        &self,
        addr: u32,
        depth: u32,
        list_depth: u32,
        matrices: &mut MatrixStack,
        matrix_base: &[f32],
        color_table_addr: &mut u32,
        tex_offset: &mut TextureOffsetState,
        winding_sign: f32,
        out: &mut Vec<ModelVisit>,
    ) {
        if list_depth > MAX_POINTER_LIST_DEPTH {
            return;
        }
        let Ok(list) = self.memory.culling_slice(addr, MAX_POINTER_LIST_WORDS) else {
            return;
        };
        for target in pointer_list_targets(list) {
            self.visit_culling_node(
                target,
                depth,
                list_depth + 1,
                matrices,
                matrix_base,
                color_table_addr,
                tex_offset,
                winding_sign,
                out,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_word(flags: u32, node1: u32, node2: u32) -> [u32; 10] {
        let mut w = [0u32; 10];
        w[0] = flags;
        w[7] = node1;
        w[8] = node2;
        w
    }

    fn views(lo_words: usize) -> (Vec<u32>, Vec<u32>, Vec<u32>, Vec<u32>, Vec<u16>) {
        (
            vec![0u32; lo_words],
            vec![0u32; 16],
            vec![0u32; 16],
            vec![0u32; 16],
            vec![0u16; 16],
        )
    }

    #[test]
    fn single_model_leaf_is_visited() {
        let (mut lo, hi, pr, vr, tr) = views(0x100);
        // viewport at 0x800 (well within culling-lo for this test)
        let vp_base = 0x800usize;
        lo[vp_base + 0x01] = 0x0100_0000; // chain end
        lo[vp_base + 0x02] = 0x0000_0010; // culling node at 0x10
        lo[vp_base + 0x16] = 0x0; // matrix base addr 0

        let node = node_word(0x06, 0x0100_0020, 0); // node1Ptr is a model ref
        lo[0x10..0x10 + node.len()].copy_from_slice(&node);

        let memory = MemoryViews::new(&lo, &hi, &pr, &vr, &tr);
        let trav = SceneTraversal::new(memory, Stepping::V2_1);
        let visits = trav.walk_frame(vp_base as u32, 8);
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].models.len(), 1);
        assert_eq!(visits[0].models[0].addr, 0x20);
    }

    #[test]
    fn second_link_sentinel_0x06_skips_second_child() {
        let (mut lo, hi, pr, vr, tr) = views(0x100);
        let vp_base = 0x800usize;
        lo[vp_base + 0x01] = 0x0100_0000;
        lo[vp_base + 0x02] = 0x10;

        // flags low 3 bits == 0x06 -> second link invalid
        let node = node_word(0x06, 0x0100_0020, 0x0100_0030);
        lo[0x10..0x10 + node.len()].copy_from_slice(&node);

        let memory = MemoryViews::new(&lo, &hi, &pr, &vr, &tr);
        let trav = SceneTraversal::new(memory, Stepping::V2_1);
        let visits = trav.walk_frame(vp_base as u32, 8);
        assert_eq!(visits[0].models.len(), 1);
        assert_eq!(visits[0].models[0].addr, 0x20);
    }

    #[test]
    fn uninitialised_viewport_chain_yields_nothing() {
        let (lo, hi, pr, vr, tr) = views(0x100);
        let memory = MemoryViews::new(&lo, &hi, &pr, &vr, &tr);
        let trav = SceneTraversal::new(memory, Stepping::V2_1);
        let visits = trav.walk_frame(0x800, 8);
        assert!(visits.is_empty());
    }

    #[test]
    fn color_table_update_propagates_to_model_visit() {
        let (mut lo, hi, pr, vr, tr) = views(0x100);
        let vp_base = 0x800usize;
        lo[vp_base + 0x01] = 0x0100_0000;
        lo[vp_base + 0x02] = 0x10;

        let mut node = node_word(0x06 | 0x04, 0x0100_0020, 0);
        node[3] = 0b101 << 19;
        lo[0x10..0x10 + node.len()].copy_from_slice(&node);

        let memory = MemoryViews::new(&lo, &hi, &pr, &vr, &tr);
        let trav = SceneTraversal::new(memory, Stepping::V2_1);
        let visits = trav.walk_frame(vp_base as u32, 8);
        assert_eq!(visits[0].models[0].color_table_addr, 0b101);
    }
}

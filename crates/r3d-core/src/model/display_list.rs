//! Arena-backed display list (§3 "Display-List Node", §9 "pointer-heavy
//! linked lists" redesign note). Per-state lists are head/tail indices
//! into a contiguous pool sized at construction, never reallocated
//! mid-frame.

use glam::Mat4;
use r3d_formats::polygon::PolyState;

use crate::error::{R3dError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winding {
    Cw,
    Ccw,
    DisableCulling,
}

#[derive(Debug, Clone, Copy)]
pub struct ViewportParams {
    pub priority: u8,
    pub fov_y_degrees: f32,
    /// The scene-graph matrix the viewport's own camera node carries
    /// (rare; identity unless the title reorients the whole viewport).
    pub projection: Mat4,
    pub rect: (f32, f32, f32, f32),
    pub sun_direction: [f32; 3],
    pub sun_intensity: f32,
    pub ambient_intensity: f32,
    pub spotlight_color_index: u32,
    pub fog_color: [u8; 3],
    pub fog_density: f32,
    pub fog_start: f32,
}

#[derive(Debug, Clone, Copy)]
pub enum DisplayListNode {
    Viewport(ViewportParams),
    ModelInstance {
        model_view: Mat4,
        vbo_start: u32,
        vbo_count: u32,
        winding: Winding,
        use_stencil: bool,
    },
}

fn state_idx(state: PolyState) -> usize {
    match state {
        PolyState::Opaque => 0,
        PolyState::Alpha => 1,
    }
}

struct Entry {
    node: DisplayListNode,
    next: [Option<u32>; 2],
}

pub struct DisplayList {
    pool: Vec<Entry>,
    capacity: usize,
    head: [Option<u32>; 2],
    tail: [Option<u32>; 2],
}

impl DisplayList {
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: Vec::with_capacity(capacity),
            capacity,
            head: [None; 2],
            tail: [None; 2],
        }
    }

    pub fn clear(&mut self) {
        self.pool.clear();
        self.head = [None; 2];
        self.tail = [None; 2];
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    fn link(&mut self, idx: u32, state: PolyState) {
        let si = state_idx(state);
        match self.tail[si] {
            Some(t) => self.pool[t as usize].next[si] = Some(idx),
            None => self.head[si] = Some(idx),
        }
        self.tail[si] = Some(idx);
    }

    /// Appends one node to both per-state lists (viewports gate every
    /// polygon that follows, regardless of state).
    pub fn append_viewport(&mut self, params: ViewportParams) -> Result<()> {
        if self.pool.len() >= self.capacity {
            return Err(R3dError::ListFull(0));
        }
        let idx = self.pool.len() as u32;
        self.pool.push(Entry {
            node: DisplayListNode::Viewport(params),
            next: [None; 2],
        });
        self.link(idx, PolyState::Opaque);
        self.link(idx, PolyState::Alpha);
        Ok(())
    }

    /// Appends a model-draw node to exactly one per-state list.
    pub fn append_model(
        &mut self,
        addr: u32,
        state: PolyState,
        model_view: Mat4,
        vbo_start: u32,
        vbo_count: u32,
        winding: Winding,
        use_stencil: bool,
    ) -> Result<()> {
        if vbo_count == 0 {
            return Ok(());
        }
        if self.pool.len() >= self.capacity {
            return Err(R3dError::ListFull(addr));
        }
        let idx = self.pool.len() as u32;
        self.pool.push(Entry {
            node: DisplayListNode::ModelInstance {
                model_view,
                vbo_start,
                vbo_count,
                winding,
                use_stencil,
            },
            next: [None; 2],
        });
        self.link(idx, state);
        Ok(())
    }

    /// Walk the `state` list in insertion order, invoking `visit` on
    /// each node.
    pub fn drain(&self, state: PolyState, mut visit: impl FnMut(&DisplayListNode)) {
        let si = state_idx(state);
        let mut cur = self.head[si];
        while let Some(idx) = cur {
            let entry = &self.pool[idx as usize];
            visit(&entry.node);
            cur = entry.next[si];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vp() -> ViewportParams {
        ViewportParams {
            priority: 0,
            fov_y_degrees: 45.0,
            projection: Mat4::IDENTITY,
            rect: (0.0, 0.0, 496.0, 384.0),
            sun_direction: [0.0, -1.0, 0.0],
            sun_intensity: 1.0,
            ambient_intensity: 0.5,
            spotlight_color_index: 0,
            fog_color: [0, 0, 0],
            fog_density: 0.0,
            fog_start: 0.0,
        }
    }

    #[test]
    fn viewport_appears_on_both_state_lists() {
        let mut dl = DisplayList::new(8);
        dl.append_viewport(vp()).unwrap();
        let mut opaque_count = 0;
        let mut alpha_count = 0;
        dl.drain(PolyState::Opaque, |_| opaque_count += 1);
        dl.drain(PolyState::Alpha, |_| alpha_count += 1);
        assert_eq!(opaque_count, 1);
        assert_eq!(alpha_count, 1);
    }

    #[test]
    fn model_node_appears_on_only_its_state_list() {
        let mut dl = DisplayList::new(8);
        dl.append_model(0x10, PolyState::Opaque, Mat4::IDENTITY, 0, 3, Winding::Cw, false)
            .unwrap();
        let mut opaque_count = 0;
        let mut alpha_count = 0;
        dl.drain(PolyState::Opaque, |_| opaque_count += 1);
        dl.drain(PolyState::Alpha, |_| alpha_count += 1);
        assert_eq!(opaque_count, 1);
        assert_eq!(alpha_count, 0);
    }

    #[test]
    fn full_pool_reports_list_full() {
        let mut dl = DisplayList::new(1);
        dl.append_model(0x1, PolyState::Opaque, Mat4::IDENTITY, 0, 3, Winding::Cw, false)
            .unwrap();
        let err = dl.append_model(0x2, PolyState::Opaque, Mat4::IDENTITY, 0, 3, Winding::Cw, false);
        assert!(matches!(err, Err(R3dError::ListFull(0x2))));
    }

    #[test]
    fn drain_visits_in_insertion_order() {
        let mut dl = DisplayList::new(8);
        dl.append_model(0x1, PolyState::Opaque, Mat4::IDENTITY, 0, 3, Winding::Cw, false)
            .unwrap();
        dl.append_model(0x2, PolyState::Opaque, Mat4::IDENTITY, 3, 3, Winding::Cw, false)
            .unwrap();
        let mut starts = Vec::new();
        dl.drain(PolyState::Opaque, |node| {
            if let DisplayListNode::ModelInstance { vbo_start, .. } = node {
                starts.push(*vbo_start);
            }
        });
        assert_eq!(starts, vec![0, 3]);
    }
}

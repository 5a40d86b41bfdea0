//! Per-frame instrumentation, readable by the embedder after
//! `end_frame`.

/// Counters reset at the start of every `begin_frame`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderStats {
    pub models_cached: u32,
    pub vertices_emitted: u32,
    pub polygons_dropped_bad_address: u32,
    pub polygons_dropped_overflow: u32,
    pub models_aborted: u32,
    pub texture_decodes: u32,
    pub display_list_nodes_drained: u32,
    pub cache_drain_retries: u32,
}

impl RenderStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

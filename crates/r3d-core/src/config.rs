//! Renderer configuration (§6 "Configuration options recognized").
//!
//! Parsing this from a file or the game's XML descriptor is out of
//! scope; the embedder builds one of these and passes it to
//! `Renderer::init`.

/// Debug/instrumentation knobs, split out since they're rarely touched
/// outside development builds.
#[derive(Debug, Clone, Default)]
pub struct DebugConfig {
    pub highlight_poly_header_idx: Option<u32>,
    pub highlight_poly_header_mask: u32,
    pub highlight_culling_node_idx: Option<u32>,
    pub highlight_culling_node_mask: u32,
    pub force_flush_models: bool,
}

#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Expand X to the display while keeping Y FOV when a viewport
    /// covers the whole reference 496x384 screen.
    pub wide_screen: bool,
    /// Select the multi-sheet vs single-sheet fragment shader.
    pub multi_texture: bool,
    /// Upper bound on physical texture maps used (1..9).
    pub max_tex_maps: u8,
    /// Upper bound on map side, in multiples of 2048.
    pub max_tex_map_extent: u8,
    /// Override path for external vertex/fragment shader source.
    pub vertex_shader: Option<String>,
    pub fragment_shader: Option<String>,
    pub debug: DebugConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            wide_screen: false,
            multi_texture: true,
            max_tex_maps: 9,
            max_tex_map_extent: 1,
            vertex_shader: None,
            fragment_shader: None,
            debug: DebugConfig::default(),
        }
    }
}

impl RendererConfig {
    /// Clamp to the legal ranges named in §6 so a malformed config
    /// can't request an unrepresentable layout.
    pub fn sanitized(mut self) -> Self {
        self.max_tex_maps = self.max_tex_maps.clamp(1, 9);
        self.max_tex_map_extent = self.max_tex_map_extent.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitized_clamps_tex_maps() {
        let cfg = RendererConfig {
            max_tex_maps: 20,
            max_tex_map_extent: 0,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(cfg.max_tex_maps, 9);
        assert_eq!(cfg.max_tex_map_extent, 1);
    }
}

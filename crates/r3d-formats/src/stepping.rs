//! Hardware stepping selector (§4.4, GLOSSARY "Stepping").
//!
//! The stepping controls the scene-node word offset `o` and the
//! fixed-point scale applied to model-space vertex coordinates.

/// One of the four known Real3D stepping codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stepping {
    /// 0x10 — earliest revision; uses the `o=2` scene-node word offset,
    /// a coarser 1/128 vertex scale, and additionally scales the
    /// coordinate matrix by 1/2048.
    V1_0,
    /// 0x15
    V1_5,
    /// 0x20
    V2_0,
    /// 0x21
    V2_1,
}

impl Stepping {
    /// Decode a stepping code as passed to `set_stepping`.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0x10 => Some(Self::V1_0),
            0x15 => Some(Self::V1_5),
            0x20 => Some(Self::V2_0),
            0x21 => Some(Self::V2_1),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::V1_0 => 0x10,
            Self::V1_5 => 0x15,
            Self::V2_0 => 0x20,
            Self::V2_1 => 0x21,
        }
    }

    /// Scene-node word offset `o`: 2 for stepping 1.0, 0 otherwise.
    #[inline]
    pub fn word_offset(self) -> u32 {
        match self {
            Self::V1_0 => 2,
            _ => 0,
        }
    }

    /// Per-vertex fixed-point coordinate scale: 1/2048 for stepping >=
    /// 1.5, 1/128 for stepping 1.0.
    #[inline]
    pub fn vertex_factor(self) -> f32 {
        match self {
            Self::V1_0 => 1.0 / 128.0,
            _ => 1.0 / 2048.0,
        }
    }

    /// Additional scale applied to the coordinate (base) matrix; only
    /// stepping 1.0 scales it by 1/2048, later steppings leave it as-is.
    #[inline]
    pub fn coord_matrix_scale(self) -> f32 {
        match self {
            Self::V1_0 => 1.0 / 2048.0,
            _ => 1.0,
        }
    }

    /// Whether this stepping decodes a texture-offset state update from
    /// word 2 bit 0x8000 of a scene node (stepping >= 1.5 only).
    #[inline]
    pub fn supports_texture_offset_state(self) -> bool {
        !matches!(self, Self::V1_0)
    }
}

impl Default for Stepping {
    fn default() -> Self {
        Self::V2_1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_offset_only_nonzero_for_v1_0() {
        assert_eq!(Stepping::V1_0.word_offset(), 2);
        assert_eq!(Stepping::V1_5.word_offset(), 0);
        assert_eq!(Stepping::V2_0.word_offset(), 0);
        assert_eq!(Stepping::V2_1.word_offset(), 0);
    }

    #[test]
    fn vertex_factor_matches_stepping() {
        assert_eq!(Stepping::V1_0.vertex_factor(), 1.0 / 128.0);
        assert_eq!(Stepping::V1_5.vertex_factor(), 1.0 / 2048.0);
        assert_eq!(Stepping::V2_1.vertex_factor(), 1.0 / 2048.0);
    }

    #[test]
    fn from_code_round_trips() {
        for code in [0x10u32, 0x15, 0x20, 0x21] {
            let s = Stepping::from_code(code).unwrap();
            assert_eq!(s.code(), code);
        }
        assert!(Stepping::from_code(0x99).is_none());
    }

    #[test]
    fn texture_offset_state_gated_on_stepping() {
        assert!(!Stepping::V1_0.supports_texture_offset_state());
        assert!(Stepping::V1_5.supports_texture_offset_state());
        assert!(Stepping::V2_1.supports_texture_offset_state());
    }
}

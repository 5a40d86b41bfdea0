//! Wire-format decoders for the Real3D scene database.
//!
//! This crate has no GPU dependency: it only knows how to read the bit
//! layouts the hardware actually used (polygon headers, scene-graph
//! nodes, viewport fields, texture references, and the eight source
//! texel formats). `r3d-core` turns the values these decoders expose
//! into vertex-buffer and display-list state.

pub mod polygon;
pub mod scene_node;
pub mod stepping;
pub mod texel;
pub mod texref;

pub use polygon::{Material, PolyState, PolygonHeader, VertexWord};
pub use scene_node::{NodePtrKind, SceneNode, TextureOffsetState, Viewport};
pub use stepping::Stepping;
pub use texref::TextureRef;

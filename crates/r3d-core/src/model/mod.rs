//! Model Cache (§4.3) and polygon-stream decode (§4.4).

pub mod cache;
pub mod display_list;
pub mod parser;

pub use cache::{CacheKind, ModelCache, VboRef};
pub use display_list::{DisplayListNode, Winding};
pub use parser::{DecodedTriangle, ModelDecoder, PolygonDecodeCtx};

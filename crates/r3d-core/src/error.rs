//! Closed error taxonomy for the renderer.

use thiserror::Error;

/// Errors a renderer operation can surface. Most are recovered locally
/// (logged, offending polygon/model skipped); only `Init` variants
/// propagate out of `Renderer::init`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum R3dError {
    #[error("address {0:#08x} does not translate to a known memory region")]
    BadAddress(u32),

    #[error("scratch vertex buffer overflow caching model {0:#08x}")]
    LocalOverflow(u32),

    #[error("global vertex buffer full while caching model {0:#08x}")]
    VboFull(u32),

    #[error("display list exhausted while caching model {0:#08x}")]
    ListFull(u32),

    #[error("failed to cache model {0:#08x} after drain-and-retry")]
    UnableToCache(u32),

    #[error("initialization failed: {0}")]
    Init(#[from] InitError),
}

/// Fatal failures that can only occur during `Renderer::init`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    #[error("no texture map of at least 2048x2048 could be allocated")]
    NoTextureMap,
    #[error("shader program failed to compile or link")]
    NoShader,
    #[error("out of host or device memory during setup")]
    NoMemory,
}

pub type Result<T> = std::result::Result<T, R3dError>;

#![forbid(unsafe_code)]

//! pixfx: an image filter pipeline for 2D canvas work.
//!
//! Ordered chains of pixel operations (blur, convolution, resampling,
//! color matrices, blends) run over straight-alpha RGBA8 buffers on one
//! of two interchangeable backends: a wgpu render pipeline (cargo feature
//! `gpu`) or a plain CPU byte-array path. Both are expected to produce
//! visually equivalent output for the same chain.

pub mod assets;
pub mod backend;
pub mod buffer;
pub mod error;
pub mod filters;

pub use backend::{BackendSelector, FilterBackend, PipelineState, apply_filters};
pub use buffer::PixelBuffer;
pub use error::{PixfxError, PixfxResult};

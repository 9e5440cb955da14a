//! Backend abstraction layer
//!
//! Provides the `RenderContext` trait and the two implementations: a CPU
//! reference rasterizer and a headless wgpu backend.

#[cfg(test)]
pub(crate) mod faulty;
pub mod software;
pub mod traits;
pub mod types;

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

pub use traits::*;
pub use types::*;

//! Shared helpers for the bake integration tests.

use std::path::{Path, PathBuf};

use image::codecs::hdr::HdrEncoder;
use image::Rgb;
use pbr_ibl::backend::RenderContext;
use pbr_ibl::{BackendType, BakeConfig, HdrImage};

/// Backends the integration tests run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// CPU reference backend, always available.
    Software,
    /// Headless wgpu backend, needs an adapter.
    Wgpu,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Software => "software",
            Backend::Wgpu => "wgpu",
        }
    }

    /// Create a context, or `None` when the backend cannot run here.
    pub fn create(self) -> Option<Box<dyn RenderContext>> {
        let backend_type = match self {
            Backend::Software => BackendType::Software,
            Backend::Wgpu => BackendType::Wgpu,
        };
        match backend_type.create_context() {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                eprintln!("Backend {:?} not available: {}", self, e);
                None
            }
        }
    }
}

/// Bake settings small enough for the software rasterizer.
pub fn small_config() -> BakeConfig {
    BakeConfig {
        environment_size: 16,
        irradiance_size: 4,
        prefilter_size: 16,
        prefilter_mip_levels: 5,
        brdf_lut_size: 16,
        irradiance_sample_delta: 0.1,
        prefilter_sample_count: 32,
        brdf_sample_count: 64,
        sources: Vec::new(),
    }
}

pub fn constant_image(value: [f32; 3]) -> HdrImage {
    HdrImage {
        width: 32,
        height: 16,
        texels: vec![[value[0], value[1], value[2], 1.0]; 32 * 16],
    }
}

/// Empty per-test scratch directory.
pub fn scratch_dir(test: &str, backend: Backend) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("pbr_ibl_{}_{}", test, backend.name()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Write a Radiance HDR file, `f(x, y)` giving the radiance with y = 0 at the top.
pub fn write_hdr(path: &Path, width: usize, height: usize, f: impl Fn(usize, usize) -> [f32; 3]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let pixels: Vec<Rgb<f32>> = (0..height)
        .flat_map(|y| (0..width).map(move |x| (x, y)))
        .map(|(x, y)| Rgb(f(x, y)))
        .collect();
    let file = std::fs::File::create(path).unwrap();
    HdrEncoder::new(file).encode(&pixels, width, height).unwrap();
}

/// Largest absolute channel difference over RGB.
pub fn rgb_error(texel: [f32; 4], expected: [f32; 3]) -> f32 {
    (0..3)
        .map(|c| (texel[c] - expected[c]).abs())
        .fold(0.0, f32::max)
}

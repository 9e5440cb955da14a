//! Equirectangular HDR panorama loading.

use std::path::Path;

use crate::backend::{RenderContext, TextureDescriptor, TextureFormat, TextureHandle};
use crate::error::{IblError, IblResult};

/// Decoded panorama, bottom row first.
#[derive(Debug, Clone)]
pub struct HdrImage {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<[f32; 4]>,
}

impl HdrImage {
    /// Decode a Radiance `.hdr` (or any float image `image` understands).
    ///
    /// Rows are flipped so that row 0 holds the bottom of the panorama,
    /// matching `v = 0` at the nadir in the equirectangular mapping.
    pub fn load(path: &Path) -> IblResult<Self> {
        let img = image::open(path).map_err(|source| {
            log::error!("Failed to load HDR image {}: {}", path.display(), source);
            IblError::HdrLoad {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let flipped = img.flipv();
        let width = flipped.width();
        let height = flipped.height();
        log::info!("HDR image {}: {}x{}", path.display(), width, height);

        let rgba = flipped.to_rgba32f();
        let texels = rgba.pixels().map(|p| p.0).collect();
        Ok(Self {
            width,
            height,
            texels,
        })
    }

    /// Upload as a half-float 2D texture. Values keep their full range.
    pub fn upload(&self, ctx: &mut dyn RenderContext, label: &str) -> IblResult<TextureHandle> {
        let desc =
            TextureDescriptor::new_2d(self.width, self.height, TextureFormat::Rgba16Float)
                .with_label(label);
        let texture = ctx.create_texture(&desc)?;
        ctx.write_texture(texture, &self.texels)?;
        Ok(texture)
    }
}

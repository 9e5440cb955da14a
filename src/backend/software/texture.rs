//! CPU texture storage and filtering for the software backend.

use glam::{Vec2, Vec3, Vec4};
use half::f16;

use crate::backend::types::{CubeFace, TextureDescriptor, TextureFormat, TextureKind};

/// Texels of a 2D or cube texture, stored `[mip][layer][y * width + x]`.
#[derive(Debug, Clone)]
pub struct CpuTexture {
    desc: TextureDescriptor,
    levels: Vec<Vec<Vec<[f32; 4]>>>,
}

impl CpuTexture {
    pub fn new(desc: TextureDescriptor) -> Self {
        let layers = desc.kind.layers() as usize;
        let levels = (0..desc.mip_levels)
            .map(|mip| {
                let (w, h) = desc.mip_extent(mip);
                vec![vec![[0.0, 0.0, 0.0, 1.0]; (w * h) as usize]; layers]
            })
            .collect();
        Self { desc, levels }
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.desc
    }

    /// Round a value to what the format can hold.
    pub fn quantize(format: TextureFormat, value: [f32; 4]) -> [f32; 4] {
        let mut out = value;
        if format.is_half() {
            for c in &mut out {
                *c = f16::from_f32(*c).to_f32();
            }
        }
        if format.channels() == 2 {
            out[2] = 0.0;
            out[3] = 1.0;
        }
        out
    }

    pub fn store(&mut self, layer: u32, mip: u32, x: u32, y: u32, value: [f32; 4]) {
        let (w, _) = self.desc.mip_extent(mip);
        let quantized = Self::quantize(self.desc.format, value);
        self.levels[mip as usize][layer as usize][(y * w + x) as usize] = quantized;
    }

    pub fn level(&self, layer: u32, mip: u32) -> &[[f32; 4]] {
        &self.levels[mip as usize][layer as usize]
    }

    pub fn level_mut(&mut self, layer: u32, mip: u32) -> &mut Vec<[f32; 4]> {
        &mut self.levels[mip as usize][layer as usize]
    }

    fn fetch(&self, layer: u32, mip: u32, x: u32, y: u32) -> Vec4 {
        let (w, _) = self.desc.mip_extent(mip);
        Vec4::from(self.levels[mip as usize][layer as usize][(y * w + x) as usize])
    }

    /// Box-filter every level from the one above it.
    pub fn generate_mipmaps(&mut self) {
        for mip in 1..self.desc.mip_levels {
            let (src_w, src_h) = self.desc.mip_extent(mip - 1);
            let (dst_w, dst_h) = self.desc.mip_extent(mip);
            for layer in 0..self.desc.kind.layers() {
                for y in 0..dst_h {
                    for x in 0..dst_w {
                        let mut sum = Vec4::ZERO;
                        for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                            let sx = (x * 2 + dx).min(src_w - 1);
                            let sy = (y * 2 + dy).min(src_h - 1);
                            sum += self.fetch(layer, mip - 1, sx, sy);
                        }
                        self.store(layer, mip, x, y, (sum * 0.25).to_array());
                    }
                }
            }
        }
    }

    /// Bilinear sample of mip 0 of a 2D texture; wraps horizontally, clamps vertically.
    pub fn sample_2d(&self, uv: Vec2) -> Vec4 {
        debug_assert_eq!(self.desc.kind, TextureKind::D2);
        let (w, h) = self.desc.mip_extent(0);
        let s = uv.x * w as f32 - 0.5;
        let t = uv.y * h as f32 - 0.5;
        let x0 = s.floor();
        let y0 = t.floor();
        let fx = s - x0;
        let fy = t - y0;

        let wrap_x = |x: i64| x.rem_euclid(w as i64) as u32;
        let clamp_y = |y: i64| y.clamp(0, h as i64 - 1) as u32;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let a = self.fetch(0, 0, wrap_x(x0), clamp_y(y0));
        let b = self.fetch(0, 0, wrap_x(x0 + 1), clamp_y(y0));
        let c = self.fetch(0, 0, wrap_x(x0), clamp_y(y0 + 1));
        let d = self.fetch(0, 0, wrap_x(x0 + 1), clamp_y(y0 + 1));
        a.lerp(b, fx).lerp(c.lerp(d, fx), fy)
    }

    /// Trilinear cube sample at an explicit LOD.
    pub fn sample_cube(&self, dir: Vec3, lod: f32, seamless: bool) -> Vec4 {
        debug_assert_eq!(self.desc.kind, TextureKind::Cube);
        let max_lod = (self.desc.mip_levels - 1) as f32;
        let lod = lod.clamp(0.0, max_lod);
        let lower = lod.floor() as u32;
        let upper = lod.ceil() as u32;
        let a = self.sample_cube_level(dir, lower, seamless);
        if upper == lower {
            return a;
        }
        let b = self.sample_cube_level(dir, upper, seamless);
        a.lerp(b, lod - lower as f32)
    }

    fn sample_cube_level(&self, dir: Vec3, mip: u32, seamless: bool) -> Vec4 {
        let (face, u, v) = CubeFace::project(dir);
        let (size, _) = self.desc.mip_extent(mip);
        let s = (u + 1.0) * 0.5 * size as f32 - 0.5;
        let t = (v + 1.0) * 0.5 * size as f32 - 0.5;
        let x0 = s.floor();
        let y0 = t.floor();
        let fx = s - x0;
        let fy = t - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let a = self.fetch_cube(face, mip, x0, y0, seamless);
        let b = self.fetch_cube(face, mip, x0 + 1, y0, seamless);
        let c = self.fetch_cube(face, mip, x0, y0 + 1, seamless);
        let d = self.fetch_cube(face, mip, x0 + 1, y0 + 1, seamless);
        a.lerp(b, fx).lerp(c.lerp(d, fx), fy)
    }

    /// Fetch a face texel; coordinates past the edge either clamp or continue
    /// onto the neighbouring face.
    fn fetch_cube(&self, face: CubeFace, mip: u32, x: i64, y: i64, seamless: bool) -> Vec4 {
        let (size, _) = self.desc.mip_extent(mip);
        let n = size as i64;
        let inside = (0..n).contains(&x) && (0..n).contains(&y);
        if inside || !seamless {
            let cx = x.clamp(0, n - 1) as u32;
            let cy = y.clamp(0, n - 1) as u32;
            return self.fetch(face.layer(), mip, cx, cy);
        }

        let u = (x as f32 + 0.5) / size as f32 * 2.0 - 1.0;
        let v = (y as f32 + 0.5) / size as f32 * 2.0 - 1.0;
        let (neighbour, nu, nv) = CubeFace::project(face.texel_direction(u, v));
        let to_texel = |c: f32| (((c + 1.0) * 0.5 * size as f32) as i64).clamp(0, n - 1) as u32;
        self.fetch(neighbour.layer(), mip, to_texel(nu), to_texel(nv))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_cube(size: u32, value: [f32; 4]) -> CpuTexture {
        let mut tex = CpuTexture::new(
            TextureDescriptor::new_cube(size, TextureFormat::Rgba32Float).with_full_mip_chain(),
        );
        for layer in 0..6 {
            tex.level_mut(layer, 0).fill(value);
        }
        tex
    }

    #[test]
    fn test_half_quantization() {
        let q = CpuTexture::quantize(TextureFormat::Rgba16Float, [1.0 / 3.0, 2.0, 1000.5, 1.0]);
        assert!((q[0] - 1.0 / 3.0).abs() < 1e-3);
        assert_ne!(q[0], 1.0 / 3.0);
        assert_eq!(q[1], 2.0);

        let rg = CpuTexture::quantize(TextureFormat::Rg16Float, [0.5, 0.25, 7.0, 7.0]);
        assert_eq!(rg, [0.5, 0.25, 0.0, 1.0]);
    }

    #[test]
    fn test_mipmaps_preserve_constant() {
        let mut tex = constant_cube(8, [0.5, 1.5, 2.5, 1.0]);
        tex.generate_mipmaps();
        for mip in 0..4 {
            for layer in 0..6 {
                assert!(tex.level(layer, mip).iter().all(|t| *t == [0.5, 1.5, 2.5, 1.0]));
            }
        }
    }

    #[test]
    fn test_mipmap_averages_quad() {
        let mut tex = CpuTexture::new(
            TextureDescriptor::new_2d(2, 2, TextureFormat::Rgba32Float).with_mip_levels(2),
        );
        tex.level_mut(0, 0)
            .copy_from_slice(&[[0.0; 4], [1.0; 4], [2.0; 4], [3.0; 4]]);
        tex.generate_mipmaps();
        assert_eq!(tex.level(0, 1), &[[1.5; 4]]);
    }

    #[test]
    fn test_seamless_fetch_crosses_to_neighbour() {
        let mut tex = CpuTexture::new(TextureDescriptor::new_cube(4, TextureFormat::Rgba32Float));
        for face in CubeFace::ALL {
            let value = face.layer() as f32;
            tex.level_mut(face.layer(), 0).fill([value, value, value, 1.0]);
        }
        // One texel to the right of +X lands on -Z.
        let outside = tex.fetch_cube(CubeFace::PositiveX, 0, 4, 1, true);
        assert_eq!(outside.x, CubeFace::NegativeZ.layer() as f32);
        let clamped = tex.fetch_cube(CubeFace::PositiveX, 0, 4, 1, false);
        assert_eq!(clamped.x, CubeFace::PositiveX.layer() as f32);
    }

    #[test]
    fn test_sample_2d_wraps_horizontally() {
        let mut tex = CpuTexture::new(TextureDescriptor::new_2d(4, 1, TextureFormat::Rgba32Float));
        tex.level_mut(0, 0)
            .copy_from_slice(&[[0.0; 4], [0.0; 4], [0.0; 4], [4.0; 4]]);
        // Halfway between the last and the first texel.
        let s = tex.sample_2d(Vec2::new(0.0, 0.5));
        assert!((s.x - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_cube_lod_clamps_to_last_level() {
        let tex = constant_cube(4, [3.0, 3.0, 3.0, 1.0]);
        let s = tex.sample_cube(Vec3::X, 42.0, true);
        assert_eq!(s.x, 3.0);
    }
}

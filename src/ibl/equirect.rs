//! Equirectangular panorama to environment cubemap.

use crate::backend::{ProgramHandle, RenderContext, TextureHandle, TextureKind, UniformValue};
use crate::error::IblResult;
use crate::shader::{ShaderProgram, SAMPLER_EQUIRECTANGULAR_MAP};

use super::{create_pass_program, CaptureTarget, CubeProjectionRig, BAKE_INPUT_UNIT};

/// Projects a 2D panorama onto the six faces of a cubemap.
#[derive(Debug)]
pub struct EquirectToCubemapPass {
    program: ProgramHandle,
}

impl EquirectToCubemapPass {
    pub fn new(ctx: &mut dyn RenderContext) -> IblResult<Self> {
        let program = create_pass_program(ctx, &ShaderProgram::equirect_to_cubemap())?;
        Ok(Self { program })
    }

    /// Fill mip 0 of every face of `environment`, then build its mip chain.
    pub fn run(
        &self,
        ctx: &mut dyn RenderContext,
        capture: &mut CaptureTarget,
        rig: &CubeProjectionRig,
        panorama: TextureHandle,
        environment: TextureHandle,
    ) -> IblResult<()> {
        let desc = ctx.texture_info(environment)?;
        debug_assert_eq!(desc.kind, TextureKind::Cube);

        ctx.use_program(self.program)?;
        ctx.set_uniform(
            SAMPLER_EQUIRECTANGULAR_MAP,
            UniformValue::Int(BAKE_INPUT_UNIT.0 as i32),
        )?;
        rig.upload_projection(ctx)?;
        ctx.bind_texture(BAKE_INPUT_UNIT, panorama)?;

        capture.bind_for_size(ctx, desc.width, desc.height)?;
        rig.render_faces(ctx, capture, environment, 0)?;

        ctx.generate_mipmaps(environment)?;
        log::debug!(
            "Environment cubemap {}x{} with {} mip levels",
            desc.width,
            desc.height,
            desc.mip_levels
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::backend::{CubeFace, TextureDescriptor, TextureFormat};

    #[test]
    fn test_constant_panorama_fills_every_level() {
        let mut ctx = SoftwareBackend::new();
        let mut capture = CaptureTarget::new(&mut ctx).unwrap();
        let rig = CubeProjectionRig::new();
        let pass = EquirectToCubemapPass::new(&mut ctx).unwrap();

        let panorama = ctx
            .create_texture(&TextureDescriptor::new_2d(16, 8, TextureFormat::Rgba16Float))
            .unwrap();
        ctx.write_texture(panorama, &vec![[2.5, 0.5, 8.0, 1.0]; 128]).unwrap();
        let environment = ctx
            .create_texture(
                &TextureDescriptor::new_cube(8, TextureFormat::Rgba16Float).with_full_mip_chain(),
            )
            .unwrap();

        pass.run(&mut ctx, &mut capture, &rig, panorama, environment).unwrap();

        for mip in 0..4 {
            for layer in 0..6 {
                for texel in ctx.read_texture(environment, layer, mip).unwrap() {
                    assert!((texel[0] - 2.5).abs() < 1e-3, "mip {mip} layer {layer}: {texel:?}");
                    assert!((texel[2] - 8.0).abs() < 1e-2);
                }
            }
        }
    }

    #[test]
    fn test_panorama_orientation() {
        let mut ctx = SoftwareBackend::new();
        let mut capture = CaptureTarget::new(&mut ctx).unwrap();
        let rig = CubeProjectionRig::new();
        let pass = EquirectToCubemapPass::new(&mut ctx).unwrap();

        // Row 0 is the nadir after loading, so the lower half is the ground.
        let (w, h) = (32, 16);
        let texels: Vec<[f32; 4]> = (0..h)
            .flat_map(|y| {
                let texel = if y < h / 2 {
                    [0.0, 0.0, 1.0, 1.0]
                } else {
                    [1.0, 0.0, 0.0, 1.0]
                };
                (0..w).map(move |_| texel)
            })
            .collect();
        let panorama = ctx
            .create_texture(&TextureDescriptor::new_2d(w, h, TextureFormat::Rgba16Float))
            .unwrap();
        ctx.write_texture(panorama, &texels).unwrap();
        let environment = ctx
            .create_texture(&TextureDescriptor::new_cube(8, TextureFormat::Rgba16Float))
            .unwrap();

        pass.run(&mut ctx, &mut capture, &rig, panorama, environment).unwrap();

        let up = ctx.read_texture(environment, CubeFace::PositiveY.layer(), 0).unwrap();
        let down = ctx.read_texture(environment, CubeFace::NegativeY.layer(), 0).unwrap();
        assert!(up.iter().all(|t| t[0] > 0.99 && t[2] < 0.01));
        assert!(down.iter().all(|t| t[2] > 0.99 && t[0] < 0.01));
    }
}

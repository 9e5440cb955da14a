//! Diffuse irradiance convolution.

use crate::backend::{ProgramHandle, RenderContext, TextureHandle, UniformValue};
use crate::config::MIN_IRRADIANCE_SAMPLE_DELTA;
use crate::error::{IblError, IblResult};
use crate::shader::{ShaderProgram, SAMPLER_ENVIRONMENT_MAP, UNIFORM_SAMPLE_DELTA};

use super::{create_pass_program, CaptureTarget, CubeProjectionRig, BAKE_INPUT_UNIT};

/// Integrates cosine-weighted radiance over the hemisphere of each texel.
#[derive(Debug)]
pub struct IrradiancePass {
    program: ProgramHandle,
    sample_delta: f32,
}

impl IrradiancePass {
    /// `sample_delta` is the azimuth and elevation step in radians.
    pub fn new(ctx: &mut dyn RenderContext, sample_delta: f32) -> IblResult<Self> {
        if sample_delta.is_nan() || sample_delta < MIN_IRRADIANCE_SAMPLE_DELTA {
            return Err(IblError::Config(format!(
                "irradiance sample delta {} is below {}",
                sample_delta, MIN_IRRADIANCE_SAMPLE_DELTA
            )));
        }
        let program = create_pass_program(ctx, &ShaderProgram::irradiance_convolution())?;
        Ok(Self {
            program,
            sample_delta,
        })
    }

    /// Convolve `environment` into mip 0 of `irradiance`.
    pub fn run(
        &self,
        ctx: &mut dyn RenderContext,
        capture: &mut CaptureTarget,
        rig: &CubeProjectionRig,
        environment: TextureHandle,
        irradiance: TextureHandle,
    ) -> IblResult<()> {
        let desc = ctx.texture_info(irradiance)?;

        ctx.use_program(self.program)?;
        ctx.set_uniform(
            SAMPLER_ENVIRONMENT_MAP,
            UniformValue::Int(BAKE_INPUT_UNIT.0 as i32),
        )?;
        ctx.set_uniform(UNIFORM_SAMPLE_DELTA, UniformValue::Float(self.sample_delta))?;
        rig.upload_projection(ctx)?;
        ctx.bind_texture(BAKE_INPUT_UNIT, environment)?;

        capture.bind_for_size(ctx, desc.width, desc.height)?;
        rig.render_faces(ctx, capture, irradiance, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::backend::{CubeFace, TextureDescriptor, TextureFormat};
    use crate::ibl::EquirectToCubemapPass;

    fn constant_cubemap(ctx: &mut SoftwareBackend, value: [f32; 4]) -> TextureHandle {
        let mut capture = CaptureTarget::new(ctx).unwrap();
        let panorama = ctx
            .create_texture(&TextureDescriptor::new_2d(8, 4, TextureFormat::Rgba16Float))
            .unwrap();
        ctx.write_texture(panorama, &[value; 32]).unwrap();
        let environment = ctx
            .create_texture(
                &TextureDescriptor::new_cube(8, TextureFormat::Rgba16Float).with_full_mip_chain(),
            )
            .unwrap();
        let pass = EquirectToCubemapPass::new(ctx).unwrap();
        pass.run(ctx, &mut capture, &CubeProjectionRig::new(), panorama, environment)
            .unwrap();
        environment
    }

    #[test]
    fn test_sample_delta_below_minimum_rejected() {
        let mut ctx = SoftwareBackend::new();
        for delta in [1e-9, 0.0, f32::NAN] {
            let err = IrradiancePass::new(&mut ctx, delta).unwrap_err();
            assert!(matches!(err, IblError::Config(_)), "{delta}: {err:?}");
        }
        assert!(IrradiancePass::new(&mut ctx, MIN_IRRADIANCE_SAMPLE_DELTA).is_ok());
    }

    #[test]
    fn test_uniform_environment_is_preserved() {
        let mut ctx = SoftwareBackend::new();
        ctx.enable_seamless_cubemap();
        let environment = constant_cubemap(&mut ctx, [3.0, 1.5, 0.25, 1.0]);

        let mut capture = CaptureTarget::new(&mut ctx).unwrap();
        let irradiance = ctx
            .create_texture(&TextureDescriptor::new_cube(4, TextureFormat::Rgba16Float))
            .unwrap();
        let pass = IrradiancePass::new(&mut ctx, 0.1).unwrap();
        pass.run(&mut ctx, &mut capture, &CubeProjectionRig::new(), environment, irradiance)
            .unwrap();

        for face in CubeFace::ALL {
            for texel in ctx.read_texture(irradiance, face.layer(), 0).unwrap() {
                assert!((texel[0] - 3.0).abs() < 0.01, "{face:?}: {texel:?}");
                assert!((texel[1] - 1.5).abs() < 0.01);
                assert!((texel[2] - 0.25).abs() < 0.01);
            }
        }
    }

    #[test]
    fn test_half_lit_environment_is_smooth() {
        let mut ctx = SoftwareBackend::new();
        ctx.enable_seamless_cubemap();
        let mut capture = CaptureTarget::new(&mut ctx).unwrap();
        let rig = CubeProjectionRig::new();

        // Sky at radiance 1, ground black.
        let texels: Vec<[f32; 4]> = (0..8)
            .flat_map(|y| {
                let value = if y < 4 { 0.0 } else { 1.0 };
                std::iter::repeat([value, value, value, 1.0]).take(16)
            })
            .collect();
        let panorama = ctx
            .create_texture(&TextureDescriptor::new_2d(16, 8, TextureFormat::Rgba16Float))
            .unwrap();
        ctx.write_texture(panorama, &texels).unwrap();
        let environment = ctx
            .create_texture(
                &TextureDescriptor::new_cube(8, TextureFormat::Rgba16Float).with_full_mip_chain(),
            )
            .unwrap();
        EquirectToCubemapPass::new(&mut ctx)
            .unwrap()
            .run(&mut ctx, &mut capture, &rig, panorama, environment)
            .unwrap();

        let irradiance = ctx
            .create_texture(&TextureDescriptor::new_cube(4, TextureFormat::Rgba16Float))
            .unwrap();
        IrradiancePass::new(&mut ctx, 0.1)
            .unwrap()
            .run(&mut ctx, &mut capture, &rig, environment, irradiance)
            .unwrap();

        let up = ctx.read_texture(irradiance, CubeFace::PositiveY.layer(), 0).unwrap();
        let down = ctx.read_texture(irradiance, CubeFace::NegativeY.layer(), 0).unwrap();
        let side = ctx.read_texture(irradiance, CubeFace::PositiveX.layer(), 0).unwrap();
        let mean = |texels: &[[f32; 4]]| {
            texels.iter().map(|t| t[0]).sum::<f32>() / texels.len() as f32
        };
        assert!(mean(&up) > 0.8);
        assert!(mean(&down) < 0.2);
        // Horizontal normals see half the sky.
        assert!((mean(&side) - 0.5).abs() < 0.1);
    }
}

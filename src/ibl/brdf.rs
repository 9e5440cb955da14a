//! Split-sum BRDF lookup texture.

use crate::backend::{AttachmentTarget, ProgramHandle, RenderContext, TextureHandle, UniformValue};
use crate::error::IblResult;
use crate::shader::{ShaderProgram, UNIFORM_SAMPLE_COUNT};

use super::{create_pass_program, CaptureTarget};

/// Integrates the specular BRDF over (NdotV, roughness) with one quad draw.
///
/// Independent of the environment, so one LUT serves every HDR source.
#[derive(Debug)]
pub struct BrdfLutPass {
    program: ProgramHandle,
    sample_count: u32,
}

impl BrdfLutPass {
    pub fn new(ctx: &mut dyn RenderContext, sample_count: u32) -> IblResult<Self> {
        let program = create_pass_program(ctx, &ShaderProgram::brdf_integration())?;
        Ok(Self {
            program,
            sample_count,
        })
    }

    /// Render into mip 0 of the 2D `lut`. Column is NdotV, row is roughness.
    pub fn run(
        &self,
        ctx: &mut dyn RenderContext,
        capture: &mut CaptureTarget,
        lut: TextureHandle,
    ) -> IblResult<()> {
        let desc = ctx.texture_info(lut)?;
        let sample_count = i32::try_from(self.sample_count).unwrap_or(i32::MAX);

        capture.bind_for_size(ctx, desc.width, desc.height)?;
        capture.attach_color(ctx, AttachmentTarget::Texture2d { texture: lut, mip: 0 })?;
        ctx.use_program(self.program)?;
        ctx.set_uniform(UNIFORM_SAMPLE_COUNT, UniformValue::Int(sample_count))?;
        capture.clear(ctx)?;
        ctx.draw_unit_quad()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::backend::{TextureDescriptor, TextureFormat};

    fn bake_lut(size: u32, samples: u32) -> Vec<[f32; 4]> {
        let mut ctx = SoftwareBackend::new();
        let mut capture = CaptureTarget::new(&mut ctx).unwrap();
        let lut = ctx
            .create_texture(&TextureDescriptor::new_2d(size, size, TextureFormat::Rg16Float))
            .unwrap();
        BrdfLutPass::new(&mut ctx, samples)
            .unwrap()
            .run(&mut ctx, &mut capture, lut)
            .unwrap();
        ctx.read_texture(lut, 0, 0).unwrap()
    }

    #[test]
    fn test_lut_is_bounded() {
        let texels = bake_lut(16, 64);
        assert_eq!(texels.len(), 256);
        for texel in &texels {
            assert!((0.0..=1.0).contains(&texel[0]), "{texel:?}");
            assert!((0.0..=1.0).contains(&texel[1]), "{texel:?}");
            assert!(texel[0] + texel[1] <= 1.0 + 1e-2);
        }
    }

    #[test]
    fn test_lut_layout() {
        let size = 16;
        let texels = bake_lut(size, 128);
        let at = |x: u32, y: u32| texels[(y * size + x) as usize];

        // Smooth surface seen head-on reflects nearly everything through scale.
        let smooth_head_on = at(size - 1, 0);
        assert!(smooth_head_on[0] > 0.9, "{smooth_head_on:?}");
        assert!(smooth_head_on[1] < 0.05);

        // Rough grazing angles lose energy.
        let rough_grazing = at(0, size - 1);
        assert!(rough_grazing[0] + rough_grazing[1] < smooth_head_on[0] + smooth_head_on[1]);
    }
}

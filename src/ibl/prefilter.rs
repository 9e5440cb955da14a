//! Specular pre-filter pass, one roughness per mip level.

use crate::backend::{ProgramHandle, RenderContext, TextureHandle, UniformValue};
use crate::error::{IblError, IblResult};
use crate::shader::{
    ShaderProgram, SAMPLER_ENVIRONMENT_MAP, UNIFORM_RESOLUTION, UNIFORM_ROUGHNESS,
    UNIFORM_SAMPLE_COUNT,
};

use super::{create_pass_program, CaptureTarget, CubeProjectionRig, BAKE_INPUT_UNIT};

/// Roughness baked into `mip` of a chain with `levels` levels.
pub fn roughness_for_mip(mip: u32, levels: u32) -> f32 {
    if levels < 2 {
        return 0.0;
    }
    mip as f32 / (levels - 1) as f32
}

/// Fractional mip the shading pass samples for `roughness`.
///
/// Exact inverse of [`roughness_for_mip`].
pub fn mip_for_roughness(roughness: f32, levels: u32) -> f32 {
    roughness.clamp(0.0, 1.0) * levels.saturating_sub(1) as f32
}

/// Face size of `mip` for a chain starting at `base`.
pub fn prefilter_mip_size(base: u32, mip: u32) -> u32 {
    base.checked_shr(mip).unwrap_or(0).max(1)
}

/// GGX importance-sampled convolution of the environment.
#[derive(Debug)]
pub struct PrefilterPass {
    program: ProgramHandle,
    sample_count: u32,
}

impl PrefilterPass {
    pub fn new(ctx: &mut dyn RenderContext, sample_count: u32) -> IblResult<Self> {
        let program = create_pass_program(ctx, &ShaderProgram::prefilter())?;
        Ok(Self {
            program,
            sample_count,
        })
    }

    /// Fill `levels` mips of `prefilter` from the mip-mapped `environment`.
    ///
    /// `levels` must match the mip count allocated on `prefilter`.
    pub fn run(
        &self,
        ctx: &mut dyn RenderContext,
        capture: &mut CaptureTarget,
        rig: &CubeProjectionRig,
        environment: TextureHandle,
        prefilter: TextureHandle,
        levels: u32,
    ) -> IblResult<()> {
        let desc = ctx.texture_info(prefilter)?;
        if desc.mip_levels != levels {
            return Err(IblError::MipLevelMismatch {
                allocated: desc.mip_levels,
                requested: levels,
            });
        }
        let source = ctx.texture_info(environment)?;
        let sample_count = i32::try_from(self.sample_count).unwrap_or(i32::MAX);

        ctx.use_program(self.program)?;
        ctx.set_uniform(
            SAMPLER_ENVIRONMENT_MAP,
            UniformValue::Int(BAKE_INPUT_UNIT.0 as i32),
        )?;
        ctx.set_uniform(UNIFORM_SAMPLE_COUNT, UniformValue::Int(sample_count))?;
        ctx.set_uniform(UNIFORM_RESOLUTION, UniformValue::Float(source.width as f32))?;
        rig.upload_projection(ctx)?;
        ctx.bind_texture(BAKE_INPUT_UNIT, environment)?;

        for mip in 0..levels {
            let size = prefilter_mip_size(desc.width, mip);
            capture.bind_for_size(ctx, size, size)?;

            let roughness = roughness_for_mip(mip, levels);
            ctx.set_uniform(UNIFORM_ROUGHNESS, UniformValue::Float(roughness))?;
            log::debug!(
                "Pre-filter mip {} ({}x{}, roughness {:.2})",
                mip,
                size,
                size,
                roughness
            );
            rig.render_faces(ctx, capture, prefilter, mip)?;
        }
        Ok(())
    }
}

//! Offscreen image-based lighting bake.
//!
//! Every pass renders through one shared [`CaptureTarget`] with the camera
//! rig from [`CubeProjectionRig`]. [`IblResourceSet::bake`] runs the passes
//! in order for each HDR source and then bakes the shared BRDF lookup
//! texture once.

mod brdf;
mod capture;
mod equirect;
mod irradiance;
mod prefilter;
mod projection;
mod resource_set;

pub use brdf::BrdfLutPass;
pub use capture::CaptureTarget;
pub use equirect::EquirectToCubemapPass;
pub use irradiance::IrradiancePass;
pub use prefilter::{mip_for_roughness, prefilter_mip_size, roughness_for_mip, PrefilterPass};
pub use projection::CubeProjectionRig;
pub use resource_set::{IblMaps, IblResourceSet};

use crate::backend::TextureUnit;

/// Unit the material shader samples the irradiance cubemap from
pub const IRRADIANCE_UNIT: TextureUnit = TextureUnit(0);
/// Unit the material shader samples the pre-filtered cubemap from
pub const PREFILTER_UNIT: TextureUnit = TextureUnit(1);
/// Unit the material shader samples the BRDF lookup texture from
pub const BRDF_LUT_UNIT: TextureUnit = TextureUnit(2);
/// Unit the skybox pass samples the environment cubemap from
pub const SKYBOX_ENVIRONMENT_UNIT: TextureUnit = TextureUnit(3);
/// Unit every bake pass reads its input texture from
pub const BAKE_INPUT_UNIT: TextureUnit = TextureUnit(0);

/// Clear color used before every capture draw.
pub(crate) const CAPTURE_CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Compile a pass program, logging which shader failed.
pub(crate) fn create_pass_program(
    ctx: &mut dyn crate::backend::RenderContext,
    program: &crate::shader::ShaderProgram,
) -> crate::error::IblResult<crate::backend::ProgramHandle> {
    let handle = ctx.create_program(program).map_err(|e| {
        log::error!("Failed to build '{}' program: {}", program.label, e);
        e
    })?;
    log::trace!("Created program '{}' ({:?})", program.label, handle);
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::backend::BackendError;
    use crate::error::IblError;
    use crate::shader::{ProgramKind, ShaderProgram};

    #[test]
    fn test_broken_program_names_the_pass() {
        let mut ctx = SoftwareBackend::new();
        let broken = ShaderProgram::from_modules(
            "broken_prefilter",
            ProgramKind::Prefilter,
            &["@fragment fn fs_main() -> @location(0) vec4<f32> { return undefined_value; }"],
        );
        match create_pass_program(&mut ctx, &broken) {
            Err(IblError::Backend(BackendError::ShaderCreationFailed { label, message })) => {
                assert_eq!(label, "broken_prefilter");
                assert!(!message.is_empty());
            }
            other => panic!("expected ShaderCreationFailed, got {other:?}"),
        }
        assert!(create_pass_program(&mut ctx, &ShaderProgram::prefilter()).is_ok());
    }
}

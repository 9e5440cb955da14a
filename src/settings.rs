//! Runtime IBL toggles shared by the UI and the shading pass.

use bytemuck::{Pod, Zeroable};

use crate::backend::RenderContext;
use crate::error::{IblError, IblResult};
use crate::ibl::{mip_for_roughness, IblResourceSet};

/// Uniform block consumed by the material shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct IblShadingUniforms {
    /// 1 when the IBL terms are added, 0 otherwise
    pub ibl_enabled: u32,
    pub intensity: f32,
    /// Mip sampled for roughness 1.0
    pub max_reflection_lod: f32,
    pub _pad: f32,
}

/// User-facing IBL settings.
#[derive(Debug, Clone, PartialEq)]
pub struct IblSettings {
    pub ibl_visible: bool,
    pub skybox_visible: bool,
    intensity: f32,
    hdr_image_index: usize,
}

impl Default for IblSettings {
    fn default() -> Self {
        Self {
            ibl_visible: true,
            skybox_visible: true,
            intensity: 1.0,
            hdr_image_index: 0,
        }
    }
}

impl IblSettings {
    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    /// Set the IBL intensity, clamped to `[0, 1]`.
    pub fn set_intensity(&mut self, intensity: f32) {
        self.intensity = if intensity.is_nan() {
            0.0
        } else {
            intensity.clamp(0.0, 1.0)
        };
    }

    pub fn hdr_image_index(&self) -> usize {
        self.hdr_image_index
    }

    /// Select an HDR source, rejecting indices outside `0..source_count`.
    pub fn select_hdr_image(&mut self, index: usize, source_count: usize) -> IblResult<()> {
        if index >= source_count {
            return Err(IblError::IndexOutOfRange {
                what: "HDR source",
                index,
                len: source_count,
            });
        }
        self.hdr_image_index = index;
        Ok(())
    }

    /// Bind the selected maps for the shading and skybox passes.
    pub fn apply(&self, set: &IblResourceSet, ctx: &mut dyn RenderContext) -> IblResult<()> {
        set.use_set(ctx, self.hdr_image_index)?;
        if self.skybox_visible {
            set.use_environment(ctx, self.hdr_image_index)?;
        }
        Ok(())
    }

    pub fn shading_uniforms(&self, set: &IblResourceSet) -> IblShadingUniforms {
        IblShadingUniforms {
            ibl_enabled: u32::from(self.ibl_visible),
            intensity: self.intensity,
            max_reflection_lod: mip_for_roughness(1.0, set.prefilter_mip_levels()),
            _pad: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = IblSettings::default();
        assert!(settings.ibl_visible);
        assert!(settings.skybox_visible);
        assert_eq!(settings.intensity(), 1.0);
        assert_eq!(settings.hdr_image_index(), 0);
    }

    #[test]
    fn test_intensity_is_clamped() {
        let mut settings = IblSettings::default();
        settings.set_intensity(1.5);
        assert_eq!(settings.intensity(), 1.0);
        settings.set_intensity(-0.2);
        assert_eq!(settings.intensity(), 0.0);
        settings.set_intensity(0.35);
        assert_eq!(settings.intensity(), 0.35);
        settings.set_intensity(f32::NAN);
        assert_eq!(settings.intensity(), 0.0);
    }

    #[test]
    fn test_select_rejects_out_of_range() {
        let mut settings = IblSettings::default();
        assert!(settings.select_hdr_image(1, 2).is_ok());
        assert_eq!(settings.hdr_image_index(), 1);
        assert!(matches!(
            settings.select_hdr_image(2, 2),
            Err(IblError::IndexOutOfRange { index: 2, len: 2, .. })
        ));
        assert_eq!(settings.hdr_image_index(), 1);
    }

    #[test]
    fn test_uniform_block_layout() {
        assert_eq!(std::mem::size_of::<IblShadingUniforms>(), 16);
        let block = IblShadingUniforms {
            ibl_enabled: 1,
            intensity: 0.5,
            max_reflection_lod: 4.0,
            _pad: 0.0,
        };
        let bytes: &[u8] = bytemuck::bytes_of(&block);
        assert_eq!(&bytes[0..4], &1u32.to_ne_bytes());
    }
}

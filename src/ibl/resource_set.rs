//! Per-source IBL maps and the bake orchestrator.

use crate::backend::{
    CompareFunction, RenderContext, TextureDescriptor, TextureFormat, TextureHandle,
};
use crate::config::{BakeConfig, HdrSource};
use crate::error::{IblError, IblResult};
use crate::hdr::HdrImage;

use super::{
    BrdfLutPass, CaptureTarget, CubeProjectionRig, EquirectToCubemapPass, IrradiancePass,
    PrefilterPass, BRDF_LUT_UNIT, IRRADIANCE_UNIT, PREFILTER_UNIT, SKYBOX_ENVIRONMENT_UNIT,
};

const MAP_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
const LUT_FORMAT: TextureFormat = TextureFormat::Rg16Float;

/// The three cubemaps baked from one HDR source.
///
/// Stored together so a selection always binds maps of the same source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IblMaps {
    pub label: String,
    pub environment: TextureHandle,
    pub irradiance: TextureHandle,
    pub prefilter: TextureHandle,
}

/// Baked environment, irradiance and pre-filtered cubemaps for every HDR
/// source plus the shared BRDF lookup texture.
#[derive(Debug)]
pub struct IblResourceSet {
    maps: Vec<IblMaps>,
    brdf_lut: TextureHandle,
    prefilter_mip_levels: u32,
}

impl IblResourceSet {
    /// Load every source in `config` and bake its maps, then the BRDF LUT.
    ///
    /// Any failure aborts the whole bake. Textures created before the
    /// failure are destroyed and the default framebuffer is bound again.
    pub fn bake(ctx: &mut dyn RenderContext, config: &BakeConfig) -> IblResult<Self> {
        if config.sources.is_empty() {
            return Err(IblError::NoSources);
        }
        let mut baker = SetBaker::new(ctx, config)?;
        let baked = baker.bake_sources(ctx, &config.sources);
        baker.finish(ctx, baked)
    }

    /// Bake already decoded panoramas. Size and sample settings come from
    /// `config`; its source list is ignored.
    pub fn bake_images(
        ctx: &mut dyn RenderContext,
        config: &BakeConfig,
        images: &[(&str, &HdrImage)],
    ) -> IblResult<Self> {
        if images.is_empty() {
            return Err(IblError::NoSources);
        }
        let mut baker = SetBaker::new(ctx, config)?;
        let baked = images
            .iter()
            .try_for_each(|(label, image)| baker.bake_source(ctx, label, image));
        baker.finish(ctx, baked)
    }

    /// Bind irradiance, pre-filter and BRDF LUT for source `index`.
    pub fn use_set(&self, ctx: &mut dyn RenderContext, index: usize) -> IblResult<()> {
        let maps = self.maps(index)?;
        ctx.bind_texture(IRRADIANCE_UNIT, maps.irradiance)?;
        ctx.bind_texture(PREFILTER_UNIT, maps.prefilter)?;
        ctx.bind_texture(BRDF_LUT_UNIT, self.brdf_lut)?;
        Ok(())
    }

    /// Bind the environment cubemap of source `index` for the skybox.
    pub fn use_environment(&self, ctx: &mut dyn RenderContext, index: usize) -> IblResult<()> {
        let maps = self.maps(index)?;
        ctx.bind_texture(SKYBOX_ENVIRONMENT_UNIT, maps.environment)?;
        Ok(())
    }

    /// Maps of source `index`.
    pub fn maps(&self, index: usize) -> IblResult<&IblMaps> {
        self.maps.get(index).ok_or(IblError::IndexOutOfRange {
            what: "HDR source",
            index,
            len: self.maps.len(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &IblMaps> {
        self.maps.iter()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.maps.iter().map(|maps| maps.label.as_str())
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn brdf_lut(&self) -> TextureHandle {
        self.brdf_lut
    }

    pub fn prefilter_mip_levels(&self) -> u32 {
        self.prefilter_mip_levels
    }

    /// Release every texture owned by the set.
    pub fn destroy(self, ctx: &mut dyn RenderContext) {
        for maps in self.maps {
            ctx.destroy_texture(maps.environment);
            ctx.destroy_texture(maps.irradiance);
            ctx.destroy_texture(maps.prefilter);
        }
        ctx.destroy_texture(self.brdf_lut);
    }
}

/// Shared state of one bake: capture target, camera rig and pass programs.
struct SetBaker<'a> {
    config: &'a BakeConfig,
    capture: CaptureTarget,
    rig: CubeProjectionRig,
    equirect: EquirectToCubemapPass,
    irradiance: IrradiancePass,
    prefilter: PrefilterPass,
    maps: Vec<IblMaps>,
    /// Textures created for a source or the LUT that is not finished yet
    pending: Vec<TextureHandle>,
}

impl<'a> SetBaker<'a> {
    fn new(ctx: &mut dyn RenderContext, config: &'a BakeConfig) -> IblResult<Self> {
        config.validate()?;
        log::info!("Starting IBL bake on {} backend", ctx.backend_name());

        ctx.enable_seamless_cubemap();
        ctx.set_depth_func(CompareFunction::LessEqual);

        let mut capture = CaptureTarget::new(ctx)?;
        let passes = EquirectToCubemapPass::new(ctx).and_then(|equirect| {
            let irradiance = IrradiancePass::new(ctx, config.irradiance_sample_delta)?;
            let prefilter = PrefilterPass::new(ctx, config.prefilter_sample_count)?;
            Ok((equirect, irradiance, prefilter))
        });
        let (equirect, irradiance, prefilter) = match passes {
            Ok(passes) => passes,
            Err(err) => {
                if let Err(release_err) = capture.release(ctx) {
                    log::warn!("Failed to release capture target: {}", release_err);
                }
                return Err(err);
            }
        };
        Ok(Self {
            config,
            capture,
            rig: CubeProjectionRig::new(),
            equirect,
            irradiance,
            prefilter,
            maps: Vec::new(),
            pending: Vec::new(),
        })
    }

    fn create_map(
        &mut self,
        ctx: &mut dyn RenderContext,
        desc: TextureDescriptor,
    ) -> IblResult<TextureHandle> {
        let texture = ctx.create_texture(&desc)?;
        self.pending.push(texture);
        log::trace!(
            "Created {} ({}x{}, {} mips)",
            desc.label.as_deref().unwrap_or("texture"),
            desc.width,
            desc.height,
            desc.mip_levels
        );
        Ok(texture)
    }

    /// Load and bake each source in turn, stopping at the first failure.
    fn bake_sources(
        &mut self,
        ctx: &mut dyn RenderContext,
        sources: &[HdrSource],
    ) -> IblResult<()> {
        for source in sources {
            let image = HdrImage::load(&source.path)?;
            self.bake_source(ctx, &source.label, &image)?;
        }
        Ok(())
    }

    /// Run equirect, irradiance and pre-filter passes for one panorama.
    fn bake_source(
        &mut self,
        ctx: &mut dyn RenderContext,
        label: &str,
        image: &HdrImage,
    ) -> IblResult<()> {
        let index = self.maps.len();
        log::info!("Baking IBL set {} ({})", index, label);
        let config = self.config;

        let panorama = image.upload(ctx, &format!("{label} panorama"))?;
        self.pending.push(panorama);

        let environment = self.create_map(
            ctx,
            TextureDescriptor::new_cube(config.environment_size, MAP_FORMAT)
                .with_full_mip_chain()
                .with_label(format!("{label} environment")),
        )?;
        log::info!("  equirectangular to cubemap ({0}x{0})", config.environment_size);
        self.equirect
            .run(ctx, &mut self.capture, &self.rig, panorama, environment)?;
        ctx.destroy_texture(panorama);
        self.pending.retain(|texture| *texture != panorama);

        let irradiance = self.create_map(
            ctx,
            TextureDescriptor::new_cube(config.irradiance_size, MAP_FORMAT)
                .with_label(format!("{label} irradiance")),
        )?;
        log::info!("  irradiance convolution ({0}x{0})", config.irradiance_size);
        self.irradiance
            .run(ctx, &mut self.capture, &self.rig, environment, irradiance)?;

        let prefilter = self.create_map(
            ctx,
            TextureDescriptor::new_cube(config.prefilter_size, MAP_FORMAT)
                .with_mip_levels(config.prefilter_mip_levels)
                .with_label(format!("{label} prefilter")),
        )?;
        log::info!(
            "  specular pre-filter ({0}x{0}, {1} levels)",
            config.prefilter_size,
            config.prefilter_mip_levels
        );
        self.prefilter.run(
            ctx,
            &mut self.capture,
            &self.rig,
            environment,
            prefilter,
            config.prefilter_mip_levels,
        )?;

        self.maps.push(IblMaps {
            label: label.to_string(),
            environment,
            irradiance,
            prefilter,
        });
        self.pending.clear();
        Ok(())
    }

    fn bake_brdf_lut(&mut self, ctx: &mut dyn RenderContext) -> IblResult<TextureHandle> {
        let size = self.config.brdf_lut_size;
        let brdf_lut = self.create_map(
            ctx,
            TextureDescriptor::new_2d(size, size, LUT_FORMAT).with_label("brdf_lut"),
        )?;
        log::info!("Baking BRDF LUT ({0}x{0})", size);
        BrdfLutPass::new(ctx, self.config.brdf_sample_count)?.run(
            ctx,
            &mut self.capture,
            brdf_lut,
        )?;
        self.pending.clear();
        Ok(brdf_lut)
    }

    /// Bake the shared BRDF LUT after the sources and release the capture
    /// target. On any failure every texture of the bake is destroyed.
    fn finish(
        mut self,
        ctx: &mut dyn RenderContext,
        baked: IblResult<()>,
    ) -> IblResult<IblResourceSet> {
        let brdf_lut = match baked.and_then(|()| self.bake_brdf_lut(ctx)) {
            Ok(brdf_lut) => brdf_lut,
            Err(err) => {
                self.abort(ctx);
                return Err(err);
            }
        };

        if let Err(err) = self.capture.release(ctx) {
            ctx.destroy_texture(brdf_lut);
            self.abort(ctx);
            return Err(err);
        }
        log::info!("IBL bake finished: {} source(s)", self.maps.len());
        Ok(IblResourceSet {
            maps: self.maps,
            brdf_lut,
            prefilter_mip_levels: self.config.prefilter_mip_levels,
        })
    }

    fn abort(mut self, ctx: &mut dyn RenderContext) {
        let mut destroyed = self.pending.len();
        for texture in self.pending.drain(..) {
            ctx.destroy_texture(texture);
        }
        for maps in self.maps.drain(..) {
            ctx.destroy_texture(maps.environment);
            ctx.destroy_texture(maps.irradiance);
            ctx.destroy_texture(maps.prefilter);
            destroyed += 3;
        }
        if let Err(err) = self.capture.release(ctx) {
            log::warn!("Failed to release capture target: {}", err);
        }
        log::error!("IBL bake aborted, destroyed {} texture(s)", destroyed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::faulty::{FaultyBackend, Faults};
    use crate::backend::software::SoftwareBackend;
    use crate::backend::BackendError;
    use image::codecs::hdr::HdrEncoder;
    use image::Rgb;

    fn small_config() -> BakeConfig {
        BakeConfig {
            environment_size: 8,
            irradiance_size: 2,
            prefilter_size: 8,
            prefilter_mip_levels: 3,
            brdf_lut_size: 4,
            irradiance_sample_delta: 0.3,
            prefilter_sample_count: 8,
            brdf_sample_count: 8,
            sources: Vec::new(),
        }
    }

    fn constant_image(value: f32) -> HdrImage {
        HdrImage {
            width: 8,
            height: 4,
            texels: vec![[value, value, value, 1.0]; 32],
        }
    }

    fn write_constant_hdr(path: &std::path::Path) {
        let file = std::fs::File::create(path).unwrap();
        HdrEncoder::new(file)
            .encode(&[Rgb([1.0f32; 3]); 32], 8, 4)
            .unwrap();
    }

    fn failing_program(label: &'static str) -> FaultyBackend {
        FaultyBackend::new(Faults {
            program: Some(label),
            ..Default::default()
        })
    }

    #[test]
    fn test_failed_source_destroys_earlier_maps() {
        let dir = std::env::temp_dir().join("pbr_ibl_resource_set_failed_source");
        std::fs::create_dir_all(&dir).unwrap();
        let present = dir.join("present.hdr");
        write_constant_hdr(&present);
        let missing = dir.join("missing.hdr");
        let config = small_config().with_sources(vec![
            HdrSource::from_path(&present),
            HdrSource::from_path(&missing),
        ]);

        let mut ctx = SoftwareBackend::new();
        match IblResourceSet::bake(&mut ctx, &config) {
            Err(IblError::HdrLoad { path, .. }) => assert_eq!(path, missing),
            other => panic!("expected HdrLoad, got {other:?}"),
        }
        assert_eq!(ctx.texture_count(), 0);
        assert!(ctx.clear([0.0; 4]).is_err());
    }

    #[test]
    fn test_capture_target_failure_aborts_bake() {
        let mut ctx = FaultyBackend::new(Faults {
            framebuffer: true,
            ..Default::default()
        });
        let image = constant_image(1.0);
        let err = IblResourceSet::bake_images(&mut ctx, &small_config(), &[("a", &image)])
            .unwrap_err();
        assert!(matches!(
            err,
            IblError::Backend(BackendError::FramebufferCreationFailed(_))
        ));
        assert_eq!(ctx.inner.texture_count(), 0);
    }

    #[test]
    fn test_pass_program_failure_aborts_bake() {
        let mut ctx = failing_program("prefilter");
        let image = constant_image(1.0);
        match IblResourceSet::bake_images(&mut ctx, &small_config(), &[("a", &image)]) {
            Err(IblError::Backend(BackendError::ShaderCreationFailed { label, .. })) => {
                assert_eq!(label, "prefilter")
            }
            other => panic!("expected ShaderCreationFailed, got {other:?}"),
        }
        assert_eq!(ctx.inner.texture_count(), 0);
        assert!(ctx.clear([0.0; 4]).is_err());
    }

    #[test]
    fn test_brdf_failure_destroys_baked_maps() {
        let mut ctx = failing_program("brdf_integration");
        let a = constant_image(1.0);
        let b = constant_image(2.0);
        match IblResourceSet::bake_images(&mut ctx, &small_config(), &[("a", &a), ("b", &b)]) {
            Err(IblError::Backend(BackendError::ShaderCreationFailed { label, .. })) => {
                assert_eq!(label, "brdf_integration")
            }
            other => panic!("expected ShaderCreationFailed, got {other:?}"),
        }
        assert_eq!(ctx.inner.texture_count(), 0);
        assert!(ctx.clear([0.0; 4]).is_err());
    }

    #[test]
    fn test_bake_without_sources_fails() {
        let mut ctx = SoftwareBackend::new();
        let err = IblResourceSet::bake(&mut ctx, &small_config()).unwrap_err();
        assert!(matches!(err, IblError::NoSources));
        let err = IblResourceSet::bake_images(&mut ctx, &small_config(), &[]).unwrap_err();
        assert!(matches!(err, IblError::NoSources));
    }

    #[test]
    fn test_bake_sets_global_state_and_releases_target() {
        let mut ctx = SoftwareBackend::new();
        let image = constant_image(1.0);
        let set = IblResourceSet::bake_images(&mut ctx, &small_config(), &[("a", &image)]).unwrap();
        assert!(ctx.seamless_cubemap());
        assert_eq!(ctx.depth_func(), CompareFunction::LessEqual);
        assert_eq!(set.len(), 1);
        assert_eq!(set.prefilter_mip_levels(), 3);
        // The default framebuffer is bound again.
        assert!(ctx.clear([0.0; 4]).is_err());
    }

    #[test]
    fn test_allocations_follow_config() {
        let mut ctx = SoftwareBackend::new();
        let image = constant_image(1.0);
        let set = IblResourceSet::bake_images(&mut ctx, &small_config(), &[("a", &image)]).unwrap();
        let maps = set.maps(0).unwrap();

        let environment = ctx.texture_info(maps.environment).unwrap();
        assert_eq!((environment.width, environment.mip_levels), (8, 4));
        let irradiance = ctx.texture_info(maps.irradiance).unwrap();
        assert_eq!((irradiance.width, irradiance.mip_levels), (2, 1));
        let prefilter = ctx.texture_info(maps.prefilter).unwrap();
        assert_eq!((prefilter.width, prefilter.mip_levels), (8, 3));
        let lut = ctx.texture_info(set.brdf_lut()).unwrap();
        assert_eq!((lut.width, lut.format), (4, TextureFormat::Rg16Float));
    }

    #[test]
    fn test_index_out_of_range_binds_nothing() {
        let mut ctx = SoftwareBackend::new();
        let image = constant_image(1.0);
        let set = IblResourceSet::bake_images(&mut ctx, &small_config(), &[("a", &image)]).unwrap();
        let before = [
            ctx.bound_texture(IRRADIANCE_UNIT),
            ctx.bound_texture(PREFILTER_UNIT),
            ctx.bound_texture(SKYBOX_ENVIRONMENT_UNIT),
        ];

        let err = set.use_set(&mut ctx, 1).unwrap_err();
        assert!(matches!(
            err,
            IblError::IndexOutOfRange { index: 1, len: 1, .. }
        ));
        assert!(set.use_environment(&mut ctx, usize::MAX).is_err());

        let after = [
            ctx.bound_texture(IRRADIANCE_UNIT),
            ctx.bound_texture(PREFILTER_UNIT),
            ctx.bound_texture(SKYBOX_ENVIRONMENT_UNIT),
        ];
        assert_eq!(before, after);
    }

    #[test]
    fn test_destroy_releases_textures() {
        let mut ctx = SoftwareBackend::new();
        let image = constant_image(1.0);
        let set = IblResourceSet::bake_images(&mut ctx, &small_config(), &[("a", &image)]).unwrap();
        let maps = set.maps(0).unwrap().clone();
        let lut = set.brdf_lut();
        set.destroy(&mut ctx);
        assert!(ctx.texture_info(maps.environment).is_err());
        assert!(ctx.texture_info(lut).is_err());
    }
}

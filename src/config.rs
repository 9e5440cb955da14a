//! Bake configuration loaded from TOML.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{IblError, IblResult};

/// One loadable equirectangular panorama.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HdrSource {
    pub label: String,
    pub path: PathBuf,
}

impl HdrSource {
    pub fn new(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
        }
    }

    /// Source labelled after its file stem.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let label = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { label, path }
    }
}

/// Smallest accepted irradiance sweep step, in radians.
///
/// Finer steps grow the per-texel sample grid quadratically.
pub const MIN_IRRADIANCE_SAMPLE_DELTA: f32 = 1e-3;

fn default_sources() -> Vec<HdrSource> {
    vec![HdrSource::new(
        "Newport Loft",
        "resources/textures/hdr/newport_loft.hdr",
    )]
}

/// Resolutions, sample counts and sources for one bake.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BakeConfig {
    /// Face size of each environment cubemap
    pub environment_size: u32,
    /// Face size of each irradiance cubemap
    pub irradiance_size: u32,
    /// Base face size of each pre-filtered cubemap
    pub prefilter_size: u32,
    /// Number of roughness levels in the pre-filtered cubemap
    pub prefilter_mip_levels: u32,
    /// Width and height of the BRDF lookup texture
    pub brdf_lut_size: u32,
    /// Angular step of the irradiance hemisphere sweep, in radians
    pub irradiance_sample_delta: f32,
    pub prefilter_sample_count: u32,
    pub brdf_sample_count: u32,
    #[serde(rename = "source")]
    pub sources: Vec<HdrSource>,
}

impl Default for BakeConfig {
    fn default() -> Self {
        Self {
            environment_size: 512,
            irradiance_size: 32,
            prefilter_size: 128,
            prefilter_mip_levels: 5,
            brdf_lut_size: 512,
            irradiance_sample_delta: 0.025,
            prefilter_sample_count: 1024,
            brdf_sample_count: 1024,
            sources: default_sources(),
        }
    }
}

impl BakeConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> IblResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> IblResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        log::info!(
            "Loaded bake config {} ({} sources)",
            path.display(),
            config.sources.len()
        );
        Ok(config)
    }

    pub fn with_sources(mut self, sources: Vec<HdrSource>) -> Self {
        self.sources = sources;
        self
    }

    pub fn validate(&self) -> IblResult<()> {
        let sizes = [
            ("environment_size", self.environment_size),
            ("irradiance_size", self.irradiance_size),
            ("prefilter_size", self.prefilter_size),
            ("brdf_lut_size", self.brdf_lut_size),
        ];
        for (name, size) in sizes {
            if size == 0 {
                return Err(IblError::Config(format!("{name} must be non-zero")));
            }
        }
        if self.prefilter_mip_levels < 2 {
            return Err(IblError::Config(format!(
                "prefilter_mip_levels must be at least 2, got {}",
                self.prefilter_mip_levels
            )));
        }
        if self
            .prefilter_size
            .checked_shr(self.prefilter_mip_levels - 1)
            .unwrap_or(0)
            == 0
        {
            return Err(IblError::Config(format!(
                "prefilter_size {} cannot hold {} mip levels",
                self.prefilter_size, self.prefilter_mip_levels
            )));
        }
        if self.irradiance_sample_delta.is_nan()
            || self.irradiance_sample_delta < MIN_IRRADIANCE_SAMPLE_DELTA
        {
            return Err(IblError::Config(format!(
                "irradiance_sample_delta must be at least {}, got {}",
                MIN_IRRADIANCE_SAMPLE_DELTA, self.irradiance_sample_delta
            )));
        }
        if self.prefilter_sample_count == 0 || self.brdf_sample_count == 0 {
            return Err(IblError::Config("sample counts must be non-zero".into()));
        }
        Ok(())
    }
}

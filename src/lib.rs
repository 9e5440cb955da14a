//! PBR IBL - offscreen image-based lighting precomputation
//!
//! Turns equirectangular HDR panoramas into the resources a PBR material
//! shader samples at draw time:
//! - an environment cubemap with a full mip chain (also used by the skybox)
//! - a diffuse irradiance cubemap
//! - a specular pre-filtered cubemap, one roughness per mip level
//! - a split-sum BRDF lookup texture shared by every source
//!
//! Two backends implement [`backend::RenderContext`]:
//! - **Software**: CPU reference rasterizer, always available
//! - **wgpu**: headless GPU backend (feature `wgpu-backend`, on by default)

pub mod backend;
pub mod config;
pub mod error;
pub mod hdr;
pub mod ibl;
pub mod settings;
pub mod shader;
pub mod ui;

pub use backend::software::SoftwareBackend;
#[cfg(feature = "wgpu-backend")]
pub use backend::wgpu_backend::WgpuBackend;
pub use backend::RenderContext;
pub use config::{BakeConfig, HdrSource};
pub use error::{IblError, IblResult};
pub use hdr::HdrImage;
pub use ibl::{IblMaps, IblResourceSet};
pub use settings::{IblSettings, IblShadingUniforms};
pub use ui::IblPanel;

/// Backend selection for a bake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendType {
    /// CPU reference backend
    Software,
    /// Headless wgpu backend
    #[default]
    Wgpu,
}

impl BackendType {
    /// Create a render context of this type.
    pub fn create_context(self) -> IblResult<Box<dyn RenderContext>> {
        match self {
            BackendType::Software => Ok(Box::new(SoftwareBackend::new())),
            #[cfg(feature = "wgpu-backend")]
            BackendType::Wgpu => Ok(Box::new(WgpuBackend::new()?)),
            #[cfg(not(feature = "wgpu-backend"))]
            BackendType::Wgpu => Err(backend::BackendError::InitializationFailed(
                "built without the wgpu-backend feature".into(),
            )
            .into()),
        }
    }
}

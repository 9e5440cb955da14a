//! Capture shader programs.
//!
//! Each program is assembled from WGSL modules under `shaders/`. The wgpu
//! backend compiles the WGSL; the software backend validates it with naga and
//! runs the matching CPU kernel from [`kernels`].

pub mod kernels;

use crate::backend::UniformValue;

const CAPTURE_UNIFORMS_WGSL: &str = include_str!("../../shaders/capture_uniforms.wgsl");
const CUBE_VERTEX_WGSL: &str = include_str!("../../shaders/cube_vertex.wgsl");
const SAMPLING_WGSL: &str = include_str!("../../shaders/sampling.wgsl");
const EQUIRECT_TO_CUBEMAP_WGSL: &str = include_str!("../../shaders/equirect_to_cubemap.wgsl");
const IRRADIANCE_WGSL: &str = include_str!("../../shaders/irradiance_convolution.wgsl");
const PREFILTER_WGSL: &str = include_str!("../../shaders/prefilter.wgsl");
const BRDF_WGSL: &str = include_str!("../../shaders/brdf.wgsl");

pub const UNIFORM_PROJECTION: &str = "projection";
pub const UNIFORM_VIEW: &str = "view";
pub const UNIFORM_ROUGHNESS: &str = "roughness";
pub const UNIFORM_RESOLUTION: &str = "resolution";
pub const UNIFORM_SAMPLE_DELTA: &str = "sample_delta";
pub const UNIFORM_SAMPLE_COUNT: &str = "sample_count";
pub const SAMPLER_EQUIRECTANGULAR_MAP: &str = "equirectangular_map";
pub const SAMPLER_ENVIRONMENT_MAP: &str = "environment_map";

/// Which capture algorithm a program runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    EquirectToCubemap,
    IrradianceConvolution,
    Prefilter,
    BrdfIntegration,
}

/// Storage slot a named uniform maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformSlot {
    Projection,
    View,
    Roughness,
    Resolution,
    SampleDelta,
    SampleCount,
    /// Sampler uniform holding a texture unit index.
    Sampler,
}

impl ProgramKind {
    /// Whether the program draws the unit cube (as opposed to the quad).
    pub fn draws_cube(&self) -> bool {
        !matches!(self, ProgramKind::BrdfIntegration)
    }

    /// Name of the sampler uniform, if the program reads a texture.
    pub fn sampler_name(&self) -> Option<&'static str> {
        match self {
            ProgramKind::EquirectToCubemap => Some(SAMPLER_EQUIRECTANGULAR_MAP),
            ProgramKind::IrradianceConvolution | ProgramKind::Prefilter => {
                Some(SAMPLER_ENVIRONMENT_MAP)
            }
            ProgramKind::BrdfIntegration => None,
        }
    }

    /// Whether the sampled texture is a cubemap.
    pub fn samples_cube(&self) -> bool {
        matches!(
            self,
            ProgramKind::IrradianceConvolution | ProgramKind::Prefilter
        )
    }

    /// Resolve a uniform name and value type to its slot.
    ///
    /// Returns `None` for names the program does not declare or values of the
    /// wrong type.
    pub fn uniform_slot(&self, name: &str, value: &UniformValue) -> Option<UniformSlot> {
        let slot = match name {
            UNIFORM_PROJECTION if self.draws_cube() => UniformSlot::Projection,
            UNIFORM_VIEW if self.draws_cube() => UniformSlot::View,
            UNIFORM_ROUGHNESS if *self == ProgramKind::Prefilter => UniformSlot::Roughness,
            UNIFORM_RESOLUTION if *self == ProgramKind::Prefilter => UniformSlot::Resolution,
            UNIFORM_SAMPLE_DELTA if *self == ProgramKind::IrradianceConvolution => {
                UniformSlot::SampleDelta
            }
            UNIFORM_SAMPLE_COUNT
                if matches!(self, ProgramKind::Prefilter | ProgramKind::BrdfIntegration) =>
            {
                UniformSlot::SampleCount
            }
            other if Some(other) == self.sampler_name() => UniformSlot::Sampler,
            _ => return None,
        };

        let type_ok = match slot {
            UniformSlot::Projection | UniformSlot::View => matches!(value, UniformValue::Mat4(_)),
            UniformSlot::Sampler => matches!(value, UniformValue::Int(_)),
            UniformSlot::Roughness | UniformSlot::Resolution | UniformSlot::SampleDelta => {
                matches!(value, UniformValue::Float(_))
            }
            UniformSlot::SampleCount => {
                matches!(value, UniformValue::Int(_) | UniformValue::Float(_))
            }
        };
        type_ok.then_some(slot)
    }
}

/// A linkable capture program: WGSL modules plus the kernel kind.
#[derive(Debug, Clone)]
pub struct ShaderProgram {
    pub label: &'static str,
    pub kind: ProgramKind,
    modules: &'static [&'static str],
}

impl ShaderProgram {
    pub fn equirect_to_cubemap() -> Self {
        Self {
            label: "equirectangular_to_cubemap",
            kind: ProgramKind::EquirectToCubemap,
            modules: &[
                CAPTURE_UNIFORMS_WGSL,
                CUBE_VERTEX_WGSL,
                EQUIRECT_TO_CUBEMAP_WGSL,
            ],
        }
    }

    pub fn irradiance_convolution() -> Self {
        Self {
            label: "irradiance_convolution",
            kind: ProgramKind::IrradianceConvolution,
            modules: &[CAPTURE_UNIFORMS_WGSL, CUBE_VERTEX_WGSL, IRRADIANCE_WGSL],
        }
    }

    pub fn prefilter() -> Self {
        Self {
            label: "prefilter",
            kind: ProgramKind::Prefilter,
            modules: &[
                CAPTURE_UNIFORMS_WGSL,
                SAMPLING_WGSL,
                CUBE_VERTEX_WGSL,
                PREFILTER_WGSL,
            ],
        }
    }

    pub fn brdf_integration() -> Self {
        Self {
            label: "brdf_integration",
            kind: ProgramKind::BrdfIntegration,
            modules: &[CAPTURE_UNIFORMS_WGSL, SAMPLING_WGSL, BRDF_WGSL],
        }
    }

    #[cfg(test)]
    pub(crate) fn from_modules(
        label: &'static str,
        kind: ProgramKind,
        modules: &'static [&'static str],
    ) -> Self {
        Self {
            label,
            kind,
            modules,
        }
    }

    /// Full WGSL source of the program.
    pub fn source(&self) -> String {
        self.modules.join("\n")
    }

    /// Parse and validate the WGSL source with naga.
    pub fn validate(&self) -> Result<naga::Module, String> {
        let source = self.source();
        let module =
            naga::front::wgsl::parse_str(&source).map_err(|e| e.emit_to_string(&source))?;
        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module)
        .map_err(|e| e.emit_to_string(&source))?;
        Ok(module)
    }
}

/// Uniform block layout shared by the WGSL capture programs.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CaptureUniforms {
    pub projection: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    /// x: roughness, y: source resolution, z: sample delta, w: sample count
    pub params: [f32; 4],
}

impl Default for CaptureUniforms {
    fn default() -> Self {
        Self {
            projection: glam::Mat4::IDENTITY.to_cols_array_2d(),
            view: glam::Mat4::IDENTITY.to_cols_array_2d(),
            params: [0.0; 4],
        }
    }
}

impl CaptureUniforms {
    /// Store a resolved uniform value. Sampler slots are not part of the block.
    pub fn set(&mut self, slot: UniformSlot, value: UniformValue) {
        let scalar = match value {
            UniformValue::Float(v) => v,
            UniformValue::Int(v) => v as f32,
            _ => 0.0,
        };
        match (slot, value) {
            (UniformSlot::Projection, UniformValue::Mat4(m)) => {
                self.projection = m.to_cols_array_2d()
            }
            (UniformSlot::View, UniformValue::Mat4(m)) => self.view = m.to_cols_array_2d(),
            (UniformSlot::Roughness, _) => self.params[0] = scalar,
            (UniformSlot::Resolution, _) => self.params[1] = scalar,
            (UniformSlot::SampleDelta, _) => self.params[2] = scalar,
            (UniformSlot::SampleCount, _) => self.params[3] = scalar,
            _ => {}
        }
    }

    pub fn projection(&self) -> glam::Mat4 {
        glam::Mat4::from_cols_array_2d(&self.projection)
    }

    pub fn view(&self) -> glam::Mat4 {
        glam::Mat4::from_cols_array_2d(&self.view)
    }

    pub fn roughness(&self) -> f32 {
        self.params[0]
    }

    pub fn resolution(&self) -> f32 {
        self.params[1]
    }

    pub fn sample_delta(&self) -> f32 {
        self.params[2]
    }

    pub fn sample_count(&self) -> u32 {
        self.params[3].max(0.0) as u32
    }
}

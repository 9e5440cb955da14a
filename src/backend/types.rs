//! Common types shared between backends

use glam::Vec3;

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba16Float,
    Rg16Float,
    Rgba32Float,
}

impl TextureFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rg16Float => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }

    /// Number of color channels actually stored.
    pub fn channels(&self) -> usize {
        match self {
            TextureFormat::Rg16Float => 2,
            TextureFormat::Rgba16Float | TextureFormat::Rgba32Float => 4,
        }
    }

    /// Whether texels are stored at half precision.
    pub fn is_half(&self) -> bool {
        matches!(self, TextureFormat::Rgba16Float | TextureFormat::Rg16Float)
    }
}

/// Shape of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    D2,
    Cube,
}

impl TextureKind {
    pub fn layers(&self) -> u32 {
        match self {
            TextureKind::D2 => 1,
            TextureKind::Cube => 6,
        }
    }
}

/// Texture descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: TextureFormat,
}

impl TextureDescriptor {
    pub fn new_2d(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: None,
            kind: TextureKind::D2,
            width,
            height,
            mip_levels: 1,
            format,
        }
    }

    pub fn new_cube(size: u32, format: TextureFormat) -> Self {
        Self {
            label: None,
            kind: TextureKind::Cube,
            width: size,
            height: size,
            mip_levels: 1,
            format,
        }
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    /// Allocate every level down to 1x1.
    pub fn with_full_mip_chain(mut self) -> Self {
        self.mip_levels = full_mip_chain_len(self.width.max(self.height));
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Extent of the given mip level.
    pub fn mip_extent(&self, mip: u32) -> (u32, u32) {
        (
            self.width.checked_shr(mip).unwrap_or(0).max(1),
            self.height.checked_shr(mip).unwrap_or(0).max(1),
        )
    }
}

/// Number of mip levels in a complete chain for a texture of the given size.
pub fn full_mip_chain_len(size: u32) -> u32 {
    u32::BITS - size.max(1).leading_zeros()
}

/// One of the six faces of a cubemap, in array-layer order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CubeFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    pub fn layer(&self) -> u32 {
        *self as u32
    }

    pub fn from_layer(layer: u32) -> Option<Self> {
        Self::ALL.get(layer as usize).copied()
    }

    /// Direction the face looks at from the cube centre.
    pub fn direction(&self) -> Vec3 {
        match self {
            CubeFace::PositiveX => Vec3::X,
            CubeFace::NegativeX => Vec3::NEG_X,
            CubeFace::PositiveY => Vec3::Y,
            CubeFace::NegativeY => Vec3::NEG_Y,
            CubeFace::PositiveZ => Vec3::Z,
            CubeFace::NegativeZ => Vec3::NEG_Z,
        }
    }

    /// Up vector used when rendering into this face.
    pub fn up(&self) -> Vec3 {
        match self {
            CubeFace::PositiveY => Vec3::Z,
            CubeFace::NegativeY => Vec3::NEG_Z,
            _ => Vec3::NEG_Y,
        }
    }

    /// World direction through texel coordinates `(u, v)` in `[-1, 1]`, `v` pointing
    /// down the face image. Values outside the range extrapolate past the face edge.
    pub fn texel_direction(&self, u: f32, v: f32) -> Vec3 {
        match self {
            CubeFace::PositiveX => Vec3::new(1.0, -v, -u),
            CubeFace::NegativeX => Vec3::new(-1.0, -v, u),
            CubeFace::PositiveY => Vec3::new(u, 1.0, v),
            CubeFace::NegativeY => Vec3::new(u, -1.0, -v),
            CubeFace::PositiveZ => Vec3::new(u, -v, 1.0),
            CubeFace::NegativeZ => Vec3::new(-u, -v, -1.0),
        }
    }

    /// Face hit by `dir` and the `(u, v)` coordinates in `[-1, 1]` on that face.
    pub fn project(dir: Vec3) -> (CubeFace, f32, f32) {
        let abs = dir.abs();
        if abs.x >= abs.y && abs.x >= abs.z {
            let ma = abs.x.max(f32::MIN_POSITIVE);
            if dir.x > 0.0 {
                (CubeFace::PositiveX, -dir.z / ma, -dir.y / ma)
            } else {
                (CubeFace::NegativeX, dir.z / ma, -dir.y / ma)
            }
        } else if abs.y >= abs.z {
            let ma = abs.y.max(f32::MIN_POSITIVE);
            if dir.y > 0.0 {
                (CubeFace::PositiveY, dir.x / ma, dir.z / ma)
            } else {
                (CubeFace::NegativeY, dir.x / ma, -dir.z / ma)
            }
        } else {
            let ma = abs.z.max(f32::MIN_POSITIVE);
            if dir.z > 0.0 {
                (CubeFace::PositiveZ, dir.x / ma, -dir.y / ma)
            } else {
                (CubeFace::NegativeZ, -dir.x / ma, -dir.y / ma)
            }
        }
    }
}

/// Texture unit index in the context's global binding table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureUnit(pub u32);

impl TextureUnit {
    pub const MAX: u32 = 16;
}

/// Depth comparison function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareFunction {
    #[default]
    Less,
    LessEqual,
    Always,
}

/// Value accepted by `RenderContext::set_uniform`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec3(glam::Vec3),
    Mat3(glam::Mat3),
    Mat4(glam::Mat4),
}

impl UniformValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            UniformValue::Int(_) => "int",
            UniformValue::Float(_) => "float",
            UniformValue::Vec3(_) => "vec3",
            UniformValue::Mat3(_) => "mat3",
            UniformValue::Mat4(_) => "mat4",
        }
    }
}

//! Core backend abstraction traits
//!
//! `RenderContext` is the explicit GPU-state object every bake pass receives.
//! Both the software reference backend and the wgpu backend implement it.

use crate::backend::types::*;
use crate::shader::ShaderProgram;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create framebuffer: {0}")]
    FramebufferCreationFailed(String),
    #[error("Failed to create renderbuffer: {0}")]
    RenderbufferCreationFailed(String),
    #[error("Failed to create shader '{label}': {message}")]
    ShaderCreationFailed { label: String, message: String },
    #[error("Unknown uniform '{name}' ({ty}) for program '{program}'")]
    UnknownUniform {
        program: String,
        name: String,
        ty: &'static str,
    },
    #[error("Invalid {kind} handle {id}")]
    InvalidHandle { kind: &'static str, id: u64 },
    #[error("Color attachment is {attachment:?} but depth storage is {depth:?}")]
    AttachmentSizeMismatch {
        attachment: (u32, u32),
        depth: (u32, u32),
    },
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Texture readback failed: {0}")]
    ReadbackFailed(String),
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a texture (2D or cube)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to an offscreen framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferHandle(pub(crate) u64);

/// Handle to a depth renderbuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderbufferHandle(pub(crate) u64);

/// Handle to a linked shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub(crate) u64);

impl TextureHandle {
    /// Raw id, stable for the lifetime of the texture.
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Color target for a framebuffer's attachment 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentTarget {
    Texture2d {
        texture: TextureHandle,
        mip: u32,
    },
    CubeFace {
        texture: TextureHandle,
        face: CubeFace,
        mip: u32,
    },
}

impl AttachmentTarget {
    pub fn texture(&self) -> TextureHandle {
        match *self {
            AttachmentTarget::Texture2d { texture, .. }
            | AttachmentTarget::CubeFace { texture, .. } => texture,
        }
    }

    pub fn mip(&self) -> u32 {
        match *self {
            AttachmentTarget::Texture2d { mip, .. } | AttachmentTarget::CubeFace { mip, .. } => mip,
        }
    }

    pub fn layer(&self) -> u32 {
        match self {
            AttachmentTarget::Texture2d { .. } => 0,
            AttachmentTarget::CubeFace { face, .. } => face.layer(),
        }
    }
}

/// Explicit GPU context threaded through the bake and the render loop.
///
/// Mirrors a classic immediate-mode API: one bound framebuffer, one bound
/// program, and a global table of texture units.
pub trait RenderContext {
    /// Human readable backend name
    fn backend_name(&self) -> &'static str;

    // Textures

    /// Create an empty texture
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Upload RGBA texels into mip 0 of a 2D texture
    fn write_texture(&mut self, texture: TextureHandle, texels: &[[f32; 4]]) -> BackendResult<()>;

    /// Read back one layer of one mip level as RGBA texels
    fn read_texture(
        &mut self,
        texture: TextureHandle,
        layer: u32,
        mip: u32,
    ) -> BackendResult<Vec<[f32; 4]>>;

    /// Fill mip levels 1.. from mip 0
    fn generate_mipmaps(&mut self, texture: TextureHandle) -> BackendResult<()>;

    /// Descriptor of a live texture
    fn texture_info(&self, texture: TextureHandle) -> BackendResult<TextureDescriptor>;

    /// Bind a texture to a global texture unit
    fn bind_texture(&mut self, unit: TextureUnit, texture: TextureHandle) -> BackendResult<()>;

    /// Texture currently bound at `unit`
    fn bound_texture(&self, unit: TextureUnit) -> Option<TextureHandle>;

    /// Destroy a texture, unbinding it from every unit
    fn destroy_texture(&mut self, texture: TextureHandle);

    // Offscreen targets

    /// Create a framebuffer object
    fn create_framebuffer(&mut self) -> BackendResult<FramebufferHandle>;

    /// Create a depth renderbuffer with no storage
    fn create_renderbuffer(&mut self) -> BackendResult<RenderbufferHandle>;

    /// Bind a framebuffer; `None` restores the default framebuffer
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) -> BackendResult<()>;

    /// (Re)allocate depth storage
    fn renderbuffer_storage(
        &mut self,
        renderbuffer: RenderbufferHandle,
        width: u32,
        height: u32,
    ) -> BackendResult<()>;

    /// Use a renderbuffer as the framebuffer's depth attachment
    fn attach_depth(
        &mut self,
        framebuffer: FramebufferHandle,
        renderbuffer: RenderbufferHandle,
    ) -> BackendResult<()>;

    /// Attach a color target at attachment 0
    fn attach_color(
        &mut self,
        framebuffer: FramebufferHandle,
        target: AttachmentTarget,
    ) -> BackendResult<()>;

    /// Set viewport
    fn set_viewport(&mut self, width: u32, height: u32);

    /// Clear color and depth of the bound framebuffer
    fn clear(&mut self, color: [f32; 4]) -> BackendResult<()>;

    // Programs

    /// Compile and link a program
    fn create_program(&mut self, program: &ShaderProgram) -> BackendResult<ProgramHandle>;

    /// Make a program current
    fn use_program(&mut self, program: ProgramHandle) -> BackendResult<()>;

    /// Set a uniform of the current program by name
    fn set_uniform(&mut self, name: &str, value: UniformValue) -> BackendResult<()>;

    // Draws

    /// Draw the static unit cube (positions in [-1, 1]^3)
    fn draw_unit_cube(&mut self) -> BackendResult<()>;

    /// Draw the static full-screen quad
    fn draw_unit_quad(&mut self) -> BackendResult<()>;

    // Global state

    /// Enable filtering across cube face boundaries
    fn enable_seamless_cubemap(&mut self);

    /// Set depth comparison function for later draws
    fn set_depth_func(&mut self, func: CompareFunction);
}

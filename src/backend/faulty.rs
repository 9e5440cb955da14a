//! Software backend wrapper that fails selected resource creation calls.

use crate::backend::software::SoftwareBackend;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::shader::ShaderProgram;

/// Which creation calls fail.
#[derive(Debug, Default, Clone)]
pub(crate) struct Faults {
    pub framebuffer: bool,
    pub renderbuffer: bool,
    /// Label of the program whose link fails
    pub program: Option<&'static str>,
}

#[derive(Debug, Default)]
pub(crate) struct FaultyBackend {
    pub inner: SoftwareBackend,
    pub faults: Faults,
}

impl FaultyBackend {
    pub fn new(faults: Faults) -> Self {
        Self {
            inner: SoftwareBackend::new(),
            faults,
        }
    }
}

impl RenderContext for FaultyBackend {
    fn backend_name(&self) -> &'static str {
        "Faulty"
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        self.inner.create_texture(desc)
    }

    fn write_texture(&mut self, texture: TextureHandle, texels: &[[f32; 4]]) -> BackendResult<()> {
        self.inner.write_texture(texture, texels)
    }

    fn read_texture(
        &mut self,
        texture: TextureHandle,
        layer: u32,
        mip: u32,
    ) -> BackendResult<Vec<[f32; 4]>> {
        self.inner.read_texture(texture, layer, mip)
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) -> BackendResult<()> {
        self.inner.generate_mipmaps(texture)
    }

    fn texture_info(&self, texture: TextureHandle) -> BackendResult<TextureDescriptor> {
        self.inner.texture_info(texture)
    }

    fn bind_texture(&mut self, unit: TextureUnit, texture: TextureHandle) -> BackendResult<()> {
        self.inner.bind_texture(unit, texture)
    }

    fn bound_texture(&self, unit: TextureUnit) -> Option<TextureHandle> {
        self.inner.bound_texture(unit)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.inner.destroy_texture(texture)
    }

    fn create_framebuffer(&mut self) -> BackendResult<FramebufferHandle> {
        if self.faults.framebuffer {
            return Err(BackendError::FramebufferCreationFailed(
                "framebuffer objects unavailable".into(),
            ));
        }
        self.inner.create_framebuffer()
    }

    fn create_renderbuffer(&mut self) -> BackendResult<RenderbufferHandle> {
        if self.faults.renderbuffer {
            return Err(BackendError::RenderbufferCreationFailed(
                "renderbuffer objects unavailable".into(),
            ));
        }
        self.inner.create_renderbuffer()
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) -> BackendResult<()> {
        self.inner.bind_framebuffer(framebuffer)
    }

    fn renderbuffer_storage(
        &mut self,
        renderbuffer: RenderbufferHandle,
        width: u32,
        height: u32,
    ) -> BackendResult<()> {
        self.inner.renderbuffer_storage(renderbuffer, width, height)
    }

    fn attach_depth(
        &mut self,
        framebuffer: FramebufferHandle,
        renderbuffer: RenderbufferHandle,
    ) -> BackendResult<()> {
        self.inner.attach_depth(framebuffer, renderbuffer)
    }

    fn attach_color(
        &mut self,
        framebuffer: FramebufferHandle,
        target: AttachmentTarget,
    ) -> BackendResult<()> {
        self.inner.attach_color(framebuffer, target)
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.inner.set_viewport(width, height)
    }

    fn clear(&mut self, color: [f32; 4]) -> BackendResult<()> {
        self.inner.clear(color)
    }

    fn create_program(&mut self, program: &ShaderProgram) -> BackendResult<ProgramHandle> {
        if self.faults.program == Some(program.label) {
            return Err(BackendError::ShaderCreationFailed {
                label: program.label.to_string(),
                message: "link failed".into(),
            });
        }
        self.inner.create_program(program)
    }

    fn use_program(&mut self, program: ProgramHandle) -> BackendResult<()> {
        self.inner.use_program(program)
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) -> BackendResult<()> {
        self.inner.set_uniform(name, value)
    }

    fn draw_unit_cube(&mut self) -> BackendResult<()> {
        self.inner.draw_unit_cube()
    }

    fn draw_unit_quad(&mut self) -> BackendResult<()> {
        self.inner.draw_unit_quad()
    }

    fn enable_seamless_cubemap(&mut self) {
        self.inner.enable_seamless_cubemap()
    }

    fn set_depth_func(&mut self, func: CompareFunction) {
        self.inner.set_depth_func(func)
    }
}

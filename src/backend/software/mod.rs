//! Software reference backend.
//!
//! Executes the capture programs on the CPU so bakes run without a GPU and
//! tests can compare exact texel values. Shader sources are still validated
//! with naga at program creation, so a broken WGSL module fails here the same
//! way it would on the wgpu backend.

mod texture;

pub use texture::CpuTexture;

use std::collections::HashMap;

use glam::{Mat4, Vec2, Vec3, Vec4, Vec4Swizzles};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::shader::{kernels, CaptureUniforms, ProgramKind, ShaderProgram, UniformSlot};

/// Offscreen framebuffer state
#[derive(Debug, Default)]
struct Framebuffer {
    color: Option<AttachmentTarget>,
    depth: Option<RenderbufferHandle>,
}

/// Depth storage of a renderbuffer
#[derive(Debug, Default)]
struct DepthStorage {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

#[derive(Debug)]
struct SoftwareProgram {
    label: &'static str,
    kind: ProgramKind,
    uniforms: CaptureUniforms,
    sampler_unit: Option<TextureUnit>,
}

/// Resolved draw target
struct DrawTarget {
    texture: TextureHandle,
    layer: u32,
    mip: u32,
    width: u32,
    height: u32,
    depth: RenderbufferHandle,
}

/// CPU implementation of [`RenderContext`]
#[derive(Debug)]
pub struct SoftwareBackend {
    textures: HashMap<u64, CpuTexture>,
    framebuffers: HashMap<u64, Framebuffer>,
    renderbuffers: HashMap<u64, DepthStorage>,
    programs: HashMap<u64, SoftwareProgram>,
    units: HashMap<u32, TextureHandle>,

    bound_framebuffer: Option<FramebufferHandle>,
    current_program: Option<ProgramHandle>,
    viewport: (u32, u32),
    depth_func: CompareFunction,
    seamless_cubemap: bool,

    next_texture_id: u64,
    next_framebuffer_id: u64,
    next_renderbuffer_id: u64,
    next_program_id: u64,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self {
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            renderbuffers: HashMap::new(),
            programs: HashMap::new(),
            units: HashMap::new(),
            bound_framebuffer: None,
            current_program: None,
            viewport: (0, 0),
            depth_func: CompareFunction::default(),
            seamless_cubemap: false,
            next_texture_id: 1,
            next_framebuffer_id: 1,
            next_renderbuffer_id: 1,
            next_program_id: 1,
        }
    }

    /// Whether seamless cube filtering has been enabled
    pub fn seamless_cubemap(&self) -> bool {
        self.seamless_cubemap
    }

    /// Number of live textures
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Current depth comparison function
    pub fn depth_func(&self) -> CompareFunction {
        self.depth_func
    }

    fn texture(&self, texture: TextureHandle) -> BackendResult<&CpuTexture> {
        self.textures.get(&texture.0).ok_or(BackendError::InvalidHandle {
            kind: "texture",
            id: texture.0,
        })
    }

    fn texture_mut(&mut self, texture: TextureHandle) -> BackendResult<&mut CpuTexture> {
        self.textures.get_mut(&texture.0).ok_or(BackendError::InvalidHandle {
            kind: "texture",
            id: texture.0,
        })
    }

    fn framebuffer_mut(&mut self, framebuffer: FramebufferHandle) -> BackendResult<&mut Framebuffer> {
        self.framebuffers
            .get_mut(&framebuffer.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "framebuffer",
                id: framebuffer.0,
            })
    }

    fn current_program(&self) -> BackendResult<(ProgramHandle, &SoftwareProgram)> {
        let handle = self
            .current_program
            .ok_or_else(|| BackendError::InvalidOperation("no program in use".into()))?;
        let program = self.programs.get(&handle.0).ok_or(BackendError::InvalidHandle {
            kind: "program",
            id: handle.0,
        })?;
        Ok((handle, program))
    }

    /// Validate the bound framebuffer and resolve its attachments.
    fn draw_target(&self) -> BackendResult<DrawTarget> {
        let handle = self.bound_framebuffer.ok_or_else(|| {
            BackendError::InvalidOperation("no offscreen framebuffer bound".into())
        })?;
        let framebuffer = self
            .framebuffers
            .get(&handle.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "framebuffer",
                id: handle.0,
            })?;
        let color = framebuffer.color.ok_or_else(|| {
            BackendError::InvalidOperation("framebuffer has no color attachment".into())
        })?;
        let depth = framebuffer.depth.ok_or_else(|| {
            BackendError::InvalidOperation("framebuffer has no depth attachment".into())
        })?;

        let (width, height) = self
            .texture(color.texture())?
            .descriptor()
            .mip_extent(color.mip());
        let storage = self
            .renderbuffers
            .get(&depth.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "renderbuffer",
                id: depth.0,
            })?;
        if (storage.width, storage.height) != (width, height) {
            return Err(BackendError::AttachmentSizeMismatch {
                attachment: (width, height),
                depth: (storage.width, storage.height),
            });
        }

        Ok(DrawTarget {
            texture: color.texture(),
            layer: color.layer(),
            mip: color.mip(),
            width,
            height,
            depth,
        })
    }

    /// Texture read by the current program, checked against the program's
    /// expected texture kind.
    fn sampled_texture(&self, program: &SoftwareProgram) -> BackendResult<Option<&CpuTexture>> {
        if program.kind.sampler_name().is_none() {
            return Ok(None);
        }
        let unit = program.sampler_unit.unwrap_or(TextureUnit(0));
        let handle = self.bound_texture(unit).ok_or_else(|| {
            BackendError::InvalidOperation(format!(
                "program '{}' samples unit {} but nothing is bound",
                program.label, unit.0
            ))
        })?;
        let texture = self.texture(handle)?;
        let expected = if program.kind.samples_cube() {
            TextureKind::Cube
        } else {
            TextureKind::D2
        };
        if texture.descriptor().kind != expected {
            return Err(BackendError::InvalidOperation(format!(
                "program '{}' expects a {:?} texture on unit {}",
                program.label, expected, unit.0
            )));
        }
        Ok(Some(texture))
    }

    fn depth_passes(&self, fragment: f32, stored: f32) -> bool {
        match self.depth_func {
            CompareFunction::Less => fragment < stored,
            CompareFunction::LessEqual => fragment <= stored,
            CompareFunction::Always => true,
        }
    }

    /// Rasterize over the viewport, clipped to the target. `shade` returns the
    /// fragment depth and color for a pixel, or `None` if nothing covers it.
    fn rasterize<F>(&mut self, target: &DrawTarget, shade: F) -> BackendResult<()>
    where
        F: Fn(&Self, u32, u32, u32, u32) -> BackendResult<Option<(f32, Vec4)>>,
    {
        let (vw, vh) = self.viewport;
        let width = vw.min(target.width);
        let height = vh.min(target.height);

        let mut fragments = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                if let Some(fragment) = shade(self, x, y, vw, vh)? {
                    fragments.push((x, y, fragment));
                }
            }
        }

        let mut passed = Vec::with_capacity(fragments.len());
        {
            let storage = self
                .renderbuffers
                .get(&target.depth.0)
                .ok_or(BackendError::InvalidHandle {
                    kind: "renderbuffer",
                    id: target.depth.0,
                })?;
            for (x, y, (depth, color)) in fragments {
                let index = (y * storage.width + x) as usize;
                if self.depth_passes(depth, storage.values[index]) {
                    passed.push((x, y, depth, color));
                }
            }
        }

        if let Some(storage) = self.renderbuffers.get_mut(&target.depth.0) {
            for &(x, y, depth, _) in &passed {
                storage.values[(y * storage.width + x) as usize] = depth;
            }
        }
        let texture = self.texture_mut(target.texture)?;
        for (x, y, _, color) in passed {
            texture.store(target.layer, target.mip, x, y, color.to_array());
        }
        Ok(())
    }
}

/// Point where the view ray through a pixel meets the unit cube, with its
/// window depth.
fn cube_hit(view_projection: Mat4, inverse: Mat4, ndc: Vec2) -> Option<(Vec3, f32)> {
    let near = inverse.project_point3(ndc.extend(0.0));
    let far = inverse.project_point3(ndc.extend(1.0));
    let dir = far - near;

    let mut t_enter = f32::NEG_INFINITY;
    let mut t_exit = f32::INFINITY;
    for axis in 0..3 {
        let (o, d) = (near[axis], dir[axis]);
        if d.abs() < 1e-12 {
            if o.abs() > 1.0 {
                return None;
            }
            continue;
        }
        let t0 = (-1.0 - o) / d;
        let t1 = (1.0 - o) / d;
        t_enter = t_enter.max(t0.min(t1));
        t_exit = t_exit.min(t0.max(t1));
    }
    if t_enter > t_exit {
        return None;
    }
    let t = if (0.0..=1.0).contains(&t_enter) {
        t_enter
    } else if (0.0..=1.0).contains(&t_exit) {
        t_exit
    } else {
        return None;
    };

    let position = near + dir * t;
    let depth = view_projection.project_point3(position).z;
    Some((position, depth))
}

impl RenderContext for SoftwareBackend {
    fn backend_name(&self) -> &'static str {
        "Software"
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: zero extent {}x{}",
                desc.label, desc.width, desc.height
            )));
        }
        if desc.kind == TextureKind::Cube && desc.width != desc.height {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: cube faces must be square",
                desc.label
            )));
        }
        if desc.mip_levels == 0 || desc.mip_levels > full_mip_chain_len(desc.width.max(desc.height)) {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: invalid mip level count {}",
                desc.label, desc.mip_levels
            )));
        }

        log::trace!(
            "SoftwareBackend: creating texture {:?} ({}x{}, {} mips)",
            desc.label,
            desc.width,
            desc.height,
            desc.mip_levels
        );
        let id = self.next_texture_id;
        self.next_texture_id += 1;
        self.textures.insert(id, CpuTexture::new(desc.clone()));
        Ok(TextureHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, texels: &[[f32; 4]]) -> BackendResult<()> {
        let tex = self.texture_mut(texture)?;
        let desc = tex.descriptor().clone();
        if desc.kind != TextureKind::D2 {
            return Err(BackendError::InvalidOperation(
                "texel upload is only supported for 2D textures".into(),
            ));
        }
        let expected = (desc.width * desc.height) as usize;
        if texels.len() != expected {
            return Err(BackendError::InvalidOperation(format!(
                "expected {} texels, got {}",
                expected,
                texels.len()
            )));
        }
        for (i, texel) in texels.iter().enumerate() {
            let x = i as u32 % desc.width;
            let y = i as u32 / desc.width;
            tex.store(0, 0, x, y, *texel);
        }
        Ok(())
    }

    fn read_texture(
        &mut self,
        texture: TextureHandle,
        layer: u32,
        mip: u32,
    ) -> BackendResult<Vec<[f32; 4]>> {
        let tex = self.texture(texture)?;
        let desc = tex.descriptor();
        if layer >= desc.kind.layers() || mip >= desc.mip_levels {
            return Err(BackendError::ReadbackFailed(format!(
                "layer {} mip {} out of range",
                layer, mip
            )));
        }
        Ok(tex.level(layer, mip).to_vec())
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) -> BackendResult<()> {
        self.texture_mut(texture)?.generate_mipmaps();
        Ok(())
    }

    fn texture_info(&self, texture: TextureHandle) -> BackendResult<TextureDescriptor> {
        Ok(self.texture(texture)?.descriptor().clone())
    }

    fn bind_texture(&mut self, unit: TextureUnit, texture: TextureHandle) -> BackendResult<()> {
        if unit.0 >= TextureUnit::MAX {
            return Err(BackendError::InvalidOperation(format!(
                "texture unit {} exceeds {}",
                unit.0,
                TextureUnit::MAX
            )));
        }
        self.texture(texture)?;
        self.units.insert(unit.0, texture);
        Ok(())
    }

    fn bound_texture(&self, unit: TextureUnit) -> Option<TextureHandle> {
        self.units.get(&unit.0).copied()
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
        self.units.retain(|_, bound| *bound != texture);
    }

    fn create_framebuffer(&mut self) -> BackendResult<FramebufferHandle> {
        let id = self.next_framebuffer_id;
        self.next_framebuffer_id += 1;
        self.framebuffers.insert(id, Framebuffer::default());
        Ok(FramebufferHandle(id))
    }

    fn create_renderbuffer(&mut self) -> BackendResult<RenderbufferHandle> {
        let id = self.next_renderbuffer_id;
        self.next_renderbuffer_id += 1;
        self.renderbuffers.insert(id, DepthStorage::default());
        Ok(RenderbufferHandle(id))
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) -> BackendResult<()> {
        if let Some(fb) = framebuffer {
            self.framebuffer_mut(fb)?;
        }
        self.bound_framebuffer = framebuffer;
        Ok(())
    }

    fn renderbuffer_storage(
        &mut self,
        renderbuffer: RenderbufferHandle,
        width: u32,
        height: u32,
    ) -> BackendResult<()> {
        if width == 0 || height == 0 {
            return Err(BackendError::RenderbufferCreationFailed(format!(
                "zero extent {}x{}",
                width, height
            )));
        }
        let storage = self
            .renderbuffers
            .get_mut(&renderbuffer.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "renderbuffer",
                id: renderbuffer.0,
            })?;
        *storage = DepthStorage {
            width,
            height,
            values: vec![1.0; (width * height) as usize],
        };
        Ok(())
    }

    fn attach_depth(
        &mut self,
        framebuffer: FramebufferHandle,
        renderbuffer: RenderbufferHandle,
    ) -> BackendResult<()> {
        if !self.renderbuffers.contains_key(&renderbuffer.0) {
            return Err(BackendError::InvalidHandle {
                kind: "renderbuffer",
                id: renderbuffer.0,
            });
        }
        self.framebuffer_mut(framebuffer)?.depth = Some(renderbuffer);
        Ok(())
    }

    fn attach_color(
        &mut self,
        framebuffer: FramebufferHandle,
        target: AttachmentTarget,
    ) -> BackendResult<()> {
        let desc = self.texture(target.texture())?.descriptor().clone();
        let kind_ok = match target {
            AttachmentTarget::Texture2d { .. } => desc.kind == TextureKind::D2,
            AttachmentTarget::CubeFace { .. } => desc.kind == TextureKind::Cube,
        };
        if !kind_ok {
            return Err(BackendError::FramebufferCreationFailed(format!(
                "{:?} cannot be attached as {:?}",
                desc.label, target
            )));
        }
        if target.mip() >= desc.mip_levels {
            return Err(BackendError::FramebufferCreationFailed(format!(
                "{:?} has {} mip levels, attachment asks for level {}",
                desc.label,
                desc.mip_levels,
                target.mip()
            )));
        }
        self.framebuffer_mut(framebuffer)?.color = Some(target);
        Ok(())
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    fn clear(&mut self, color: [f32; 4]) -> BackendResult<()> {
        let target = self.draw_target()?;
        let (vw, vh) = self.viewport;
        let width = vw.min(target.width);
        let height = vh.min(target.height);

        if let Some(storage) = self.renderbuffers.get_mut(&target.depth.0) {
            for y in 0..height {
                for x in 0..width {
                    storage.values[(y * storage.width + x) as usize] = 1.0;
                }
            }
        }
        let texture = self.texture_mut(target.texture)?;
        for y in 0..height {
            for x in 0..width {
                texture.store(target.layer, target.mip, x, y, color);
            }
        }
        Ok(())
    }

    fn create_program(&mut self, program: &ShaderProgram) -> BackendResult<ProgramHandle> {
        program
            .validate()
            .map_err(|message| BackendError::ShaderCreationFailed {
                label: program.label.to_string(),
                message,
            })?;

        let id = self.next_program_id;
        self.next_program_id += 1;
        self.programs.insert(
            id,
            SoftwareProgram {
                label: program.label,
                kind: program.kind,
                uniforms: CaptureUniforms::default(),
                sampler_unit: None,
            },
        );
        log::debug!("SoftwareBackend: linked program '{}'", program.label);
        Ok(ProgramHandle(id))
    }

    fn use_program(&mut self, program: ProgramHandle) -> BackendResult<()> {
        if !self.programs.contains_key(&program.0) {
            return Err(BackendError::InvalidHandle {
                kind: "program",
                id: program.0,
            });
        }
        self.current_program = Some(program);
        Ok(())
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) -> BackendResult<()> {
        let (handle, program) = self.current_program()?;
        let slot = program
            .kind
            .uniform_slot(name, &value)
            .ok_or_else(|| BackendError::UnknownUniform {
                program: program.label.to_string(),
                name: name.to_string(),
                ty: value.type_name(),
            })?;

        let Some(program) = self.programs.get_mut(&handle.0) else {
            return Err(BackendError::InvalidHandle {
                kind: "program",
                id: handle.0,
            });
        };
        match (slot, value) {
            (UniformSlot::Sampler, UniformValue::Int(unit)) => {
                let unit = u32::try_from(unit).map_err(|_| {
                    BackendError::InvalidOperation(format!(
                        "sampler '{}' of program '{}' set to negative unit {}",
                        name, program.label, unit
                    ))
                })?;
                program.sampler_unit = Some(TextureUnit(unit));
            }
            _ => program.uniforms.set(slot, value),
        }
        Ok(())
    }

    fn draw_unit_cube(&mut self) -> BackendResult<()> {
        let target = self.draw_target()?;
        let (_, program) = self.current_program()?;
        if !program.kind.draws_cube() {
            return Err(BackendError::InvalidOperation(format!(
                "program '{}' does not draw the unit cube",
                program.label
            )));
        }
        let sampler_unit = program.sampler_unit.unwrap_or(TextureUnit(0));
        if self.sampled_texture(program)?.is_some()
            && self.bound_texture(sampler_unit) == Some(target.texture)
        {
            return Err(BackendError::InvalidOperation(format!(
                "program '{}' samples the texture it renders to",
                program.label
            )));
        }

        let kind = program.kind;
        let uniforms = program.uniforms;
        let view_projection = uniforms.projection() * uniforms.view();
        let inverse = view_projection.inverse();
        let seamless = self.seamless_cubemap;

        self.rasterize(&target, move |ctx, x, y, vw, vh| {
            let ndc = Vec2::new(
                2.0 * (x as f32 + 0.5) / vw as f32 - 1.0,
                1.0 - 2.0 * (y as f32 + 0.5) / vh as f32,
            );
            let Some((local, depth)) = cube_hit(view_projection, inverse, ndc) else {
                return Ok(None);
            };
            if !(0.0..=1.0).contains(&depth) {
                return Ok(None);
            }

            let source = ctx
                .bound_texture(sampler_unit)
                .map(|handle| ctx.texture(handle))
                .transpose()?;
            let Some(source) = source else {
                return Ok(None);
            };
            let dir = local.normalize();
            let color = match kind {
                ProgramKind::EquirectToCubemap => {
                    source.sample_2d(kernels::equirect_uv(dir)).xyz()
                }
                ProgramKind::IrradianceConvolution => {
                    kernels::irradiance(dir, uniforms.sample_delta(), |d| {
                        source.sample_cube(d, 0.0, seamless).xyz()
                    })
                }
                ProgramKind::Prefilter => kernels::prefilter(
                    dir,
                    uniforms.roughness(),
                    uniforms.sample_count(),
                    uniforms.resolution(),
                    |d, lod| source.sample_cube(d, lod, seamless).xyz(),
                ),
                ProgramKind::BrdfIntegration => return Ok(None),
            };
            Ok(Some((depth, color.extend(1.0))))
        })
    }

    fn draw_unit_quad(&mut self) -> BackendResult<()> {
        let target = self.draw_target()?;
        let (_, program) = self.current_program()?;
        if program.kind != ProgramKind::BrdfIntegration {
            return Err(BackendError::InvalidOperation(format!(
                "program '{}' does not draw the unit quad",
                program.label
            )));
        }
        let sample_count = program.uniforms.sample_count();

        self.rasterize(&target, move |_, x, y, vw, vh| {
            let uv = Vec2::new(
                (x as f32 + 0.5) / vw as f32,
                (y as f32 + 0.5) / vh as f32,
            );
            let lut = kernels::integrate_brdf(uv.x, uv.y, sample_count);
            Ok(Some((0.0, Vec4::new(lut.x, lut.y, 0.0, 1.0))))
        })
    }

    fn enable_seamless_cubemap(&mut self) {
        self.seamless_cubemap = true;
    }

    fn set_depth_func(&mut self, func: CompareFunction) {
        self.depth_func = func;
    }
}

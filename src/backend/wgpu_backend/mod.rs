//! wgpu backend implementation
//!
//! Headless: no surface is created, every target is an offscreen texture.
//! Each draw is recorded into its own command buffer and submitted right
//! away, so uniform writes between draws land in order.

mod geometry;
mod mipmap;

use std::collections::HashMap;

use half::f16;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::shader::{CaptureUniforms, ProgramKind, ShaderProgram, UniformSlot};

use geometry::{UnitGeometry, CUBE_VERTEX_LAYOUT, QUAD_VERTEX_LAYOUT};
use mipmap::MipmapGenerator;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

struct GpuTexture {
    texture: wgpu::Texture,
    desc: TextureDescriptor,
}

struct DepthTarget {
    texture: wgpu::Texture,
    width: u32,
    height: u32,
}

#[derive(Default)]
struct Framebuffer {
    color: Option<AttachmentTarget>,
    depth: Option<RenderbufferHandle>,
}

struct GpuProgram {
    label: &'static str,
    kind: ProgramKind,
    module: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    uniform_buffer: wgpu::Buffer,
    uniforms: CaptureUniforms,
    sampler_unit: Option<TextureUnit>,
}

type PipelineKey = (u64, wgpu::TextureFormat, CompareFunction);

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,

    // Resource storage
    textures: HashMap<u64, GpuTexture>,
    framebuffers: HashMap<u64, Framebuffer>,
    renderbuffers: HashMap<u64, Option<DepthTarget>>,
    programs: HashMap<u64, GpuProgram>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    units: HashMap<u32, TextureHandle>,

    // Handle counters
    next_texture_id: u64,
    next_framebuffer_id: u64,
    next_renderbuffer_id: u64,
    next_program_id: u64,

    // Global state
    bound_framebuffer: Option<FramebufferHandle>,
    current_program: Option<ProgramHandle>,
    viewport: (u32, u32),
    depth_func: CompareFunction,
    seamless_cubemap: bool,

    geometry: UnitGeometry,
    sampler: wgpu::Sampler,
    mipmaps: MipmapGenerator,
}

impl WgpuBackend {
    fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Rg16Float => wgpu::TextureFormat::Rg16Float,
            TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        }
    }

    fn convert_compare_function(func: CompareFunction) -> wgpu::CompareFunction {
        match func {
            CompareFunction::Less => wgpu::CompareFunction::Less,
            CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
            CompareFunction::Always => wgpu::CompareFunction::Always,
        }
    }

    /// Create a headless backend on the first suitable adapter.
    pub fn new() -> BackendResult<Self> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> BackendResult<Self> {
        let backends = wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::all());
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed("No suitable adapter found".into()))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("IBL Bake Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let geometry = UnitGeometry::new(&device);
        let mipmaps = MipmapGenerator::new(&device);
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Capture Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            renderbuffers: HashMap::new(),
            programs: HashMap::new(),
            pipelines: HashMap::new(),
            units: HashMap::new(),
            next_texture_id: 1,
            next_framebuffer_id: 1,
            next_renderbuffer_id: 1,
            next_program_id: 1,
            bound_framebuffer: None,
            current_program: None,
            viewport: (0, 0),
            depth_func: CompareFunction::default(),
            seamless_cubemap: false,
            geometry,
            sampler,
            mipmaps,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    fn texture(&self, texture: TextureHandle) -> BackendResult<&GpuTexture> {
        self.textures.get(&texture.0).ok_or(BackendError::InvalidHandle {
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

    fn current_program(&self) -> BackendResult<(ProgramHandle, &GpuProgram)> {
        let handle = self
            .current_program
            .ok_or_else(|| BackendError::InvalidOperation("no program in use".into()))?;
        let program = self.programs.get(&handle.0).ok_or(BackendError::InvalidHandle {
            kind: "program",
            id: handle.0,
        })?;
        Ok((handle, program))
    }

    /// Run `f` inside a validation error scope and surface the error.
    fn with_validation<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> Result<T, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(error.to_string()),
            None => Ok(value),
        }
    }

    /// Color and depth views of the bound framebuffer, validated.
    fn target_views(&self) -> BackendResult<(wgpu::TextureView, wgpu::TextureView, wgpu::TextureFormat, (u32, u32))> {
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
        let depth_handle = framebuffer.depth.ok_or_else(|| {
            BackendError::InvalidOperation("framebuffer has no depth attachment".into())
        })?;

        let texture = self.texture(color.texture())?;
        let extent = texture.desc.mip_extent(color.mip());
        let depth = self
            .renderbuffers
            .get(&depth_handle.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "renderbuffer",
                id: depth_handle.0,
            })?
            .as_ref()
            .ok_or_else(|| {
                BackendError::InvalidOperation("depth renderbuffer has no storage".into())
            })?;
        if (depth.width, depth.height) != extent {
            return Err(BackendError::AttachmentSizeMismatch {
                attachment: extent,
                depth: (depth.width, depth.height),
            });
        }

        let color_view = texture.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Capture Color Attachment"),
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_mip_level: color.mip(),
            mip_level_count: Some(1),
            base_array_layer: color.layer(),
            array_layer_count: Some(1),
            ..Default::default()
        });
        let depth_view = depth.texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok((color_view, depth_view, texture.texture.format(), extent))
    }

    fn ensure_pipeline(
        &mut self,
        program: ProgramHandle,
        format: wgpu::TextureFormat,
    ) -> BackendResult<PipelineKey> {
        let key = (program.0, format, self.depth_func);
        if self.pipelines.contains_key(&key) {
            return Ok(key);
        }

        let gpu_program = self.programs.get(&program.0).ok_or(BackendError::InvalidHandle {
            kind: "program",
            id: program.0,
        })?;
        let vertex_layout = if gpu_program.kind.draws_cube() {
            CUBE_VERTEX_LAYOUT
        } else {
            QUAD_VERTEX_LAYOUT
        };
        let depth_compare = Self::convert_compare_function(self.depth_func);

        let pipeline = self
            .with_validation(|device| {
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(gpu_program.label),
                    layout: Some(&gpu_program.pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &gpu_program.module,
                        entry_point: "vs_main",
                        buffers: &[vertex_layout],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &gpu_program.module,
                        entry_point: "fs_main",
                        targets: &[Some(wgpu::ColorTargetState {
                            format,
                            blend: None,
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleList,
                        cull_mode: None,
                        ..Default::default()
                    },
                    depth_stencil: Some(wgpu::DepthStencilState {
                        format: DEPTH_FORMAT,
                        depth_write_enabled: true,
                        depth_compare,
                        stencil: wgpu::StencilState::default(),
                        bias: wgpu::DepthBiasState::default(),
                    }),
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                })
            })
            .map_err(|message| BackendError::ShaderCreationFailed {
                label: gpu_program.label.to_string(),
                message,
            })?;

        self.pipelines.insert(key, pipeline);
        Ok(key)
    }

    fn draw(&mut self, cube: bool) -> BackendResult<()> {
        let (color_view, depth_view, format, extent) = self.target_views()?;
        let (handle, program) = self.current_program()?;
        if program.kind.draws_cube() != cube {
            return Err(BackendError::InvalidOperation(format!(
                "program '{}' does not draw the unit {}",
                program.label,
                if cube { "cube" } else { "quad" }
            )));
        }

        let (vw, vh) = (self.viewport.0.min(extent.0), self.viewport.1.min(extent.1));
        if vw == 0 || vh == 0 {
            return Ok(());
        }

        let source_view = match program.kind.sampler_name() {
            Some(_) => {
                let unit = program.sampler_unit.unwrap_or(TextureUnit(0));
                let bound = self.bound_texture(unit).ok_or_else(|| {
                    BackendError::InvalidOperation(format!(
                        "program '{}' samples unit {} but nothing is bound",
                        program.label, unit.0
                    ))
                })?;
                let source = self.texture(bound)?;
                let dimension = if program.kind.samples_cube() {
                    TextureKind::Cube
                } else {
                    TextureKind::D2
                };
                if source.desc.kind != dimension {
                    return Err(BackendError::InvalidOperation(format!(
                        "program '{}' expects a {:?} texture on unit {}",
                        program.label, dimension, unit.0
                    )));
                }
                if source.desc.format == TextureFormat::Rgba32Float {
                    return Err(BackendError::InvalidOperation(
                        "Rgba32Float textures cannot be filtered".into(),
                    ));
                }
                Some(source.texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some("Capture Source"),
                    dimension: Some(match dimension {
                        TextureKind::Cube => wgpu::TextureViewDimension::Cube,
                        TextureKind::D2 => wgpu::TextureViewDimension::D2,
                    }),
                    ..Default::default()
                }))
            }
            None => None,
        };

        self.queue
            .write_buffer(&program.uniform_buffer, 0, bytemuck::bytes_of(&program.uniforms));

        let bind_group = {
            let mut entries = vec![wgpu::BindGroupEntry {
                binding: 0,
                resource: program.uniform_buffer.as_entire_binding(),
            }];
            if let Some(view) = &source_view {
                entries.push(wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(view),
                });
                entries.push(wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                });
            }
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(program.label),
                layout: &program.bind_group_layout,
                entries: &entries,
            })
        };

        let key = self.ensure_pipeline(handle, format)?;
        let pipeline = self.pipelines.get(&key).ok_or_else(|| {
            BackendError::InvalidOperation("pipeline cache miss".into())
        })?;
        let (vertex_buffer, vertex_count) = if cube {
            (&self.geometry.cube, self.geometry.cube_vertex_count)
        } else {
            (&self.geometry.quad, self.geometry.quad_vertex_count)
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Capture Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Capture Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_viewport(0.0, 0.0, vw as f32, vh as f32, 0.0, 1.0);
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, vertex_buffer.slice(..));
            pass.draw(0..vertex_count, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}

/// Pack RGBA texels into the byte layout of `format`.
fn encode_texels(format: TextureFormat, texels: &[[f32; 4]]) -> Vec<u8> {
    match format {
        TextureFormat::Rgba32Float => bytemuck::cast_slice(texels).to_vec(),
        TextureFormat::Rgba16Float | TextureFormat::Rg16Float => {
            let channels = format.channels();
            texels
                .iter()
                .flat_map(|texel| texel[..channels].iter().copied())
                .flat_map(|c| f16::from_f32(c).to_le_bytes())
                .collect()
        }
    }
}

/// Unpack one row of `format` bytes into RGBA texels.
fn decode_texels(format: TextureFormat, bytes: &[u8]) -> Vec<[f32; 4]> {
    let bpp = format.bytes_per_pixel() as usize;
    bytes
        .chunks_exact(bpp)
        .map(|texel| match format {
            TextureFormat::Rgba32Float => {
                let mut out = [0.0; 4];
                for (c, chunk) in out.iter_mut().zip(texel.chunks_exact(4)) {
                    *c = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                }
                out
            }
            TextureFormat::Rgba16Float | TextureFormat::Rg16Float => {
                let mut out = [0.0, 0.0, 0.0, 1.0];
                for (c, chunk) in out.iter_mut().zip(texel.chunks_exact(2)) {
                    *c = f16::from_le_bytes([chunk[0], chunk[1]]).to_f32();
                }
                out
            }
        })
        .collect()
}

impl RenderContext for WgpuBackend {
    fn backend_name(&self) -> &'static str {
        "wgpu"
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

        let texture = self
            .with_validation(|device| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: desc.label.as_deref(),
                    size: wgpu::Extent3d {
                        width: desc.width,
                        height: desc.height,
                        depth_or_array_layers: desc.kind.layers(),
                    },
                    mip_level_count: desc.mip_levels,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: Self::convert_texture_format(desc.format),
                    usage: wgpu::TextureUsages::TEXTURE_BINDING
                        | wgpu::TextureUsages::RENDER_ATTACHMENT
                        | wgpu::TextureUsages::COPY_SRC
                        | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                })
            })
            .map_err(BackendError::TextureCreationFailed)?;

        let id = self.next_texture_id;
        self.next_texture_id += 1;
        self.textures.insert(
            id,
            GpuTexture {
                texture,
                desc: desc.clone(),
            },
        );
        Ok(TextureHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, texels: &[[f32; 4]]) -> BackendResult<()> {
        let tex = self.texture(texture)?;
        if tex.desc.kind != TextureKind::D2 {
            return Err(BackendError::InvalidOperation(
                "texel upload is only supported for 2D textures".into(),
            ));
        }
        let expected = (tex.desc.width * tex.desc.height) as usize;
        if texels.len() != expected {
            return Err(BackendError::InvalidOperation(format!(
                "expected {} texels, got {}",
                expected,
                texels.len()
            )));
        }

        let data = encode_texels(tex.desc.format, texels);
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(tex.desc.width * tex.desc.format.bytes_per_pixel()),
                rows_per_image: Some(tex.desc.height),
            },
            wgpu::Extent3d {
                width: tex.desc.width,
                height: tex.desc.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn read_texture(
        &mut self,
        texture: TextureHandle,
        layer: u32,
        mip: u32,
    ) -> BackendResult<Vec<[f32; 4]>> {
        let tex = self.texture(texture)?;
        if layer >= tex.desc.kind.layers() || mip >= tex.desc.mip_levels {
            return Err(BackendError::ReadbackFailed(format!(
                "layer {} mip {} out of range",
                layer, mip
            )));
        }

        let (width, height) = tex.desc.mip_extent(mip);
        let format = tex.desc.format;
        let unpadded = width * format.bytes_per_pixel();
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: (padded * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &tex.texture,
                mip_level: mip,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| BackendError::DeviceLost)?
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?;

        let mut texels = Vec::with_capacity((width * height) as usize);
        {
            let data = slice.get_mapped_range();
            for row in data.chunks_exact(padded as usize) {
                texels.extend(decode_texels(format, &row[..unpadded as usize]));
            }
        }
        buffer.unmap();
        Ok(texels)
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) -> BackendResult<()> {
        let tex = self.textures.get(&texture.0).ok_or(BackendError::InvalidHandle {
            kind: "texture",
            id: texture.0,
        })?;
        if tex.desc.format == TextureFormat::Rgba32Float {
            return Err(BackendError::InvalidOperation(
                "Rgba32Float textures cannot be filtered".into(),
            ));
        }
        self.mipmaps
            .generate(&self.device, &self.queue, &tex.texture, &tex.desc);
        Ok(())
    }

    fn texture_info(&self, texture: TextureHandle) -> BackendResult<TextureDescriptor> {
        Ok(self.texture(texture)?.desc.clone())
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
        if let Some(tex) = self.textures.remove(&texture.0) {
            tex.texture.destroy();
        }
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
        self.renderbuffers.insert(id, None);
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
        if !self.renderbuffers.contains_key(&renderbuffer.0) {
            return Err(BackendError::InvalidHandle {
                kind: "renderbuffer",
                id: renderbuffer.0,
            });
        }
        if width == 0 || height == 0 {
            return Err(BackendError::RenderbufferCreationFailed(format!(
                "zero extent {}x{}",
                width, height
            )));
        }

        let texture = self
            .with_validation(|device| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("Capture Depth"),
                    size: wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: DEPTH_FORMAT,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                    view_formats: &[],
                })
            })
            .map_err(BackendError::RenderbufferCreationFailed)?;

        if let Some(Some(old)) = self.renderbuffers.insert(
            renderbuffer.0,
            Some(DepthTarget {
                texture,
                width,
                height,
            }),
        ) {
            old.texture.destroy();
        }
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
        let desc = &self.texture(target.texture())?.desc;
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
        let (color_view, depth_view, _, _) = self.target_views()?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Clear Encoder"),
            });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Clear Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: color[0] as f64,
                            g: color[1] as f64,
                            b: color[2] as f64,
                            a: color[3] as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn create_program(&mut self, program: &ShaderProgram) -> BackendResult<ProgramHandle> {
        let shader_error = |message: String| BackendError::ShaderCreationFailed {
            label: program.label.to_string(),
            message,
        };
        program.validate().map_err(shader_error)?;

        let source = program.source();
        let module = self
            .with_validation(|device| {
                device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(program.label),
                    source: wgpu::ShaderSource::Wgsl(source.into()),
                })
            })
            .map_err(shader_error)?;

        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: wgpu::BufferSize::new(
                    std::mem::size_of::<CaptureUniforms>() as u64
                ),
            },
            count: None,
        }];
        if program.kind.sampler_name().is_some() {
            let view_dimension = if program.kind.samples_cube() {
                wgpu::TextureViewDimension::Cube
            } else {
                wgpu::TextureViewDimension::D2
            };
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension,
                    multisampled: false,
                },
                count: None,
            });
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
        }

        let bind_group_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(program.label),
                entries: &entries,
            });
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(program.label),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });
        let uniform_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(program.label),
            size: std::mem::size_of::<CaptureUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let id = self.next_program_id;
        self.next_program_id += 1;
        self.programs.insert(
            id,
            GpuProgram {
                label: program.label,
                kind: program.kind,
                module,
                bind_group_layout,
                pipeline_layout,
                uniform_buffer,
                uniforms: CaptureUniforms::default(),
                sampler_unit: None,
            },
        );
        log::debug!("WgpuBackend: linked program '{}'", program.label);
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
        self.draw(true)
    }

    fn draw_unit_quad(&mut self) -> BackendResult<()> {
        self.draw(false)
    }

    fn enable_seamless_cubemap(&mut self) {
        // Cube sampling in wgpu always filters across faces.
        self.seamless_cubemap = true;
    }

    fn set_depth_func(&mut self, func: CompareFunction) {
        self.depth_func = func;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_texels_round_trip_through_bytes() {
        let texels = [[0.5, -2.0, 1024.0, 1.0], [0.0, 0.25, 3.0, 1.0]];
        let bytes = encode_texels(TextureFormat::Rgba16Float, &texels);
        assert_eq!(bytes.len(), 16);
        assert_eq!(decode_texels(TextureFormat::Rgba16Float, &bytes), texels);
    }

    #[test]
    fn test_rg_texels_fill_blue_and_alpha() {
        let bytes = encode_texels(TextureFormat::Rg16Float, &[[0.75, 0.125, 9.0, 9.0]]);
        assert_eq!(bytes.len(), 4);
        assert_eq!(
            decode_texels(TextureFormat::Rg16Float, &bytes),
            vec![[0.75, 0.125, 0.0, 1.0]]
        );
    }
}

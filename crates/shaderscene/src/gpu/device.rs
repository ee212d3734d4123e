use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use wgpu::naga::ShaderStage;
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;
use winit::window::Window;

use super::context::{GpuContext, DEPTH_FORMAT};
use crate::device::{FrameDraw, MeshId, ProgramDescriptor, ProgramId, RenderDevice};
use crate::error::{DeviceError, ProgramStage, ResourceExhaustedError};
use crate::shape::{Geometry, Vertex};
use crate::types::GpuPowerPreference;

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 3] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];

struct GpuProgram {
    label: String,
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

struct GpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

enum ScopeFailure {
    Memory(String),
    Validation(String),
}

/// [`RenderDevice`] drawing into a winit window through wgpu.
pub struct WgpuDevice {
    context: GpuContext,
    uniform_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    programs: HashMap<ProgramId, GpuProgram>,
    meshes: HashMap<MeshId, GpuMesh>,
    next_handle: u64,
}

impl WgpuDevice {
    pub fn new(window: Arc<Window>, gpu_power: GpuPowerPreference) -> Result<Self> {
        let size = window.inner_size();
        let context = GpuContext::new(window, size, gpu_power)?;

        let uniform_layout = context
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("scene uniform layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });
        let pipeline_layout = context
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("scene pipeline layout"),
                bind_group_layouts: &[&uniform_layout],
                push_constant_ranges: &[],
            });

        tracing::info!(adapter = %context.adapter_name, format = ?context.surface_format, "GPU ready");
        Ok(Self {
            context,
            uniform_layout,
            pipeline_layout,
            programs: HashMap::new(),
            meshes: HashMap::new(),
            next_handle: 1,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.context.adapter_name
    }

    fn next_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    /// Runs `create` inside out-of-memory and validation error scopes.
    fn guarded<T>(&self, create: impl FnOnce(&wgpu::Device) -> T) -> Result<T, ScopeFailure> {
        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(device);
        let validation = pollster::block_on(device.pop_error_scope());
        let memory = pollster::block_on(device.pop_error_scope());
        if let Some(err) = memory {
            return Err(ScopeFailure::Memory(err.to_string()));
        }
        if let Some(err) = validation {
            return Err(ScopeFailure::Validation(err.to_string()));
        }
        Ok(value)
    }

    fn shader_module(
        &self,
        label: &str,
        stage: ProgramStage,
        source: &str,
    ) -> Result<wgpu::ShaderModule, DeviceError> {
        let naga_stage = match stage {
            ProgramStage::Vertex => ShaderStage::Vertex,
            _ => ShaderStage::Fragment,
        };
        self.guarded(|device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Glsl {
                    shader: Cow::Owned(source.to_owned()),
                    stage: naga_stage,
                    defines: &[],
                },
            })
        })
        .map_err(|failure| scope_error(failure, stage, label))
    }
}

fn scope_error(failure: ScopeFailure, stage: ProgramStage, resource: &str) -> DeviceError {
    match failure {
        ScopeFailure::Memory(message) => ResourceExhaustedError {
            resource: resource.to_string(),
            message,
        }
        .into(),
        ScopeFailure::Validation(message) => DeviceError::Rejected { stage, message },
    }
}

impl RenderDevice for WgpuDevice {
    fn surface_size(&self) -> (u32, u32) {
        (self.context.size.width, self.context.size.height)
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.context.resize(PhysicalSize::new(width, height));
    }

    fn create_program(&mut self, descriptor: &ProgramDescriptor<'_>) -> Result<ProgramId, DeviceError> {
        let vertex_label = format!("{} vertex", descriptor.label);
        let fragment_label = format!("{} fragment", descriptor.label);
        let vertex_module =
            self.shader_module(&vertex_label, ProgramStage::Vertex, descriptor.vertex_glsl)?;
        let fragment_module =
            self.shader_module(&fragment_label, ProgramStage::Fragment, descriptor.fragment_glsl)?;

        let surface_format = self.context.surface_format;
        let depth = descriptor.depth;
        let created = self.guarded(|device| {
            let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(descriptor.label),
                size: descriptor.uniform_block_size,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(descriptor.label),
                layout: &self.uniform_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                }],
            });
            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(descriptor.label),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vertex_module,
                    entry_point: Some("main"),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &VERTEX_ATTRIBUTES,
                    }],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: depth.write,
                    depth_compare: if depth.test {
                        wgpu::CompareFunction::Less
                    } else {
                        wgpu::CompareFunction::Always
                    },
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &fragment_module,
                    entry_point: Some("main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: surface_format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview: None,
                cache: None,
            });
            (pipeline, uniform_buffer, bind_group)
        });
        let (pipeline, uniform_buffer, bind_group) =
            created.map_err(|failure| scope_error(failure, ProgramStage::Link, descriptor.label))?;

        let id = ProgramId(self.next_handle());
        self.programs.insert(
            id,
            GpuProgram {
                label: descriptor.label.to_string(),
                pipeline,
                uniform_buffer,
                bind_group,
            },
        );
        tracing::debug!(program = %id, label = descriptor.label, "created render pipeline");
        Ok(id)
    }

    fn release_program(&mut self, program: ProgramId) -> Result<(), DeviceError> {
        let entry = self
            .programs
            .remove(&program)
            .ok_or(DeviceError::UnknownHandle {
                kind: "program",
                id: program.raw(),
            })?;
        entry.uniform_buffer.destroy();
        tracing::trace!(program = %program, label = %entry.label, "released render pipeline");
        Ok(())
    }

    fn create_mesh(&mut self, geometry: &Geometry) -> Result<MeshId, DeviceError> {
        let index_count = u32::try_from(geometry.index_count()).map_err(|_| ResourceExhaustedError {
            resource: format!("{} mesh", geometry.label),
            message: format!("{} indices exceed the 32-bit index range", geometry.index_count()),
        })?;
        let (vertex_buffer, index_buffer) = self
            .guarded(|device| {
                let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(geometry.label),
                    contents: bytemuck::cast_slice(&geometry.vertices),
                    usage: wgpu::BufferUsages::VERTEX,
                });
                let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(geometry.label),
                    contents: bytemuck::cast_slice(&geometry.indices),
                    usage: wgpu::BufferUsages::INDEX,
                });
                (vertex_buffer, index_buffer)
            })
            .map_err(|failure| match failure {
                ScopeFailure::Memory(message) => DeviceError::from(ResourceExhaustedError {
                    resource: format!("{} mesh", geometry.label),
                    message,
                }),
                ScopeFailure::Validation(message) => DeviceError::Surface(message),
            })?;

        let id = MeshId(self.next_handle());
        self.meshes.insert(
            id,
            GpuMesh {
                vertex_buffer,
                index_buffer,
                index_count,
            },
        );
        Ok(id)
    }

    fn release_mesh(&mut self, mesh: MeshId) -> Result<(), DeviceError> {
        let entry = self.meshes.remove(&mesh).ok_or(DeviceError::UnknownHandle {
            kind: "mesh",
            id: mesh.raw(),
        })?;
        entry.vertex_buffer.destroy();
        entry.index_buffer.destroy();
        Ok(())
    }

    fn draw_frame(&mut self, frame: &FrameDraw<'_>) -> Result<(), DeviceError> {
        let mut resolved = Vec::with_capacity(frame.draws.len());
        for draw in &frame.draws {
            let program = self.programs.get(&draw.program).ok_or(DeviceError::UnknownHandle {
                kind: "program",
                id: draw.program.raw(),
            })?;
            let mesh = self.meshes.get(&draw.mesh).ok_or(DeviceError::UnknownHandle {
                kind: "mesh",
                id: draw.mesh.raw(),
            })?;
            resolved.push((program, mesh, draw.uniforms));
        }

        let surface_texture = match self.context.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                tracing::debug!("surface lost or outdated; reconfiguring and skipping frame");
                self.context.reconfigure();
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                tracing::debug!("surface timeout; retrying next frame");
                return Ok(());
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                return Err(ResourceExhaustedError {
                    resource: "surface texture".to_string(),
                    message: "out of memory".to_string(),
                }
                .into())
            }
            Err(other) => return Err(DeviceError::Surface(other.to_string())),
        };

        for (program, _, uniforms) in &resolved {
            self.context.queue.write_buffer(&program.uniform_buffer, 0, uniforms);
        }

        let view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("scene frame"),
            });
        {
            let [r, g, b, a] = frame.clear_color;
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("scene pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.context.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            for (program, mesh, _) in &resolved {
                pass.set_pipeline(&program.pipeline);
                pass.set_bind_group(0, &program.bind_group, &[]);
                pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..mesh.index_count, 0, 0..1);
            }
        }

        self.context.queue.submit(Some(encoder.finish()));
        surface_texture.present();
        Ok(())
    }

    fn live_programs(&self) -> usize {
        self.programs.len()
    }

    fn live_meshes(&self) -> usize {
        self.meshes.len()
    }

    fn release_all(&mut self) {
        for (_, program) in self.programs.drain() {
            program.uniform_buffer.destroy();
        }
        for (_, mesh) in self.meshes.drain() {
            mesh.vertex_buffer.destroy();
            mesh.index_buffer.destroy();
        }
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! WGPU SqrDiffMean kernel over RGBA device images.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use stm_tensor::{DType, Dims, ImagePacking};
use wgpu::{
    BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingResource, BindingType, Buffer, BufferUsages, CommandBuffer,
    CommandEncoder, CommandEncoderDescriptor, ComputePassDescriptor, ComputePipeline,
    ComputePipelineDescriptor, Device, PipelineLayoutDescriptor, Queue, ShaderStages,
    StorageTextureAccess, TextureFormat, TextureSampleType, TextureView, TextureViewDimension,
};

use crate::context::GpuContext;
use crate::error::Result;
use crate::image::texture_format;
use crate::util::{create_inline_module, specialise};

pub const SHADER: &str = include_str!("shaders/sqrdiff_mean.wgsl");
pub const FORMAT_TOKEN: &str = "$STORAGE_FORMAT";
pub const WORKGROUP_SIZE: u32 = 256;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct Params {
    pub batch: u32,
    pub height: u32,
    pub width: u32,
    pub channel_blocks: u32,
    pub inv_count: f32,
    pub _pad: [u32; 3],
}

impl Params {
    pub fn new(dims: Dims) -> Self {
        Self {
            batch: dims.batch as u32,
            height: dims.height as u32,
            width: dims.width as u32,
            channel_blocks: ImagePacking::default().channel_blocks(dims.channels) as u32,
            inv_count: 1.0 / dims.spatial() as f32,
            _pad: [0; 3],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// WGSL storage-format name for a texture format.
fn storage_format_name(format: TextureFormat) -> &'static str {
    match format {
        TextureFormat::Rgba16Float => "rgba16float",
        _ => "rgba32float",
    }
}

/// Kernel source with the output storage format filled in.
pub fn shader_source(dtype: DType) -> Result<String> {
    let format = texture_format(dtype)?;
    Ok(specialise(
        SHADER,
        "stm.sqrdiff_mean",
        &[(FORMAT_TOKEN, storage_format_name(format))],
    )?)
}

#[derive(Debug)]
pub struct Pipelines {
    pub bind_layout: BindGroupLayout,
    pub pipeline: Arc<ComputePipeline>,
    pub dtype: DType,
}

pub struct Builder<'a> {
    ctx: &'a GpuContext,
    dtype: DType,
}

impl<'a> Builder<'a> {
    pub fn new(ctx: &'a GpuContext) -> Self {
        Self {
            ctx,
            dtype: DType::F32,
        }
    }

    /// Image dtype the pipeline reads and writes.
    pub fn precision(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn build(self) -> Result<Pipelines> {
        let device = self.ctx.device();
        let format = texture_format(self.dtype)?;
        let sampled = |binding| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Texture {
                sample_type: TextureSampleType::Float { filterable: false },
                view_dimension: TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let bind_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("stm.backend.sqrdiff_mean.bind_layout"),
            entries: &[
                sampled(0),
                sampled(1),
                BindGroupLayoutEntry {
                    binding: 2,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::StorageTexture {
                        access: StorageTextureAccess::WriteOnly,
                        format,
                        view_dimension: TextureViewDimension::D2,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 3,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("stm.backend.sqrdiff_mean.pipeline_layout"),
            bind_group_layouts: &[&bind_layout],
            push_constant_ranges: &[],
        });

        let module = create_inline_module(
            device,
            self.ctx.shader_cache(),
            "stm.sqrdiff_mean",
            shader_source(self.dtype)?,
        )?;
        let pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("stm.sqrdiff_mean"),
            layout: Some(&pipeline_layout),
            module: module.as_ref(),
            entry_point: "main_cs",
            compilation_options: Default::default(),
        });

        Ok(Pipelines {
            bind_layout,
            pipeline: Arc::new(pipeline),
            dtype: self.dtype,
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Dispatch {
    pub channel_blocks: u32,
    pub batch: u32,
}

impl Dispatch {
    pub fn new(dims: Dims) -> Self {
        Self {
            channel_blocks: ImagePacking::default().channel_blocks(dims.channels) as u32,
            batch: dims.batch as u32,
        }
    }

    pub fn workgroups(&self) -> (u32, u32, u32) {
        (self.channel_blocks, self.batch, 1)
    }
}

/// Views and buffers bound by the kernel.
pub struct DispatchArgs<'a> {
    /// `[N, H, W, C]` image.
    pub input: &'a TextureView,
    /// `[N, 1, 1, C]` image.
    pub bias: &'a TextureView,
    /// `[N, 1, 1, C]` image receiving the means.
    pub output: &'a TextureView,
    pub params: &'a Buffer,
}

/// Encode the reduction into an existing command encoder.
pub fn encode_into(
    device: &Device,
    encoder: &mut CommandEncoder,
    pipelines: &Pipelines,
    args: &DispatchArgs<'_>,
    dispatch: Dispatch,
) -> bool {
    let (workgroups_x, workgroups_y, workgroups_z) = dispatch.workgroups();
    if workgroups_x == 0 || workgroups_y == 0 || workgroups_z == 0 {
        return false;
    }

    let bind_group = device.create_bind_group(&BindGroupDescriptor {
        label: Some("stm.sqrdiff_mean.bind_group"),
        layout: &pipelines.bind_layout,
        entries: &[
            BindGroupEntry {
                binding: 0,
                resource: BindingResource::TextureView(args.input),
            },
            BindGroupEntry {
                binding: 1,
                resource: BindingResource::TextureView(args.bias),
            },
            BindGroupEntry {
                binding: 2,
                resource: BindingResource::TextureView(args.output),
            },
            BindGroupEntry {
                binding: 3,
                resource: args.params.as_entire_binding(),
            },
        ],
    });

    let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
        label: Some("stm.sqrdiff_mean.pass"),
        timestamp_writes: None,
    });
    pass.set_pipeline(&pipelines.pipeline);
    pass.set_bind_group(0, &bind_group, &[]);
    pass.dispatch_workgroups(workgroups_x, workgroups_y, workgroups_z);
    true
}

/// Encode the reduction into a new command buffer.
pub fn encode(
    device: &Device,
    pipelines: &Pipelines,
    args: &DispatchArgs<'_>,
    dispatch: Dispatch,
) -> Option<CommandBuffer> {
    let mut encoder = device.create_command_encoder(&CommandEncoderDescriptor {
        label: Some("stm.sqrdiff_mean.encoder"),
    });

    if encode_into(device, &mut encoder, pipelines, args, dispatch) {
        Some(encoder.finish())
    } else {
        None
    }
}

/// Submit the reduction without waiting for it to finish.
pub fn dispatch(
    device: &Device,
    queue: &Queue,
    pipelines: &Pipelines,
    args: &DispatchArgs<'_>,
    dispatch: Dispatch,
) -> bool {
    if let Some(cmd) = encode(device, pipelines, args, dispatch) {
        queue.submit(Some(cmd));
        true
    } else {
        false
    }
}

/// Allocates and fills the uniform buffer. Allocation failures come back as
/// errors instead of reaching the uncaptured-error handler.
pub fn upload_params(ctx: &GpuContext, params: &Params) -> Result<Buffer> {
    let buffer = ctx.scoped(|device| {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("stm.backend.sqrdiff_mean.params"),
            size: std::mem::size_of::<Params>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    })?;
    ctx.queue().write_buffer(&buffer, 0, params.as_bytes());
    Ok(buffer)
}

pub fn create_pipelines(ctx: &GpuContext, dtype: DType) -> Result<Pipelines> {
    Builder::new(ctx).precision(dtype).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_layout_is_32_bytes() {
        assert_eq!(std::mem::size_of::<Params>(), 32);
    }

    #[test]
    fn params_follow_logical_dims() {
        let params = Params::new(Dims::new(4, 128, 128, 3));
        assert_eq!(params.channel_blocks, 1);
        assert_eq!(params.inv_count, 1.0 / 16384.0);
        let params = Params::new(Dims::new(8, 256, 256, 64));
        assert_eq!(params.channel_blocks, 16);
    }

    #[test]
    fn dispatch_covers_blocks_and_batches() {
        let dispatch = Dispatch::new(Dims::new(4, 2, 2, 9));
        assert_eq!(dispatch.workgroups(), (3, 4, 1));
    }

    #[test]
    fn shader_is_specialised_per_dtype() {
        assert!(shader_source(DType::F32).unwrap().contains("texture_storage_2d<rgba32float, write>"));
        assert!(shader_source(DType::F16).unwrap().contains("texture_storage_2d<rgba16float, write>"));
        assert!(shader_source(DType::I32).is_err());
    }

    #[test]
    fn workgroup_size_matches_shader() {
        assert!(SHADER.contains(&format!("@workgroup_size({WORKGROUP_SIZE})")));
    }
}

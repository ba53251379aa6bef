// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Device images: RGBA textures holding image-packed tensors.

use bytemuck::Pod;
use stm_tensor::{
    pack_image, unpack_image, DType, DataFormat, Dims, ImagePacking, ImageShape, Tensor,
    TensorData, TensorDesc, TensorError, DEFAULT_SLOT_WIDTH,
};
use tracing::trace;
use wgpu::{
    BufferUsages, Extent3d, ImageCopyBuffer, ImageCopyTexture, ImageDataLayout, MapMode,
    Origin3d, Texture, TextureAspect, TextureFormat, TextureUsages, TextureView,
};

use crate::context::GpuContext;
use crate::error::{GpuError, Result};

/// Texture format used to store images of `dtype`.
pub fn texture_format(dtype: DType) -> Result<TextureFormat> {
    match dtype {
        DType::F32 => Ok(TextureFormat::Rgba32Float),
        DType::F16 => Ok(TextureFormat::Rgba16Float),
        other => Err(TensorError::UnsupportedDtype {
            dtype: other,
            context: "device image",
        }
        .into()),
    }
}

#[derive(Debug)]
pub struct DeviceImage {
    texture: Texture,
    view: TextureView,
    dims: Dims,
    dtype: DType,
    shape: ImageShape,
}

impl DeviceImage {
    /// Allocate an uninitialised image for a logical NHWC tensor.
    ///
    /// Extents beyond `max_texture_dimension_2d` and allocation failures are
    /// both reported as [`GpuError::OutOfMemory`].
    pub fn allocate(ctx: &GpuContext, dims: Dims, dtype: DType) -> Result<Self> {
        let format = texture_format(dtype)?;
        let shape = ImagePacking::default().image_shape(dims);
        let max = ctx.limits().max_texture_dimension_2d as usize;
        if shape.width > max || shape.height > max {
            return Err(GpuError::OutOfMemory(format!(
                "image of {}x{} pixels exceeds the {max} pixel texture limit",
                shape.width, shape.height
            )));
        }
        let extent = Extent3d {
            width: shape.width as u32,
            height: shape.height as u32,
            depth_or_array_layers: 1,
        };
        let texture = ctx.scoped(|device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some("stm.backend.image"),
                size: extent,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: TextureUsages::TEXTURE_BINDING
                    | TextureUsages::STORAGE_BINDING
                    | TextureUsages::COPY_SRC
                    | TextureUsages::COPY_DST,
                view_formats: &[],
            })
        })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Self {
            texture,
            view,
            dims,
            dtype,
            shape,
        })
    }

    /// Upload a host tensor that is already in RGBA image layout.
    pub fn upload(ctx: &GpuContext, host: &Tensor) -> Result<Self> {
        match host.format() {
            DataFormat::Image(packing) if packing.slot_width() == DEFAULT_SLOT_WIDTH => {}
            DataFormat::Image(packing) => {
                return Err(GpuError::UnsupportedPacking(packing.slot_width()))
            }
            other => {
                return Err(TensorError::Shape(format!(
                    "device upload expects an image-layout tensor, got {other:?}"
                ))
                .into())
            }
        }
        let dims = host.desc().dims()?;
        let image = Self::allocate(ctx, dims, host.dtype())?;
        let bytes: &[u8] = match host.data() {
            TensorData::F32(values) => bytemuck::cast_slice(values),
            TensorData::F16(values) => bytemuck::cast_slice(values),
            TensorData::I32(_) => {
                return Err(TensorError::UnsupportedDtype {
                    dtype: DType::I32,
                    context: "device image",
                }
                .into())
            }
        };
        ctx.queue().write_texture(
            ImageCopyTexture {
                texture: &image.texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            bytes,
            ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(image.unpadded_row_bytes() as u32),
                rows_per_image: Some(image.shape.height as u32),
            },
            image.extent(),
        );
        trace!(
            width = image.shape.width,
            height = image.shape.height,
            dtype = %image.dtype,
            "uploaded device image"
        );
        Ok(image)
    }

    /// Copy the image back into a host tensor in RGBA image layout.
    ///
    /// Waits for all queued work touching the texture.
    pub fn download(&self, ctx: &GpuContext) -> Result<Tensor> {
        let bytes = self.read_texture_bytes(ctx)?;
        let data = match self.dtype {
            DType::F32 => TensorData::F32(cast_bytes(&bytes)),
            DType::F16 => TensorData::F16(cast_bytes(&bytes)),
            DType::I32 => {
                return Err(TensorError::UnsupportedDtype {
                    dtype: DType::I32,
                    context: "device image",
                }
                .into())
            }
        };
        let desc = TensorDesc::from_dims(
            self.dims,
            DataFormat::Image(ImagePacking::default()),
            self.dtype,
        );
        Ok(Tensor::new(desc, data)?)
    }

    fn read_texture_bytes(&self, ctx: &GpuContext) -> Result<Vec<u8>> {
        let unpadded = self.unpadded_row_bytes();
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize;
        let padded = (unpadded + align - 1) / align * align;
        let rows = self.shape.height;

        let staging = ctx.scoped(|device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("stm.backend.image.readback"),
                size: (padded * rows) as u64,
                usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })?;
        let mut encoder = ctx
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("stm.backend.image.readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            ImageCopyBuffer {
                buffer: &staging,
                layout: ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded as u32),
                    rows_per_image: Some(rows as u32),
                },
            },
            self.extent(),
        );
        ctx.queue().submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        slice.map_async(MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        ctx.device().poll(wgpu::Maintain::Wait);
        futures_lite::future::block_on(async {
            receiver
                .receive()
                .await
                .ok_or_else(|| GpuError::Readback("map_async was cancelled".to_string()))?
                .map_err(|err| GpuError::Readback(err.to_string()))
        })?;

        let mapped = slice.get_mapped_range();
        let mut bytes = Vec::with_capacity(unpadded * rows);
        for row in mapped.chunks(padded) {
            bytes.extend_from_slice(&row[..unpadded]);
        }
        drop(mapped);
        staging.unmap();
        Ok(bytes)
    }

    fn unpadded_row_bytes(&self) -> usize {
        self.shape.width * DEFAULT_SLOT_WIDTH * self.dtype.size_of()
    }

    pub fn extent(&self) -> Extent3d {
        Extent3d {
            width: self.shape.width as u32,
            height: self.shape.height as u32,
            depth_or_array_layers: 1,
        }
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn image_shape(&self) -> ImageShape {
        self.shape
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn view(&self) -> &TextureView {
        &self.view
    }
}

fn cast_bytes<T: Pod>(bytes: &[u8]) -> Vec<T> {
    let mut out = vec![T::zeroed(); bytes.len() / std::mem::size_of::<T>()];
    bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(bytes);
    out
}

/// Narrow `tensor` to `precision`, pack it and upload it as a device image.
pub fn buffer_to_image(ctx: &GpuContext, tensor: &Tensor, precision: DType) -> Result<DeviceImage> {
    texture_format(precision)?;
    let narrowed = tensor.cast(precision)?;
    let host = pack_image(&narrowed, ImagePacking::default())?;
    DeviceImage::upload(ctx, &host)
}

/// Download `image` and unpack it into an NHWC tensor of the image's dtype.
pub fn image_to_buffer(ctx: &GpuContext, image: &DeviceImage) -> Result<Tensor> {
    Ok(unpack_image(&image.download(ctx)?)?)
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Executor over RGBA device images.

use std::sync::Arc;

use stm_backend_wgpu::sqrdiff_mean::{self, Dispatch, DispatchArgs, Params, Pipelines};
use stm_backend_wgpu::{buffer_to_image, image_to_buffer, texture_format, DeviceImage, GpuContext};
use stm_tensor::{DType, Dims, Tensor};
use tracing::trace;

use crate::error::{OpError, Result};
use crate::executor::{DeviceKind, Executor};

pub struct GpuExecutor {
    context: Arc<GpuContext>,
    pipelines: Pipelines,
    precision: DType,
}

impl GpuExecutor {
    /// Compile the kernel for images of `precision` (`F32` or `F16`).
    pub fn new(context: Arc<GpuContext>, precision: DType) -> Result<Self> {
        texture_format(precision)?;
        let pipelines =
            context.scoped(|_| sqrdiff_mean::create_pipelines(&context, precision))??;
        Ok(Self {
            context,
            pipelines,
            precision,
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    pub fn precision(&self) -> DType {
        self.precision
    }

    /// Narrow, pack and upload a planar host tensor.
    pub fn upload(&self, tensor: &Tensor) -> Result<DeviceImage> {
        Ok(buffer_to_image(&self.context, tensor, self.precision)?)
    }

    /// Download and unpack an image into an NHWC tensor of the image dtype.
    pub fn download(&self, image: &DeviceImage) -> Result<Tensor> {
        Ok(image_to_buffer(&self.context, image)?)
    }
}

impl Executor for GpuExecutor {
    type Operand = DeviceImage;

    fn device(&self) -> DeviceKind {
        DeviceKind::Gpu
    }

    /// Submits the reduction and returns the output image without waiting.
    fn execute(&self, input: &DeviceImage, bias: &DeviceImage) -> Result<DeviceImage> {
        for image in [input, bias] {
            if image.dtype() != self.precision {
                return Err(OpError::UnsupportedDtype {
                    dtype: image.dtype(),
                    context: "a GPU executor bound at another precision",
                });
            }
        }
        let dims = input.dims();
        let bias_dims = bias.dims();
        if bias_dims != Dims::new(dims.batch, 1, 1, dims.channels) {
            return Err(OpError::Shape(format!(
                "bias image {:?} does not broadcast against {:?}",
                bias_dims.nhwc(),
                dims.nhwc()
            )));
        }

        let out_dims = Dims::new(dims.batch, 1, 1, dims.channels);
        let output = DeviceImage::allocate(&self.context, out_dims, self.precision)?;
        let params = sqrdiff_mean::upload_params(&self.context, &Params::new(dims))?;
        let args = DispatchArgs {
            input: input.view(),
            bias: bias.view(),
            output: output.view(),
            params: &params,
        };
        let dispatch = Dispatch::new(dims);
        let submitted = self.context.scoped(|device| {
            sqrdiff_mean::dispatch(device, self.context.queue(), &self.pipelines, &args, dispatch)
        })?;
        trace!(
            workgroups = ?dispatch.workgroups(),
            submitted,
            "sqrdiff_mean dispatched"
        );
        Ok(output)
    }

    fn sync(&self) -> Result<()> {
        self.context.sync();
        Ok(())
    }
}

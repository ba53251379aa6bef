// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Host executor over planar tensors.

use std::borrow::Cow;

use rayon::current_num_threads;
use rayon::prelude::*;
use stm_config::lock_reduction_order;
use stm_tensor::{validate_bias_pair, DType, DataFormat, Dims, Tensor, TensorData, TensorDesc};

use crate::error::{OpError, Result};
use crate::executor::{DeviceKind, Executor};

const PARALLEL_ELEMENT_THRESHOLD: usize = 1 << 16;

#[derive(Clone, Copy, Debug, Default)]
pub struct CpuExecutor;

impl CpuExecutor {
    pub fn new() -> Self {
        Self
    }
}

fn should_parallelize(planes: usize, plane: usize) -> bool {
    if planes <= 1 || current_num_threads() <= 1 {
        return false;
    }
    planes.saturating_mul(plane) >= PARALLEL_ELEMENT_THRESHOLD
}

/// Rayon is used only when the work is large enough and the reduction order
/// is not pinned.
fn use_parallel(planes: usize, plane: usize, locked: bool) -> bool {
    !locked && should_parallelize(planes, plane)
}

/// Where each `(batch, channel)` plane lives in planar storage.
#[derive(Clone, Copy, Debug)]
struct PlaneWalk {
    channels: usize,
    spatial: usize,
    channel_major: bool,
}

impl PlaneWalk {
    fn new(dims: Dims, format: DataFormat) -> Self {
        Self {
            channels: dims.channels,
            spatial: dims.spatial(),
            channel_major: format == DataFormat::Nchw,
        }
    }

    /// First element and element stride of plane `index = n * C + c`.
    fn origin(&self, index: usize) -> (usize, usize) {
        if self.channel_major {
            (index * self.spatial, 1)
        } else {
            let (n, c) = (index / self.channels, index % self.channels);
            (n * self.spatial * self.channels + c, self.channels)
        }
    }

    fn mean(&self, values: &[f32], index: usize, bias: f32) -> f32 {
        let (origin, stride) = self.origin(index);
        let mut acc = 0.0f32;
        for &v in values[origin..].iter().step_by(stride).take(self.spatial) {
            let d = v - bias;
            acc += d * d;
        }
        acc / self.spatial as f32
    }
}

fn reduce_serial(values: &[f32], bias: &[f32], walk: PlaneWalk) -> Vec<f32> {
    bias.iter()
        .enumerate()
        .map(|(index, &b)| walk.mean(values, index, b))
        .collect()
}

fn reduce_parallel(values: &[f32], bias: &[f32], walk: PlaneWalk) -> Vec<f32> {
    bias.par_iter()
        .enumerate()
        .map(|(index, &b)| walk.mean(values, index, b))
        .collect()
}

/// Per-(batch, channel) means, in `[N, C]` order.
///
/// Every plane is reduced sequentially in `(h, w)` order whatever the layout,
/// so the parallel split only changes which thread computes a plane, never
/// the summation order.
fn sqrdiff_mean_planes(values: &[f32], bias: &[f32], walk: PlaneWalk) -> Vec<f32> {
    if use_parallel(bias.len(), walk.spatial, lock_reduction_order()) {
        reduce_parallel(values, bias, walk)
    } else {
        reduce_serial(values, bias, walk)
    }
}

/// Borrows `f32` storage, widening halves into a fresh buffer.
fn f32_view(tensor: &Tensor) -> Result<Cow<'_, [f32]>> {
    match tensor.as_f32() {
        Some(values) => Ok(Cow::Borrowed(values)),
        None => Ok(Cow::Owned(tensor.to_f32_vec()?)),
    }
}

impl Executor for CpuExecutor {
    type Operand = Tensor;

    fn device(&self) -> DeviceKind {
        DeviceKind::Cpu
    }

    /// Accepts `Nhwc` or `Nchw` operands, read in place, and answers in the
    /// input's layout. Half inputs are accumulated in `f32` and rounded once
    /// at the end.
    fn execute(&self, input: &Tensor, bias: &Tensor) -> Result<Tensor> {
        let dims = validate_bias_pair(input.desc(), bias.desc())?;
        let dtype = input.dtype();
        if !dtype.is_float() {
            return Err(OpError::UnsupportedDtype {
                dtype,
                context: "the CPU executor",
            });
        }
        let format = input.format();
        if !format.is_planar() || !bias.format().is_planar() {
            return Err(OpError::Shape(format!(
                "the CPU executor reads planar tensors, got {:?} and {:?}",
                format,
                bias.format()
            )));
        }
        // [N, 1, 1, C] and [N, C, 1, 1] share one flat order.
        let values = f32_view(input)?;
        let bias_values = f32_view(bias)?;

        let means = sqrdiff_mean_planes(&values, &bias_values, PlaneWalk::new(dims, format));

        let out_dims = Dims::new(dims.batch, 1, 1, dims.channels);
        let output = Tensor::new(
            TensorDesc::from_dims(out_dims, format, DType::F32),
            TensorData::F32(means),
        )?;
        Ok(output.cast(dtype)?)
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stm_tensor::f16;

    #[test]
    fn known_small_tensor() {
        let input = Tensor::from_f32(vec![1, 2, 2, 1], DataFormat::Nhwc, vec![1.0, 2.0, 3.0, 4.0])
            .unwrap();
        let bias = Tensor::from_f32(vec![1, 1, 1, 1], DataFormat::Nhwc, vec![2.0]).unwrap();
        let out = CpuExecutor::new().execute(&input, &bias).unwrap();
        assert_eq!(out.shape(), &[1, 1, 1, 1]);
        assert_eq!(out.as_f32().unwrap(), &[1.5]);
    }

    #[test]
    fn nchw_operands_answer_in_nchw() {
        // channel 0 = [0, 2], channel 1 = [1, 5]
        let input =
            Tensor::from_f32(vec![1, 2, 1, 2], DataFormat::Nchw, vec![0.0, 2.0, 1.0, 5.0]).unwrap();
        let bias = Tensor::from_f32(vec![1, 2, 1, 1], DataFormat::Nchw, vec![1.0, 3.0]).unwrap();
        let out = CpuExecutor::new().execute(&input, &bias).unwrap();
        assert_eq!(out.format(), DataFormat::Nchw);
        assert_eq!(out.shape(), &[1, 2, 1, 1]);
        assert_eq!(out.as_f32().unwrap(), &[1.0, 4.0]);
    }

    #[test]
    fn half_inputs_return_half() {
        let input = Tensor::from_f16(
            vec![1, 1, 2, 1],
            DataFormat::Nhwc,
            vec![f16::from_f32(1.0), f16::from_f32(3.0)],
        )
        .unwrap();
        let bias =
            Tensor::from_f16(vec![1, 1, 1, 1], DataFormat::Nhwc, vec![f16::from_f32(1.0)]).unwrap();
        let out = CpuExecutor::new().execute(&input, &bias).unwrap();
        assert_eq!(out.dtype(), DType::F16);
        assert_eq!(out.as_f16().unwrap(), &[f16::from_f32(2.0)]);
    }

    #[test]
    fn integer_operands_are_rejected() {
        let input = Tensor::from_i32(vec![1, 1, 1, 1], DataFormat::Nhwc, vec![1]).unwrap();
        let err = CpuExecutor::new().execute(&input, &input).unwrap_err();
        assert!(matches!(err, OpError::UnsupportedDtype { dtype: DType::I32, .. }));
    }

    fn ramp(len: usize, step: usize, scale: f32) -> Vec<f32> {
        (0..len).map(|i| ((i * step) % 101) as f32 * scale).collect()
    }

    #[test]
    fn parallel_and_serial_paths_agree_bitwise() {
        let dims = Dims::new(3, 16, 17, 100);
        let values = ramp(dims.element_count(), 37, 0.013);
        let bias = ramp(dims.batch * dims.channels, 7, 0.007);
        for format in [DataFormat::Nhwc, DataFormat::Nchw] {
            let walk = PlaneWalk::new(dims, format);
            let serial = reduce_serial(&values, &bias, walk);
            let parallel = reduce_parallel(&values, &bias, walk);
            assert_eq!(
                serial.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
                parallel.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
            );
        }
    }

    #[test]
    fn nhwc_and_nchw_walks_sum_in_the_same_order() {
        let dims = Dims::new(2, 5, 7, 6);
        let nhwc = Tensor::from_f32(
            dims.nhwc().to_vec(),
            DataFormat::Nhwc,
            ramp(dims.element_count(), 13, 0.11),
        )
        .unwrap();
        let nchw = stm_tensor::to_device_native(&nhwc, DataFormat::Nchw).unwrap();
        let bias = ramp(dims.batch * dims.channels, 3, 0.5);
        let a = reduce_serial(nhwc.as_f32().unwrap(), &bias, PlaneWalk::new(dims, DataFormat::Nhwc));
        let b = reduce_serial(nchw.as_f32().unwrap(), &bias, PlaneWalk::new(dims, DataFormat::Nchw));
        assert_eq!(
            a.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            b.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn locked_reduction_order_stays_serial() {
        assert!(!use_parallel(1 << 12, 1 << 12, true));
        assert!(!use_parallel(1, 1 << 20, false));
        assert!(!use_parallel(4, 4, false));
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Operator dispatcher: binds SqrDiffMean to one device and hides that
//! device's layout from callers.
//!
//! Callers always hand in planar tensors (`Nhwc` or `Nchw`) and always get a
//! packed `Nhwc` `[N, 1, 1, C]` tensor back in the input dtype.

#[cfg(feature = "wgpu")]
use std::sync::Arc;

#[cfg(feature = "wgpu")]
use stm_backend_wgpu::GpuContext;
#[cfg(feature = "wgpu")]
use stm_tensor::DType;
use stm_tensor::{validate_bias_pair, DataFormat, Dims, Tensor, TensorDesc};
use tracing::{debug, trace, warn};

use crate::cpu::CpuExecutor;
use crate::error::{OpError, Result};
use crate::executor::{DeviceKind, Executor};
#[cfg(feature = "wgpu")]
use crate::gpu::GpuExecutor;

/// Device selected at bind time.
#[derive(Clone, Debug)]
pub enum DeviceBinding {
    Cpu,
    /// `precision` is the dtype of the device images (`F32` or `F16`).
    #[cfg(feature = "wgpu")]
    Gpu {
        context: Arc<GpuContext>,
        precision: DType,
    },
}

impl DeviceBinding {
    #[cfg(feature = "wgpu")]
    pub fn gpu(context: Arc<GpuContext>) -> Self {
        DeviceBinding::Gpu {
            context,
            precision: DType::F32,
        }
    }

    #[cfg(feature = "wgpu")]
    pub fn gpu_half(context: Arc<GpuContext>) -> Self {
        DeviceBinding::Gpu {
            context,
            precision: DType::F16,
        }
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            DeviceBinding::Cpu => DeviceKind::Cpu,
            #[cfg(feature = "wgpu")]
            DeviceBinding::Gpu { .. } => DeviceKind::Gpu,
        }
    }
}

/// What to do when the bound GPU cannot complete an invocation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Return the device error to the caller.
    #[default]
    Surface,
    /// Re-run out-of-memory and unavailable-device failures on the CPU.
    Cpu,
}

enum Backend {
    Cpu(CpuExecutor),
    #[cfg(feature = "wgpu")]
    Gpu(GpuExecutor),
}

impl Backend {
    fn kind(&self) -> DeviceKind {
        match self {
            Backend::Cpu(exec) => exec.device(),
            #[cfg(feature = "wgpu")]
            Backend::Gpu(exec) => exec.device(),
        }
    }
}

enum State {
    Unbound,
    Bound(Backend),
}

pub struct OperatorDispatcher {
    state: State,
    fallback: FallbackPolicy,
}

impl Default for OperatorDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl OperatorDispatcher {
    pub fn new() -> Self {
        Self {
            state: State::Unbound,
            fallback: FallbackPolicy::default(),
        }
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    /// Dispatcher already bound to the CPU.
    pub fn cpu() -> Self {
        Self {
            state: State::Bound(Backend::Cpu(CpuExecutor::new())),
            fallback: FallbackPolicy::default(),
        }
    }

    pub fn fallback(&self) -> FallbackPolicy {
        self.fallback
    }

    pub fn device(&self) -> Option<DeviceKind> {
        match &self.state {
            State::Unbound => None,
            State::Bound(backend) => Some(backend.kind()),
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.state, State::Bound(_))
    }

    /// Bind once. A failed bind leaves the dispatcher unbound.
    pub fn bind(&mut self, binding: DeviceBinding) -> Result<()> {
        if let State::Bound(backend) = &self.state {
            return Err(OpError::AlreadyBound(backend.kind()));
        }
        let backend = match binding {
            DeviceBinding::Cpu => Backend::Cpu(CpuExecutor::new()),
            #[cfg(feature = "wgpu")]
            DeviceBinding::Gpu { context, precision } => {
                Backend::Gpu(GpuExecutor::new(context, precision)?)
            }
        };
        debug!(device = %backend.kind(), fallback = ?self.fallback, "sqrdiff_mean bound");
        self.state = State::Bound(backend);
        Ok(())
    }

    fn backend(&self) -> Result<&Backend> {
        match &self.state {
            State::Unbound => Err(OpError::NotBound),
            State::Bound(backend) => Ok(backend),
        }
    }

    /// One synchronous invocation.
    ///
    /// Shapes and dtypes are checked before any device work; a failure leaves
    /// the dispatcher bound and usable.
    pub fn run(&mut self, input: &Tensor, bias: &Tensor) -> Result<Tensor> {
        let backend = self.backend()?;
        let dims = validate(input, bias)?;
        trace!(
            device = %backend.kind(),
            shape = ?dims.nhwc(),
            dtype = %input.dtype(),
            "sqrdiff_mean run"
        );
        match backend {
            Backend::Cpu(exec) => run_cpu(exec, input, bias),
            #[cfg(feature = "wgpu")]
            Backend::Gpu(exec) => match run_gpu(exec, input, bias) {
                Err(err) if self.fallback == FallbackPolicy::Cpu && err.is_device_failure() => {
                    warn!(error = %err, "GPU sqrdiff_mean failed, re-running on CPU");
                    run_cpu(&CpuExecutor::new(), input, bias)
                }
                other => other,
            },
        }
    }

    /// Wait for any deferred device work.
    pub fn sync(&self) -> Result<()> {
        match self.backend()? {
            Backend::Cpu(exec) => exec.sync(),
            #[cfg(feature = "wgpu")]
            Backend::Gpu(exec) => exec.sync(),
        }
    }
}

fn validate(input: &Tensor, bias: &Tensor) -> Result<Dims> {
    for (role, tensor) in [("input", input), ("bias", bias)] {
        if !tensor.format().is_planar() {
            return Err(OpError::Shape(format!(
                "{role} must be a planar Nhwc or Nchw tensor, got {:?}",
                tensor.format()
            )));
        }
    }
    let dims = validate_bias_pair(input.desc(), bias.desc())?;
    if !input.dtype().is_float() {
        return Err(OpError::UnsupportedDtype {
            dtype: input.dtype(),
            context: "SqrDiffMean",
        });
    }
    if bias.dtype() != input.dtype() {
        return Err(OpError::UnsupportedDtype {
            dtype: bias.dtype(),
            context: "a bias whose dtype differs from the input",
        });
    }
    Ok(dims)
}

/// The CPU executor reads either planar layout in place. Its `[N, C, 1, 1]`
/// answer for NCHW inputs has the same flat order as `[N, 1, 1, C]`, so only
/// the descriptor changes.
fn run_cpu(exec: &CpuExecutor, input: &Tensor, bias: &Tensor) -> Result<Tensor> {
    let output = exec.execute(input, bias)?;
    if output.format() == DataFormat::Nhwc {
        return Ok(output);
    }
    let (desc, data) = output.into_parts();
    let packed = TensorDesc::from_dims(desc.dims()?, DataFormat::Nhwc, desc.dtype());
    Ok(Tensor::new(packed, data)?)
}

#[cfg(feature = "wgpu")]
fn run_gpu(exec: &GpuExecutor, input: &Tensor, bias: &Tensor) -> Result<Tensor> {
    let input_image = exec.upload(input)?;
    let bias_image = exec.upload(bias)?;
    let output = exec.execute(&input_image, &bias_image)?;
    Ok(exec.download(&output)?.cast(input.dtype())?)
}

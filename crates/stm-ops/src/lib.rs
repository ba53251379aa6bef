// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Cross-device SqrDiffMean.
//!
//! ```text
//! output[b, 0, 0, c] = 1 / (H * W) * sum_{h, w} (input[b, h, w, c] - bias[b, 0, 0, c])^2
//! ```
//!
//! [`OperatorDispatcher`] is bound once to a CPU or GPU [`Executor`] and
//! converts between the caller's packed tensors and the executor's native
//! layout on every run.

pub mod cpu;
pub mod dispatcher;
pub mod error;
pub mod executor;
#[cfg(feature = "wgpu")]
pub mod gpu;
pub mod op_def;

pub use cpu::CpuExecutor;
pub use dispatcher::{DeviceBinding, FallbackPolicy, OperatorDispatcher};
pub use error::{OpError, Result};
pub use executor::{DeviceKind, Executor};
#[cfg(feature = "wgpu")]
pub use gpu::GpuExecutor;
pub use op_def::{OperatorDef, OperatorDefBuilder, SqrDiffMeanOp, Workspace, SQR_DIFF_MEAN};

// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use std::fmt;

use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Cpu,
    Gpu,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceKind::Cpu => "CPU",
            DeviceKind::Gpu => "GPU",
        })
    }
}

/// A device that can compute SqrDiffMean on its native operand layout.
///
/// `execute` may return before the device finishes; `sync` waits for every
/// pending invocation.
pub trait Executor {
    /// Device-native tensor handled by this executor.
    type Operand;

    fn device(&self) -> DeviceKind;

    /// `output[b, 0, 0, c] = mean_{h,w} (input[b, h, w, c] - bias[b, 0, 0, c])^2`
    fn execute(&self, input: &Self::Operand, bias: &Self::Operand) -> Result<Self::Operand>;

    fn sync(&self) -> Result<()>;
}

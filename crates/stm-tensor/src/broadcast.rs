// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Pairing rules for a primary tensor and its per-channel bias.

use crate::desc::{Dims, TensorDesc};
use crate::error::{shape, Result};

/// Checks that `bias` broadcasts against `input` over the spatial axes and
/// returns the input's logical dimensions.
///
/// The bias must be `[N, 1, 1, C]` in its own layout: batch and channel counts
/// equal to the input's, spatial extent exactly 1×1.
pub fn validate_bias_pair(input: &TensorDesc, bias: &TensorDesc) -> Result<Dims> {
    let dims = input.dims()?;
    let bias_dims = bias.dims()?;
    if bias_dims.height != 1 || bias_dims.width != 1 {
        return Err(shape(format!(
            "bias spatial extent must be 1x1, got {}x{}",
            bias_dims.height, bias_dims.width
        )));
    }
    if bias_dims.batch != dims.batch {
        return Err(shape(format!(
            "batch mismatch: input has {}, bias has {}",
            dims.batch, bias_dims.batch
        )));
    }
    if bias_dims.channels != dims.channels {
        return Err(shape(format!(
            "channel mismatch: input has {}, bias has {}",
            dims.channels, bias_dims.channels
        )));
    }
    Ok(dims)
}

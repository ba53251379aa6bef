// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! wgpu back-end for the SqrDiffMean operator.
//!
//! Device images are 2-D RGBA textures: every texel is one
//! 4-wide channel slot of the image packing defined in `stm-tensor`.

pub mod context;
pub mod error;
pub mod image;
pub mod sqrdiff_mean;
pub mod util;

pub use context::GpuContext;
pub use error::{GpuError, Result};
pub use image::{buffer_to_image, image_to_buffer, texture_format, DeviceImage};
pub use util::{create_inline_module, specialise, ShaderCache, ShaderLoadError};

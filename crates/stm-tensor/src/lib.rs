// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Host-side tensor model for the mobile operator stack.
//!
//! A [`Tensor`] is a 4-D array stored in one of three physical arrangements:
//! planar NHWC (the caller-facing packed layout), planar NCHW (the CPU
//! executor's native layout) and [`DataFormat::Image`], the host mirror of a
//! GPU image where channels are grouped into fixed-width pixel slots.
//! [`layout`] holds the transforms between them.

pub mod broadcast;
pub mod desc;
pub mod dtype;
pub mod error;
pub mod layout;
pub mod tensor;

pub use broadcast::validate_bias_pair;
pub use desc::{DataFormat, Dims, TensorDesc};
pub use dtype::DType;
pub use error::{Result, TensorError};
pub use layout::{
    pack_image, to_device_native, to_packed, transpose, unpack_image, ImagePacking, ImageShape,
    DEFAULT_SLOT_WIDTH,
};
pub use tensor::{Tensor, TensorData};

pub use half::f16;

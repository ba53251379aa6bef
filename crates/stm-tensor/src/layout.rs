// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Layout transforms between the packed caller-facing layout and the
//! device-native layouts.
//!
//! * Planar transforms (NHWC ⇄ NCHW) are pure index permutations.
//! * Image packing groups channels into `slot_width`-wide pixel slots.
//!   A logical `[N, H, W, C]` tensor becomes a grid of
//!   `W * ceil(C / slot)` × `N * H` pixels; pixel `(w * blocks + blk, n * H + h)`
//!   holds channels `blk * slot ..` of element `(n, h, w)` and channels past `C`
//!   are zero. Unpacking drops that padding.
//!
//! Every function here is referentially transparent.

use crate::desc::{DataFormat, Dims, TensorDesc};
use crate::error::{shape, unsupported, Result};
use crate::tensor::{Tensor, TensorData};

/// Channels per pixel slot used by RGBA images.
pub const DEFAULT_SLOT_WIDTH: usize = 4;

/// Channel grouping policy of an image layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImagePacking {
    slot_width: usize,
}

impl Default for ImagePacking {
    fn default() -> Self {
        Self {
            slot_width: DEFAULT_SLOT_WIDTH,
        }
    }
}

/// Pixel extent of a packed image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageShape {
    pub width: usize,
    pub height: usize,
}

impl ImageShape {
    pub const fn pixels(&self) -> usize {
        self.width * self.height
    }
}

impl ImagePacking {
    pub fn new(slot_width: usize) -> Result<Self> {
        if slot_width == 0 {
            return Err(shape("image slot width must be positive"));
        }
        Ok(Self { slot_width })
    }

    pub const fn slot_width(&self) -> usize {
        self.slot_width
    }

    pub const fn channel_blocks(&self, channels: usize) -> usize {
        (channels + self.slot_width - 1) / self.slot_width
    }

    pub const fn image_shape(&self, dims: Dims) -> ImageShape {
        ImageShape {
            width: dims.width * self.channel_blocks(dims.channels),
            height: dims.batch * dims.height,
        }
    }

    /// Stored scalars including zero padding.
    pub const fn storage_len(&self, dims: Dims) -> usize {
        self.image_shape(dims).pixels() * self.slot_width
    }
}

fn nhwc_to_nchw<T: Copy>(src: &[T], dims: Dims) -> Vec<T> {
    let Dims {
        batch,
        height,
        width,
        channels,
    } = dims;
    let plane = height * width;
    let mut out = Vec::with_capacity(src.len());
    for n in 0..batch {
        let base = n * plane * channels;
        for c in 0..channels {
            for p in 0..plane {
                out.push(src[base + p * channels + c]);
            }
        }
    }
    out
}

fn nchw_to_nhwc<T: Copy>(src: &[T], dims: Dims) -> Vec<T> {
    let Dims {
        batch,
        height,
        width,
        channels,
    } = dims;
    let plane = height * width;
    let mut out = Vec::with_capacity(src.len());
    for n in 0..batch {
        let base = n * plane * channels;
        for p in 0..plane {
            for c in 0..channels {
                out.push(src[base + c * plane + p]);
            }
        }
    }
    out
}

fn pack_nhwc<T: Copy + Default>(src: &[T], dims: Dims, packing: ImagePacking) -> Vec<T> {
    let slot = packing.slot_width();
    let blocks = packing.channel_blocks(dims.channels);
    let mut out = vec![T::default(); packing.storage_len(dims)];
    for (index, value) in src.iter().enumerate() {
        let c = index % dims.channels;
        let pixel = index / dims.channels;
        // pixel = (n * H + h) * W + w, which is also the image row/column walk.
        let row = pixel / dims.width;
        let w = pixel % dims.width;
        let x = w * blocks + c / slot;
        let texel = row * dims.width * blocks + x;
        out[texel * slot + c % slot] = *value;
    }
    out
}

fn unpack_to_nhwc<T: Copy>(src: &[T], dims: Dims, packing: ImagePacking) -> Vec<T> {
    let slot = packing.slot_width();
    let blocks = packing.channel_blocks(dims.channels);
    let rows = dims.batch * dims.height;
    let mut out = Vec::with_capacity(dims.element_count());
    for row in 0..rows {
        for w in 0..dims.width {
            for c in 0..dims.channels {
                let texel = row * dims.width * blocks + w * blocks + c / slot;
                out.push(src[texel * slot + c % slot]);
            }
        }
    }
    out
}

/// Permutes a planar tensor into `target` (`Nhwc` or `Nchw`).
pub fn transpose(tensor: &Tensor, target: DataFormat) -> Result<Tensor> {
    let dims = tensor.desc().dims()?;
    let source = tensor.format();
    if !source.is_planar() || !target.is_planar() {
        return Err(shape(format!(
            "planar transpose needs planar formats, got {source:?} -> {target:?}"
        )));
    }
    if source == target {
        return Ok(tensor.clone());
    }
    let data = match (tensor.data(), target) {
        (TensorData::F32(v), DataFormat::Nchw) => TensorData::F32(nhwc_to_nchw(v, dims)),
        (TensorData::F16(v), DataFormat::Nchw) => TensorData::F16(nhwc_to_nchw(v, dims)),
        (TensorData::I32(v), DataFormat::Nchw) => TensorData::I32(nhwc_to_nchw(v, dims)),
        (TensorData::F32(v), _) => TensorData::F32(nchw_to_nhwc(v, dims)),
        (TensorData::F16(v), _) => TensorData::F16(nchw_to_nhwc(v, dims)),
        (TensorData::I32(v), _) => TensorData::I32(nchw_to_nhwc(v, dims)),
    };
    Tensor::new(TensorDesc::from_dims(dims, target, tensor.dtype()), data)
}

/// Packs a planar float tensor into the image layout described by `packing`.
pub fn pack_image(tensor: &Tensor, packing: ImagePacking) -> Result<Tensor> {
    if let DataFormat::Image(current) = tensor.format() {
        if current == packing {
            return Ok(tensor.clone());
        }
        return pack_image(&unpack_image(tensor)?, packing);
    }
    let nhwc = transpose(tensor, DataFormat::Nhwc)?;
    let dims = nhwc.desc().dims()?;
    let data = match nhwc.data() {
        TensorData::F32(v) => TensorData::F32(pack_nhwc(v, dims, packing)),
        TensorData::F16(v) => TensorData::F16(pack_nhwc(v, dims, packing)),
        TensorData::I32(_) => return Err(unsupported(tensor.dtype(), "image packing")),
    };
    Tensor::new(
        TensorDesc::from_dims(dims, DataFormat::Image(packing), tensor.dtype()),
        data,
    )
}

/// Recovers the packed NHWC tensor from an image-layout tensor.
pub fn unpack_image(tensor: &Tensor) -> Result<Tensor> {
    let DataFormat::Image(packing) = tensor.format() else {
        return Err(shape(format!(
            "expected an image-layout tensor, got {:?}",
            tensor.format()
        )));
    };
    let dims = tensor.desc().dims()?;
    let data = match tensor.data() {
        TensorData::F32(v) => TensorData::F32(unpack_to_nhwc(v, dims, packing)),
        TensorData::F16(v) => TensorData::F16(unpack_to_nhwc(v, dims, packing)),
        TensorData::I32(_) => return Err(unsupported(tensor.dtype(), "image packing")),
    };
    Tensor::new(
        TensorDesc::from_dims(dims, DataFormat::Nhwc, tensor.dtype()),
        data,
    )
}

/// Converts `tensor` into the device-native `target` layout.
pub fn to_device_native(tensor: &Tensor, target: DataFormat) -> Result<Tensor> {
    match target {
        DataFormat::Image(packing) => pack_image(tensor, packing),
        planar => match tensor.format() {
            DataFormat::Image(_) => transpose(&unpack_image(tensor)?, planar),
            _ => transpose(tensor, planar),
        },
    }
}

/// Converts any supported layout back to packed NHWC.
pub fn to_packed(tensor: &Tensor) -> Result<Tensor> {
    match tensor.format() {
        DataFormat::Image(_) => unpack_image(tensor),
        _ => transpose(tensor, DataFormat::Nhwc),
    }
}

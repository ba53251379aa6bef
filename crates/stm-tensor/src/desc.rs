// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::dtype::DType;
use crate::error::{shape, Result};
use crate::layout::ImagePacking;

/// Physical arrangement of a tensor's elements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataFormat {
    /// Row-major `[batch, height, width, channels]`; the packed layout callers use.
    Nhwc,
    /// Row-major `[batch, channels, height, width]`.
    Nchw,
    /// Pixel grid of a device image. The descriptor keeps the logical NHWC shape.
    Image(ImagePacking),
}

impl DataFormat {
    pub fn is_planar(self) -> bool {
        matches!(self, DataFormat::Nhwc | DataFormat::Nchw)
    }
}

/// Logical extents of a rank-4 tensor, independent of storage order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Dims {
    pub batch: usize,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl Dims {
    pub const fn new(batch: usize, height: usize, width: usize, channels: usize) -> Self {
        Self {
            batch,
            height,
            width,
            channels,
        }
    }

    pub const fn nhwc(&self) -> [usize; 4] {
        [self.batch, self.height, self.width, self.channels]
    }

    pub const fn nchw(&self) -> [usize; 4] {
        [self.batch, self.channels, self.height, self.width]
    }

    pub const fn spatial(&self) -> usize {
        self.height * self.width
    }

    pub const fn element_count(&self) -> usize {
        self.batch * self.height * self.width * self.channels
    }

    /// Shape written in the order `format` stores it.
    pub fn shape_for(&self, format: DataFormat) -> [usize; 4] {
        match format {
            DataFormat::Nchw => self.nchw(),
            DataFormat::Nhwc | DataFormat::Image(_) => self.nhwc(),
        }
    }
}

/// Layout descriptor: shape, physical format and element type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorDesc {
    shape: Vec<usize>,
    format: DataFormat,
    dtype: DType,
}

impl TensorDesc {
    pub fn new(shape: impl Into<Vec<usize>>, format: DataFormat, dtype: DType) -> Self {
        Self {
            shape: shape.into(),
            format,
            dtype,
        }
    }

    /// Descriptor for `dims` laid out in `format`.
    pub fn from_dims(dims: Dims, format: DataFormat, dtype: DType) -> Self {
        Self::new(dims.shape_for(format).to_vec(), format, dtype)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn format(&self) -> DataFormat {
        self.format
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of logical elements (padding of image layouts excluded).
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.element_count() * self.dtype.size_of()
    }

    /// Interprets the shape according to the format. Fails unless the
    /// descriptor is rank 4 with every dimension positive.
    pub fn dims(&self) -> Result<Dims> {
        if self.rank() != 4 {
            return Err(shape(format!(
                "expected a rank-4 tensor, got rank {} ({:?})",
                self.rank(),
                self.shape
            )));
        }
        if self.shape.iter().any(|&d| d == 0) {
            return Err(shape(format!(
                "dimensions must be positive, got {:?}",
                self.shape
            )));
        }
        let s = &self.shape;
        Ok(match self.format {
            DataFormat::Nchw => Dims::new(s[0], s[2], s[3], s[1]),
            DataFormat::Nhwc | DataFormat::Image(_) => Dims::new(s[0], s[1], s[2], s[3]),
        })
    }

    /// Number of stored elements, including image padding.
    pub fn storage_len(&self) -> Result<usize> {
        match self.format {
            DataFormat::Image(packing) => Ok(packing.storage_len(self.dims()?)),
            DataFormat::Nhwc | DataFormat::Nchw => Ok(self.element_count()),
        }
    }

    /// True when a transform between `self` and `other` preserves every
    /// element: same logical element count and same dtype.
    pub fn is_compatible_for(&self, other: &TensorDesc) -> bool {
        self.element_count() == other.element_count() && self.dtype == other.dtype
    }

    pub fn with_format(&self, format: DataFormat) -> Result<Self> {
        Ok(Self::from_dims(self.dims()?, format, self.dtype))
    }

    pub fn with_dtype(&self, dtype: DType) -> Self {
        Self {
            shape: self.shape.clone(),
            format: self.format,
            dtype,
        }
    }
}

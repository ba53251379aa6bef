// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use half::f16;

use crate::desc::{DataFormat, TensorDesc};
use crate::dtype::DType;
use crate::error::{unsupported, Result, TensorError};

/// Typed element storage.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    F16(Vec<f16>),
    I32(Vec<i32>),
}

impl TensorData {
    pub fn zeros(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::F32 => TensorData::F32(vec![0.0; len]),
            DType::F16 => TensorData::F16(vec![f16::ZERO; len]),
            DType::I32 => TensorData::I32(vec![0; len]),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            TensorData::F32(_) => DType::F32,
            TensorData::F16(_) => DType::F16,
            TensorData::I32(_) => DType::I32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::F16(v) => v.len(),
            TensorData::I32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A rank-4 tensor that exclusively owns its storage.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    desc: TensorDesc,
    data: TensorData,
}

impl Tensor {
    pub fn new(desc: TensorDesc, data: TensorData) -> Result<Self> {
        if desc.dtype() != data.dtype() {
            return Err(TensorError::DTypeMismatch {
                expected: desc.dtype(),
                got: data.dtype(),
            });
        }
        let expected = desc.storage_len()?;
        if data.len() != expected {
            return Err(TensorError::DataLength {
                expected,
                got: data.len(),
            });
        }
        Ok(Self { desc, data })
    }

    pub fn from_f32(shape: impl Into<Vec<usize>>, format: DataFormat, data: Vec<f32>) -> Result<Self> {
        Self::new(TensorDesc::new(shape, format, DType::F32), TensorData::F32(data))
    }

    pub fn from_f16(shape: impl Into<Vec<usize>>, format: DataFormat, data: Vec<f16>) -> Result<Self> {
        Self::new(TensorDesc::new(shape, format, DType::F16), TensorData::F16(data))
    }

    pub fn from_i32(shape: impl Into<Vec<usize>>, format: DataFormat, data: Vec<i32>) -> Result<Self> {
        Self::new(TensorDesc::new(shape, format, DType::I32), TensorData::I32(data))
    }

    pub fn zeros(desc: TensorDesc) -> Result<Self> {
        let len = desc.storage_len()?;
        let data = TensorData::zeros(desc.dtype(), len);
        Ok(Self { desc, data })
    }

    pub fn desc(&self) -> &TensorDesc {
        &self.desc
    }

    pub fn shape(&self) -> &[usize] {
        self.desc.shape()
    }

    pub fn format(&self) -> DataFormat {
        self.desc.format()
    }

    pub fn dtype(&self) -> DType {
        self.desc.dtype()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn into_parts(self) -> (TensorDesc, TensorData) {
        (self.desc, self.data)
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f16(&self) -> Option<&[f16]> {
        match &self.data {
            TensorData::F16(v) => Some(v),
            _ => None,
        }
    }

    /// Copies the storage out as `f32`, widening halves exactly.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        match &self.data {
            TensorData::F32(v) => Ok(v.clone()),
            TensorData::F16(v) => Ok(v.iter().map(|x| x.to_f32()).collect()),
            TensorData::I32(_) => Err(unsupported(DType::I32, "float readout")),
        }
    }

    /// Converts between float dtypes. Narrowing rounds to nearest even.
    pub fn cast(&self, dtype: DType) -> Result<Tensor> {
        if dtype == self.dtype() {
            return Ok(self.clone());
        }
        let data = match (&self.data, dtype) {
            (TensorData::F32(v), DType::F16) => {
                TensorData::F16(v.iter().copied().map(f16::from_f32).collect())
            }
            (TensorData::F16(v), DType::F32) => {
                TensorData::F32(v.iter().map(|x| x.to_f32()).collect())
            }
            (TensorData::I32(_), _) => return Err(unsupported(DType::I32, "dtype cast")),
            (_, other) => return Err(unsupported(other, "dtype cast")),
        };
        Ok(Tensor {
            desc: self.desc.with_dtype(dtype),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_checks_length_and_dtype() {
        let err = Tensor::from_f32(vec![1, 2, 2, 1], DataFormat::Nhwc, vec![0.0; 3]).unwrap_err();
        assert_eq!(err, TensorError::DataLength { expected: 4, got: 3 });

        let desc = TensorDesc::new(vec![1, 1, 1, 2], DataFormat::Nhwc, DType::F16);
        let err = Tensor::new(desc, TensorData::F32(vec![0.0; 2])).unwrap_err();
        assert!(matches!(err, TensorError::DTypeMismatch { .. }));
    }

    #[test]
    fn half_cast_rounds_and_widens() {
        let t = Tensor::from_f32(vec![1, 1, 1, 3], DataFormat::Nhwc, vec![1.0, 0.1, 65504.0]).unwrap();
        let half = t.cast(DType::F16).unwrap();
        assert_eq!(half.dtype(), DType::F16);
        let back = half.cast(DType::F32).unwrap();
        let values = back.as_f32().unwrap();
        assert_eq!(values[0], 1.0);
        assert!((values[1] - 0.1).abs() < 1e-4);
        assert_eq!(values[2], 65504.0);
    }

    #[test]
    fn integer_tensors_do_not_cast() {
        let t = Tensor::from_i32(vec![1, 1, 1, 2], DataFormat::Nhwc, vec![1, 2]).unwrap();
        assert!(matches!(
            t.cast(DType::F32),
            Err(TensorError::UnsupportedDtype { dtype: DType::I32, .. })
        ));
        assert!(t.to_f32_vec().is_err());
    }
}

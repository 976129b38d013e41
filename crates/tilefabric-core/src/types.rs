//! Element types, shapes and scalar constants

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FabricError, Result};

/// Scalar element type of a buffer, channel element or host region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    F32,
}

impl DType {
    /// Size of one scalar in bytes
    pub const fn size_bytes(self) -> usize {
        match self {
            DType::I8 | DType::U8 => 1,
            DType::I16 | DType::U16 => 2,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::I64 => 8,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, DType::F32)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::I8 => "i8",
            DType::I16 => "i16",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::U8 => "u8",
            DType::U16 => "u16",
            DType::U32 => "u32",
            DType::F32 => "f32",
        };
        f.write_str(name)
    }
}

/// Fixed shape plus scalar type, e.g. `memref<64xi32>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorType {
    pub dtype: DType,
    pub shape: Vec<usize>,
}

impl TensorType {
    /// Validate and build a tensor type. Shapes must be non-empty with no zero extent.
    pub fn new(dtype: DType, shape: impl Into<Vec<usize>>) -> Result<Self> {
        let shape = shape.into();
        if shape.is_empty() {
            return Err(FabricError::declaration("tensor shape must have at least one dimension"));
        }
        if shape.iter().any(|&dim| dim == 0) {
            return Err(FabricError::declaration(format!("tensor shape {shape:?} has a zero extent")));
        }
        Ok(Self { dtype, shape })
    }

    /// One-dimensional shorthand
    pub fn vector(dtype: DType, len: usize) -> Result<Self> {
        Self::new(dtype, vec![len])
    }

    /// Total number of scalars
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn size_bytes(&self) -> usize {
        self.num_elements() * self.dtype.size_bytes()
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("memref<")?;
        for dim in &self.shape {
            write!(f, "{dim}x")?;
        }
        write!(f, "{}>", self.dtype)
    }
}

/// Scalar constant used for buffer initializers, kernel arguments and predicates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Int(i64),
    Float(f64),
}

impl Scalar {
    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::Int(v) => v as f64,
            Scalar::Float(v) => v,
        }
    }

    /// Integer view; floats truncate toward zero
    pub fn as_i64(self) -> i64 {
        match self {
            Scalar::Int(v) => v,
            Scalar::Float(v) => v as i64,
        }
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Int(i64::from(value))
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensor_type_rejects_empty_and_zero_shapes() {
        assert!(TensorType::new(DType::I32, Vec::new()).is_err());
        assert!(TensorType::new(DType::I32, vec![4, 0]).is_err());
    }

    #[test]
    fn tensor_type_counts_elements_and_bytes() {
        let ty = TensorType::new(DType::I32, vec![4, 16]).unwrap();
        assert_eq!(ty.num_elements(), 64);
        assert_eq!(ty.size_bytes(), 256);
        assert_eq!(ty.to_string(), "memref<4x16xi32>");
    }
}

//! Element types, typed buffers and dtype-tagged scalars.

use crate::error::DTypeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Float32,
    Float64,
    Int8,
    Int32,
    Int64,
    Uint8,
    Uint64,
    Bool,
}

impl DType {
    pub const ALL: [DType; 8] = [
        Self::Float32,
        Self::Float64,
        Self::Int8,
        Self::Int32,
        Self::Int64,
        Self::Uint8,
        Self::Uint64,
        Self::Bool,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Int8 => "int8",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Uint8 => "uint8",
            Self::Uint64 => "uint64",
            Self::Bool => "bool",
        }
    }

    pub fn size_in_bytes(&self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 | Self::Bool => 1,
            Self::Float32 | Self::Int32 => 4,
            Self::Float64 | Self::Int64 | Self::Uint64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = DTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        // ORT spells element types as `tensor(float)` etc.
        let name = lower
            .strip_prefix("tensor(")
            .and_then(|inner| inner.strip_suffix(')'))
            .unwrap_or(&lower);

        match name {
            "float" => Ok(Self::Float32),
            "double" => Ok(Self::Float64),
            "boolean" => Ok(Self::Bool),
            other => Self::ALL
                .iter()
                .copied()
                .find(|dtype| dtype.name() == other)
                .ok_or_else(|| DTypeError::Unknown(s.to_string())),
        }
    }
}

/// Flat, row-major element buffer. The variant *is* the dtype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "values", rename_all = "lowercase")]
pub enum TensorData {
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Int8(Vec<i8>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Uint8(Vec<u8>),
    Uint64(Vec<u64>),
    Bool(Vec<bool>),
}

/// Applies `$body` to the inner value of every variant of `$data`, wrapping the
/// result in the same-named variant of `$target`.
macro_rules! map_variant {
    ($data:expr, $target:ident, $v:ident => $body:expr) => {
        match $data {
            TensorData::Float32($v) => $target::Float32($body),
            TensorData::Float64($v) => $target::Float64($body),
            TensorData::Int8($v) => $target::Int8($body),
            TensorData::Int32($v) => $target::Int32($body),
            TensorData::Int64($v) => $target::Int64($body),
            TensorData::Uint8($v) => $target::Uint8($body),
            TensorData::Uint64($v) => $target::Uint64($body),
            TensorData::Bool($v) => $target::Bool($body),
        }
    };
}

/// Evaluates `$body` with `$t` bound to the Rust element type of `$dtype`,
/// wrapping the resulting `Vec` in the matching `TensorData` variant.
macro_rules! with_element_type {
    ($dtype:expr, $t:ident => $body:expr) => {
        match $dtype {
            DType::Float32 => {
                type $t = f32;
                TensorData::Float32($body)
            }
            DType::Float64 => {
                type $t = f64;
                TensorData::Float64($body)
            }
            DType::Int8 => {
                type $t = i8;
                TensorData::Int8($body)
            }
            DType::Int32 => {
                type $t = i32;
                TensorData::Int32($body)
            }
            DType::Int64 => {
                type $t = i64;
                TensorData::Int64($body)
            }
            DType::Uint8 => {
                type $t = u8;
                TensorData::Uint8($body)
            }
            DType::Uint64 => {
                type $t = u64;
                TensorData::Uint64($body)
            }
            DType::Bool => {
                type $t = bool;
                TensorData::Bool($body)
            }
        }
    };
}

pub(crate) use with_element_type;

impl TensorData {
    pub fn dtype(&self) -> DType {
        match self {
            Self::Float32(_) => DType::Float32,
            Self::Float64(_) => DType::Float64,
            Self::Int8(_) => DType::Int8,
            Self::Int32(_) => DType::Int32,
            Self::Int64(_) => DType::Int64,
            Self::Uint8(_) => DType::Uint8,
            Self::Uint64(_) => DType::Uint64,
            Self::Bool(_) => DType::Bool,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Float32(v) => v.len(),
            Self::Float64(v) => v.len(),
            Self::Int8(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::Uint8(v) => v.len(),
            Self::Uint64(v) => v.len(),
            Self::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at a flat (already validated) offset.
    pub(crate) fn scalar_at(&self, offset: usize) -> Scalar {
        map_variant!(self, Scalar, v => v[offset])
    }

    /// Copy of the contiguous range `[start, end)`.
    pub(crate) fn slice_range(&self, start: usize, end: usize) -> TensorData {
        map_variant!(self, TensorData, v => v[start..end].to_vec())
    }
}

/// A single dtype-tagged element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Float32(f32),
    Float64(f64),
    Int8(i8),
    Int32(i32),
    Int64(i64),
    Uint8(u8),
    Uint64(u64),
    Bool(bool),
}

impl Scalar {
    pub fn dtype(&self) -> DType {
        match self {
            Self::Float32(_) => DType::Float32,
            Self::Float64(_) => DType::Float64,
            Self::Int8(_) => DType::Int8,
            Self::Int32(_) => DType::Int32,
            Self::Int64(_) => DType::Int64,
            Self::Uint8(_) => DType::Uint8,
            Self::Uint64(_) => DType::Uint64,
            Self::Bool(_) => DType::Bool,
        }
    }

    /// Lossy widening for numeric postprocessing. 64-bit integers beyond 2^53
    /// lose precision here; use the typed accessors for exact values.
    pub fn to_f64(&self) -> f64 {
        match *self {
            Self::Float32(v) => v as f64,
            Self::Float64(v) => v,
            Self::Int8(v) => v as f64,
            Self::Int32(v) => v as f64,
            Self::Int64(v) => v as f64,
            Self::Uint8(v) => v as f64,
            Self::Uint64(v) => v as f64,
            Self::Bool(v) => u8::from(v) as f64,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float32(v) => write!(f, "{}", v),
            Self::Float64(v) => write!(f, "{}", v),
            Self::Int8(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::Uint8(v) => write!(f, "{}", v),
            Self::Uint64(v) => write!(f, "{}", v),
            Self::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// Rust element types a tensor can hold.
pub trait TensorElement: Copy + Send + Sync + 'static {
    const DTYPE: DType;

    fn into_data(values: Vec<Self>) -> TensorData;

    fn slice(data: &TensorData) -> Option<&[Self]>;

    fn from_scalar(scalar: Scalar) -> Option<Self>;
}

macro_rules! impl_tensor_element {
    ($ty:ty, $variant:ident) => {
        impl TensorElement for $ty {
            const DTYPE: DType = DType::$variant;

            fn into_data(values: Vec<Self>) -> TensorData {
                TensorData::$variant(values)
            }

            fn slice(data: &TensorData) -> Option<&[Self]> {
                match data {
                    TensorData::$variant(values) => Some(values),
                    _ => None,
                }
            }

            fn from_scalar(scalar: Scalar) -> Option<Self> {
                match scalar {
                    Scalar::$variant(value) => Some(value),
                    _ => None,
                }
            }
        }

        impl From<$ty> for Scalar {
            fn from(value: $ty) -> Self {
                Scalar::$variant(value)
            }
        }
    };
}

impl_tensor_element!(f32, Float32);
impl_tensor_element!(f64, Float64);
impl_tensor_element!(i8, Int8);
impl_tensor_element!(i32, Int32);
impl_tensor_element!(i64, Int64);
impl_tensor_element!(u8, Uint8);
impl_tensor_element!(u64, Uint64);
impl_tensor_element!(bool, Bool);

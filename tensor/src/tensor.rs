//! The `Tensor` value type.

use crate::dtype::{with_element_type, DType, Scalar, TensorData, TensorElement};
use crate::error::{DTypeError, Result, ShapeError, TensorError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Typed n-dimensional array stored as a flat row-major buffer.
///
/// Tensors are immutable values: `reshape` and `clone` share the underlying
/// buffer, nothing mutates it in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "TensorRepr", into = "TensorRepr")]
pub struct Tensor {
    data: Arc<TensorData>,
    shape: Vec<usize>,
    dtype: DType,
}

/// Product of the dimensions; the empty shape (a scalar) has one element.
pub fn element_count(shape: &[usize]) -> std::result::Result<usize, ShapeError> {
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| ShapeError::Overflow(shape.to_vec()))
}

impl Tensor {
    /// Create a tensor from a typed buffer and an explicit shape.
    ///
    /// Fails with `DTypeError` if `dtype` disagrees with the buffer and with
    /// `ShapeError` if the element count does not match the shape.
    pub fn new(dtype: DType, data: TensorData, shape: impl Into<Vec<usize>>) -> Result<Self> {
        let shape = shape.into();
        if data.dtype() != dtype {
            return Err(DTypeError::Mismatch {
                expected: dtype,
                actual: data.dtype(),
            }
            .into());
        }

        let expected = element_count(&shape)?;
        if data.len() != expected {
            return Err(ShapeError::DataLength {
                shape,
                expected,
                actual: data.len(),
            }
            .into());
        }

        Ok(Self {
            data: Arc::new(data),
            shape,
            dtype,
        })
    }

    pub fn from_vec<T: TensorElement>(values: Vec<T>, shape: impl Into<Vec<usize>>) -> Result<Self> {
        Self::new(T::DTYPE, T::into_data(values), shape)
    }

    /// Rank-0 tensor holding one value.
    pub fn scalar<T: TensorElement>(value: T) -> Self {
        Self {
            data: Arc::new(T::into_data(vec![value])),
            shape: Vec::new(),
            dtype: T::DTYPE,
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.numel() * self.dtype.size_in_bytes()
    }

    /// Row-major strides, in elements.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.shape.len()];
        for axis in (0..self.shape.len().saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * self.shape[axis + 1];
        }
        strides
    }

    /// Flat buffer offset of a multi-dimensional index.
    pub fn flat_index(&self, indices: &[usize]) -> std::result::Result<usize, ShapeError> {
        if indices.len() != self.rank() {
            return Err(ShapeError::RankMismatch {
                expected: self.rank(),
                actual: indices.len(),
            });
        }

        let mut offset = 0;
        for (axis, ((&index, &dim), stride)) in indices
            .iter()
            .zip(&self.shape)
            .zip(self.strides())
            .enumerate()
        {
            if index >= dim {
                return Err(ShapeError::IndexOutOfBounds { axis, index, dim });
            }
            offset += index * stride;
        }
        Ok(offset)
    }

    pub fn get(&self, indices: &[usize]) -> Result<Scalar> {
        let offset = self.flat_index(indices)?;
        Ok(self.data.scalar_at(offset))
    }

    /// Typed element access. The dtype is checked before the indices.
    pub fn get_as<T: TensorElement>(&self, indices: &[usize]) -> Result<T> {
        let values = self.as_slice::<T>()?;
        let offset = self.flat_index(indices)?;
        Ok(values[offset])
    }

    pub fn as_slice<T: TensorElement>(&self) -> std::result::Result<&[T], DTypeError> {
        T::slice(&self.data).ok_or(DTypeError::Mismatch {
            expected: T::DTYPE,
            actual: self.dtype,
        })
    }

    pub fn to_vec<T: TensorElement>(&self) -> std::result::Result<Vec<T>, DTypeError> {
        self.as_slice::<T>().map(<[T]>::to_vec)
    }

    /// Float view for postprocessing; float64 buffers are narrowed.
    pub fn to_f32_vec(&self) -> std::result::Result<Vec<f32>, DTypeError> {
        match &*self.data {
            TensorData::Float32(values) => Ok(values.clone()),
            TensorData::Float64(values) => Ok(values.iter().map(|&v| v as f32).collect()),
            other => Err(DTypeError::Mismatch {
                expected: DType::Float32,
                actual: other.dtype(),
            }),
        }
    }

    /// Same elements under a new shape. The buffer is shared with `self`.
    pub fn reshape(&self, new_shape: impl Into<Vec<usize>>) -> std::result::Result<Self, ShapeError> {
        let new_shape = new_shape.into();
        let to_count = element_count(&new_shape)?;
        if to_count != self.numel() {
            return Err(ShapeError::ElementCountMismatch {
                from: self.shape.clone(),
                to: new_shape,
                from_count: self.numel(),
                to_count,
            });
        }

        Ok(Self {
            data: Arc::clone(&self.data),
            shape: new_shape,
            dtype: self.dtype,
        })
    }

    /// Lossy f64 copy of every element, for logging and numeric postprocessing.
    pub fn to_f64_lossy(&self) -> Vec<f64> {
        (0..self.numel())
            .map(|offset| self.data.scalar_at(offset).to_f64())
            .collect()
    }

    /// Whether two tensors are views over the same buffer.
    pub fn shares_buffer(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Join equally-shaped tensors along a new leading dimension.
    pub fn stack(tensors: &[Tensor]) -> Result<Self> {
        let first = tensors.first().ok_or(ShapeError::EmptyStack)?;
        for (index, tensor) in tensors.iter().enumerate() {
            if tensor.dtype != first.dtype {
                return Err(DTypeError::Mismatch {
                    expected: first.dtype,
                    actual: tensor.dtype,
                }
                .into());
            }
            if tensor.shape != first.shape {
                return Err(ShapeError::StackShapeMismatch {
                    index,
                    expected: first.shape.clone(),
                    actual: tensor.shape.clone(),
                }
                .into());
            }
        }

        let data = with_element_type!(first.dtype, T => {
            let mut values: Vec<T> = Vec::with_capacity(first.numel() * tensors.len());
            for tensor in tensors {
                values.extend_from_slice(tensor.as_slice::<T>()?);
            }
            values
        });

        let mut shape = Vec::with_capacity(first.rank() + 1);
        shape.push(tensors.len());
        shape.extend_from_slice(&first.shape);
        Self::new(first.dtype, data, shape)
    }

    /// Split along the leading dimension; inverse of [`Tensor::stack`].
    pub fn unstack(&self) -> std::result::Result<Vec<Self>, ShapeError> {
        let (&count, item_shape) = self.shape.split_first().ok_or(ShapeError::UnstackScalar)?;
        let item_len = element_count(item_shape)?;

        Ok((0..count)
            .map(|i| Self {
                data: Arc::new(self.data.slice_range(i * item_len, (i + 1) * item_len)),
                shape: item_shape.to_vec(),
                dtype: self.dtype,
            })
            .collect())
    }

    /// Build from an `ndarray` array (logical row-major order).
    pub fn from_array<T: TensorElement>(array: ndarray::ArrayD<T>) -> Result<Self> {
        let shape = array.shape().to_vec();
        let values: Vec<T> = array.iter().copied().collect();
        Self::from_vec(values, shape)
    }

    pub fn to_array<T: TensorElement>(&self) -> Result<ndarray::ArrayD<T>> {
        let values = self.to_vec::<T>()?;
        ndarray::ArrayD::from_shape_vec(ndarray::IxDyn(&self.shape), values).map_err(|_| {
            TensorError::Shape(ShapeError::DataLength {
                shape: self.shape.clone(),
                expected: self.numel(),
                actual: self.numel(),
            })
        })
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.data == other.data
    }
}

/// Wire form of a tensor; deserialization re-runs the constructor checks.
#[derive(Serialize, Deserialize)]
struct TensorRepr {
    shape: Vec<usize>,
    data: TensorData,
}

impl TryFrom<TensorRepr> for Tensor {
    type Error = TensorError;

    fn try_from(repr: TensorRepr) -> Result<Self> {
        Tensor::new(repr.data.dtype(), repr.data, repr.shape)
    }
}

impl From<Tensor> for TensorRepr {
    fn from(tensor: Tensor) -> Self {
        let data = Arc::try_unwrap(tensor.data).unwrap_or_else(|shared| (*shared).clone());
        Self {
            shape: tensor.shape,
            data,
        }
    }
}

impl std::fmt::Display for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tensor<{}>{:?}", self.dtype, self.shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strides_row_major() {
        let t = Tensor::from_vec(vec![0f32; 24], vec![2, 3, 4]).unwrap();
        assert_eq!(t.strides(), vec![12, 4, 1]);
        assert_eq!(t.flat_index(&[1, 2, 3]).unwrap(), 23);
    }

    #[test]
    fn test_scalar_has_empty_shape() {
        let t = Tensor::scalar(7i64);
        assert_eq!(t.rank(), 0);
        assert_eq!(t.numel(), 1);
        assert_eq!(t.get(&[]).unwrap(), Scalar::Int64(7));
    }

    #[test]
    fn test_zero_sized_dimension() {
        let t = Tensor::from_vec(Vec::<f32>::new(), vec![0, 4]).unwrap();
        assert_eq!(t.numel(), 0);
        assert!(t.unstack().unwrap().is_empty());
    }

    #[test]
    fn test_to_f64_lossy() {
        let t = Tensor::from_vec(vec![true, false], vec![2]).unwrap();
        assert_eq!(t.to_f64_lossy(), vec![1.0, 0.0]);
    }
}

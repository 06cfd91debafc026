//! Tensor error types.
//!
//! Every failure is structural: it reflects a caller bug (wrong shape, wrong
//! element type) and is never worth retrying.

use crate::dtype::DType;
use thiserror::Error;

/// Shape/index violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("Data length {actual} does not match shape {shape:?} (expected {expected} elements)")]
    DataLength {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("Cannot reshape {from:?} ({from_count} elements) into {to:?} ({to_count} elements)")]
    ElementCountMismatch {
        from: Vec<usize>,
        to: Vec<usize>,
        from_count: usize,
        to_count: usize,
    },

    #[error("Expected {expected} indices for a rank-{expected} tensor, got {actual}")]
    RankMismatch { expected: usize, actual: usize },

    #[error("Index {index} out of bounds for axis {axis} with size {dim}")]
    IndexOutOfBounds { axis: usize, index: usize, dim: usize },

    #[error("Element count of shape {0:?} overflows usize")]
    Overflow(Vec<usize>),

    #[error("Cannot stack an empty sequence of tensors")]
    EmptyStack,

    #[error("Stack item {index} has shape {actual:?}, expected {expected:?}")]
    StackShapeMismatch {
        index: usize,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Cannot unstack a scalar tensor")]
    UnstackScalar,
}

/// Element type violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DTypeError {
    #[error("Data type mismatch: expected {expected}, got {actual}")]
    Mismatch { expected: DType, actual: DType },

    #[error("Unknown data type: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TensorError {
    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error(transparent)]
    DType(#[from] DTypeError),
}

pub type Result<T> = std::result::Result<T, TensorError>;

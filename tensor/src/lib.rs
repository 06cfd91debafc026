//! TabAgent Tensor Crate
//!
//! **Typed, shape-aware tensors used as the interchange format between
//! pipelines and compute backends.**
//!
//! A [`Tensor`] is a flat row-major buffer plus a shape. Construction always
//! validates that the element count matches the shape and that the declared
//! [`DType`] matches the buffer, so every tensor in the system is well-formed.
//!
//! # Example
//!
//! ```
//! use tabagent_tensor::{Tensor, Scalar};
//!
//! let t = Tensor::from_vec(vec![1i64, 2, 3, 4, 5, 6], vec![2, 3])?;
//! assert_eq!(t.get(&[1, 0])?, Scalar::Int64(4));
//!
//! let flat = t.reshape(vec![6])?;
//! assert_eq!(flat.get_as::<i64>(&[3])?, 4);
//! # Ok::<(), tabagent_tensor::TensorError>(())
//! ```
//!
//! # Design
//!
//! - Row-major ordering everywhere (`strides`, `flat_index`, `get`)
//! - 64-bit integers stored natively: no precision loss beyond 2^53
//! - No implicit broadcasting
//! - Views share the buffer (`Arc`); there is no in-place mutation

pub mod dtype;
pub mod error;
pub mod tensor;

pub use dtype::{DType, Scalar, TensorData, TensorElement};
pub use error::{DTypeError, Result, ShapeError, TensorError};
pub use tensor::{element_count, Tensor};

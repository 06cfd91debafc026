//! Integration tests for the tensor crate
//!
//! Covers construction validation, typed access, reshape semantics,
//! stack/unstack and ndarray interop, plus property tests for the
//! row-major indexing contract.

use proptest::prelude::*;
use tabagent_tensor::{
    DType, DTypeError, Scalar, ShapeError, Tensor, TensorData, TensorError,
};

#[test]
fn test_construction_rejects_length_mismatch() {
    let err = Tensor::from_vec(vec![1.0f32, 2.0, 3.0], vec![2, 2]).unwrap_err();
    assert_eq!(
        err,
        TensorError::Shape(ShapeError::DataLength {
            shape: vec![2, 2],
            expected: 4,
            actual: 3,
        })
    );
}

#[test]
fn test_construction_rejects_dtype_mismatch() {
    let err = Tensor::new(DType::Float32, TensorData::Int64(vec![1, 2]), vec![2]).unwrap_err();
    assert_eq!(
        err,
        TensorError::DType(DTypeError::Mismatch {
            expected: DType::Float32,
            actual: DType::Int64,
        })
    );
}

#[test]
fn test_get_index_errors() {
    let t = Tensor::from_vec(vec![0u8; 6], vec![2, 3]).unwrap();

    assert_eq!(
        t.get(&[0]).unwrap_err(),
        TensorError::Shape(ShapeError::RankMismatch { expected: 2, actual: 1 })
    );
    assert_eq!(
        t.get(&[1, 3]).unwrap_err(),
        TensorError::Shape(ShapeError::IndexOutOfBounds { axis: 1, index: 3, dim: 3 })
    );
}

#[test]
fn test_get_as_checks_dtype() {
    let t = Tensor::from_vec(vec![1i32, 2], vec![2]).unwrap();
    assert_eq!(t.get_as::<i32>(&[1]).unwrap(), 2);
    assert!(matches!(
        t.get_as::<f32>(&[1]),
        Err(TensorError::DType(DTypeError::Mismatch { .. }))
    ));
}

#[test]
fn test_int64_beyond_f64_precision_roundtrips() {
    let big = (1i64 << 53) + 1;
    let huge = u64::MAX - 7;

    let signed = Tensor::from_vec(vec![big, -big, i64::MIN], vec![3]).unwrap();
    assert_eq!(signed.get(&[0]).unwrap(), Scalar::Int64(big));
    assert_eq!(signed.get_as::<i64>(&[1]).unwrap(), -big);
    assert_eq!(signed.get_as::<i64>(&[2]).unwrap(), i64::MIN);

    let unsigned = Tensor::from_vec(vec![huge], vec![1, 1]).unwrap();
    assert_eq!(unsigned.get(&[0, 0]).unwrap(), Scalar::Uint64(huge));
}

#[test]
fn test_reshape_shares_buffer_and_keeps_receiver() {
    let t = Tensor::from_vec((0..12).map(|v| v as f32).collect(), vec![3, 4]).unwrap();
    let r = t.reshape(vec![2, 2, 3]).unwrap();

    assert!(r.shares_buffer(&t));
    assert_eq!(t.shape(), &[3, 4]);
    assert_eq!(r.shape(), &[2, 2, 3]);
    assert_eq!(r.get(&[1, 0, 2]).unwrap(), Scalar::Float32(8.0));
}

#[test]
fn test_reshape_rejects_count_mismatch() {
    let t = Tensor::from_vec(vec![0f32; 6], vec![2, 3]).unwrap();
    let err = t.reshape(vec![4, 2]).unwrap_err();
    assert_eq!(
        err,
        ShapeError::ElementCountMismatch {
            from: vec![2, 3],
            to: vec![4, 2],
            from_count: 6,
            to_count: 8,
        }
    );
}

#[test]
fn test_stack_and_unstack() {
    let a = Tensor::from_vec(vec![1i64, 2, 3], vec![1, 3]).unwrap();
    let b = Tensor::from_vec(vec![4i64, 5, 6], vec![1, 3]).unwrap();

    let stacked = Tensor::stack(&[a.clone(), b.clone()]).unwrap();
    assert_eq!(stacked.shape(), &[2, 1, 3]);
    assert_eq!(stacked.get_as::<i64>(&[1, 0, 2]).unwrap(), 6);

    let parts = stacked.unstack().unwrap();
    assert_eq!(parts, vec![a, b]);
}

#[test]
fn test_stack_rejects_mismatched_items() {
    let a = Tensor::from_vec(vec![1f32, 2.0], vec![2]).unwrap();
    let b = Tensor::from_vec(vec![1f32, 2.0, 3.0], vec![3]).unwrap();
    let c = Tensor::from_vec(vec![1i64, 2], vec![2]).unwrap();

    assert!(matches!(
        Tensor::stack(&[a.clone(), b]),
        Err(TensorError::Shape(ShapeError::StackShapeMismatch { index: 1, .. }))
    ));
    assert!(matches!(
        Tensor::stack(&[a, c]),
        Err(TensorError::DType(_))
    ));
    assert_eq!(
        Tensor::stack(&[]).unwrap_err(),
        TensorError::Shape(ShapeError::EmptyStack)
    );
    assert_eq!(
        Tensor::scalar(1f32).unstack().unwrap_err(),
        ShapeError::UnstackScalar
    );
}

#[test]
fn test_ndarray_interop() {
    let array = ndarray::ArrayD::from_shape_vec(ndarray::IxDyn(&[2, 2]), vec![1.0f32, 2.0, 3.0, 4.0])
        .unwrap();
    // Transposed view: logical order must be preserved, not memory order
    let transposed = array.t().to_owned();

    let t = Tensor::from_array(transposed).unwrap();
    assert_eq!(t.as_slice::<f32>().unwrap(), &[1.0, 3.0, 2.0, 4.0]);

    let back = t.to_array::<f32>().unwrap();
    assert_eq!(back.shape(), &[2, 2]);
    assert_eq!(back[ndarray::IxDyn(&[0, 1])], 3.0);
    assert!(t.to_array::<i64>().is_err());
}

#[test]
fn test_serde_validates_on_deserialize() {
    let t = Tensor::from_vec(vec![1i64, 2, 3, 4], vec![2, 2]).unwrap();
    let json = serde_json::to_string(&t).unwrap();
    let back: Tensor = serde_json::from_str(&json).unwrap();
    assert_eq!(back, t);

    let bad = r#"{"shape":[3],"data":{"dtype":"float32","values":[1.0]}}"#;
    assert!(serde_json::from_str::<Tensor>(bad).is_err());
}

fn shape_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..5, 0..4)
}

proptest! {
    #[test]
    fn prop_reshape_ok_iff_counts_match(shape in shape_strategy(), target in shape_strategy()) {
        let count: usize = shape.iter().product();
        let t = Tensor::from_vec((0..count as i64).collect::<Vec<_>>(), shape).unwrap();
        let target_count: usize = target.iter().product();

        prop_assert_eq!(t.reshape(target).is_ok(), target_count == count);
    }

    #[test]
    fn prop_reshaped_get_is_row_major_reindex(shape in shape_strategy()) {
        let count: usize = shape.iter().product();
        let t = Tensor::from_vec((0..count as i64).collect::<Vec<_>>(), shape.clone()).unwrap();
        let flat = t.reshape(vec![count]).unwrap();

        // Walk every multi-index of the original in row-major order
        let mut index = vec![0usize; shape.len()];
        for expected in 0..count {
            prop_assert_eq!(t.flat_index(&index).unwrap(), expected);
            prop_assert_eq!(t.get(&index).unwrap(), flat.get(&[expected]).unwrap());
            for axis in (0..shape.len()).rev() {
                index[axis] += 1;
                if index[axis] < shape[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }
    }

    #[test]
    fn prop_i64_values_roundtrip(values in prop::collection::vec(any::<i64>(), 1..32)) {
        let len = values.len();
        let t = Tensor::from_vec(values.clone(), vec![len]).unwrap();
        for (i, value) in values.iter().enumerate() {
            prop_assert_eq!(t.get(&[i]).unwrap(), Scalar::Int64(*value));
        }
    }
}

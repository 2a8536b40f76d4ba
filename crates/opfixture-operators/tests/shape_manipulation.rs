//! Tests for the shape manipulation operators (view_copy, cat, split_copy).

mod common;

use common::{
    Error, FakeValue, ShapeEnv, Tensor, Value, f64_tensor, fixture_op, grad_at, run_and_check_fake,
    tensor_at,
};
use opfixture_core::{DataType, Device, FakeTensor, SymbolicDim};
use opfixture_operators::operators::{numpy_cat, numpy_split_copy};
use proptest::prelude::*;

fn arange(shape: &[usize]) -> Tensor {
    let len: usize = shape.iter().product();
    let values: Vec<f64> = (0..len).map(|v| v as f64).collect();
    f64_tensor(&values, shape)
}

fn pieces_of(value: &Value) -> &[Tensor] {
    value.as_tensor_list().expect("tensor list output")
}

proptest! {
    #[test]
    fn prop_split_then_cat_round_trips(
        rows in 1usize..4,
        cols in 0usize..10,
        raw_splits in prop::collection::vec(0usize..10, 0..4),
    ) {
        let mut splits: Vec<i64> = raw_splits.iter().map(|&s| (s % (cols + 1)) as i64).collect();
        splits.sort_unstable();
        let x = arange(&[rows, cols]);
        let pieces = numpy_split_copy(&x, &splits, 1).unwrap();

        prop_assert_eq!(pieces.len(), splits.len() + 1);
        prop_assert_eq!(pieces.iter().map(|p| p.shape()[1]).sum::<usize>(), cols);
        prop_assert_eq!(&numpy_cat(&pieces, 1).unwrap(), &x);
    }

    #[test]
    fn prop_cat_then_split_round_trips(sizes in prop::collection::vec(0usize..5, 1..5)) {
        let parts: Vec<Tensor> = sizes.iter().map(|&n| arange(&[n, 2])).collect();
        let joined = numpy_cat(&parts, 0).unwrap();
        prop_assert_eq!(joined.shape()[0], sizes.iter().sum::<usize>());

        let mut splits = Vec::new();
        let mut total = 0i64;
        for &n in &sizes[..sizes.len() - 1] {
            total += n as i64;
            splits.push(total);
        }
        prop_assert_eq!(numpy_split_copy(&joined, &splits, 0).unwrap(), parts);
    }
}

// ================================================================================
// numpy_view_copy
// ================================================================================

#[test]
fn test_view_copy_forward_and_fake() {
    let op = fixture_op("numpy_view_copy");
    let x = arange(&[2, 3, 4]);
    let outputs = run_and_check_fake(op.as_ref(), &[x.clone().into(), Value::IntList(vec![-1, 4])]);

    let out = tensor_at(&outputs, 0);
    assert_eq!(out.shape(), &[6, 4]);
    assert_eq!(out.to_vec::<f64>().unwrap(), x.to_vec::<f64>().unwrap());
}

#[test]
fn test_view_copy_backward_restores_shape() {
    let op = fixture_op("numpy_view_copy");
    let x = arange(&[2, 3, 4]).with_requires_grad(true);
    let call = op
        .call_with_grad(&[x.into(), Value::IntList(vec![2, 12])])
        .unwrap();

    let grad = arange(&[2, 12]);
    let grads = call.backward(vec![Some(grad.into())]).unwrap();

    assert_eq!(grad_at(&grads, 0).shape(), &[2, 3, 4]);
    assert_eq!(grad_at(&grads, 0), &arange(&[2, 3, 4]));
    assert!(grads[1].is_none());
}

#[test]
fn test_view_copy_rejects_bad_shape() {
    let op = fixture_op("numpy_view_copy");
    let x = arange(&[2, 3]);
    assert!(matches!(
        op.call(&[x.clone().into(), Value::IntList(vec![4, 2])]),
        Err(Error::Shape(_))
    ));
    assert!(matches!(
        op.call(&[x.into(), Value::IntList(vec![-1, -1])]),
        Err(Error::Shape(_))
    ));
}

#[test]
fn test_view_copy_overflowing_shape_is_an_error() {
    let op = fixture_op("numpy_view_copy");
    let x = arange(&[2, 3]);
    assert!(matches!(
        op.call(&[x.clone().into(), Value::IntList(vec![i64::MAX, 4])]),
        Err(Error::Shape(_))
    ));

    let mut env = ShapeEnv::new();
    let args = [
        FakeValue::Tensor(x.meta()),
        FakeValue::IntList(vec![1 << 40, 1 << 40]),
    ];
    assert!(matches!(op.call_fake(&args, &mut env), Err(Error::Shape(_))));
}

// ================================================================================
// numpy_cat
// ================================================================================

#[test]
fn test_cat_forward_and_fake() {
    let op = fixture_op("numpy_cat");
    let xs = vec![arange(&[2, 3]), arange(&[1, 3])];
    let outputs = run_and_check_fake(op.as_ref(), &[xs.into(), Value::Int(0)]);

    let out = tensor_at(&outputs, 0);
    assert_eq!(out.shape(), &[3, 3]);
    assert_eq!(
        out.to_vec::<f64>().unwrap(),
        vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 0.0, 1.0, 2.0]
    );
}

#[test]
fn test_cat_backward_splits_gradient() {
    let op = fixture_op("numpy_cat");
    let xs = vec![
        arange(&[2, 2]).with_requires_grad(true),
        arange(&[2, 3]).with_requires_grad(true),
    ];
    let call = op.call_with_grad(&[xs.into(), Value::Int(-1)]).unwrap();

    let grad = arange(&[2, 5]);
    let grads = call.backward(vec![Some(grad.into())]).unwrap();

    let pieces = pieces_of(grads[0].as_ref().expect("gradient for xs"));
    assert_eq!(pieces.len(), 2);
    assert_eq!(pieces[0].to_vec::<f64>().unwrap(), vec![0.0, 1.0, 5.0, 6.0]);
    assert_eq!(pieces[1].to_vec::<f64>().unwrap(), vec![2.0, 3.0, 4.0, 7.0, 8.0, 9.0]);
    assert!(grads[1].is_none());
}

#[test]
fn test_cat_preconditions() {
    assert!(matches!(numpy_cat(&[], 0), Err(Error::Precondition(_))));

    let a = arange(&[2, 2]);
    let b = arange(&[2, 2]).on(Device::Cuda(0));
    assert!(matches!(numpy_cat(&[a.clone(), b], 0), Err(Error::Precondition(_))));

    let c = arange(&[2, 3]);
    assert!(matches!(numpy_cat(&[a, c], 0), Err(Error::Shape(_))));
}

#[test]
fn test_cat_fake_with_unbacked_dim() {
    let op = fixture_op("numpy_cat");
    let mut env = ShapeEnv::new();
    let unbacked = env.create_unbacked_size();
    let first = FakeTensor::new(vec![unbacked, SymbolicDim::Fixed(3)], DataType::F32, Device::Cpu);
    let second = FakeTensor::fixed(&[2, 3], DataType::F32, Device::Cpu);

    let args = [FakeValue::from(vec![first, second]), FakeValue::Int(0)];
    let out = op.call_fake(&args, &mut env).unwrap();
    let out = out[0].as_tensor().unwrap();

    assert!(!out.shape[0].is_fixed());
    assert_eq!(out.shape[1], SymbolicDim::Fixed(3));
    assert_eq!(env.num_unbacked(), 2);
}

// ================================================================================
// numpy_split_copy / numpy_split_copy_with_int
// ================================================================================

#[test]
fn test_split_copy_forward_and_fake() {
    let op = fixture_op("numpy_split_copy");
    let x = arange(&[2, 9]);
    let outputs = run_and_check_fake(
        op.as_ref(),
        &[x.into(), Value::IntList(vec![1, 3, 6]), Value::Int(1)],
    );

    let widths: Vec<usize> = pieces_of(&outputs[0]).iter().map(|p| p.shape()[1]).collect();
    assert_eq!(widths, vec![1, 2, 3, 3]);
}

#[test]
fn test_split_copy_clamps_out_of_range_indices() {
    let x = arange(&[5]);
    let pieces = numpy_split_copy(&x, &[3, 1, 10], 0).unwrap();
    let lens: Vec<usize> = pieces.iter().map(Tensor::len).collect();
    assert_eq!(lens, vec![3, 0, 4, 0]);
}

#[test]
fn test_split_copy_with_int_returns_count() {
    let op = fixture_op("numpy_split_copy_with_int");
    let x = arange(&[2, 9]);
    let outputs = run_and_check_fake(
        op.as_ref(),
        &[x.into(), Value::IntList(vec![1, 3, 6]), Value::Int(1)],
    );

    assert_eq!(pieces_of(&outputs[0]).len(), 4);
    assert_eq!(outputs[1], Value::Int(3));
}

#[test]
fn test_split_copy_backward_concatenates() {
    for name in ["numpy_split_copy", "numpy_split_copy_with_int"] {
        let op = fixture_op(name);
        let x = arange(&[6]).with_requires_grad(true);
        let call = op
            .call_with_grad(&[x.into(), Value::IntList(vec![2, 4]), Value::Int(0)])
            .unwrap();
        assert!(call.outputs[0].requires_grad());

        let grad: Vec<Tensor> = (0..3).map(|_| arange(&[2])).collect();
        let mut grad_outputs = vec![Some(Value::from(grad))];
        grad_outputs.resize(call.outputs.len(), None);
        let grads = call.backward(grad_outputs).unwrap();

        assert_eq!(
            grad_at(&grads, 0).to_vec::<f64>().unwrap(),
            vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0],
            "{}",
            name
        );
        assert!(grads[1].is_none() && grads[2].is_none());
    }
}

#[test]
fn test_split_copy_fake_with_unbacked_dim() {
    let op = fixture_op("numpy_split_copy");
    let mut env = ShapeEnv::new();
    let unbacked = env.create_unbacked_size();
    let x = FakeTensor::new(vec![unbacked], DataType::F64, Device::Cpu);

    let args = [x.into(), FakeValue::IntList(vec![1, 2]), FakeValue::Int(0)];
    let out = op.call_fake(&args, &mut env).unwrap();

    match &out[0] {
        FakeValue::TensorList(pieces) => {
            assert_eq!(pieces.len(), 3);
            assert!(pieces.iter().all(|p| !p.shape[0].is_fixed()));
        }
        other => panic!("expected a tensor list, got {}", other),
    }
    assert_eq!(env.num_unbacked(), 4);
}

//! Tests for numpy_sort and numpy_take.

mod common;

use common::{
    DataType, Error, Value, f64_tensor, fixture_op, grad_at, i64_tensor, run_and_check_fake,
    tensor_at,
};
use opfixture_operators::operators::{numpy_sort, numpy_take};
use proptest::prelude::*;

fn matrix() -> impl Strategy<Value = (Vec<f64>, usize, usize, i64)> {
    (1usize..5, 1usize..7).prop_flat_map(|(rows, cols)| {
        (
            prop::collection::vec(-50.0f64..50.0, rows * cols),
            Just(rows),
            Just(cols),
            -2i64..2,
        )
    })
}

proptest! {
    #[test]
    fn prop_take_inverts_sort((values, rows, cols, dim) in matrix()) {
        let x = f64_tensor(&values, &[rows, cols]);
        let (sorted, ind, ind_inv) = numpy_sort(&x, dim).unwrap();

        prop_assert_eq!(&numpy_take(&x, &ind, &ind_inv, dim).unwrap(), &sorted);
        prop_assert_eq!(&numpy_take(&sorted, &ind_inv, &ind, dim).unwrap(), &x);
    }

    #[test]
    fn prop_sorted_lanes_are_ordered((values, rows, cols, _dim) in matrix()) {
        let x = f64_tensor(&values, &[rows, cols]);
        let (sorted, _, _) = numpy_sort(&x, 1).unwrap();
        let sorted = sorted.to_vec::<f64>().unwrap();

        for row in sorted.chunks(cols) {
            prop_assert!(row.windows(2).all(|w| w[0] <= w[1]));
        }
    }
}

// ================================================================================
// numpy_sort
// ================================================================================

#[test]
fn test_sort_is_stable_and_fake_matches() {
    let op = fixture_op("numpy_sort");
    let x = f64_tensor(&[2.0, 1.0, 2.0, 0.0], &[4]);
    let outputs = run_and_check_fake(op.as_ref(), &[x.into(), Value::Int(0)]);

    assert_eq!(tensor_at(&outputs, 0).to_vec::<f64>().unwrap(), vec![0.0, 1.0, 2.0, 2.0]);
    assert_eq!(tensor_at(&outputs, 1).to_vec::<i64>().unwrap(), vec![3, 1, 0, 2]);
    assert_eq!(tensor_at(&outputs, 2).to_vec::<i64>().unwrap(), vec![2, 1, 3, 0]);
    assert_eq!(tensor_at(&outputs, 1).dtype(), DataType::I64);
}

#[test]
fn test_sort_backward_scatters_to_original_positions() {
    let op = fixture_op("numpy_sort");
    let x = f64_tensor(&[3.0, 1.0, 2.0], &[3]).with_requires_grad(true);
    let call = op.call_with_grad(&[x.into(), Value::Int(0)]).unwrap();

    assert!(call.outputs[0].requires_grad());
    assert!(!call.outputs[1].requires_grad());
    assert!(!call.outputs[2].requires_grad());

    // Gradient w.r.t. sorted values [1, 2, 3].
    let grad = f64_tensor(&[10.0, 20.0, 30.0], &[3]);
    let grads = call.backward(vec![Some(grad.into()), None, None]).unwrap();

    assert_eq!(grads.len(), 2);
    assert_eq!(grad_at(&grads, 0).to_vec::<f64>().unwrap(), vec![30.0, 10.0, 20.0]);
    assert!(grads[1].is_none());
}

#[test]
fn test_sort_rejects_bad_dim() {
    let op = fixture_op("numpy_sort");
    let x = f64_tensor(&[1.0, 2.0], &[2]);
    assert!(matches!(
        op.call(&[x.into(), Value::Int(3)]),
        Err(Error::Shape(_))
    ));
}

// ================================================================================
// numpy_take
// ================================================================================

#[test]
fn test_take_forward_and_fake() {
    let op = fixture_op("numpy_take");
    let x = f64_tensor(&[10.0, 20.0, 30.0, 40.0, 50.0, 60.0], &[2, 3]);
    let ind = i64_tensor(&[2, 0, 1, 1, 2, 0], &[2, 3]);
    let ind_inv = i64_tensor(&[1, 2, 0, 2, 0, 1], &[2, 3]);
    let outputs = run_and_check_fake(
        op.as_ref(),
        &[x.into(), ind.into(), ind_inv.into(), Value::Int(1)],
    );

    assert_eq!(
        tensor_at(&outputs, 0).to_vec::<f64>().unwrap(),
        vec![30.0, 10.0, 20.0, 50.0, 60.0, 40.0]
    );
}

#[test]
fn test_take_negative_indices() {
    let x = f64_tensor(&[1.0, 2.0, 3.0], &[3]);
    let ind = i64_tensor(&[-1, -2, -3], &[3]);
    let out = numpy_take(&x, &ind, &ind, 0).unwrap();
    assert_eq!(out.to_vec::<f64>().unwrap(), vec![3.0, 2.0, 1.0]);
}

#[test]
fn test_take_backward_gathers_with_inverse() {
    let op = fixture_op("numpy_take");
    let x = f64_tensor(&[3.0, 1.0, 2.0], &[3]).with_requires_grad(true);
    let (_, ind, ind_inv) = numpy_sort(&x.detach(), 0).unwrap();
    let call = op
        .call_with_grad(&[x.into(), ind.into(), ind_inv.into(), Value::Int(0)])
        .unwrap();
    assert_eq!(
        tensor_at(&call.outputs, 0).to_vec::<f64>().unwrap(),
        vec![1.0, 2.0, 3.0]
    );

    let grad = f64_tensor(&[10.0, 20.0, 30.0], &[3]);
    let grads = call.backward(vec![Some(grad.into())]).unwrap();

    assert_eq!(grads.len(), 4);
    assert_eq!(grad_at(&grads, 0).to_vec::<f64>().unwrap(), vec![30.0, 10.0, 20.0]);
    assert!(grads[1..].iter().all(Option::is_none));
}

#[test]
fn test_take_preconditions() {
    let x = f64_tensor(&[1.0, 2.0, 3.0], &[3]);
    let ind = i64_tensor(&[0, 1, 2], &[3]);

    let wrong_dtype = ind.cast(DataType::I32);
    assert!(matches!(
        numpy_take(&x, &wrong_dtype, &ind, 0),
        Err(Error::Precondition(_))
    ));

    let wrong_shape = i64_tensor(&[0, 1], &[2]);
    assert!(matches!(
        numpy_take(&x, &wrong_shape, &wrong_shape, 0),
        Err(Error::Shape(_))
    ));

    let out_of_range = i64_tensor(&[0, 1, 3], &[3]);
    assert!(matches!(
        numpy_take(&x, &out_of_range, &ind, 0),
        Err(Error::Shape(_))
    ));
}

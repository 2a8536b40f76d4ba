//! Tests for the element-wise operators (numpy_cube, numpy_mul).

mod common;

use common::{
    DataType, Device, Error, Value, f64_tensor, fixture_op, grad_at, run_and_check_fake, tensor_at,
};

// ================================================================================
// numpy_cube
// ================================================================================

#[test]
fn test_cube_forward_and_fake() {
    let op = fixture_op("numpy_cube");
    let x = f64_tensor(&[1.0, 2.0, -0.5], &[3]).on(Device::Cuda(1));
    let outputs = run_and_check_fake(op.as_ref(), &[x.into()]);

    assert_eq!(tensor_at(&outputs, 0).to_vec::<f64>().unwrap(), vec![1.0, 8.0, -0.125]);
    assert_eq!(tensor_at(&outputs, 1).to_vec::<f64>().unwrap(), vec![3.0, 12.0, 0.75]);
    assert_eq!(tensor_at(&outputs, 1).device(), Device::Cuda(1));
}

#[test]
fn test_cube_backward_uses_both_output_gradients() {
    let op = fixture_op("numpy_cube");
    let x = f64_tensor(&[1.0, 2.0], &[2]).with_requires_grad(true);
    let call = op.call_with_grad(&[x.into()]).unwrap();
    assert!(call.outputs[0].requires_grad());
    assert!(call.outputs[1].requires_grad());

    let ones = f64_tensor(&[1.0, 1.0], &[2]);
    let grads = call
        .backward(vec![Some(ones.clone().into()), Some(ones.into())])
        .unwrap();

    // 3x² + 6x
    assert_eq!(grad_at(&grads, 0).to_vec::<f64>().unwrap(), vec![9.0, 24.0]);
}

#[test]
fn test_cube_backward_missing_dx_gradient() {
    let op = fixture_op("numpy_cube");
    let x = f64_tensor(&[1.0, 2.0], &[2]).with_requires_grad(true);
    let call = op.call_with_grad(&[x.into()]).unwrap();

    let grads = call
        .backward(vec![Some(f64_tensor(&[1.0, 1.0], &[2]).into()), None])
        .unwrap();
    assert_eq!(grad_at(&grads, 0).to_vec::<f64>().unwrap(), vec![3.0, 12.0]);
}

// ================================================================================
// numpy_mul
// ================================================================================

#[test]
fn test_mul_forward_and_fake() {
    let op = fixture_op("numpy_mul");
    let x = f64_tensor(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
    let y = f64_tensor(&[2.0], &[1]);
    let outputs = run_and_check_fake(op.as_ref(), &[x.into(), y.into()]);

    assert_eq!(
        tensor_at(&outputs, 0).to_vec::<f64>().unwrap(),
        vec![2.0, 4.0, 6.0, 8.0, 10.0, 12.0]
    );
}

#[test]
fn test_mul_backward_reduces_broadcast_dims() {
    let op = fixture_op("numpy_mul");
    let x = f64_tensor(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).with_requires_grad(true);
    let y = f64_tensor(&[10.0, 20.0, 30.0], &[3]).with_requires_grad(true);
    let call = op.call_with_grad(&[x.into(), y.into()]).unwrap();

    let grad = f64_tensor(&[1.0; 6], &[2, 3]);
    let grads = call.backward(vec![Some(grad.into())]).unwrap();

    assert_eq!(
        grad_at(&grads, 0).to_vec::<f64>().unwrap(),
        vec![10.0, 20.0, 30.0, 10.0, 20.0, 30.0]
    );
    assert_eq!(grad_at(&grads, 1).shape(), &[3]);
    assert_eq!(grad_at(&grads, 1).to_vec::<f64>().unwrap(), vec![5.0, 7.0, 9.0]);
}

#[test]
fn test_mul_backward_only_for_inputs_requiring_grad() {
    let op = fixture_op("numpy_mul");
    let x = f64_tensor(&[1.0, 2.0], &[2]);
    let y = f64_tensor(&[3.0, 4.0], &[2]).with_requires_grad(true);
    let call = op.call_with_grad(&[x.into(), y.into()]).unwrap();

    let grads = call
        .backward(vec![Some(f64_tensor(&[1.0, 1.0], &[2]).into())])
        .unwrap();
    assert!(grads[0].is_none());
    assert_eq!(grad_at(&grads, 1).to_vec::<f64>().unwrap(), vec![1.0, 2.0]);
}

#[test]
fn test_mul_rejects_mixed_dtypes_in_fake() {
    let op = fixture_op("numpy_mul");
    let x = f64_tensor(&[1.0], &[1]);
    let y = x.cast(DataType::F32);

    assert!(matches!(
        op.call(&[x.clone().into(), y.clone().into()]),
        Err(Error::Precondition(_))
    ));

    let mut env = common::ShapeEnv::new();
    let fakes = [Value::from(x).meta(), Value::from(y).meta()];
    assert!(matches!(
        op.call_fake(&fakes, &mut env),
        Err(Error::Precondition(_))
    ));
}

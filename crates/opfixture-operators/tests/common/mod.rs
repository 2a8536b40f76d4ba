//! Common test utilities for operator tests.
//!
//! Shared tensor builders plus a helper that runs an operator both for real
//! and through its fake variant and checks that the two agree.

#![allow(dead_code)]

use std::collections::HashMap;

// Re-export types commonly used in tests
#[allow(unused_imports)]
pub use opfixture_core::{
    DataType, Device, Error, FakeValue, Operator, ShapeEnv, Tensor, Value,
};
#[allow(unused_imports)]
pub use opfixture_operators::fixture_registry;

/// Build an `f64` tensor.
pub fn f64_tensor(values: &[f64], shape: &[usize]) -> Tensor {
    Tensor::from_vec(values.to_vec(), shape).expect("valid shape")
}

/// Build an `i64` tensor.
pub fn i64_tensor(values: &[i64], shape: &[usize]) -> Tensor {
    Tensor::from_vec(values.to_vec(), shape).expect("valid shape")
}

/// Borrow output `index` as a tensor.
pub fn tensor_at(outputs: &[Value], index: usize) -> &Tensor {
    outputs[index]
        .as_tensor()
        .unwrap_or_else(|| panic!("output {} is not a tensor", index))
}

/// Borrow an optional gradient as a tensor.
pub fn grad_at(grads: &[Option<Value>], index: usize) -> &Tensor {
    grads[index]
        .as_ref()
        .and_then(Value::as_tensor)
        .unwrap_or_else(|| panic!("gradient {} is not a tensor", index))
}

/// Look up a fixture operator by bare name.
pub fn fixture_op(name: &str) -> std::sync::Arc<dyn Operator> {
    fixture_registry()
        .get_arc(name)
        .unwrap_or_else(|| panic!("operator {} is not registered", name))
}

/// Run `op` for real and through its fake variant, asserting the fake
/// outputs describe the real ones. Returns the real outputs.
pub fn run_and_check_fake(op: &dyn Operator, args: &[Value]) -> Vec<Value> {
    let outputs = op.call(args).expect("forward succeeds");

    let fake_args: Vec<FakeValue> = args.iter().map(Value::meta).collect();
    let mut env = ShapeEnv::new();
    let fakes = op.call_fake(&fake_args, &mut env).expect("fake succeeds");
    assert_eq!(fakes.len(), outputs.len());

    let mut bindings = HashMap::new();
    for (real, fake) in outputs.iter().zip(&fakes) {
        match (real, fake) {
            (Value::Tensor(t), FakeValue::Tensor(f)) => {
                f.bind(t, &mut bindings).expect("fake tensor matches");
            }
            (Value::TensorList(ts), FakeValue::TensorList(fs)) => {
                assert_eq!(ts.len(), fs.len());
                for (t, f) in ts.iter().zip(fs) {
                    f.bind(t, &mut bindings).expect("fake tensor matches");
                }
            }
            (real, fake) => assert_eq!(&real.meta(), fake),
        }
    }
    outputs
}

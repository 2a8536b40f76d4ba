//! Agreement between an operator's fake variant and its forward.

use std::collections::HashMap;

use opfixture_core::{FakeValue, Operator, ShapeEnv, Value};

use crate::{CheckError, Result};

/// Run `op` for real and through its fake variant, checking every fake
/// output describes the matching real output.
///
/// Unbacked sizes bind to the first real size they meet and must agree
/// wherever they occur again. Returns the real outputs.
pub fn check_fake(op: &dyn Operator, args: &[Value]) -> Result<Vec<Value>> {
    let outputs = op.call(args)?;

    let fake_args: Vec<FakeValue> = args.iter().map(Value::meta).collect();
    let mut env = ShapeEnv::new();
    let fakes = op.call_fake(&fake_args, &mut env)?;

    if fakes.len() != outputs.len() {
        return Err(CheckError::FakeMismatch {
            output: fakes.len().min(outputs.len()),
            message: format!(
                "fake returned {} outputs, forward returned {}",
                fakes.len(),
                outputs.len()
            ),
        });
    }

    let mut bindings = HashMap::new();
    for (index, (real, fake)) in outputs.iter().zip(&fakes).enumerate() {
        let mismatch = |message: String| CheckError::FakeMismatch {
            output: index,
            message,
        };
        match (real, fake) {
            (Value::Tensor(tensor), FakeValue::Tensor(meta)) => {
                meta.bind(tensor, &mut bindings)
                    .map_err(|e| mismatch(e.to_string()))?;
            }
            (Value::TensorList(tensors), FakeValue::TensorList(metas)) => {
                if tensors.len() != metas.len() {
                    return Err(mismatch(format!(
                        "fake list has {} tensors, real list has {}",
                        metas.len(),
                        tensors.len()
                    )));
                }
                for (tensor, meta) in tensors.iter().zip(metas) {
                    meta.bind(tensor, &mut bindings)
                        .map_err(|e| mismatch(e.to_string()))?;
                }
            }
            (real, fake) if real.meta() == *fake => {}
            (real, fake) => {
                return Err(mismatch(format!("expected {} but fake gave {}", real, fake)));
            }
        }
    }

    tracing::trace!(
        op = %op.name(),
        unbacked = env.num_unbacked(),
        bound = bindings.len(),
        "fake outputs agree"
    );
    Ok(outputs)
}

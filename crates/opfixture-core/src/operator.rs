//! Custom operator registration trait and type-erased dispatch.
//!
//! Operator authors implement [`CustomOp`]: a forward, a fake variant for
//! shape inference, and optionally an autograd rule split into
//! `setup_context` and `backward`. Every `CustomOp` is usable as a
//! `dyn Operator`, which validates arguments against the schema and wires up
//! a single-use backward node when inputs require gradients.

use crate::fake::ShapeEnv;
use crate::schema::OpSchema;
use crate::tensor::Tensor;
use crate::value::{FakeValue, Value};
use crate::{Error, Result};

/// Trait for implementing custom operators.
///
/// # Example
///
/// ```
/// use opfixture_core::{
///     CustomOp, FakeArgs, FakeValue, OpSchema, Operator, ParamKind, Result, ReturnKind,
///     ShapeEnv, Tensor, Value, ValueArgs,
/// };
///
/// struct Double;
///
/// impl CustomOp for Double {
///     type Ctx = ();
///
///     fn schema(&self) -> OpSchema {
///         OpSchema::new("demo", "double")
///             .param("x", ParamKind::Tensor)
///             .returns(&[ReturnKind::Tensor])
///     }
///
///     fn forward(&self, args: &[Value]) -> Result<Vec<Value>> {
///         Ok(vec![args.tensor(0)?.scale(2.0).into()])
///     }
///
///     fn fake(&self, args: &[FakeValue], _env: &mut ShapeEnv) -> Result<Vec<FakeValue>> {
///         Ok(vec![args.tensor(0)?.empty_like().into()])
///     }
/// }
///
/// let x = Tensor::from_vec(vec![1.0f64, 2.0], &[2]).unwrap();
/// let outputs = Double.call(&[x.into()]).unwrap();
/// assert_eq!(outputs[0].as_tensor().unwrap().to_vec::<f64>().unwrap(), vec![2.0, 4.0]);
/// ```
pub trait CustomOp: Send + Sync + 'static {
    /// State saved by `setup_context` and consumed by `backward`.
    type Ctx: Send + 'static;

    fn schema(&self) -> OpSchema;

    /// Compute the outputs from concrete inputs.
    fn forward(&self, args: &[Value]) -> Result<Vec<Value>>;

    /// Produce placeholders with the shapes, dtypes and devices `forward`
    /// would produce, without touching data.
    fn fake(&self, args: &[FakeValue], env: &mut ShapeEnv) -> Result<Vec<FakeValue>>;

    fn supports_autograd(&self) -> bool {
        false
    }

    /// Output positions that never receive gradients.
    fn non_differentiable_outputs(&self) -> &'static [usize] {
        &[]
    }

    /// Record what `backward` needs. Called once, right after `forward`.
    fn setup_context(&self, args: &[Value], outputs: &[Value]) -> Result<Self::Ctx> {
        let _ = (args, outputs);
        Err(Error::Autograd(format!(
            "{} has no autograd formula",
            CustomOp::schema(self).name
        )))
    }

    /// Compute input gradients, one slot per parameter.
    ///
    /// `grad_outputs` has one entry per output; non-differentiable outputs
    /// get `None` and every other output gets a tensor (zeros if the caller
    /// supplied none). Return `None` for parameters that are not tensors or
    /// whose `needs_input_grad` flag is false.
    fn backward(
        &self,
        ctx: Self::Ctx,
        grad_outputs: &[Option<Value>],
        needs_input_grad: &[bool],
    ) -> Result<Vec<Option<Value>>> {
        let _ = (ctx, grad_outputs, needs_input_grad);
        Err(Error::Autograd(format!(
            "{} has no autograd formula",
            CustomOp::schema(self).name
        )))
    }
}

/// Type-erased operator dispatch.
pub trait Operator: Send + Sync {
    fn schema(&self) -> OpSchema;

    /// Qualified operator name, e.g. `_opfixture::numpy_cube`.
    fn name(&self) -> String {
        self.schema().name.to_string()
    }

    fn supports_autograd(&self) -> bool;

    /// Run forward without recording anything for autograd.
    fn call(&self, args: &[Value]) -> Result<Vec<Value>>;

    /// Run the fake variant.
    fn call_fake(&self, args: &[FakeValue], env: &mut ShapeEnv) -> Result<Vec<FakeValue>>;

    /// Run forward and, when any input requires grad, build a backward node.
    fn call_with_grad(&self, args: &[Value]) -> Result<GradCall<'_>>;
}

/// A single-use backward node holding the saved context.
pub trait GradFn: Send {
    /// Per-parameter flags recorded at forward time.
    fn needs_input_grad(&self) -> &[bool];

    /// Consume the node and compute input gradients from output gradients.
    fn apply(self: Box<Self>, grad_outputs: Vec<Option<Value>>) -> Result<Vec<Option<Value>>>;
}

/// Outputs of a forward call plus the backward node, if one was recorded.
pub struct GradCall<'a> {
    pub outputs: Vec<Value>,
    pub grad_fn: Option<Box<dyn GradFn + 'a>>,
}

impl GradCall<'_> {
    /// Run backward with the given output gradients.
    ///
    /// # Errors
    /// Returns `Error::Autograd` if no backward node was recorded.
    pub fn backward(self, grad_outputs: Vec<Option<Value>>) -> Result<Vec<Option<Value>>> {
        let grad_fn = self
            .grad_fn
            .ok_or_else(|| Error::Autograd("outputs do not require grad".to_string()))?;
        grad_fn.apply(grad_outputs)
    }
}

impl<O: CustomOp> Operator for O {
    fn schema(&self) -> OpSchema {
        CustomOp::schema(self)
    }

    fn supports_autograd(&self) -> bool {
        CustomOp::supports_autograd(self)
    }

    fn call(&self, args: &[Value]) -> Result<Vec<Value>> {
        let schema = CustomOp::schema(self);
        let _span = tracing::debug_span!("call", op = %schema.name).entered();
        schema.validate_args(args)?;
        let outputs = self.forward(args)?;
        schema.validate_outputs(&outputs)?;
        Ok(outputs)
    }

    fn call_fake(&self, args: &[FakeValue], env: &mut ShapeEnv) -> Result<Vec<FakeValue>> {
        let schema = CustomOp::schema(self);
        let _span = tracing::debug_span!("call_fake", op = %schema.name).entered();
        schema.validate_fake_args(args)?;
        let outputs = self.fake(args, env)?;
        schema.validate_fake_outputs(&outputs)?;
        Ok(outputs)
    }

    fn call_with_grad(&self, args: &[Value]) -> Result<GradCall<'_>> {
        let outputs = Operator::call(self, args)?;
        let needs_input_grad: Vec<bool> = args.iter().map(Value::requires_grad).collect();

        if !needs_input_grad.iter().any(|&needed| needed) {
            return Ok(GradCall {
                outputs,
                grad_fn: None,
            });
        }
        if !CustomOp::supports_autograd(self) {
            tracing::debug!(
                op = %CustomOp::schema(self).name,
                "inputs require grad but operator has no autograd formula"
            );
            return Ok(GradCall {
                outputs,
                grad_fn: None,
            });
        }

        let ctx = self.setup_context(args, &outputs)?;
        let non_differentiable = self.non_differentiable_outputs();
        let outputs: Vec<Value> = outputs
            .into_iter()
            .enumerate()
            .map(|(i, output)| output.with_requires_grad(!non_differentiable.contains(&i)))
            .collect();

        let node = BackwardNode {
            op: self,
            ctx,
            needs_input_grad,
            inputs: args.iter().map(Value::meta).collect(),
            outputs: outputs.iter().map(Value::meta).collect(),
        };
        Ok(GradCall {
            outputs,
            grad_fn: Some(Box::new(node)),
        })
    }
}

struct BackwardNode<'a, O: CustomOp> {
    op: &'a O,
    ctx: O::Ctx,
    needs_input_grad: Vec<bool>,
    inputs: Vec<FakeValue>,
    outputs: Vec<FakeValue>,
}

impl<O: CustomOp> GradFn for BackwardNode<'_, O> {
    fn needs_input_grad(&self) -> &[bool] {
        &self.needs_input_grad
    }

    fn apply(self: Box<Self>, grad_outputs: Vec<Option<Value>>) -> Result<Vec<Option<Value>>> {
        let BackwardNode {
            op,
            ctx,
            needs_input_grad,
            inputs,
            outputs,
        } = *self;
        let schema = CustomOp::schema(op);
        let _span = tracing::debug_span!("backward", op = %schema.name).entered();

        if grad_outputs.len() != outputs.len() {
            return Err(Error::Autograd(format!(
                "{} has {} outputs but received {} gradients",
                schema.name,
                outputs.len(),
                grad_outputs.len()
            )));
        }

        let non_differentiable = op.non_differentiable_outputs();
        let mut grads = Vec::with_capacity(outputs.len());
        for (i, (grad, meta)) in grad_outputs.into_iter().zip(&outputs).enumerate() {
            if non_differentiable.contains(&i) || !is_differentiable(meta) {
                if grad.is_some() {
                    tracing::trace!(output = i, "dropping gradient for non-differentiable output");
                }
                grads.push(None);
                continue;
            }
            let grad = match grad {
                Some(grad) => {
                    check_against_meta(&grad, meta)
                        .map_err(|e| Error::Autograd(format!("grad_outputs[{}]: {}", i, e)))?;
                    grad
                }
                None => zeros_for(meta)?,
            };
            grads.push(Some(grad));
        }

        let input_grads = op.backward(ctx, &grads, &needs_input_grad)?;
        if input_grads.len() != schema.params.len() {
            return Err(Error::Autograd(format!(
                "{} backward returned {} gradients for {} parameters",
                schema.name,
                input_grads.len(),
                schema.params.len()
            )));
        }

        let mut result = Vec::with_capacity(input_grads.len());
        for (i, grad) in input_grads.into_iter().enumerate() {
            let param = &schema.params[i];
            let Some(grad) = grad else {
                result.push(None);
                continue;
            };
            if !param.kind.is_tensor() {
                return Err(Error::Autograd(format!(
                    "{} backward returned a gradient for non-tensor argument '{}'",
                    schema.name, param.name
                )));
            }
            if !needs_input_grad[i] {
                tracing::warn!(
                    op = %schema.name,
                    param = param.name,
                    "discarding gradient for input that does not require grad"
                );
                result.push(None);
                continue;
            }
            check_against_meta(&grad, &inputs[i]).map_err(|e| {
                Error::Autograd(format!("gradient for '{}': {}", param.name, e))
            })?;
            result.push(Some(grad));
        }
        Ok(result)
    }
}

fn is_differentiable(meta: &FakeValue) -> bool {
    match meta {
        FakeValue::Tensor(tensor) => tensor.dtype.is_floating_point(),
        FakeValue::TensorList(tensors) => {
            !tensors.is_empty() && tensors.iter().all(|t| t.dtype.is_floating_point())
        }
        _ => false,
    }
}

fn zeros_for(meta: &FakeValue) -> Result<Value> {
    let zeros = |tensor: &crate::fake::FakeTensor| -> Result<Tensor> {
        let shape = tensor
            .static_shape()
            .ok_or_else(|| Error::Autograd(format!("cannot materialize zeros for {}", tensor)))?;
        Ok(Tensor::zeros(&shape, tensor.dtype).on(tensor.device))
    };
    match meta {
        FakeValue::Tensor(tensor) => Ok(Value::Tensor(zeros(tensor)?)),
        FakeValue::TensorList(tensors) => Ok(Value::TensorList(
            tensors.iter().map(zeros).collect::<Result<_>>()?,
        )),
        other => Err(Error::Autograd(format!(
            "cannot materialize a gradient for {}",
            other
        ))),
    }
}

fn check_against_meta(value: &Value, meta: &FakeValue) -> Result<()> {
    let check = |tensor: &Tensor, fake: &crate::fake::FakeTensor| -> Result<()> {
        if fake.static_shape().as_deref() != Some(tensor.shape()) {
            return Err(Error::Shape(format!(
                "expected shape {} but got {:?}",
                fake,
                tensor.shape()
            )));
        }
        if fake.dtype != tensor.dtype() {
            return Err(Error::DataType(format!(
                "expected dtype {} but got {}",
                fake.dtype,
                tensor.dtype()
            )));
        }
        Ok(())
    };
    match (value, meta) {
        (Value::Tensor(tensor), FakeValue::Tensor(fake)) => check(tensor, fake),
        (Value::TensorList(tensors), FakeValue::TensorList(fakes)) => {
            if tensors.len() != fakes.len() {
                return Err(Error::Shape(format!(
                    "expected {} tensors but got {}",
                    fakes.len(),
                    tensors.len()
                )));
            }
            tensors.iter().zip(fakes).try_for_each(|(t, f)| check(t, f))
        }
        (value, meta) => Err(Error::Argument(format!(
            "expected {} but got {}",
            meta.kind(),
            value.kind()
        ))),
    }
}

//! Numerical gradient checking against the registered backward.

use opfixture_core::{DataType, Operator, Tensor, Value};
use opfixture_operators::{OpInfo, SampleInput};

use crate::{CheckConfig, CheckError, Result};

/// Jacobian of one input: one row per input element, one column per
/// selected output element.
type Jacobian = Vec<Vec<f64>>;

/// Compare the analytical Jacobian of `info`'s operator with central finite
/// differences at `sample`.
///
/// Floating-point arguments are promoted to `float64` first. Each selected
/// output element is back-propagated as a one-hot gradient, and each element
/// of an input that requires grad is perturbed by `±eps`. A missing gradient
/// for an input that requires grad counts as zero. Inputs that do not require
/// grad must receive `None`.
pub fn gradcheck(info: &OpInfo, sample: &SampleInput, config: &CheckConfig) -> Result<()> {
    let op = info.op.as_ref();
    let args: Vec<Value> = sample.arguments().iter().map(to_double).collect();

    let inputs: Vec<usize> = (0..args.len()).filter(|&i| args[i].requires_grad()).collect();
    if inputs.is_empty() {
        return Err(CheckError::Gradcheck(format!(
            "{}: no input requires grad",
            info.name
        )));
    }

    let outputs = op.call_with_grad(&args)?.outputs;
    let selected: Vec<usize> = (0..outputs.len())
        .filter(|&i| outputs[i].requires_grad() && info.is_gradcheck_output(i))
        .collect();
    if selected.is_empty() {
        return Err(CheckError::Gradcheck(format!(
            "{}: no differentiable outputs",
            info.name
        )));
    }

    let _span = tracing::debug_span!("gradcheck", op = info.name).entered();
    let numerical = numerical_jacobian(op, &args, &inputs, &selected, config.eps)?;
    let analytical = analytical_jacobian(op, &args, &inputs, &outputs, &selected)?;

    for ((&input, analytical), numerical) in inputs.iter().zip(&analytical).zip(&numerical) {
        for (input_element, (a_row, n_row)) in analytical.iter().zip(numerical).enumerate() {
            for (output_element, (&a, &n)) in a_row.iter().zip(n_row).enumerate() {
                if !config.is_close(a, n) {
                    return Err(CheckError::GradientMismatch {
                        input,
                        input_element,
                        output_element,
                        analytical: a,
                        numerical: n,
                    });
                }
            }
        }
    }

    tracing::debug!(
        inputs = inputs.len(),
        outputs = selected.len(),
        "analytical and numerical gradients agree"
    );
    Ok(())
}

fn numerical_jacobian(
    op: &dyn Operator,
    args: &[Value],
    inputs: &[usize],
    selected: &[usize],
    eps: f64,
) -> Result<Vec<Jacobian>> {
    let evaluate = |index: usize, element: usize, delta: f64| -> Result<Vec<f64>> {
        let mut perturbed = args.to_vec();
        perturbed[index] = map_element(&args[index], element, |t, at| nudged(t, at, delta))?;
        let outputs = op.call(&perturbed)?;
        Ok(flatten_selected(&outputs, selected))
    };

    inputs
        .iter()
        .map(|&index| -> Result<Jacobian> {
            (0..numel(&args[index]))
                .map(|element| -> Result<Vec<f64>> {
                    let plus = evaluate(index, element, eps)?;
                    let minus = evaluate(index, element, -eps)?;
                    Ok(plus
                        .iter()
                        .zip(&minus)
                        .map(|(p, m)| (p - m) / (2.0 * eps))
                        .collect())
                })
                .collect()
        })
        .collect()
}

fn analytical_jacobian(
    op: &dyn Operator,
    args: &[Value],
    inputs: &[usize],
    outputs: &[Value],
    selected: &[usize],
) -> Result<Vec<Jacobian>> {
    let slots: Vec<(usize, usize)> = selected
        .iter()
        .flat_map(|&output| (0..numel(&outputs[output])).map(move |element| (output, element)))
        .collect();

    let mut jacobians: Vec<Jacobian> = inputs
        .iter()
        .map(|&index| vec![vec![0.0; slots.len()]; numel(&args[index])])
        .collect();

    for (column, &(output, element)) in slots.iter().enumerate() {
        let mut grad_outputs: Vec<Option<Value>> = vec![None; outputs.len()];
        grad_outputs[output] = Some(map_element(&outputs[output], element, one_hot)?);

        let grads = op.call_with_grad(args)?.backward(grad_outputs)?;
        for (index, (arg, grad)) in args.iter().zip(&grads).enumerate() {
            if !arg.requires_grad() && grad.is_some() {
                return Err(CheckError::Gradcheck(format!(
                    "argument {} does not require grad but received a gradient",
                    index
                )));
            }
        }

        for (jacobian, &index) in jacobians.iter_mut().zip(inputs) {
            let Some(grad) = &grads[index] else {
                continue;
            };
            let values = flatten(grad);
            if values.len() != jacobian.len() {
                return Err(CheckError::Gradcheck(format!(
                    "gradient for argument {} has {} elements, expected {}",
                    index,
                    values.len(),
                    jacobian.len()
                )));
            }
            for (row, value) in jacobian.iter_mut().zip(values) {
                row[column] = value;
            }
        }
    }
    Ok(jacobians)
}

/// Promote floating-point tensors to `float64`, keeping their grad flags.
fn to_double(value: &Value) -> Value {
    let promote = |t: &Tensor| {
        if t.dtype().is_floating_point() {
            t.cast(DataType::F64).with_requires_grad(t.requires_grad())
        } else {
            t.clone()
        }
    };
    match value {
        Value::Tensor(t) => promote(t).into(),
        Value::TensorList(ts) => ts.iter().map(promote).collect::<Vec<_>>().into(),
        other => other.clone(),
    }
}

fn numel(value: &Value) -> usize {
    value.tensors().iter().map(|t| t.len()).sum()
}

fn flatten(value: &Value) -> Vec<f64> {
    value.tensors().iter().flat_map(|t| t.to_f64_vec()).collect()
}

fn flatten_selected(outputs: &[Value], selected: &[usize]) -> Vec<f64> {
    selected.iter().flat_map(|&i| flatten(&outputs[i])).collect()
}

/// Rebuild `value` tensor by tensor, telling `f` which tensor holds flat
/// element `index` and where.
fn map_element(
    value: &Value,
    index: usize,
    mut f: impl FnMut(&Tensor, Option<usize>) -> opfixture_core::Result<Tensor>,
) -> Result<Value> {
    let mut remaining = Some(index);
    let mut locate = |t: &Tensor| match remaining {
        Some(i) if i < t.len() => {
            remaining = None;
            Some(i)
        }
        Some(i) => {
            remaining = Some(i - t.len());
            None
        }
        None => None,
    };

    match value {
        Value::Tensor(t) => {
            let at = locate(t);
            Ok(f(t, at)?.into())
        }
        Value::TensorList(ts) => {
            let pieces = ts
                .iter()
                .map(|t| {
                    let at = locate(t);
                    f(t, at)
                })
                .collect::<opfixture_core::Result<Vec<_>>>()?;
            Ok(pieces.into())
        }
        other => Err(CheckError::Gradcheck(format!(
            "cannot index elements of a {}",
            other.kind()
        ))),
    }
}

fn nudged(t: &Tensor, at: Option<usize>, delta: f64) -> opfixture_core::Result<Tensor> {
    let mut values = t.to_f64_vec();
    if let Some(i) = at {
        values[i] += delta;
    }
    Ok(Tensor::from_vec(values, t.shape())?
        .cast(t.dtype())
        .on(t.device())
        .with_requires_grad(t.requires_grad()))
}

fn one_hot(t: &Tensor, at: Option<usize>) -> opfixture_core::Result<Tensor> {
    let mut values = vec![0.0f64; t.len()];
    if let Some(i) = at {
        values[i] = 1.0;
    }
    Ok(Tensor::from_vec(values, t.shape())?
        .cast(t.dtype())
        .on(t.device()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use opfixture_core::{
        CustomOp, FakeArgs, FakeValue, OpSchema, ParamKind, ReturnKind, ShapeEnv, ValueArgs,
    };
    use opfixture_operators::{SampleConfig, custom_op_db};

    /// Squares its input but reports the identity as its derivative.
    struct WrongSquare;

    impl CustomOp for WrongSquare {
        type Ctx = ();

        fn schema(&self) -> OpSchema {
            OpSchema::new("test", "wrong_square")
                .param("x", ParamKind::Tensor)
                .returns(&[ReturnKind::Tensor])
        }

        fn forward(&self, args: &[Value]) -> opfixture_core::Result<Vec<Value>> {
            let x = args.tensor(0)?;
            Ok(vec![x.mul(x)?.into()])
        }

        fn fake(
            &self,
            args: &[FakeValue],
            _env: &mut ShapeEnv,
        ) -> opfixture_core::Result<Vec<FakeValue>> {
            Ok(vec![args.tensor(0)?.empty_like().into()])
        }

        fn supports_autograd(&self) -> bool {
            true
        }

        fn setup_context(&self, _args: &[Value], _outputs: &[Value]) -> opfixture_core::Result<()> {
            Ok(())
        }

        fn backward(
            &self,
            _ctx: (),
            grad_outputs: &[Option<Value>],
            _needs_input_grad: &[bool],
        ) -> opfixture_core::Result<Vec<Option<Value>>> {
            Ok(vec![grad_outputs[0].clone()])
        }
    }

    fn wrong_square_samples(config: &SampleConfig) -> opfixture_core::Result<Vec<SampleInput>> {
        let x = Tensor::from_vec(vec![1.5f64, -0.5, 2.0], &[3])?
            .with_requires_grad(config.requires_grad);
        Ok(vec![SampleInput::new(x, vec![])])
    }

    fn grad_samples(info: &OpInfo) -> Vec<SampleInput> {
        let config = SampleConfig {
            dtype: DataType::F64,
            requires_grad: true,
            seed: 3,
            ..Default::default()
        };
        info.samples(&config).unwrap()
    }

    #[test]
    fn test_catalog_gradients_match() {
        let config = CheckConfig::default();
        for info in custom_op_db().iter().filter(|info| info.supports_autograd) {
            for sample in grad_samples(info) {
                if let Err(err) = gradcheck(info, &sample, &config) {
                    panic!("{} failed gradcheck: {}", info.name, err);
                }
            }
        }
    }

    #[test]
    fn test_detects_wrong_backward() {
        let info = OpInfo::new("WrongSquare", WrongSquare, wrong_square_samples);
        let sample = &grad_samples(&info)[0];

        let err = gradcheck(&info, sample, &CheckConfig::default()).unwrap_err();
        match err {
            CheckError::GradientMismatch {
                input,
                input_element,
                output_element,
                analytical,
                numerical,
            } => {
                assert_eq!((input, input_element, output_element), (0, 0, 0));
                assert_eq!(analytical, 1.0);
                assert!((numerical - 3.0).abs() < 1e-6);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_requires_an_input_with_grad() {
        let info = &custom_op_db()[0];
        let config = SampleConfig {
            dtype: DataType::F64,
            ..Default::default()
        };
        let sample = &info.samples(&config).unwrap()[0];
        assert!(matches!(
            gradcheck(info, sample, &CheckConfig::default()),
            Err(CheckError::Gradcheck(_))
        ));
    }

    #[test]
    fn test_float32_samples_are_promoted() {
        let info = &custom_op_db()[1];
        let config = SampleConfig {
            dtype: DataType::F32,
            requires_grad: true,
            ..Default::default()
        };
        let sample = &info.samples(&config).unwrap()[0];
        gradcheck(info, sample, &CheckConfig::default()).unwrap();
    }

    #[test]
    fn test_map_element_spans_tensor_lists() {
        let list: Value = vec![
            Tensor::zeros(&[2], DataType::F64),
            Tensor::zeros(&[3], DataType::F64),
        ]
        .into();
        let hot = map_element(&list, 3, one_hot).unwrap();
        assert_eq!(flatten(&hot), vec![0.0, 0.0, 0.0, 1.0, 0.0]);
    }
}

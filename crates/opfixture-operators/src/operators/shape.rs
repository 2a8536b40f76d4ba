//! Shape manipulation operators: reshape copy, concatenation and splitting.

use ndarray::{ArrayD, ArrayViewD, Axis, Slice};
use opfixture_core::{
    CustomOp, Element, Error, FakeArgs, FakeTensor, FakeValue, OpSchema, ParamKind, Result,
    ReturnKind, ShapeEnv, SymbolicDim, Tensor, Value, ValueArgs, match_data,
};

use crate::NAMESPACE;
use crate::helpers::{
    check_same_device, check_same_dtype, cumulative_splits, grad_tensor, grad_tensor_list,
    infer_reshape, normalize_axis, split_bounds,
};

/// Copy `x` into `shape`; a single `-1` is inferred from the element count.
pub fn numpy_view_copy(x: &Tensor, shape: &[i64]) -> Result<Tensor> {
    let resolved = infer_reshape(shape, Some(x.len()))?;
    x.reshape(&resolved)
}

/// Concatenate along `dim`.
///
/// # Errors
/// `Error::Precondition` for an empty list or mixed devices or dtypes;
/// `Error::Shape` if ranks differ or non-concatenated dimensions disagree.
pub fn numpy_cat(xs: &[Tensor], dim: i64) -> Result<Tensor> {
    let Some(first) = xs.first() else {
        return Err(Error::Precondition(
            "numpy_cat: expected a non-empty list of tensors".to_string(),
        ));
    };
    let devices: Vec<_> = xs.iter().map(Tensor::device).collect();
    let device = check_same_device("numpy_cat", &devices)?;
    let dtypes: Vec<_> = xs.iter().map(Tensor::dtype).collect();
    check_same_dtype("numpy_cat", &dtypes)?;

    let axis = normalize_axis(dim, first.ndim())?;
    for x in xs {
        let compatible = x.ndim() == first.ndim()
            && x.shape()
                .iter()
                .zip(first.shape())
                .enumerate()
                .all(|(i, (a, b))| i == axis || a == b);
        if !compatible {
            return Err(Error::Shape(format!(
                "numpy_cat: shape {:?} does not match {:?} outside dimension {}",
                x.shape(),
                first.shape(),
                axis
            )));
        }
    }

    let data = match_data!(first.data(), array => {
        Element::into_data(cat_typed(array, &xs[1..], axis)?)
    });
    Ok(Tensor::from_data(data).on(device))
}

fn cat_typed<T: Element>(first: &ArrayD<T>, rest: &[Tensor], axis: usize) -> Result<ArrayD<T>> {
    let mut views: Vec<ArrayViewD<'_, T>> = Vec::with_capacity(rest.len() + 1);
    views.push(first.view());
    for x in rest {
        views.push(x.array::<T>()?.view());
    }
    ndarray::concatenate(Axis(axis), &views).map_err(|e| Error::Shape(e.to_string()))
}

/// Split `x` along `dim` at the given indices into `splits.len() + 1` copies.
///
/// Indices follow slicing rules (negative from the end, clamped), so
/// out-of-range or decreasing indices yield empty pieces.
pub fn numpy_split_copy(x: &Tensor, splits: &[i64], dim: i64) -> Result<Vec<Tensor>> {
    let axis = normalize_axis(dim, x.ndim())?;
    let bounds = split_bounds(x.shape()[axis], splits);
    let pieces = bounds
        .into_iter()
        .map(|(start, end)| {
            let data = match_data!(x.data(), array => {
                Element::into_data(array.slice_axis(Axis(axis), Slice::from(start..end)).to_owned())
            });
            Tensor::from_data(data).on(x.device())
        })
        .collect();
    Ok(pieces)
}

fn check_fake_cat(xs: &[FakeTensor], axis: usize) -> Result<()> {
    let first = &xs[0];
    for x in xs {
        let compatible = x.ndim() == first.ndim()
            && x.shape
                .iter()
                .zip(&first.shape)
                .enumerate()
                .all(|(i, (a, b))| i == axis || a == b);
        if !compatible {
            return Err(Error::Shape(format!(
                "numpy_cat: {} does not match {} outside dimension {}",
                x, first, axis
            )));
        }
    }
    Ok(())
}

fn fake_split(
    x: &FakeTensor,
    splits: &[i64],
    dim: i64,
    env: &mut ShapeEnv,
) -> Result<Vec<FakeTensor>> {
    let axis = normalize_axis(dim, x.ndim())?;
    let piece = |size: SymbolicDim| {
        let mut shape = x.shape.clone();
        shape[axis] = size;
        x.new_empty(shape, x.dtype)
    };
    match x.shape[axis] {
        SymbolicDim::Fixed(len) => Ok(split_bounds(len, splits)
            .into_iter()
            .map(|(start, end)| piece(SymbolicDim::Fixed(end - start)))
            .collect()),
        SymbolicDim::Unbacked(_) => Ok((0..=splits.len())
            .map(|_| piece(env.create_unbacked_size()))
            .collect()),
    }
}

/// `numpy_view_copy(Tensor x, int[] shape) -> Tensor`.
pub struct NumpyViewCopy;

pub struct ViewCopyCtx {
    x_shape: Vec<usize>,
}

impl CustomOp for NumpyViewCopy {
    type Ctx = ViewCopyCtx;

    fn schema(&self) -> OpSchema {
        OpSchema::new(NAMESPACE, "numpy_view_copy")
            .param("x", ParamKind::Tensor)
            .param("shape", ParamKind::IntList)
            .returns(&[ReturnKind::Tensor])
    }

    fn forward(&self, args: &[Value]) -> Result<Vec<Value>> {
        Ok(vec![numpy_view_copy(args.tensor(0)?, args.int_list(1)?)?.into()])
    }

    fn fake(&self, args: &[FakeValue], _env: &mut ShapeEnv) -> Result<Vec<FakeValue>> {
        let x = args.tensor(0)?;
        let numel = x.static_shape().map(|s| s.iter().product());
        let shape = infer_reshape(args.int_list(1)?, numel)?;
        let shape = shape.into_iter().map(SymbolicDim::Fixed).collect();
        Ok(vec![x.new_empty(shape, x.dtype).into()])
    }

    fn supports_autograd(&self) -> bool {
        true
    }

    fn setup_context(&self, args: &[Value], _outputs: &[Value]) -> Result<ViewCopyCtx> {
        Ok(ViewCopyCtx {
            x_shape: args.tensor(0)?.shape().to_vec(),
        })
    }

    fn backward(
        &self,
        ctx: ViewCopyCtx,
        grad_outputs: &[Option<Value>],
        needs_input_grad: &[bool],
    ) -> Result<Vec<Option<Value>>> {
        if !needs_input_grad[0] {
            return Ok(vec![None, None]);
        }
        let grad_out = grad_tensor(grad_outputs, 0)?;
        let shape: Vec<i64> = ctx.x_shape.iter().map(|&d| d as i64).collect();
        Ok(vec![Some(numpy_view_copy(grad_out, &shape)?.into()), None])
    }
}

/// `numpy_cat(Tensor[] xs, int dim) -> Tensor`.
pub struct NumpyCat;

pub struct CatCtx {
    dim_sizes: Vec<usize>,
    dim: i64,
}

impl CustomOp for NumpyCat {
    type Ctx = CatCtx;

    fn schema(&self) -> OpSchema {
        OpSchema::new(NAMESPACE, "numpy_cat")
            .param("xs", ParamKind::TensorList)
            .param("dim", ParamKind::Int)
            .returns(&[ReturnKind::Tensor])
    }

    fn forward(&self, args: &[Value]) -> Result<Vec<Value>> {
        Ok(vec![numpy_cat(args.tensor_list(0)?, args.int(1)?)?.into()])
    }

    fn fake(&self, args: &[FakeValue], env: &mut ShapeEnv) -> Result<Vec<FakeValue>> {
        let xs = args.tensor_list(0)?;
        let Some(first) = xs.first() else {
            return Err(Error::Precondition(
                "numpy_cat: expected a non-empty list of tensors".to_string(),
            ));
        };
        let devices: Vec<_> = xs.iter().map(|x| x.device).collect();
        check_same_device("numpy_cat", &devices)?;
        let dtypes: Vec<_> = xs.iter().map(|x| x.dtype).collect();
        check_same_dtype("numpy_cat", &dtypes)?;
        let axis = normalize_axis(args.int(1)?, first.ndim())?;
        check_fake_cat(xs, axis)?;

        let total: Option<usize> = xs.iter().map(|x| x.shape[axis].as_fixed()).sum();
        let mut shape = first.shape.clone();
        shape[axis] = match total {
            Some(total) => SymbolicDim::Fixed(total),
            None => env.create_unbacked_size(),
        };
        Ok(vec![first.new_empty(shape, first.dtype).into()])
    }

    fn supports_autograd(&self) -> bool {
        true
    }

    fn setup_context(&self, args: &[Value], _outputs: &[Value]) -> Result<CatCtx> {
        let xs = args.tensor_list(0)?;
        let dim = args.int(1)?;
        let axis = normalize_axis(dim, xs.first().map_or(0, Tensor::ndim))?;
        Ok(CatCtx {
            dim_sizes: xs.iter().map(|x| x.shape()[axis]).collect(),
            dim,
        })
    }

    fn backward(
        &self,
        ctx: CatCtx,
        grad_outputs: &[Option<Value>],
        needs_input_grad: &[bool],
    ) -> Result<Vec<Option<Value>>> {
        if !needs_input_grad[0] {
            return Ok(vec![None, None]);
        }
        let grad_out = grad_tensor(grad_outputs, 0)?;
        let splits = cumulative_splits(&ctx.dim_sizes);
        let grad_xs = numpy_split_copy(grad_out, &splits, ctx.dim)?;
        Ok(vec![Some(grad_xs.into()), None])
    }
}

/// `numpy_split_copy(Tensor x, int[] splits, int dim) -> Tensor[]`.
pub struct NumpySplitCopy;

pub struct SplitCtx {
    dim: i64,
}

fn split_schema(name: &'static str, returns: &[ReturnKind]) -> OpSchema {
    OpSchema::new(NAMESPACE, name)
        .param("x", ParamKind::Tensor)
        .param("splits", ParamKind::IntList)
        .param("dim", ParamKind::Int)
        .returns(returns)
}

fn split_backward(
    ctx: SplitCtx,
    grad_outputs: &[Option<Value>],
    needs_input_grad: &[bool],
) -> Result<Vec<Option<Value>>> {
    if !needs_input_grad[0] {
        return Ok(vec![None, None, None]);
    }
    let grads = grad_tensor_list(grad_outputs, 0)?;
    Ok(vec![Some(numpy_cat(grads, ctx.dim)?.into()), None, None])
}

impl CustomOp for NumpySplitCopy {
    type Ctx = SplitCtx;

    fn schema(&self) -> OpSchema {
        split_schema("numpy_split_copy", &[ReturnKind::TensorList])
    }

    fn forward(&self, args: &[Value]) -> Result<Vec<Value>> {
        let pieces = numpy_split_copy(args.tensor(0)?, args.int_list(1)?, args.int(2)?)?;
        Ok(vec![pieces.into()])
    }

    fn fake(&self, args: &[FakeValue], env: &mut ShapeEnv) -> Result<Vec<FakeValue>> {
        let pieces = fake_split(args.tensor(0)?, args.int_list(1)?, args.int(2)?, env)?;
        Ok(vec![pieces.into()])
    }

    fn supports_autograd(&self) -> bool {
        true
    }

    fn setup_context(&self, args: &[Value], _outputs: &[Value]) -> Result<SplitCtx> {
        Ok(SplitCtx { dim: args.int(2)? })
    }

    fn backward(
        &self,
        ctx: SplitCtx,
        grad_outputs: &[Option<Value>],
        needs_input_grad: &[bool],
    ) -> Result<Vec<Option<Value>>> {
        split_backward(ctx, grad_outputs, needs_input_grad)
    }
}

/// `numpy_split_copy_with_int(Tensor x, int[] splits, int dim) -> (Tensor[], int)`.
///
/// Like `numpy_split_copy`, also returning the number of split indices.
pub struct NumpySplitCopyWithInt;

impl CustomOp for NumpySplitCopyWithInt {
    type Ctx = SplitCtx;

    fn schema(&self) -> OpSchema {
        split_schema(
            "numpy_split_copy_with_int",
            &[ReturnKind::TensorList, ReturnKind::Int],
        )
    }

    fn forward(&self, args: &[Value]) -> Result<Vec<Value>> {
        let splits = args.int_list(1)?;
        let pieces = numpy_split_copy(args.tensor(0)?, splits, args.int(2)?)?;
        Ok(vec![pieces.into(), Value::Int(splits.len() as i64)])
    }

    fn fake(&self, args: &[FakeValue], env: &mut ShapeEnv) -> Result<Vec<FakeValue>> {
        let splits = args.int_list(1)?;
        let pieces = fake_split(args.tensor(0)?, splits, args.int(2)?, env)?;
        Ok(vec![pieces.into(), FakeValue::Int(splits.len() as i64)])
    }

    fn supports_autograd(&self) -> bool {
        true
    }

    fn setup_context(&self, args: &[Value], _outputs: &[Value]) -> Result<SplitCtx> {
        Ok(SplitCtx { dim: args.int(2)? })
    }

    fn backward(
        &self,
        ctx: SplitCtx,
        grad_outputs: &[Option<Value>],
        needs_input_grad: &[bool],
    ) -> Result<Vec<Option<Value>>> {
        split_backward(ctx, grad_outputs, needs_input_grad)
    }
}

//! Sorting along a dimension and its inverse gather.

use ndarray::{ArrayD, Axis};
use opfixture_core::{
    CustomOp, DataType, Element, Error, FakeArgs, FakeValue, OpSchema, ParamKind, Result,
    ReturnKind, ShapeEnv, Tensor, Value, ValueArgs, match_data,
};

use crate::NAMESPACE;
use crate::helpers::{check_same_device, grad_tensor, normalize_axis};

/// Stable sort along `dim`.
///
/// Returns the sorted values, the int64 permutation `ind` with
/// `sorted = take(x, ind)`, and its inverse `ind_inv` with
/// `x = take(sorted, ind_inv)`.
pub fn numpy_sort(x: &Tensor, dim: i64) -> Result<(Tensor, Tensor, Tensor)> {
    let axis = normalize_axis(dim, x.ndim())?;
    let (values, ind, ind_inv) = match_data!(x.data(), array => {
        let (values, ind, ind_inv) = sort_typed(array, axis);
        (Element::into_data(values), ind, ind_inv)
    });
    let device = x.device();
    Ok((
        Tensor::from_data(values).on(device),
        Tensor::from_array(ind).on(device),
        Tensor::from_array(ind_inv).on(device),
    ))
}

fn sort_typed<T: Element>(
    array: &ArrayD<T>,
    axis: usize,
) -> (ArrayD<T>, ArrayD<i64>, ArrayD<i64>) {
    let mut values = array.clone();
    let mut ind = ArrayD::<i64>::zeros(array.raw_dim());
    let mut ind_inv = ArrayD::<i64>::zeros(array.raw_dim());

    let lanes = array
        .lanes(Axis(axis))
        .into_iter()
        .zip(values.lanes_mut(Axis(axis)))
        .zip(ind.lanes_mut(Axis(axis)))
        .zip(ind_inv.lanes_mut(Axis(axis)));
    for (((lane, mut sorted), mut order_out), mut inverse) in lanes {
        let mut order: Vec<usize> = (0..lane.len()).collect();
        order.sort_by(|&a, &b| lane[a].sort_cmp(&lane[b]));
        for (rank, &source) in order.iter().enumerate() {
            sorted[rank] = lane[source];
            order_out[rank] = source as i64;
            inverse[source] = rank as i64;
        }
    }
    (values, ind, ind_inv)
}

/// Gather `x` along `dim` at `ind`.
///
/// `ind_inv` is carried for the backward pass and checked like `ind`.
///
/// # Errors
/// `Error::Precondition` if devices differ or an index tensor is not int64;
/// `Error::Shape` if the index shapes differ from `x` or an index is out of
/// range.
pub fn numpy_take(x: &Tensor, ind: &Tensor, ind_inv: &Tensor, dim: i64) -> Result<Tensor> {
    check_same_device("numpy_take", &[x.device(), ind.device(), ind_inv.device()])?;
    check_index_dtypes(ind.dtype(), ind_inv.dtype())?;
    if ind.shape() != x.shape() || ind_inv.shape() != x.shape() {
        return Err(Error::Shape(format!(
            "numpy_take: index shapes {:?} and {:?} must equal input shape {:?}",
            ind.shape(),
            ind_inv.shape(),
            x.shape()
        )));
    }
    let axis = normalize_axis(dim, x.ndim())?;
    let indices = ind.array::<i64>()?;

    let data = match_data!(x.data(), array => Element::into_data(take_typed(array, indices, axis)?));
    Ok(Tensor::from_data(data).on(x.device()))
}

fn check_index_dtypes(ind: DataType, ind_inv: DataType) -> Result<()> {
    if ind != DataType::I64 || ind_inv != DataType::I64 {
        return Err(Error::Precondition(format!(
            "numpy_take: indices must be int64, got {} and {}",
            ind, ind_inv
        )));
    }
    Ok(())
}

fn take_typed<T: Element>(array: &ArrayD<T>, indices: &ArrayD<i64>, axis: usize) -> Result<ArrayD<T>> {
    let mut out = array.clone();
    let len = array.len_of(Axis(axis)) as i64;

    let lanes = array
        .lanes(Axis(axis))
        .into_iter()
        .zip(indices.lanes(Axis(axis)))
        .zip(out.lanes_mut(Axis(axis)));
    for ((source, index), mut target) in lanes {
        for (slot, &i) in target.iter_mut().zip(index.iter()) {
            let resolved = if i < 0 { i + len } else { i };
            if resolved < 0 || resolved >= len {
                return Err(Error::Shape(format!(
                    "numpy_take: index {} out of range for dimension of size {}",
                    i, len
                )));
            }
            *slot = source[resolved as usize];
        }
    }
    Ok(out)
}

/// `numpy_sort(Tensor x, int dim) -> (Tensor, Tensor, Tensor)`.
pub struct NumpySort;

pub struct SortCtx {
    ind: Tensor,
    ind_inv: Tensor,
    dim: i64,
}

impl CustomOp for NumpySort {
    type Ctx = SortCtx;

    fn schema(&self) -> OpSchema {
        OpSchema::new(NAMESPACE, "numpy_sort")
            .param("x", ParamKind::Tensor)
            .param("dim", ParamKind::Int)
            .returns(&[ReturnKind::Tensor, ReturnKind::Tensor, ReturnKind::Tensor])
    }

    fn forward(&self, args: &[Value]) -> Result<Vec<Value>> {
        let (values, ind, ind_inv) = numpy_sort(args.tensor(0)?, args.int(1)?)?;
        Ok(vec![values.into(), ind.into(), ind_inv.into()])
    }

    fn fake(&self, args: &[FakeValue], _env: &mut ShapeEnv) -> Result<Vec<FakeValue>> {
        let x = args.tensor(0)?;
        normalize_axis(args.int(1)?, x.ndim())?;
        Ok(vec![
            x.empty_like().into(),
            x.with_dtype(DataType::I64).into(),
            x.with_dtype(DataType::I64).into(),
        ])
    }

    fn supports_autograd(&self) -> bool {
        true
    }

    fn non_differentiable_outputs(&self) -> &'static [usize] {
        &[1, 2]
    }

    fn setup_context(&self, args: &[Value], outputs: &[Value]) -> Result<SortCtx> {
        Ok(SortCtx {
            ind: outputs.tensor(1)?.detach(),
            ind_inv: outputs.tensor(2)?.detach(),
            dim: args.int(1)?,
        })
    }

    fn backward(
        &self,
        ctx: SortCtx,
        grad_outputs: &[Option<Value>],
        needs_input_grad: &[bool],
    ) -> Result<Vec<Option<Value>>> {
        if !needs_input_grad[0] {
            return Ok(vec![None, None]);
        }
        let grad_out = grad_tensor(grad_outputs, 0)?;
        let grad_x = numpy_take(grad_out, &ctx.ind_inv, &ctx.ind, ctx.dim)?;
        Ok(vec![Some(grad_x.into()), None])
    }
}

/// `numpy_take(Tensor x, Tensor ind, Tensor ind_inv, int dim) -> Tensor`.
pub struct NumpyTake;

pub struct TakeCtx {
    ind: Tensor,
    ind_inv: Tensor,
    dim: i64,
}

impl CustomOp for NumpyTake {
    type Ctx = TakeCtx;

    fn schema(&self) -> OpSchema {
        OpSchema::new(NAMESPACE, "numpy_take")
            .param("x", ParamKind::Tensor)
            .param("ind", ParamKind::Tensor)
            .param("ind_inv", ParamKind::Tensor)
            .param("dim", ParamKind::Int)
            .returns(&[ReturnKind::Tensor])
    }

    fn forward(&self, args: &[Value]) -> Result<Vec<Value>> {
        let out = numpy_take(
            args.tensor(0)?,
            args.tensor(1)?,
            args.tensor(2)?,
            args.int(3)?,
        )?;
        Ok(vec![out.into()])
    }

    fn fake(&self, args: &[FakeValue], _env: &mut ShapeEnv) -> Result<Vec<FakeValue>> {
        let x = args.tensor(0)?;
        let ind = args.tensor(1)?;
        let ind_inv = args.tensor(2)?;
        check_same_device("numpy_take", &[x.device, ind.device, ind_inv.device])?;
        check_index_dtypes(ind.dtype, ind_inv.dtype)?;
        if ind.shape != x.shape || ind_inv.shape != x.shape {
            return Err(Error::Shape(format!(
                "numpy_take: index shapes {} and {} must equal input shape {}",
                ind, ind_inv, x
            )));
        }
        normalize_axis(args.int(3)?, x.ndim())?;
        Ok(vec![x.empty_like().into()])
    }

    fn supports_autograd(&self) -> bool {
        true
    }

    fn setup_context(&self, args: &[Value], _outputs: &[Value]) -> Result<TakeCtx> {
        Ok(TakeCtx {
            ind: args.tensor(1)?.detach(),
            ind_inv: args.tensor(2)?.detach(),
            dim: args.int(3)?,
        })
    }

    fn backward(
        &self,
        ctx: TakeCtx,
        grad_outputs: &[Option<Value>],
        needs_input_grad: &[bool],
    ) -> Result<Vec<Option<Value>>> {
        let grad_x = if needs_input_grad[0] {
            let grad_out = grad_tensor(grad_outputs, 0)?;
            Some(numpy_take(grad_out, &ctx.ind_inv, &ctx.ind, ctx.dim)?.into())
        } else {
            None
        };
        Ok(vec![grad_x, None, None, None])
    }
}

//! Operators whose output size depends on input values.
//!
//! Both operators report a size-0 or size-1 result as `Error::Unsupported`;
//! their fake variants describe the output length with a fresh unbacked size.

use ndarray::{Array2, ArrayD, Dimension};
use opfixture_core::{
    CustomOp, DataType, Element, Error, FakeArgs, FakeValue, OpSchema, ParamKind, Result,
    ReturnKind, ShapeEnv, SymbolicDim, Tensor, Value, ValueArgs, match_data,
};

use crate::NAMESPACE;
use crate::helpers::check_same_device;

/// Coordinates of the non-zero elements of `x`, one row per element in
/// row-major order, as an int64 `[n, ndim]` tensor.
///
/// # Errors
/// `Error::Unsupported` when `x` has fewer than two non-zero elements.
pub fn numpy_nonzero(x: &Tensor) -> Result<Tensor> {
    let coords = match_data!(x.data(), array => nonzero_typed(array));
    if coords.len() <= 1 {
        return Err(Error::Unsupported("not supported".to_string()));
    }

    let ndim = x.ndim();
    let flat: Vec<i64> = coords.into_iter().flatten().map(|c| c as i64).collect();
    let rows = flat.len().checked_div(ndim).unwrap_or(0);
    let result = Array2::from_shape_vec((rows, ndim), flat)
        .map_err(|e| Error::Shape(e.to_string()))?;
    Ok(Tensor::from_array(result.into_dyn()).on(x.device()))
}

fn nonzero_typed<T: Element>(array: &ArrayD<T>) -> Vec<Vec<usize>> {
    array
        .indexed_iter()
        .filter(|(_, value)| !value.is_zero())
        .map(|(index, _)| index.slice().to_vec())
        .collect()
}

/// Greedy non-maximum suppression over `[x1, y1, x2, y2]` boxes.
///
/// Boxes are visited from the highest score down (ties broken towards the
/// higher index). Each visited box is kept, and every remaining box whose
/// IoU with it exceeds `iou_threshold` is discarded. Areas use the inclusive
/// pixel convention `(x2 - x1 + 1) * (y2 - y1 + 1)`.
///
/// # Errors
/// `Error::Precondition` if the tensors are on different devices,
/// `Error::Shape` if `boxes` is not `[N, 4]` or `scores` is not `[N]`, and
/// `Error::Unsupported` if fewer than two boxes are kept.
pub fn numpy_nms(boxes: &Tensor, scores: &Tensor, iou_threshold: f64) -> Result<Tensor> {
    let device = check_same_device("numpy_nms", &[boxes.device(), scores.device()])?;
    let n = boxes.shape().first().copied().unwrap_or(0);
    if boxes.shape() != [n, 4] || scores.shape() != [n] {
        return Err(Error::Shape(format!(
            "numpy_nms: expected boxes [N, 4] and scores [N], got {:?} and {:?}",
            boxes.shape(),
            scores.shape()
        )));
    }

    let coords = boxes.to_f64_vec();
    let scores = scores.to_f64_vec();
    let corner = |i: usize, k: usize| coords[i * 4 + k];
    let area = |i: usize| (corner(i, 2) - corner(i, 0) + 1.0) * (corner(i, 3) - corner(i, 1) + 1.0);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[a].sort_cmp(&scores[b]));
    order.reverse();

    let mut keep = Vec::new();
    while let Some((&i, rest)) = order.split_first() {
        keep.push(i as i64);
        order = rest
            .iter()
            .copied()
            .filter(|&j| {
                let w = (corner(i, 2).min(corner(j, 2)) - corner(i, 0).max(corner(j, 0)) + 1.0).max(0.0);
                let h = (corner(i, 3).min(corner(j, 3)) - corner(i, 1).max(corner(j, 1)) + 1.0).max(0.0);
                let inter = w * h;
                let iou = inter / (area(i) + area(j) - inter);
                iou <= iou_threshold
            })
            .collect();
    }

    tracing::trace!(boxes = n, kept = keep.len(), "nms");
    if keep.len() < 2 {
        return Err(Error::Unsupported(format!(
            "numpy_nms kept {} boxes, need at least 2",
            keep.len()
        )));
    }
    let len = keep.len();
    Tensor::from_vec(keep, &[len]).map(|t| t.on(device))
}

/// `numpy_nonzero(Tensor x) -> Tensor`.
pub struct NumpyNonzero;

impl CustomOp for NumpyNonzero {
    type Ctx = ();

    fn schema(&self) -> OpSchema {
        OpSchema::new(NAMESPACE, "numpy_nonzero")
            .param("x", ParamKind::Tensor)
            .returns(&[ReturnKind::Tensor])
    }

    fn forward(&self, args: &[Value]) -> Result<Vec<Value>> {
        Ok(vec![numpy_nonzero(args.tensor(0)?)?.into()])
    }

    fn fake(&self, args: &[FakeValue], env: &mut ShapeEnv) -> Result<Vec<FakeValue>> {
        let x = args.tensor(0)?;
        let shape = vec![env.create_unbacked_size(), SymbolicDim::Fixed(x.ndim())];
        Ok(vec![x.new_empty(shape, DataType::I64).into()])
    }
}

/// `numpy_nms(Tensor boxes, Tensor scores, float iou_threshold) -> Tensor`.
pub struct NumpyNms;

impl CustomOp for NumpyNms {
    type Ctx = ();

    fn schema(&self) -> OpSchema {
        OpSchema::new(NAMESPACE, "numpy_nms")
            .param("boxes", ParamKind::Tensor)
            .param("scores", ParamKind::Tensor)
            .param("iou_threshold", ParamKind::Number)
            .returns(&[ReturnKind::Tensor])
    }

    fn forward(&self, args: &[Value]) -> Result<Vec<Value>> {
        let kept = numpy_nms(args.tensor(0)?, args.tensor(1)?, args.number(2)?)?;
        Ok(vec![kept.into()])
    }

    fn fake(&self, args: &[FakeValue], env: &mut ShapeEnv) -> Result<Vec<FakeValue>> {
        let boxes = args.tensor(0)?;
        let scores = args.tensor(1)?;
        check_same_device("numpy_nms", &[boxes.device, scores.device])?;
        let well_formed = match (boxes.shape.as_slice(), scores.shape.as_slice()) {
            ([n, SymbolicDim::Fixed(4)], [m]) => n == m,
            _ => false,
        };
        if !well_formed {
            return Err(Error::Shape(format!(
                "numpy_nms: expected boxes [N, 4] and scores [N], got {} and {}",
                boxes, scores
            )));
        }
        let shape = vec![env.create_unbacked_size()];
        Ok(vec![boxes.new_empty(shape, DataType::I64).into()])
    }
}

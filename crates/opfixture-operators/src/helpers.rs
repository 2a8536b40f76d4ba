//! Helper functions for operator implementation.

use opfixture_core::{DataType, Device, Error, Result, Tensor, Value};

/// Output shape of an elementwise product over `shapes`.
///
/// Trailing dimensions are paired up; a pair agrees when the sizes are equal
/// or one of them is 1, and a shorter shape is padded with leading 1s.
///
/// ```text
/// x [2, 3, 4]    * y [3, 4]    -> [2, 3, 4]
/// x [2, 3, 4]    * y [2, 1, 4] -> [2, 3, 4]
/// x [8, 1, 6, 1] * y [7, 1, 5] -> [8, 7, 6, 5]
/// ```
pub fn broadcast_shapes(shapes: &[&[usize]]) -> Result<Vec<usize>> {
    let rank = shapes.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut out = vec![1; rank];

    for shape in shapes {
        let offset = rank - shape.len();
        for (axis, &size) in shape.iter().enumerate() {
            let slot = &mut out[offset + axis];
            match (*slot, size) {
                (a, b) if a == b => {}
                (1, b) => *slot = b,
                (_, 1) => {}
                (a, b) => {
                    return Err(Error::Shape(format!(
                        "numpy_mul: cannot broadcast {:?} against size {} at dimension {} (got {})",
                        shapes, a, offset + axis, b
                    )));
                }
            }
        }
    }

    Ok(out)
}

/// Resolve a possibly negative axis against a rank.
pub fn normalize_axis(dim: i64, ndim: usize) -> Result<usize> {
    let rank = ndim as i64;
    let axis = if dim < 0 { dim + rank } else { dim };
    if axis < 0 || axis >= rank {
        return Err(Error::Shape(format!(
            "dimension {} out of range for a tensor of rank {}",
            dim, ndim
        )));
    }
    Ok(axis as usize)
}

/// All devices must be equal; returns the common one.
pub fn check_same_device(op: &str, devices: &[Device]) -> Result<Device> {
    let Some(&first) = devices.first() else {
        return Err(Error::Precondition(format!("{}: no tensors given", op)));
    };
    if let Some(other) = devices.iter().find(|&&d| d != first) {
        return Err(Error::Precondition(format!(
            "{}: expected all tensors on {} but found one on {}",
            op, first, other
        )));
    }
    Ok(first)
}

/// All dtypes must be equal; returns the common one.
pub fn check_same_dtype(op: &str, dtypes: &[DataType]) -> Result<DataType> {
    let Some(&first) = dtypes.first() else {
        return Err(Error::Precondition(format!("{}: no tensors given", op)));
    };
    if let Some(other) = dtypes.iter().find(|&&d| d != first) {
        return Err(Error::Precondition(format!(
            "{}: expected all tensors to be {} but found {}",
            op, first, other
        )));
    }
    Ok(first)
}

/// Resolve a reshape target that may contain a single `-1`.
///
/// `numel` is the element count of the source, if known. Without it, a `-1`
/// cannot be inferred and the element count is not checked.
pub fn infer_reshape(shape: &[i64], numel: Option<usize>) -> Result<Vec<usize>> {
    let mut inferred = None;
    let mut known = 1usize;
    for (i, &dim) in shape.iter().enumerate() {
        match dim {
            -1 if inferred.is_some() => {
                return Err(Error::Shape(format!(
                    "only one dimension can be inferred in {:?}",
                    shape
                )));
            }
            -1 => inferred = Some(i),
            d if d < 0 => {
                return Err(Error::Shape(format!(
                    "invalid dimension {} in {:?}",
                    d, shape
                )));
            }
            d => {
                known = known.checked_mul(d as usize).ok_or_else(|| {
                    Error::Shape(format!("shape {:?} has too many elements", shape))
                })?;
            }
        }
    }

    let mut resolved: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
    match (inferred, numel) {
        (Some(i), Some(numel)) => {
            if known == 0 || numel % known != 0 {
                return Err(Error::Shape(format!(
                    "shape {:?} is invalid for input of size {}",
                    shape, numel
                )));
            }
            resolved[i] = numel / known;
        }
        (Some(_), None) => {
            return Err(Error::Shape(format!(
                "cannot infer -1 in {:?} for a tensor of unknown size",
                shape
            )));
        }
        (None, Some(numel)) if numel != known => {
            return Err(Error::Shape(format!(
                "shape {:?} is invalid for input of size {}",
                shape, numel
            )));
        }
        (None, _) => {}
    }
    Ok(resolved)
}

/// Segment bounds for splitting a dimension of `len` at `splits`.
///
/// Follows slicing rules: negative indices count from the end, indices are
/// clamped to `[0, len]`, and a segment whose end precedes its start is
/// empty. Produces `splits.len() + 1` segments.
pub fn split_bounds(len: usize, splits: &[i64]) -> Vec<(usize, usize)> {
    let clamp = |index: i64| -> usize {
        let index = if index < 0 { index + len as i64 } else { index };
        index.clamp(0, len as i64) as usize
    };

    let mut points = Vec::with_capacity(splits.len() + 2);
    points.push(0);
    points.extend(splits.iter().map(|&s| clamp(s)));
    points.push(len);

    points
        .windows(2)
        .map(|w| (w[0], w[1].max(w[0])))
        .collect()
}

/// Split points at the running sum of `sizes`, excluding the total.
pub fn cumulative_splits(sizes: &[usize]) -> Vec<i64> {
    sizes
        .iter()
        .take(sizes.len().saturating_sub(1))
        .scan(0i64, |total, &size| {
            *total += size as i64;
            Some(*total)
        })
        .collect()
}

/// Borrow the tensor gradient for output `index`.
pub fn grad_tensor(grads: &[Option<Value>], index: usize) -> Result<&Tensor> {
    match grads.get(index) {
        Some(Some(Value::Tensor(grad))) => Ok(grad),
        _ => Err(Error::Autograd(format!(
            "missing tensor gradient for output {}",
            index
        ))),
    }
}

/// Borrow the tensor-list gradient for output `index`.
pub fn grad_tensor_list(grads: &[Option<Value>], index: usize) -> Result<&[Tensor]> {
    match grads.get(index) {
        Some(Some(Value::TensorList(grads))) => Ok(grads),
        _ => Err(Error::Autograd(format!(
            "missing tensor list gradient for output {}",
            index
        ))),
    }
}

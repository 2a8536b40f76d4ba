//! Host tensor type used for operator inputs, outputs and gradients.

use std::fmt;

use half::f16;
use ndarray::{ArrayD, Axis, IxDyn, Zip};

use crate::element::Element;
use crate::fake::FakeTensor;
use crate::types::{DataType, Device};
use crate::{Error, Result, match_data, with_dtype};

/// Typed n-dimensional storage, one variant per data type.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Bool(ArrayD<bool>),
    U8(ArrayD<u8>),
    I8(ArrayD<i8>),
    I16(ArrayD<i16>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    F16(ArrayD<f16>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

impl TensorData {
    /// Get the data type of the stored elements.
    pub fn dtype(&self) -> DataType {
        match self {
            TensorData::Bool(_) => DataType::Bool,
            TensorData::U8(_) => DataType::U8,
            TensorData::I8(_) => DataType::I8,
            TensorData::I16(_) => DataType::I16,
            TensorData::I32(_) => DataType::I32,
            TensorData::I64(_) => DataType::I64,
            TensorData::F16(_) => DataType::F16,
            TensorData::F32(_) => DataType::F32,
            TensorData::F64(_) => DataType::F64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match_data!(self, array => array.shape())
    }
}

/// Host-backed tensor with a device tag and a gradient-tracking flag.
///
/// Tensors own their storage; every operator output is a fresh copy, never a
/// view into an input.
#[derive(Debug, Clone)]
pub struct Tensor {
    data: TensorData,
    device: Device,
    requires_grad: bool,
}

impl Tensor {
    /// Wrap an owned array as a CPU tensor.
    pub fn from_array<T: Element>(array: ArrayD<T>) -> Self {
        Self::from_data(T::into_data(array))
    }

    pub fn from_data(data: TensorData) -> Self {
        Self {
            data,
            device: Device::Cpu,
            requires_grad: false,
        }
    }

    /// Create a tensor from row-major values.
    ///
    /// # Example
    /// ```
    /// # use opfixture_core::{DataType, Tensor};
    /// let tensor = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
    /// assert_eq!(tensor.shape(), &[2, 2]);
    /// assert_eq!(tensor.dtype(), DataType::F32);
    /// ```
    pub fn from_vec<T: Element>(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        let len = data.len();
        let array = ArrayD::from_shape_vec(IxDyn(shape), data).map_err(|_| {
            Error::Shape(format!(
                "Data length {} doesn't match shape {:?} (expected {})",
                len,
                shape,
                shape.iter().product::<usize>()
            ))
        })?;
        Ok(Self::from_array(array))
    }

    /// Create a zero-dimensional tensor.
    pub fn scalar<T: Element>(value: T) -> Self {
        Self::from_array(ArrayD::from_elem(IxDyn(&[]), value))
    }

    pub fn zeros(shape: &[usize], dtype: DataType) -> Self {
        with_dtype!(dtype, T => Self::from_array(ArrayD::from_elem(IxDyn(shape), T::zero())))
    }

    /// Zeros with the shape, dtype and device of `self`.
    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.shape(), self.dtype()).on(self.device)
    }

    /// Retag the tensor with a device.
    pub fn on(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_requires_grad(mut self, requires_grad: bool) -> Self {
        self.requires_grad = requires_grad;
        self
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// A copy that does not track gradients.
    pub fn detach(&self) -> Self {
        self.clone().with_requires_grad(false)
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Get the total number of elements in the tensor.
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DataType {
        self.data.dtype()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    /// Borrow the typed array.
    ///
    /// # Errors
    /// Returns an error if `T` is not the element type of this tensor.
    pub fn array<T: Element>(&self) -> Result<&ArrayD<T>> {
        T::from_data(&self.data).ok_or_else(|| {
            Error::DataType(format!(
                "expected a {} tensor, found {}",
                T::DTYPE,
                self.dtype()
            ))
        })
    }

    /// Copy the elements out in row-major order.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        Ok(self.array::<T>()?.iter().copied().collect())
    }

    /// Lossless for every dtype except 64-bit integers beyond 2^53.
    pub fn to_f64_array(&self) -> ArrayD<f64> {
        match_data!(&self.data, array => array.mapv(|value| value.to_f64()))
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.to_f64_array().iter().copied().collect()
    }

    /// Convert to another data type, keeping the device.
    pub fn cast(&self, dtype: DataType) -> Self {
        if dtype == self.dtype() {
            return self.detach();
        }
        let values = self.to_f64_array();
        with_dtype!(dtype, T => Self::from_array(values.mapv(T::from_f64))).on(self.device)
    }

    /// Copy the elements into a new shape with the same element count.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        let expected = shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d));
        if expected != Some(self.len()) {
            return Err(Error::Shape(format!(
                "cannot reshape tensor of shape {:?} ({} elements) into {:?}",
                self.shape(),
                self.len(),
                shape
            )));
        }
        let data = match_data!(&self.data, array => Element::into_data(reshape_typed(array, shape)?));
        Ok(Self::from_data(data).on(self.device))
    }

    /// Element-wise sum of two tensors with identical layout.
    pub fn add(&self, other: &Tensor) -> Result<Self> {
        self.check_same_layout(other, "add")?;
        let data = match_data!(&self.data, lhs => Element::into_data(add_typed(lhs, other)?));
        Ok(Self::from_data(data).on(self.device))
    }

    /// Element-wise product of two tensors with identical layout.
    pub fn mul(&self, other: &Tensor) -> Result<Self> {
        self.check_same_layout(other, "mul")?;
        let data = match_data!(&self.data, lhs => Element::into_data(mul_typed(lhs, other)?));
        Ok(Self::from_data(data).on(self.device))
    }

    /// Multiply every element by a scalar factor.
    pub fn scale(&self, factor: f64) -> Self {
        let data = match_data!(&self.data, array => Element::into_data(scale_typed(array, factor)));
        Self::from_data(data).on(self.device)
    }

    /// Sum broadcast dimensions away so the result has `shape`.
    ///
    /// Leading dimensions are summed out entirely; dimensions where `shape`
    /// has size 1 are summed with the axis kept.
    pub fn sum_to_shape(&self, shape: &[usize]) -> Result<Self> {
        if self.shape() == shape {
            return Ok(self.detach());
        }
        let data = match_data!(&self.data, array => {
            Element::into_data(sum_to_shape_typed(array, shape)?)
        });
        Ok(Self::from_data(data).on(self.device))
    }

    /// Compare values within `atol + rtol * |other|`, requiring equal shapes.
    pub fn allclose(&self, other: &Tensor, rtol: f64, atol: f64) -> bool {
        if self.shape() != other.shape() {
            return false;
        }
        let lhs = self.to_f64_array();
        let rhs = other.to_f64_array();
        lhs.iter().zip(rhs.iter()).all(|(&a, &b)| {
            if a.is_nan() || b.is_nan() {
                return a.is_nan() && b.is_nan();
            }
            (a - b).abs() <= atol + rtol * b.abs()
        })
    }

    /// Shape, dtype and device without the data.
    pub fn meta(&self) -> FakeTensor {
        FakeTensor::from_tensor(self)
    }

    fn check_same_layout(&self, other: &Tensor, what: &str) -> Result<()> {
        if self.device != other.device {
            return Err(Error::Precondition(format!(
                "{}: tensors on different devices ({} vs {})",
                what, self.device, other.device
            )));
        }
        if self.dtype() != other.dtype() {
            return Err(Error::Precondition(format!(
                "{}: dtype mismatch ({} vs {})",
                what,
                self.dtype(),
                other.dtype()
            )));
        }
        if self.shape() != other.shape() {
            return Err(Error::Shape(format!(
                "{}: shape mismatch ({:?} vs {:?})",
                what,
                self.shape(),
                other.shape()
            )));
        }
        Ok(())
    }
}

fn reshape_typed<T: Element>(array: &ArrayD<T>, shape: &[usize]) -> Result<ArrayD<T>> {
    let values: Vec<T> = array.iter().copied().collect();
    ArrayD::from_shape_vec(IxDyn(shape), values).map_err(|e| Error::Shape(e.to_string()))
}

fn add_typed<T: Element>(lhs: &ArrayD<T>, other: &Tensor) -> Result<ArrayD<T>> {
    let rhs = other.array::<T>()?;
    Ok(Zip::from(lhs).and(rhs).map_collect(|&a, &b| a.elem_add(b)))
}

fn mul_typed<T: Element>(lhs: &ArrayD<T>, other: &Tensor) -> Result<ArrayD<T>> {
    let rhs = other.array::<T>()?;
    Ok(Zip::from(lhs).and(rhs).map_collect(|&a, &b| a.elem_mul(b)))
}

fn scale_typed<T: Element>(array: &ArrayD<T>, factor: f64) -> ArrayD<T> {
    array.mapv(|value| T::from_f64(value.to_f64() * factor))
}

fn sum_to_shape_typed<T: Element>(array: &ArrayD<T>, shape: &[usize]) -> Result<ArrayD<T>> {
    if array.ndim() < shape.len() {
        return Err(Error::Shape(format!(
            "cannot sum shape {:?} down to larger rank shape {:?}",
            array.shape(),
            shape
        )));
    }
    let mut out = array.clone();
    while out.ndim() > shape.len() {
        out = out.fold_axis(Axis(0), T::zero(), |acc, value| acc.elem_add(*value));
    }
    for (axis, &size) in shape.iter().enumerate() {
        let current = out.shape()[axis];
        if current == size {
            continue;
        }
        if size != 1 {
            return Err(Error::Shape(format!(
                "cannot sum shape {:?} to {:?}: dimension {} is {} (expected {} or 1)",
                array.shape(),
                shape,
                axis,
                size,
                current
            )));
        }
        out = out
            .fold_axis(Axis(axis), T::zero(), |acc, value| acc.elem_add(*value))
            .insert_axis(Axis(axis));
    }
    Ok(out)
}

impl PartialEq for Tensor {
    /// Equal data and device; the gradient flag is ignored.
    fn eq(&self, other: &Self) -> bool {
        self.device == other.device && self.data == other.data
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "tensor(dtype={}, shape={:?}, device={})",
            self.dtype(),
            self.shape(),
            self.device
        )?;
        match_data!(&self.data, array => write!(f, "{}", array))
    }
}

//! Positional argument and result values.

use std::fmt;

use crate::fake::FakeTensor;
use crate::tensor::Tensor;
use crate::{Error, Result};

/// The kind of a value, used for schema checks and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Tensor,
    TensorList,
    Int,
    IntList,
    Float,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Tensor => "Tensor",
            ValueKind::TensorList => "Tensor[]",
            ValueKind::Int => "int",
            ValueKind::IntList => "int[]",
            ValueKind::Float => "float",
        };
        f.write_str(name)
    }
}

/// A real argument or result.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Tensor(Tensor),
    TensorList(Vec<Tensor>),
    Int(i64),
    IntList(Vec<i64>),
    Float(f64),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Tensor(_) => ValueKind::Tensor,
            Value::TensorList(_) => ValueKind::TensorList,
            Value::Int(_) => ValueKind::Int,
            Value::IntList(_) => ValueKind::IntList,
            Value::Float(_) => ValueKind::Float,
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Value::Tensor(tensor) => Some(tensor),
            _ => None,
        }
    }

    pub fn as_tensor_list(&self) -> Option<&[Tensor]> {
        match self {
            Value::TensorList(tensors) => Some(tensors),
            _ => None,
        }
    }

    /// All tensors held by this value, in order.
    pub fn tensors(&self) -> Vec<&Tensor> {
        match self {
            Value::Tensor(tensor) => vec![tensor],
            Value::TensorList(tensors) => tensors.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Whether any tensor in this value tracks gradients.
    pub fn requires_grad(&self) -> bool {
        self.tensors().iter().any(|t| t.requires_grad())
    }

    /// Set the gradient flag on every floating-point tensor in this value.
    pub fn with_requires_grad(self, requires_grad: bool) -> Self {
        let mark = |t: Tensor| {
            let flag = requires_grad && t.dtype().is_floating_point();
            t.with_requires_grad(flag)
        };
        match self {
            Value::Tensor(tensor) => Value::Tensor(mark(tensor)),
            Value::TensorList(tensors) => Value::TensorList(tensors.into_iter().map(mark).collect()),
            other => other,
        }
    }

    /// Whether gradients can flow through this value.
    pub fn is_differentiable(&self) -> bool {
        match self {
            Value::Tensor(tensor) => tensor.dtype().is_floating_point(),
            Value::TensorList(tensors) => {
                !tensors.is_empty() && tensors.iter().all(|t| t.dtype().is_floating_point())
            }
            _ => false,
        }
    }

    /// Fake counterpart with the same shapes, dtypes and devices.
    pub fn meta(&self) -> FakeValue {
        match self {
            Value::Tensor(tensor) => FakeValue::Tensor(tensor.meta()),
            Value::TensorList(tensors) => {
                FakeValue::TensorList(tensors.iter().map(Tensor::meta).collect())
            }
            Value::Int(value) => FakeValue::Int(*value),
            Value::IntList(values) => FakeValue::IntList(values.clone()),
            Value::Float(value) => FakeValue::Float(*value),
        }
    }
}

impl From<Tensor> for Value {
    fn from(tensor: Tensor) -> Self {
        Value::Tensor(tensor)
    }
}

impl From<Vec<Tensor>> for Value {
    fn from(tensors: Vec<Tensor>) -> Self {
        Value::TensorList(tensors)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<Vec<i64>> for Value {
    fn from(values: Vec<i64>) -> Self {
        Value::IntList(values)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Tensor(tensor) => write!(f, "{}", tensor.meta()),
            Value::TensorList(tensors) => {
                let items: Vec<String> = tensors.iter().map(|t| t.meta().to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Value::Int(value) => write!(f, "{}", value),
            Value::IntList(values) => write!(f, "{:?}", values),
            Value::Float(value) => write!(f, "{}", value),
        }
    }
}

/// A fake argument or result.
#[derive(Debug, Clone, PartialEq)]
pub enum FakeValue {
    Tensor(FakeTensor),
    TensorList(Vec<FakeTensor>),
    Int(i64),
    IntList(Vec<i64>),
    Float(f64),
}

impl FakeValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            FakeValue::Tensor(_) => ValueKind::Tensor,
            FakeValue::TensorList(_) => ValueKind::TensorList,
            FakeValue::Int(_) => ValueKind::Int,
            FakeValue::IntList(_) => ValueKind::IntList,
            FakeValue::Float(_) => ValueKind::Float,
        }
    }

    pub fn as_tensor(&self) -> Option<&FakeTensor> {
        match self {
            FakeValue::Tensor(tensor) => Some(tensor),
            _ => None,
        }
    }
}

impl From<FakeTensor> for FakeValue {
    fn from(tensor: FakeTensor) -> Self {
        FakeValue::Tensor(tensor)
    }
}

impl From<Vec<FakeTensor>> for FakeValue {
    fn from(tensors: Vec<FakeTensor>) -> Self {
        FakeValue::TensorList(tensors)
    }
}

impl fmt::Display for FakeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FakeValue::Tensor(tensor) => write!(f, "{}", tensor),
            FakeValue::TensorList(tensors) => {
                let items: Vec<String> = tensors.iter().map(|t| t.to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
            FakeValue::Int(value) => write!(f, "{}", value),
            FakeValue::IntList(values) => write!(f, "{:?}", values),
            FakeValue::Float(value) => write!(f, "{}", value),
        }
    }
}

fn argument_error(index: usize, expected: ValueKind, found: Option<ValueKind>) -> Error {
    match found {
        Some(found) => Error::Argument(format!(
            "argument {} expected {} but found {}",
            index, expected, found
        )),
        None => Error::Argument(format!(
            "missing argument {} (expected {})",
            index, expected
        )),
    }
}

/// Typed positional access to real arguments.
pub trait ValueArgs {
    fn tensor(&self, index: usize) -> Result<&Tensor>;
    fn tensor_list(&self, index: usize) -> Result<&[Tensor]>;
    fn int(&self, index: usize) -> Result<i64>;
    fn int_list(&self, index: usize) -> Result<&[i64]>;
    /// A `Float`, or an `Int` widened to `f64`.
    fn number(&self, index: usize) -> Result<f64>;
}

impl ValueArgs for [Value] {
    fn tensor(&self, index: usize) -> Result<&Tensor> {
        match self.get(index) {
            Some(Value::Tensor(tensor)) => Ok(tensor),
            other => Err(argument_error(index, ValueKind::Tensor, other.map(Value::kind))),
        }
    }

    fn tensor_list(&self, index: usize) -> Result<&[Tensor]> {
        match self.get(index) {
            Some(Value::TensorList(tensors)) => Ok(tensors),
            other => Err(argument_error(
                index,
                ValueKind::TensorList,
                other.map(Value::kind),
            )),
        }
    }

    fn int(&self, index: usize) -> Result<i64> {
        match self.get(index) {
            Some(Value::Int(value)) => Ok(*value),
            other => Err(argument_error(index, ValueKind::Int, other.map(Value::kind))),
        }
    }

    fn int_list(&self, index: usize) -> Result<&[i64]> {
        match self.get(index) {
            Some(Value::IntList(values)) => Ok(values),
            other => Err(argument_error(index, ValueKind::IntList, other.map(Value::kind))),
        }
    }

    fn number(&self, index: usize) -> Result<f64> {
        match self.get(index) {
            Some(Value::Float(value)) => Ok(*value),
            Some(Value::Int(value)) => Ok(*value as f64),
            other => Err(argument_error(index, ValueKind::Float, other.map(Value::kind))),
        }
    }
}

/// Typed positional access to fake arguments.
pub trait FakeArgs {
    fn tensor(&self, index: usize) -> Result<&FakeTensor>;
    fn tensor_list(&self, index: usize) -> Result<&[FakeTensor]>;
    fn int(&self, index: usize) -> Result<i64>;
    fn int_list(&self, index: usize) -> Result<&[i64]>;
}

impl FakeArgs for [FakeValue] {
    fn tensor(&self, index: usize) -> Result<&FakeTensor> {
        match self.get(index) {
            Some(FakeValue::Tensor(tensor)) => Ok(tensor),
            other => Err(argument_error(index, ValueKind::Tensor, other.map(FakeValue::kind))),
        }
    }

    fn tensor_list(&self, index: usize) -> Result<&[FakeTensor]> {
        match self.get(index) {
            Some(FakeValue::TensorList(tensors)) => Ok(tensors),
            other => Err(argument_error(
                index,
                ValueKind::TensorList,
                other.map(FakeValue::kind),
            )),
        }
    }

    fn int(&self, index: usize) -> Result<i64> {
        match self.get(index) {
            Some(FakeValue::Int(value)) => Ok(*value),
            other => Err(argument_error(index, ValueKind::Int, other.map(FakeValue::kind))),
        }
    }

    fn int_list(&self, index: usize) -> Result<&[i64]> {
        match self.get(index) {
            Some(FakeValue::IntList(values)) => Ok(values),
            other => Err(argument_error(
                index,
                ValueKind::IntList,
                other.map(FakeValue::kind),
            )),
        }
    }
}

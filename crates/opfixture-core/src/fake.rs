//! Fake tensors for shape, dtype and device inference without data.
//!
//! Operators whose output size depends on input values (nonzero, nms) cannot
//! know their output shape ahead of time. Their fake implementations allocate
//! an unbacked size from a [`ShapeEnv`]; when the real forward runs, each
//! unbacked symbol binds to exactly one concrete size.

use std::collections::HashMap;
use std::fmt;

use crate::tensor::Tensor;
use crate::types::{DataType, Device};
use crate::{Error, Result};

/// A size symbol with no value known at trace time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnbackedSymbol(pub u32);

impl fmt::Display for UnbackedSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

/// A single dimension in a fake tensor shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolicDim {
    /// Known size.
    Fixed(usize),
    /// Size decided by the data at run time.
    Unbacked(UnbackedSymbol),
}

impl SymbolicDim {
    pub fn is_fixed(&self) -> bool {
        matches!(self, SymbolicDim::Fixed(_))
    }

    /// Get the fixed size, if known.
    pub fn as_fixed(&self) -> Option<usize> {
        match self {
            SymbolicDim::Fixed(size) => Some(*size),
            SymbolicDim::Unbacked(_) => None,
        }
    }
}

impl From<usize> for SymbolicDim {
    fn from(size: usize) -> Self {
        SymbolicDim::Fixed(size)
    }
}

impl fmt::Display for SymbolicDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolicDim::Fixed(size) => write!(f, "{}", size),
            SymbolicDim::Unbacked(symbol) => write!(f, "{}", symbol),
        }
    }
}

/// Allocates fresh unbacked size symbols for one fake call.
#[derive(Debug, Default)]
pub struct ShapeEnv {
    next_symbol: u32,
}

impl ShapeEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new unbacked size (`u0`, `u1`, ...).
    pub fn create_unbacked_size(&mut self) -> SymbolicDim {
        let symbol = UnbackedSymbol(self.next_symbol);
        self.next_symbol += 1;
        tracing::debug!(%symbol, "allocated unbacked size");
        SymbolicDim::Unbacked(symbol)
    }

    /// Number of symbols handed out so far.
    pub fn num_unbacked(&self) -> usize {
        self.next_symbol as usize
    }
}

/// Shape, dtype and device of a tensor, without storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FakeTensor {
    pub shape: Vec<SymbolicDim>,
    pub dtype: DataType,
    pub device: Device,
}

impl FakeTensor {
    pub fn new(shape: Vec<SymbolicDim>, dtype: DataType, device: Device) -> Self {
        Self {
            shape,
            dtype,
            device,
        }
    }

    /// A fake tensor whose dimensions are all known.
    pub fn fixed(shape: &[usize], dtype: DataType, device: Device) -> Self {
        Self::new(shape.iter().map(|&d| SymbolicDim::Fixed(d)).collect(), dtype, device)
    }

    pub fn from_tensor(tensor: &Tensor) -> Self {
        Self::fixed(tensor.shape(), tensor.dtype(), tensor.device())
    }

    /// Same shape, dtype and device.
    pub fn empty_like(&self) -> Self {
        self.clone()
    }

    /// A new placeholder on the same device with the given shape and dtype.
    pub fn new_empty(&self, shape: Vec<SymbolicDim>, dtype: DataType) -> Self {
        Self::new(shape, dtype, self.device)
    }

    pub fn with_dtype(&self, dtype: DataType) -> Self {
        Self::new(self.shape.clone(), dtype, self.device)
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// The concrete shape, or `None` if any dimension is unbacked.
    pub fn static_shape(&self) -> Option<Vec<usize>> {
        self.shape.iter().map(SymbolicDim::as_fixed).collect()
    }

    /// Check that `tensor` is a valid realization of this fake tensor.
    ///
    /// Fixed dimensions must match exactly. Each unbacked symbol binds to the
    /// first size it meets, and every later occurrence (in this tensor or any
    /// other bound with the same `bindings`) must agree.
    pub fn bind(
        &self,
        tensor: &Tensor,
        bindings: &mut HashMap<UnbackedSymbol, usize>,
    ) -> Result<()> {
        if self.dtype != tensor.dtype() {
            return Err(Error::DataType(format!(
                "fake dtype {} but real dtype {}",
                self.dtype,
                tensor.dtype()
            )));
        }
        if self.device != tensor.device() {
            return Err(Error::Precondition(format!(
                "fake device {} but real device {}",
                self.device,
                tensor.device()
            )));
        }
        if self.ndim() != tensor.ndim() {
            return Err(Error::Shape(format!(
                "fake shape {} has rank {} but real shape {:?} has rank {}",
                self,
                self.ndim(),
                tensor.shape(),
                tensor.ndim()
            )));
        }

        for (axis, (dim, &actual)) in self.shape.iter().zip(tensor.shape()).enumerate() {
            match dim {
                SymbolicDim::Fixed(expected) if *expected != actual => {
                    return Err(Error::Shape(format!(
                        "dimension {} is {} in the fake tensor but {} in the real tensor",
                        axis, expected, actual
                    )));
                }
                SymbolicDim::Fixed(_) => {}
                SymbolicDim::Unbacked(symbol) => match bindings.get(symbol) {
                    Some(&bound) if bound != actual => {
                        return Err(Error::Shape(format!(
                            "unbacked size {} bound to {} but dimension {} is {}",
                            symbol, bound, axis, actual
                        )));
                    }
                    Some(_) => {}
                    None => {
                        bindings.insert(*symbol, actual);
                    }
                },
            }
        }
        Ok(())
    }
}

impl fmt::Display for FakeTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.shape.iter().map(|d| d.to_string()).collect();
        write!(
            f,
            "FakeTensor([{}], dtype={}, device={})",
            dims.join(", "),
            self.dtype,
            self.device
        )
    }
}

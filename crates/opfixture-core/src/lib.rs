//! Host framework abstractions for custom operator fixtures.
//!
//! This crate provides the pieces an operator author registers against:
//! - Host tensors backed by `ndarray` (`Tensor`, `TensorData`, `Element`)
//! - Fake tensors with unbacked sizes for shape inference (`FakeTensor`, `ShapeEnv`)
//! - Positional argument values and operator schemas (`Value`, `OpSchema`)
//! - The `CustomOp` registration trait and type-erased `Operator` dispatch
//! - Operator registry for lookup by qualified name

pub mod element;
pub mod fake;
pub mod operator;
pub mod registry;
pub mod schema;
pub mod tensor;
pub mod types;
pub mod value;

pub use half;

pub use element::Element;
pub use fake::{FakeTensor, ShapeEnv, SymbolicDim, UnbackedSymbol};
pub use operator::{CustomOp, GradCall, GradFn, Operator};
pub use registry::OperatorRegistry;
pub use schema::{OpName, OpSchema, Param, ParamKind, ReturnKind};
pub use tensor::{Tensor, TensorData};
pub use types::{DataType, Device};
pub use value::{FakeArgs, FakeValue, Value, ValueArgs, ValueKind};

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for operator dispatch and tensor utilities.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A data-dependent operator would produce a degenerate result.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Caller-supplied tensors disagree on device, dtype or layout.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Data type error: {0}")]
    DataType(String),

    /// Arguments do not match the operator schema.
    #[error("Argument error: {0}")]
    Argument(String),

    #[error("Autograd error: {0}")]
    Autograd(String),
}

impl Error {
    /// Whether this error marks an input configuration the operator rejects by design.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Unsupported(_))
    }
}

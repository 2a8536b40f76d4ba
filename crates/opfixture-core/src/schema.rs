//! Operator schemas: qualified names, typed parameters and return kinds.

use std::fmt;

use crate::value::{FakeValue, Value, ValueKind};
use crate::{Error, Result};

/// A namespaced operator name such as `_opfixture::numpy_cube`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpName {
    pub namespace: &'static str,
    pub name: &'static str,
}

impl OpName {
    pub const fn new(namespace: &'static str, name: &'static str) -> Self {
        Self { namespace, name }
    }
}

impl fmt::Display for OpName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.namespace, self.name)
    }
}

/// Declared kind of an operator parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Tensor,
    TensorList,
    Int,
    IntList,
    /// A float; ints are accepted and widened.
    Number,
}

impl ParamKind {
    pub fn accepts(&self, kind: ValueKind) -> bool {
        match self {
            ParamKind::Tensor => kind == ValueKind::Tensor,
            ParamKind::TensorList => kind == ValueKind::TensorList,
            ParamKind::Int => kind == ValueKind::Int,
            ParamKind::IntList => kind == ValueKind::IntList,
            ParamKind::Number => matches!(kind, ValueKind::Int | ValueKind::Float),
        }
    }

    /// Whether gradients can be returned for this parameter.
    pub fn is_tensor(&self) -> bool {
        matches!(self, ParamKind::Tensor | ParamKind::TensorList)
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamKind::Tensor => "Tensor",
            ParamKind::TensorList => "Tensor[]",
            ParamKind::Int => "int",
            ParamKind::IntList => "int[]",
            ParamKind::Number => "float",
        };
        f.write_str(name)
    }
}

/// A named, typed parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    pub name: &'static str,
    pub kind: ParamKind,
}

/// Declared kind of an operator result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Tensor,
    TensorList,
    Int,
}

impl ReturnKind {
    pub fn accepts(&self, kind: ValueKind) -> bool {
        matches!(
            (self, kind),
            (ReturnKind::Tensor, ValueKind::Tensor)
                | (ReturnKind::TensorList, ValueKind::TensorList)
                | (ReturnKind::Int, ValueKind::Int)
        )
    }
}

impl fmt::Display for ReturnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReturnKind::Tensor => "Tensor",
            ReturnKind::TensorList => "Tensor[]",
            ReturnKind::Int => "int",
        };
        f.write_str(name)
    }
}

/// Signature of a registered operator.
///
/// # Example
///
/// ```
/// use opfixture_core::{OpSchema, ParamKind, ReturnKind};
///
/// let schema = OpSchema::new("_opfixture", "numpy_sort")
///     .param("x", ParamKind::Tensor)
///     .param("dim", ParamKind::Int)
///     .returns(&[ReturnKind::Tensor, ReturnKind::Tensor, ReturnKind::Tensor]);
///
/// assert_eq!(
///     schema.to_string(),
///     "_opfixture::numpy_sort(Tensor x, int dim) -> (Tensor, Tensor, Tensor)"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpSchema {
    pub name: OpName,
    pub params: Vec<Param>,
    pub returns: Vec<ReturnKind>,
}

impl OpSchema {
    pub fn new(namespace: &'static str, name: &'static str) -> Self {
        Self {
            name: OpName::new(namespace, name),
            params: Vec::new(),
            returns: Vec::new(),
        }
    }

    /// Append a parameter.
    pub fn param(mut self, name: &'static str, kind: ParamKind) -> Self {
        self.params.push(Param { name, kind });
        self
    }

    /// Set the return kinds.
    pub fn returns(mut self, returns: &[ReturnKind]) -> Self {
        self.returns = returns.to_vec();
        self
    }

    /// Check arity and kinds of real arguments.
    pub fn validate_args(&self, args: &[Value]) -> Result<()> {
        let kinds: Vec<ValueKind> = args.iter().map(Value::kind).collect();
        self.validate_arg_kinds(&kinds)
    }

    /// Check arity and kinds of fake arguments.
    pub fn validate_fake_args(&self, args: &[FakeValue]) -> Result<()> {
        let kinds: Vec<ValueKind> = args.iter().map(FakeValue::kind).collect();
        self.validate_arg_kinds(&kinds)
    }

    pub fn validate_outputs(&self, outputs: &[Value]) -> Result<()> {
        let kinds: Vec<ValueKind> = outputs.iter().map(Value::kind).collect();
        self.validate_output_kinds(&kinds)
    }

    pub fn validate_fake_outputs(&self, outputs: &[FakeValue]) -> Result<()> {
        let kinds: Vec<ValueKind> = outputs.iter().map(FakeValue::kind).collect();
        self.validate_output_kinds(&kinds)
    }

    fn validate_arg_kinds(&self, kinds: &[ValueKind]) -> Result<()> {
        if kinds.len() != self.params.len() {
            return Err(Error::Argument(format!(
                "{} expects {} arguments, got {}",
                self.name,
                self.params.len(),
                kinds.len()
            )));
        }
        for (param, kind) in self.params.iter().zip(kinds) {
            if !param.kind.accepts(*kind) {
                return Err(Error::Argument(format!(
                    "{}: argument '{}' expects {}, got {}",
                    self.name, param.name, param.kind, kind
                )));
            }
        }
        Ok(())
    }

    fn validate_output_kinds(&self, kinds: &[ValueKind]) -> Result<()> {
        let matches = kinds.len() == self.returns.len()
            && self.returns.iter().zip(kinds).all(|(ret, kind)| ret.accepts(*kind));
        if !matches {
            let found: Vec<String> = kinds.iter().map(|k| k.to_string()).collect();
            return Err(Error::Argument(format!(
                "{} declared returns {} but produced ({})",
                self.name,
                self.returns_string(),
                found.join(", ")
            )));
        }
        Ok(())
    }

    fn returns_string(&self) -> String {
        match self.returns.as_slice() {
            [single] => single.to_string(),
            many => {
                let items: Vec<String> = many.iter().map(|r| r.to_string()).collect();
                format!("({})", items.join(", "))
            }
        }
    }
}

impl fmt::Display for OpSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("{} {}", p.kind, p.name))
            .collect();
        write!(
            f,
            "{}({}) -> {}",
            self.name,
            params.join(", "),
            self.returns_string()
        )
    }
}

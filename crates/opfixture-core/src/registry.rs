//! Operator registry for lookup by qualified name.

use crate::operator::Operator;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registry for operator implementations.
///
/// Maps qualified names (e.g. `_opfixture::numpy_cube`) to their `Operator`
/// implementations. Lookups also accept the bare operator name when it is
/// unambiguous across namespaces.
///
/// # Example
///
/// ```ignore
/// let mut registry = OperatorRegistry::new();
/// registry.register(NumpyCube).register(NumpyMul);
///
/// let op = registry.get("numpy_cube").unwrap();
/// assert_eq!(op.name(), "_opfixture::numpy_cube");
/// ```
pub struct OperatorRegistry {
    /// Map from qualified name to operator implementation.
    operators: BTreeMap<String, Arc<dyn Operator>>,
}

impl OperatorRegistry {
    /// Create a new empty operator registry.
    pub fn new() -> Self {
        Self {
            operators: BTreeMap::new(),
        }
    }

    /// Register an operator under its schema name.
    ///
    /// Returns `self` for method chaining. Registering a second operator with
    /// the same name replaces the first.
    pub fn register<O>(&mut self, operator: O) -> &mut Self
    where
        O: Operator + 'static,
    {
        self.register_arc(Arc::new(operator))
    }

    pub fn register_arc(&mut self, operator: Arc<dyn Operator>) -> &mut Self {
        let name = operator.name();
        if self.operators.insert(name.clone(), operator).is_some() {
            tracing::warn!(op = %name, "replaced previously registered operator");
        }
        self
    }

    /// Look up an operator by qualified or bare name.
    ///
    /// Returns `None` if no operator matches, or if a bare name matches
    /// operators in more than one namespace.
    pub fn get(&self, name: &str) -> Option<&dyn Operator> {
        self.lookup(name).map(|op| op.as_ref())
    }

    /// Like `get`, but returns a shared handle.
    pub fn get_arc(&self, name: &str) -> Option<Arc<dyn Operator>> {
        self.lookup(name).cloned()
    }

    /// Check if an operator is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Get the number of registered operators.
    pub fn len(&self) -> usize {
        self.operators.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Iterate over all qualified operator names, sorted.
    pub fn operator_names(&self) -> impl Iterator<Item = &str> {
        self.operators.keys().map(|s| s.as_str())
    }

    fn lookup(&self, name: &str) -> Option<&Arc<dyn Operator>> {
        if let Some(op) = self.operators.get(name) {
            return Some(op);
        }
        if name.contains("::") {
            return None;
        }
        let suffix = format!("::{}", name);
        let mut matches = self
            .operators
            .iter()
            .filter(|(qualified, _)| qualified.ends_with(&suffix));
        match (matches.next(), matches.next()) {
            (Some((_, op)), None) => Some(op),
            _ => None,
        }
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

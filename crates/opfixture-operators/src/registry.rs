//! Fixture operator registry.
//!
//! Provides a pre-populated registry with the ten fixture operators.

use opfixture_core::OperatorRegistry;

use crate::operators::{
    NumpyCat, NumpyCube, NumpyMul, NumpyNms, NumpyNonzero, NumpySort, NumpySplitCopy,
    NumpySplitCopyWithInt, NumpyTake, NumpyViewCopy,
};

/// Returns an operator registry pre-populated with every fixture operator,
/// keyed by qualified name (`_opfixture::numpy_cube`, ...).
///
/// Further operators can be added to the returned registry via
/// `registry.register(operator)`.
pub fn fixture_registry() -> OperatorRegistry {
    let mut registry = OperatorRegistry::new();

    // Element-wise
    registry.register(NumpyCube).register(NumpyMul);

    // Sorting
    registry.register(NumpySort).register(NumpyTake);

    // Data-dependent output shapes
    registry.register(NumpyNonzero).register(NumpyNms);

    // Shape manipulation
    registry
        .register(NumpyViewCopy)
        .register(NumpyCat)
        .register(NumpySplitCopy)
        .register(NumpySplitCopyWithInt);

    registry
}

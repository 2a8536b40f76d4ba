//! Custom operator fixtures for exercising the `opfixture-core` extension API.
//!
//! Every operator wraps an array primitive and registers a forward, a fake
//! variant for shape inference and, where it makes sense, an autograd rule.
//!
//! # Operators
//!
//! - **Element-wise**: `numpy_cube` (value and derivative), `numpy_mul`
//! - **Sorting**: `numpy_sort`, `numpy_take`
//! - **Data-dependent shapes**: `numpy_nonzero`, `numpy_nms`
//! - **Shape manipulation**: `numpy_view_copy`, `numpy_cat`, `numpy_split_copy`,
//!   `numpy_split_copy_with_int`
//!
//! The catalog (`custom_op_db`) pairs each operator with a seeded sample-input
//! generator and the flags a test harness needs.

pub mod catalog;
pub mod helpers;
pub mod operators;
pub mod samples;

mod registry;

pub use catalog::{OpInfo, call_sample, custom_op_db};
pub use registry::fixture_registry;
pub use samples::{SampleConfig, SampleFn, SampleInput, make_tensor};

/// Namespace shared by every fixture operator.
pub const NAMESPACE: &str = "_opfixture";

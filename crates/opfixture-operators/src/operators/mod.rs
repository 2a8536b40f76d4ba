//! Fixture operator implementations.
//!
//! Each operator is a unit struct implementing `CustomOp`, next to a plain
//! function computing its forward. Backward formulas call those functions
//! directly when they are expressed through another operator.

pub mod data_dependent;
pub mod elementwise;
pub mod shape;
pub mod sort;

// Re-export all operators
pub use data_dependent::{NumpyNms, NumpyNonzero, numpy_nms, numpy_nonzero};
pub use elementwise::{NumpyCube, NumpyMul, numpy_cube, numpy_mul};
pub use shape::{
    NumpyCat, NumpySplitCopy, NumpySplitCopyWithInt, NumpyViewCopy, numpy_cat, numpy_split_copy,
    numpy_view_copy,
};
pub use sort::{NumpySort, NumpyTake, numpy_sort, numpy_take};

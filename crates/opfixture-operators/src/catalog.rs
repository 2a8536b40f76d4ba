//! The fixture catalog: one `OpInfo` entry per operator.

use std::fmt;
use std::sync::Arc;

use opfixture_core::{DataType, Operator, Result, Value};

use crate::operators::{
    NumpyCat, NumpyCube, NumpyMul, NumpyNms, NumpyNonzero, NumpySort, NumpySplitCopy,
    NumpySplitCopyWithInt, NumpyTake, NumpyViewCopy,
};
use crate::samples::{self, SampleConfig, SampleFn, SampleInput};

/// Test metadata for one catalog operator.
#[derive(Clone)]
pub struct OpInfo {
    /// Display name, e.g. `NumpyCubeCustomOp`.
    pub name: &'static str,
    pub op: Arc<dyn Operator>,
    pub sample_inputs: SampleFn,
    pub dtypes: Vec<DataType>,
    pub supports_autograd: bool,
    pub check_batched_grad: bool,
    pub check_batched_gradgrad: bool,
    pub supports_out: bool,
    /// Output positions gradient checks look at; `None` means all.
    pub gradcheck_outputs: Option<&'static [usize]>,
}

impl OpInfo {
    /// An entry with the catalog defaults: every dtype in
    /// `all_types_and(Bool, F16)`, autograd supported, no `out=` variant.
    pub fn new(name: &'static str, op: impl Operator + 'static, sample_inputs: SampleFn) -> Self {
        Self {
            name,
            op: Arc::new(op),
            sample_inputs,
            dtypes: DataType::all_types_and(&[DataType::Bool, DataType::F16]),
            supports_autograd: true,
            check_batched_grad: true,
            check_batched_gradgrad: true,
            supports_out: false,
            gradcheck_outputs: None,
        }
    }

    pub fn without_autograd(mut self) -> Self {
        self.supports_autograd = false;
        self
    }

    pub fn without_batched_grad(mut self) -> Self {
        self.check_batched_grad = false;
        self.check_batched_gradgrad = false;
        self
    }

    /// Restrict gradient checks to the given outputs.
    pub fn gradcheck_outputs(mut self, outputs: &'static [usize]) -> Self {
        self.gradcheck_outputs = Some(outputs);
        self
    }

    /// Generate sample inputs for a config.
    pub fn samples(&self, config: &SampleConfig) -> Result<Vec<SampleInput>> {
        (self.sample_inputs)(config)
    }

    pub fn supports_dtype(&self, dtype: DataType) -> bool {
        self.dtypes.contains(&dtype)
    }

    /// Keep only the outputs selected for gradient checks.
    pub fn select_gradcheck_outputs<T: Clone>(&self, outputs: &[T]) -> Vec<T> {
        match self.gradcheck_outputs {
            Some(selected) => selected
                .iter()
                .filter_map(|&i| outputs.get(i).cloned())
                .collect(),
            None => outputs.to_vec(),
        }
    }

    /// Whether output `index` takes part in gradient checks.
    pub fn is_gradcheck_output(&self, index: usize) -> bool {
        self.gradcheck_outputs
            .is_none_or(|selected| selected.contains(&index))
    }
}

impl fmt::Debug for OpInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpInfo")
            .field("name", &self.name)
            .field("op", &self.op.name())
            .field("dtypes", &self.dtypes)
            .field("supports_autograd", &self.supports_autograd)
            .field("check_batched_grad", &self.check_batched_grad)
            .field("check_batched_gradgrad", &self.check_batched_gradgrad)
            .field("supports_out", &self.supports_out)
            .field("gradcheck_outputs", &self.gradcheck_outputs)
            .finish()
    }
}

/// The ten fixture operators in catalog order.
pub fn custom_op_db() -> Vec<OpInfo> {
    vec![
        OpInfo::new(
            "NumpyCubeCustomOp",
            NumpyCube,
            samples::sample_inputs_numpy_cube,
        ),
        OpInfo::new("NumpyMulCustomOp", NumpyMul, samples::sample_inputs_numpy_mul),
        OpInfo::new(
            "NumpySortCustomOp",
            NumpySort,
            samples::sample_inputs_numpy_sort,
        ),
        OpInfo::new(
            "NumpyTakeCustomOp",
            NumpyTake,
            samples::sample_inputs_numpy_take,
        ),
        OpInfo::new(
            "NumpyNonzeroCustomOp",
            NumpyNonzero,
            samples::sample_inputs_numpy_nonzero,
        )
        .without_autograd(),
        OpInfo::new("NumpyNMSCustomOp", NumpyNms, samples::sample_inputs_numpy_nms)
            .without_autograd(),
        OpInfo::new(
            "NumpyViewCopyCustomOp",
            NumpyViewCopy,
            samples::sample_inputs_numpy_view_copy,
        ),
        OpInfo::new("NumpyCatCustomOp", NumpyCat, samples::sample_inputs_numpy_cat)
            .without_batched_grad(),
        OpInfo::new(
            "NumpySplitCopyCustomOp",
            NumpySplitCopy,
            samples::sample_inputs_numpy_split_copy,
        )
        .without_batched_grad(),
        OpInfo::new(
            "NumpySplitCopyWithIntCustomOp",
            NumpySplitCopyWithInt,
            samples::sample_inputs_numpy_split_copy,
        )
        .without_batched_grad()
        .gradcheck_outputs(&[0]),
    ]
}

/// Run `info`'s operator on one sample.
pub fn call_sample(info: &OpInfo, sample: &SampleInput) -> Result<Vec<Value>> {
    info.op.call(&sample.arguments())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_entries() {
        let db = custom_op_db();
        assert_eq!(db.len(), 10);

        let names: Vec<_> = db.iter().map(|info| info.name).collect();
        assert_eq!(names[0], "NumpyCubeCustomOp");
        assert_eq!(names[9], "NumpySplitCopyWithIntCustomOp");

        for info in &db {
            assert!(!info.supports_out);
            assert_eq!(info.dtypes.len(), 9);
            assert!(info.supports_dtype(DataType::Bool));
            assert!(info.supports_dtype(DataType::F16));
            assert_eq!(info.supports_autograd, info.op.supports_autograd());
        }
    }

    #[test]
    fn test_gradcheck_output_selection() {
        let db = custom_op_db();
        let with_int = &db[9];
        assert_eq!(with_int.select_gradcheck_outputs(&[10, 20]), vec![10]);
        assert!(with_int.is_gradcheck_output(0));
        assert!(!with_int.is_gradcheck_output(1));

        let cube = &db[0];
        assert_eq!(cube.select_gradcheck_outputs(&[1, 2]), vec![1, 2]);
        assert!(cube.is_gradcheck_output(1));
    }

    #[test]
    fn test_batched_flags() {
        let db = custom_op_db();
        let flags: Vec<_> = db
            .iter()
            .map(|info| (info.name, info.check_batched_grad))
            .filter(|(_, batched)| !batched)
            .map(|(name, _)| name)
            .collect();
        assert_eq!(
            flags,
            vec![
                "NumpyCatCustomOp",
                "NumpySplitCopyCustomOp",
                "NumpySplitCopyWithIntCustomOp"
            ]
        );
    }
}

//! Check harness configuration.

use opfixture_core::{DataType, Device};
use opfixture_operators::{OpInfo, SampleConfig};

/// Settings shared by every check in a run.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckConfig {
    /// Seed passed to the sample generators.
    pub seed: u64,
    pub device: Device,
    /// Restrict the run to these dtypes; `None` uses each entry's own list.
    pub dtypes: Option<Vec<DataType>>,
    /// Finite-difference step.
    pub eps: f64,
    pub atol: f64,
    pub rtol: f64,
    /// Run gradient checks for entries that support autograd.
    pub check_grad: bool,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            device: Device::Cpu,
            dtypes: None,
            eps: 1e-6,
            atol: 1e-5,
            rtol: 1e-3,
            check_grad: true,
        }
    }
}

impl CheckConfig {
    /// The dtypes to check for `info`, in the entry's declared order.
    pub fn dtypes_for(&self, info: &OpInfo) -> Vec<DataType> {
        match &self.dtypes {
            Some(selected) => info
                .dtypes
                .iter()
                .copied()
                .filter(|dtype| selected.contains(dtype))
                .collect(),
            None => info.dtypes.clone(),
        }
    }

    /// Sample settings for one dtype.
    pub fn sample_config(&self, dtype: DataType, requires_grad: bool) -> SampleConfig {
        SampleConfig {
            dtype,
            device: self.device,
            requires_grad,
            seed: self.seed,
        }
    }

    /// Whether `analytical` is close enough to `numerical`.
    pub fn is_close(&self, analytical: f64, numerical: f64) -> bool {
        (analytical - numerical).abs() <= self.atol + self.rtol * numerical.abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opfixture_operators::custom_op_db;

    #[test]
    fn test_defaults() {
        let config = CheckConfig::default();
        assert_eq!(config.eps, 1e-6);
        assert_eq!(config.atol, 1e-5);
        assert_eq!(config.rtol, 1e-3);
        assert!(config.check_grad);
        assert_eq!(config.device, Device::Cpu);
    }

    #[test]
    fn test_dtype_selection() {
        let info = &custom_op_db()[0];
        let config = CheckConfig {
            dtypes: Some(vec![DataType::F64, DataType::Bool]),
            ..Default::default()
        };
        assert_eq!(config.dtypes_for(info), vec![DataType::Bool, DataType::F64]);
        assert_eq!(CheckConfig::default().dtypes_for(info).len(), 9);
    }

    #[test]
    fn test_tolerance() {
        let config = CheckConfig::default();
        assert!(config.is_close(1.0005, 1.0));
        assert!(config.is_close(0.0, 5e-6));
        assert!(!config.is_close(1.01, 1.0));
    }
}

//! Runs the checks over catalog entries and collects a report.

use std::fmt;

use opfixture_core::DataType;
use opfixture_operators::OpInfo;

use crate::{CheckConfig, CheckError, check_fake, gradcheck};

/// Which check produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    /// Sample generation.
    Samples,
    /// Forward plus fake agreement.
    Fake,
    Gradcheck,
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CheckKind::Samples => "samples",
            CheckKind::Fake => "fake",
            CheckKind::Gradcheck => "gradcheck",
        };
        f.write_str(name)
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Passed,
    /// The operator rejected the sample as unsupported.
    ExpectedFailure(String),
    Failed(String),
}

impl Outcome {
    fn from_result<T>(result: Result<T, CheckError>) -> Self {
        match result {
            Ok(_) => Outcome::Passed,
            Err(err) if err.is_unsupported() => Outcome::ExpectedFailure(err.to_string()),
            Err(err) => Outcome::Failed(err.to_string()),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

/// One row of a report.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub op: &'static str,
    pub dtype: DataType,
    /// Sample index, if the check ran on a sample.
    pub sample: Option<usize>,
    pub kind: CheckKind,
    pub outcome: Outcome,
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match &self.outcome {
            Outcome::Passed => "PASS",
            Outcome::ExpectedFailure(_) => "XFAIL",
            Outcome::Failed(_) => "FAIL",
        };
        write!(f, "{:<5} {} [{}] {}", status, self.op, self.dtype, self.kind)?;
        if let Some(sample) = self.sample {
            write!(f, " sample {}", sample)?;
        }
        match &self.outcome {
            Outcome::Passed => Ok(()),
            Outcome::ExpectedFailure(reason) | Outcome::Failed(reason) => {
                write!(f, ": {}", reason)
            }
        }
    }
}

/// All results of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckReport {
    pub results: Vec<CheckResult>,
}

impl CheckReport {
    pub fn passed(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Passed))
    }

    pub fn expected_failures(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::ExpectedFailure(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(Outcome::is_failure)
    }

    /// Whether no check failed.
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| r.outcome.is_failure())
    }

    fn count(&self, predicate: impl Fn(&Outcome) -> bool) -> usize {
        self.results.iter().filter(|r| predicate(&r.outcome)).count()
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            writeln!(f, "{}", result)?;
        }
        write!(
            f,
            "{} passed, {} expected failures, {} failed",
            self.passed(),
            self.expected_failures(),
            self.failed()
        )
    }
}

/// Run the checks for every entry in `db`.
pub fn run_checks(db: &[OpInfo], config: &CheckConfig) -> CheckReport {
    let mut report = CheckReport::default();
    for info in db {
        report.results.extend(check_op(info, config));
    }
    tracing::info!(
        ops = db.len(),
        passed = report.passed(),
        expected_failures = report.expected_failures(),
        failed = report.failed(),
        "checks finished"
    );
    report
}

/// Run the checks for one entry.
///
/// For each selected dtype the samples are generated, run through the
/// forward and fake variants. For entries that support autograd, the
/// `float64` samples are regenerated with `requires_grad` and
/// gradient-checked.
pub fn check_op(info: &OpInfo, config: &CheckConfig) -> Vec<CheckResult> {
    let _span = tracing::info_span!("check_op", op = info.name).entered();
    let mut results = Vec::new();

    for dtype in config.dtypes_for(info) {
        let result = |sample, kind, outcome| CheckResult {
            op: info.name,
            dtype,
            sample,
            kind,
            outcome,
        };

        let samples = match info.samples(&config.sample_config(dtype, false)) {
            Ok(samples) => samples,
            Err(err) => {
                results.push(result(None, CheckKind::Samples, Outcome::Failed(err.to_string())));
                continue;
            }
        };
        for (index, sample) in samples.iter().enumerate() {
            let outcome = Outcome::from_result(check_fake(info.op.as_ref(), &sample.arguments()));
            results.push(result(Some(index), CheckKind::Fake, outcome));
        }

        if !(config.check_grad && info.supports_autograd && dtype == DataType::F64) {
            continue;
        }
        let samples = match info.samples(&config.sample_config(dtype, true)) {
            Ok(samples) => samples,
            Err(err) => {
                results.push(result(None, CheckKind::Samples, Outcome::Failed(err.to_string())));
                continue;
            }
        };
        for (index, sample) in samples.iter().enumerate() {
            let outcome = Outcome::from_result(gradcheck(info, sample, config));
            results.push(result(Some(index), CheckKind::Gradcheck, outcome));
        }
    }

    for failure in results.iter().filter(|r| r.outcome.is_failure()) {
        tracing::warn!("{}", failure);
    }
    tracing::info!(checks = results.len(), "op checked");
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use opfixture_operators::custom_op_db;

    #[test]
    fn test_outcome_classification() {
        let unsupported = CheckError::Op(opfixture_core::Error::Unsupported("degenerate".into()));
        assert!(matches!(
            Outcome::from_result::<()>(Err(unsupported)),
            Outcome::ExpectedFailure(_)
        ));

        let shape = CheckError::Op(opfixture_core::Error::Shape("bad".into()));
        assert!(Outcome::from_result::<()>(Err(shape)).is_failure());
        assert_eq!(Outcome::from_result(Ok(1)), Outcome::Passed);
    }

    #[test]
    fn test_check_op_rows() {
        let db = custom_op_db();
        let config = CheckConfig {
            dtypes: Some(vec![DataType::I32, DataType::F64]),
            ..Default::default()
        };

        let cube = check_op(&db[0], &config);
        let kinds: Vec<_> = cube.iter().map(|r| (r.dtype, r.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (DataType::I32, CheckKind::Fake),
                (DataType::F64, CheckKind::Fake),
                (DataType::F64, CheckKind::Gradcheck),
            ]
        );

        // No gradient checks without autograd support.
        let nonzero = check_op(&db[4], &config);
        assert!(nonzero.iter().all(|r| r.kind == CheckKind::Fake));
    }

    #[test]
    fn test_report_display() {
        let report = CheckReport {
            results: vec![
                CheckResult {
                    op: "NumpyCubeCustomOp",
                    dtype: DataType::F32,
                    sample: Some(0),
                    kind: CheckKind::Fake,
                    outcome: Outcome::Passed,
                },
                CheckResult {
                    op: "NumpyNMSCustomOp",
                    dtype: DataType::Bool,
                    sample: Some(0),
                    kind: CheckKind::Fake,
                    outcome: Outcome::ExpectedFailure("too few boxes".into()),
                },
            ],
        };
        assert!(report.is_success());
        let text = report.to_string();
        assert!(text.contains("PASS  NumpyCubeCustomOp [float32] fake sample 0"));
        assert!(text.contains("XFAIL NumpyNMSCustomOp [bool] fake sample 0: too few boxes"));
        assert!(text.ends_with("1 passed, 1 expected failures, 0 failed"));
    }
}

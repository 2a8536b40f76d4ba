//! Checks driven by the opfixture catalog.
//!
//! For every `OpInfo` entry and every selected dtype this crate:
//! - runs the operator on its sample inputs and checks the fake variant
//!   describes the real outputs (`check_fake`)
//! - compares the registered backward against central finite differences
//!   (`gradcheck`)
//! - collects the outcomes into a `CheckReport` (`run_checks`)

pub mod config;
pub mod fake;
pub mod gradcheck;
pub mod runner;

pub use config::CheckConfig;
pub use fake::check_fake;
pub use gradcheck::gradcheck;
pub use runner::{CheckKind, CheckReport, CheckResult, Outcome, check_op, run_checks};

/// Result type for check operations.
pub type Result<T> = std::result::Result<T, CheckError>;

/// Errors raised by the checks.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error(transparent)]
    Op(#[from] opfixture_core::Error),

    /// Fake outputs do not describe the real outputs.
    #[error("fake output {output} mismatch: {message}")]
    FakeMismatch { output: usize, message: String },

    /// Analytical and numerical Jacobian entries disagree.
    #[error(
        "gradient mismatch for input {input} (element {input_element}) w.r.t. output element \
         {output_element}: analytical {analytical}, numerical {numerical}"
    )]
    GradientMismatch {
        input: usize,
        input_element: usize,
        output_element: usize,
        analytical: f64,
        numerical: f64,
    },

    /// Backward produced gradients of the wrong structure.
    #[error("gradcheck: {0}")]
    Gradcheck(String),
}

impl CheckError {
    /// Whether the operator rejected its input as unsupported.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, CheckError::Op(err) if err.is_unsupported())
    }
}

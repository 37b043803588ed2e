//! Engine error types.

use thiserror::Error;

use crate::procedure::ProcedureError;
use crate::store::StoreError;

/// Errors surfaced to callers of the orchestrator and the registry sync.
///
/// Failures local to one test never show up here: they are classified on the unit test record instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unit testing is disabled on this environment")]
    Disabled,

    #[error("cannot start a test run while another test run is still running")]
    RunInProgress,

    #[error("no test suite found for module '{0}'")]
    SuiteNotFound(String),

    #[error(
        "invalid test specification '{0}': native tests should be named either $testClass or $testClass/$testMethod"
    )]
    InvalidTestName(String),

    #[error("no native test runner is configured to run '{0}'")]
    NoNativeRunner(String),

    #[error("setup procedure '{procedure}' failed: {source}")]
    Setup {
        procedure: String,
        #[source]
        source: ProcedureError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

//! Shape checks on procedures before they are run as tests.

use thiserror::Error;

use crate::procedure::{DataType, ProcedureEngine};

/// Why a procedure cannot be run as a test.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("procedure {0} does not exist")]
    UnknownProcedure(String),

    #[error("{procedure} should return either a boolean or a string or nothing at all, found {found}")]
    ReturnType { procedure: String, found: DataType },

    #[error("{procedure}: identified one or more invalid parameter(s)")]
    Parameters { procedure: String },
}

/// Check that `procedure` can run as a test.
///
/// Accepted shapes return a boolean, a string or nothing, and declare no parameters or exactly one test-context
/// parameter. On success, returns the name of the test-context parameter when there is one.
pub fn validate_callable(engine: &dyn ProcedureEngine, procedure: &str) -> Result<Option<String>, ValidationError> {
    let unknown = || ValidationError::UnknownProcedure(procedure.to_string());
    let return_type = engine.return_type(procedure).ok_or_else(unknown)?;
    let parameters = engine.parameters(procedure).ok_or_else(unknown)?;

    if !matches!(return_type, DataType::Boolean | DataType::String | DataType::Nothing) {
        let error = ValidationError::ReturnType { procedure: procedure.to_string(), found: return_type };
        tracing::warn!("Invalid test procedure: {}", error);
        return Err(error);
    }

    match parameters.as_slice() {
        [] => Ok(None),
        [parameter] if parameter.data_type.is_test_context() => {
            tracing::trace!(procedure, "identified parameter for unit test context");
            Ok(Some(parameter.name.clone()))
        }
        _ => {
            let error = ValidationError::Parameters { procedure: procedure.to_string() };
            tracing::warn!("Invalid test procedure: {}", error);
            Err(error)
        }
    }
}

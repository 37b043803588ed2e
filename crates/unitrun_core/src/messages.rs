//! Canonical user-facing messages written to unit test records.

pub const REASON_START_FAILED: &str = "Failed to start test";
pub const REASON_ASSERTION_FAILED: &str = "One or more assertions failed";
pub const REASON_RETURN_VALUE: &str = "Procedure return value is incorrect";
pub const REASON_UNCAUGHT_EXCEPTION: &str = "An uncaught exception occurred";

pub const PROCEDURE_COMPLETED: &str = "Procedure completed successfully";
/// Failed without a collected reason, e.g. an assertion signal raised outside `assert`.
pub const PROCEDURE_FAILED: &str = "Procedure did not complete successfully";
pub const PROCEDURE_RETURNED_FALSE: &str = "Procedure returned false";
pub const PROCEDURE_RETURNED_UNEXPECTED: &str = "Procedure returned an unexpected value";

pub const NATIVE_COMPLETED: &str = "Native test completed successfully";

/// Message recorded on the End activity when a procedure returns a non-empty string.
pub fn procedure_returned_string(value: &str) -> String {
    format!("Procedure returned string: {value}")
}

/// Message recorded on the Start activity when validation rejects a procedure.
pub fn unable_to_start(reason: &str) -> String {
    format!("Unable to start test, invalid procedure: {reason}")
}

/// Result message of a test that failed because its transaction could not be handled.
pub fn test_aborted(reason: &str) -> String {
    format!("Unable to complete test: {reason}")
}

/// Step reported when the native runner starts a test method.
pub fn native_starting(class_name: &str, method: &str) -> String {
    format!("Starting native test {class_name}.{method}")
}

/// Result message of a failed native test; `location` is `file line N`.
pub fn native_failed(location: &str, message: Option<&str>) -> String {
    match message {
        Some(message) => format!("Native test failed at {location}: {message}"),
        None => format!("Native test failed at {location}"),
    }
}

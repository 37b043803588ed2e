//! Execution context of one running procedure test.
//!
//! The context owns the test's [`ActivityLog`]. Procedures (through the host engine) report assertions and steps
//! into it, the orchestrator records start, end and exception activities, and the failure classification of the
//! unit test is derived from the log alone.

use unitrun_core::messages::{
    PROCEDURE_COMPLETED, REASON_ASSERTION_FAILED, REASON_RETURN_VALUE, REASON_START_FAILED,
    REASON_UNCAUGHT_EXCEPTION,
};
use unitrun_core::{ActivityKind, ActivityRecord, UnitTestId};

use crate::activity::{Activity, ActivityLog};
use crate::procedure::ProcedureError;

/// Evidence collected while one unit test runs.
#[derive(Debug)]
pub struct ExecutionContext {
    test_name: String,
    log: ActivityLog,
}

impl ExecutionContext {
    pub fn new(test_name: impl Into<String>) -> Self {
        Self { test_name: test_name.into(), log: ActivityLog::new() }
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn log(&self) -> &ActivityLog {
        &self.log
    }

    pub fn collect_start(&mut self, result: bool, message: Option<String>) {
        self.log.start(result, message);
    }

    pub fn collect_end(&mut self, result: bool, message: Option<String>) {
        self.log.end(result, message);
    }

    pub fn collect_exception(&mut self, error: &ProcedureError) {
        self.log.exception(error);
    }

    pub fn collect_assertion(
        &mut self,
        name: impl Into<String>,
        result: bool,
        failure_message: Option<String>,
    ) -> &Activity {
        self.log.assertion(name, result, failure_message)
    }

    /// Collect an assertion and turn a failure into the assertion-failure signal.
    ///
    /// Procedures use this when a failed assertion should stop them; the signal is not recorded as an exception.
    pub fn assert(&mut self, name: &str, result: bool, failure_message: &str) -> Result<(), ProcedureError> {
        self.log.assertion(name, result, Some(failure_message.to_string()));
        if result { Ok(()) } else { Err(ProcedureError::assertion(format!("{name}: {failure_message}"))) }
    }

    pub fn collect_step(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(test = %self.test_name, "Report step: {}", message);
        self.log.step(message);
    }

    pub fn last_step(&self) -> Option<&str> {
        self.log.last_step()
    }

    pub fn has_failed_assertion(&self) -> bool {
        self.log.has_failed_assertion()
    }

    /// Reasons this execution failed, one per category, in a fixed order.
    pub fn failure_reasons(&self) -> Vec<&'static str> {
        let mut reasons = Vec::new();

        if matches!(self.log.start_activity(), Some(Activity { kind: ActivityKind::Start { result: false, .. }, .. })) {
            reasons.push(REASON_START_FAILED);
        }
        if self.has_failed_assertion() {
            reasons.push(REASON_ASSERTION_FAILED);
        }
        if matches!(self.log.end_activity(), Some(Activity { kind: ActivityKind::End { result: false, .. }, .. })) {
            reasons.push(REASON_RETURN_VALUE);
        }
        if self.log.exception_activity().is_some() {
            reasons.push(REASON_UNCAUGHT_EXCEPTION);
        }

        reasons
    }

    /// Result message stored on the unit test.
    pub fn result_summary(&self) -> String {
        let reasons = self.failure_reasons();
        if reasons.is_empty() { PROCEDURE_COMPLETED.to_string() } else { reasons.join("\n") }
    }

    /// Activity records to persist for `unit_test`.
    pub fn activity_records(&self, unit_test: UnitTestId) -> Vec<ActivityRecord> {
        self.log.to_records(unit_test)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn context() -> ExecutionContext {
        ExecutionContext::new("Orders.Test_Checkout")
    }

    #[test]
    fn test_no_failed_assertion_by_default() {
        assert!(!context().has_failed_assertion());
    }

    #[test]
    fn test_passed_assertions_are_not_failures() {
        let mut ctx = context();
        ctx.collect_assertion("Passed 1", true, None);
        ctx.collect_assertion("Passed 2", true, None);
        assert!(!ctx.has_failed_assertion());
    }

    #[test]
    fn test_failed_assertion_detected() {
        let mut ctx = context();
        ctx.collect_assertion("Passed", true, None);
        ctx.collect_assertion("Failed", false, None);
        assert!(ctx.has_failed_assertion());
    }

    #[test]
    fn test_last_step() {
        let mut ctx = context();
        assert_eq!(ctx.last_step(), None);
        ctx.collect_step("Step 1");
        ctx.collect_step("Step 2");
        assert_eq!(ctx.last_step(), Some("Step 2"));
    }

    #[test]
    fn test_no_failure_reasons_by_default() {
        assert!(context().failure_reasons().is_empty());
    }

    #[test]
    fn test_no_failure_reasons_when_passed() {
        let mut ctx = context();
        ctx.collect_start(true, None);
        ctx.collect_assertion("Passed 1", true, None);
        ctx.collect_end(true, None);
        assert!(ctx.failure_reasons().is_empty());
        assert_eq!(ctx.result_summary(), "Procedure completed successfully");
    }

    #[test]
    fn test_failed_start_is_a_reason() {
        let mut ctx = context();
        ctx.collect_start(false, Some("Start failed".to_string()));
        assert_eq!(ctx.failure_reasons(), vec![REASON_START_FAILED]);
    }

    #[test]
    fn test_failed_end_is_a_reason() {
        let mut ctx = context();
        ctx.collect_end(false, Some("End failed".to_string()));
        assert_eq!(ctx.failure_reasons(), vec![REASON_RETURN_VALUE]);
    }

    #[test]
    fn test_multiple_failed_assertions_collapse() {
        let mut ctx = context();
        ctx.collect_assertion("Passed", true, None);
        ctx.collect_assertion("Failed 1", false, None);
        ctx.collect_assertion("Failed 2", false, None);
        assert_eq!(ctx.failure_reasons(), vec![REASON_ASSERTION_FAILED]);
    }

    #[test]
    fn test_uncaught_exception_is_a_reason() {
        let mut ctx = context();
        ctx.collect_exception(&ProcedureError::new("Example Exception"));
        assert_eq!(ctx.failure_reasons(), vec![REASON_UNCAUGHT_EXCEPTION]);
    }

    #[test]
    fn test_all_unique_reasons() {
        let mut ctx = context();
        ctx.collect_start(false, Some("Start failed".to_string()));
        ctx.collect_assertion("Failed 1", false, None);
        ctx.collect_assertion("Failed 2", false, None);
        ctx.collect_exception(&ProcedureError::new("Test Exception"));
        ctx.collect_end(false, Some("End failed".to_string()));

        assert_eq!(ctx.failure_reasons().len(), 4);
        insta::assert_snapshot!(ctx.result_summary(), @r"
        Failed to start test
        One or more assertions failed
        Procedure return value is incorrect
        An uncaught exception occurred
        ");
    }

    #[test]
    fn test_records_contain_all_collected_activities() {
        let mut ctx = context();
        ctx.collect_start(true, Some("Started test".to_string()));
        ctx.collect_assertion("Passed", true, None);
        ctx.collect_assertion("Failed 1", false, None);
        ctx.collect_assertion("Failed 2", false, None);
        ctx.collect_step("Step 1");
        ctx.collect_step("Step 2");
        ctx.collect_exception(&ProcedureError::new("Example Exception"));
        ctx.collect_end(true, Some("Test ended successfully".to_string()));

        let records = ctx.activity_records(UnitTestId(1));
        assert_eq!(records.len(), 8);
        let sequences: Vec<u32> = records.iter().map(|record| record.sequence).collect();
        assert_eq!(sequences, (0..8).collect::<Vec<u32>>());
    }

    #[test]
    fn test_assert_raises_signal_on_failure() {
        let mut ctx = context();
        assert!(ctx.assert("stock", true, "no stock").is_ok());
        let error = ctx.assert("total", false, "expected 3").unwrap_err();
        assert!(error.is_assertion());
        assert!(ctx.has_failed_assertion());
    }
}

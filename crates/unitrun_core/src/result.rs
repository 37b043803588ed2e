//! Result of a unit test or a test suite.

use std::fmt;

/// Outcome recorded on unit tests and suites.
///
/// The absence of a result (`None` on the record) means "not run" for a unit test and "empty" for a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitTestResult {
    Running,
    Failed,
    Success,
}

impl UnitTestResult {
    /// Map a pass/fail classification onto a terminal result.
    pub fn from_passed(passed: bool) -> Self {
        if passed { Self::Success } else { Self::Failed }
    }

    /// A test is pending while it has no result yet or is still running.
    pub fn is_pending(result: Option<Self>) -> bool {
        matches!(result, None | Some(Self::Running))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Success => "success",
        }
    }
}

impl fmt::Display for UnitTestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

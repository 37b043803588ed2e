//! Persisted entities: test suites, unit tests and their activity records.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::result::UnitTestResult;
use crate::{DEFAULT_PREFIX_1, DEFAULT_PREFIX_2, display_name};

/// Store-assigned identifier of a [`TestSuite`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SuiteId(pub u64);

/// Store-assigned identifier of a [`UnitTest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitTestId(pub u64);

impl fmt::Display for SuiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "suite#{}", self.0)
    }
}

impl fmt::Display for UnitTestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unittest#{}", self.0)
    }
}

/// The tests of one module, with their aggregated outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct TestSuite {
    /// `None` until the suite is first saved
    pub id: Option<SuiteId>,
    pub module: String,
    pub prefix1: String,
    pub prefix2: String,
    pub has_setup: bool,
    pub has_teardown: bool,
    /// Roll back each test transaction (and the setup/teardown one) instead of committing it
    pub auto_rollback: bool,
    pub test_count: u64,
    pub passed_count: u64,
    pub failed_count: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_run_duration_secs: u64,
    /// `None` is the empty result
    pub result: Option<UnitTestResult>,
}

impl TestSuite {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            id: None,
            module: module.into(),
            prefix1: DEFAULT_PREFIX_1.to_string(),
            prefix2: DEFAULT_PREFIX_2.to_string(),
            has_setup: false,
            has_teardown: false,
            auto_rollback: false,
            test_count: 0,
            passed_count: 0,
            failed_count: 0,
            last_run: None,
            last_run_duration_secs: 0,
            result: None,
        }
    }

    pub fn with_prefixes(mut self, prefix1: impl Into<String>, prefix2: impl Into<String>) -> Self {
        self.prefix1 = prefix1.into();
        self.prefix2 = prefix2.into();
        self
    }

    pub fn with_auto_rollback(mut self, auto_rollback: bool) -> Self {
        self.auto_rollback = auto_rollback;
        self
    }
}

/// Reconciliation state of a unit test during a registry sync.
///
/// Every test of a suite is marked [`SyncMark::Unseen`] when a sync starts and re-marked with the source that
/// confirmed it. Tests still unseen when the sync completes are no longer discoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncMark {
    Unseen,
    SeenProcedure,
    SeenNative,
}

impl SyncMark {
    pub fn seen(is_procedure_based: bool) -> Self {
        if is_procedure_based { Self::SeenProcedure } else { Self::SeenNative }
    }
}

/// A single discoverable test of a suite.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitTest {
    pub id: Option<UnitTestId>,
    pub suite: SuiteId,
    /// Module-qualified procedure name, or `namespace.Class/method` for native tests
    pub name: String,
    pub display_name: String,
    pub is_procedure_based: bool,
    /// `None` means the test has not run
    pub result: Option<UnitTestResult>,
    pub result_message: String,
    pub last_run: Option<DateTime<Utc>>,
    pub last_step: Option<String>,
    pub readable_duration: Option<String>,
    pub stack_trace: Option<String>,
    pub sync_mark: SyncMark,
}

impl UnitTest {
    pub fn new(suite: &TestSuite, suite_id: SuiteId, name: impl Into<String>, is_procedure_based: bool) -> Self {
        let name = name.into();
        let display = display_name(&suite.module, &name).to_string();
        Self {
            id: None,
            suite: suite_id,
            name,
            display_name: display,
            is_procedure_based,
            result: None,
            result_message: String::new(),
            last_run: None,
            last_step: None,
            readable_duration: None,
            stack_trace: None,
            sync_mark: SyncMark::seen(is_procedure_based),
        }
    }

    /// Clear the outcome of a previous run and mark the test as running.
    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.result = Some(UnitTestResult::Running);
        self.result_message.clear();
        self.stack_trace = None;
        self.last_run = Some(now);
    }
}

/// Variant payload of a persisted activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityKind {
    Start { result: bool, message: Option<String> },
    End { result: bool, message: Option<String> },
    Assertion { name: String, result: bool, message: Option<String> },
    Step { message: String },
    Exception { message: String, stack_trace: String },
}

impl ActivityKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::End { .. } => "end",
            Self::Assertion { .. } => "assertion",
            Self::Step { .. } => "step",
            Self::Exception { .. } => "exception",
        }
    }
}

/// Evidence of one test execution, tagged to its unit test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityRecord {
    pub unit_test: UnitTestId,
    pub sequence: u32,
    pub kind: ActivityKind,
}

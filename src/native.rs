//! Native test runner boundary.
//!
//! Natively-coded tests are executed by a host-provided [`NativeTestRunner`], which reports progress through a
//! synchronous [`RunListener`]. During a suite run the [`SuiteRunListener`] turns those callbacks into unit test
//! records and suite counters.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use unitrun_core::messages::{NATIVE_COMPLETED, native_failed, native_starting};
use unitrun_core::{TestSuite, UnitTest, UnitTestResult, readable_duration};

use crate::discovery::TestKind;
use crate::store::{ObjectStore, StoreError, StoreResult};
use crate::sync::find_or_create_unit_test;

/// Trace frames of the runner itself, skipped when locating a failure.
const RUNNER_FRAME_PREFIX: &str = "at unitrun::native";

/// A native test selection: a whole class or one of its methods.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NativeTestId {
    /// Namespace-qualified class name (`orders.CheckoutTest`)
    pub class_name: String,
    pub method: Option<String>,
}

impl NativeTestId {
    pub fn class(class_name: impl Into<String>) -> Self {
        Self { class_name: class_name.into(), method: None }
    }

    pub fn method(class_name: impl Into<String>, method: impl Into<String>) -> Self {
        Self { class_name: class_name.into(), method: Some(method.into()) }
    }

    /// Parse `Class` or `Class/method`.
    pub fn parse(selection: &str) -> Option<Self> {
        let mut parts = selection.split('/');
        let class_name = parts.next().filter(|class_name| !class_name.is_empty())?;
        match (parts.next(), parts.next()) {
            (None, _) => Some(Self::class(class_name)),
            (Some(method), None) if !method.is_empty() => Some(Self::method(class_name, method)),
            _ => None,
        }
    }
}

impl fmt::Display for NativeTestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.method {
            Some(method) => write!(f, "{}/{}", self.class_name, method),
            None => f.write_str(&self.class_name),
        }
    }
}

/// A failed native test as reported by the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeFailure {
    pub test: NativeTestId,
    pub message: Option<String>,
    /// Rendered trace, one `at <frame> (<file>:<line>)` line per frame after the headline
    pub trace: String,
    /// Time spent inside the test, when the runner measured it
    pub elapsed: Option<Duration>,
}

/// Receives progress of a native run. Callbacks must not fail: implementations log their own errors.
pub trait RunListener {
    fn run_started(&mut self) {}

    fn run_finished(&mut self) {}

    /// A test reported a step of its own.
    fn step_reported(&mut self, message: &str);

    fn test_started(&mut self, test: &NativeTestId);

    /// Always called once a started test ends, also after [`RunListener::test_failed`].
    fn test_finished(&mut self, test: &NativeTestId, elapsed: Option<Duration>);

    fn test_failed(&mut self, failure: &NativeFailure);
}

/// Host runner of natively-coded tests.
pub trait NativeTestRunner: Send + Sync {
    /// Run `selection`, reporting every test method through `listener` before returning.
    fn run(&self, selection: &[NativeTestId], listener: &mut dyn RunListener);
}

/// Location of a failure: the first frame outside the runner, rendered `file line N`.
pub fn failure_location(trace: &str) -> String {
    let lines: Vec<&str> = trace.lines().collect();
    if lines.len() <= 2 {
        return String::new();
    }

    lines
        .iter()
        .skip(1)
        .map(|line| line.trim())
        .filter(|line| !line.starts_with(RUNNER_FRAME_PREFIX))
        .find_map(|line| {
            let open = line.find('(')?;
            let close = open + line[open..].find(')')?;
            Some(render_location(&line[open + 1..close]))
        })
        .unwrap_or_default()
}

fn render_location(location: &str) -> String {
    match location.split_once(':') {
        Some((file, rest)) => {
            let line = rest.split(':').next().unwrap_or(rest);
            format!("{file} line {line}")
        }
        None => location.to_string(),
    }
}

/// Records the native tests of one suite run.
///
/// The listener borrows the suite for the run and updates its pass/fail counters as tests end. It also carries
/// the last reported step, handed in by the orchestrator and taken back with [`SuiteRunListener::into_last_step`].
pub struct SuiteRunListener<'a> {
    store: &'a dyn ObjectStore,
    suite: &'a mut TestSuite,
    last_step: Option<String>,
}

impl<'a> SuiteRunListener<'a> {
    pub fn new(store: &'a dyn ObjectStore, suite: &'a mut TestSuite, last_step: Option<String>) -> Self {
        Self { store, suite, last_step }
    }

    pub fn last_step(&self) -> Option<&str> {
        self.last_step.as_deref()
    }

    pub fn into_last_step(self) -> Option<String> {
        self.last_step
    }

    fn unit_test(&self, test: &NativeTestId) -> StoreResult<UnitTest> {
        let suite_id = self.suite.id.ok_or(StoreError::UnsavedSuite)?;
        let (unit_test, _) =
            find_or_create_unit_test(self.store, &*self.suite, suite_id, &test.to_string(), TestKind::Native)?;
        Ok(unit_test)
    }

    fn record_started(&mut self, test: &NativeTestId) -> StoreResult<()> {
        let message = native_starting(&test.class_name, test.method.as_deref().unwrap_or_default());
        tracing::info!("{}", message);
        self.step_reported(&message);

        let mut unit_test = self.unit_test(test)?;
        unit_test.mark_running(Utc::now());
        self.store.save_unit_test(&mut unit_test)
    }

    fn record_finished(&mut self, test: &NativeTestId, elapsed: Option<Duration>) -> StoreResult<()> {
        tracing::info!(test = %test, "Finished native test");
        let mut unit_test = self.unit_test(test)?;

        if unit_test.result == Some(UnitTestResult::Running) {
            unit_test.result = Some(UnitTestResult::Success);
            unit_test.result_message = NATIVE_COMPLETED.to_string();
            unit_test.readable_duration = Some(readable_duration(elapsed_since_start(&unit_test, elapsed)));

            self.suite.passed_count += 1;
            self.store.save_suite(self.suite)?;
        }

        unit_test.last_step = self.last_step.clone();
        self.store.save_unit_test(&mut unit_test)
    }

    fn record_failed(&mut self, failure: &NativeFailure) -> StoreResult<()> {
        tracing::error!(
            test = %failure.test,
            step = self.last_step.as_deref().unwrap_or_default(),
            "Failed native test: {}",
            failure.message.as_deref().unwrap_or_default()
        );

        self.suite.failed_count += 1;
        self.store.save_suite(self.suite)?;

        let mut unit_test = self.unit_test(&failure.test)?;
        unit_test.result = Some(UnitTestResult::Failed);
        unit_test.result_message = native_failed(&failure_location(&failure.trace), failure.message.as_deref());
        unit_test.stack_trace = Some(failure.trace.clone());
        unit_test.readable_duration = Some(readable_duration(elapsed_since_start(&unit_test, failure.elapsed)));
        unit_test.last_step = self.last_step.clone();
        unit_test.last_run = Some(Utc::now());
        self.store.save_unit_test(&mut unit_test)
    }
}

/// Runner-measured time, or the time since the unit test was marked running.
fn elapsed_since_start(unit_test: &UnitTest, elapsed: Option<Duration>) -> Duration {
    elapsed
        .or_else(|| unit_test.last_run.and_then(|started| (Utc::now() - started).to_std().ok()))
        .unwrap_or_default()
}

impl RunListener for SuiteRunListener<'_> {
    fn run_started(&mut self) {
        tracing::info!(module = %self.suite.module, "Starting native test run");
    }

    fn run_finished(&mut self) {
        tracing::info!(module = %self.suite.module, "Native test run finished");
    }

    fn step_reported(&mut self, message: &str) {
        tracing::debug!("Report step: {}", message);
        self.last_step = Some(message.to_string());
    }

    fn test_started(&mut self, test: &NativeTestId) {
        if let Err(error) = self.record_started(test) {
            tracing::error!(test = %test, "Unable to record native test start: {}", error);
        }
    }

    fn test_finished(&mut self, test: &NativeTestId, elapsed: Option<Duration>) {
        if let Err(error) = self.record_finished(test, elapsed) {
            tracing::error!(test = %test, "Unable to record native test completion: {}", error);
        }
    }

    fn test_failed(&mut self, failure: &NativeFailure) {
        if let Err(error) = self.record_failed(failure) {
            tracing::error!(test = %failure.test, "Unable to record native test failure: {}", error);
        }
    }
}

//! Test run orchestration.
//!
//! [`TestManager`] runs single unit tests, suites and all suites. Procedure tests follow a fixed lifecycle:
//!
//! 1. The unit test is marked running and saved, so observers see progress.
//! 2. The test runs in its own transaction, nested in the open setup transaction when the module has a Setup.
//! 3. Start, end, assertion, step and exception evidence is collected in an [`ExecutionContext`].
//! 4. The test transaction is rolled back or committed per the suite's `auto_rollback`.
//! 5. Result, summary, duration, last step and activities are persisted.
//!
//! Runs are mutually exclusive: a second run attempted while one is in progress fails immediately with
//! [`EngineError::RunInProgress`].

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Instant;

use chrono::Utc;
use unitrun_core::messages::{
    PROCEDURE_FAILED, PROCEDURE_RETURNED_FALSE, PROCEDURE_RETURNED_UNEXPECTED, procedure_returned_string,
    test_aborted, unable_to_start,
};
use unitrun_core::{
    SETUP_PROCEDURE, TEARDOWN_PROCEDURE, TestSuite, UnitTest, UnitTestResult, qualified_name, readable_duration,
};

use crate::aggregate;
use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::discovery::{ClassCache, CodeIndex, Discovery, JsonCodeIndex, NativeTestSource, TestKind};
use crate::error::{EngineError, EngineResult};
use crate::model_watch::ModelUpdateWatcher;
use crate::native::{NativeTestId, NativeTestRunner, SuiteRunListener};
use crate::procedure::{ContextArgument, Invocation, ProcedureEngine, Value};
use crate::store::{ObjectStore, StoreError, Transaction, UnitTestQuery};
use crate::sync::{DiscoveryReport, RegistrySync, find_or_create_unit_test};
use crate::validation::validate_callable;

/// Runs unit tests and keeps their records up to date.
pub struct TestManager {
    config: EngineConfig,
    store: Arc<dyn ObjectStore>,
    engine: Arc<dyn ProcedureEngine>,
    runner: Option<Arc<dyn NativeTestRunner>>,
    discovery: Arc<Discovery>,
    registry: RegistrySync,
    class_cache: Arc<ClassCache>,
    watcher: Arc<ModelUpdateWatcher>,
    run_lock: Mutex<()>,
    last_step: Mutex<Option<String>>,
}

impl TestManager {
    /// A manager for procedure tests only.
    pub fn new(config: EngineConfig, store: Arc<dyn ObjectStore>, engine: Arc<dyn ProcedureEngine>) -> Self {
        let class_cache = Arc::new(ClassCache::new());
        let watcher = Arc::new(ModelUpdateWatcher::new(Arc::clone(&class_cache)));
        let discovery = Arc::new(Discovery::new(Arc::clone(&engine)));
        let registry = RegistrySync::new(Arc::clone(&store), Arc::clone(&discovery), config.find_native_tests);

        Self {
            config,
            store,
            engine,
            runner: None,
            discovery,
            registry,
            class_cache,
            watcher,
            run_lock: Mutex::new(()),
            last_step: Mutex::new(None),
        }
    }

    /// Discover native tests through `index` and run them with `runner`.
    pub fn with_native_tests(mut self, index: Arc<dyn CodeIndex>, runner: Arc<dyn NativeTestRunner>) -> Self {
        let source = NativeTestSource::new(index, Arc::clone(&self.class_cache));
        let discovery = Arc::new(Discovery::new(Arc::clone(&self.engine)).with_source(source));
        self.registry =
            RegistrySync::new(Arc::clone(&self.store), Arc::clone(&discovery), self.config.find_native_tests);
        self.discovery = discovery;
        self.runner = Some(runner);
        self
    }

    /// Run native tests with `runner`, discovering them in the configured JSON code index.
    pub fn with_native_runner(self, runner: Arc<dyn NativeTestRunner>) -> Self {
        match self.config.code_index_path.clone() {
            Some(path) => self.with_native_tests(Arc::new(JsonCodeIndex::new(path)), runner),
            None => {
                tracing::warn!("No code index configured, native tests will not be discovered");
                self
            }
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn class_cache(&self) -> &Arc<ClassCache> {
        &self.class_cache
    }

    pub fn watcher(&self) -> &Arc<ModelUpdateWatcher> {
        &self.watcher
    }

    /// Whether a run or discovery currently holds the run lock.
    pub fn is_running(&self) -> bool {
        matches!(self.run_lock.try_lock(), Err(TryLockError::WouldBlock))
    }

    /// Last step reported by a native test. Informational only.
    pub fn last_reported_step(&self) -> Option<String> {
        self.last_step_slot().clone()
    }

    fn last_step_slot(&self) -> MutexGuard<'_, Option<String>> {
        self.last_step.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check enablement and take the run lock without waiting.
    fn acquire(&self) -> EngineResult<MutexGuard<'_, ()>> {
        if !self.config.is_enabled() {
            tracing::warn!("Unit testing is disabled on this environment");
            return Err(EngineError::Disabled);
        }
        match self.run_lock.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => {
                tracing::warn!("Cannot start a test run while another test run is still running");
                Err(EngineError::RunInProgress)
            }
        }
    }

    // ============================================================================
    // Discovery
    // ============================================================================

    /// Sync every module's suite with the current code base and drop suites without tests.
    pub fn find_all_tests(&self) -> EngineResult<DiscoveryReport> {
        let _guard = self.acquire()?;
        let report = self.registry.find_all_tests()?;
        self.watcher.set_refresh_required(false);
        Ok(report)
    }

    pub fn find_suite(&self, module: &str) -> EngineResult<Option<TestSuite>> {
        Ok(self.registry.find_suite(module)?)
    }

    fn suite_of(&self, test: &UnitTest) -> EngineResult<TestSuite> {
        self.store
            .suites()?
            .into_iter()
            .find(|suite| suite.id == Some(test.suite))
            .ok_or(EngineError::Store(StoreError::SuiteNotFound(test.suite)))
    }

    // ============================================================================
    // Single test
    // ============================================================================

    /// Run one unit test, with the module's Setup and TearDown around procedure tests.
    pub fn run_one(&self, test: &UnitTest) -> EngineResult<()> {
        let _guard = self.acquire()?;
        let mut suite = self.suite_of(test)?;

        if test.is_procedure_based {
            let mut test = test.clone();
            let setup_tx = self.begin_setup(&suite)?;
            let outcome = match &setup_tx {
                Some(tx) => self.run_setup(&suite, tx),
                None => Ok(()),
            }
            .and_then(|()| self.run_procedure_test(&suite, &mut test, setup_tx.as_ref()).map(|_| ()));
            self.run_teardown(&suite, setup_tx);
            if let Err(error) = outcome {
                aggregate::recompute_and_save(self.store.as_ref(), &mut suite)?;
                return Err(error);
            }
        } else {
            let selection =
                NativeTestId::parse(&test.name).ok_or_else(|| EngineError::InvalidTestName(test.name.clone()))?;
            let runner = self.runner.as_ref().ok_or_else(|| EngineError::NoNativeRunner(test.name.clone()))?;
            self.run_native(runner.as_ref(), &mut suite, &[selection]);
        }

        aggregate::recompute_and_save(self.store.as_ref(), &mut suite)?;
        Ok(())
    }

    /// Run one procedure test and persist its outcome. Returns whether it passed.
    ///
    /// Test failures are recorded on the unit test. Only infrastructure errors are returned, after the unit test
    /// was saved as failed where the store still allowed it.
    pub fn run_procedure_test(
        &self,
        suite: &TestSuite,
        test: &mut UnitTest,
        setup_tx: Option<&Transaction>,
    ) -> EngineResult<bool> {
        tracing::info!("Starting unit test for procedure {}", test.name);

        test.mark_running(Utc::now());
        self.store.save_unit_test(test)?;
        let id = test.id.ok_or(StoreError::UnsavedUnitTest)?;

        let mut context = ExecutionContext::new(test.name.clone());
        let started = Instant::now();
        let outcome = self.execute_in_transaction(suite, test, &mut context, setup_tx);
        let elapsed = started.elapsed();

        let passed = matches!(outcome, Ok(true));
        test.result = Some(UnitTestResult::from_passed(passed));
        test.result_message = match &outcome {
            Err(error) => test_aborted(&error.to_string()),
            Ok(false) if context.failure_reasons().is_empty() => PROCEDURE_FAILED.to_string(),
            Ok(_) => context.result_summary(),
        };
        test.readable_duration = Some(readable_duration(elapsed));
        test.last_step = context.last_step().map(str::to_string);

        let persisted = self
            .store
            .replace_activities(id, context.activity_records(id))
            .and_then(|()| self.store.save_unit_test(test));

        tracing::info!("Finished unit test {}: {}", test.name, test.result.map_or("", UnitTestResult::as_str));

        match (outcome, persisted) {
            (Err(error), persisted) => {
                if let Err(store_error) = persisted {
                    tracing::error!("Unable to save failed unit test {}: {}", test.name, store_error);
                }
                Err(error)
            }
            (Ok(_), Err(store_error)) => Err(store_error.into()),
            (Ok(_), Ok(())) => Ok(passed),
        }
    }

    fn execute_in_transaction(
        &self,
        suite: &TestSuite,
        test: &mut UnitTest,
        context: &mut ExecutionContext,
        setup_tx: Option<&Transaction>,
    ) -> EngineResult<bool> {
        let tx = self.store.begin(setup_tx)?;
        tracing::trace!("Start transaction for unit test");

        let passed = self.invoke_test(test, context, &tx);

        if suite.auto_rollback {
            tracing::trace!("Rollback transaction for unit test");
            self.store.rollback(tx)?;
        } else {
            tracing::trace!("End transaction for unit test");
            self.store.commit(tx)?;
        }
        Ok(passed)
    }

    fn invoke_test(&self, test: &mut UnitTest, context: &mut ExecutionContext, tx: &Transaction) -> bool {
        let argument = match validate_callable(self.engine.as_ref(), &test.name) {
            Ok(parameter) => {
                parameter.map(|parameter| ContextArgument { parameter, test_name: test.name.clone() })
            }
            Err(error) => {
                context.collect_start(false, Some(unable_to_start(&error.to_string())));
                return false;
            }
        };

        context.collect_start(true, None);
        let invocation =
            Invocation { procedure: &test.name, transaction: tx, argument, context: Some(&mut *context) };

        match self.engine.invoke(invocation) {
            Ok(value) => {
                let (returned_ok, message) = classify_return(&value);
                context.collect_end(returned_ok, message);
                returned_ok && !context.has_failed_assertion()
            }
            Err(error) => {
                if !error.is_assertion() {
                    test.stack_trace = Some(error.full_trace());
                    context.collect_exception(&error);
                }
                false
            }
        }
    }

    // ============================================================================
    // Suites
    // ============================================================================

    /// Run every test of the suite of `module`.
    pub fn run_suite(&self, module: &str) -> EngineResult<()> {
        let _guard = self.acquire()?;
        let suite =
            self.registry.find_suite(module)?.ok_or_else(|| EngineError::SuiteNotFound(module.to_string()))?;
        self.run_suite_locked(suite)
    }

    /// Run every suite, one after the other.
    ///
    /// A Setup failure aborts the whole run once that suite's TearDown ran. Suites not reached yet keep the
    /// cleared result.
    pub fn run_all_suites(&self) -> EngineResult<()> {
        let _guard = self.acquire()?;
        tracing::info!("Starting testrun on all suites");

        let mut suites = self.store.suites()?;
        for suite in &mut suites {
            suite.result = None;
            self.store.save_suite(suite)?;
        }

        for suite in suites {
            if let Err(error) = self.run_suite_locked(suite) {
                tracing::error!("Aborting testrun on all suites: {}", error);
                return Err(error);
            }
        }

        tracing::info!("Finished testrun on all suites");
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(module = %suite.module))]
    fn run_suite_locked(&self, mut suite: TestSuite) -> EngineResult<()> {
        tracing::info!("Starting testrun on {}", suite.module);

        suite.last_run = Some(Utc::now());
        suite.last_run_duration_secs = 0;
        suite.passed_count = 0;
        suite.failed_count = 0;
        suite.result = Some(UnitTestResult::Running);
        self.store.save_suite(&mut suite)?;
        let suite_id = suite.id.ok_or(StoreError::UnsavedSuite)?;

        for mut test in self.store.unit_tests(&UnitTestQuery::in_suite(suite_id))? {
            test.result = None;
            self.store.save_unit_test(&mut test)?;
        }

        let started = Instant::now();

        if let Some(runner) = self.runner.as_ref().filter(|_| self.config.find_native_tests) {
            let selection = native_classes(&self.discovery.native_tests(&suite));
            if !selection.is_empty() {
                self.run_native(runner.as_ref(), &mut suite, &selection);
            }
        }

        let setup_tx = self.begin_setup(&suite)?;
        let outcome = self.run_procedure_tests(&mut suite, setup_tx.as_ref());
        self.run_teardown(&suite, setup_tx);

        if let Err(error) = outcome {
            aggregate::recompute_and_save(self.store.as_ref(), &mut suite)?;
            return Err(error);
        }

        suite.last_run_duration_secs = started.elapsed().as_secs();
        suite.result = Some(if suite.failed_count == 0 { UnitTestResult::Success } else { UnitTestResult::Failed });
        self.store.save_suite(&mut suite)?;

        tracing::info!("Finished testrun on {}", suite.module);
        Ok(())
    }

    fn run_procedure_tests(&self, suite: &mut TestSuite, setup_tx: Option<&Transaction>) -> EngineResult<()> {
        if let Some(tx) = setup_tx {
            self.run_setup(suite, tx)?;
        }

        let suite_id = suite.id.ok_or(StoreError::UnsavedSuite)?;
        for name in self.discovery.procedure_tests(suite) {
            let (mut test, _) =
                find_or_create_unit_test(self.store.as_ref(), suite, suite_id, &name, TestKind::Procedure)?;
            if self.run_procedure_test(suite, &mut test, setup_tx)? {
                suite.passed_count += 1;
            } else {
                suite.failed_count += 1;
            }
            self.store.save_suite(suite)?;
        }
        Ok(())
    }

    fn run_native(&self, runner: &dyn NativeTestRunner, suite: &mut TestSuite, selection: &[NativeTestId]) {
        let last_step = self.last_step_slot().take();
        let mut listener = SuiteRunListener::new(self.store.as_ref(), suite, last_step);
        runner.run(selection, &mut listener);
        *self.last_step_slot() = listener.into_last_step();
    }

    // ============================================================================
    // Setup and teardown
    // ============================================================================

    /// Open the setup transaction when the module has a Setup procedure.
    fn begin_setup(&self, suite: &TestSuite) -> EngineResult<Option<Transaction>> {
        if !self.discovery.has_setup(suite) {
            return Ok(None);
        }
        let tx = self.store.begin(None)?;
        tracing::trace!("Start transaction for setup");
        Ok(Some(tx))
    }

    fn run_setup(&self, suite: &TestSuite, tx: &Transaction) -> EngineResult<()> {
        let procedure = qualified_name(&suite.module, SETUP_PROCEDURE);
        tracing::info!("Running Setup procedure..");

        let invocation = Invocation { procedure: &procedure, transaction: tx, argument: None, context: None };
        match self.engine.invoke(invocation) {
            Ok(_) => Ok(()),
            Err(source) => {
                tracing::error!("Exception during Setup procedure: {}", source.full_trace());
                Err(EngineError::Setup { procedure, source })
            }
        }
    }

    /// Run TearDown in the setup transaction (or a fresh one), then close that transaction.
    ///
    /// Failures are logged and never propagated.
    fn run_teardown(&self, suite: &TestSuite, setup_tx: Option<Transaction>) {
        let mut tx = setup_tx;

        if self.discovery.has_teardown(suite) {
            let procedure = qualified_name(&suite.module, TEARDOWN_PROCEDURE);
            tracing::info!("Running TearDown procedure..");

            if tx.is_none() {
                match self.store.begin(None) {
                    Ok(opened) => {
                        tracing::trace!("Start transaction for teardown");
                        tx = Some(opened);
                    }
                    Err(error) => tracing::error!("Unable to start transaction for teardown: {}", error),
                }
            }

            if let Some(open) = &tx {
                let invocation =
                    Invocation { procedure: &procedure, transaction: open, argument: None, context: None };
                if let Err(error) = self.engine.invoke(invocation) {
                    tracing::error!(
                        "Severe: exception in unittest TearDown procedure '{}': {}",
                        procedure,
                        error.full_trace()
                    );
                }
            }
        }

        if let Some(tx) = tx {
            let closed = if suite.auto_rollback {
                tracing::trace!("Rollback transaction for setup and/or teardown");
                self.store.rollback(tx)
            } else {
                tracing::trace!("End transaction for setup and/or teardown");
                self.store.commit(tx)
            };
            if let Err(error) = closed {
                tracing::error!("Unable to close setup/teardown transaction: {}", error);
            }
        }
    }
}

impl std::fmt::Debug for TestManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestManager")
            .field("config", &self.config)
            .field("discovery", &self.discovery)
            .field("native_runner", &self.runner.is_some())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Pass/fail of a procedure's return value, with the End activity message on failure.
fn classify_return(value: &Value) -> (bool, Option<String>) {
    match value {
        Value::Nothing | Value::Boolean(true) => (true, None),
        Value::String(text) if text.is_empty() => (true, None),
        Value::Boolean(false) => (false, Some(PROCEDURE_RETURNED_FALSE.to_string())),
        Value::String(text) => (false, Some(procedure_returned_string(text))),
        Value::Other(_) => (false, Some(PROCEDURE_RETURNED_UNEXPECTED.to_string())),
    }
}

/// Class-level selections for discovered `Class/method` names, in discovery order.
fn native_classes(names: &[String]) -> Vec<NativeTestId> {
    let mut classes: Vec<NativeTestId> = Vec::new();
    for name in names {
        if let Some(parsed) = NativeTestId::parse(name) {
            let class = NativeTestId::class(parsed.class_name);
            if !classes.contains(&class) {
                classes.push(class);
            }
        }
    }
    classes
}

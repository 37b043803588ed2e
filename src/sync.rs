//! Reconciliation of the persisted unit tests with what discovery currently finds.
//!
//! A sync marks every unit test of a suite [`SyncMark::Unseen`], re-marks the ones a source still reports, and
//! deletes whatever is left unseen. Unit tests are matched on their identity key (suite, name, display name,
//! procedure flag), so an unchanged code base syncs without creating or deleting anything.

use std::collections::BTreeMap;
use std::sync::Arc;

use unitrun_core::{SuiteId, SyncMark, TestSuite, UnitTest, display_name};

use crate::aggregate;
use crate::discovery::{Discovery, TestKind};
use crate::store::{ObjectStore, StoreError, StoreResult, UnitTestQuery};

/// Outcome of syncing one suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    pub created: u64,
    pub confirmed: u64,
    pub deleted: u64,
}

impl SyncReport {
    /// Whether the sync neither created nor deleted unit tests.
    pub fn is_unchanged(&self) -> bool {
        self.created == 0 && self.deleted == 0
    }
}

/// Outcome of a full discovery over every module.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiscoveryReport {
    /// Per-module sync outcome, suites deleted afterwards included
    pub suites: BTreeMap<String, SyncReport>,
    /// Suites deleted because they had no unit tests left
    pub removed_suites: u64,
}

/// Keeps the stored suites and unit tests in line with discovery.
pub struct RegistrySync {
    store: Arc<dyn ObjectStore>,
    discovery: Arc<Discovery>,
    find_native_tests: bool,
}

impl RegistrySync {
    pub fn new(store: Arc<dyn ObjectStore>, discovery: Arc<Discovery>, find_native_tests: bool) -> Self {
        Self { store, discovery, find_native_tests }
    }

    pub fn find_suite(&self, module: &str) -> StoreResult<Option<TestSuite>> {
        self.store.find_suite(module)
    }

    pub fn find_or_create_suite(&self, module: &str) -> StoreResult<TestSuite> {
        if let Some(suite) = self.store.find_suite(module)? {
            return Ok(suite);
        }
        let mut suite = TestSuite::new(module);
        self.store.save_suite(&mut suite)?;
        tracing::debug!(module, "created test suite");
        Ok(suite)
    }

    /// Reconcile the unit tests of `suite` with the current discovery results.
    #[tracing::instrument(skip_all, fields(module = %suite.module))]
    pub fn sync(&self, suite: &mut TestSuite) -> StoreResult<SyncReport> {
        if suite.id.is_none() {
            self.store.save_suite(suite)?;
        }
        let id = suite.id.ok_or(StoreError::UnsavedSuite)?;
        let mut report = SyncReport::default();

        for mut test in self.store.unit_tests(&UnitTestQuery::in_suite(id))? {
            test.sync_mark = SyncMark::Unseen;
            self.store.save_unit_test(&mut test)?;
        }

        let mut kinds = vec![TestKind::Procedure];
        if self.find_native_tests {
            kinds.push(TestKind::Native);
        }

        for kind in kinds {
            for name in self.discovery.discover(suite, kind) {
                let (mut test, created) = find_or_create_unit_test(self.store.as_ref(), suite, id, &name, kind)?;
                test.sync_mark = SyncMark::seen(kind.is_procedure_based());
                self.store.save_unit_test(&mut test)?;
                if created {
                    report.created += 1;
                } else {
                    report.confirmed += 1;
                }
            }
        }

        report.deleted =
            self.store.delete_unit_tests(&UnitTestQuery::in_suite(id).with_sync_mark(SyncMark::Unseen))?;

        let counts = aggregate::recompute(self.store.as_ref(), suite)?;
        aggregate::apply(suite, counts);
        suite.has_setup = self.discovery.has_setup(suite);
        suite.has_teardown = self.discovery.has_teardown(suite);
        self.store.save_suite(suite)?;

        tracing::debug!(
            created = report.created,
            confirmed = report.confirmed,
            deleted = report.deleted,
            "synced suite"
        );
        Ok(report)
    }

    /// Sync a suite for every module with procedures, then drop the suites left without tests.
    #[tracing::instrument(skip_all)]
    pub fn find_all_tests(&self) -> StoreResult<DiscoveryReport> {
        let mut report = DiscoveryReport::default();

        for module in self.discovery.modules() {
            let mut suite = self.find_or_create_suite(&module)?;
            let synced = self.sync(&mut suite)?;
            report.suites.insert(module, synced);
        }

        report.removed_suites = self.delete_empty_suites()?;
        tracing::info!(suites = report.suites.len(), removed = report.removed_suites, "found all tests");
        Ok(report)
    }

    /// Delete every suite without unit tests.
    pub fn delete_empty_suites(&self) -> StoreResult<u64> {
        let mut removed = 0;
        for suite in self.store.suites()? {
            let Some(id) = suite.id else { continue };
            if self.store.count_unit_tests(&UnitTestQuery::in_suite(id))? == 0 {
                self.store.delete_suite(id)?;
                tracing::debug!(module = %suite.module, "removed test suite without tests");
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Look up a unit test by its identity key, or build (unsaved) a new one. Returns whether it was created.
pub(crate) fn find_or_create_unit_test(
    store: &dyn ObjectStore,
    suite: &TestSuite,
    suite_id: SuiteId,
    name: &str,
    kind: TestKind,
) -> StoreResult<(UnitTest, bool)> {
    let is_procedure_based = kind.is_procedure_based();
    let query = UnitTestQuery::identity(suite_id, name, display_name(&suite.module, name), is_procedure_based);

    match store.unit_tests(&query)?.into_iter().next() {
        Some(test) => Ok((test, false)),
        None => Ok((UnitTest::new(suite, suite_id, name, is_procedure_based), true)),
    }
}

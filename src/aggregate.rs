//! Suite counters and result, derived from the unit test records.
//!
//! A suite is `Failed` as soon as one of its tests failed. Otherwise it has no result while it is empty or any
//! test is still pending (not run, or running), and is `Success` once every test passed.

use unitrun_core::{TestSuite, UnitTestResult};

use crate::store::{ObjectStore, ResultFilter, StoreResult, UnitTestQuery};

/// Unit test counts of one suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SuiteCounts {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub pending: u64,
}

impl SuiteCounts {
    /// Suite result for these counts, `None` being the empty result.
    pub fn result(&self) -> Option<UnitTestResult> {
        if self.failed > 0 {
            Some(UnitTestResult::Failed)
        } else if self.pending > 0 || self.total == 0 {
            None
        } else {
            Some(UnitTestResult::Success)
        }
    }
}

/// Count the unit tests of `suite` per result. An unsaved suite has no tests.
pub fn recompute(store: &dyn ObjectStore, suite: &TestSuite) -> StoreResult<SuiteCounts> {
    let Some(id) = suite.id else {
        return Ok(SuiteCounts::default());
    };

    let count = |filter: ResultFilter| store.count_unit_tests(&UnitTestQuery::in_suite(id).with_result(filter));
    let counts = SuiteCounts {
        total: count(ResultFilter::Any)?,
        passed: count(ResultFilter::Is(Some(UnitTestResult::Success)))?,
        failed: count(ResultFilter::Is(Some(UnitTestResult::Failed)))?,
        pending: count(ResultFilter::Pending)?,
    };

    tracing::trace!(
        module = %suite.module,
        total = counts.total,
        passed = counts.passed,
        failed = counts.failed,
        pending = counts.pending,
        "recomputed suite counters"
    );
    Ok(counts)
}

/// Write `counts` onto `suite`, returning whether anything changed.
pub fn apply(suite: &mut TestSuite, counts: SuiteCounts) -> bool {
    let result = counts.result();
    let changed = suite.test_count != counts.total
        || suite.passed_count != counts.passed
        || suite.failed_count != counts.failed
        || suite.result != result;

    suite.test_count = counts.total;
    suite.passed_count = counts.passed;
    suite.failed_count = counts.failed;
    suite.result = result;
    changed
}

/// Recompute the counters of `suite` and save it when they changed.
pub fn recompute_and_save(store: &dyn ObjectStore, suite: &mut TestSuite) -> StoreResult<bool> {
    let counts = recompute(store, suite)?;
    let changed = apply(suite, counts);
    if changed {
        store.save_suite(suite)?;
    }
    Ok(changed)
}

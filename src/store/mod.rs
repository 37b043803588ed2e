//! Object store boundary.
//!
//! The engine persists suites, unit tests and activities through [`ObjectStore`] and scopes test side effects
//! with its transactions. Queries are expressed with [`UnitTestQuery`], a small set of structural predicates
//! (equality on attributes, the suite reference, pending state) that every store can evaluate.
//!
//! [`MemoryStore`] is the in-process implementation.

mod memory;

pub use memory::MemoryStore;

use thiserror::Error;
use unitrun_core::{ActivityRecord, SuiteId, SyncMark, TestSuite, UnitTest, UnitTestId, UnitTestResult};

/// Errors raised by an object store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown transaction {0}")]
    UnknownTransaction(u64),

    #[error("transaction {id} level {level} is not the innermost open level")]
    TransactionOrder { id: u64, level: usize },

    #[error("{0} not found")]
    SuiteNotFound(SuiteId),

    #[error("{0} not found")]
    UnitTestNotFound(UnitTestId),

    #[error("test suite is not saved yet")]
    UnsavedSuite,

    #[error("unit test is not saved yet")]
    UnsavedUnitTest,

    #[error("object store state is poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Handle of one open transaction level.
///
/// Level 0 is a top-level transaction; nested levels are opened inside a parent with
/// [`ObjectStore::begin`] and must be closed innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub(crate) id: u64,
    pub(crate) level: usize,
}

impl Transaction {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn is_nested(&self) -> bool {
        self.level > 0
    }
}

/// Filter on the result attribute of unit tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultFilter {
    #[default]
    Any,
    /// Exact match, `None` selects tests that have not run
    Is(Option<UnitTestResult>),
    /// Not run or running
    Pending,
}

impl ResultFilter {
    pub fn matches(self, result: Option<UnitTestResult>) -> bool {
        match self {
            Self::Any => true,
            Self::Is(expected) => result == expected,
            Self::Pending => UnitTestResult::is_pending(result),
        }
    }
}

/// Structural predicate over unit tests. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitTestQuery {
    pub suite: Option<SuiteId>,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub is_procedure_based: Option<bool>,
    pub result: ResultFilter,
    pub sync_mark: Option<SyncMark>,
}

impl UnitTestQuery {
    pub fn in_suite(suite: SuiteId) -> Self {
        Self { suite: Some(suite), ..Self::default() }
    }

    /// The reconciliation identity key of a unit test.
    pub fn identity(suite: SuiteId, name: &str, display_name: &str, is_procedure_based: bool) -> Self {
        Self {
            suite: Some(suite),
            name: Some(name.to_string()),
            display_name: Some(display_name.to_string()),
            is_procedure_based: Some(is_procedure_based),
            ..Self::default()
        }
    }

    pub fn with_result(mut self, result: ResultFilter) -> Self {
        self.result = result;
        self
    }

    pub fn with_sync_mark(mut self, mark: SyncMark) -> Self {
        self.sync_mark = Some(mark);
        self
    }

    pub fn matches(&self, test: &UnitTest) -> bool {
        self.suite.is_none_or(|suite| test.suite == suite)
            && self.name.as_deref().is_none_or(|name| test.name == name)
            && self.display_name.as_deref().is_none_or(|display| test.display_name == display)
            && self.is_procedure_based.is_none_or(|p| test.is_procedure_based == p)
            && self.result.matches(test.result)
            && self.sync_mark.is_none_or(|mark| test.sync_mark == mark)
    }
}

/// Transactional object store used by the engine.
///
/// Record writes (`save_*`, `delete_*`, `replace_activities`) are applied immediately so that observers see
/// run progress; transactions scope the side effects of the procedures under test.
pub trait ObjectStore: Send + Sync {
    /// Open a top-level transaction, or a nested level inside `parent`.
    fn begin(&self, parent: Option<&Transaction>) -> StoreResult<Transaction>;

    /// Close a transaction level, keeping its writes (folded into the parent level when nested).
    fn commit(&self, tx: Transaction) -> StoreResult<()>;

    /// Close a transaction level, discarding its writes.
    fn rollback(&self, tx: Transaction) -> StoreResult<()>;

    fn suites(&self) -> StoreResult<Vec<TestSuite>>;

    fn find_suite(&self, module: &str) -> StoreResult<Option<TestSuite>>;

    /// Create the suite when it has no id yet, otherwise update it.
    fn save_suite(&self, suite: &mut TestSuite) -> StoreResult<()>;

    /// Delete a suite together with its unit tests and their activities.
    fn delete_suite(&self, id: SuiteId) -> StoreResult<()>;

    /// Unit tests matching `query`, ordered by id.
    fn unit_tests(&self, query: &UnitTestQuery) -> StoreResult<Vec<UnitTest>>;

    fn count_unit_tests(&self, query: &UnitTestQuery) -> StoreResult<u64>;

    /// Create the unit test when it has no id yet, otherwise update it.
    fn save_unit_test(&self, test: &mut UnitTest) -> StoreResult<()>;

    /// Delete matching unit tests and their activities, returning how many were removed.
    fn delete_unit_tests(&self, query: &UnitTestQuery) -> StoreResult<u64>;

    /// Replace every activity of `unit_test` with `activities`.
    fn replace_activities(&self, unit_test: UnitTestId, activities: Vec<ActivityRecord>) -> StoreResult<()>;

    /// Activities of `unit_test`, ordered by sequence.
    fn activities(&self, unit_test: UnitTestId) -> StoreResult<Vec<ActivityRecord>>;
}

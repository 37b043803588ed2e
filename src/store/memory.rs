//! In-memory object store.
//!
//! Records live in ordered maps behind a single mutex. Besides the engine records the store keeps a key/value
//! application data area that procedures write through transactions; each open transaction is a stack of write
//! layers, so nested levels can be committed into their parent or rolled back on their own.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use unitrun_core::{ActivityRecord, SuiteId, TestSuite, UnitTest, UnitTestId};

use super::{ObjectStore, StoreError, StoreResult, Transaction, UnitTestQuery};

/// Pending writes of one transaction level; `None` marks a removal.
type Layer = BTreeMap<String, Option<String>>;

#[derive(Debug, Default)]
struct State {
    next_record_id: u64,
    next_transaction_id: u64,
    suites: BTreeMap<SuiteId, TestSuite>,
    tests: BTreeMap<UnitTestId, UnitTest>,
    activities: BTreeMap<UnitTestId, Vec<ActivityRecord>>,
    data: BTreeMap<String, String>,
    transactions: HashMap<u64, Vec<Layer>>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_record_id += 1;
        self.next_record_id
    }

    fn layers_mut(&mut self, tx: &Transaction) -> StoreResult<&mut Vec<Layer>> {
        let layers = self.transactions.get_mut(&tx.id).ok_or(StoreError::UnknownTransaction(tx.id))?;
        if tx.level >= layers.len() {
            return Err(StoreError::UnknownTransaction(tx.id));
        }
        Ok(layers)
    }

    /// Pop the innermost layer of `tx`, which must be the level the handle refers to.
    fn pop_layer(&mut self, tx: &Transaction) -> StoreResult<Layer> {
        let layers = self.layers_mut(tx)?;
        if tx.level + 1 != layers.len() {
            return Err(StoreError::TransactionOrder { id: tx.id, level: tx.level });
        }
        let layer = layers.pop().unwrap_or_default();
        if layers.is_empty() {
            self.transactions.remove(&tx.id);
        }
        Ok(layer)
    }

    fn remove_unit_test(&mut self, id: UnitTestId) {
        self.tests.remove(&id);
        self.activities.remove(&id);
    }
}

/// Thread-safe in-memory [`ObjectStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Write application data inside an open transaction level.
    pub fn write(&self, tx: &Transaction, key: &str, value: &str) -> StoreResult<()> {
        let mut state = self.state()?;
        let layers = state.layers_mut(tx)?;
        layers[tx.level].insert(key.to_string(), Some(value.to_string()));
        Ok(())
    }

    /// Remove application data inside an open transaction level.
    pub fn remove(&self, tx: &Transaction, key: &str) -> StoreResult<()> {
        let mut state = self.state()?;
        let layers = state.layers_mut(tx)?;
        layers[tx.level].insert(key.to_string(), None);
        Ok(())
    }

    /// Read application data as seen from `tx` (its level and every enclosing level), or the committed value.
    pub fn read(&self, tx: Option<&Transaction>, key: &str) -> StoreResult<Option<String>> {
        let state = self.state()?;
        if let Some(tx) = tx {
            let layers = state.transactions.get(&tx.id).ok_or(StoreError::UnknownTransaction(tx.id))?;
            for layer in layers.iter().take(tx.level + 1).rev() {
                if let Some(value) = layer.get(key) {
                    return Ok(value.clone());
                }
            }
        }
        Ok(state.data.get(key).cloned())
    }

    /// Number of top-level transactions that are still open.
    pub fn open_transactions(&self) -> StoreResult<usize> {
        Ok(self.state()?.transactions.len())
    }
}

impl ObjectStore for MemoryStore {
    fn begin(&self, parent: Option<&Transaction>) -> StoreResult<Transaction> {
        let mut state = self.state()?;
        match parent {
            None => {
                state.next_transaction_id += 1;
                let id = state.next_transaction_id;
                state.transactions.insert(id, vec![Layer::new()]);
                tracing::trace!(transaction = id, "begin transaction");
                Ok(Transaction { id, level: 0 })
            }
            Some(parent) => {
                let layers = state.layers_mut(parent)?;
                if parent.level + 1 != layers.len() {
                    return Err(StoreError::TransactionOrder { id: parent.id, level: parent.level });
                }
                layers.push(Layer::new());
                tracing::trace!(transaction = parent.id, level = parent.level + 1, "begin nested transaction");
                Ok(Transaction { id: parent.id, level: parent.level + 1 })
            }
        }
    }

    fn commit(&self, tx: Transaction) -> StoreResult<()> {
        let mut state = self.state()?;
        let layer = state.pop_layer(&tx)?;
        if tx.level == 0 {
            for (key, value) in layer {
                match value {
                    Some(value) => state.data.insert(key, value),
                    None => state.data.remove(&key),
                };
            }
        } else {
            let parent = Transaction { id: tx.id, level: tx.level - 1 };
            state.layers_mut(&parent)?[parent.level].extend(layer);
        }
        tracing::trace!(transaction = tx.id, level = tx.level, "commit transaction");
        Ok(())
    }

    fn rollback(&self, tx: Transaction) -> StoreResult<()> {
        let mut state = self.state()?;
        state.pop_layer(&tx)?;
        tracing::trace!(transaction = tx.id, level = tx.level, "rollback transaction");
        Ok(())
    }

    fn suites(&self) -> StoreResult<Vec<TestSuite>> {
        Ok(self.state()?.suites.values().cloned().collect())
    }

    fn find_suite(&self, module: &str) -> StoreResult<Option<TestSuite>> {
        Ok(self.state()?.suites.values().find(|suite| suite.module == module).cloned())
    }

    fn save_suite(&self, suite: &mut TestSuite) -> StoreResult<()> {
        let mut state = self.state()?;
        let id = match suite.id {
            Some(id) if state.suites.contains_key(&id) => id,
            Some(id) => return Err(StoreError::SuiteNotFound(id)),
            None => {
                let id = SuiteId(state.next_id());
                suite.id = Some(id);
                id
            }
        };
        state.suites.insert(id, suite.clone());
        Ok(())
    }

    fn delete_suite(&self, id: SuiteId) -> StoreResult<()> {
        let mut state = self.state()?;
        if state.suites.remove(&id).is_none() {
            return Err(StoreError::SuiteNotFound(id));
        }
        let orphaned: Vec<UnitTestId> =
            state.tests.iter().filter(|(_, test)| test.suite == id).map(|(test_id, _)| *test_id).collect();
        for test_id in orphaned {
            state.remove_unit_test(test_id);
        }
        Ok(())
    }

    fn unit_tests(&self, query: &UnitTestQuery) -> StoreResult<Vec<UnitTest>> {
        Ok(self.state()?.tests.values().filter(|test| query.matches(test)).cloned().collect())
    }

    fn count_unit_tests(&self, query: &UnitTestQuery) -> StoreResult<u64> {
        Ok(self.state()?.tests.values().filter(|test| query.matches(test)).count() as u64)
    }

    fn save_unit_test(&self, test: &mut UnitTest) -> StoreResult<()> {
        let mut state = self.state()?;
        if !state.suites.contains_key(&test.suite) {
            return Err(StoreError::SuiteNotFound(test.suite));
        }
        let id = match test.id {
            Some(id) if state.tests.contains_key(&id) => id,
            Some(id) => return Err(StoreError::UnitTestNotFound(id)),
            None => {
                let id = UnitTestId(state.next_id());
                test.id = Some(id);
                id
            }
        };
        state.tests.insert(id, test.clone());
        Ok(())
    }

    fn delete_unit_tests(&self, query: &UnitTestQuery) -> StoreResult<u64> {
        let mut state = self.state()?;
        let matching: Vec<UnitTestId> =
            state.tests.iter().filter(|(_, test)| query.matches(test)).map(|(id, _)| *id).collect();
        for id in &matching {
            state.remove_unit_test(*id);
        }
        Ok(matching.len() as u64)
    }

    fn replace_activities(&self, unit_test: UnitTestId, mut activities: Vec<ActivityRecord>) -> StoreResult<()> {
        let mut state = self.state()?;
        if !state.tests.contains_key(&unit_test) {
            return Err(StoreError::UnitTestNotFound(unit_test));
        }
        activities.sort_by_key(|activity| activity.sequence);
        state.activities.insert(unit_test, activities);
        Ok(())
    }

    fn activities(&self, unit_test: UnitTestId) -> StoreResult<Vec<ActivityRecord>> {
        Ok(self.state()?.activities.get(&unit_test).cloned().unwrap_or_default())
    }
}

//! Registry reconciliation through `TestManager::find_all_tests`.

mod common;

use std::sync::Arc;

use common::{NativeOutcome, ScriptedEngine, ScriptedRunner, StaticIndex, indexed_manager, manager, suite, unit_test};
use unitrun::{MODEL_UPDATED_MESSAGE, MemoryStore, ObjectStore, SyncReport, UnitTestQuery, UnitTestResult, Value};

fn setup() -> (Arc<ScriptedEngine>, Arc<MemoryStore>) {
    (Arc::new(ScriptedEngine::new()), Arc::new(MemoryStore::new()))
}

fn names(store: &MemoryStore) -> Vec<String> {
    let mut names: Vec<String> =
        store.unit_tests(&UnitTestQuery::default()).unwrap().into_iter().map(|test| test.name).collect();
    names.sort();
    names
}

#[test]
fn test_find_all_tests_creates_suites_per_module() {
    let (engine, store) = setup();
    engine
        .returning("Orders.Test_A", Value::Boolean(true))
        .returning("Orders.ut_b", Value::Boolean(true))
        .returning("Orders.Helper", Value::Nothing)
        .returning("Orders.Setup", Value::Nothing)
        .returning("Stock.Test_C", Value::Boolean(true))
        .returning("Admin.Cleanup", Value::Nothing);
    let manager = manager(&engine, &store);

    let report = manager.find_all_tests().unwrap();

    assert_eq!(report.suites["Orders"], SyncReport { created: 2, confirmed: 0, deleted: 0 });
    assert_eq!(report.suites["Stock"].created, 1);
    assert_eq!(report.removed_suites, 1);
    assert!(store.find_suite("Admin").unwrap().is_none());

    assert_eq!(names(&store), vec!["Orders.Test_A", "Orders.ut_b", "Stock.Test_C"]);
    let orders = suite(&store, "Orders");
    assert_eq!(orders.test_count, 2);
    assert!(orders.has_setup);
    assert!(!orders.has_teardown);
}

#[test]
fn test_rediscovery_is_idempotent() {
    let (engine, store) = setup();
    engine.returning("Orders.Test_A", Value::Boolean(true)).returning("Orders.Test_B", Value::Boolean(false));
    let manager = manager(&engine, &store);
    manager.find_all_tests().unwrap();
    let before = store.unit_tests(&UnitTestQuery::default()).unwrap();

    let report = manager.find_all_tests().unwrap();

    assert!(report.suites.values().all(SyncReport::is_unchanged));
    assert_eq!(report.suites["Orders"].confirmed, 2);
    let after = store.unit_tests(&UnitTestQuery::default()).unwrap();
    let ids = |tests: &[unitrun::UnitTest]| tests.iter().map(|test| test.id).collect::<Vec<_>>();
    assert_eq!(ids(&before), ids(&after));
}

#[test]
fn test_rediscovery_keeps_results_and_drops_removed_tests() {
    let (engine, store) = setup();
    engine.returning("Orders.Test_A", Value::Boolean(true)).returning("Orders.Test_B", Value::Boolean(false));
    let manager = manager(&engine, &store);
    manager.find_all_tests().unwrap();
    manager.run_suite("Orders").unwrap();

    engine.remove("Orders.Test_B");
    engine.returning("Orders.Test_C", Value::Boolean(true));
    let report = manager.find_all_tests().unwrap();

    assert_eq!(report.suites["Orders"], SyncReport { created: 1, confirmed: 1, deleted: 1 });
    assert_eq!(names(&store), vec!["Orders.Test_A", "Orders.Test_C"]);
    assert_eq!(unit_test(&store, "Orders.Test_A").result, Some(UnitTestResult::Success));

    let orders = suite(&store, "Orders");
    assert_eq!((orders.test_count, orders.passed_count, orders.failed_count), (2, 1, 0));
    assert_eq!(orders.result, None);
}

#[test]
fn test_custom_prefixes_are_honoured() {
    let (engine, store) = setup();
    engine.returning("Orders.Test_A", Value::Boolean(true)).returning("Orders.Check_B", Value::Boolean(true));
    let manager = manager(&engine, &store);
    manager.find_all_tests().unwrap();

    let mut orders = suite(&store, "Orders");
    orders.prefix1 = "Check_".to_string();
    store.save_suite(&mut orders).unwrap();
    manager.find_all_tests().unwrap();

    assert_eq!(names(&store), vec!["Orders.Check_B"]);
}

#[test]
fn test_find_all_tests_clears_refresh_flag() {
    let (engine, store) = setup();
    engine.returning("Orders.Test_A", Value::Boolean(true));
    let manager = manager(&engine, &store);

    assert!(manager.watcher().process_message(MODEL_UPDATED_MESSAGE));
    assert!(manager.watcher().is_refresh_required());
    assert!(!manager.watcher().process_message("Something else happened"));

    manager.find_all_tests().unwrap();
    assert!(!manager.watcher().is_refresh_required());
}

#[test]
fn test_model_update_picks_up_new_native_tests() {
    let (engine, store) = setup();
    engine.returning("Orders.Test_Proc", Value::Boolean(true));
    let runner = Arc::new(ScriptedRunner::new());
    runner.script("orders.CartTest", "add", NativeOutcome::Pass { steps: Vec::new() });
    let index = Arc::new(StaticIndex::new(runner.classes()));
    let manager = indexed_manager(&engine, &store, &runner, &index);

    manager.find_all_tests().unwrap();
    assert_eq!(names(&store), vec!["Orders.Test_Proc", "orders.CartTest/add"]);
    assert!(manager.class_cache().contains("Orders"));

    index.add_class("orders.InvoiceTest", &["print"]);
    manager.find_all_tests().unwrap();
    assert_eq!(names(&store).len(), 2);

    manager.watcher().process_message(MODEL_UPDATED_MESSAGE);
    assert!(!manager.class_cache().contains("Orders"));
    manager.find_all_tests().unwrap();

    assert_eq!(names(&store), vec!["Orders.Test_Proc", "orders.CartTest/add", "orders.InvoiceTest/print"]);
    let native = unit_test(&store, "orders.InvoiceTest/print");
    assert!(!native.is_procedure_based);
    assert_eq!(native.display_name, "InvoiceTest/print");
}

#[test]
fn test_native_discovery_can_be_switched_off() {
    let (engine, store) = setup();
    engine.returning("Orders.Test_Proc", Value::Boolean(true));
    let runner = Arc::new(ScriptedRunner::new());
    runner.script("orders.CartTest", "add", NativeOutcome::Pass { steps: Vec::new() });
    let index: Arc<dyn unitrun::CodeIndex> = Arc::new(StaticIndex::new(runner.classes()));
    let dyn_engine: Arc<dyn unitrun::ProcedureEngine> = engine.clone();
    let dyn_store: Arc<dyn ObjectStore> = store.clone();
    let config = common::enabled_config().with_find_native_tests(false);
    let manager = unitrun::TestManager::new(config, dyn_store, dyn_engine).with_native_tests(index, runner.clone());

    manager.find_all_tests().unwrap();
    manager.run_suite("Orders").unwrap();

    assert_eq!(names(&store), vec!["Orders.Test_Proc"]);
    assert!(runner.runs().is_empty());
}

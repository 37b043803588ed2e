//! Deterministic host fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use unitrun::discovery::{DiscoveryError, NativeClass, NativeMethod, TEST_ANNOTATION};
use unitrun::procedure::TEST_CONTEXT_TYPE;
use unitrun::{
    CodeIndex, DataType, EngineConfig, Invocation, MemoryStore, NativeFailure, NativeTestId, NativeTestRunner,
    ObjectStore, Parameter, ProcedureEngine, ProcedureError, RunListener, TestManager, TestSuite, UnitTest,
    UnitTestQuery, Value,
};

// ============================================================================
// Procedure engine
// ============================================================================

pub type Body = Arc<dyn Fn(&mut Invocation<'_>) -> Result<Value, ProcedureError> + Send + Sync>;

struct Procedure {
    parameters: Vec<Parameter>,
    return_type: DataType,
    body: Body,
}

/// Procedure engine whose procedures are closures registered by the test.
#[derive(Default)]
pub struct ScriptedEngine {
    procedures: Mutex<BTreeMap<String, Procedure>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(
        &self,
        name: &str,
        parameters: Vec<Parameter>,
        return_type: DataType,
        body: impl Fn(&mut Invocation<'_>) -> Result<Value, ProcedureError> + Send + Sync + 'static,
    ) -> &Self {
        let procedure = Procedure { parameters, return_type, body: Arc::new(body) };
        self.procedures.lock().unwrap().insert(name.to_string(), procedure);
        self
    }

    /// A parameterless procedure that always returns `value`.
    pub fn returning(&self, name: &str, value: Value) -> &Self {
        let return_type = match &value {
            Value::Boolean(_) => DataType::Boolean,
            Value::String(_) | Value::Other(_) => DataType::String,
            Value::Nothing => DataType::Nothing,
        };
        self.define(name, Vec::new(), return_type, move |_| Ok(value.clone()))
    }

    /// A parameterless procedure that always fails with `message`.
    pub fn failing(&self, name: &str, message: &str) -> &Self {
        let message = message.to_string();
        self.define(name, Vec::new(), DataType::Nothing, move |_| {
            Err(ProcedureError::new(message.clone()).with_trace(format!("{message} (Throw)")))
        })
    }

    /// A procedure taking the test context.
    pub fn with_context(
        &self,
        name: &str,
        return_type: DataType,
        body: impl Fn(&mut Invocation<'_>) -> Result<Value, ProcedureError> + Send + Sync + 'static,
    ) -> &Self {
        self.define(name, vec![context_parameter()], return_type, body)
    }

    pub fn remove(&self, name: &str) {
        self.procedures.lock().unwrap().remove(name);
    }

    /// Procedure names in invocation order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ProcedureEngine for ScriptedEngine {
    fn callable_names(&self) -> BTreeSet<String> {
        self.procedures.lock().unwrap().keys().cloned().collect()
    }

    fn parameters(&self, procedure: &str) -> Option<Vec<Parameter>> {
        self.procedures.lock().unwrap().get(procedure).map(|procedure| procedure.parameters.clone())
    }

    fn return_type(&self, procedure: &str) -> Option<DataType> {
        self.procedures.lock().unwrap().get(procedure).map(|procedure| procedure.return_type.clone())
    }

    fn invoke(&self, mut invocation: Invocation<'_>) -> Result<Value, ProcedureError> {
        self.calls.lock().unwrap().push(invocation.procedure.to_string());
        let body = self.procedures.lock().unwrap().get(invocation.procedure).map(|procedure| procedure.body.clone());
        match body {
            Some(body) => body(&mut invocation),
            None => Err(ProcedureError::new(format!("procedure {} does not exist", invocation.procedure))),
        }
    }
}

pub fn context_parameter() -> Parameter {
    Parameter::new("UnitTestContext", DataType::Object(TEST_CONTEXT_TYPE.to_string()))
}

// ============================================================================
// Native runner and code index
// ============================================================================

#[derive(Debug, Clone)]
pub enum NativeOutcome {
    Pass { steps: Vec<String> },
    Fail { message: String, trace: String },
}

/// Native runner replaying scripted outcomes per `Class/method`.
#[derive(Default)]
pub struct ScriptedRunner {
    outcomes: Mutex<Vec<(NativeTestId, NativeOutcome)>>,
    runs: Mutex<Vec<Vec<NativeTestId>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, class_name: &str, method: &str, outcome: NativeOutcome) -> &Self {
        self.outcomes.lock().unwrap().push((NativeTestId::method(class_name, method), outcome));
        self
    }

    /// Selections passed to every `run` call.
    pub fn runs(&self) -> Vec<Vec<NativeTestId>> {
        self.runs.lock().unwrap().clone()
    }

    /// Classes (with their scripted methods as tests) for a [`StaticIndex`].
    pub fn classes(&self) -> Vec<NativeClass> {
        let mut classes: Vec<NativeClass> = Vec::new();
        for (test, _) in self.outcomes.lock().unwrap().iter() {
            let method = NativeMethod {
                name: test.method.clone().unwrap_or_default(),
                annotations: vec![TEST_ANNOTATION.to_string()],
            };
            match classes.iter_mut().find(|class| class.name == test.class_name) {
                Some(class) => class.methods.push(method),
                None => classes.push(NativeClass { name: test.class_name.clone(), methods: vec![method] }),
            }
        }
        classes
    }
}

impl NativeTestRunner for ScriptedRunner {
    fn run(&self, selection: &[NativeTestId], listener: &mut dyn RunListener) {
        self.runs.lock().unwrap().push(selection.to_vec());
        let outcomes = self.outcomes.lock().unwrap().clone();

        listener.run_started();
        for (test, outcome) in outcomes {
            let selected = selection.iter().any(|wanted| {
                wanted.class_name == test.class_name && (wanted.method.is_none() || wanted.method == test.method)
            });
            if !selected {
                continue;
            }

            listener.test_started(&test);
            match outcome {
                NativeOutcome::Pass { steps } => {
                    for step in steps {
                        listener.step_reported(&step);
                    }
                }
                NativeOutcome::Fail { message, trace } => listener.test_failed(&NativeFailure {
                    test: test.clone(),
                    message: Some(message),
                    trace,
                    elapsed: Some(Duration::from_millis(3)),
                }),
            }
            listener.test_finished(&test, Some(Duration::from_millis(5)));
        }
        listener.run_finished();
    }
}

/// Code index over an in-memory class list that tests can extend.
#[derive(Default)]
pub struct StaticIndex {
    classes: Mutex<Vec<NativeClass>>,
}

impl StaticIndex {
    pub fn new(classes: Vec<NativeClass>) -> Self {
        Self { classes: Mutex::new(classes) }
    }

    /// Add a test class with the given test methods.
    pub fn add_class(&self, name: &str, methods: &[&str]) {
        let methods = methods
            .iter()
            .map(|method| NativeMethod { name: method.to_string(), annotations: vec![TEST_ANNOTATION.to_string()] })
            .collect();
        self.classes.lock().unwrap().push(NativeClass { name: name.to_string(), methods });
    }
}

impl CodeIndex for StaticIndex {
    fn classes(&self, namespace: &str) -> Result<Vec<NativeClass>, DiscoveryError> {
        let prefix = format!("{namespace}.");
        Ok(self.classes.lock().unwrap().iter().filter(|class| class.name.starts_with(&prefix)).cloned().collect())
    }
}

// ============================================================================
// Manager helpers
// ============================================================================

pub fn enabled_config() -> EngineConfig {
    EngineConfig::new().with_enabled(true)
}

pub fn manager(engine: &Arc<ScriptedEngine>, store: &Arc<MemoryStore>) -> TestManager {
    let engine: Arc<dyn ProcedureEngine> = engine.clone();
    let store: Arc<dyn ObjectStore> = store.clone();
    TestManager::new(enabled_config(), store, engine)
}

pub fn native_manager(
    engine: &Arc<ScriptedEngine>,
    store: &Arc<MemoryStore>,
    runner: &Arc<ScriptedRunner>,
) -> TestManager {
    let index = Arc::new(StaticIndex::new(runner.classes()));
    indexed_manager(engine, store, runner, &index)
}

pub fn indexed_manager(
    engine: &Arc<ScriptedEngine>,
    store: &Arc<MemoryStore>,
    runner: &Arc<ScriptedRunner>,
    index: &Arc<StaticIndex>,
) -> TestManager {
    let index: Arc<dyn CodeIndex> = index.clone();
    let native_runner: Arc<dyn NativeTestRunner> = runner.clone();
    manager(engine, store).with_native_tests(index, native_runner)
}

/// The stored suite of `module`.
pub fn suite(store: &MemoryStore, module: &str) -> TestSuite {
    store.find_suite(module).unwrap().unwrap_or_else(|| panic!("no suite for module {module}"))
}

/// Activity labels of a unit test, in sequence order.
pub fn activity_labels(store: &MemoryStore, test: &UnitTest) -> Vec<&'static str> {
    store.activities(test.id.unwrap()).unwrap().iter().map(|record| record.kind.label()).collect()
}

/// The stored unit test named `name`.
pub fn unit_test(store: &MemoryStore, name: &str) -> UnitTest {
    let query = UnitTestQuery { name: Some(name.to_string()), ..UnitTestQuery::default() };
    let mut tests = store.unit_tests(&query).unwrap();
    assert_eq!(tests.len(), 1, "expected exactly one unit test named {name}");
    tests.remove(0)
}

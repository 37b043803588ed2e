//! Test discovery.
//!
//! Tests come from pluggable [`TestSource`] providers: [`ProcedureTestSource`] matches callable procedure names
//! against the suite prefixes, [`NativeTestSource`] lists annotated methods of the module's native classes.
//! [`Discovery`] bundles the configured sources with the setup/teardown lookups the orchestrator needs.

mod native;
mod procedures;

use std::collections::BTreeSet;
use std::sync::Arc;

pub use native::{
    ClassCache, CodeIndex, DiscoveryError, JsonCodeIndex, NativeClass, NativeMethod, NativeTestSource,
    TEST_ANNOTATION,
};
pub use procedures::ProcedureTestSource;

use unitrun_core::{SETUP_PROCEDURE, TEARDOWN_PROCEDURE, TestSuite, qualified_name};

use crate::procedure::ProcedureEngine;

/// Origin of a discovered test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestKind {
    Procedure,
    Native,
}

impl TestKind {
    pub fn is_procedure_based(self) -> bool {
        matches!(self, Self::Procedure)
    }
}

/// A provider of test names for a suite.
pub trait TestSource: Send + Sync {
    fn kind(&self) -> TestKind;

    /// Unit test names of `suite`, in run order.
    ///
    /// Sources swallow (and log) their own failures; an unavailable source yields no tests.
    fn discover(&self, suite: &TestSuite) -> Vec<String>;
}

/// The configured test sources.
pub struct Discovery {
    engine: Arc<dyn ProcedureEngine>,
    sources: Vec<Box<dyn TestSource>>,
}

impl Discovery {
    /// Discovery of procedure tests only.
    pub fn new(engine: Arc<dyn ProcedureEngine>) -> Self {
        let procedures = ProcedureTestSource::new(Arc::clone(&engine));
        Self { engine, sources: vec![Box::new(procedures)] }
    }

    /// Add a source, typically a [`NativeTestSource`].
    pub fn with_source(mut self, source: impl TestSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Names discovered by every source of `kind`, in source order.
    pub fn discover(&self, suite: &TestSuite, kind: TestKind) -> Vec<String> {
        self.sources.iter().filter(|source| source.kind() == kind).flat_map(|source| source.discover(suite)).collect()
    }

    pub fn procedure_tests(&self, suite: &TestSuite) -> Vec<String> {
        self.discover(suite, TestKind::Procedure)
    }

    pub fn native_tests(&self, suite: &TestSuite) -> Vec<String> {
        self.discover(suite, TestKind::Native)
    }

    /// Modules that own at least one callable procedure.
    pub fn modules(&self) -> BTreeSet<String> {
        self.engine
            .callable_names()
            .iter()
            .filter_map(|name| name.split('.').next())
            .filter(|module| !module.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn has_setup(&self, suite: &TestSuite) -> bool {
        self.engine.callable_names().contains(&qualified_name(&suite.module, SETUP_PROCEDURE))
    }

    pub fn has_teardown(&self, suite: &TestSuite) -> bool {
        self.engine.callable_names().contains(&qualified_name(&suite.module, TEARDOWN_PROCEDURE))
    }
}

impl std::fmt::Debug for Discovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<TestKind> = self.sources.iter().map(|source| source.kind()).collect();
        f.debug_struct("Discovery").field("sources", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::{DataType, Invocation, Parameter, ProcedureError, Value};

    struct Names(BTreeSet<String>);

    impl ProcedureEngine for Names {
        fn callable_names(&self) -> BTreeSet<String> {
            self.0.clone()
        }

        fn parameters(&self, _procedure: &str) -> Option<Vec<Parameter>> {
            None
        }

        fn return_type(&self, _procedure: &str) -> Option<DataType> {
            None
        }

        fn invoke(&self, invocation: Invocation<'_>) -> Result<Value, ProcedureError> {
            Err(ProcedureError::new(format!("{} is not callable", invocation.procedure)))
        }
    }

    struct Fixed(Vec<&'static str>);

    impl TestSource for Fixed {
        fn kind(&self) -> TestKind {
            TestKind::Native
        }

        fn discover(&self, _suite: &TestSuite) -> Vec<String> {
            self.0.iter().map(|name| name.to_string()).collect()
        }
    }

    fn discovery(names: &[&str]) -> Discovery {
        Discovery::new(Arc::new(Names(names.iter().map(|name| name.to_string()).collect())))
    }

    #[test]
    fn test_modules_from_first_segment() {
        let discovery = discovery(&["Orders.Test_A", "Orders.Setup", "Billing.Invoice", "Admin.Pages.Home"]);
        let modules: Vec<String> = discovery.modules().into_iter().collect();
        assert_eq!(modules, vec!["Admin", "Billing", "Orders"]);
    }

    #[test]
    fn test_has_setup_and_teardown() {
        let discovery = discovery(&["Orders.Setup", "Billing.TearDown"]);
        let orders = TestSuite::new("Orders");
        let billing = TestSuite::new("Billing");
        assert!(discovery.has_setup(&orders));
        assert!(!discovery.has_teardown(&orders));
        assert!(!discovery.has_setup(&billing));
        assert!(discovery.has_teardown(&billing));
    }

    #[test]
    fn test_sources_are_split_by_kind() {
        let discovery = discovery(&["Orders.Test_A"]).with_source(Fixed(vec!["orders.CheckoutTest/total"]));
        let suite = TestSuite::new("Orders");
        assert_eq!(discovery.procedure_tests(&suite), vec!["Orders.Test_A"]);
        assert_eq!(discovery.native_tests(&suite), vec!["orders.CheckoutTest/total"]);
    }
}

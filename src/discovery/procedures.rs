use std::sync::Arc;

use unitrun_core::TestSuite;

use super::{TestKind, TestSource};
use crate::procedure::ProcedureEngine;

/// Procedure tests: callables named `Module.<prefix1>*` or `Module.<prefix2>*`, case-insensitively.
pub struct ProcedureTestSource {
    engine: Arc<dyn ProcedureEngine>,
}

impl ProcedureTestSource {
    pub fn new(engine: Arc<dyn ProcedureEngine>) -> Self {
        Self { engine }
    }
}

impl TestSource for ProcedureTestSource {
    fn kind(&self) -> TestKind {
        TestKind::Procedure
    }

    fn discover(&self, suite: &TestSuite) -> Vec<String> {
        let basename1 = format!("{}.{}", suite.module, suite.prefix1).to_lowercase();
        let basename2 = format!("{}.{}", suite.module, suite.prefix2).to_lowercase();

        let mut names: Vec<String> = self
            .engine
            .callable_names()
            .into_iter()
            .filter(|name| {
                let lower = name.to_lowercase();
                lower.starts_with(&basename1) || lower.starts_with(&basename2)
            })
            .collect();
        names.sort();

        tracing::trace!(module = %suite.module, count = names.len(), "found procedure tests");
        names
    }
}

//! Procedure execution boundary.
//!
//! Business procedures are executed by the host's engine, which the orchestrator only sees through
//! [`ProcedureEngine`]: name listing, signature introspection and invocation.

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

use crate::context::ExecutionContext;
use crate::store::Transaction;

/// Object type of the parameter through which a procedure receives its test context.
pub const TEST_CONTEXT_TYPE: &str = "UnitTesting.UnitTestContext";

/// Declared type of a procedure parameter or return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    Boolean,
    String,
    Nothing,
    Integer,
    Decimal,
    DateTime,
    Binary,
    Enumeration(String),
    Object(String),
    List(String),
}

impl DataType {
    pub fn is_test_context(&self) -> bool {
        matches!(self, Self::Object(entity) if entity == TEST_CONTEXT_TYPE)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => f.write_str("boolean"),
            Self::String => f.write_str("string"),
            Self::Nothing => f.write_str("nothing"),
            Self::Integer => f.write_str("integer"),
            Self::Decimal => f.write_str("decimal"),
            Self::DateTime => f.write_str("datetime"),
            Self::Binary => f.write_str("binary"),
            Self::Enumeration(name) => write!(f, "enumeration {name}"),
            Self::Object(entity) => write!(f, "object {entity}"),
            Self::List(entity) => write!(f, "list of {entity}"),
        }
    }
}

/// A declared procedure parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub data_type: DataType,
}

impl Parameter {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self { name: name.into(), data_type }
    }
}

/// Value returned by a procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Nothing,
    Boolean(bool),
    String(String),
    /// Any other value, rendered for diagnostics
    Other(String),
}

/// Test-context argument bound to the single context parameter of a procedure under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextArgument {
    pub parameter: String,
    pub test_name: String,
}

/// One procedure call.
pub struct Invocation<'a> {
    pub procedure: &'a str,
    pub transaction: &'a Transaction,
    pub argument: Option<ContextArgument>,
    /// Evidence collector of the running test; absent for setup and teardown procedures
    pub context: Option<&'a mut ExecutionContext>,
}

impl fmt::Debug for Invocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("procedure", &self.procedure)
            .field("transaction", &self.transaction)
            .field("argument", &self.argument)
            .field("collects_evidence", &self.context.is_some())
            .finish()
    }
}

/// Error raised by a procedure, with an optional chain of causes.
///
/// The engine's own assertion-failure signal is an error whose root cause is built with
/// [`ProcedureError::assertion`]; such failures are already represented by a failed assertion activity.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProcedureError {
    message: String,
    trace: Option<String>,
    assertion: bool,
    #[source]
    cause: Option<Box<ProcedureError>>,
}

impl ProcedureError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), trace: None, assertion: false, cause: None }
    }

    /// The signal raised when a collected assertion aborts the procedure.
    pub fn assertion(message: impl Into<String>) -> Self {
        Self { assertion: true, ..Self::new(message) }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    /// Wrap `cause` as the reason for this error.
    pub fn caused_by(mut self, cause: ProcedureError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn root_cause(&self) -> &ProcedureError {
        let mut current = self;
        while let Some(cause) = current.cause.as_deref() {
            current = cause;
        }
        current
    }

    pub fn is_assertion(&self) -> bool {
        self.root_cause().assertion
    }

    /// Render the whole chain with the frames each level reported.
    pub fn full_trace(&self) -> String {
        let mut out = String::new();
        let mut current = Some(self);
        let mut first = true;
        while let Some(error) = current {
            if !first {
                out.push_str("Caused by: ");
            }
            out.push_str(&error.message);
            out.push('\n');
            if let Some(trace) = &error.trace {
                for frame in trace.lines() {
                    out.push_str("\tat ");
                    out.push_str(frame.trim());
                    out.push('\n');
                }
            }
            first = false;
            current = error.cause.as_deref();
        }
        out
    }
}

/// Host engine that executes procedures.
pub trait ProcedureEngine: Send + Sync {
    /// Qualified names (`Module.Name`) of every callable procedure.
    fn callable_names(&self) -> BTreeSet<String>;

    /// Declared parameters, `None` when the procedure does not exist.
    fn parameters(&self, procedure: &str) -> Option<Vec<Parameter>>;

    /// Declared return type, `None` when the procedure does not exist.
    fn return_type(&self, procedure: &str) -> Option<DataType>;

    fn invoke(&self, invocation: Invocation<'_>) -> Result<Value, ProcedureError>;
}

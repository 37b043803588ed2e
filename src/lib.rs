#![forbid(unsafe_code)]
//! Unitrun: unit test orchestration for an embedding application runtime
//!
//! The engine discovers tests from two origins, business procedures matched by name prefix and natively-coded
//! test methods found through a code index. It runs them under transactional setup/teardown semantics, collects
//! structured evidence for every execution and aggregates results per module suite.
//!
//! The host supplies its collaborators through traits: an [`ObjectStore`] for records and transactions, a
//! [`ProcedureEngine`] that executes procedures and optionally a [`NativeTestRunner`] with its [`CodeIndex`].
//! [`MemoryStore`] is a complete in-process store.
//!
//! ## Panic Policy
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. The `orchestrator` and `remote`
//!   modules enforce `#![deny(clippy::unwrap_used)]`.
//!
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.

pub mod activity;
pub mod aggregate;
pub mod config;
pub mod context;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod model_watch;
pub mod native;
pub mod orchestrator;
pub mod procedure;
pub mod remote;
pub mod store;
pub mod sync;
pub mod validation;

pub use unitrun_core::{
    ActivityKind, ActivityRecord, SuiteId, SyncMark, TestSuite, UnitTest, UnitTestId, UnitTestResult,
};

pub use config::EngineConfig;
pub use context::ExecutionContext;
pub use discovery::{ClassCache, CodeIndex, Discovery, JsonCodeIndex, NativeTestSource, ProcedureTestSource, TestSource};
pub use error::{EngineError, EngineResult};
pub use model_watch::{MODEL_UPDATED_MESSAGE, ModelUpdateWatcher};
pub use native::{NativeFailure, NativeTestId, NativeTestRunner, RunListener, SuiteRunListener};
pub use orchestrator::TestManager;
pub use procedure::{DataType, Invocation, Parameter, ProcedureEngine, ProcedureError, Value};
pub use remote::{RemoteApi, RemoteRequest, RemoteResponse};
pub use store::{MemoryStore, ObjectStore, StoreError, Transaction, UnitTestQuery};
pub use sync::{DiscoveryReport, RegistrySync, SyncReport};

//! Remote trigger API.
//!
//! Transport-independent handling of the two remote commands: `start` launches a run of all suites on a
//! background thread, `status` reports progress. The host's HTTP layer maps its requests onto [`RemoteRequest`]
//! and writes back the [`RemoteResponse`]. Every request carries a JSON body with the configured password.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use unitrun_core::UnitTestResult;

use crate::error::EngineError;
use crate::orchestrator::TestManager;
use crate::store::{ResultFilter, StoreResult, UnitTestQuery};

pub const COMMAND_START: &str = "start";
pub const COMMAND_STATUS: &str = "status";
pub const PARAM_PASSWORD: &str = "password";

pub const STATUS_OK: u16 = 200;
pub const STATUS_NO_CONTENT: u16 = 204;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_UNAUTHORIZED: u16 = 401;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_METHOD_NOT_ALLOWED: u16 = 405;
pub const STATUS_INTERNAL_ERROR: u16 = 500;

const RUN_IN_PROGRESS: &str = "Cannot start a test run while another test run is still running";
const INVALID_PASSWORD: &str = "Invalid password provided";

/// A request as received by the host transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRequest {
    pub method: String,
    /// Command path relative to the API root (`start`, `status`)
    pub path: String,
    pub body: String,
}

impl RemoteRequest {
    pub fn get(path: impl Into<String>, body: impl Into<String>) -> Self {
        Self { method: "GET".to_string(), path: path.into(), body: body.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: String,
}

impl RemoteResponse {
    fn empty(status: u16) -> Self {
        Self { status, body: String::new() }
    }

    fn text(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into() }
    }
}

/// A failed unit test as listed in the status document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTest {
    pub name: String,
    pub error: String,
    pub step: String,
}

/// Body of the `status` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunStatus {
    pub completed: bool,
    /// Milliseconds spent in the current or last remote run
    pub runtime: u64,
    pub tests: u64,
    pub failures: u64,
    pub failed_tests: Vec<FailedTest>,
    /// Why the last remote run stopped early, e.g. a local run holding the run lock or a failing Setup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Request rejection, rendered as a status code and text body.
#[derive(Debug)]
enum Rejection {
    BadRequest(String),
    InvalidPassword,
    Internal(String),
}

impl From<Rejection> for RemoteResponse {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::BadRequest(message) => RemoteResponse::text(STATUS_BAD_REQUEST, message),
            Rejection::InvalidPassword => RemoteResponse::text(STATUS_UNAUTHORIZED, INVALID_PASSWORD),
            Rejection::Internal(message) => RemoteResponse::text(STATUS_INTERNAL_ERROR, message),
        }
    }
}

#[derive(Debug, Default)]
struct RunState {
    started: Option<Instant>,
    runtime: Option<Duration>,
    error: Option<String>,
}

impl RunState {
    fn runtime(&self) -> Duration {
        match (self.runtime, self.started) {
            (Some(runtime), _) => runtime,
            (None, Some(started)) => started.elapsed(),
            (None, None) => Duration::ZERO,
        }
    }
}

/// Handles remote `start` and `status` commands for one [`TestManager`].
pub struct RemoteApi {
    manager: Arc<TestManager>,
    password: String,
    detected_tests: AtomicBool,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<RunState>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteApi {
    /// The API of `manager`, available only when a remote password is configured.
    pub fn new(manager: Arc<TestManager>) -> Option<Self> {
        let password = manager.config().remote_api_password.clone().filter(|password| !password.is_empty())?;
        Some(Self {
            manager,
            password,
            detected_tests: AtomicBool::new(false),
            running: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(RunState::default())),
            worker: Mutex::new(None),
        })
    }

    pub fn handle(&self, request: &RemoteRequest) -> RemoteResponse {
        if request.method != "GET" {
            return RemoteResponse::empty(STATUS_METHOD_NOT_ALLOWED);
        }

        let outcome = match request.path.trim_matches('/') {
            COMMAND_START => self.serve_start(&request.body),
            COMMAND_STATUS => self.serve_status(&request.body),
            _ => return RemoteResponse::empty(STATUS_NOT_FOUND),
        };
        outcome.unwrap_or_else(RemoteResponse::from)
    }

    /// Whether a remotely started run has not finished yet.
    pub fn is_run_active(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Block until the remotely started run, if any, has finished.
    pub fn wait_for_run(&self) {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Remote test run thread panicked");
            }
        }
    }

    fn serve_start(&self, body: &str) -> Result<RemoteResponse, Rejection> {
        self.verify_password(body)?;

        if !self.detected_tests.load(Ordering::SeqCst) {
            match self.manager.find_all_tests() {
                Ok(_) => self.detected_tests.store(true, Ordering::SeqCst),
                Err(EngineError::RunInProgress) => return Err(Rejection::BadRequest(RUN_IN_PROGRESS.to_string())),
                Err(error) => return Err(Rejection::Internal(error.to_string())),
            }
        }

        if self.manager.is_running()
            || self.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err()
        {
            return Err(Rejection::BadRequest(RUN_IN_PROGRESS.to_string()));
        }

        *lock(&self.state) = RunState { started: Some(Instant::now()), ..RunState::default() };

        // The run lock is taken again by the worker, so a local run may win it in between.
        let manager = Arc::clone(&self.manager);
        let running = Arc::clone(&self.running);
        let state = Arc::clone(&self.state);
        let spawned = thread::Builder::new().name("unitrun-remote-run".to_string()).spawn(move || {
            tracing::info!("Starting remote test run");
            let outcome = manager.run_all_suites();
            {
                let mut state = lock(&state);
                state.runtime = state.started.map(|started| started.elapsed());
                if let Err(error) = outcome {
                    tracing::error!("Remote test run failed: {}", error);
                    state.error = Some(match error {
                        EngineError::RunInProgress => RUN_IN_PROGRESS.to_string(),
                        error => error.to_string(),
                    });
                }
            }
            running.store(false, Ordering::SeqCst);
            tracing::info!("Remote test run finished");
        });

        match spawned {
            Ok(handle) => {
                *lock(&self.worker) = Some(handle);
                Ok(RemoteResponse::empty(STATUS_NO_CONTENT))
            }
            Err(error) => {
                self.running.store(false, Ordering::SeqCst);
                Err(Rejection::Internal(format!("Unable to start test run: {error}")))
            }
        }
    }

    fn serve_status(&self, body: &str) -> Result<RemoteResponse, Rejection> {
        self.verify_password(body)?;

        let status = self.status().map_err(|error| Rejection::Internal(error.to_string()))?;
        let body = serde_json::to_string(&status).map_err(|error| Rejection::Internal(error.to_string()))?;
        Ok(RemoteResponse::text(STATUS_OK, body))
    }

    /// Current run status, computed from the stored unit tests.
    pub fn status(&self) -> StoreResult<RunStatus> {
        let store = self.manager.store();
        let failed = store.unit_tests(
            &UnitTestQuery::default().with_result(ResultFilter::Is(Some(UnitTestResult::Failed))),
        )?;

        let (runtime, error) = {
            let state = lock(&self.state);
            (state.runtime(), state.error.clone())
        };

        Ok(RunStatus {
            completed: !self.is_run_active() && !self.manager.is_running(),
            runtime: u64::try_from(runtime.as_millis()).unwrap_or(u64::MAX),
            tests: store.count_unit_tests(&UnitTestQuery::default())?,
            failures: failed.len() as u64,
            failed_tests: failed
                .into_iter()
                .map(|test| FailedTest {
                    name: test.name,
                    error: test.result_message,
                    step: test.last_step.unwrap_or_default(),
                })
                .collect(),
            error,
        })
    }

    fn verify_password(&self, body: &str) -> Result<(), Rejection> {
        let input: serde_json::Value = serde_json::from_str(body)
            .map_err(|error| Rejection::BadRequest(format!("Invalid JSON body: {error}")))?;
        let Some(object) = input.as_object() else {
            return Err(Rejection::BadRequest("Request body should be a JSON object".to_string()));
        };
        let Some(password) = object.get(PARAM_PASSWORD) else {
            return Err(Rejection::BadRequest(format!(
                "No '{PARAM_PASSWORD}' attribute found in the JSON body. Please provide a password"
            )));
        };
        if password.as_str() != Some(self.password.as_str()) {
            return Err(Rejection::InvalidPassword);
        }
        Ok(())
    }
}

impl std::fmt::Debug for RemoteApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteApi")
            .field("detected_tests", &self.detected_tests.load(Ordering::SeqCst))
            .field("running", &self.is_run_active())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

//! Engine configuration.
//!
//! Unit testing is disabled by default outside local development: a host has to opt in explicitly, either with
//! the builder methods or through `UNITRUN_*` environment variables.

use std::env;
use std::path::PathBuf;

pub const ENV_ENABLED: &str = "UNITRUN_ENABLED";
pub const ENV_LOCAL_DEVELOPMENT: &str = "UNITRUN_LOCAL_DEVELOPMENT";
pub const ENV_FIND_NATIVE_TESTS: &str = "UNITRUN_FIND_NATIVE_TESTS";
pub const ENV_REMOTE_PASSWORD: &str = "UNITRUN_REMOTE_PASSWORD";
pub const ENV_CODE_INDEX: &str = "UNITRUN_CODE_INDEX";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Explicit enablement for this environment
    pub enabled: bool,
    /// Running on a developer machine; enables the engine regardless of `enabled`
    pub local_development: bool,
    /// Discover and run natively-coded tests next to procedure tests
    pub find_native_tests: bool,
    /// Shared secret of the remote API; the API is unavailable without one
    pub remote_api_password: Option<String>,
    /// JSON class index consulted for native test discovery
    pub code_index_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            local_development: false,
            find_native_tests: true,
            remote_api_password: None,
            code_index_path: None,
        }
    }
}

impl EngineConfig {
    /// Create a new config with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a config from `UNITRUN_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| lookup(key).and_then(|value| parse_flag(&value)).unwrap_or(default);

        Self {
            enabled: flag(ENV_ENABLED, defaults.enabled),
            local_development: flag(ENV_LOCAL_DEVELOPMENT, defaults.local_development),
            find_native_tests: flag(ENV_FIND_NATIVE_TESTS, defaults.find_native_tests),
            remote_api_password: lookup(ENV_REMOTE_PASSWORD).filter(|password| !password.is_empty()),
            code_index_path: lookup(ENV_CODE_INDEX).filter(|path| !path.is_empty()).map(PathBuf::from),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_local_development(mut self, local_development: bool) -> Self {
        self.local_development = local_development;
        self
    }

    pub fn with_find_native_tests(mut self, find_native_tests: bool) -> Self {
        self.find_native_tests = find_native_tests;
        self
    }

    pub fn with_remote_api_password(mut self, password: impl Into<String>) -> Self {
        self.remote_api_password = Some(password.into());
        self
    }

    pub fn with_code_index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.code_index_path = Some(path.into());
        self
    }

    /// Whether runs and syncs are allowed on this environment.
    pub fn is_enabled(&self) -> bool {
        if self.local_development {
            tracing::debug!("Unit testing is enabled for local development");
            true
        } else if self.enabled {
            tracing::debug!("Unit testing is enabled for this environment");
            true
        } else {
            tracing::debug!("Unit testing is disabled for this environment");
            false
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

//! Structured logging setup for hosts embedding the engine.

/// Install a formatted `tracing` subscriber with an env-based filter, defaulting to `info`.
///
/// Safe to call more than once; only the first call installs the subscriber.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

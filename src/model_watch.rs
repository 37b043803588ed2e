//! Reaction to application model updates.
//!
//! The host publishes a message when a new application model has been deployed. From then on the stored test
//! registry may be stale and the native class cache certainly is.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::discovery::ClassCache;

/// Message the host publishes once an updated application model is available.
pub const MODEL_UPDATED_MESSAGE: &str = "Application model has been updated, application is now available.";

/// Tracks whether tests must be rediscovered after a model update.
#[derive(Debug)]
pub struct ModelUpdateWatcher {
    refresh_required: AtomicBool,
    cache: Arc<ClassCache>,
}

impl ModelUpdateWatcher {
    pub fn new(cache: Arc<ClassCache>) -> Self {
        Self { refresh_required: AtomicBool::new(false), cache }
    }

    /// Handle a host message, returning whether it announced a model update.
    pub fn process_message(&self, message: &str) -> bool {
        if message != MODEL_UPDATED_MESSAGE {
            return false;
        }
        tracing::info!("Application model updated, unit tests need to be refreshed");
        self.refresh_required.store(true, Ordering::SeqCst);
        self.cache.invalidate();
        true
    }

    pub fn is_refresh_required(&self) -> bool {
        self.refresh_required.load(Ordering::SeqCst)
    }

    pub fn set_refresh_required(&self, refresh_required: bool) {
        self.refresh_required.store(refresh_required, Ordering::SeqCst);
    }
}

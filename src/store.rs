//! Process-wide configuration and shutdown hooks.
//!
//! [`crate::init::init`] records the configuration it was given here, and
//! handlers that hold resources register a cleanup to run on [`shutdown`].

use crate::config::Config;
use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use std::error::Error;
use std::sync::{Arc, Mutex, MutexGuard};

type Cleanup = Box<dyn FnOnce() -> Result<(), Box<dyn Error + Send + Sync>> + Send>;

static CONFIG: Lazy<ArcSwap<Config>> = Lazy::new(|| ArcSwap::from_pointee(Config::default()));
static CLEANUPS: Lazy<Mutex<Vec<Cleanup>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// The configuration most recently stored, or the defaults.
pub fn get_config() -> Arc<Config> {
    CONFIG.load_full()
}

pub fn set_config(config: Config) {
    CONFIG.store(Arc::new(config));
}

/// Restore the default configuration.
pub fn reset_config() {
    set_config(Config::default());
}

/// Register a function to run on [`shutdown`].
pub fn register_cleanup<F>(cleanup: F)
where
    F: FnOnce() -> Result<(), Box<dyn Error + Send + Sync>> + Send + 'static,
{
    cleanups().push(Box::new(cleanup));
}

fn cleanups() -> MutexGuard<'static, Vec<Cleanup>> {
    CLEANUPS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run every registered cleanup, most recently registered first.
///
/// A failing cleanup does not stop the rest. The registry is empty
/// afterwards, so a second call is a no-op.
pub fn shutdown() -> Result<(), ShutdownError> {
    let pending = std::mem::take(&mut *cleanups());
    let errors: Vec<_> = pending
        .into_iter()
        .rev()
        .filter_map(|cleanup| cleanup().err())
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ShutdownError { errors })
    }
}

/// Failures collected by [`shutdown`].
#[derive(thiserror::Error, Debug)]
#[error("{} cleanup(s) failed during shutdown{}", .errors.len(), join_causes(.errors))]
pub struct ShutdownError {
    pub errors: Vec<Box<dyn Error + Send + Sync>>,
}

fn join_causes(errors: &[Box<dyn Error + Send + Sync>]) -> String {
    errors.iter().map(|e| format!("; {e}")).collect()
}

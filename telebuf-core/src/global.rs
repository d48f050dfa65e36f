//! Process-wide tracker
//!
//! Applications that want a single tracker reachable from anywhere call
//! [`init`] once at startup and [`shutdown`] before exiting. Code that owns
//! its tracker explicitly does not need this module.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use crate::config::CollectorConfig;
use crate::error::{Error, Result};
use crate::tracker::Tracker;

static TRACKER: OnceLock<Mutex<Option<Arc<Tracker>>>> = OnceLock::new();

fn slot() -> MutexGuard<'static, Option<Arc<Tracker>>> {
    TRACKER
        .get_or_init(|| Mutex::new(None))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Start the process-wide tracker
///
/// Fails with [`Error::AlreadyInitialized`] while another one is active.
pub fn init(config: CollectorConfig) -> Result<Arc<Tracker>> {
    install(|| Tracker::new(config))
}

/// Install an already-built tracker as the process-wide one
pub fn init_with(tracker: Tracker) -> Result<Arc<Tracker>> {
    install(|| Ok(tracker))
}

fn install(build: impl FnOnce() -> Result<Tracker>) -> Result<Arc<Tracker>> {
    let mut slot = slot();
    if slot.is_some() {
        return Err(Error::AlreadyInitialized);
    }
    let tracker = Arc::new(build()?);
    *slot = Some(Arc::clone(&tracker));
    Ok(tracker)
}

/// The active process-wide tracker
pub fn get() -> Result<Arc<Tracker>> {
    slot().clone().ok_or(Error::NotInitialized)
}

/// Whether a process-wide tracker is active
pub fn is_initialized() -> bool {
    slot().is_some()
}

/// Stop the process-wide tracker and release it
///
/// Returns whether the delivery worker was observed stopped within
/// `timeout`. A later [`init`] may start a new tracker.
pub fn shutdown(timeout: Option<Duration>) -> Result<bool> {
    let tracker = slot().take().ok_or(Error::NotInitialized)?;
    Ok(tracker.stop(timeout))
}

//! Ctrl+C handling for queue drains.
//!
//! The handler only raises a flag; the worker checks it between items so a
//! claimed item is always finished and recorded before stopping.

use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;

static CANCEL_REQUESTED: AtomicBool = AtomicBool::new(false);

pub fn is_cancelled() -> bool {
    CANCEL_REQUESTED.load(Ordering::SeqCst)
}

/// Clear a previous request before starting a new drain.
pub fn reset() {
    CANCEL_REQUESTED.store(false, Ordering::SeqCst);
}

/// Install the Ctrl+C handler. Installing twice is harmless.
pub fn register_handler() {
    if let Err(e) = ctrlc::set_handler(|| CANCEL_REQUESTED.store(true, Ordering::SeqCst)) {
        debug!("Ctrl+C handler not installed: {}", e);
    }
}

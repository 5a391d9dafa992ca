//! Interrupt flag for long-running captures
//!
//! SIGINT and SIGTERM only set a flag. Capture waits and packaging poll it and
//! fail with an error, so scratch directories are removed by the normal
//! unwinding of their guards instead of being abandoned mid-run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::warn;

static INTERRUPTED: OnceLock<Arc<AtomicBool>> = OnceLock::new();

fn flag() -> &'static Arc<AtomicBool> {
    INTERRUPTED.get_or_init(|| Arc::new(AtomicBool::new(false)))
}

/// Route SIGINT and SIGTERM to the interrupt flag
#[cfg(unix)]
pub fn install() {
    use signal_hook::consts::{SIGINT, SIGTERM};

    for signal in [SIGINT, SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(flag())) {
            warn!(signal, error = %e, "failed to install signal handler");
        }
    }
}

#[cfg(not(unix))]
pub fn install() {}

/// Whether an interrupt has been received
pub fn requested() -> bool {
    flag().load(Ordering::SeqCst)
}

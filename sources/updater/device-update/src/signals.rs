use crate::error::{self, Result};
use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::flag;
use snafu::ResultExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Registers SIGTERM/SIGINT/SIGQUIT handlers that flip a shared flag rather than terminating
/// immediately, so the runner can finish persisting the current state transition before exiting.
pub fn install_shutdown_flag() -> Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGTERM, SIGINT, SIGQUIT] {
        flag::register(signal, Arc::clone(&shutdown)).context(error::SignalHandlerSnafu)?;
    }
    Ok(shutdown)
}

pub fn requested(flag: &AtomicBool) -> bool {
    flag.load(Ordering::Relaxed)
}

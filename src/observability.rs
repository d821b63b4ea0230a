//! Opt-in tracing subscriber setup.
//!
//! The library itself only emits `tracing` events; embedding applications
//! and test binaries can call [`init_tracing`] to see them.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::EnvFilter;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Install a formatting subscriber honoring `RUST_LOG`.
///
/// Safe to call more than once; only the first call installs.
pub fn init_tracing() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chatbench=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

// ABOUTME: Tracing subscriber setup shared by hosts and test harnesses
// ABOUTME: Reads the filter from STRATUS_LOG, then RUST_LOG, defaulting to info

use crate::constants::{RUST_LOG, STRATUS_LOG};
use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(STRATUS_LOG)
        .or_else(|_| EnvFilter::try_from_env(RUST_LOG))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global fmt subscriber. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .try_init();
}

/// Subscriber variant writing through the libtest capture.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_test_writer()
        .try_init();
}

//! Structured logging setup for the master process. Library code only
//! ever calls into `tracing`'s macros; wiring an actual subscriber is an
//! embedding concern, but the master ships the one it expects to be used
//! with so a binary entrypoint doesn't have to pick one itself.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a JSON-formatted subscriber reading its filter from
/// `RUST_LOG`, defaulting to `info` when unset. Call once at process
/// startup; calling it twice is a logic error the subscriber crate itself
/// reports, not one this function guards against.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();
}

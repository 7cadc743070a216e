// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Process-wide setup shared by every prism binary.

/// Installs the global `tracing` subscriber.
///
/// Filtering follows `RUST_LOG`; without it only `info` and above are shown.
/// Calling this twice is harmless, the second install is ignored.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
    tracing::debug!("tracing initialised");
}

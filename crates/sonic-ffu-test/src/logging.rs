//! Test log capture.

use tracing_subscriber::EnvFilter;

/// Installs a fmt subscriber writing through the test harness. Filter comes
/// from `RUST_LOG`, defaulting to `sonic_ffu=debug`. Safe to call from every
/// test; only the first call installs anything.
pub fn init_test_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sonic_ffu=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

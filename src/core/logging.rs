//! Logging initialization for arbor binaries

/// Initialize the logging system
///
/// Uses env_logger with default filter level of `info`.
/// Override with RUST_LOG environment variable, e.g.
/// `RUST_LOG=arbor::tree=debug` to see per-trunk generation summaries.
///
/// # Example
/// ```
/// arbor::core::logging::init();
/// log::info!("Generating skeletons");
/// ```
pub fn init() {
    init_with_default("info");
}

/// Initialize logging with a caller-chosen default filter.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_with_default(filter: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp_millis()
        .try_init();
}

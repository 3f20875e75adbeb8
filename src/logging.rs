use tracing_subscriber::EnvFilter;

/// Initialize tracing. `RUST_LOG` wins; otherwise the given level
/// applies crate-wide.
pub fn init(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

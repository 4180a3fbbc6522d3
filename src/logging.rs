use tracing_subscriber::EnvFilter;

/// Initialise the tracing subscriber. The CLI level acts as the
/// default; `RUST_LOG` overrides it when set.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

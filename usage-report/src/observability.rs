use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVES: &str = "usage_report=info,storage_client=info";

/// Human readable logs on stderr. A set `RUST_LOG` replaces the defaults.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "toolbox_api=info,server=info,fetch=info";

/// Installs the global `tracing` subscriber. `RUST_LOG` wins over the
/// default filter; a second call is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs a JSON formatter on stdout, which Cloud Logging ingests as
/// structured entries. `RUST_LOG` overrides the default `info` level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_current_span(false)
        .flatten_event(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is not set
pub fn default_directive() -> &'static str {
    if cfg!(debug_assertions) {
        "twirl=debug,warn"
    } else {
        "twirl=info,warn"
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `fallback`. Returns false if a subscriber was
/// already installed, e.g. by the embedding application.
pub fn init(fallback: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

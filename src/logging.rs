//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence over `[logging] level`. Installing twice is
//! harmless: the second call leaves the first subscriber in place.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global fmt subscriber. Returns `false` if one was already set.
pub fn init(config: &LoggingConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

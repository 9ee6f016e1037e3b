// Tracing subscriber setup for the `ildiff` binary.
//
// Library code only emits `tracing` events; installing a subscriber is left
// to the binary (or to tests that want to see output).

use std::sync::Once;

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Later calls are ignored.
pub fn init_tracing(json: bool) {
    INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(env_filter());
        let result = if json {
            registry
                .with(fmt::layer().json().with_target(true).with_thread_ids(true))
                .try_init()
        } else {
            registry
                .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
                .try_init()
        };

        if result.is_ok() {
            info!(json, "tracing initialized");
        }
    });
}

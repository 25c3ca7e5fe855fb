use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the global subscriber. `RUST_LOG` wins over the `info` default.
pub fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let base = fmt::layer().with_target(true).with_line_number(true);

    // Ignore the error when a subscriber is already installed (tests, re-init).
    let _ = if json {
        tracing_subscriber::registry().with(env_filter).with(base.json()).try_init()
    } else {
        tracing_subscriber::registry().with(env_filter).with(base.compact()).try_init()
    };
}

//! Process-wide tracing setup for hosts embedding orchard

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "info,orchard=debug";

/// Install the global subscriber; a second call is a no-op.
///
/// `RUST_LOG` overrides the filter. `debug` raises everything to debug
/// when `RUST_LOG` is absent.
pub fn init_tracing(json: bool, debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { DEFAULT_FILTER }));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let _ = if json {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.try_init()
    };
}

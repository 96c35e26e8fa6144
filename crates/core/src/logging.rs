use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Used when `RUST_LOG` is unset or unparsable.
const FALLBACK_DIRECTIVES: &str = "info,inflight=debug,inflight_renderer=debug,vulkan=warn";

/// Installs the global `tracing` subscriber: an `EnvFilter` read from
/// `RUST_LOG` in front of a fmt layer that prints targets and thread ids.
///
/// A second call is a no-op.
///
/// ```
/// inflight_core::init_logging();
/// inflight_core::init_logging();
/// tracing::info!(frames_in_flight = 2, "starting");
/// ```
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(FALLBACK_DIRECTIVES));
    let layer = fmt::layer().with_target(true).with_thread_ids(true);

    if tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .is_err()
    {
        tracing::trace!("subscriber already set");
    }
}

//! Tracing initialisation for processes embedding the DSE engine.
//!
//! [`init_tracing`] configures the global subscriber once; receipts carry
//! the durable audit trail, tracing is for live diagnosis. The subscriber
//! can only be installed once per process, so repeat calls are no-ops.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence for filtering; `level` is the fallback when
/// it is unset. With `json` set, log lines come out as newline-delimited
/// JSON for aggregation pipelines. Idempotent: only the first call in a
/// process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}

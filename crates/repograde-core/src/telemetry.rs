//! Tracing setup for the `repograde` binary and test harnesses.
//!
//! The CLI calls [`init_tracing`] from `main` with `--log-json` and
//! `--verbose`; `RUST_LOG` overrides the level. Logs always go to stderr so
//! `repograde run --json` keeps stdout for the report. Later calls are
//! ignored because the global subscriber can only be set once per process.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber: JSON lines when `json` is set, otherwise
/// human-readable output, filtered at `level` unless `RUST_LOG` is present.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(layer.json()).try_init().ok();
    } else {
        registry.with(layer).try_init().ok();
    }
}

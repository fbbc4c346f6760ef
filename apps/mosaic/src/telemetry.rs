//! Log output for the headless driver. Logs go to stderr so `--json` frame
//! reports keep stdout to themselves.

use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Directive used when the configured filter does not parse.
pub const FALLBACK_FILTER: &str = "warn,mosaic=info,mosaic_engine=info";

/// Install the global subscriber. Returns false when one was already set;
/// the existing subscriber is kept.
pub fn init_tracing(filter: &str) -> bool {
    let (env_filter, rejected) = match EnvFilter::try_new(filter) {
        Ok(env_filter) => (env_filter, None),
        Err(err) => (EnvFilter::new(FALLBACK_FILTER), Some(err)),
    };
    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .with_writer(std::io::stderr);
    let installed = Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_ok();
    if let Some(err) = rejected {
        warn!(filter, error = %err, fallback = FALLBACK_FILTER, "log filter rejected");
    }
    installed
}

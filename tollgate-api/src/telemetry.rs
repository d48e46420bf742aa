//! Tracing-subscriber initialization. No metrics exporter, no distributed
//! tracing collector: structured logs only, to stdout, in either the
//! human-readable or JSON format selected by configuration.

use tracing_subscriber::{fmt, EnvFilter};

pub fn init(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        fmt().with_env_filter(filter).json().with_current_span(false).init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}

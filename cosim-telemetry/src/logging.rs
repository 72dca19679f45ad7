//! ## cosim-telemetry::logging
//! **Structured logging with `tracing`**
//!
//! Library crates only emit events; binaries install the subscriber once
//! through [`LinkLogger::init`].

use tracing::info_span;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone)]
pub struct LinkLogger;

impl LinkLogger {
    /// Installs a global fmt subscriber. `RUST_LOG` wins over `default_filter`.
    ///
    /// Returns `false` if a subscriber was already installed.
    pub fn init(default_filter: &str) -> bool {
        fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new(default_filter)),
            )
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE)
            .try_init()
            .is_ok()
    }

    /// Logs a link lifecycle transition inside a span naming the link.
    #[inline]
    pub fn link_event(link: &str, event: &str) {
        let span = info_span!("link", path = link);
        let _guard = span.enter();
        tracing::info!(event, "link state changed");
    }
}

//! Tracing subscriber setup.
//!
//! `RUST_LOG` drives the fmt layer. Setting `WAVETRACE_TRACE=1` additionally
//! records a Chrome trace (`trace.json`) that can be opened in `chrome://tracing`
//! or Perfetto; keep the returned guard alive until exit so the file is flushed.

use std::sync::Once;

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Guard returned by [`init`]; flushes the Chrome trace on drop.
#[cfg(feature = "chrome-trace")]
pub type TraceGuard = Option<tracing_chrome::FlushGuard>;
#[cfg(not(feature = "chrome-trace"))]
pub type TraceGuard = Option<()>;

/// Install the global subscriber. `default_level` is used when `RUST_LOG` is unset.
///
/// Subsequent calls are no-ops and return `None`.
pub fn init(default_level: &str) -> TraceGuard {
    let mut guard = None;
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level));
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_names(true);

        #[cfg(feature = "chrome-trace")]
        {
            if std::env::var("WAVETRACE_TRACE").ok().as_deref() == Some("1") {
                let (chrome_layer, flush) = tracing_chrome::ChromeLayerBuilder::new()
                    .file("trace.json")
                    .include_args(true)
                    .build();
                let subscriber = tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer)
                    .with(chrome_layer);
                if tracing::subscriber::set_global_default(subscriber).is_ok() {
                    guard = Some(flush);
                }
                return;
            }
        }

        let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
    guard
}

/// Map the CLI verbosity flags onto a filter directive.
pub fn level_for(verbosity: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for() {
        assert_eq!(level_for(0, false), "warn");
        assert_eq!(level_for(1, false), "info");
        assert_eq!(level_for(5, false), "trace");
        assert_eq!(level_for(2, true), "error");
    }

    #[test]
    fn test_init_is_idempotent() {
        let _first = init("warn");
        let second = init("debug");
        assert!(second.is_none());
    }
}

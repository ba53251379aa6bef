//! Subscriber bootstrap for binaries and benchmark drivers.
//!
//! Library crates only emit `tracing` events; whoever owns `main` calls
//! [`init_tracing`] once. Output goes to stderr so it never mixes with a
//! benchmark report on stdout.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing_chrome::{ChromeLayerBuilder, FlushGuard};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

pub const CHROME_TRACE: &str = "STM_TRACE_CHROME";

pub const DEFAULT_FILTER: &str = "info";

static INSTALLED: AtomicBool = AtomicBool::new(false);
static CHROME_GUARD: Mutex<Option<FlushGuard>> = Mutex::new(None);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceOptions {
    /// Filter used when `RUST_LOG` is unset or invalid.
    pub default_filter: String,
    /// Chrome trace file, written in addition to the stderr log.
    pub chrome_trace: Option<PathBuf>,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            default_filter: DEFAULT_FILTER.to_string(),
            chrome_trace: None,
        }
    }
}

impl TraceOptions {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let chrome_trace = lookup(CHROME_TRACE)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map(PathBuf::from);
        Self {
            chrome_trace,
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("tracing has already been initialised")]
    AlreadyInitialised,
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(String),
}

/// Installs the process subscriber from `RUST_LOG` and `STM_TRACE_CHROME`.
pub fn init_tracing() -> Result<(), InitError> {
    init_tracing_with(TraceOptions::from_env())
}

pub fn init_tracing_with(options: TraceOptions) -> Result<(), InitError> {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return Err(InitError::AlreadyInitialised);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&options.default_filter));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal());
    let (chrome_layer, guard) = match options.chrome_trace {
        Some(path) => {
            let (layer, guard) = ChromeLayerBuilder::new()
                .file(path)
                .include_args(true)
                .build();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .with(chrome_layer)
        .try_init()
        .map_err(|err| InitError::Subscriber(err.to_string()))?;
    *CHROME_GUARD.lock().unwrap_or_else(PoisonError::into_inner) = guard;
    Ok(())
}

/// Writes out and closes the Chrome trace file, if one is open.
pub fn flush_chrome_trace() {
    CHROME_GUARD
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_chrome_path_disables_the_trace_file() {
        let options = TraceOptions::from_lookup(|_| Some("  ".to_string()));
        assert_eq!(options, TraceOptions::default());
        let options = TraceOptions::from_lookup(|key| {
            (key == CHROME_TRACE).then(|| "bench.json".to_string())
        });
        assert_eq!(options.chrome_trace, Some(PathBuf::from("bench.json")));
        assert_eq!(options.default_filter, DEFAULT_FILTER);
    }

    #[test]
    fn subscriber_installs_once() {
        let _ = init_tracing_with(TraceOptions::default());
        assert!(matches!(
            init_tracing_with(TraceOptions::default()),
            Err(InitError::AlreadyInitialised)
        ));
        flush_chrome_trace();
    }
}

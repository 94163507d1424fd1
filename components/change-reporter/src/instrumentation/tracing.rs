// External crates
use std::{io, panic};
use tracing::error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_error::{ErrorLayer, SpanTrace};
use tracing_subscriber::{
    filter::EnvFilter,
    fmt,
    prelude::*,
    registry::Registry,
    reload,
};

/// Filter used until `--debug` is seen (overridable through `RUST_LOG`).
const DEFAULT_DIRECTIVE: &str = "info";

fn debug_directive() -> String {
    format!("{}=debug,info", env!("CARGO_CRATE_NAME"))
}

/// Handle to the active log filter.
///
/// Settings resolution receives this instead of reading a global debug flag,
/// so `--debug` raises verbosity for every step that follows it.
#[derive(Debug, Clone)]
pub struct LogControl {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LogControl {
    pub fn new(handle: reload::Handle<EnvFilter, Registry>) -> Self {
        Self { handle }
    }

    /// Switch this crate's events to DEBUG.
    pub fn enable_debug(&self) {
        if let Err(e) = self.handle.reload(EnvFilter::new(debug_directive())) {
            eprintln!("ERROR: could not enable debug output: {e}");
        }
    }
}

/// Install the global subscriber, writing to stderr.
///
/// The returned guard flushes the non-blocking writer on drop and must live
/// until the process exits.
pub fn init_tracing() -> anyhow::Result<(LogControl, WorkerGuard)> {
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(io::stderr());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
    let (filter, handle) = reload::Layer::new(filter);

    let fmt_layer = fmt::layer()
        .with_writer(non_blocking_writer)
        .with_ansi(false)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let subscriber = Registry::default()
        .with(filter)
        .with(fmt_layer)
        .with(ErrorLayer::default());

    tracing::subscriber::set_global_default(subscriber)?;

    Ok((LogControl::new(handle), guard))
}

pub fn init_panic_handler() {
    panic::set_hook(Box::new(|panic_info| {
        let msg = match panic_info.payload().downcast_ref::<&str>() {
            Some(s) => *s,
            None => match panic_info.payload().downcast_ref::<String>() {
                Some(s) => s.as_str(),
                None => "Unknown panic",
            },
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());

        // Populated by the ErrorLayer installed in `init_tracing`.
        let span_trace = SpanTrace::capture();

        error!(
            message = %msg,
            location = %location,
            span_trace = %span_trace,
            "Change reporter panicked!"
        );
    }));
}

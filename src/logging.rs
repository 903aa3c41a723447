//! Structured logging, threaded into every long-lived handle the way
//! `flux::logging` is threaded through `neutronium`'s `Channel`/`Endpoint`.

pub use slog::{debug, error, info, o, trace, warn, Discard, Logger};

use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Builds the default terminal logger (debug level, stderr). Used when a
/// caller constructs a `Context` without supplying their own `Logger`.
pub fn root_logger() -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(Severity::Debug);
    builder.destination(Destination::Stderr);

    builder
        .build()
        .unwrap_or_else(|_| Logger::root(Discard, o!()))
}

/// A logger that discards everything. Used internally as the ultimate
/// fallback and by tests that don't want log noise.
pub fn discard_logger() -> Logger {
    Logger::root(Discard, o!())
}

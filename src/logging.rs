//! Logging setup and verbose console helpers for the CLI.
//!
//! Library code emits `tracing` events; the CLI installs a subscriber that
//! writes them to stderr so observations on stdout stay clean.

use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Install the global subscriber. `RUST_LOG` wins over the verbosity flag.
pub fn init(verbose: bool) {
    set_verbose(verbose);

    let default_filter = if verbose {
        "info,notebook_exec=debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .with_file(false)
        .with_line_number(false);

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

/// Enable or disable verbose logging output.
pub fn set_verbose(enabled: bool) {
    VERBOSE.store(enabled, Ordering::SeqCst);
}

/// Check whether verbose logging is enabled.
#[must_use]
pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::SeqCst)
}

/// Emit a verbose info message (no-op when verbosity is disabled).
pub fn info(message: impl AsRef<str>) {
    if is_verbose() {
        eprintln!("{} {}", "info".blue().bold(), message.as_ref());
    }
}

/// Emit a warning; always shown.
pub fn warn(message: impl AsRef<str>) {
    eprintln!("{} {}", "warn".yellow().bold(), message.as_ref());
}

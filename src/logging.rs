//! Structured diagnostics, replacing the source's `if (!quiet) printf(...)`.
//!
//! Not installed when daemonizing — standard streams are about to be closed,
//! so there is nowhere for the logs to go.

use tracing_subscriber::EnvFilter;

use crate::args::Config;

pub fn init(config: &Config) {
    if config.daemonize {
        return;
    }

    let level = if config.quiet {
        "warn"
    } else if config.verbose {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

/// Caret-escape control bytes for a trace-level traffic dump, in the manner
/// of the source's `putesc`.
pub fn putesc(buf: &[u8]) -> String {
    let mut out = String::with_capacity(buf.len());
    for &b in buf {
        if b < 0x20 {
            out.push('^');
            out.push((b | 0x40) as char);
        } else if b < 0x7f {
            out.push(b as char);
        } else {
            out.push('.');
        }
    }
    out
}

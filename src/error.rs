//! Startup-path error type.
//!
//! Steady-state failures inside the event loop are not routed through this
//! enum — per the shutdown design they're handled inline by taking the
//! shutdown path directly (see `server::run`).

use std::path::PathBuf;

use nix::errno::Errno;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("--verbose and --quiet are mutually exclusive")]
    InvalidArgs,

    #[error("bind({addr:?}) failed: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("chdir({path:?}) failed: {source}")]
    Chdir {
        path: PathBuf,
        #[source]
        source: Errno,
    },

    #[error("openpty failed: {0}")]
    OpenPty(#[source] Errno),

    #[error("fork failed: {0}")]
    Fork(#[source] Errno),

    #[error("setsid failed: {0}")]
    Setsid(#[source] Errno),

    #[error("sigaction failed: {0}")]
    Signal(#[source] Errno),
}

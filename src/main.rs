//! pty-broker: a multiplexing PTY broker.
//!
//! Hosts one program on a pseudo-terminal and lets any number of clients
//! attach to, detach from, and share that session. See `server::run` for
//! the event loop and `SPEC_FULL.md` for the full contract.

mod address;
mod args;
mod child;
mod codec;
mod daemon;
mod error;
mod logging;
mod replay;
mod server;
mod winsize;

use clap::Parser;

use crate::args::{Args, Config};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config: Config = args.try_into()?;

    if config.daemonize {
        daemon::daemonize()?;
    }

    logging::init(&config);

    server::run(config)?;
    Ok(())
}

//! Command-line parsing, in the manner of `desktop-tui`'s `src/args.rs`.
//!
//! This is deliberately kept separate from `Config`: `Args` is the raw shape
//! clap hands back, `Config` (in `lib`/`main`) is the validated, immutable
//! value the rest of the broker is built from.

use std::path::PathBuf;

use clap::Parser;

use crate::error::BrokerError;

#[derive(Parser, Debug)]
#[command(name = "pty-broker", version, about = "Multiplexing PTY broker", long_about = None)]
pub struct Args {
    /// Session identifier: a filesystem path (local socket) or host:port (TCP)
    pub session: String,

    /// Program to host, followed by its arguments
    #[arg(required = true, trailing_var_arg = true)]
    pub program: Vec<String>,

    /// Change to this directory before forking the program
    #[arg(long)]
    pub chdir: Option<PathBuf>,

    /// Double-fork and detach from the controlling terminal
    #[arg(long)]
    pub daemonize: bool,

    /// Emit trace-level traffic dumps in addition to info-level logs
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress all logging
    #[arg(short, long)]
    pub quiet: bool,

    /// Keep a replay log of program output for late-attaching clients
    #[arg(long)]
    pub replay: bool,
}

/// Immutable, validated configuration derived from `Args`. Constructed once
/// at startup and never mutated.
#[derive(Debug, Clone)]
pub struct Config {
    pub session: String,
    pub program: String,
    pub program_args: Vec<String>,
    pub chdir: Option<PathBuf>,
    pub daemonize: bool,
    pub verbose: bool,
    pub quiet: bool,
    pub replay: bool,
}

impl TryFrom<Args> for Config {
    type Error = BrokerError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        if args.verbose && args.quiet {
            return Err(BrokerError::InvalidArgs);
        }
        let mut program_args = args.program;
        let program = program_args.remove(0);
        Ok(Config {
            session: args.session,
            program,
            program_args,
            chdir: args.chdir,
            daemonize: args.daemonize,
            verbose: args.verbose,
            quiet: args.quiet,
            replay: args.replay,
        })
    }
}

//! Daemonization: double-fork, detach from the controlling terminal, close
//! standard streams.
//!
//! Grounded on the teacher's own fork/setsid sequence (`pty-proxy` forks
//! once and calls `setsid` in the child to detach it from the controlling
//! terminal before exec'ing the shell); here the same shape is used twice
//! (double-fork) so the grandchild can never reacquire a controlling tty.

use std::os::fd::AsRawFd;

use nix::sys::stat::{umask, Mode};
use nix::unistd::{chdir, fork, setsid, ForkResult};

use crate::error::BrokerError;

/// Detach the current process into a background daemon. Returns in the
/// grandchild only; the original process and the intermediate child exit.
pub fn daemonize() -> Result<(), BrokerError> {
    match unsafe { fork() }.map_err(BrokerError::Fork)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    setsid().map_err(BrokerError::Setsid)?;

    match unsafe { fork() }.map_err(BrokerError::Fork)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    chdir("/").map_err(|source| BrokerError::Chdir {
        path: "/".into(),
        source,
    })?;
    umask(Mode::empty());

    redirect_stdio_to_null();

    Ok(())
}

fn redirect_stdio_to_null() {
    use nix::fcntl::{open, OFlag};
    use nix::sys::stat::Mode;
    use nix::unistd::dup2;

    let Ok(devnull) = open("/dev/null", OFlag::O_RDWR, Mode::empty()) else {
        return;
    };
    for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        let _ = dup2(devnull.as_raw_fd(), fd);
    }
}

//! Child lifecycle: fork the hosted program onto a fresh PTY, track its
//! PID, reap it on shutdown.
//!
//! Grounded directly on the teacher's fork/PTY/exec sequence in `main()`
//! (`openpty`, manual `fork`, `setsid` + `TIOCSCTTY` + `dup2` in the child,
//! `execvp`), generalized from "exec the user's shell" to "exec the
//! requested program and argv" and extended with the EXERR report the
//! distilled spec adds for exec failures.

use std::ffi::CString;
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};

use nix::libc::{STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::pty::{openpty, OpenptyResult};
use nix::unistd::{dup2, execvp, fork, setsid, write, ForkResult, Pid};

use crate::codec;
use crate::error::BrokerError;

/// Forks `program` (with `args`) onto a fresh PTY sized to `initial_size`.
/// Returns the PTY master (owned by the caller) and the child's PID.
pub fn spawn(
    program: &str,
    args: &[String],
    initial_size: (u16, u16),
) -> Result<(OwnedFd, Pid), BrokerError> {
    let OpenptyResult { master, slave } = openpty(None, None).map_err(BrokerError::OpenPty)?;
    let slave_fd = slave.as_raw_fd();

    set_pty_size(slave_fd, initial_size);

    match unsafe { fork() }.map_err(BrokerError::Fork)? {
        ForkResult::Child => {
            drop(master);
            run_child(slave, slave_fd, program, args)
        }
        ForkResult::Parent { child } => {
            drop(slave);
            set_pty_size(master.as_raw_fd(), initial_size);
            Ok((master, child))
        }
    }
}

/// Runs in the forked child. Never returns: either `execvp` succeeds and
/// the process image is replaced, or it reports the failure and exits 127.
fn run_child(slave: OwnedFd, slave_fd: RawFd, program: &str, args: &[String]) -> ! {
    let _ = setsid();
    unsafe {
        libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0);
    }

    dup2(slave_fd, STDIN_FILENO).ok();
    dup2(slave_fd, STDOUT_FILENO).ok();
    dup2(slave_fd, STDERR_FILENO).ok();

    if slave_fd > STDERR_FILENO {
        drop(slave);
    } else {
        // the fd is one of our freshly-dup'd stdio descriptors now; release
        // ownership without closing it.
        let _ = slave.into_raw_fd();
    }

    let Ok(program_cstr) = CString::new(program) else {
        std::process::exit(127);
    };
    let mut argv = vec![program_cstr.clone()];
    for a in args {
        if let Ok(c) = CString::new(a.as_str()) {
            argv.push(c);
        }
    }

    if let Err(e) = execvp(&program_cstr, &argv) {
        let errno = e as i32;
        let report = codec::encode_exerr(errno);
        let _ = write(unsafe { std::os::fd::BorrowedFd::borrow_raw(STDERR_FILENO) }, &report);
        std::process::exit(127);
    }

    unreachable!("execvp replaced the process image or exited above");
}

fn set_pty_size(fd: RawFd, size: (u16, u16)) {
    let ws = libc::winsize {
        ws_col: size.0,
        ws_row: size.1,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    unsafe {
        libc::ioctl(fd, libc::TIOCSWINSZ, &ws);
    }
}

/// Applies a window-size change to the PTY master. Unlike the best-effort
/// `set_pty_size` used before fork, a failure here is fatal to the server
/// (per the reconciler's contract), so the ioctl's return value is checked.
pub fn set_master_size(master_fd: RawFd, size: (u16, u16)) -> nix::Result<()> {
    let ws = libc::winsize {
        ws_col: size.0,
        ws_row: size.1,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let ret = unsafe { libc::ioctl(master_fd, libc::TIOCSWINSZ, &ws) };
    if ret == 0 {
        Ok(())
    } else {
        Err(nix::errno::Errno::last())
    }
}

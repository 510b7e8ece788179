//! Event loop and fan-out, plus the shutdown coordinator.
//!
//! Grounded on the original source's `server()` function (single `poll`
//! over a fixed fd table, clients-then-program-then-accept ordering,
//! in-place compaction on client removal) and its `cleanup()` signal
//! handler, recast per the redesign note in §9 of the spec: the signal
//! handler only flips an atomic flag (installed with `SA_RESETHAND` so a
//! second identical signal kills the process outright, per §4.7), and the
//! main loop performs the actual teardown once it observes the flag.

use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{kill, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::address::{ClientStream, Listener};
use crate::args::Config;
use crate::child;
use crate::codec::{self, Event};
use crate::error::BrokerError;
use crate::logging::putesc;
use crate::replay::ReplayLog;
use crate::winsize;

/// Client slots: `N - 2` in the source's `IDX_COUNT - IDX_CLIS` terms,
/// where the two reserved slots are the listening socket and the PTY
/// master.
const MAX_CLIENTS: usize = 6;
const BUF_SIZE: usize = 65535;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_shutdown_signal(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() -> Result<(), BrokerError> {
    let action = SigAction::new(
        SigHandler::Handler(handle_shutdown_signal),
        SaFlags::SA_RESETHAND,
        SigSet::empty(),
    );
    unsafe {
        sigaction(Signal::SIGINT, &action).map_err(BrokerError::Signal)?;
        sigaction(Signal::SIGTERM, &action).map_err(BrokerError::Signal)?;
    }
    Ok(())
}

struct ClientConn {
    stream: ClientStream,
    cols: u16,
    rows: u16,
}

/// Why the event loop stopped.
enum LoopExit {
    /// The PTY hung up or EOF'd: the hosted program is done on its own.
    ProgramDone,
    /// A client sent the TERM escape.
    ClientTerm,
    /// SIGINT/SIGTERM arrived.
    Signal,
    /// An unrecoverable syscall failure.
    Error(String),
}

struct Broker {
    listener: Listener,
    sock_path: Option<PathBuf>,
    master: OwnedFd,
    child: Pid,
    clients: Vec<ClientConn>,
    reconciled: (u16, u16),
    alt_screen: bool,
    replay: Option<ReplayLog>,
}

pub fn run(config: Config) -> Result<(), BrokerError> {
    install_signal_handlers()?;

    if let Some(dir) = &config.chdir {
        nix::unistd::chdir(dir.as_path()).map_err(|source| BrokerError::Chdir {
            path: dir.clone(),
            source,
        })?;
    }

    let initial_size = (winsize::FALLBACK_COLS, winsize::FALLBACK_ROWS);
    let (master, child) = child::spawn(&config.program, &config.program_args, initial_size)?;
    set_nonblocking(master.as_raw_fd());

    let (listener, sock_path) = Listener::bind(&config.session, (MAX_CLIENTS) as i32)?;

    tracing::info!(session = %config.session, program = %config.program, "listening");

    let mut broker = Broker {
        listener,
        sock_path,
        master,
        child,
        clients: Vec::new(),
        reconciled: initial_size,
        alt_screen: false,
        replay: config.replay.then(ReplayLog::new),
    };

    let exit = broker.event_loop();
    broker.shutdown(exit);
    Ok(())
}

impl Broker {
    fn event_loop(&mut self) -> LoopExit {
        let mut buf = [0u8; BUF_SIZE];

        loop {
            if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
                return LoopExit::Signal;
            }

            let include_listener = self.clients.len() < MAX_CLIENTS;

            let master_raw = self.master.as_raw_fd();
            let mut poll_fds: Vec<PollFd> =
                Vec::with_capacity(2 + self.clients.len());
            poll_fds.push(PollFd::new(
                unsafe { BorrowedFd::borrow_raw(master_raw) },
                PollFlags::POLLIN,
            ));
            for c in &self.clients {
                poll_fds.push(PollFd::new(
                    unsafe { BorrowedFd::borrow_raw(c.stream.as_raw_fd()) },
                    PollFlags::POLLIN,
                ));
            }
            let listener_raw = self.listener.as_raw_fd();
            if include_listener {
                poll_fds.push(PollFd::new(
                    unsafe { BorrowedFd::borrow_raw(listener_raw) },
                    PollFlags::POLLIN,
                ));
            }

            match poll(&mut poll_fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return LoopExit::Error(format!("poll: {e}")),
            }

            // --- clients first ---
            if let Some(exit) = self.handle_clients(&mut poll_fds, &mut buf) {
                return exit;
            }

            // --- PTY hang-up second, PTY readable third ---
            let master_revents = poll_fds[0].revents().unwrap_or_else(PollFlags::empty);
            if master_revents.contains(PollFlags::POLLHUP) {
                return LoopExit::ProgramDone;
            }
            if master_revents.contains(PollFlags::POLLIN) {
                if let Some(exit) = self.handle_master_readable(&mut buf) {
                    return exit;
                }
            }

            // --- new connection last ---
            if include_listener {
                let idx = poll_fds.len() - 1;
                let revents = poll_fds[idx].revents().unwrap_or_else(PollFlags::empty);
                if revents.contains(PollFlags::POLLIN) {
                    if let Err(e) = self.admit_client() {
                        tracing::warn!(error = %e, "failed to admit new client");
                    }
                }
            }
        }
    }

    /// Reads and dispatches input from every client that has data or hung
    /// up; returns `Some(exit)` if the loop should stop.
    fn handle_clients(&mut self, poll_fds: &mut [PollFd], buf: &mut [u8]) -> Option<LoopExit> {
        let revents: Vec<PollFlags> = (0..self.clients.len())
            .map(|k| poll_fds[1 + k].revents().unwrap_or_else(PollFlags::empty))
            .collect();

        let mut to_remove = Vec::new();
        let mut term_requested = false;
        let mut geometry_changed = false;

        for (idx, ev) in revents.iter().enumerate() {
            if ev.contains(PollFlags::POLLIN) {
                match self.clients[idx].stream.read(buf) {
                    Ok(0) => {
                        to_remove.push(idx);
                        continue;
                    }
                    Ok(n) => {
                        tracing::trace!(fd = self.clients[idx].stream.as_raw_fd(), bytes = n, data = %putesc(&buf[..n]), "client input");
                        let scanned = codec::scan(&buf[..n]);
                        for event in scanned.events {
                            match event {
                                Event::Term => term_requested = true,
                                Event::Winsize(cols, rows) => {
                                    self.clients[idx].cols = cols;
                                    self.clients[idx].rows = rows;
                                    geometry_changed = true;
                                }
                                Event::AltEnter | Event::AltLeave | Event::ExecErr(_) => {}
                            }
                        }
                        if !scanned.residual.is_empty()
                            && self.write_master(&scanned.residual).is_err()
                        {
                            return Some(LoopExit::Error(
                                "write to pty master failed".to_string(),
                            ));
                        }
                    }
                    Err(e) if would_retry(&e) => {}
                    Err(_) => {
                        to_remove.push(idx);
                        continue;
                    }
                }
            }
            if ev.contains(PollFlags::POLLHUP) && !to_remove.contains(&idx) {
                to_remove.push(idx);
            }
        }

        if term_requested {
            return Some(LoopExit::ClientTerm);
        }

        let had_removal = !to_remove.is_empty();
        to_remove.sort_unstable();
        for idx in to_remove.into_iter().rev() {
            tracing::debug!(fd = self.clients[idx].stream.as_raw_fd(), "client detached");
            self.clients.remove(idx);
        }

        if had_removal || geometry_changed {
            if let Err(e) = self.reconcile_and_apply() {
                return Some(LoopExit::Error(format!("ioctl(TIOCSWINSZ): {e}")));
            }
        }

        None
    }

    fn handle_master_readable(&mut self, buf: &mut [u8]) -> Option<LoopExit> {
        match nix::unistd::read(self.master.as_raw_fd(), buf) {
            Ok(0) => Some(LoopExit::ProgramDone),
            Ok(n) => {
                tracing::trace!(bytes = n, data = %putesc(&buf[..n]), "program output");
                let scanned = codec::scan(&buf[..n]);
                for event in &scanned.events {
                    match event {
                        Event::AltEnter => {
                            self.alt_screen = true;
                            tracing::debug!("entering alt screen");
                        }
                        Event::AltLeave => {
                            self.alt_screen = false;
                            tracing::debug!("leaving alt screen");
                        }
                        Event::ExecErr(errno) => {
                            tracing::warn!(errno = *errno, "program failed to start");
                        }
                        Event::Term | Event::Winsize(..) => {}
                    }
                }

                if let Some(replay) = &mut self.replay {
                    replay.append(&scanned.residual);
                }

                for client in &mut self.clients {
                    if client.stream.write_all(&scanned.residual).is_err() {
                        return Some(LoopExit::Error("write to client failed".to_string()));
                    }
                }
                None
            }
            Err(e) if would_retry_errno(e) => None,
            Err(e) => Some(LoopExit::Error(format!("read from pty master: {e}"))),
        }
    }

    fn admit_client(&mut self) -> io::Result<()> {
        let mut stream = self.listener.accept()?;
        tracing::info!(fd = stream.as_raw_fd(), "client attached");

        if let Some(replay) = &self.replay {
            replay.stream_to(&mut stream)?;
        } else if self.alt_screen {
            stream.write_all(&codec::encode_alt_enter())?;
        }

        self.clients.push(ClientConn {
            stream,
            cols: self.reconciled.0,
            rows: self.reconciled.1,
        });

        if self.reconcile_and_apply().is_err() {
            tracing::warn!("window-size reconciliation failed after attach");
        }
        Ok(())
    }

    fn reconcile_and_apply(&mut self) -> nix::Result<()> {
        let sizes: Vec<(u16, u16)> = self.clients.iter().map(|c| (c.cols, c.rows)).collect();
        let new = winsize::reconcile(&sizes);
        if new != self.reconciled {
            child::set_master_size(self.master.as_raw_fd(), new)?;
            self.reconciled = new;
            tracing::debug!(cols = new.0, rows = new.1, "window size reconciled");
        }
        Ok(())
    }

    /// Writes `data` to the PTY master, retrying to completion.
    fn write_master(&self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            match nix::unistd::write(
                unsafe { BorrowedFd::borrow_raw(self.master.as_raw_fd()) },
                data,
            ) {
                Ok(n) => data = &data[n..],
                Err(nix::errno::Errno::EINTR) => continue,
                Err(nix::errno::Errno::EAGAIN) => {
                    std::thread::sleep(Duration::from_micros(200));
                    continue;
                }
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
        Ok(())
    }

    /// Runs the shutdown coordinator (§4.7): unlink the socket, drop the
    /// replay log, reap the child with escalating signals, and hand each
    /// client its exit-code byte before closing.
    fn shutdown(&mut self, exit: LoopExit) {
        match &exit {
            LoopExit::ProgramDone => tracing::info!("program done"),
            LoopExit::ClientTerm => tracing::info!("client requested shutdown"),
            LoopExit::Signal => tracing::info!("signal received, shutting down"),
            LoopExit::Error(msg) => tracing::error!(error = %msg, "fatal error, shutting down"),
        }

        if let Some(path) = self.sock_path.take() {
            let _ = std::fs::remove_file(path);
        }

        self.replay = None;

        let externally_initiated = !matches!(exit, LoopExit::ProgramDone);
        let code = reap_with_escalation(self.child, externally_initiated);

        for client in &mut self.clients {
            let _ = client.stream.write_all(&[code]);
        }
        self.clients.clear();

        tracing::info!("done");
    }
}

fn reap_with_escalation(child: Pid, externally_initiated: bool) -> u8 {
    if externally_initiated {
        let _ = kill(child, Signal::SIGTERM);
        std::thread::sleep(Duration::from_secs(1));
    }

    let mut status = waitpid(child, Some(WaitPidFlag::WNOHANG));
    if matches!(status, Ok(WaitStatus::StillAlive)) {
        tracing::warn!("program is not stopping, sending SIGTERM again");
        let _ = kill(child, Signal::SIGTERM);
        std::thread::sleep(Duration::from_secs(3));
        status = waitpid(child, Some(WaitPidFlag::WNOHANG));
        if matches!(status, Ok(WaitStatus::StillAlive)) {
            tracing::warn!("program still not stopping, killing");
            let _ = kill(child, Signal::SIGKILL);
            status = waitpid(child, None);
        }
    }

    match status {
        Ok(WaitStatus::Exited(_, code)) => code as u8,
        _ => 0,
    }
}

fn set_nonblocking(fd: RawFd) {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    if let Ok(flags) = fcntl(fd, FcntlArg::F_GETFL) {
        let new_flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        let _ = fcntl(fd, FcntlArg::F_SETFL(new_flags));
    }
}

fn would_retry(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn would_retry_errno(e: nix::errno::Errno) -> bool {
    matches!(e, nix::errno::Errno::EAGAIN | nix::errno::Errno::EINTR)
}

//! Address resolver: identifies a session identifier's address family and
//! produces a bound, listening socket for it.
//!
//! Grounded on the source's `bind_local_socket` (local-domain bind + listen,
//! unlink deferred to the caller) generalized to also cover TCP, which the
//! distilled spec adds on top of the original's Unix-only design.

use std::io;
use std::net::{TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;

use crate::error::BrokerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Local,
    Tcp,
}

/// Inspects the identifier shape: `host:port` (non-empty host, all-digit
/// port) is TCP, everything else is a local filesystem path.
pub fn identify(id: &str) -> AddressKind {
    if let Some((host, port)) = id.rsplit_once(':') {
        if !host.is_empty() && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
            return AddressKind::Tcp;
        }
    }
    AddressKind::Local
}

pub enum Listener {
    Local(UnixListener),
    Tcp(TcpListener),
}

impl Listener {
    /// Binds and listens on `id`. For a local socket, the caller gets back
    /// the path to unlink on shutdown; `bind` itself never removes a
    /// pre-existing path.
    pub fn bind(id: &str, backlog: i32) -> Result<(Listener, Option<PathBuf>), BrokerError> {
        match identify(id) {
            AddressKind::Local => {
                let listener = UnixListener::bind(id).map_err(|source| BrokerError::Bind {
                    addr: id.to_string(),
                    source,
                })?;
                Ok((Listener::Local(listener), Some(PathBuf::from(id))))
            }
            AddressKind::Tcp => {
                let listener = TcpListener::bind(id).map_err(|source| BrokerError::Bind {
                    addr: id.to_string(),
                    source,
                })?;
                // std's TcpListener doesn't expose a backlog knob; the OS
                // default is used, matching the simplicity of the `listen`
                // call in the source (backlog is advisory anyway).
                let _ = backlog;
                Ok((Listener::Tcp(listener), None))
            }
        }
    }

    pub fn accept(&self) -> io::Result<ClientStream> {
        match self {
            Listener::Local(l) => l.accept().map(|(s, _)| ClientStream::Local(s)),
            Listener::Tcp(l) => l.accept().map(|(s, _)| {
                let _ = s.set_nodelay(true);
                ClientStream::Tcp(s)
            }),
        }
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Listener::Local(l) => l.as_raw_fd(),
            Listener::Tcp(l) => l.as_raw_fd(),
        }
    }
}

pub enum ClientStream {
    Local(UnixStream),
    Tcp(TcpStream),
}

impl io::Read for ClientStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ClientStream::Local(s) => s.read(buf),
            ClientStream::Tcp(s) => s.read(buf),
        }
    }
}

impl io::Write for ClientStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ClientStream::Local(s) => s.write(buf),
            ClientStream::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ClientStream::Local(s) => s.flush(),
            ClientStream::Tcp(s) => s.flush(),
        }
    }
}

impl AsRawFd for ClientStream {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            ClientStream::Local(s) => s.as_raw_fd(),
            ClientStream::Tcp(s) => s.as_raw_fd(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifies_tcp_shape() {
        assert_eq!(identify("127.0.0.1:9000"), AddressKind::Tcp);
        assert_eq!(identify("localhost:80"), AddressKind::Tcp);
    }

    #[test]
    fn identifies_local_path_shape() {
        assert_eq!(identify("/tmp/my.sock"), AddressKind::Local);
        assert_eq!(identify("./relative.sock"), AddressKind::Local);
        assert_eq!(identify("no-colon-at-all"), AddressKind::Local);
    }

    #[test]
    fn rejects_non_numeric_port_as_local() {
        // host:port shape but port isn't numeric -- treat the whole thing
        // as a path (it could legitimately contain a colon).
        assert_eq!(identify("weird:path"), AddressKind::Local);
    }

    #[test]
    fn empty_host_is_not_tcp() {
        assert_eq!(identify(":9000"), AddressKind::Local);
    }
}

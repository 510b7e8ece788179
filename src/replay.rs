//! Session-replay cache: an append-only byte log of program output, used
//! to bring late-attaching clients up to speed.
//!
//! The source has no equivalent (the C broker's only concession to late
//! joiners is re-sending the alt-screen enter sequence); this module is
//! grounded on the distilled spec's §4.4 and kept as the simplest possible
//! structure that satisfies it -- an unbounded `Vec<u8>`, per the explicit
//! "unbounded replay log" design note.

use std::io::{self, Write};

#[derive(Debug, Default)]
pub struct ReplayLog {
    buf: Vec<u8>,
}

impl ReplayLog {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Streams the entire recorded log to `w`. Called once, on attach,
    /// before the new client rejoins ordinary fan-out.
    pub fn stream_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.buf)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_exactly_what_was_appended() {
        let mut log = ReplayLog::new();
        log.append(b"A");
        log.append(b"B");
        log.append(b"C");

        let mut out = Vec::new();
        log.stream_to(&mut out).unwrap();
        assert_eq!(out, b"ABC");
    }

    #[test]
    fn empty_log_streams_nothing() {
        let log = ReplayLog::new();
        assert!(log.is_empty());
        let mut out = Vec::new();
        log.stream_to(&mut out).unwrap();
        assert!(out.is_empty());
    }
}

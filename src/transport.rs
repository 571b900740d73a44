//! The byte-stream transport the core consumes.
//!
//! TCP dialing and TLS negotiation happen upstream of this crate; a
//! `Transport` here is just whatever already-connected duplex byte stream the
//! caller dialed.

use std::io::{self, Read, Write};

/// A bidirectional byte stream `Connection` drives the protocol over.
///
/// Implemented for anything that is `Read + Write`; callers supply an
/// already-connected `TcpStream`, a TLS stream, a Unix socket, or a test
/// double.
pub trait Transport {
    /// Read at least one byte into `buf`, returning the number of bytes read.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the entirety of `buf`.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Close the transport. Idempotent.
    fn close(&mut self) -> io::Result<()>;
}

impl<S: Read + Write> Transport for S {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        Write::write_all(self, buf)
    }

    fn close(&mut self) -> io::Result<()> {
        // Flushing is the closest a generic `Write` gets to an explicit
        // close; the OS reclaims the socket when the transport is dropped.
        self.flush()
    }
}

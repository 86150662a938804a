//! Byte-stream transport contract.
//!
//! A transport moves raw bytes and reports `io::ErrorKind::WouldBlock`
//! instead of blocking. The record layer builds its suspend/resume points
//! on exactly that signal.

use std::io::{self, Read, Write};

/// Duplex byte stream under a connection.
pub trait Transport {
    /// Read up to `buf.len()` bytes. `Ok(0)` means end of stream.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write some prefix of `buf`, returning how much was accepted.
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Push buffered output to the peer.
    fn flush_output(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Abort the stream without an orderly shutdown. Transports that
    /// cannot express a reset treat this as a plain close.
    fn reset(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: Read + Write> Transport for T {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write(buf)
    }

    fn flush_output(&mut self) -> io::Result<()> {
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_blanket_impl_over_cursor() {
        let mut c = Cursor::new(Vec::new());
        assert_eq!(Transport::send(&mut c, b"abc").unwrap(), 3);
        c.set_position(0);
        let mut buf = [0u8; 8];
        assert_eq!(Transport::recv(&mut c, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(Transport::recv(&mut c, &mut buf).unwrap(), 0);
        assert!(c.reset().is_ok());
    }
}

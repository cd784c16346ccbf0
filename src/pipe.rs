use crate::protocol::{MessageId, ReadWire, WriteWire};
use crate::{ProtocolError, Result};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// Reliable, ordered, bidirectional byte stream to a device server.
///
/// Two handles onto the same stream let the background receiver read while
/// the caller's thread writes STOPSTREAM_REQUEST.
pub trait Connection: Read + Write + Send + Sized + 'static {
    /// Second handle onto the same underlying stream.
    fn split_handle(&self) -> io::Result<Self>;

    /// Wait up to `timeout` for readable data. `Ok(true)` also covers EOF,
    /// which the next read reports.
    fn wait_for_data(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Shut the stream down in both directions, waking any blocked reader.
    fn close(&self) -> io::Result<()>;
}

impl Connection for TcpStream {
    fn split_handle(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn wait_for_data(&mut self, timeout: Duration) -> io::Result<bool> {
        // A zero read timeout is rejected by the OS layer
        let timeout = timeout.max(Duration::from_millis(1));
        self.set_read_timeout(Some(timeout))?;
        let mut probe = [0u8; 1];
        let result = self.peek(&mut probe);
        self.set_read_timeout(None)?;
        match result {
            Ok(_) => Ok(true),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn close(&self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            // Already closed by the peer
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

/// Buffered read half of a device server connection.
pub struct MessageReader<C: Connection> {
    inner: BufReader<C>,
}

impl<C: Connection> MessageReader<C> {
    pub fn new(conn: C) -> Self {
        Self {
            inner: BufReader::new(conn),
        }
    }

    /// Wait for readable data, taking already-buffered bytes into account.
    pub fn wait_for_data(&mut self, timeout: Duration) -> Result<bool> {
        if !self.inner.buffer().is_empty() {
            return Ok(true);
        }
        Ok(self.inner.get_mut().wait_for_data(timeout)?)
    }

    pub fn read_message(&mut self) -> Result<MessageId> {
        let id = self.inner.read_message_id()?;
        log::trace!("<- {:?}", id);
        Ok(id)
    }

    /// Read the next tag and require it to be `expected`.
    pub fn expect_message(&mut self, expected: MessageId) -> Result<()> {
        let received = self.read_message()?;
        if received != expected {
            return Err(ProtocolError::UnexpectedMessage { expected, received });
        }
        Ok(())
    }

    /// Bytes received but not yet consumed.
    #[cfg(test)]
    pub(crate) fn buffered(&self) -> usize {
        self.inner.buffer().len()
    }
}

impl<C: Connection> Read for MessageReader<C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<C: Connection> BufRead for MessageReader<C> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt)
    }
}

/// Buffered write half of a device server connection.
///
/// Never flushes on its own; every request must be followed by `flush()`
/// before waiting for its reply.
pub struct MessageWriter<C: Connection> {
    inner: BufWriter<C>,
}

impl<C: Connection> MessageWriter<C> {
    pub fn new(conn: C) -> Self {
        Self {
            inner: BufWriter::new(conn),
        }
    }

    pub fn write_message(&mut self, id: MessageId) -> Result<()> {
        log::trace!("-> {:?}", id);
        self.inner.write_message_id(id)
    }

    /// Write a bare request tag and flush it out.
    pub fn send(&mut self, id: MessageId) -> Result<()> {
        self.write_message(id)?;
        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    /// Close the underlying stream in both directions.
    pub fn close(&self) -> Result<()> {
        self.inner.get_ref().close()?;
        Ok(())
    }
}

impl<C: Connection> Write for MessageWriter<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Split a connection into its read and write halves.
pub fn split<C: Connection>(conn: C) -> Result<(MessageReader<C>, MessageWriter<C>)> {
    let write_handle = conn.split_handle()?;
    Ok((MessageReader::new(conn), MessageWriter::new(write_handle)))
}

use std::{
    fs::File,
    io::{self, Read, Write},
    os::unix::prelude::{AsRawFd, RawFd},
    time::Duration,
};

use encoding_rs::Encoding;
use nix::{
    errno::Errno,
    poll::{poll, PollFd, PollFlags},
};

use crate::encoding::TextDecoder;

const READ_BUFFER_SIZE: usize = 2048;

/// A result of waiting for a child's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// A chunk of bytes was read.
    Data(usize),
    /// Nothing arrived in time.
    Timeout,
    /// The child closed its side of a pty.
    Eof,
}

/// A IO stream (write/read) of a pty master.
///
/// Everything read is decoded and kept in a pending buffer
/// until somebody consumes it.
pub struct PtyStream {
    file: File,
    decoder: TextDecoder,
    pending: String,
    eof: bool,
}

impl PtyStream {
    pub fn new(file: File, encoding: &'static Encoding) -> Self {
        Self {
            file,
            decoder: TextDecoder::new(encoding),
            pending: String::new(),
            eof: false,
        }
    }

    /// Waits until a chunk arrives but no longer than `timeout`.
    ///
    /// Returns the raw chunk as well, so it could be logged.
    pub fn fill(&mut self, timeout: Duration) -> io::Result<(Fill, String)> {
        if self.eof {
            return Ok((Fill::Eof, String::new()));
        }

        if !wait_readable(self.file.as_raw_fd(), timeout)? {
            return Ok((Fill::Timeout, String::new()));
        }

        let mut buf = [0; READ_BUFFER_SIZE];
        match self.file.read(&mut buf) {
            Ok(0) => Ok((Fill::Eof, self.finish())),
            Ok(n) => {
                let text = self.decoder.decode(&buf[..n], false);
                self.pending.push_str(&text);
                Ok((Fill::Data(n), text))
            }
            // Linux reports a closed slave side as EIO.
            Err(err) if err.raw_os_error() == Some(Errno::EIO as i32) => {
                Ok((Fill::Eof, self.finish()))
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok((Fill::Data(0), String::new())),
            Err(err) => Err(err),
        }
    }

    /// Reads raw bytes bypassing a decoder and a pending buffer.
    ///
    /// A closed slave side is reported as 0.
    pub(crate) fn read_raw(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.eof {
            return Ok(0);
        }

        match self.file.read(buf) {
            Ok(0) => {
                self.eof = true;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(err) if err.raw_os_error() == Some(Errno::EIO as i32) => {
                self.eof = true;
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }

    fn finish(&mut self) -> String {
        self.eof = true;
        let text = self.decoder.finish();
        self.pending.push_str(&text);
        text
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Removes `n` bytes from the front of a pending buffer.
    pub fn consume(&mut self, n: usize) -> String {
        self.pending.drain(..n).collect()
    }

    /// Takes everything from a pending buffer.
    pub fn take_pending(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }
}

impl Write for PtyStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl AsRawFd for PtyStream {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// Waits until `fd` has something to read.
///
/// A hang up counts as readable so a subsequent read could observe it.
pub(crate) fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let timeout = timeout.as_millis().min(i32::MAX as u128) as i32;
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    match poll(&mut fds, timeout) {
        Ok(0) => Ok(false),
        Ok(_) => Ok(true),
        Err(Errno::EINTR) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    fn pair() -> (PtyStream, UnixStream) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let file = File::from(std::os::fd::OwnedFd::from(ours));
        (PtyStream::new(file, encoding_rs::UTF_8), theirs)
    }

    #[test]
    fn fill_timeout() {
        let (mut stream, _peer) = pair();
        let (fill, text) = stream.fill(Duration::from_millis(10)).unwrap();
        assert_eq!(fill, Fill::Timeout);
        assert_eq!(text, "");
    }

    #[test]
    fn fill_data_and_consume() {
        let (mut stream, mut peer) = pair();
        peer.write_all(b"user_id: ").unwrap();

        let (fill, text) = stream.fill(Duration::from_secs(1)).unwrap();
        assert_eq!(fill, Fill::Data(9));
        assert_eq!(text, "user_id: ");
        assert_eq!(stream.consume(8), "user_id:");
        assert_eq!(stream.pending(), " ");
        assert_eq!(stream.take_pending(), " ");
        assert_eq!(stream.pending(), "");
    }

    #[test]
    fn fill_eof() {
        let (mut stream, peer) = pair();
        drop(peer);

        let (fill, _) = stream.fill(Duration::from_secs(1)).unwrap();
        assert_eq!(fill, Fill::Eof);
        assert!(stream.is_eof());

        let (fill, _) = stream.fill(Duration::from_secs(1)).unwrap();
        assert_eq!(fill, Fill::Eof);
    }
}

//! Interactive hand-off.
//!
//! The terminal of the current process is connected to a child
//! so a user can talk to it directly.
//! The hand-off ends when the user types an escape character,
//! when the child closes its output or when STDIN is closed.

use std::{
    io::{self, Write},
    os::unix::prelude::{AsRawFd, RawFd},
};

use nix::{
    errno::Errno,
    libc::STDIN_FILENO,
    poll::{poll, PollFd, PollFlags},
    sys::termios::{self, SetArg, Termios},
    unistd::{self, isatty},
};

use crate::{
    encoding::TextDecoder,
    error::{to_pty_error, Result},
    session::Session,
    sink::LogSink,
};

/// A reason an interactive hand-off ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    /// The user typed an escape character.
    Escaped,
    /// The child closed its output.
    Exited,
    /// STDIN was closed.
    InputClosed,
    /// The interrupt flag was raised.
    Interrupted,
}

impl Session {
    /// Hands the terminal over to the user.
    ///
    /// A passthrough sink is detached for the duration of the hand-off
    /// as the user sees the output anyway.
    /// It, the terminal mode and the pty echo are restored on every exit path.
    ///
    /// Output shown during the hand-off is not captured.
    pub fn interact(&mut self) -> Result<Handoff> {
        let handover = Handover::acquire(self)?;

        tracing::debug!(pid = handover.session.process().pid(), "interactive hand-off started");
        let result = passthrough(handover.session);
        tracing::debug!(result = ?result, "interactive hand-off ended");

        let restored = handover.release();
        let handoff = result?;
        restored?;

        Ok(handoff)
    }
}

fn passthrough(session: &mut Session) -> Result<Handoff> {
    // ms
    const SLICE: i32 = 100;

    let escape = session.options().escape_character;
    let mut decoder = TextDecoder::new(session.options().encoding);
    let mut buf = [0; 512];

    loop {
        if session.options().is_interrupted() {
            return Ok(Handoff::Interrupted);
        }

        let pty = session.stream_mut().as_raw_fd();
        let mut fds = [
            PollFd::new(STDIN_FILENO, PollFlags::POLLIN),
            PollFd::new(pty, PollFlags::POLLIN),
        ];

        match poll(&mut fds, SLICE) {
            Ok(0) | Err(Errno::EINTR) => continue,
            Ok(_) => {}
            Err(err) => return Err(io::Error::from(err).into()),
        }

        if is_ready(&fds[1]) {
            let n = session.stream_mut().read_raw(&mut buf)?;
            if n == 0 {
                let tail = decoder.finish();
                session.log(&tail);
                return Ok(Handoff::Exited);
            }

            // We don't print user input back;
            // a pty echoes it so passwords stay hidden.
            let mut stdout = io::stdout().lock();
            stdout.write_all(&buf[..n])?;
            stdout.flush()?;

            let text = decoder.decode(&buf[..n], false);
            session.log(&text);
        }

        if is_ready(&fds[0]) {
            let n = match read_fd(STDIN_FILENO, &mut buf) {
                Ok(n) => n,
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                    ) =>
                {
                    continue
                }
                Err(err) => return Err(err.into()),
            };

            if n == 0 {
                return Ok(Handoff::InputClosed);
            }

            let input = &buf[..n];
            let escape_pos = input.iter().position(|&c| c == escape);
            let stream = session.stream_mut();
            match escape_pos {
                Some(pos) => {
                    stream.write_all(&input[..pos])?;
                    stream.flush()?;
                    return Ok(Handoff::Escaped);
                }
                None => {
                    stream.write_all(input)?;
                    stream.flush()?;
                }
            }
        }
    }
}

fn is_ready(fd: &PollFd) -> bool {
    fd.revents().map_or(false, |ev| {
        ev.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
    })
}

// STDIN is read directly as `io::Stdin` buffers what a poll can't see.
fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    unistd::read(fd, buf).map_err(io::Error::from)
}

/// Exclusive ownership of the terminal.
///
/// STDIN is put into raw mode, a pty echo is turned on
/// and a passthrough sink is detached.
/// All of it is put back by [Handover::release] or on drop.
struct Handover<'a> {
    session: &'a mut Session,
    sink: Option<Box<dyn LogSink>>,
    orig_flags: Option<Termios>,
    orig_echo: bool,
    released: bool,
}

impl<'a> Handover<'a> {
    fn acquire(session: &'a mut Session) -> Result<Self> {
        let orig_echo = session.process().get_echo()?;
        let sink = session.detach_passthrough_sink();

        let mut handover = Self {
            session,
            sink,
            orig_flags: None,
            orig_echo,
            released: false,
        };

        // A redirected STDIN is fine, there's just nothing to configure.
        let is_terminal = isatty(STDIN_FILENO).map_err(to_pty_error("calling isatty"))?;
        if is_terminal {
            let flags =
                termios::tcgetattr(STDIN_FILENO).map_err(to_pty_error("calling tcgetattr"))?;
            let mut raw = flags.clone();
            termios::cfmakeraw(&mut raw);
            handover.orig_flags = Some(flags);

            termios::tcsetattr(STDIN_FILENO, SetArg::TCSANOW, &raw)
                .map_err(to_pty_error("setting a raw mode"))?;
        }

        handover.session.process_mut().set_echo(true)?;

        Ok(handover)
    }

    fn release(mut self) -> Result<()> {
        self.released = true;
        self.restore()
    }

    fn restore(&mut self) -> Result<()> {
        self.session.attach_sink(self.sink.take());

        if let Some(flags) = self.orig_flags.take() {
            termios::tcsetattr(STDIN_FILENO, SetArg::TCSAFLUSH, &flags)
                .map_err(to_pty_error("restoring a terminal"))?;
        }

        if self.session.is_alive()? {
            self.session.process_mut().set_echo(self.orig_echo)?;
        }

        Ok(())
    }
}

impl Drop for Handover<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        if let Err(err) = self.restore() {
            tracing::warn!(error = %err, "failed to restore a terminal");
        }
    }
}

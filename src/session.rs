//! Module contains a Session structure.

use std::{
    io::Write,
    time::{Duration, Instant},
};

use crate::{
    encoding,
    error::{Error, Result},
    needle::{Found, Match, Needle},
    options::Options,
    process::{PtyChild, Spawn, Status},
    sink::LogSink,
    stream::PtyStream,
};

/// Session represents a spawned process and its pty stream.
/// It controlls process and communication with it.
pub struct Session {
    proc: PtyChild,
    stream: PtyStream,
    sink: Option<Box<dyn LogSink>>,
    opts: Options,
}

/// What a step of waiting ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step<T> {
    Matched(T),
    Timeout,
    Eof,
    Interrupted,
}

impl Session {
    /// Spawns a process in a pty.
    pub fn spawn(spawn: &Spawn, sink: Option<Box<dyn LogSink>>, opts: Options) -> Result<Self> {
        let mut proc = PtyChild::spawn(spawn)?;
        proc.set_echo(opts.echo)?;

        let file = proc.open_stream()?;
        let stream = PtyStream::new(file, opts.encoding);

        Ok(Self {
            proc,
            stream,
            sink,
            opts,
        })
    }

    pub fn options(&self) -> &Options {
        &self.opts
    }

    pub fn process(&self) -> &PtyChild {
        &self.proc
    }

    pub fn process_mut(&mut self) -> &mut PtyChild {
        &mut self.proc
    }

    pub(crate) fn stream_mut(&mut self) -> &mut PtyStream {
        &mut self.stream
    }

    /// Verifies whether process is still alive.
    pub fn is_alive(&mut self) -> Result<bool> {
        self.proc.is_alive()
    }

    /// Waits until any of `check` finds a match in the pending output.
    ///
    /// `check` gets a pending text and an EOF flag;
    /// it returns a match together with any value it wants to get back.
    /// On a match the text up to its end is consumed.
    ///
    /// It gives up once `timeout` elapses without a match,
    /// when the child closes its output,
    /// or when the interrupt flag of [Options] is raised.
    pub fn wait_for<T, F>(&mut self, timeout: Duration, mut check: F) -> Result<Step<(T, Found)>>
    where
        F: FnMut(&str, bool) -> Option<(T, Match)>,
    {
        const SLICE: Duration = Duration::from_millis(100);

        let deadline = Instant::now() + timeout;
        loop {
            let eof = self.stream.is_eof();
            if let Some((value, m)) = check(self.stream.pending(), eof) {
                let buf = self.stream.consume(m.end());
                return Ok(Step::Matched((value, Found::new(buf, m))));
            }

            if eof {
                return Ok(Step::Eof);
            }

            if self.opts.is_interrupted() {
                return Ok(Step::Interrupted);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Step::Timeout);
            }

            let wait = (deadline - now).min(SLICE);
            let (_, chunk) = self.stream.fill(wait)?;
            self.log(&chunk);
        }
    }

    /// Expect waits until a pattern is matched.
    ///
    /// It returns [None] if the step timeout is reached
    /// or the child closes its output before that.
    pub fn expect<N: Needle>(&mut self, needle: N) -> Result<Option<Found>> {
        let timeout = self.opts.step_timeout;
        let step = self.wait_for(timeout, |buf, eof| needle.check(buf, eof).map(|m| ((), m)))?;
        match step {
            Step::Matched(((), found)) => Ok(Some(found)),
            Step::Timeout | Step::Eof => Ok(None),
            Step::Interrupted => Err(Error::Interrupted {
                output: self.stream.take_pending(),
            }),
        }
    }

    /// Send text to child’s STDIN.
    pub fn send(&mut self, text: &str) -> Result<()> {
        let bytes = encoding::encode(self.opts.encoding, text);
        self.stream.write_all(&bytes)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Send a line to child’s STDIN.
    pub fn send_line(&mut self, text: &str) -> Result<()> {
        self.send(text)?;
        self.send("\n")
    }

    /// Takes output which hasn't been consumed by any match.
    pub fn take_pending(&mut self) -> String {
        self.stream.take_pending()
    }

    pub(crate) fn log(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }

        if let Some(sink) = self.sink.as_mut() {
            if let Err(err) = sink.write(chunk) {
                tracing::warn!(error = %err, "failed to write to a log sink");
            }
        }
    }

    /// Detaches a sink if it mirrors output to the terminal.
    pub(crate) fn detach_passthrough_sink(&mut self) -> Option<Box<dyn LogSink>> {
        match &self.sink {
            Some(sink) if sink.is_passthrough() => self.sink.take(),
            _ => None,
        }
    }

    pub(crate) fn attach_sink(&mut self, sink: Option<Box<dyn LogSink>>) {
        if sink.is_some() {
            self.sink = sink;
        }
    }

    /// Closes the session.
    ///
    /// The child is given a short grace period and is terminated afterwards.
    /// A sink is closed unless it's a passthrough one.
    pub fn close(&mut self) -> Result<Status> {
        let status = self.proc.close(self.opts.close_grace);

        if let Some(mut sink) = self.sink.take() {
            if !sink.is_passthrough() {
                sink.close()?;
            }
        }

        status
    }

    /// Kills the child right away, ignoring any errors.
    ///
    /// A sink is closed unless it's a passthrough one.
    pub(crate) fn abort(&mut self) {
        if let Err(err) = self.proc.close(Duration::ZERO) {
            tracing::warn!(error = %err, "failed to terminate a process");
        }

        if let Some(mut sink) = self.sink.take() {
            if sink.is_passthrough() {
                return;
            }

            if let Err(err) = sink.close() {
                tracing::warn!(error = %err, "failed to close a log sink");
            }
        }
    }
}

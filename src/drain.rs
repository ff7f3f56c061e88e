//! The drain runner.
//!
//! It runs a child with piped output to completion
//! without any pattern matching.

use std::{
    io::{self, Read},
    os::unix::prelude::AsRawFd,
    process::{Child, Stdio},
    thread,
};

use crate::{
    encoding::TextDecoder,
    error::{Error, Result},
    options::Options,
    process::{make_non_blocking, Spawn, Status},
    request::{Output, Termination},
    sink::LogSink,
};

const READ_BUFFER_SIZE: usize = 4096;

/// Runs a child and collects everything it writes to STDOUT and STDERR.
///
/// A sink gets output as it arrives and is closed at the end
/// unless it's a passthrough one.
///
/// A non-zero exit status is reported as [Error::ProcessFailure]
/// carrying the same text a successful run would return.
pub fn run(spawn: &Spawn, mut sink: Option<Box<dyn LogSink>>, opts: &Options) -> Result<Output> {
    let mut child = spawn
        .to_command()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| Error::Spawn {
            program: spawn.program_name(),
            source,
        })?;

    tracing::debug!(pid = child.id(), command = %spawn.command_line(), "spawned a piped process");

    let result = drain(&mut child, &mut sink, opts);
    if result.is_err() {
        terminate(&mut child);
    }

    if let Some(mut sink) = sink {
        if !sink.is_passthrough() {
            sink.close()?;
        }
    }

    let (text, status) = result?;
    if !status.success() {
        return Err(Error::ProcessFailure {
            output: text,
            status,
        });
    }

    Ok(Output::new(text, Some(status), Termination::Exited))
}

fn drain(
    child: &mut Child,
    sink: &mut Option<Box<dyn LogSink>>,
    opts: &Options,
) -> Result<(String, Status)> {
    let mut stdout = Pipe::new(child.stdout.take(), opts)?;
    let mut stderr = Pipe::new(child.stderr.take(), opts)?;

    let mut output = String::new();
    let mut status = None;
    let mut retries = opts.drain_retries;
    let mut buf = [0; READ_BUFFER_SIZE];

    loop {
        if opts.is_interrupted() {
            return Err(Error::Interrupted { output });
        }

        let chunk = match stdout.try_read(&mut buf)? {
            Some(chunk) => Some(chunk),
            None => stderr.try_read(&mut buf)?,
        };

        match chunk {
            Some(text) => {
                tracing::trace!(len = text.len(), "drained a chunk");

                if let Some(sink) = sink.as_mut() {
                    if let Err(err) = sink.write(&text) {
                        tracing::warn!(error = %err, "failed to write to a log sink");
                    }
                }

                output.push_str(&text);
            }
            None => match status {
                Some(status) if stdout.is_closed() && stderr.is_closed() => {
                    return Ok((output, status));
                }
                Some(status) if retries == 0 => {
                    tracing::debug!("giving up on output of an exited process");
                    return Ok((output, status));
                }
                Some(_) => {
                    retries -= 1;
                    tracing::trace!(retries, "waiting for late output");
                    thread::sleep(opts.poll_interval);
                }
                None => thread::sleep(opts.poll_interval),
            },
        }

        if status.is_none() {
            status = child.try_wait()?.map(Status::from);
            if let Some(status) = status {
                tracing::debug!(pid = child.id(), %status, "piped process exited");
            }
        }
    }
}

fn terminate(child: &mut Child) {
    tracing::debug!(pid = child.id(), "terminating a process");

    if let Err(err) = child.kill() {
        tracing::warn!(error = %err, "failed to kill a process");
    }

    if let Err(err) = child.wait() {
        tracing::warn!(error = %err, "failed to wait for a killed process");
    }
}

/// A non-blocking end of a pipe.
struct Pipe<R> {
    reader: Option<R>,
    decoder: TextDecoder,
}

impl<R: Read + AsRawFd> Pipe<R> {
    fn new(reader: Option<R>, opts: &Options) -> io::Result<Self> {
        if let Some(reader) = &reader {
            make_non_blocking(reader)?;
        }

        Ok(Self {
            reader,
            decoder: TextDecoder::new(opts.encoding),
        })
    }

    fn is_closed(&self) -> bool {
        self.reader.is_none()
    }

    /// Returns [None] if there's nothing to read.
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<Option<String>> {
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Ok(None),
        };

        match reader.read(buf) {
            Ok(0) => {
                self.reader = None;
                let tail = self.decoder.finish();
                Ok((!tail.is_empty()).then_some(tail))
            }
            Ok(n) => Ok(Some(self.decoder.decode(&buf[..n], false))),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, rc::Rc, time::Duration};

    fn bash(script: &str) -> Spawn {
        let mut spawn = Spawn::new("bash");
        spawn.args = vec!["-c".into(), script.into()];
        spawn
    }

    fn fast() -> Options {
        Options::new().poll_interval(Duration::from_millis(10))
    }

    #[derive(Clone, Default)]
    struct Shared(Rc<RefCell<(String, bool)>>);

    impl LogSink for Shared {
        fn write(&mut self, chunk: &str) -> io::Result<()> {
            self.0.borrow_mut().0.push_str(chunk);
            Ok(())
        }

        fn close(&mut self) -> io::Result<()> {
            self.0.borrow_mut().1 = true;
            Ok(())
        }
    }

    #[test]
    fn collects_stdout_and_stderr() {
        let output = run(&bash("echo out; echo err >&2"), None, &fast()).unwrap();
        let mut lines: Vec<_> = output.text().lines().collect();
        lines.sort();

        assert_eq!(lines, ["err", "out"]);
        assert_eq!(output.status(), Some(Status::Exited(0)));
        assert_eq!(output.termination(), Termination::Exited);
    }

    #[test]
    fn sink_gets_output_and_is_closed() {
        let shared = Shared::default();
        let output = run(
            &bash("printf 'a\\nb\\n'"),
            Some(Box::new(shared.clone())),
            &fast(),
        )
        .unwrap();

        let (text, closed) = shared.0.borrow().clone();
        assert_eq!(text, "a\nb\n");
        assert_eq!(output.text(), text);
        assert!(closed);
    }

    struct Passthrough(Shared);

    impl LogSink for Passthrough {
        fn write(&mut self, chunk: &str) -> io::Result<()> {
            self.0.write(chunk)
        }

        fn close(&mut self) -> io::Result<()> {
            self.0.close()
        }

        fn is_passthrough(&self) -> bool {
            true
        }
    }

    #[test]
    fn passthrough_sink_is_not_closed() {
        let shared = Shared::default();
        let output = run(
            &bash("echo shown"),
            Some(Box::new(Passthrough(shared.clone()))),
            &fast(),
        )
        .unwrap();

        let (text, closed) = shared.0.borrow().clone();
        assert_eq!(text, "shown\n");
        assert_eq!(output.text(), text);
        assert!(!closed);
    }

    #[test]
    fn non_zero_exit_keeps_output() {
        let err = run(&bash("echo partial; exit 3"), None, &fast()).unwrap_err();
        match err {
            Error::ProcessFailure { output, status } => {
                assert_eq!(output, "partial\n");
                assert_eq!(status, Status::Exited(3));
            }
            err => panic!("unexpected error {:?}", err),
        }
    }

    #[test]
    fn late_output_after_exit() {
        // A background writer outlives the shell.
        let output = run(&bash("(sleep 0.05; echo late) & echo early"), None, &fast()).unwrap();
        assert!(output.text().starts_with("early\n"));
    }

    #[test]
    fn spawn_failure() {
        let err = run(&Spawn::new("/no/such/program"), None, &fast()).unwrap_err();
        assert!(matches!(err, Error::Spawn { program, .. } if program == "/no/such/program"));
    }

    #[test]
    fn interrupted() {
        let interrupt = crate::Interrupt::new();
        interrupt.raise();

        let shared = Shared::default();
        let opts = fast().interrupt(interrupt);
        let err = run(&bash("sleep 10"), Some(Box::new(shared.clone())), &opts).unwrap_err();
        assert!(matches!(err, Error::Interrupted { .. }));
        assert!(shared.0.borrow().1);
    }
}

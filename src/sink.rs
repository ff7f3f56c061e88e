//! Log sinks which receive a child's output as it streams in.
//!
//! A sink gets decoded chunks in arrival order.
//! Chunks have arbitrary length; a sink does its own buffering if it needs lines,
//! see [Lines].

use std::io::{self, Write};

/// A write target for a child's output.
pub trait LogSink {
    /// Receives a chunk of output.
    fn write(&mut self, chunk: &str) -> io::Result<()>;

    /// Called once at the end of a stream.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Whether the sink just mirrors output to the caller's terminal.
    ///
    /// Such a sink is never closed by a runner,
    /// and it is detached while the terminal is handed to the user,
    /// because the user sees the output directly then.
    fn is_passthrough(&self) -> bool {
        false
    }
}

impl<S: LogSink + ?Sized> LogSink for Box<S> {
    fn write(&mut self, chunk: &str) -> io::Result<()> {
        (**self).write(chunk)
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }

    fn is_passthrough(&self) -> bool {
        (**self).is_passthrough()
    }
}

/// A default sink which mirrors output to the process's STDOUT.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stdout;

impl LogSink for Stdout {
    fn write(&mut self, chunk: &str) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(chunk.as_bytes())?;
        stdout.flush()
    }

    fn is_passthrough(&self) -> bool {
        true
    }
}

/// A sink over any [Write]r, e.g. a log file.
///
/// The writer is flushed on close.
#[derive(Debug)]
pub struct Writer<W> {
    inner: W,
}

impl<W: Write> Writer<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> LogSink for Writer<W> {
    fn write(&mut self, chunk: &str) -> io::Result<()> {
        self.inner.write_all(chunk.as_bytes())
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Callbacks of a line oriented sink.
///
/// ```
/// use jsh::sink::{LineHandler, Lines};
///
/// #[derive(Default)]
/// struct Count(usize);
///
/// impl LineHandler for Count {
///     fn on_line(&mut self, line: &str) {
///         self.0 += 1;
///         println!("[{:2}] {}", self.0, line);
///     }
/// }
///
/// let sink = Lines::new(Count::default());
/// ```
pub trait LineHandler {
    fn on_line(&mut self, line: &str);

    /// Called before the first line.
    fn on_start(&mut self) {}

    /// Called after the last line.
    fn on_end(&mut self) {}
}

impl<F: FnMut(&str)> LineHandler for F {
    fn on_line(&mut self, line: &str) {
        self(line)
    }
}

/// A sink which splits output into lines.
///
/// A trailing `\r` is stripped, as a pty ends lines with `\r\n`.
/// An unterminated last line is delivered on close.
#[derive(Debug)]
pub struct Lines<H> {
    handler: H,
    partial: String,
    started: bool,
}

impl<H: LineHandler> Lines<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            partial: String::new(),
            started: false,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn into_inner(self) -> H {
        self.handler
    }

    fn start(&mut self) {
        if !self.started {
            self.started = true;
            self.handler.on_start();
        }
    }
}

impl<H: LineHandler> LogSink for Lines<H> {
    fn write(&mut self, chunk: &str) -> io::Result<()> {
        self.start();
        self.partial.push_str(chunk);

        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            let line = line.trim_end_matches('\n');
            let line = line.strip_suffix('\r').unwrap_or(line);
            self.handler.on_line(line);
        }

        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.start();
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            self.handler.on_line(line.strip_suffix('\r').unwrap_or(&line));
        }

        self.handler.on_end();
        Ok(())
    }
}

/// A sink which emits each output line as a `tracing` event.
pub type TracingSink = Lines<TracingLines>;

impl TracingSink {
    /// Creates a sink tagging its events with a name, e.g. of a command.
    pub fn tracing(name: impl Into<String>) -> Self {
        Lines::new(TracingLines { name: name.into() })
    }
}

#[derive(Debug)]
pub struct TracingLines {
    name: String,
}

impl LineHandler for TracingLines {
    fn on_line(&mut self, line: &str) {
        tracing::info!(target: "jsh::output", name = %self.name, "{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Record {
        events: Vec<String>,
    }

    impl LineHandler for Record {
        fn on_line(&mut self, line: &str) {
            self.events.push(format!("line {}", line));
        }

        fn on_start(&mut self) {
            self.events.push("start".to_owned());
        }

        fn on_end(&mut self) {
            self.events.push("end".to_owned());
        }
    }

    #[test]
    fn lines_across_chunks() {
        let mut sink = Lines::new(Record::default());
        sink.write("0.txt\r\n1.t").unwrap();
        sink.write("xt\n2").unwrap();
        sink.write(".txt").unwrap();
        sink.close().unwrap();

        assert_eq!(
            sink.into_inner().events,
            ["start", "line 0.txt", "line 1.txt", "line 2.txt", "end"]
        );
    }

    #[test]
    fn lines_empty_stream() {
        let mut sink = Lines::new(Record::default());
        sink.close().unwrap();
        assert_eq!(sink.into_inner().events, ["start", "end"]);
    }

    #[test]
    fn lines_keep_empty_lines() {
        let mut lines = Vec::new();
        let mut sink = Lines::new(|line: &str| lines.push(line.to_owned()));
        sink.write("a\n\nb\n").unwrap();
        sink.close().unwrap();
        drop(sink);

        assert_eq!(lines, ["a", "", "b"]);
    }

    #[test]
    fn writer_sink() {
        let mut sink = Writer::new(Vec::new());
        sink.write("hello ").unwrap();
        sink.write("world").unwrap();
        sink.close().unwrap();

        assert!(!sink.is_passthrough());
        assert_eq!(sink.into_inner(), b"hello world");
    }

    #[test]
    fn stdout_is_passthrough() {
        assert!(Stdout.is_passthrough());
        let boxed: Box<dyn LogSink> = Box::new(Stdout);
        assert!(boxed.is_passthrough());
    }
}

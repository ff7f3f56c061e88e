use std::time::Duration;

use encoding_rs::{Encoding, UTF_8};

use crate::{encoding, error::Error, interrupt::Interrupt};

/// Configuration of a run.
///
/// It's passed to each run explicitly; there's no process wide state.
#[derive(Debug, Clone)]
pub struct Options {
    pub(crate) poll_interval: Duration,
    pub(crate) drain_retries: usize,
    pub(crate) step_timeout: Duration,
    pub(crate) close_grace: Duration,
    pub(crate) encoding: &'static Encoding,
    pub(crate) echo: bool,
    pub(crate) clear_env: bool,
    pub(crate) check_exit_status: bool,
    pub(crate) dry_run: bool,
    pub(crate) escape_character: u8,
    pub(crate) interrupt: Option<Interrupt>,
}

impl Options {
    /// Default escape character which ends an interactive hand-off.
    pub const ESCAPE: u8 = 29; // Ctrl-]

    pub fn new() -> Self {
        Self::default()
    }

    /// How long the drain loop sleeps when there's nothing to read.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// How many empty iterations the drain loop makes after the child exited.
    pub fn drain_retries(mut self, retries: usize) -> Self {
        self.drain_retries = retries;
        self
    }

    /// How long the interaction loop waits for a match on each step.
    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// How long a child gets to exit by itself at teardown before it's terminated.
    pub fn close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    pub fn encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Sets an encoding by its label, e.g. `"euc-kr"`.
    pub fn encoding_label(self, label: &str) -> Result<Self, Error> {
        Ok(self.encoding(encoding::for_label(label)?))
    }

    /// Whether a pty echoes what is sent to a child.
    pub fn echo(mut self, on: bool) -> Self {
        self.echo = on;
        self
    }

    /// Whether a given environment replaces the inherited one instead of extending it.
    pub fn clear_env(mut self, on: bool) -> Self {
        self.clear_env = on;
        self
    }

    /// Whether an interaction run fails when its child exits with a non-zero code.
    ///
    /// A drain run always does.
    pub fn check_exit_status(mut self, on: bool) -> Self {
        self.check_exit_status = on;
        self
    }

    /// Describe what would be run instead of running it.
    pub fn dry_run(mut self, on: bool) -> Self {
        self.dry_run = on;
        self
    }

    pub fn escape_character(mut self, c: u8) -> Self {
        self.escape_character = c;
        self
    }

    pub fn interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.interrupt.as_ref().map_or(false, Interrupt::is_raised)
    }

    pub fn get_step_timeout(&self) -> Duration {
        self.step_timeout
    }

    pub fn get_encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            drain_retries: 3,
            step_timeout: Duration::from_secs(30),
            close_grace: Duration::from_millis(100),
            encoding: UTF_8,
            echo: false,
            clear_env: false,
            check_exit_status: false,
            dry_run: false,
            escape_character: Self::ESCAPE,
            interrupt: None,
        }
    }
}

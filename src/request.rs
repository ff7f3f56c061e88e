//! A description of a run and its outcome.

use std::{collections::HashMap, ffi::OsString, path::PathBuf};

use crate::{
    drain, engine,
    error::Result,
    expectation::Expectation,
    options::Options,
    process::{Spawn, Status},
    sink::LogSink,
};

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// A piped child exited and its output was drained.
    Exited,
    /// A callback asked to stop the conversation.
    Stopped,
    /// A step ran out of time and there was no handler left to go on with.
    TimeoutExceeded,
    /// The child closed its output.
    StreamClosed,
    /// Nothing was run.
    DryRun,
}

/// A result of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    text: String,
    status: Option<Status>,
    termination: Termination,
}

impl Output {
    pub(crate) fn new(text: String, status: Option<Status>, termination: Termination) -> Self {
        Self {
            text,
            status,
            termination,
        }
    }

    /// Captured text in arrival order.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    /// An exit status of the child; it's [None] for a dry run.
    pub fn status(&self) -> Option<Status> {
        self.status
    }

    pub fn termination(&self) -> Termination {
        self.termination
    }
}

/// RunRequest describes what to run and how.
///
/// A request without expectations and without an interactive flag
/// is run by the drain runner with piped output;
/// otherwise the child gets a pty and a conversation is driven by the engine.
///
/// ```no_run
/// use jsh::{Expectation, RunRequest};
///
/// let output = RunRequest::new("passwd")
///     .expect(Expectation::new("password:", "secret\n"))
///     .run()
///     .unwrap();
///
/// println!("{}", output.text());
/// ```
pub struct RunRequest {
    spawn: Spawn,
    script: Option<String>,
    sink: Option<Box<dyn LogSink>>,
    expectations: Vec<Expectation>,
    interactive: bool,
    options: Options,
}

impl RunRequest {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            spawn: Spawn::new(program),
            script: None,
            sink: None,
            expectations: Vec::new(),
            interactive: false,
            options: Options::default(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.spawn.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.spawn.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.spawn.cwd = Some(cwd.into());
        self
    }

    /// Adds a variable to the environment of the child.
    ///
    /// It overlays the inherited environment unless [Options::clear_env] is set.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self
            .spawn
            .env
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let env = self.spawn.env.get_or_insert_with(HashMap::new);
        env.extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn sink(mut self, sink: impl LogSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn boxed_sink(mut self, sink: Option<Box<dyn LogSink>>) -> Self {
        self.sink = sink;
        self
    }

    pub fn expect(mut self, expectation: Expectation) -> Self {
        self.expectations.push(expectation);
        self
    }

    pub fn expectations(mut self, expectations: impl IntoIterator<Item = Expectation>) -> Self {
        self.expectations.extend(expectations);
        self
    }

    /// Hands the terminal over to the user once no patterns are left to wait for.
    pub fn interactive(mut self, on: bool) -> Self {
        self.interactive = on;
        self
    }

    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Attaches a text of a staged script so a dry run could show it.
    pub(crate) fn script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn command_line(&self) -> String {
        self.spawn.command_line()
    }

    pub fn run(self) -> Result<Output> {
        run(self)
    }
}

/// Runs a request, see [RunRequest].
pub fn run(request: RunRequest) -> Result<Output> {
    let RunRequest {
        mut spawn,
        script,
        sink,
        expectations,
        interactive,
        options,
    } = request;

    spawn.clear_env = options.clear_env;

    if options.dry_run {
        return dry_run(&spawn, script.as_deref(), sink);
    }

    if expectations.is_empty() && !interactive {
        drain::run(&spawn, sink, &options)
    } else {
        engine::run(&spawn, sink, expectations, interactive, options)
    }
}

fn dry_run(spawn: &Spawn, script: Option<&str>, sink: Option<Box<dyn LogSink>>) -> Result<Output> {
    let command = spawn.command_line();
    tracing::info!(command = %command, "dry run");

    if let Some(mut sink) = sink {
        sink.write(&command)?;
        sink.write("\n")?;

        if let Some(script) = script {
            sink.write(script)?;
            if !script.ends_with('\n') {
                sink.write("\n")?;
            }
        }

        if !sink.is_passthrough() {
            sink.close()?;
        }
    }

    Ok(Output::new(String::new(), None, Termination::DryRun))
}

//! Shell front-ends.
//!
//! A script is staged into a temporary file which lives as long as a run,
//! and the file is handed to `bash`, to `bash` under `sudo` or to a remote `bash` over `ssh`.

use std::{
    ffi::OsString,
    fs::{self, Permissions},
    io::Write,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;

use crate::{
    error::Result,
    expectation::Expectation,
    options::Options,
    request::{Output, RunRequest},
    sink::LogSink,
};

/// Common parameters of a shell run.
///
/// ```no_run
/// use jsh::{shell::{sh, ShellRun}, sink::Stdout};
///
/// let output = sh("echo $PROGNAME", ShellRun::new().env("PROGNAME", "demo").sink(Stdout)).unwrap();
/// assert_eq!(output.text(), "demo\n");
/// ```
#[derive(Default)]
pub struct ShellRun {
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
    sink: Option<Box<dyn LogSink>>,
    expectations: Vec<Expectation>,
    interactive: bool,
    options: Options,
}

impl ShellRun {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
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

    pub fn interactive(mut self, on: bool) -> Self {
        self.interactive = on;
        self
    }

    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    fn into_request<I, S>(self, program: &str, args: I, cwd: Option<PathBuf>) -> RunRequest
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut request = RunRequest::new(program)
            .args(args)
            .boxed_sink(self.sink)
            .expectations(self.expectations)
            .interactive(self.interactive)
            .options(self.options);

        if !self.env.is_empty() {
            request = request.envs(self.env);
        }

        if let Some(cwd) = cwd {
            request = request.cwd(cwd);
        }

        request
    }
}

/// Runs a script with `bash`.
pub fn sh(script: &str, run: ShellRun) -> Result<Output> {
    let file = stage(script)?;
    let cwd = run.cwd.clone();

    run.into_request("bash", [file.path()], cwd)
        .script(script)
        .run()
}

/// Runs a script with `bash` as another user.
///
/// `sudo` may ask for a password; an expectation can answer it.
pub fn sudo_sh(script: &str, user: &str, run: ShellRun) -> Result<Output> {
    let file = stage(script)?;
    // The other user must be able to read it.
    fs::set_permissions(file.path(), Permissions::from_mode(0o644))?;

    let cwd = run.cwd.clone();
    let args = ["-H", "-u", user, "bash", "-login"]
        .into_iter()
        .map(OsString::from)
        .chain(std::iter::once(file.path().as_os_str().to_owned()));

    run.into_request("sudo", args, cwd).script(script).run()
}

/// Runs a script on a remote host.
///
/// A working directory is the one on a remote host.
/// The script is copied into a remote temporary file by a wrapper script.
pub fn ssh_sh(script: &str, host: &str, run: ShellRun) -> Result<Output> {
    let remote = remote_script(script, run.cwd.as_deref());
    let file = stage(&remote)?;

    let wrapper = ssh_wrapper(file.path(), host);
    let wrapper_file = stage(&wrapper)?;

    run.into_request("bash", [wrapper_file.path()], None)
        .script(remote)
        .run()
}

fn remote_script(script: &str, cwd: Option<&Path>) -> String {
    let mut remote = String::new();
    if let Some(cwd) = cwd {
        remote.push_str(&format!("cd '{}'\n", cwd.display()));
    }

    remote.push_str(script);
    remote.push('\n');
    remote
}

fn ssh_wrapper(script: &Path, host: &str) -> String {
    format!(
        r#"cat {} | ssh {} "f=\`mktemp\`; cat >> \$f; bash -login \$f; ""#,
        script.display(),
        host
    )
}

/// Escapes a text so it could be put into a double quoted shell string.
///
/// ```
/// use jsh::shell::escape_shell_cmd;
///
/// assert_eq!(escape_shell_cmd(r#"echo "$HOME""#), r#"echo \"\$HOME\""#);
/// ```
pub fn escape_shell_cmd(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '"' | '$') {
            escaped.push('\\');
        }

        escaped.push(c);
    }

    escaped
}

fn stage(script: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("jsh-")
        .suffix(".sh")
        .tempfile()?;
    file.write_all(script.as_bytes())?;
    file.flush()?;

    tracing::trace!(path = %file.path().display(), "staged a script");

    Ok(file)
}

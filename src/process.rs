//! A child process attached to a pty.

use std::{
    collections::HashMap,
    ffi::OsString,
    fmt,
    fs::File,
    io,
    os::unix::{
        prelude::{AsRawFd, RawFd},
        process::ExitStatusExt,
    },
    path::PathBuf,
    process::{Command, ExitStatus},
    thread,
    time::Duration,
};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use ptyprocess::{PtyProcess, WaitStatus};

use crate::error::{to_pty_error, Error, Result};

/// An exit status of a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The child exited by itself with a code.
    Exited(i32),
    /// The child was stopped by a signal.
    Signaled(i32),
    /// The child had to be terminated by us so its own status is unknown.
    Terminated,
}

impl Status {
    /// Whether the child exited with a zero code.
    pub fn success(&self) -> bool {
        matches!(self, Status::Exited(0))
    }

    /// An exit code, if the child exited by itself.
    pub fn code(&self) -> Option<i32> {
        match self {
            Status::Exited(code) => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Exited(code) => write!(f, "exit code {}", code),
            Status::Signaled(signal) => write!(f, "signal {}", signal),
            Status::Terminated => f.write_str("forced termination"),
        }
    }
}

impl From<ExitStatus> for Status {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Status::Exited(code),
            (None, Some(signal)) => Status::Signaled(signal),
            (None, None) => Status::Terminated,
        }
    }
}

/// What to spawn: a program, its arguments, a working directory and environment.
#[derive(Debug, Clone, Default)]
pub struct Spawn {
    pub(crate) program: OsString,
    pub(crate) args: Vec<OsString>,
    pub(crate) cwd: Option<PathBuf>,
    pub(crate) env: Option<HashMap<String, String>>,
    pub(crate) clear_env: bool,
}

impl Spawn {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self
            .env
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub(crate) fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Renders a command line the way a shell user would type it.
    pub fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub(crate) fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        let _ = command.args(&self.args);

        if let Some(cwd) = &self.cwd {
            let _ = command.current_dir(cwd);
        }

        if self.clear_env {
            let _ = command.env_clear();
        }

        if let Some(env) = &self.env {
            let _ = command.envs(env);
        }

        command
    }
}

/// A child process running in a pty.
///
/// Its status is cached once observed,
/// because observing it reaps the child.
pub struct PtyChild {
    proc: PtyProcess,
    status: Option<Status>,
}

impl PtyChild {
    pub fn spawn(spawn: &Spawn) -> Result<Self> {
        let proc = PtyProcess::spawn(spawn.to_command()).map_err(|e| Error::Spawn {
            program: spawn.program_name(),
            source: io::Error::new(io::ErrorKind::Other, e.to_string()),
        })?;

        tracing::debug!(pid = %proc.pid(), command = %spawn.command_line(), "spawned a pty process");

        Ok(Self { proc, status: None })
    }

    /// Opens a handle to the master side of the pty.
    pub fn open_stream(&self) -> Result<File> {
        self.proc
            .get_raw_handle()
            .map_err(to_pty_error("opening a pty stream"))
    }

    pub fn pid(&self) -> i32 {
        self.proc.pid().as_raw()
    }

    pub fn set_echo(&mut self, on: bool) -> Result<()> {
        let _ = self
            .proc
            .set_echo(on, Some(Duration::from_millis(500)))
            .map_err(to_pty_error("setting echo"))?;
        Ok(())
    }

    pub fn get_echo(&self) -> Result<bool> {
        self.proc.get_echo().map_err(to_pty_error("getting echo"))
    }

    /// Returns a status if the child has exited.
    pub fn try_status(&mut self) -> Result<Option<Status>> {
        if self.status.is_some() {
            return Ok(self.status);
        }

        let status = match self.proc.status() {
            Ok(WaitStatus::Exited(_, code)) => Some(Status::Exited(code)),
            Ok(WaitStatus::Signaled(_, signal, _)) => Some(Status::Signaled(signal as i32)),
            Ok(_) => None,
            // ECHILD; someone else has reaped it.
            Err(_) => Some(Status::Terminated),
        };

        self.status = status;
        Ok(status)
    }

    pub fn is_alive(&mut self) -> Result<bool> {
        self.try_status().map(|status| status.is_none())
    }

    /// Closes the child.
    ///
    /// A child which is still running gets a short grace period to exit by itself
    /// and is terminated afterwards.
    pub fn close(&mut self, grace: Duration) -> Result<Status> {
        let step = Duration::from_millis(10);
        let mut waited = Duration::ZERO;
        loop {
            if let Some(status) = self.try_status()? {
                return Ok(status);
            }

            if waited >= grace {
                break;
            }

            thread::sleep(step);
            waited += step;
        }

        tracing::debug!(pid = self.pid(), "terminating a pty process");

        let _ = self
            .proc
            .exit(true)
            .map_err(to_pty_error("terminating a process"))?;

        self.status = Some(Status::Terminated);
        Ok(Status::Terminated)
    }
}

impl fmt::Debug for PtyChild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PtyChild")
            .field("pid", &self.pid())
            .field("status", &self.status)
            .finish()
    }
}

pub(crate) fn set_non_blocking(fd: RawFd, non_blocking: bool) -> io::Result<()> {
    let opt = fcntl(fd, FcntlArg::F_GETFL).map_err(io::Error::from)?;
    let mut opt = OFlag::from_bits_truncate(opt);
    opt.set(OFlag::O_NONBLOCK, non_blocking);
    let _ = fcntl(fd, FcntlArg::F_SETFL(opt)).map_err(io::Error::from)?;
    Ok(())
}

pub(crate) fn make_non_blocking(fd: &impl AsRawFd) -> io::Result<()> {
    set_non_blocking(fd.as_raw_fd(), true)
}

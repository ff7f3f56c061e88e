//! Jsh a library for running shell scripts and driving them through conversations.
//!
//! A run without expectations just drains the child's output.
//! A run with expectations spawns the child in a pty,
//! waits for output to match one of the patterns
//! and answers it with a literal or with a computed response.
//! Each expectation fires at most once.
//!
//! # Example
//!
//! ```no_run
//! use jsh::{shell::{sh, ShellRun}, Expectation, Reply, Context};
//!
//! let script = r#"
//! read -p "user_id:" id
//! read -s -p "password:" pw
//! echo "welcome $id"
//! "#;
//!
//! let output = sh(
//!     script,
//!     ShellRun::new()
//!         .expect(Expectation::new("user_id:", "alice\n"))
//!         .expect(Expectation::compute("password:", |_: &Context<'_>| Reply::Send("secret\n".into()))),
//! )
//! .unwrap();
//!
//! assert!(output.text().contains("welcome alice"));
//! ```

mod drain;
mod encoding;
mod engine;
mod error;
mod expectation;
mod interact;
mod interrupt;
mod needle;
mod options;
mod process;
mod request;
mod session;
pub mod shell;
pub mod sink;
mod stream;

pub use encoding::for_label as encoding_for_label;
pub use error::{Error, Result};
pub use expectation::{parse_all, Context, Expectation, Reply, Response};
pub use interact::Handoff;
pub use interrupt::Interrupt;
pub use needle::{Eof, Found, Match, Needle, Pattern};
pub use options::Options;
pub use process::{PtyChild, Spawn, Status};
pub use request::{run, Output, RunRequest, Termination};
pub use session::{Session, Step};
pub use shell::{escape_shell_cmd, ssh_sh, sudo_sh, sh, ShellRun};

/// Spawns a command in a pty and returns a session to talk to it.
///
/// # Example
///
/// ```no_run
/// use jsh::spawn;
///
/// let mut p = spawn("cat").unwrap();
/// p.send_line("Hello World").unwrap();
/// let found = p.expect("Hello World").unwrap().unwrap();
/// assert_eq!(found.matched(), "Hello World");
/// p.close().unwrap();
/// ```
pub fn spawn<S: AsRef<str>>(cmd: S) -> Result<Session> {
    let mut args = cmd.as_ref().split_whitespace();
    let program = args.next().unwrap_or_default();
    let spawn = args.fold(Spawn::new(program), Spawn::arg);

    Session::spawn(&spawn, None, Options::default())
}

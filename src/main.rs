use std::{path::PathBuf, process::ExitCode, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use jsh::{
    sink::{LogSink, Stdout, TracingSink},
    Error, Interrupt, Options, ShellRun,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "jsh",
    about = "Run a shell script, optionally driving it through an expect-style conversation",
    version
)]
struct Args {
    /// Run the script as another user via sudo
    #[arg(short, long, conflicts_with = "ssh")]
    user: Option<String>,

    /// Run the script on a remote host via ssh
    #[arg(long)]
    ssh: Option<String>,

    /// Working directory of the script
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Environment variable for the script, KEY=VALUE
    #[arg(short, long = "env", value_parser = parse_env)]
    env: Vec<(String, String)>,

    /// Expectation PATTERN=>RESPONSE, may be repeated
    #[arg(short = 'x', long = "expect")]
    expect: Vec<String>,

    /// Hand the terminal over once every expectation has fired
    #[arg(short, long)]
    interactive: bool,

    /// Seconds to wait for each expectation
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Encoding of the script's output
    #[arg(long)]
    encoding: Option<String>,

    /// Fail if the script exits with a non-zero code in a conversation
    #[arg(long)]
    check_exit_status: bool,

    /// Print what would be run instead of running it
    #[arg(long)]
    dry_run: bool,

    /// Don't mirror output while the script runs, print it at the end
    #[arg(short, long)]
    quiet: bool,

    /// Verbosity of diagnostics, may be repeated
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// The script
    #[arg(required = true, trailing_var_arg = true)]
    script: Vec<String>,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let interrupt = Interrupt::on_sigint().context("Failed to register a SIGINT handler")?;

    let mut options = Options::new()
        .interrupt(interrupt)
        .dry_run(args.dry_run)
        .check_exit_status(args.check_exit_status);
    if let Some(timeout) = args.timeout {
        options = options.step_timeout(Duration::from_secs(timeout));
    }
    if let Some(label) = &args.encoding {
        options = options.encoding_label(label)?;
    }

    let expectations = jsh::parse_all(&args.expect).context("Failed to parse expectations")?;
    let script = args.script.join(" ");

    let sink: Box<dyn LogSink> = match args.quiet {
        true => Box::new(TracingSink::tracing(script.clone())),
        false => Box::new(Stdout),
    };

    let mut run = ShellRun::new()
        .boxed_sink(Some(sink))
        .expectations(expectations)
        .interactive(args.interactive)
        .options(options);
    for (key, value) in args.env {
        run = run.env(key, value);
    }
    if let Some(cwd) = args.cwd {
        run = run.cwd(cwd);
    }

    let result = match (args.user.as_deref(), args.ssh.as_deref()) {
        (Some(user), _) => jsh::sudo_sh(&script, user, run),
        (None, Some(host)) => jsh::ssh_sh(&script, host, run),
        (None, None) => jsh::sh(&script, run),
    };

    match result {
        Ok(output) => {
            if args.quiet {
                print!("{}", output.text());
            }

            Ok(ExitCode::SUCCESS)
        }
        Err(Error::ProcessFailure { output, status }) => {
            if args.quiet {
                print!("{}", output);
            }

            tracing::error!(%status, "script failed");
            let code = status.code().and_then(|code| u8::try_from(code).ok());
            Ok(ExitCode::from(code.unwrap_or(1)))
        }
        Err(Error::Interrupted { .. }) => {
            tracing::warn!("script was interrupted");
            Ok(ExitCode::from(130))
        }
        Err(err) => Err(err).context("Failed to run the script"),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "jsh=debug",
        _ => "jsh=trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_env(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {:?}", s))
}

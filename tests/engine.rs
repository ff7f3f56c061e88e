use std::{
    cell::{Cell, RefCell},
    fs::File,
    io,
    os::unix::io::AsRawFd,
    rc::Rc,
    sync::Once,
    time::Duration,
};

use jsh::{
    shell::{sh, ShellRun},
    sink::LogSink,
    Context, Error, Expectation, Interrupt, Options, Pattern, Reply, Status, Termination,
};
use pretty_assertions::assert_eq;

fn opts(timeout: Duration) -> Options {
    Options::new().step_timeout(timeout)
}

fn run(script: &str, expectations: Vec<Expectation>, timeout: Duration) -> jsh::Result<jsh::Output> {
    sh(
        script,
        ShellRun::new()
            .expectations(expectations)
            .options(opts(timeout)),
    )
}

const ID_PASSWD: &str = r#"
read -p "user_id:" id
read -p "password:" pw
echo "id=$id"
echo "pw=$pw"
"#;

#[derive(Clone, Default)]
struct Shared(Rc<RefCell<String>>);

impl LogSink for Shared {
    fn write(&mut self, chunk: &str) -> io::Result<()> {
        self.0.borrow_mut().push_str(chunk);
        Ok(())
    }
}

#[test]
fn id_passwd() {
    let sink = Shared::default();
    let output = sh(
        ID_PASSWD,
        ShellRun::new()
            .expect(Expectation::new("user_id:", "alice\n"))
            .expect(Expectation::new("password:", "secret\n"))
            .sink(sink.clone())
            .options(opts(Duration::from_secs(10))),
    )
    .unwrap();

    let text = output.text();
    let id = text.find("id=alice\r\n").unwrap();
    let pw = text.find("pw=secret\r\n").unwrap();
    assert!(id < pw, "{:?}", text);

    assert_eq!(output.termination(), Termination::StreamClosed);
    assert_eq!(output.status(), Some(Status::Exited(0)));
    assert_eq!(*sink.0.borrow(), text);
}

#[test]
fn textual_expectations() {
    let entries = [r"user_id:=>bob\n", r"re:pass\w+:=>pw\n"];
    let expectations = jsh::parse_all(entries).unwrap();

    let output = run(ID_PASSWD, expectations, Duration::from_secs(10)).unwrap();

    assert!(output.text().contains("id=bob"));
    assert!(output.text().contains("pw=pw"));
}

#[test]
fn each_expectation_fires_once() {
    let script = r#"for i in 1 2; do read -p "ask:" a; echo "got=$a"; done"#;

    let output = run(
        script,
        vec![Expectation::new("ask:", "one\n")],
        Duration::from_millis(500),
    )
    .unwrap();

    let text = output.text();
    assert_eq!(text.matches("got=").count(), 1, "{:?}", text);
    assert!(text.ends_with("ask:"), "{:?}", text);
    assert_eq!(output.termination(), Termination::TimeoutExceeded);
    assert_eq!(output.status(), Some(Status::Terminated));
}

#[test]
fn registration_order_breaks_ties() {
    let script = r#"read -p "password:" a; echo "a=$a""#;

    let output = run(
        script,
        vec![
            Expectation::new("word:", "first\n"),
            Expectation::new("pass", "second\n"),
        ],
        Duration::from_secs(10),
    )
    .unwrap();

    assert!(output.text().contains("a=first"), "{:?}", output.text());
}

#[test]
fn callback_computes_a_response() {
    let script = r#"echo token=42; read -p "echo:" x; echo "x=$x""#;

    let token = Expectation::compute(
        Pattern::regex(r"token=\d+\r\n").unwrap(),
        |ctx: &Context<'_>| format!("{}\n", ctx.matched["token=".len()..].trim_end()),
    );

    let output = run(script, vec![token], Duration::from_secs(10)).unwrap();

    assert!(output.text().contains("x=42"), "{:?}", output.text());
}

#[test]
fn callback_stops_a_conversation() {
    let script = r#"echo "ready>"; sleep 10"#;

    let seen = Rc::new(Cell::new(0));
    let counter = Rc::clone(&seen);
    let stop = Expectation::compute("ready>", move |ctx: &Context<'_>| {
        counter.set(ctx.event_count + 1);
        assert!(ctx.output().contains("ready>"));
        Reply::Stop
    });

    let output = run(script, vec![stop], Duration::from_secs(10)).unwrap();

    assert_eq!(seen.get(), 1);
    assert_eq!(output.termination(), Termination::Stopped);
    assert!(output.text().contains("ready>"));
}

#[test]
fn timeout_alone_is_not_an_error() {
    let script = "echo partial; sleep 10";

    let output = run(
        script,
        vec![Expectation::new("never", "x\n")],
        Duration::from_millis(300),
    )
    .unwrap();

    assert_eq!(output.text(), "partial\r\n");
    assert_eq!(output.termination(), Termination::TimeoutExceeded);
}

#[test]
fn timeout_handler() {
    let script = r#"read x; echo "x=$x""#;

    let output = run(
        script,
        vec![Expectation::new(Pattern::Timeout, "go\n")],
        Duration::from_millis(300),
    )
    .unwrap();

    assert_eq!(output.text(), "x=go\r\n");
    assert_eq!(output.termination(), Termination::StreamClosed);
}

#[test]
fn eof_handler() {
    let rest = Rc::new(RefCell::new(None));
    let handler = {
        let rest = Rc::clone(&rest);
        Expectation::compute(Pattern::Eof, move |ctx: &Context<'_>| {
            *rest.borrow_mut() = Some(ctx.before.to_owned());
        })
    };

    let output = run("echo bye", vec![handler], Duration::from_secs(10)).unwrap();

    assert_eq!(output.text(), "bye\r\n");
    assert_eq!(rest.borrow().as_deref(), Some("bye\r\n"));
}

#[test]
fn exit_status_is_reported() {
    let script = r#"read -p "q:" a; exit 4"#;

    let output = run(
        script,
        vec![Expectation::new("q:", "a\n")],
        Duration::from_secs(10),
    )
    .unwrap();
    assert_eq!(output.status(), Some(Status::Exited(4)));

    let err = sh(
        script,
        ShellRun::new()
            .expect(Expectation::new("q:", "a\n"))
            .options(opts(Duration::from_secs(10)).check_exit_status(true)),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::ProcessFailure {
            status: Status::Exited(4),
            ..
        }
    ));
}

#[derive(Clone, Default)]
struct Closable {
    text: Shared,
    closed: Rc<Cell<bool>>,
}

impl LogSink for Closable {
    fn write(&mut self, chunk: &str) -> io::Result<()> {
        self.text.write(chunk)
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed.set(true);
        Ok(())
    }
}

#[test]
fn interrupted_run() {
    let interrupt = Interrupt::new();
    interrupt.raise();

    let sink = Closable::default();
    let err = sh(
        "sleep 10",
        ShellRun::new()
            .expect(Expectation::new("never", "x"))
            .sink(sink.clone())
            .options(opts(Duration::from_secs(10)).interrupt(interrupt)),
    )
    .unwrap_err();

    assert!(matches!(err, Error::Interrupted { .. }));
    assert!(sink.closed.get());
}

// Hand-offs must not wait on a terminal of whoever runs the tests.
fn stdin_from_dev_null() {
    static REDIRECT: Once = Once::new();
    REDIRECT.call_once(|| {
        let null = File::open("/dev/null").unwrap();
        let _ = nix::unistd::dup2(null.as_raw_fd(), nix::libc::STDIN_FILENO).unwrap();
    });
}

#[derive(Clone, Default)]
struct Passthrough(Shared);

impl LogSink for Passthrough {
    fn write(&mut self, chunk: &str) -> io::Result<()> {
        self.0.write(chunk)
    }

    fn is_passthrough(&self) -> bool {
        true
    }
}

#[test]
fn interactive_handoff_resumes_capture() {
    stdin_from_dev_null();

    let sink = Passthrough::default();
    let output = sh(
        r#"read -p 'ready:' a; echo "a=$a"; sleep 0.3; echo after"#,
        ShellRun::new()
            .expect(Expectation::new("ready:", "x\n"))
            .interactive(true)
            .sink(sink.clone())
            .options(opts(Duration::from_secs(10))),
    )
    .unwrap();

    let text = output.text();
    assert!(text.starts_with("ready:"), "{:?}", text);
    assert!(text.ends_with("after\r\n"), "{:?}", text);
    assert_eq!(output.termination(), Termination::StreamClosed);
    assert_eq!(output.status(), Some(Status::Exited(0)));

    // The sink is back once the hand-off is over.
    let logged = sink.0 .0.borrow();
    assert!(logged.ends_with("after\r\n"), "{:?}", logged);
}

#[test]
fn interactive_without_expectations() {
    stdin_from_dev_null();

    let output = sh(
        "echo hi; sleep 0.3; echo bye",
        ShellRun::new()
            .interactive(true)
            .options(opts(Duration::from_secs(10))),
    )
    .unwrap();

    assert!(output.text().ends_with("bye\r\n"), "{:?}", output.text());
    assert_eq!(output.termination(), Termination::StreamClosed);
    assert_eq!(output.status(), Some(Status::Exited(0)));
}

#[test]
fn multibyte_output() {
    let script = r#"read -p "이름:" name; echo "안녕 $name""#;

    let output = run(
        script,
        vec![Expectation::new("이름:", "지섭\n")],
        Duration::from_secs(10),
    )
    .unwrap();

    assert!(output.text().contains("안녕 지섭"), "{:?}", output.text());
}

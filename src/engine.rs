//! The interaction engine.
//!
//! It drives a child in a pty through a conversation:
//! waits for output to match one of still active expectations,
//! dispatches the response of the first one by registration order
//! and retires it.

use crate::{
    error::{Error, Result},
    expectation::{Context, Expectation, Reply},
    interact::Handoff,
    needle::{Found, Match, Needle, Pattern},
    options::Options,
    process::{Spawn, Status},
    request::{Output, Termination},
    session::{Session, Step},
    sink::LogSink,
};

/// An expectation together with its state.
#[derive(Debug)]
struct Slot {
    entry: Expectation,
    consumed: bool,
}

impl Slot {
    fn is_active(&self) -> bool {
        !self.consumed
    }
}

#[derive(Debug)]
pub(crate) struct Engine {
    slots: Vec<Slot>,
    chunks: Vec<String>,
    event_count: usize,
    interactive: bool,
}

/// Runs a conversation with a spawned child.
///
/// The child's exit status is reported in [Output];
/// it turns into [Error::ProcessFailure] only if [Options::check_exit_status] is set.
pub fn run(
    spawn: &Spawn,
    sink: Option<Box<dyn LogSink>>,
    expectations: Vec<Expectation>,
    interactive: bool,
    opts: Options,
) -> Result<Output> {
    let check_exit_status = opts.check_exit_status;
    let mut session = Session::spawn(spawn, sink, opts)?;
    let mut engine = Engine::new(expectations, interactive);

    let termination = match engine.converse(&mut session) {
        Ok(termination) => termination,
        Err(err) => {
            session.abort();
            return Err(match err {
                Error::Interrupted { .. } => Error::Interrupted {
                    output: engine.take_output(&mut session),
                },
                err => err,
            });
        }
    };

    let status = session.close()?;
    let text = engine.take_output(&mut session);

    tracing::debug!(?termination, %status, events = engine.event_count, "conversation finished");

    if check_exit_status && is_failure(status) {
        return Err(Error::ProcessFailure {
            output: text,
            status,
        });
    }

    Ok(Output::new(text, Some(status), termination))
}

// A child we had to terminate ourselves didn't fail.
fn is_failure(status: Status) -> bool {
    !matches!(status, Status::Exited(0) | Status::Terminated)
}

impl Engine {
    pub(crate) fn new(expectations: Vec<Expectation>, interactive: bool) -> Self {
        let slots = expectations
            .into_iter()
            .map(|entry| Slot {
                entry,
                consumed: false,
            })
            .collect();

        Self {
            slots,
            chunks: Vec::new(),
            event_count: 0,
            interactive,
        }
    }

    pub(crate) fn converse(&mut self, session: &mut Session) -> Result<Termination> {
        loop {
            if self.interactive && !self.has_active_patterns() {
                self.interactive = false;
                if session.interact()? == Handoff::Interrupted {
                    return Err(Error::Interrupted {
                        output: String::new(),
                    });
                }

                continue;
            }

            let timeout = session.options().get_step_timeout();
            let slots = &self.slots;
            let step = session.wait_for(timeout, |buf, eof| find_match(slots, buf, eof))?;

            let termination = match step {
                Step::Matched((index, found)) => self.on_match(session, index, found)?,
                Step::Timeout => self.on_timeout(session)?,
                Step::Eof => Some(self.on_eof(session)),
                Step::Interrupted => {
                    return Err(Error::Interrupted {
                        output: String::new(),
                    })
                }
            };

            if let Some(termination) = termination {
                tracing::debug!(?termination, "conversation terminated");
                return Ok(termination);
            }
        }
    }

    fn on_match(
        &mut self,
        session: &mut Session,
        index: usize,
        found: Found,
    ) -> Result<Option<Termination>> {
        tracing::debug!(
            index,
            pattern = %self.slots[index].entry.pattern,
            matched = ?found.matched(),
            "expectation matched"
        );

        self.chunks.push(found.as_str().to_owned());
        let reply = self.reply(index, found.before(), found.matched());

        match reply {
            Reply::Send(text) => {
                tracing::debug!(index, text = ?text, "sending a response");
                session.send(&text)?;
                Ok(None)
            }
            Reply::Continue => Ok(None),
            Reply::Stop => Ok(Some(Termination::Stopped)),
        }
    }

    fn on_timeout(&mut self, session: &mut Session) -> Result<Option<Termination>> {
        let handler = self.find_active(|p| matches!(p, Pattern::Timeout));
        let index = match handler {
            Some(index) => index,
            None => {
                self.append_pending(session);
                return Ok(Some(Termination::TimeoutExceeded));
            }
        };

        tracing::debug!(index, "step timed out");

        match self.reply(index, "", "") {
            Reply::Send(text) => {
                tracing::debug!(index, text = ?text, "sending a response");
                session.send(&text)?;
                Ok(None)
            }
            Reply::Continue => Ok(None),
            Reply::Stop => {
                self.append_pending(session);
                Ok(Some(Termination::Stopped))
            }
        }
    }

    fn on_eof(&mut self, session: &mut Session) -> Termination {
        let rest = session.take_pending();
        if !rest.is_empty() {
            self.chunks.push(rest.clone());
        }

        // A child is gone so there's no one to reply to.
        if let Some(index) = self.find_active(|p| matches!(p, Pattern::Eof)) {
            let reply = self.reply(index, &rest, "");
            tracing::debug!(index, ?reply, "end of stream handled");
        }

        Termination::StreamClosed
    }

    /// Calls a response of an entry and retires the entry.
    fn reply(&mut self, index: usize, before: &str, matched: &str) -> Reply {
        let active = self.active_count();
        let event_count = self.event_count;
        self.event_count += 1;

        let slot = &mut self.slots[index];
        slot.consumed = true;

        let Expectation { pattern, response } = &mut slot.entry;
        let ctx = Context {
            before,
            matched,
            pattern,
            index,
            event_count,
            active,
            output: &self.chunks,
        };

        response.reply(&ctx)
    }

    fn find_active(&self, f: impl Fn(&Pattern) -> bool) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.is_active() && f(&slot.entry.pattern))
    }

    fn active_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_active()).count()
    }

    fn has_active_patterns(&self) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.is_active() && !slot.entry.pattern.is_sentinel())
    }

    fn append_pending(&mut self, session: &mut Session) {
        let rest = session.take_pending();
        if !rest.is_empty() {
            self.chunks.push(rest);
        }
    }

    pub(crate) fn take_output(&mut self, session: &mut Session) -> String {
        self.append_pending(session);
        std::mem::take(&mut self.chunks).concat()
    }
}

/// Looks for the first active entry, by registration order, which matches a buffer.
fn find_match(slots: &[Slot], buf: &str, eof: bool) -> Option<(usize, Match)> {
    slots
        .iter()
        .enumerate()
        .filter(|(_, slot)| slot.is_active() && !slot.entry.pattern.is_sentinel())
        .find_map(|(i, slot)| slot.entry.pattern.check(buf, eof).map(|m| (i, m)))
}

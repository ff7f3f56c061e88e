//! Expectations: a pattern to wait for and a response to it.

use std::fmt;

use crate::{error::Error, needle::Pattern};

/// A reply of a [Response::Compute] callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Send a text to the child.
    Send(String),
    /// Stop the conversation.
    Stop,
    /// Go on without sending anything.
    Continue,
}

impl From<String> for Reply {
    fn from(s: String) -> Self {
        Reply::Send(s)
    }
}

impl From<&str> for Reply {
    fn from(s: &str) -> Self {
        Reply::Send(s.to_owned())
    }
}

impl From<bool> for Reply {
    fn from(stop: bool) -> Self {
        match stop {
            true => Reply::Stop,
            false => Reply::Continue,
        }
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Reply::Continue
    }
}

impl From<Option<String>> for Reply {
    fn from(s: Option<String>) -> Self {
        s.map_or(Reply::Continue, Reply::Send)
    }
}

/// Context provides a callback with a state of a running conversation.
#[derive(Debug)]
pub struct Context<'a> {
    /// Text which preceded the match.
    pub before: &'a str,
    /// Text which matched. It's empty for [Pattern::Timeout].
    pub matched: &'a str,
    /// The pattern of the entry which fired.
    pub pattern: &'a Pattern,
    /// Index of the entry in registration order.
    pub index: usize,
    /// How many events have been handled before this one.
    pub event_count: usize,
    /// How many user entries are still active, this one included.
    pub active: usize,
    /// Output captured so far, in arrival order; it includes `before` and `matched`.
    pub output: &'a [String],
}

impl Context<'_> {
    /// Joins the output captured so far.
    pub fn output(&self) -> String {
        self.output.concat()
    }
}

type Callback = Box<dyn FnMut(&Context<'_>) -> Reply>;

/// A response of an [Expectation].
pub enum Response {
    /// A literal to send verbatim.
    Send(String),
    /// A callback which computes a reply.
    Compute(Callback),
}

impl Response {
    pub fn send(text: impl Into<String>) -> Self {
        Self::Send(text.into())
    }

    pub fn compute<F, R>(mut f: F) -> Self
    where
        F: FnMut(&Context<'_>) -> R + 'static,
        R: Into<Reply>,
    {
        Self::Compute(Box::new(move |ctx| f(ctx).into()))
    }

    pub(crate) fn reply(&mut self, ctx: &Context<'_>) -> Reply {
        match self {
            Response::Send(text) => Reply::Send(text.clone()),
            Response::Compute(f) => f(ctx),
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Send(text) => f.debug_tuple("Send").field(text).finish(),
            Response::Compute(_) => f.write_str("Compute(..)"),
        }
    }
}

impl From<&str> for Response {
    fn from(s: &str) -> Self {
        Response::send(s)
    }
}

impl From<String> for Response {
    fn from(s: String) -> Self {
        Response::Send(s)
    }
}

/// One (pattern, response) pair.
///
/// An entry fires at most once per run.
#[derive(Debug)]
pub struct Expectation {
    pub(crate) pattern: Pattern,
    pub(crate) response: Response,
}

impl Expectation {
    pub fn new(pattern: impl Into<Pattern>, response: impl Into<Response>) -> Self {
        Self {
            pattern: pattern.into(),
            response: response.into(),
        }
    }

    /// An entry which runs a callback once the pattern is seen.
    pub fn compute<F, R>(pattern: impl Into<Pattern>, f: F) -> Self
    where
        F: FnMut(&Context<'_>) -> R + 'static,
        R: Into<Reply>,
    {
        Self::new(pattern, Response::compute(f))
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    /// Parses an entry from its textual form `PATTERN=>RESPONSE`.
    ///
    /// * a `re:` prefix makes the pattern a regex,
    /// * `@timeout` and `@eof` are sentinel patterns,
    /// * `\n`, `\r`, `\t` and `\\` are unescaped in a response,
    /// * `@stop` and `@skip` responses stop the conversation or just go on.
    ///
    /// `index` is the position of the entry in its list;
    /// it's reported if the entry has no response.
    ///
    /// ```
    /// use jsh::{Expectation, Pattern};
    ///
    /// let e = Expectation::parse(0, r"password:=>secret\n").unwrap();
    /// assert!(matches!(e.pattern(), Pattern::Text(p) if p == "password:"));
    ///
    /// assert!(Expectation::parse(1, "password:").is_err());
    /// ```
    pub fn parse(index: usize, entry: &str) -> Result<Self, Error> {
        let (pattern, response) =
            entry
                .split_once("=>")
                .ok_or_else(|| Error::InvalidResponseType {
                    index,
                    entry: entry.to_owned(),
                })?;

        let pattern = match pattern {
            "@timeout" => Pattern::Timeout,
            "@eof" => Pattern::Eof,
            _ => match pattern.strip_prefix("re:") {
                Some(re) => Pattern::regex(re)?,
                None => Pattern::text(unescape(pattern)),
            },
        };

        let response = match response {
            "@stop" => Response::compute(|_: &Context<'_>| Reply::Stop),
            "@skip" => Response::compute(|_: &Context<'_>| Reply::Continue),
            _ => Response::Send(unescape(response)),
        };

        Ok(Self { pattern, response })
    }
}

/// Parses a list of textual entries, see [Expectation::parse].
pub fn parse_all<I, S>(entries: I) -> Result<Vec<Expectation>, Error>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| Expectation::parse(i, entry.as_ref()))
        .collect()
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }

    out
}

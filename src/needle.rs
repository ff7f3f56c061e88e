use std::fmt;

use crate::error::Error;

/// Needle an interface for search of a match in a buffer of decoded output.
pub trait Needle {
    /// Function returns the left most match if there's any.
    ///
    /// `eof` is set once the child closed its output.
    fn check(&self, buf: &str, eof: bool) -> Option<Match>;
}

/// Match structure represent a range of bytes where match was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    start: usize,
    end: usize,
}

impl Match {
    /// New construct's an intanse of a Match.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Start returns a start index of a match.
    pub fn start(&self) -> usize {
        self.start
    }

    /// End returns an end index of a match.
    pub fn end(&self) -> usize {
        self.end
    }
}

impl From<regex::Match<'_>> for Match {
    fn from(m: regex::Match<'_>) -> Self {
        Self::new(m.start(), m.end())
    }
}

/// A pattern an expectation waits for.
///
/// [Pattern::Timeout] and [Pattern::Eof] are sentinels.
/// They never match output; they fire when a step runs out of time
/// or when the child closes its output.
#[derive(Clone)]
pub enum Pattern {
    /// A literal substring.
    Text(String),
    /// A regular expression compiled when the pattern is built.
    Regex(regex::Regex),
    Timeout,
    Eof,
}

impl Pattern {
    /// Builds a literal pattern.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Builds a regex pattern.
    ///
    /// The expression is compiled right away so a bad one is reported
    /// before anything is spawned.
    pub fn regex(re: impl AsRef<str>) -> Result<Self, Error> {
        Ok(Self::Regex(regex::Regex::new(re.as_ref())?))
    }

    /// Verifies if it's one of the builtin sentinels.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Pattern::Timeout | Pattern::Eof)
    }
}

impl Needle for Pattern {
    fn check(&self, buf: &str, eof: bool) -> Option<Match> {
        match self {
            Pattern::Text(text) => text.as_str().check(buf, eof),
            Pattern::Regex(re) => re.check(buf, eof),
            Pattern::Eof => Eof.check(buf, eof),
            Pattern::Timeout => None,
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Text(text) => write!(f, "{:?}", text),
            Pattern::Regex(re) => write!(f, "re:{:?}", re.as_str()),
            Pattern::Timeout => f.write_str("TIMEOUT"),
            Pattern::Eof => f.write_str("EOF"),
        }
    }
}

impl From<&str> for Pattern {
    fn from(s: &str) -> Self {
        Pattern::text(s)
    }
}

impl From<String> for Pattern {
    fn from(s: String) -> Self {
        Pattern::Text(s)
    }
}

impl From<regex::Regex> for Pattern {
    fn from(re: regex::Regex) -> Self {
        Pattern::Regex(re)
    }
}

impl Needle for regex::Regex {
    fn check(&self, buf: &str, _: bool) -> Option<Match> {
        self.find(buf).map(Match::from)
    }
}

impl Needle for str {
    fn check(&self, buf: &str, _: bool) -> Option<Match> {
        buf.find(self).map(|start| Match::new(start, start + self.len()))
    }
}

impl Needle for &str {
    fn check(&self, buf: &str, eof: bool) -> Option<Match> {
        (**self).check(buf, eof)
    }
}

impl Needle for String {
    fn check(&self, buf: &str, eof: bool) -> Option<Match> {
        self.as_str().check(buf, eof)
    }
}

/// Eof consider a match when it's reached a EOF.
///
/// It takes everything what's left in a buffer.
pub struct Eof;

impl Needle for Eof {
    fn check(&self, buf: &str, eof: bool) -> Option<Match> {
        eof.then(|| Match::new(0, buf.len()))
    }
}

/// Found is a text involved in a match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Found {
    buf: String,
    matched: Match,
}

impl Default for Match {
    fn default() -> Self {
        Match::new(0, 0)
    }
}

impl Found {
    pub(crate) fn new(buf: String, matched: Match) -> Self {
        Self { buf, matched }
    }

    /// Text which preceded the match.
    pub fn before(&self) -> &str {
        &self.buf[..self.matched.start()]
    }

    /// Text of the match itself.
    pub fn matched(&self) -> &str {
        &self.buf[self.matched.start()..self.matched.end()]
    }

    /// All text consumed by the match, e.g. [Self::before] followed by [Self::matched].
    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn into_string(self) -> String {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regex() {
        let re = Pattern::regex("[0-9]+").unwrap();
        assert_eq!(re.check("+012345", false), Some(Match::new(1, 7)));
        assert_eq!(re.check("none", false), None);
    }

    #[test]
    fn test_bad_regex() {
        assert!(matches!(
            Pattern::regex("(unclosed"),
            Err(Error::RegexParsing(..))
        ));
    }

    #[test]
    fn test_str() {
        assert_eq!("wer".check("qwerty", false), Some(Match::new(1, 4)));
        assert_eq!("123".check("qwerty", false), None);
        assert_eq!("".check("qwerty", false), Some(Match::new(0, 0)));
        assert_eq!(
            Pattern::text("rty").check("qwerty", false),
            Some(Match::new(3, 6))
        );
    }

    #[test]
    fn test_first_occurrence() {
        assert_eq!(
            "id:".check("user_id: user_id:", false),
            Some(Match::new(5, 8))
        );
    }

    #[test]
    fn test_eof() {
        assert_eq!(Eof.check("qwe", true), Some(Match::new(0, 3)));
        assert_eq!(Eof.check("qwe", false), None);
        assert_eq!(Pattern::Eof.check("qwe", true), Some(Match::new(0, 3)));
    }

    #[test]
    fn test_timeout_never_matches() {
        assert_eq!(Pattern::Timeout.check("TIMEOUT", false), None);
        assert_eq!(Pattern::Timeout.check("", true), None);
        assert!(Pattern::Timeout.is_sentinel());
        assert!(!Pattern::text("x").is_sentinel());
    }

    #[test]
    fn test_found() {
        let found = Found::new("login: ".to_owned(), Match::new(0, 6));
        assert_eq!(found.before(), "");
        assert_eq!(found.matched(), "login:");

        let found = Found::new("Welcome\nlogin:".to_owned(), Match::new(8, 14));
        assert_eq!(found.before(), "Welcome\n");
        assert_eq!(found.matched(), "login:");
        assert_eq!(found.as_str(), "Welcome\nlogin:");
    }

    #[test]
    fn test_display() {
        assert_eq!(Pattern::text("a\"b").to_string(), "\"a\\\"b\"");
        assert_eq!(Pattern::regex(r"\d").unwrap().to_string(), "re:\"\\\\d\"");
        assert_eq!(Pattern::Timeout.to_string(), "TIMEOUT");
    }
}

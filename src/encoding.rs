//! Text decoding of a child's output.
//!
//! Output arrives in arbitrary chunks, so a multi-byte sequence may be split
//! between two reads. [TextDecoder] keeps such a tail until the next chunk
//! completes it.

use std::borrow::Cow;

use encoding_rs::{CoderResult, Decoder, Encoding, UTF_8};

use crate::error::Error;

/// Looks up an encoding by its WHATWG label, e.g. `utf-8`, `euc-kr`, `latin1`.
pub fn for_label(label: &str) -> Result<&'static Encoding, Error> {
    Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| Error::UnknownEncoding(label.to_owned()))
}

/// A streaming decoder.
pub(crate) struct TextDecoder {
    inner: Decoder,
}

impl TextDecoder {
    pub(crate) fn new(encoding: &'static Encoding) -> Self {
        Self {
            inner: encoding.new_decoder_without_bom_handling(),
        }
    }

    /// Decodes a chunk.
    ///
    /// An incomplete trailing sequence is kept for the next call
    /// unless `last` is set, in which case it's replaced by U+FFFD.
    pub(crate) fn decode(&mut self, mut bytes: &[u8], last: bool) -> String {
        let mut out = String::new();
        loop {
            let reserve = self
                .inner
                .max_utf8_buffer_length(bytes.len())
                .unwrap_or(bytes.len() * 3 + 16);
            out.reserve(reserve);

            let (result, read, _) = self.inner.decode_to_string(bytes, &mut out, last);
            bytes = &bytes[read..];
            match result {
                CoderResult::InputEmpty => return out,
                CoderResult::OutputFull => continue,
            }
        }
    }

    pub(crate) fn finish(&mut self) -> String {
        self.decode(&[], true)
    }
}

impl Default for TextDecoder {
    fn default() -> Self {
        Self::new(UTF_8)
    }
}

/// Encodes text to be sent to a child.
pub(crate) fn encode<'a>(encoding: &'static Encoding, text: &'a str) -> Cow<'a, [u8]> {
    if encoding == UTF_8 {
        return Cow::Borrowed(text.as_bytes());
    }

    let (bytes, _, _) = encoding.encode(text);
    bytes
}

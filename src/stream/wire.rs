//! The `{"type": ..., "value": ...}` envelope and its compact wire form.
//!
//! The server emits one JSON envelope per line; the decoder consumes the
//! compact `<type>:<json(value)>` form. [`reencode_line`] bridges the two.
//! The value is carried as [`serde_json::value::RawValue`] so re-encoding
//! preserves the server's exact JSON text.

use serde::Deserialize;
use serde_json::value::RawValue;

/// One parsed line of the server's wire protocol.
#[derive(Debug, Deserialize)]
pub struct Envelope<'a> {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(borrow)]
    pub value: &'a RawValue,
}

/// Re-encode one framed line as `<type>:<json(value)>`.
///
/// Malformed lines are dropped with a logged diagnostic; corruption in one
/// record never aborts the stream.
#[must_use]
pub fn reencode_line(line: &str) -> Option<String> {
    match serde_json::from_str::<Envelope<'_>>(line) {
        Ok(envelope) => {
            let value = envelope.value.get();
            let mut out = String::with_capacity(envelope.kind.len() + 1 + value.len());
            out.push_str(&envelope.kind);
            out.push(':');
            out.push_str(value);
            Some(out)
        }
        Err(err) => {
            tracing::warn!(error = %err, "dropping malformed envelope line");
            None
        }
    }
}

/// Split a wire line back into `(type, payload)`.
#[must_use]
pub fn split_wire_line(line: &str) -> Option<(&str, &str)> {
    let idx = memchr::memchr(b':', line.as_bytes())?;
    Some((&line[..idx], &line[idx + 1..]))
}

//! Incremental line framer for the newline-delimited wire protocol.
//!
//! The server's response body arrives as byte chunks with arbitrary split
//! points; nothing guarantees a chunk ends on a record boundary, or even on
//! a UTF-8 character boundary. [`LineFramer`] reassembles complete lines
//! from text chunks, and [`line_stream`] adapts a whole response body.

use futures_util::Stream;
use memchr::memchr_iter;
use smallvec::SmallVec;
use tokio_util::sync::CancellationToken;

use crate::error::RunError;

struct PendingLines {
    lines: SmallVec<[String; 8]>,
    head: usize,
}

impl PendingLines {
    #[inline]
    fn with_capacity(capacity: usize) -> Self {
        let mut lines = SmallVec::new();
        lines.reserve(capacity);
        Self { lines, head: 0 }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<String> {
        if self.head >= self.lines.len() {
            return None;
        }
        let line = std::mem::take(&mut self.lines[self.head]);
        self.head += 1;
        if self.head == self.lines.len() {
            self.lines.clear();
            self.head = 0;
        }
        Some(line)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<String>) {
        if parsed.is_empty() {
            return;
        }
        self.lines.reserve(parsed.len());
        self.lines.extend(parsed.drain(..));
    }
}

/// Incremental line framer.
///
/// Feed it text chunks (potentially arriving at arbitrary byte boundaries)
/// and it yields complete lines with the trailing newline stripped and
/// surrounding whitespace trimmed. Blank lines are filtered out. The pending
/// partial line is an owned field of this instance; each run constructs its
/// own framer.
pub struct LineFramer {
    buffer: String,
    read_offset: usize,
}

impl LineFramer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            read_offset: 0,
        }
    }

    /// Feed a text chunk and return any complete lines.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed a text chunk and append complete lines into a caller-provided
    /// buffer.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<String>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let bytes = self.buffer.as_bytes();
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &bytes[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let line = self.buffer[processed_up_to..line_end].trim();
            if !line.is_empty() {
                out.push(line.to_string());
            }
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Emit the buffered residual line, if any.
    ///
    /// Called once on stream end: a non-empty partial line that never saw its
    /// newline is still one valid record. Empty residue is discarded. This
    /// stage never fails.
    pub fn flush(&mut self) -> Option<String> {
        let residual = self.buffer[self.read_offset..].trim();
        let line = if residual.is_empty() {
            None
        } else {
            Some(residual.to_string())
        };
        self.buffer.clear();
        self.read_offset = 0;
        line
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a byte stream into trimmed, newline-delimited lines.
///
/// Bytes arriving from an HTTP response body are decoded as UTF-8 (with
/// multi-byte sequences split across chunk boundaries carried over in a
/// remainder buffer), fed into a [`LineFramer`], and complete lines are
/// yielded. On stream end a non-empty residual line is flushed as one final
/// record. When `cancel` fires, the buffered partial is dropped without a
/// flush and the stream ends.
pub fn line_stream<S>(
    byte_stream: S,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<String, RunError>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, RunError>> + Send + 'static,
{
    use futures_util::StreamExt;

    futures_util::stream::unfold(
        (
            Box::pin(byte_stream.fuse()),
            LineFramer::new(),
            Vec::<u8>::new(),
            Vec::<String>::with_capacity(8),
            PendingLines::with_capacity(8),
            cancel,
        ),
        |(mut stream, mut framer, mut remainder, mut parsed, mut pending, cancel)| async move {
            loop {
                if let Some(line) = pending.pop_front() {
                    return Some((Ok(line), (stream, framer, remainder, parsed, pending, cancel)));
                }
                if cancel.is_cancelled() {
                    return None;
                }

                let Some(chunk) = stream.as_mut().next().await else {
                    let flushed = framer.flush()?;
                    return Some((
                        Ok(flushed),
                        (stream, framer, remainder, parsed, pending, cancel),
                    ));
                };
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        return Some((
                            Err(err),
                            (stream, framer, remainder, parsed, pending, cancel),
                        ));
                    }
                };

                if remainder.is_empty() {
                    match std::str::from_utf8(&bytes) {
                        Ok(text) => framer.feed_into(text, &mut parsed),
                        Err(e) => {
                            let valid_up_to = e.valid_up_to();
                            // Safety: valid_up_to is guaranteed to be a valid UTF-8 boundary.
                            let text =
                                unsafe { std::str::from_utf8_unchecked(&bytes[..valid_up_to]) };
                            framer.feed_into(text, &mut parsed);
                            remainder.extend_from_slice(&bytes[valid_up_to..]);
                        }
                    }
                } else {
                    remainder.extend_from_slice(&bytes);
                    match std::str::from_utf8(remainder.as_slice()) {
                        Ok(text) => {
                            framer.feed_into(text, &mut parsed);
                            remainder.clear();
                        }
                        Err(e) => {
                            let valid_up_to = e.valid_up_to();
                            // Safety: valid_up_to is guaranteed to be a valid UTF-8 boundary.
                            let text = unsafe {
                                std::str::from_utf8_unchecked(&remainder[..valid_up_to])
                            };
                            framer.feed_into(text, &mut parsed);
                            if valid_up_to > 0 {
                                if valid_up_to == remainder.len() {
                                    remainder.clear();
                                } else {
                                    let remain_len = remainder.len() - valid_up_to;
                                    remainder.copy_within(valid_up_to.., 0);
                                    remainder.truncate(remain_len);
                                }
                            }
                        }
                    }
                }
                if !parsed.is_empty() {
                    pending.extend_from_vec(&mut parsed);
                    if let Some(first) = pending.pop_front() {
                        return Some((
                            Ok(first),
                            (stream, framer, remainder, parsed, pending, cancel),
                        ));
                    }
                }
            }
        },
    )
}

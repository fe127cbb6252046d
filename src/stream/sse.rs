//! SSE frame scanner and encoder.
//!
//! The scanner turns an upstream byte stream into a lazy, finite sequence of
//! [`SseEvent`]s. It ends at the upstream `[DONE]` sentinel, at end of body,
//! or at the first body read error.

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::Stream;
use memchr::memchr_iter;

/// Terminal sentinel frame of an `OpenAI`-style stream.
pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// A parsed SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Check if an [`SseEvent`] is a terminal `[DONE]` event.
#[must_use]
pub fn is_done_event(event: &SseEvent) -> bool {
    event.data.trim() == "[DONE]"
}

/// Encode a JSON payload as an unnamed SSE `data:` frame.
#[must_use]
pub fn encode_data_frame(json: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(8 + json.len());
    out.put_slice(b"data: ");
    out.put_slice(json);
    out.put_slice(b"\n\n");
    out.freeze()
}

/// Incremental SSE line parser.
///
/// Feed it text chunks split at arbitrary boundaries; it yields complete
/// events once their terminating blank line has arrived.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    read_offset: usize,
    event_type: Option<String>,
    data_buffer: String,
    has_data: bool,
    last_event_id: Option<String>,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw text and append complete events into `out`.
    ///
    /// - `data:` lines append to the pending payload (multi-line joined by `\n`)
    /// - `event:` and `id:` set the name and last id
    /// - `:` comment lines and unknown fields are ignored
    /// - a blank line dispatches the pending event, if it has data
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseEvent>) {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.push_str(chunk);
        let scan_start = self.read_offset;
        let mut consumed = scan_start;
        for rel_pos in memchr_iter(b'\n', &buffer.as_bytes()[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let line = &buffer[consumed..line_end];
            self.process_line(line.strip_suffix('\r').unwrap_or(line), out);
            consumed = line_end + 1;
        }

        if consumed == buffer.len() {
            buffer.clear();
            self.read_offset = 0;
        } else if consumed >= 8 * 1024 || consumed >= buffer.len() / 2 {
            buffer.drain(..consumed);
            self.read_offset = 0;
        } else {
            self.read_offset = consumed;
        }
        self.buffer = buffer;
    }

    fn process_line(&mut self, line: &str, out: &mut Vec<SseEvent>) {
        if line.is_empty() {
            if self.has_data {
                out.push(SseEvent {
                    event: self.event_type.take(),
                    data: std::mem::take(&mut self.data_buffer),
                    id: self.last_event_id.clone(),
                });
                self.has_data = false;
            }
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                if self.has_data {
                    self.data_buffer.push('\n');
                } else {
                    self.has_data = true;
                }
                self.data_buffer.push_str(value);
            }
            "event" => self.event_type = Some(value.to_string()),
            "id" => self.last_event_id = Some(value.to_string()),
            _ => {}
        }
    }

    /// Flush a trailing event whose blank line never arrived.
    fn finish(&mut self, out: &mut Vec<SseEvent>) {
        let tail = std::mem::take(&mut self.buffer);
        let line = &tail[self.read_offset..];
        self.read_offset = 0;
        if !line.is_empty() {
            self.process_line(line.strip_suffix('\r').unwrap_or(line), out);
        }
        self.process_line("", out);
    }
}

struct ScanState<S> {
    body: std::pin::Pin<Box<S>>,
    parser: SseParser,
    utf8_remainder: Vec<u8>,
    pending: std::collections::VecDeque<SseEvent>,
    finished: bool,
}

impl<S> ScanState<S> {
    /// Decode `bytes` and feed the text to the parser.
    ///
    /// Only an incomplete trailing sequence (at most 3 bytes) is carried to
    /// the next chunk; invalid sequences become U+FFFD so later frames are
    /// never held back.
    fn feed_bytes(&mut self, bytes: &[u8]) {
        let joined;
        let mut rest: &[u8] = if self.utf8_remainder.is_empty() {
            bytes
        } else {
            self.utf8_remainder.extend_from_slice(bytes);
            joined = std::mem::take(&mut self.utf8_remainder);
            &joined
        };

        let mut parsed = Vec::new();
        let mut lossy = String::new();
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    if lossy.is_empty() {
                        self.parser.feed_into(text, &mut parsed);
                    } else {
                        lossy.push_str(text);
                    }
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    lossy.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            lossy.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.utf8_remainder.extend_from_slice(after);
                            break;
                        }
                    }
                }
            }
        }
        if !lossy.is_empty() {
            self.parser.feed_into(&lossy, &mut parsed);
        }
        self.pending.extend(parsed);
    }

    fn flush(&mut self) {
        let mut parsed = Vec::new();
        if !self.utf8_remainder.is_empty() {
            let tail = String::from_utf8_lossy(&self.utf8_remainder).into_owned();
            self.utf8_remainder.clear();
            self.parser.feed_into(&tail, &mut parsed);
        }
        self.parser.finish(&mut parsed);
        self.pending.extend(parsed);
        self.finished = true;
    }
}

/// Split an upstream byte stream into SSE events.
///
/// Bytes are decoded as UTF-8 (multi-byte sequences split across chunks are
/// carried over), fed into [`SseParser`], and complete events are yielded in
/// arrival order. The sequence ends at the first `[DONE]` event (which is not
/// yielded), at end of body, or after a body read error is logged.
pub fn sse_frame_stream<S, E>(byte_stream: S) -> impl Stream<Item = SseEvent> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: std::fmt::Display + Send,
{
    use futures_util::StreamExt;

    let state = ScanState {
        body: Box::pin(byte_stream),
        parser: SseParser::new(),
        utf8_remainder: Vec::new(),
        pending: std::collections::VecDeque::new(),
        finished: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                if is_done_event(&event) {
                    return None;
                }
                return Some((event, state));
            }
            if state.finished {
                return None;
            }

            match state.body.as_mut().next().await {
                Some(Ok(bytes)) => state.feed_bytes(&bytes),
                Some(Err(err)) => {
                    tracing::warn!("upstream stream read failed: {err}");
                    state.finished = true;
                }
                None => state.flush(),
            }
        }
    })
}

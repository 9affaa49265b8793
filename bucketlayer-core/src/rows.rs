//! Streaming query enumerators.
//!
//! A query response arrives as one JSON envelope streamed in chunks:
//!
//! ```json
//! { "requestID": "...", "results": [ ... ], "errors": [ ... ], "status": "..." }
//! ```
//!
//! [`DocumentRows`] decodes that envelope incrementally, yielding each element
//! of `results` as soon as its closing byte has arrived instead of buffering
//! the whole response. Envelope fields other than `results` are retained and
//! checked once the rows are exhausted: a non-empty `errors` array or a
//! non-`success` status surfaces as
//! [`StoreError::QueryExecution`] only after every row has been yielded, the
//! same order the server produced them in.
//!
//! Enumeration is forward-only. [`DocumentRows::reset`] always fails with
//! [`StoreError::Unsupported`].

use std::sync::Arc;

use futures::{Stream, future::BoxFuture};
use serde_json::Value;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use crate::{
    driver::RowStream,
    error::{StoreError, StoreResult},
};

/// Envelope fields retained while rows stream through.
#[derive(Debug, Default, PartialEq)]
struct QueryOutcome {
    errors: Vec<Value>,
    status: Option<String>,
}

impl QueryOutcome {
    fn into_result(self) -> StoreResult<()> {
        if !self.errors.is_empty() {
            let rendered = serde_json::to_string(&self.errors)
                .unwrap_or_else(|_| "<unrenderable>".to_string());
            return Err(StoreError::QueryExecution(format!(
                "query reported errors: {rendered}"
            )));
        }
        if let Some(status) = &self.status {
            if status != "success" {
                return Err(StoreError::QueryExecution(format!(
                    "query finished with status {status:?}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
enum ParseEvent {
    /// One element of the `results` array, fully decoded.
    Row(Value),
    /// The buffered bytes are exhausted mid-envelope.
    NeedMore,
    /// The envelope's closing brace has been consumed.
    Finished(QueryOutcome),
}

#[derive(Debug)]
enum ParserState {
    Start,
    ExpectKey,
    Key,
    ExpectColon,
    ValueStart,
    Value(Capture),
    RowsIdle,
    Row(Capture),
    Done,
    Failed,
}

enum Step {
    Consumed,
    CompleteConsumed,
    CompleteUnconsumed,
}

/// Accumulates the bytes of exactly one JSON value, tracking bracket depth
/// and string state so delimiters inside strings never terminate it.
#[derive(Debug, Default)]
struct Capture {
    bytes: Vec<u8>,
    depth: u32,
    in_string: bool,
    escaped: bool,
    compound: bool,
}

impl Capture {
    fn step(&mut self, byte: u8) -> Step {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if byte == b'\\' {
                self.escaped = true;
            } else if byte == b'"' {
                self.in_string = false;
                if self.depth == 0 && !self.compound {
                    self.bytes.push(byte);
                    return Step::CompleteConsumed;
                }
            }
            self.bytes.push(byte);
            return Step::Consumed;
        }

        match byte {
            b',' | b'}' | b']' if self.depth == 0 => Step::CompleteUnconsumed,
            b'"' => {
                self.in_string = true;
                self.bytes.push(byte);
                Step::Consumed
            }
            b'{' | b'[' => {
                self.depth += 1;
                self.compound = true;
                self.bytes.push(byte);
                Step::Consumed
            }
            b'}' | b']' => {
                self.depth -= 1;
                self.bytes.push(byte);
                if self.depth == 0 {
                    Step::CompleteConsumed
                } else {
                    Step::Consumed
                }
            }
            b if b.is_ascii_whitespace() && self.depth == 0 => Step::CompleteUnconsumed,
            _ => {
                self.bytes.push(byte);
                Step::Consumed
            }
        }
    }
}

/// Incremental decoder for the streamed response envelope.
#[derive(Debug)]
struct ResponseParser {
    buf: Vec<u8>,
    pos: usize,
    state: ParserState,
    current_key: String,
    key_escaped: bool,
    outcome: QueryOutcome,
}

impl ResponseParser {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            state: ParserState::Start,
            current_key: String::new(),
            key_escaped: false,
            outcome: QueryOutcome::default(),
        }
    }

    fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    fn next_event(&mut self) -> StoreResult<ParseEvent> {
        while self.pos < self.buf.len() {
            let byte = self.buf[self.pos];
            match std::mem::replace(&mut self.state, ParserState::Failed) {
                ParserState::Start => {
                    self.pos += 1;
                    if byte == b'{' {
                        self.state = ParserState::ExpectKey;
                    } else if byte.is_ascii_whitespace() {
                        self.state = ParserState::Start;
                    } else {
                        return Err(Self::malformed(byte, "envelope start"));
                    }
                }
                ParserState::ExpectKey => {
                    self.pos += 1;
                    match byte {
                        b'"' => {
                            self.current_key.clear();
                            self.key_escaped = false;
                            self.state = ParserState::Key;
                        }
                        b'}' => self.state = ParserState::Done,
                        b',' => self.state = ParserState::ExpectKey,
                        b if b.is_ascii_whitespace() => self.state = ParserState::ExpectKey,
                        _ => return Err(Self::malformed(byte, "field name")),
                    }
                }
                ParserState::Key => {
                    self.pos += 1;
                    if self.key_escaped {
                        self.key_escaped = false;
                        self.current_key.push(byte as char);
                        self.state = ParserState::Key;
                    } else if byte == b'\\' {
                        self.key_escaped = true;
                        self.state = ParserState::Key;
                    } else if byte == b'"' {
                        self.state = ParserState::ExpectColon;
                    } else {
                        self.current_key.push(byte as char);
                        self.state = ParserState::Key;
                    }
                }
                ParserState::ExpectColon => {
                    self.pos += 1;
                    if byte == b':' {
                        self.state = ParserState::ValueStart;
                    } else if byte.is_ascii_whitespace() {
                        self.state = ParserState::ExpectColon;
                    } else {
                        return Err(Self::malformed(byte, "field separator"));
                    }
                }
                ParserState::ValueStart => {
                    if byte.is_ascii_whitespace() {
                        self.pos += 1;
                        self.state = ParserState::ValueStart;
                    } else if byte == b'[' && self.current_key == "results" {
                        self.pos += 1;
                        self.state = ParserState::RowsIdle;
                    } else {
                        // First byte of the value; Capture takes it from here.
                        self.state = ParserState::Value(Capture::default());
                    }
                }
                ParserState::Value(mut capture) => match capture.step(byte) {
                    Step::Consumed => {
                        self.pos += 1;
                        self.state = ParserState::Value(capture);
                    }
                    Step::CompleteConsumed => {
                        self.pos += 1;
                        self.record_envelope_value(capture.bytes)?;
                        self.state = ParserState::ExpectKey;
                    }
                    Step::CompleteUnconsumed => {
                        self.record_envelope_value(capture.bytes)?;
                        self.state = ParserState::ExpectKey;
                    }
                },
                ParserState::RowsIdle => {
                    match byte {
                        b']' => {
                            self.pos += 1;
                            self.state = ParserState::ExpectKey;
                        }
                        b',' => {
                            self.pos += 1;
                            self.state = ParserState::RowsIdle;
                        }
                        b if b.is_ascii_whitespace() => {
                            self.pos += 1;
                            self.state = ParserState::RowsIdle;
                        }
                        _ => self.state = ParserState::Row(Capture::default()),
                    }
                }
                ParserState::Row(mut capture) => match capture.step(byte) {
                    Step::Consumed => {
                        self.pos += 1;
                        self.state = ParserState::Row(capture);
                    }
                    Step::CompleteConsumed => {
                        self.pos += 1;
                        self.state = ParserState::RowsIdle;
                        return Ok(ParseEvent::Row(serde_json::from_slice(&capture.bytes)?));
                    }
                    Step::CompleteUnconsumed => {
                        self.state = ParserState::RowsIdle;
                        return Ok(ParseEvent::Row(serde_json::from_slice(&capture.bytes)?));
                    }
                },
                ParserState::Done => {
                    self.pos += 1;
                    if byte.is_ascii_whitespace() {
                        self.state = ParserState::Done;
                    } else {
                        return Err(Self::malformed(byte, "trailing data"));
                    }
                }
                ParserState::Failed => {
                    return Err(StoreError::QueryExecution(
                        "query response parser already failed".into(),
                    ));
                }
            }
        }

        self.buf.clear();
        self.pos = 0;

        if matches!(self.state, ParserState::Done) {
            Ok(ParseEvent::Finished(std::mem::take(&mut self.outcome)))
        } else {
            Ok(ParseEvent::NeedMore)
        }
    }

    /// Called once the underlying stream reports end-of-data.
    fn finish(&mut self) -> StoreResult<QueryOutcome> {
        if matches!(self.state, ParserState::Done) {
            Ok(std::mem::take(&mut self.outcome))
        } else {
            Err(StoreError::QueryExecution(
                "unexpected end of query response".into(),
            ))
        }
    }

    fn record_envelope_value(&mut self, bytes: Vec<u8>) -> StoreResult<()> {
        match self.current_key.as_str() {
            "errors" => {
                let value: Value = serde_json::from_slice(&bytes)?;
                match value {
                    Value::Array(items) => self.outcome.errors.extend(items),
                    other => self.outcome.errors.push(other),
                }
            }
            "status" => {
                let value: Value = serde_json::from_slice(&bytes)?;
                if let Value::String(status) = value {
                    self.outcome.status = Some(status);
                }
            }
            // requestID, signature, metrics and friends are not interesting.
            _ => {}
        }
        Ok(())
    }

    fn malformed(byte: u8, context: &str) -> StoreError {
        StoreError::QueryExecution(format!(
            "malformed query response: unexpected byte {:?} in {context}",
            byte as char
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RowsState {
    Unopened,
    Streaming,
    Exhausted,
    Errored,
}

/// Asynchronous, forward-only enumerator over query result rows.
///
/// The query request itself is deferred: nothing is sent to the store until
/// the first call to [`advance`](DocumentRows::advance). Once the enumerator
/// has yielded `Ok(None)` or an error it is terminal and every further call
/// returns `Ok(None)`.
pub struct DocumentRows<'a> {
    opener: Option<BoxFuture<'a, StoreResult<Box<dyn RowStream>>>>,
    stream: Option<Box<dyn RowStream>>,
    parser: ResponseParser,
    state: RowsState,
    cancel: CancellationToken,
}

impl<'a> DocumentRows<'a> {
    pub(crate) fn new(
        opener: BoxFuture<'a, StoreResult<Box<dyn RowStream>>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            opener: Some(opener),
            stream: None,
            parser: ResponseParser::new(),
            state: RowsState::Unopened,
            cancel,
        }
    }

    /// Yields the next row, or `Ok(None)` once the result set is exhausted.
    ///
    /// Deferred query errors (the envelope's `errors` array, a non-success
    /// status, or a truncated response) surface here after the last row.
    pub async fn advance(&mut self) -> StoreResult<Option<Value>> {
        if matches!(self.state, RowsState::Exhausted | RowsState::Errored) {
            return Ok(None);
        }

        if self.cancel.is_cancelled() {
            return self.fail(StoreError::Canceled);
        }

        if let Some(opener) = self.opener.take() {
            match opener.await {
                Ok(stream) => {
                    self.stream = Some(stream);
                    self.state = RowsState::Streaming;
                }
                Err(err) => return self.fail(err),
            }
        }

        loop {
            match self.parser.next_event() {
                Ok(ParseEvent::Row(row)) => return Ok(Some(row)),
                Ok(ParseEvent::Finished(outcome)) => return self.complete(outcome),
                Ok(ParseEvent::NeedMore) => {
                    let stream = match self.stream.as_mut() {
                        Some(stream) => stream,
                        None => {
                            return self.fail(StoreError::Internal(
                                "row stream missing while decoding".into(),
                            ));
                        }
                    };
                    match stream.next_chunk().await {
                        Ok(Some(chunk)) => self.parser.feed(&chunk),
                        Ok(None) => {
                            let outcome = match self.parser.finish() {
                                Ok(outcome) => outcome,
                                Err(err) => return self.fail(err),
                            };
                            return self.complete(outcome);
                        }
                        Err(err) => return self.fail(err),
                    }
                }
                Err(err) => return self.fail(err),
            }
        }
    }

    /// Releases the underlying response stream without draining it.
    /// Idempotent; further [`advance`](DocumentRows::advance) calls return
    /// `Ok(None)`.
    pub fn dispose(&mut self) {
        self.opener = None;
        self.stream = None;
        if self.state != RowsState::Errored {
            self.state = RowsState::Exhausted;
        }
    }

    /// Rewinding is not supported; enumeration is forward-only.
    pub fn reset(&mut self) -> StoreResult<()> {
        Err(StoreError::Unsupported("query enumerators cannot be reset"))
    }

    /// Adapts the enumerator into a [`Stream`] of rows.
    pub fn into_stream(self) -> impl Stream<Item = StoreResult<Value>> + 'a {
        futures::stream::unfold(Some(self), |slot| async move {
            let mut rows = slot?;
            match rows.advance().await {
                Ok(Some(row)) => Some((Ok(row), Some(rows))),
                Ok(None) => None,
                // The enumerator is terminal after an error, so the next
                // unfold step ends the stream.
                Err(err) => Some((Err(err), Some(rows))),
            }
        })
    }

    fn complete(&mut self, outcome: QueryOutcome) -> StoreResult<Option<Value>> {
        self.stream = None;
        match outcome.into_result() {
            Ok(()) => {
                self.state = RowsState::Exhausted;
                Ok(None)
            }
            Err(err) => self.fail(err),
        }
    }

    fn fail<T>(&mut self, err: StoreError) -> StoreResult<Option<T>> {
        self.state = RowsState::Errored;
        self.opener = None;
        self.stream = None;
        Err(err)
    }
}

impl std::fmt::Debug for DocumentRows<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentRows")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Blocking adapter over [`DocumentRows`] for synchronous call sites.
///
/// Each `next` drives the asynchronous enumerator to completion on the
/// strategy's private runtime, so both calling conventions share one decoding
/// path.
pub struct BlockingDocumentRows<'a> {
    inner: DocumentRows<'a>,
    runtime: Arc<Runtime>,
}

impl<'a> BlockingDocumentRows<'a> {
    pub(crate) fn new(inner: DocumentRows<'a>, runtime: Arc<Runtime>) -> Self {
        Self { inner, runtime }
    }

    /// See [`DocumentRows::dispose`].
    pub fn dispose(&mut self) {
        self.inner.dispose();
    }

    /// See [`DocumentRows::reset`].
    pub fn reset(&mut self) -> StoreResult<()> {
        self.inner.reset()
    }
}

impl Iterator for BlockingDocumentRows<'_> {
    type Item = StoreResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.inner.advance()).transpose()
    }
}

impl std::fmt::Debug for BlockingDocumentRows<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingDocumentRows")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

//! Incremental HTTP/1.x tokenizer.
//!
//! [`Tokenizer`] is a byte-level state machine. It never buffers message
//! content: every run of URL, status, header or body bytes found in the slice
//! passed to [`Tokenizer::execute`] is reported to an [`EventSink`] as a
//! fragment and forgotten. A token split across two calls is reported as two
//! fragments, so sinks must concatenate.
//!
//! The only bytes kept between calls are the short tokens the tokenizer has to
//! interpret itself (method, version, status code, framing header values).
//!
//! ```text
//!  Start ─► start line ─► headers ─► on_headers_complete ─┬─► identity body ──┐
//!    ▲                                                    ├─► chunked body ───┤
//!    │                                                    ├─► until EOF ──────┤
//!    │                                                    └─► no body ────────┤
//!    └──────────────── keep-alive ◄── MessageComplete ◄───────────────────────┘
//! ```

use tracing::trace;

use crate::config::ParserConfig;
use crate::error::{ParseError, ParseErrorKind};
use crate::http::request::method_code;
use crate::http::version::Version;

/// Method code of `CONNECT` in the method table.
const CONNECT: u8 = 5;

const MAX_METHOD_LEN: usize = 16;
const MAX_VERSION_LEN: usize = 8;
/// Longest header name the tokenizer needs to recognise is 17 bytes.
const MAX_FIELD_NAME_LEN: usize = 32;

/// Whether a tokenizer reads requests or responses. Fixed per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    Request,
    Response,
}

/// Structural events reported while tokenizing.
///
/// Slices borrow the buffer passed to [`Tokenizer::execute`] and are only
/// valid for the duration of the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event<'a> {
    MessageBegin,
    /// Part of the request target (requests only).
    Url(&'a [u8]),
    /// Part of the reason phrase (responses only).
    Status(&'a [u8]),
    HeaderField(&'a [u8]),
    HeaderValue(&'a [u8]),
    Body(&'a [u8]),
    /// A chunk-size line was read; `0` marks the terminal chunk.
    ChunkHeader(u64),
    ChunkComplete,
    MessageComplete,
}

/// What the sink wants done after the header section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Read a body as the framing headers describe.
    None,
    /// No body follows, whatever the framing headers say.
    NoBody,
    /// No body follows and nothing else may arrive on this connection.
    NoBodyNoFurtherResponses,
}

/// Facts about the message known once the header section is complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Head {
    pub version: Version,
    /// Method code for requests, see [`Method::from_code`](crate::http::request::Method::from_code).
    pub method: Option<u8>,
    /// Status code for responses.
    pub status: Option<u16>,
    pub content_length: Option<u64>,
    pub chunked: bool,
    pub keep_alive: bool,
    pub upgrade: bool,
}

/// Receiver of tokenizer events.
pub trait EventSink {
    type Error;

    fn on_event(&mut self, event: Event<'_>) -> Result<(), Self::Error>;

    fn on_headers_complete(&mut self, head: &Head) -> Result<Directive, Self::Error>;
}

/// Failure of [`Tokenizer::execute`]: either the bytes were bad or the sink
/// refused an event.
#[derive(Debug)]
pub enum ExecuteError<E> {
    Parse(ParseError),
    Handler(E),
}

impl<E> From<ParseErrorKind> for ExecuteError<E> {
    fn from(kind: ParseErrorKind) -> Self {
        ExecuteError::Parse(ParseError::new(kind))
    }
}

type Step<E> = Result<usize, ExecuteError<E>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineEnd {
    StartLine,
    HeaderValue,
    Headers,
    ChunkSize,
    ChunkData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Method,
    UrlStart,
    Url,
    RequestVersion,
    ResponseVersion,
    StatusCode,
    StatusPhrase,
    ExpectLf(LineEnd),
    HeaderFieldStart,
    HeaderField,
    HeaderValueStart,
    HeaderValue,
    HeaderValueEnd,
    BodyIdentity { remaining: u64 },
    BodyUntilEof,
    ChunkSize,
    ChunkExtension,
    ChunkData { remaining: u64 },
    ChunkDataEnd,
    Upgraded,
    Dead,
}

impl State {
    fn in_head(&self) -> bool {
        matches!(
            self,
            State::Method
                | State::UrlStart
                | State::Url
                | State::RequestVersion
                | State::ResponseVersion
                | State::StatusCode
                | State::StatusPhrase
                | State::ExpectLf(LineEnd::StartLine | LineEnd::HeaderValue | LineEnd::Headers)
                | State::HeaderFieldStart
                | State::HeaderField
                | State::HeaderValueStart
                | State::HeaderValue
                | State::HeaderValueEnd
        )
    }
}

/// Header fields that affect framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramingHeader {
    ContentLength,
    TransferEncoding,
    Connection,
    Upgrade,
    Other,
}

impl FramingHeader {
    fn classify(lowercase_name: &[u8]) -> Self {
        match lowercase_name {
            b"content-length" => FramingHeader::ContentLength,
            b"transfer-encoding" => FramingHeader::TransferEncoding,
            b"connection" => FramingHeader::Connection,
            b"upgrade" => FramingHeader::Upgrade,
            _ => FramingHeader::Other,
        }
    }
}

/// Per-message facts gathered from the start line and framing headers.
#[derive(Debug, Default)]
struct MessageInfo {
    version: Version,
    method: Option<u8>,
    status: Option<u16>,
    content_length: Option<u64>,
    transfer_encoding: bool,
    chunked: bool,
    connection_close: bool,
    connection_keep_alive: bool,
    connection_upgrade: bool,
    upgrade_header: bool,
}

impl MessageInfo {
    fn keep_alive(&self) -> bool {
        if self.connection_close {
            return false;
        }
        self.version.keeps_alive_by_default() || self.connection_keep_alive
    }
}

/// The HTTP/1.x tokenizer. See the module docs.
#[derive(Debug)]
pub struct Tokenizer {
    kind: ParserKind,
    config: ParserConfig,
    state: State,
    /// Bytes of the current token the tokenizer interprets itself.
    scratch: Vec<u8>,
    header: FramingHeader,
    info: MessageInfo,
    head_bytes: usize,
    chunk_size: u64,
    chunk_digits: usize,
    in_trailers: bool,
    no_further_messages: bool,
}

impl Tokenizer {
    pub fn new(kind: ParserKind, config: ParserConfig) -> Self {
        Self {
            kind,
            config,
            state: State::Start,
            scratch: Vec::with_capacity(MAX_FIELD_NAME_LEN),
            header: FramingHeader::Other,
            info: MessageInfo::default(),
            head_bytes: 0,
            chunk_size: 0,
            chunk_digits: 0,
            in_trailers: false,
            no_further_messages: false,
        }
    }

    pub fn kind(&self) -> ParserKind {
        self.kind
    }

    /// Returns to the initial state, discarding any partial message.
    pub fn reset(&mut self) {
        self.state = State::Start;
        self.scratch.clear();
        self.header = FramingHeader::Other;
        self.info = MessageInfo::default();
        self.head_bytes = 0;
        self.chunk_size = 0;
        self.chunk_digits = 0;
        self.in_trailers = false;
        self.no_further_messages = false;
    }

    /// The connection switched protocols; the tokenizer consumes nothing more.
    pub fn is_upgraded(&self) -> bool {
        self.state == State::Upgraded
    }

    /// Whether the tokenizer sits between messages.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Start | State::Dead | State::Upgraded)
    }

    /// Feeds `data` through the state machine, reporting events to `sink`.
    ///
    /// Returns the number of bytes consumed. That is `data.len()` unless the
    /// connection was upgraded part way through. On error the tokenizer is
    /// reset before the error is returned.
    pub fn execute<S: EventSink>(&mut self, sink: &mut S, data: &[u8]) -> Result<usize, ExecuteError<S::Error>> {
        self.run(sink, data).inspect_err(|err| {
            if let ExecuteError::Parse(e) = err {
                trace!(code = e.code(), state = ?self.state, "tokenizer rejected input");
            }
            self.reset();
        })
    }

    /// Signals that no more input will arrive.
    ///
    /// Completes a body delimited by connection close. Fails if the stream
    /// ends in the middle of any other message.
    pub fn finish<S: EventSink>(&mut self, sink: &mut S) -> Result<(), ExecuteError<S::Error>> {
        let result = match self.state {
            State::Start | State::Dead | State::Upgraded => Ok(()),
            State::BodyUntilEof => self.message_complete(sink),
            _ => Err(ParseErrorKind::InvalidEofState.into()),
        };
        result.inspect_err(|_| self.reset())
    }

    fn run<S: EventSink>(&mut self, sink: &mut S, data: &[u8]) -> Step<S::Error> {
        let mut i = 0;
        while i < data.len() {
            if self.state == State::Upgraded {
                break;
            }

            let counted = self.state.in_head();
            let next = self.step(sink, data, i)?;
            if counted {
                self.head_bytes += next - i;
                if self.head_bytes > self.config.max_header_size {
                    return Err(ParseErrorKind::HeaderOverflow.into());
                }
            }
            i = next;
        }
        Ok(i)
    }

    /// Runs one state from `data[i]`, returning the index reached.
    fn step<S: EventSink>(&mut self, sink: &mut S, data: &[u8], i: usize) -> Step<S::Error> {
        let ch = data[i];
        match self.state {
            State::Start => {
                if ch == b'\r' || ch == b'\n' {
                    return Ok(i + 1);
                }
                self.begin_message(sink)?;
                Ok(i)
            }

            State::Method => match ch {
                b' ' => {
                    let code = method_code(&self.scratch).ok_or(ParseErrorKind::InvalidMethod)?;
                    self.info.method = Some(code);
                    self.state = State::UrlStart;
                    Ok(i + 1)
                }
                c if is_token(c) && self.scratch.len() < MAX_METHOD_LEN => {
                    self.scratch.push(c);
                    Ok(i + 1)
                }
                _ => Err(ParseErrorKind::InvalidMethod.into()),
            },

            State::UrlStart => match ch {
                b' ' => Ok(i + 1),
                c if is_url_byte(c) => {
                    self.state = State::Url;
                    Ok(i)
                }
                _ => Err(ParseErrorKind::InvalidUrl.into()),
            },

            State::Url => {
                let end = scan(data, i, is_url_byte);
                if end > i {
                    emit(sink, Event::Url(&data[i..end]))?;
                }
                match data.get(end) {
                    None => Ok(end),
                    Some(b' ') => {
                        self.scratch.clear();
                        self.state = State::RequestVersion;
                        Ok(end + 1)
                    }
                    // A request line must carry a version.
                    Some(b'\r' | b'\n') => Err(ParseErrorKind::InvalidVersion.into()),
                    Some(_) => Err(ParseErrorKind::InvalidUrl.into()),
                }
            }

            State::RequestVersion => match ch {
                b'\r' => {
                    self.info.version = parse_version(&self.scratch)?;
                    self.state = State::ExpectLf(LineEnd::StartLine);
                    Ok(i + 1)
                }
                b'\n' => {
                    self.info.version = parse_version(&self.scratch)?;
                    self.end_line(sink, LineEnd::StartLine)?;
                    Ok(i + 1)
                }
                c => {
                    self.push_version_byte(c)?;
                    Ok(i + 1)
                }
            },

            State::ResponseVersion => match ch {
                b' ' => {
                    self.info.version = parse_version(&self.scratch)?;
                    self.scratch.clear();
                    self.state = State::StatusCode;
                    Ok(i + 1)
                }
                b'\r' | b'\n' => Err(ParseErrorKind::InvalidVersion.into()),
                c => {
                    self.push_version_byte(c)?;
                    Ok(i + 1)
                }
            },

            State::StatusCode => match ch {
                c if c.is_ascii_digit() && self.scratch.len() < 3 => {
                    self.scratch.push(c);
                    Ok(i + 1)
                }
                b' ' => {
                    self.info.status = Some(parse_status(&self.scratch)?);
                    self.state = State::StatusPhrase;
                    Ok(i + 1)
                }
                b'\r' => {
                    self.info.status = Some(parse_status(&self.scratch)?);
                    self.state = State::ExpectLf(LineEnd::StartLine);
                    Ok(i + 1)
                }
                b'\n' => {
                    self.info.status = Some(parse_status(&self.scratch)?);
                    self.end_line(sink, LineEnd::StartLine)?;
                    Ok(i + 1)
                }
                _ => Err(ParseErrorKind::InvalidStatus.into()),
            },

            State::StatusPhrase => {
                let end = scan(data, i, is_text_byte);
                if end > i {
                    emit(sink, Event::Status(&data[i..end]))?;
                }
                self.line_terminator(sink, data, end, LineEnd::StartLine, ParseErrorKind::InvalidStatus)
            }

            State::ExpectLf(line) => {
                if ch != b'\n' {
                    return Err(ParseErrorKind::StrictLineEnding.into());
                }
                self.end_line(sink, line)?;
                Ok(i + 1)
            }

            State::HeaderFieldStart => match ch {
                b'\r' => {
                    self.state = State::ExpectLf(LineEnd::Headers);
                    Ok(i + 1)
                }
                b'\n' => {
                    self.end_line(sink, LineEnd::Headers)?;
                    Ok(i + 1)
                }
                c if is_token(c) => {
                    self.scratch.clear();
                    self.state = State::HeaderField;
                    Ok(i)
                }
                _ => Err(ParseErrorKind::InvalidHeaderToken.into()),
            },

            State::HeaderField => {
                let end = scan(data, i, is_token);
                if end > i {
                    let room = MAX_FIELD_NAME_LEN.saturating_sub(self.scratch.len());
                    self.scratch
                        .extend(data[i..end].iter().take(room).map(u8::to_ascii_lowercase));
                    emit(sink, Event::HeaderField(&data[i..end]))?;
                }
                match data.get(end) {
                    None => Ok(end),
                    Some(b':') => {
                        self.header = if self.in_trailers {
                            FramingHeader::Other
                        } else {
                            FramingHeader::classify(&self.scratch)
                        };
                        self.scratch.clear();
                        self.state = State::HeaderValueStart;
                        Ok(end + 1)
                    }
                    Some(_) => Err(ParseErrorKind::InvalidHeaderToken.into()),
                }
            }

            State::HeaderValueStart => match ch {
                b' ' | b'\t' => Ok(i + 1),
                b'\r' | b'\n' => {
                    // Report empty values so fields and values stay paired.
                    emit(sink, Event::HeaderValue(&[]))?;
                    self.line_terminator(sink, data, i, LineEnd::HeaderValue, ParseErrorKind::InvalidHeaderToken)
                }
                _ => {
                    self.state = State::HeaderValue;
                    Ok(i)
                }
            },

            State::HeaderValue => {
                let end = scan(data, i, is_text_byte);
                if end > i {
                    if self.header != FramingHeader::Other {
                        self.scratch.extend_from_slice(&data[i..end]);
                    }
                    emit(sink, Event::HeaderValue(&data[i..end]))?;
                }
                self.line_terminator(sink, data, end, LineEnd::HeaderValue, ParseErrorKind::InvalidHeaderToken)
            }

            State::HeaderValueEnd => match ch {
                // obs-fold: the value continues on this line.
                b' ' | b'\t' => {
                    emit(sink, Event::HeaderValue(b" "))?;
                    if self.header != FramingHeader::Other {
                        self.scratch.push(b' ');
                    }
                    self.state = State::HeaderValueStart;
                    Ok(i + 1)
                }
                _ => {
                    self.finish_header()?;
                    self.state = State::HeaderFieldStart;
                    Ok(i)
                }
            },

            State::BodyIdentity { remaining } => {
                let n = remaining.min((data.len() - i) as u64);
                let end = i + n as usize;
                emit(sink, Event::Body(&data[i..end]))?;
                if n == remaining {
                    self.message_complete(sink)?;
                } else {
                    self.state = State::BodyIdentity { remaining: remaining - n };
                }
                Ok(end)
            }

            State::BodyUntilEof => {
                emit(sink, Event::Body(&data[i..]))?;
                Ok(data.len())
            }

            State::ChunkSize => match ch {
                c if c.is_ascii_hexdigit() => {
                    let digit = (c as char).to_digit(16).unwrap_or_default() as u64;
                    self.chunk_size = self
                        .chunk_size
                        .checked_mul(16)
                        .and_then(|size| size.checked_add(digit))
                        .ok_or(ParseErrorKind::InvalidChunkSize)?;
                    self.chunk_digits += 1;
                    Ok(i + 1)
                }
                b';' | b' ' | b'\t' if self.chunk_digits > 0 => {
                    self.state = State::ChunkExtension;
                    Ok(i + 1)
                }
                b'\r' if self.chunk_digits > 0 => {
                    self.state = State::ExpectLf(LineEnd::ChunkSize);
                    Ok(i + 1)
                }
                b'\n' if self.chunk_digits > 0 => {
                    self.end_line(sink, LineEnd::ChunkSize)?;
                    Ok(i + 1)
                }
                _ => Err(ParseErrorKind::InvalidChunkSize.into()),
            },

            State::ChunkExtension => {
                let end = scan(data, i, is_text_byte);
                self.line_terminator(sink, data, end, LineEnd::ChunkSize, ParseErrorKind::InvalidChunkSize)
            }

            State::ChunkData { remaining } => {
                let n = remaining.min((data.len() - i) as u64);
                let end = i + n as usize;
                emit(sink, Event::Body(&data[i..end]))?;
                self.state = if n == remaining {
                    State::ChunkDataEnd
                } else {
                    State::ChunkData { remaining: remaining - n }
                };
                Ok(end)
            }

            State::ChunkDataEnd => {
                self.line_terminator(sink, data, i, LineEnd::ChunkData, ParseErrorKind::StrictLineEnding)
            }

            State::Upgraded => Ok(i),

            State::Dead => match ch {
                b'\r' | b'\n' => Ok(i + 1),
                _ => Err(ParseErrorKind::ClosedConnection.into()),
            },
        }
    }

    /// Handles the byte at `data[at]` (if any) as the end of a line: CR waits
    /// for LF, a bare LF ends the line at once, anything else is `invalid`.
    fn line_terminator<S: EventSink>(
        &mut self,
        sink: &mut S,
        data: &[u8],
        at: usize,
        line: LineEnd,
        invalid: ParseErrorKind,
    ) -> Step<S::Error> {
        match data.get(at) {
            None => Ok(at),
            Some(b'\r') => {
                self.state = State::ExpectLf(line);
                Ok(at + 1)
            }
            Some(b'\n') => {
                self.end_line(sink, line)?;
                Ok(at + 1)
            }
            Some(_) => Err(invalid.into()),
        }
    }

    fn end_line<S: EventSink>(&mut self, sink: &mut S, line: LineEnd) -> Result<(), ExecuteError<S::Error>> {
        match line {
            LineEnd::StartLine => {
                self.state = State::HeaderFieldStart;
                Ok(())
            }
            LineEnd::HeaderValue => {
                self.state = State::HeaderValueEnd;
                Ok(())
            }
            LineEnd::Headers if self.in_trailers => {
                emit(sink, Event::ChunkComplete)?;
                self.message_complete(sink)
            }
            LineEnd::Headers => self.headers_complete(sink),
            LineEnd::ChunkSize => {
                let size = self.chunk_size;
                emit(sink, Event::ChunkHeader(size))?;
                if size == 0 {
                    self.in_trailers = true;
                    self.head_bytes = 0;
                    self.state = State::HeaderFieldStart;
                } else {
                    self.state = State::ChunkData { remaining: size };
                }
                Ok(())
            }
            LineEnd::ChunkData => {
                emit(sink, Event::ChunkComplete)?;
                self.chunk_size = 0;
                self.chunk_digits = 0;
                self.state = State::ChunkSize;
                Ok(())
            }
        }
    }

    fn begin_message<S: EventSink>(&mut self, sink: &mut S) -> Result<(), ExecuteError<S::Error>> {
        self.scratch.clear();
        self.header = FramingHeader::Other;
        self.info = MessageInfo::default();
        self.head_bytes = 0;
        self.chunk_size = 0;
        self.chunk_digits = 0;
        self.in_trailers = false;
        self.state = match self.kind {
            ParserKind::Request => State::Method,
            ParserKind::Response => State::ResponseVersion,
        };
        emit(sink, Event::MessageBegin)
    }

    fn push_version_byte(&mut self, c: u8) -> Result<(), ParseErrorKind> {
        if self.scratch.len() >= MAX_VERSION_LEN {
            return Err(ParseErrorKind::InvalidVersion);
        }
        self.scratch.push(c);
        Ok(())
    }

    /// Applies a completed framing header value.
    fn finish_header(&mut self) -> Result<(), ParseErrorKind> {
        let value = std::mem::take(&mut self.scratch);
        let info = &mut self.info;
        match self.header {
            FramingHeader::ContentLength => {
                let length = parse_content_length(&value)?;
                if info.content_length.is_some_and(|existing| existing != length) {
                    return Err(ParseErrorKind::InvalidContentLength);
                }
                info.content_length = Some(length);
            }
            FramingHeader::TransferEncoding => {
                info.transfer_encoding = true;
                if let Some(last) = tokens(&value).last() {
                    info.chunked = last.eq_ignore_ascii_case(b"chunked");
                }
            }
            FramingHeader::Connection => {
                for token in tokens(&value) {
                    if token.eq_ignore_ascii_case(b"close") {
                        info.connection_close = true;
                    } else if token.eq_ignore_ascii_case(b"keep-alive") {
                        info.connection_keep_alive = true;
                    } else if token.eq_ignore_ascii_case(b"upgrade") {
                        info.connection_upgrade = true;
                    }
                }
            }
            FramingHeader::Upgrade => info.upgrade_header = true,
            FramingHeader::Other => {}
        }
        self.scratch = value;
        self.scratch.clear();
        self.header = FramingHeader::Other;
        Ok(())
    }

    fn headers_complete<S: EventSink>(&mut self, sink: &mut S) -> Result<(), ExecuteError<S::Error>> {
        let info = &self.info;
        if info.chunked && info.content_length.is_some() {
            return Err(ParseErrorKind::UnexpectedContentLength.into());
        }
        if self.kind == ParserKind::Request && info.transfer_encoding && !info.chunked {
            return Err(ParseErrorKind::InvalidTransferEncoding.into());
        }

        let upgrade_requested = info.connection_upgrade && info.upgrade_header;
        let upgrade = match self.kind {
            ParserKind::Request => upgrade_requested || info.method == Some(CONNECT),
            ParserKind::Response => upgrade_requested && info.status == Some(101),
        };
        let head = Head {
            version: info.version,
            method: info.method,
            status: info.status,
            content_length: info.content_length,
            chunked: info.chunked,
            keep_alive: info.keep_alive(),
            upgrade,
        };

        let directive = sink.on_headers_complete(&head).map_err(ExecuteError::Handler)?;
        match directive {
            Directive::NoBodyNoFurtherResponses => {
                self.no_further_messages = true;
                self.message_complete(sink)
            }
            Directive::NoBody => self.message_complete(sink),
            Directive::None if upgrade => {
                emit(sink, Event::MessageComplete)?;
                self.state = State::Upgraded;
                Ok(())
            }
            Directive::None if head.chunked => {
                self.chunk_size = 0;
                self.chunk_digits = 0;
                self.state = State::ChunkSize;
                Ok(())
            }
            Directive::None => match (head.content_length, self.kind) {
                (Some(0), _) => self.message_complete(sink),
                (Some(remaining), _) => {
                    self.state = State::BodyIdentity { remaining };
                    Ok(())
                }
                (None, ParserKind::Request) => self.message_complete(sink),
                (None, ParserKind::Response) if head.status.is_some_and(status_has_no_body) => {
                    self.message_complete(sink)
                }
                (None, ParserKind::Response) => {
                    self.state = State::BodyUntilEof;
                    Ok(())
                }
            },
        }
    }

    fn message_complete<S: EventSink>(&mut self, sink: &mut S) -> Result<(), ExecuteError<S::Error>> {
        let close_delimited = self.state == State::BodyUntilEof;
        let keep_alive = self.info.keep_alive() && !close_delimited && !self.no_further_messages;
        // Settle the next state first so a failing sink leaves no half-read message behind.
        self.state = if keep_alive { State::Start } else { State::Dead };
        emit(sink, Event::MessageComplete)
    }
}

fn emit<S: EventSink>(sink: &mut S, event: Event<'_>) -> Result<(), ExecuteError<S::Error>> {
    sink.on_event(event).map_err(ExecuteError::Handler)
}

/// Index of the first byte at or after `from` that fails `accept`.
fn scan(data: &[u8], from: usize, accept: impl Fn(u8) -> bool) -> usize {
    data[from..]
        .iter()
        .position(|&b| !accept(b))
        .map_or(data.len(), |offset| from + offset)
}

/// RFC 7230 `tchar`.
fn is_token(c: u8) -> bool {
    c.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&c)
}

/// Anything visible; non-ASCII bytes pass through for the consumer to judge.
fn is_url_byte(c: u8) -> bool {
    c > b' ' && c != 0x7f
}

/// Field content and reason phrases: visible characters, SP, HTAB, obs-text.
fn is_text_byte(c: u8) -> bool {
    c == b'\t' || (b' '..=b'~').contains(&c) || c >= 0x80
}

fn parse_version(raw: &[u8]) -> Result<Version, ParseErrorKind> {
    let digits = raw.strip_prefix(b"HTTP/").ok_or(ParseErrorKind::InvalidConstant)?;
    match digits {
        [major, b'.', minor] if major.is_ascii_digit() && minor.is_ascii_digit() => {
            Ok(Version::new(major - b'0', minor - b'0'))
        }
        _ => Err(ParseErrorKind::InvalidVersion),
    }
}

fn parse_status(raw: &[u8]) -> Result<u16, ParseErrorKind> {
    if raw.len() != 3 || raw[0] == b'0' {
        return Err(ParseErrorKind::InvalidStatus);
    }
    Ok(raw.iter().fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0')))
}

fn parse_content_length(raw: &[u8]) -> Result<u64, ParseErrorKind> {
    let digits = raw.trim_ascii();
    if digits.is_empty() {
        return Err(ParseErrorKind::InvalidContentLength);
    }
    digits.iter().try_fold(0u64, |acc, &d| {
        if !d.is_ascii_digit() {
            return Err(ParseErrorKind::InvalidContentLength);
        }
        acc.checked_mul(10)
            .and_then(|acc| acc.checked_add(u64::from(d - b'0')))
            .ok_or(ParseErrorKind::InvalidContentLength)
    })
}

/// Non-empty comma-separated list items, trimmed.
fn tokens(value: &[u8]) -> impl Iterator<Item = &[u8]> {
    value
        .split(|&b| b == b',')
        .map(<[u8]>::trim_ascii)
        .filter(|token| !token.is_empty())
}

/// 1xx, 204 and 304 responses never carry a body.
pub fn status_has_no_body(status: u16) -> bool {
    (100..200).contains(&status) || status == 204 || status == 304
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records events as owned values, merging nothing.
    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        directive: Option<Directive>,
        heads: Vec<Head>,
    }

    impl EventSink for Recorder {
        type Error = std::convert::Infallible;

        fn on_event(&mut self, event: Event<'_>) -> Result<(), Self::Error> {
            let text = match event {
                Event::MessageBegin => "begin".to_string(),
                Event::Url(b) => format!("url:{}", String::from_utf8_lossy(b)),
                Event::Status(b) => format!("status:{}", String::from_utf8_lossy(b)),
                Event::HeaderField(b) => format!("field:{}", String::from_utf8_lossy(b)),
                Event::HeaderValue(b) => format!("value:{}", String::from_utf8_lossy(b)),
                Event::Body(b) => format!("body:{}", String::from_utf8_lossy(b)),
                Event::ChunkHeader(n) => format!("chunk:{}", n),
                Event::ChunkComplete => "chunk-done".to_string(),
                Event::MessageComplete => "complete".to_string(),
            };
            self.events.push(text);
            Ok(())
        }

        fn on_headers_complete(&mut self, head: &Head) -> Result<Directive, Self::Error> {
            self.heads.push(head.clone());
            self.events.push("headers-done".to_string());
            Ok(self.directive.unwrap_or(Directive::None))
        }
    }

    fn run(kind: ParserKind, input: &[u8]) -> (Recorder, Result<usize, ParseError>) {
        let mut tokenizer = Tokenizer::new(kind, ParserConfig::default());
        let mut recorder = Recorder::default();
        let result = tokenizer.execute(&mut recorder, input).map_err(|e| match e {
            ExecuteError::Parse(e) => e,
            ExecuteError::Handler(never) => match never {},
        });
        (recorder, result)
    }

    fn parse_kind(kind: ParserKind, input: &[u8]) -> ParseErrorKind {
        run(kind, input).1.unwrap_err().kind()
    }

    #[test]
    fn simple_request_event_order() {
        let (rec, result) = run(ParserKind::Request, b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n");

        assert_eq!(result.unwrap(), 28);
        assert_eq!(
            rec.events,
            vec!["begin", "url:/a", "field:Host", "value:x", "headers-done", "complete"]
        );
        assert_eq!(rec.heads[0].method, Some(1));
        assert_eq!(rec.heads[0].version, Version::HTTP_11);
        assert!(rec.heads[0].keep_alive);
    }

    #[test]
    fn response_status_phrase_and_identity_body() {
        let (rec, _) = run(
            ParserKind::Response,
            b"HTTP/1.0 404 Not Found\r\nContent-Length: 3\r\n\r\nabc",
        );

        assert_eq!(
            rec.events,
            vec![
                "begin",
                "status:Not Found",
                "field:Content-Length",
                "value:3",
                "headers-done",
                "body:abc",
                "complete"
            ]
        );
        assert_eq!(rec.heads[0].status, Some(404));
        assert_eq!(rec.heads[0].content_length, Some(3));
    }

    #[test]
    fn chunk_markers_surround_chunk_bodies() {
        let (rec, _) = run(
            ParserKind::Request,
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3;ext=1\r\nabc\r\n0\r\nX-Trailer: t\r\n\r\n",
        );

        assert_eq!(
            &rec.events[5..],
            &[
                "chunk:3",
                "body:abc",
                "chunk-done",
                "chunk:0",
                "field:X-Trailer",
                "value:t",
                "chunk-done",
                "complete"
            ]
        );
    }

    #[test]
    fn folded_header_value_continues() {
        let (rec, _) = run(ParserKind::Request, b"GET / HTTP/1.1\r\nX-Long: a\r\n  b\r\n\r\n");

        assert_eq!(&rec.events[2..6], &["field:X-Long", "value:a", "value: ", "value:b"]);
    }

    #[test]
    fn empty_header_value_is_reported() {
        let (rec, _) = run(ParserKind::Request, b"GET / HTTP/1.1\r\nX-Empty:\r\n\r\n");

        assert_eq!(&rec.events[2..4], &["field:X-Empty", "value:"]);
    }

    #[test]
    fn fragments_follow_buffer_boundaries() {
        let mut tokenizer = Tokenizer::new(ParserKind::Request, ParserConfig::default());
        let mut rec = Recorder::default();
        tokenizer.execute(&mut rec, b"GET /pa").unwrap();
        tokenizer.execute(&mut rec, b"th HTTP/1.1\r\nHo").unwrap();
        tokenizer.execute(&mut rec, b"st: exa").unwrap();
        tokenizer.execute(&mut rec, b"mple\r\n\r\n").unwrap();

        assert_eq!(
            rec.events,
            vec![
                "begin",
                "url:/pa",
                "url:th",
                "field:Ho",
                "field:st",
                "value:exa",
                "value:mple",
                "headers-done",
                "complete"
            ]
        );
    }

    #[test]
    fn leading_blank_lines_are_skipped() {
        let (rec, result) = run(ParserKind::Request, b"\r\n\r\nGET / HTTP/1.1\r\n\r\n");
        assert!(result.is_ok());
        assert_eq!(rec.events[0], "begin");
    }

    #[test]
    fn bare_lf_line_endings_are_accepted() {
        let (rec, result) = run(ParserKind::Request, b"GET / HTTP/1.1\nHost: x\n\n");
        assert!(result.is_ok());
        assert_eq!(rec.events.last().unwrap(), "complete");
    }

    #[test]
    fn malformed_start_lines() {
        assert_eq!(parse_kind(ParserKind::Request, b"GET /\r\n\r\n"), ParseErrorKind::InvalidVersion);
        assert_eq!(parse_kind(ParserKind::Request, b"FOO / HTTP/1.1\r\n"), ParseErrorKind::InvalidMethod);
        assert_eq!(parse_kind(ParserKind::Request, b"GET / HTTQ/1.1\r\n"), ParseErrorKind::InvalidConstant);
        assert_eq!(parse_kind(ParserKind::Request, b"GET / HTTP/1.x\r\n"), ParseErrorKind::InvalidVersion);
        assert_eq!(parse_kind(ParserKind::Request, b"GET / HTTP/1.1\rX"), ParseErrorKind::StrictLineEnding);
        assert_eq!(parse_kind(ParserKind::Response, b"HTTP/1.1 20 OK\r\n"), ParseErrorKind::InvalidStatus);
        assert_eq!(parse_kind(ParserKind::Response, b"HTTP/1.1 2000 OK\r\n"), ParseErrorKind::InvalidStatus);
    }

    #[test]
    fn malformed_headers() {
        assert_eq!(
            parse_kind(ParserKind::Request, b"GET / HTTP/1.1\r\nBad Header: x\r\n"),
            ParseErrorKind::InvalidHeaderToken
        );
        assert_eq!(
            parse_kind(ParserKind::Request, b"GET / HTTP/1.1\r\nContent-Length: 1x\r\n\r\n"),
            ParseErrorKind::InvalidContentLength
        );
        assert_eq!(
            parse_kind(
                ParserKind::Request,
                b"GET / HTTP/1.1\r\nContent-Length: 1\r\nContent-Length: 2\r\n\r\n"
            ),
            ParseErrorKind::InvalidContentLength
        );
        assert_eq!(
            parse_kind(
                ParserKind::Request,
                b"POST / HTTP/1.1\r\nContent-Length: 1\r\nTransfer-Encoding: chunked\r\n\r\n"
            ),
            ParseErrorKind::UnexpectedContentLength
        );
        assert_eq!(
            parse_kind(ParserKind::Request, b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip\r\n\r\n"),
            ParseErrorKind::InvalidTransferEncoding
        );
    }

    #[test]
    fn bad_chunk_size() {
        assert_eq!(
            parse_kind(
                ParserKind::Request,
                b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n"
            ),
            ParseErrorKind::InvalidChunkSize
        );
        assert_eq!(
            parse_kind(
                ParserKind::Request,
                b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n1\r\nabc"
            ),
            ParseErrorKind::StrictLineEnding
        );
    }

    #[test]
    fn header_section_size_is_bounded() {
        let mut tokenizer = Tokenizer::new(ParserKind::Request, ParserConfig { max_header_size: 32 });
        let mut rec = Recorder::default();
        let err = tokenizer
            .execute(&mut rec, b"GET / HTTP/1.1\r\nX-Padding: aaaaaaaaaaaaaaaaaaaa\r\n\r\n")
            .unwrap_err();

        assert!(matches!(err, ExecuteError::Parse(e) if e.kind() == ParseErrorKind::HeaderOverflow));
    }

    #[test]
    fn error_resets_to_initial_state() {
        let mut tokenizer = Tokenizer::new(ParserKind::Request, ParserConfig::default());
        let mut rec = Recorder::default();
        assert!(tokenizer.execute(&mut rec, b"GET / HTTP/1.1\r\n\x01").is_err());
        assert!(tokenizer.is_idle());

        rec.events.clear();
        tokenizer.execute(&mut rec, b"GET /ok HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(rec.events[1], "url:/ok");
    }

    #[test]
    fn connection_close_rejects_further_input() {
        let (rec, result) = run(
            ParserKind::Request,
            b"GET / HTTP/1.1\r\nConnection: close\r\n\r\nGET / HTTP/1.1\r\n\r\n",
        );

        assert_eq!(result.unwrap_err().kind(), ParseErrorKind::ClosedConnection);
        assert_eq!(rec.events.iter().filter(|e| *e == "complete").count(), 1);
    }

    #[test]
    fn http_10_without_keep_alive_closes() {
        let (rec, _) = run(ParserKind::Request, b"GET / HTTP/1.0\r\n\r\n");
        assert!(!rec.heads[0].keep_alive);

        let (rec, _) = run(ParserKind::Request, b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n");
        assert!(rec.heads[0].keep_alive);
    }

    #[test]
    fn upgrade_stops_consumption() {
        let input = b"GET /chat HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n\x81\x05hello";
        let (rec, result) = run(ParserKind::Request, input);

        assert_eq!(result.unwrap(), input.len() - 7);
        assert!(rec.heads[0].upgrade);
        assert_eq!(rec.events.last().unwrap(), "complete");
    }

    #[test]
    fn connect_request_is_an_upgrade() {
        let (rec, result) = run(ParserKind::Request, b"CONNECT example.com:443 HTTP/1.1\r\n\r\nraw");
        assert_eq!(result.unwrap(), 36);
        assert!(rec.heads[0].upgrade);
        assert_eq!(rec.heads[0].method, Some(CONNECT));
    }

    #[test]
    fn no_body_directive_skips_declared_body() {
        let mut tokenizer = Tokenizer::new(ParserKind::Response, ParserConfig::default());
        let mut rec = Recorder {
            directive: Some(Directive::NoBody),
            ..Recorder::default()
        };
        tokenizer
            .execute(
                &mut rec,
                b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nHTTP/1.1 204 No Content\r\n\r\n",
            )
            .unwrap();

        assert!(!rec.events.iter().any(|e| e.starts_with("body:")));
        assert_eq!(rec.events.iter().filter(|e| *e == "complete").count(), 2);
    }

    #[test]
    fn no_further_responses_directive_closes_stream() {
        let mut tokenizer = Tokenizer::new(ParserKind::Response, ParserConfig::default());
        let mut rec = Recorder {
            directive: Some(Directive::NoBodyNoFurtherResponses),
            ..Recorder::default()
        };
        let err = tokenizer
            .execute(&mut rec, b"HTTP/1.1 200 Connection Established\r\n\r\nHTTP/1.1 200 OK\r\n")
            .unwrap_err();

        assert!(matches!(err, ExecuteError::Parse(e) if e.kind() == ParseErrorKind::ClosedConnection));
    }

    #[test]
    fn close_delimited_response_completes_on_finish() {
        let mut tokenizer = Tokenizer::new(ParserKind::Response, ParserConfig::default());
        let mut rec = Recorder::default();
        tokenizer.execute(&mut rec, b"HTTP/1.1 200 OK\r\n\r\nsome").unwrap();
        tokenizer.execute(&mut rec, b" data").unwrap();
        assert_ne!(rec.events.last().unwrap(), "complete");

        tokenizer.finish(&mut rec).unwrap();
        assert_eq!(&rec.events[rec.events.len() - 3..], &["body:some", "body: data", "complete"]);
    }

    #[test]
    fn finish_mid_message_is_an_error() {
        let mut tokenizer = Tokenizer::new(ParserKind::Request, ParserConfig::default());
        let mut rec = Recorder::default();
        tokenizer.execute(&mut rec, b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nab").unwrap();

        let err = tokenizer.finish(&mut rec).unwrap_err();
        assert!(matches!(err, ExecuteError::Parse(e) if e.kind() == ParseErrorKind::InvalidEofState));
        assert!(tokenizer.is_idle());
    }

    #[test]
    fn bodyless_statuses_ignore_missing_length() {
        for status in ["100 Continue", "204 No Content", "304 Not Modified"] {
            let input = format!("HTTP/1.1 {}\r\n\r\n", status);
            let (rec, _) = run(ParserKind::Response, input.as_bytes());
            assert_eq!(rec.events.last().unwrap(), "complete", "{}", status);
        }
    }

    #[test]
    fn status_line_without_phrase() {
        let (rec, result) = run(ParserKind::Response, b"HTTP/1.1 204\r\n\r\n");
        assert!(result.is_ok());
        assert_eq!(rec.heads[0].status, Some(204));
        assert!(!rec.events.iter().any(|e| e.starts_with("status:")));
    }
}

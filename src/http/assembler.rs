//! Message assembly.
//!
//! [`MessageAssembler`] is the [`EventSink`] that turns tokenizer fragments
//! into complete [`Request`]s and [`Response`]s. [`Parser`] pairs it with the
//! [`Tokenizer`] it feeds on and is what connection code drives:
//!
//! ```ignore
//! let mut parser = RequestParser::new(|req| {
//!     println!("{} {}", req.method, req.target);
//!     Ok(())
//! });
//! parser.parse(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n")?;
//! ```

use std::collections::VecDeque;
use std::fmt;

use bytes::BytesMut;
use tracing::{debug, trace};

use crate::config::ParserConfig;
use crate::error::{EncodingError, Error, ParseError, ParseErrorKind, TextField};
use crate::http::request::{Method, Request, RequestBuilder};
use crate::http::response::{Response, ResponseBuilder};
use crate::http::tokenizer::{
    Directive, Event, EventSink, ExecuteError, Head, ParserKind, Tokenizer, status_has_no_body,
};
use crate::http::version::Version;

/// Fragments of the message currently being parsed.
#[derive(Debug, Default)]
pub struct ParseState {
    version: Version,
    /// Alternating field, value entries. Fragments of the entry in progress are
    /// appended to the last element.
    raw_headers: Vec<Vec<u8>>,
    body: BytesMut,
    status_code: Option<u16>,
    status_phrase: Vec<u8>,
    method: Option<Method>,
    uri: Vec<u8>,
}

impl ParseState {
    /// An even count means the last value is done, so a field fragment opens a
    /// new entry.
    fn push_field(&mut self, fragment: &[u8]) {
        if self.raw_headers.len() % 2 == 0 {
            self.raw_headers.push(fragment.to_vec());
        } else if let Some(field) = self.raw_headers.last_mut() {
            field.extend_from_slice(fragment);
        }
    }

    fn push_value(&mut self, fragment: &[u8]) {
        if self.raw_headers.len() % 2 == 1 {
            self.raw_headers.push(fragment.to_vec());
        } else if let Some(value) = self.raw_headers.last_mut() {
            value.extend_from_slice(fragment);
        }
    }

    /// Header entries decoded to text, values trimmed of surrounding whitespace.
    fn decode_headers(raw_headers: Vec<Vec<u8>>) -> Result<Vec<String>, EncodingError> {
        raw_headers
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                if index % 2 == 0 {
                    decode(entry, TextField::HeaderField)
                } else {
                    let trimmed = entry.trim_ascii().to_vec();
                    decode(trimmed, TextField::HeaderValue)
                }
            })
            .collect()
    }
}

fn decode(bytes: Vec<u8>, field: TextField) -> Result<String, EncodingError> {
    String::from_utf8(bytes).map_err(|_| EncodingError { field })
}

/// A message kind the assembler can build.
pub trait Message: Sized {
    const KIND: ParserKind;

    /// Per-connection state the kind needs to choose a body directive.
    type Context: Default + fmt::Debug;

    fn directive(context: &mut Self::Context, head: &Head) -> Directive;

    fn assemble(state: ParseState) -> Result<Self, Error>;
}

impl Message for Request {
    const KIND: ParserKind = ParserKind::Request;
    type Context = ();

    /// CONNECT and upgrades are settled by the tokenizer, so a request body is
    /// always read as framed.
    fn directive(_: &mut (), _: &Head) -> Directive {
        Directive::None
    }

    fn assemble(state: ParseState) -> Result<Self, Error> {
        let method = state
            .method
            .ok_or(ParseError::new(ParseErrorKind::InvalidEofState))?;
        let target = decode(state.uri, TextField::Url)?;
        let raw_headers = ParseState::decode_headers(state.raw_headers)?;

        let request = RequestBuilder::new(method)
            .target(target)
            .version(state.version)
            .raw_headers(raw_headers)
            .body(state.body.freeze())
            .build()?;

        debug!(
            method = %request.method,
            target = %request.target,
            headers = request.raw_headers.len() / 2,
            body_len = request.body.len(),
            "Request assembled"
        );
        Ok(request)
    }
}

/// Methods of the requests whose responses are still expected, oldest first.
#[derive(Debug, Default)]
pub struct PendingRequests {
    methods: VecDeque<Method>,
}

impl Message for Response {
    const KIND: ParserKind = ParserKind::Response;
    type Context = PendingRequests;

    fn directive(pending: &mut PendingRequests, head: &Head) -> Directive {
        let Some(status) = head.status else {
            return Directive::None;
        };

        // Interim responses leave the request waiting for its final answer.
        let interim = (100..200).contains(&status) && status != 101;
        let request = if interim {
            pending.methods.front().cloned()
        } else {
            pending.methods.pop_front()
        };

        match request {
            Some(Method::HEAD) => Directive::NoBody,
            Some(Method::CONNECT) if (200..300).contains(&status) => {
                Directive::NoBodyNoFurtherResponses
            }
            _ if status_has_no_body(status) => Directive::NoBody,
            _ => Directive::None,
        }
    }

    fn assemble(state: ParseState) -> Result<Self, Error> {
        let status = state
            .status_code
            .ok_or(ParseError::new(ParseErrorKind::InvalidEofState))?;
        let reason = decode(state.status_phrase, TextField::Status)?;
        let raw_headers = ParseState::decode_headers(state.raw_headers)?;

        let response = ResponseBuilder::new(status)
            .version(state.version)
            .reason(reason)
            .raw_headers(raw_headers)
            .body(state.body.freeze())
            .build();

        debug!(
            status = response.status,
            headers = response.raw_headers.len() / 2,
            body_len = response.body.len(),
            "Response assembled"
        );
        Ok(response)
    }
}

type Callback<M> = Box<dyn FnMut(M) -> anyhow::Result<()> + Send>;

/// Accumulates tokenizer events into messages of kind `M`.
pub struct MessageAssembler<M: Message> {
    state: ParseState,
    context: M::Context,
    on_message: Callback<M>,
}

impl<M: Message> MessageAssembler<M> {
    pub fn new<F>(on_message: F) -> Self
    where
        F: FnMut(M) -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            state: ParseState::default(),
            context: M::Context::default(),
            on_message: Box::new(on_message),
        }
    }

    /// Drops the message in progress.
    pub fn reset(&mut self) {
        self.state = ParseState::default();
    }

    fn complete(&mut self) -> Result<(), Error> {
        // Taking the state resets it before anything below can fail.
        let state = std::mem::take(&mut self.state);
        let message = M::assemble(state)?;
        (self.on_message)(message).map_err(Error::Callback)
    }
}

impl<M: Message> EventSink for MessageAssembler<M> {
    type Error = Error;

    fn on_event(&mut self, event: Event<'_>) -> Result<(), Error> {
        let state = &mut self.state;
        match event {
            Event::MessageBegin => {}
            Event::Url(fragment) => state.uri.extend_from_slice(fragment),
            Event::Status(fragment) => state.status_phrase.extend_from_slice(fragment),
            Event::HeaderField(fragment) => state.push_field(fragment),
            Event::HeaderValue(fragment) => state.push_value(fragment),
            Event::Body(fragment) => state.body.extend_from_slice(fragment),
            Event::ChunkHeader(size) => trace!(size, "chunk"),
            Event::ChunkComplete => {}
            Event::MessageComplete => return self.complete(),
        }
        Ok(())
    }

    fn on_headers_complete(&mut self, head: &Head) -> Result<Directive, Error> {
        self.state.version = head.version;
        self.state.method = head.method.map(Method::from_code);
        self.state.status_code = head.status;
        Ok(M::directive(&mut self.context, head))
    }
}

/// Incremental parser for one connection's inbound messages.
///
/// Each completed message is handed to the callback given at construction,
/// synchronously, from inside [`Parser::parse`]. After any error the parser is
/// back at the start of a message, but the byte stream it was reading should
/// be considered corrupt and the connection closed.
pub struct Parser<M: Message> {
    tokenizer: Tokenizer,
    assembler: MessageAssembler<M>,
}

pub type RequestParser = Parser<Request>;
pub type ResponseParser = Parser<Response>;

impl<M: Message> Parser<M> {
    pub fn new<F>(on_message: F) -> Self
    where
        F: FnMut(M) -> anyhow::Result<()> + Send + 'static,
    {
        Self::with_config(ParserConfig::default(), on_message)
    }

    pub fn with_config<F>(config: ParserConfig, on_message: F) -> Self
    where
        F: FnMut(M) -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            tokenizer: Tokenizer::new(M::KIND, config),
            assembler: MessageAssembler::new(on_message),
        }
    }

    /// Feeds bytes read from the connection.
    ///
    /// Every submitted byte must be consumed: bytes left over after an
    /// upgrade fail with [`ParseErrorKind::ByteCountMismatch`].
    pub fn parse(&mut self, data: &[u8]) -> Result<(), Error> {
        match self.tokenizer.execute(&mut self.assembler, data) {
            Ok(consumed) if consumed == data.len() => Ok(()),
            Ok(consumed) => {
                trace!(consumed, submitted = data.len(), "parser stopped short of the input");
                self.reset();
                Err(ParseError::new(ParseErrorKind::ByteCountMismatch).into())
            }
            Err(e) => {
                self.assembler.reset();
                Err(flatten(e))
            }
        }
    }

    /// Signals end of input, completing a body delimited by connection close.
    pub fn finish(&mut self) -> Result<(), Error> {
        self.tokenizer.finish(&mut self.assembler).map_err(|e| {
            self.assembler.reset();
            flatten(e)
        })
    }

    /// Discards any partial message and returns to the initial state.
    pub fn reset(&mut self) {
        self.tokenizer.reset();
        self.assembler.reset();
    }

    /// The last message switched protocols; further bytes are not HTTP.
    pub fn is_upgraded(&self) -> bool {
        self.tokenizer.is_upgraded()
    }

    /// No message is in progress.
    pub fn is_idle(&self) -> bool {
        self.tokenizer.is_idle()
    }
}

impl Parser<Response> {
    /// Records the method of a request sent on this connection, so its
    /// response can be framed (a response to HEAD has no body, a 2xx response
    /// to CONNECT ends HTTP on the connection).
    pub fn expect_response_to(&mut self, method: Method) {
        self.assembler.context.methods.push_back(method);
    }
}

fn flatten(err: ExecuteError<Error>) -> Error {
    match err {
        ExecuteError::Parse(e) => Error::Parse(e),
        ExecuteError::Handler(e) => e,
    }
}

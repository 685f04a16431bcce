//! Error types.
//!
//! Three layers fail independently:
//!
//! - [`ParseError`]: the tokenizer rejected the bytes (always fatal to the
//!   message, the tokenizer is reset before the error is returned)
//! - [`EncodingError`]: framing was fine but a text field is not UTF-8
//! - [`SystemError`]: an OS-level socket operation failed
//!
//! [`Error`] is what the request/response parser entry points return.

use std::fmt;
use std::io;

/// Machine-readable reason for a [`ParseError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseErrorKind {
    InvalidMethod,
    InvalidUrl,
    InvalidConstant,
    InvalidVersion,
    InvalidStatus,
    InvalidHeaderToken,
    InvalidContentLength,
    UnexpectedContentLength,
    InvalidTransferEncoding,
    InvalidChunkSize,
    StrictLineEnding,
    HeaderOverflow,
    ClosedConnection,
    InvalidEofState,
    ByteCountMismatch,
}

impl ParseErrorKind {
    /// Stable identifier, suitable for logs and metrics labels.
    pub fn code(&self) -> &'static str {
        match self {
            ParseErrorKind::InvalidMethod => "INVALID_METHOD",
            ParseErrorKind::InvalidUrl => "INVALID_URL",
            ParseErrorKind::InvalidConstant => "INVALID_CONSTANT",
            ParseErrorKind::InvalidVersion => "INVALID_VERSION",
            ParseErrorKind::InvalidStatus => "INVALID_STATUS",
            ParseErrorKind::InvalidHeaderToken => "INVALID_HEADER_TOKEN",
            ParseErrorKind::InvalidContentLength => "INVALID_CONTENT_LENGTH",
            ParseErrorKind::UnexpectedContentLength => "UNEXPECTED_CONTENT_LENGTH",
            ParseErrorKind::InvalidTransferEncoding => "INVALID_TRANSFER_ENCODING",
            ParseErrorKind::InvalidChunkSize => "INVALID_CHUNK_SIZE",
            ParseErrorKind::StrictLineEnding => "STRICT",
            ParseErrorKind::HeaderOverflow => "HEADER_OVERFLOW",
            ParseErrorKind::ClosedConnection => "CLOSED_CONNECTION",
            ParseErrorKind::InvalidEofState => "INVALID_EOF_STATE",
            ParseErrorKind::ByteCountMismatch => "BYTE_COUNT_MISMATCH",
        }
    }

    /// Human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            ParseErrorKind::InvalidMethod => "invalid HTTP method",
            ParseErrorKind::InvalidUrl => "invalid URL",
            ParseErrorKind::InvalidConstant => "invalid constant string",
            ParseErrorKind::InvalidVersion => "invalid HTTP version",
            ParseErrorKind::InvalidStatus => "invalid HTTP status code",
            ParseErrorKind::InvalidHeaderToken => "invalid character in header",
            ParseErrorKind::InvalidContentLength => "invalid character in content-length header",
            ParseErrorKind::UnexpectedContentLength => {
                "unexpected content-length header alongside chunked transfer-encoding"
            }
            ParseErrorKind::InvalidTransferEncoding => "request has invalid transfer-encoding",
            ParseErrorKind::InvalidChunkSize => "invalid character in chunk size header",
            ParseErrorKind::StrictLineEnding => "expected LF after CR",
            ParseErrorKind::HeaderOverflow => "header section exceeds the configured size limit",
            ParseErrorKind::ClosedConnection => "data received after completed connection: close message",
            ParseErrorKind::InvalidEofState => "stream ended at an unexpected time",
            ParseErrorKind::ByteCountMismatch => "parser did not consume every submitted byte",
        }
    }
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The tokenizer rejected its input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}: {}", .kind.code(), .kind.description())]
pub struct ParseError {
    kind: ParseErrorKind,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> ParseErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn description(&self) -> &'static str {
        self.kind.description()
    }
}

impl From<ParseErrorKind> for ParseError {
    fn from(kind: ParseErrorKind) -> Self {
        ParseError::new(kind)
    }
}

/// Which text field failed UTF-8 validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    Url,
    Status,
    HeaderField,
    HeaderValue,
}

impl fmt::Display for TextField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TextField::Url => "url",
            TextField::Status => "status",
            TextField::HeaderField => "header-field",
            TextField::HeaderValue => "header-value",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field} is not valid UTF-8")]
pub struct EncodingError {
    pub field: TextField,
}

/// Errors returned by [`Parser::parse`](crate::http::assembler::Parser::parse).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("invalid request target {target:?}: {source}")]
    Uri {
        target: String,
        #[source]
        source: url::ParseError,
    },

    #[error("message handler failed: {0}")]
    Callback(#[source] anyhow::Error),
}

impl Error {
    /// The tokenizer error, if this is one.
    pub fn as_parse_error(&self) -> Option<&ParseError> {
        match self {
            Error::Parse(e) => Some(e),
            _ => None,
        }
    }
}

/// Socket operation that produced a [`SystemError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOp {
    Resolve,
    Socket,
    SetOption,
    Bind,
    Listen,
    Register,
    Accept,
}

impl fmt::Display for SocketOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SocketOp::Resolve => "resolve",
            SocketOp::Socket => "socket",
            SocketOp::SetOption => "setsockopt",
            SocketOp::Bind => "bind",
            SocketOp::Listen => "listen",
            SocketOp::Register => "register",
            SocketOp::Accept => "accept",
        })
    }
}

/// OS-level failure of a listening-socket operation.
#[derive(Debug, thiserror::Error)]
#[error("{op} failed: {source}")]
pub struct SystemError {
    op: SocketOp,
    #[source]
    source: io::Error,
}

impl SystemError {
    pub fn new(op: SocketOp, source: io::Error) -> Self {
        Self { op, source }
    }

    pub fn op(&self) -> SocketOp {
        self.op
    }

    /// The originating errno, when the OS reported one.
    pub fn raw_os_error(&self) -> Option<i32> {
        self.source.raw_os_error()
    }

    pub fn io_kind(&self) -> io::ErrorKind {
        self.source.kind()
    }
}

//! h1frame - HTTP/1.x message framing and connection acceptance
//!
//! Turns fragmented inbound bytes into complete requests and responses
//! ([`http::assembler::Parser`]) and socket readiness into a stream of accepted
//! connections ([`server::acceptor::ConnectionAcceptor`]).

pub mod config;
pub mod error;
pub mod http;
pub mod server;

pub use error::{EncodingError, Error, ParseError, ParseErrorKind, SystemError};

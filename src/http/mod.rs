//! HTTP/1.x message framing.
//!
//! # Architecture
//!
//! - **`tokenizer`**: byte-level state machine emitting parse events
//! - **`assembler`**: turns events into [`Request`](request::Request) /
//!   [`Response`](response::Response) values; home of the `Parser` entry points
//! - **`request`** / **`response`** / **`version`** / **`headers`**: the message types
//! - **`connection`**: per-connection read loop answering parsed requests
//! - **`writer`**: serialises and writes responses
//!
//! # Data flow
//!
//! ```text
//!   socket bytes ──► Tokenizer ──events──► MessageAssembler ──► on_message(Request)
//!                        ▲                        │
//!                        └──── Directive ◄────────┘  (after the header section)
//! ```
//!
//! # Example
//!
//! ```
//! use h1frame::http::assembler::RequestParser;
//! use std::sync::mpsc;
//!
//! let (tx, rx) = mpsc::channel();
//! let mut parser = RequestParser::new(move |req| Ok(tx.send(req)?));
//!
//! parser.parse(b"GET /hello HTTP/1.1\r\nHo").unwrap();
//! parser.parse(b"st: example.com\r\n\r\n").unwrap();
//!
//! let req = rx.try_recv().unwrap();
//! assert_eq!(req.target, "/hello");
//! assert_eq!(req.header("host"), Some("example.com"));
//! ```

pub mod assembler;
pub mod connection;
pub mod headers;
pub mod request;
pub mod response;
pub mod tokenizer;
pub mod version;
pub mod writer;

use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ParserConfig;
use crate::error::{Error, ParseErrorKind};
use crate::http::assembler::RequestParser;
use crate::http::request::{Method, Request};
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::server::acceptor::Connection;

const READ_BUFFER_SIZE: usize = 4096;

/// Drives one accepted connection: reads bytes into the parser, answers every
/// request it assembles and closes on error or when keep-alive ends.
pub struct ConnectionHandler {
    stream: TcpStream,
    peer: SocketAddr,
    buffer: BytesMut,
    parser: RequestParser,
    requests: mpsc::UnboundedReceiver<Request>,
    /// Parse failure to report once the requests completed before it are answered.
    failed: Option<Error>,
    state: ConnectionState,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    Closed,
}

impl ConnectionHandler {
    pub fn new(conn: Connection, config: ParserConfig) -> Self {
        let peer = conn.peer_addr();
        let (tx, requests) = mpsc::unbounded_channel();
        let parser = RequestParser::with_config(config, move |req| {
            tx.send(req)
                .map_err(|_| anyhow::anyhow!("request queue closed"))
        });

        Self {
            stream: conn.into_stream(),
            peer,
            buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
            parser,
            requests,
            failed: None,
            state: ConnectionState::Reading,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            match &mut self.state {
                ConnectionState::Reading => {
                    match self.read_request().await? {
                        Some(req) => {
                            self.state = ConnectionState::Processing(req);
                        }
                        None => {
                            self.state = ConnectionState::Closed;
                        }
                    }
                }

                ConnectionState::Processing(req) => {
                    let (response, keep_alive) = Self::handle_request(req);

                    let writer = ResponseWriter::new(&response, req.method != Method::HEAD);
                    self.state = ConnectionState::Writing(writer, keep_alive);
                }

                ConnectionState::Writing(writer, keep_alive) => {
                    writer.write_to_stream(&mut self.stream).await?;

                    if *keep_alive {
                        self.state = ConnectionState::Reading; // go back for next request
                    } else {
                        self.state = ConnectionState::Closed;
                    }
                }

                ConnectionState::Closed => {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Returns the next assembled request, reading from the socket until one
    /// is complete. `None` means the client is gone or sent garbage.
    ///
    /// Requests completed ahead of a parse error are still returned, in order,
    /// before the error is answered.
    pub async fn read_request(&mut self) -> anyhow::Result<Option<Request>> {
        loop {
            // Pipelined requests may already be waiting.
            if let Ok(req) = self.requests.try_recv() {
                return Ok(Some(req));
            }

            if let Some(e) = self.failed.take() {
                let response = match e.as_parse_error().map(|e| e.kind()) {
                    Some(ParseErrorKind::HeaderOverflow) => Response::content_too_large(),
                    _ => Self::error_response(&e),
                };
                ResponseWriter::new(&response, true)
                    .write_to_stream(&mut self.stream)
                    .await?;
                return Ok(None);
            }

            self.buffer.clear();
            let n = self.stream.read_buf(&mut self.buffer).await?;

            if n == 0 {
                // Client closed connection
                if let Err(e) = self.parser.finish() {
                    debug!(peer = %self.peer, error = %e, "Connection closed mid-request");
                }
                return Ok(None);
            }

            if let Err(e) = self.parser.parse(&self.buffer) {
                warn!(peer = %self.peer, error = %e, "Rejecting malformed request");
                self.failed = Some(e);
            }
        }
    }

    fn error_response(err: &Error) -> Response {
        match err {
            Error::Callback(_) => Response::internal_error(),
            _ => Response::bad_request(),
        }
    }

    fn handle_request(req: &Request) -> (Response, bool) {
        info!(method = %req.method, target = %req.target, "Handling request");
        let response = Response::ok("Hello from h1frame\n");
        let keep_alive = req.keep_alive();
        (response, keep_alive)
    }
}

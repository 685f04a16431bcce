use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::http::response::Response;

/// Serialises a response. A `Content-Length` header is added when the response
/// has none; `include_body` is false when answering HEAD.
fn serialize_response(resp: &Response, include_body: bool) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128 + resp.body.len());

    // Status line
    let status_line = format!("{} {} {}\r\n", resp.version, resp.status, resp.reason);
    buf.extend_from_slice(status_line.as_bytes());

    // Headers
    for (k, v) in resp.headers() {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    if resp.header("Content-Length").is_none() {
        buf.extend_from_slice(format!("Content-Length: {}\r\n", resp.body.len()).as_bytes());
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    if include_body {
        buf.extend_from_slice(&resp.body);
    }

    buf
}

pub struct ResponseWriter {
    buffer: Vec<u8>,
    written: usize,
}

impl ResponseWriter {
    pub fn new(response: &Response, include_body: bool) -> Self {
        Self {
            buffer: serialize_response(response, include_body),
            written: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub async fn write_to_stream(
        &mut self,
        stream: &mut TcpStream,
    ) -> anyhow::Result<()> {
        while self.written < self.buffer.len() {
            let n = stream
                .write(&self.buffer[self.written..])
                .await?;

            if n == 0 {
                return Err(anyhow::anyhow!("connection closed while writing"));
            }

            self.written += n;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::ResponseBuilder;

    #[test]
    fn adds_content_length_and_keeps_header_order() {
        let resp = ResponseBuilder::new(200)
            .reason("OK")
            .header("X-B", "2")
            .header("X-A", "1")
            .body(&b"hi"[..])
            .build();

        let bytes = ResponseWriter::new(&resp, true).as_bytes().to_vec();
        assert_eq!(bytes, b"HTTP/1.1 200 OK\r\nX-B: 2\r\nX-A: 1\r\nContent-Length: 2\r\n\r\nhi");
    }

    #[test]
    fn head_response_omits_body() {
        let bytes = ResponseWriter::new(&Response::ok("hello"), false).as_bytes().to_vec();
        assert!(bytes.ends_with(b"Content-Length: 5\r\n\r\n"));
    }
}

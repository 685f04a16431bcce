use bytes::Bytes;

use crate::http::headers;
use crate::http::version::Version;

/// Status codes the server answers with itself.
///
/// Parsed responses carry any numeric code; this enum only covers what
/// [`Response`]'s convenience constructors produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 200 OK
    Ok,
    /// 204 No Content
    NoContent,
    /// 400 Bad Request
    BadRequest,
    /// 413 Content Too Large
    ContentTooLarge,
    /// 500 Internal Server Error
    InternalServerError,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use h1frame::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::BadRequest.as_u16(), 400);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::NoContent => 204,
            StatusCode::BadRequest => 400,
            StatusCode::ContentTooLarge => 413,
            StatusCode::InternalServerError => 500,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::NoContent => "No Content",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::ContentTooLarge => "Content Too Large",
            StatusCode::InternalServerError => "Internal Server Error",
        }
    }
}

/// A fully assembled HTTP response, either parsed off the wire or built
/// locally to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub version: Version,
    /// Numeric status code (e.g. 404)
    pub status: u16,
    /// Reason phrase as sent, possibly empty
    pub reason: String,
    /// Header fields and values, alternating, in arrival order
    pub raw_headers: Vec<String>,
    pub body: Bytes,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```ignore
/// let response = ResponseBuilder::new(200)
///     .header("Content-Type", "application/json")
///     .body(b"{}".to_vec())
///     .build();
/// ```
#[derive(Debug)]
pub struct ResponseBuilder {
    version: Version,
    status: u16,
    reason: String,
    raw_headers: Vec<String>,
    body: Bytes,
}

impl ResponseBuilder {
    /// Creates a new response builder with the specified status code.
    pub fn new(status: u16) -> Self {
        Self {
            version: Version::HTTP_11,
            status,
            reason: String::new(),
            raw_headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Appends a header; duplicates are kept in order.
    pub fn header(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.raw_headers.push(field.into());
        self.raw_headers.push(value.into());
        self
    }

    /// Replaces the whole header list. `raw` alternates field and value.
    pub fn raw_headers(mut self, raw: Vec<String>) -> Self {
        self.raw_headers = raw;
        self
    }

    /// Sets the response body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> Response {
        Response {
            version: self.version,
            status: self.status,
            reason: self.reason,
            raw_headers: self.raw_headers,
            body: self.body,
        }
    }
}

impl From<StatusCode> for ResponseBuilder {
    fn from(status: StatusCode) -> Self {
        ResponseBuilder::new(status.as_u16()).reason(status.reason_phrase())
    }
}

impl Response {
    /// Creates a simple 200 OK response with the given body.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        ResponseBuilder::from(StatusCode::Ok)
            .header("Content-Type", "text/plain")
            .body(body)
            .build()
    }

    /// Creates a 400 Bad Request response.
    pub fn bad_request() -> Self {
        ResponseBuilder::from(StatusCode::BadRequest)
            .header("Connection", "close")
            .body(&b"400 Bad Request"[..])
            .build()
    }

    /// Creates a 413 response for a header section over the size limit.
    pub fn content_too_large() -> Self {
        ResponseBuilder::from(StatusCode::ContentTooLarge)
            .header("Connection", "close")
            .body(&b"413 Content Too Large"[..])
            .build()
    }

    /// Creates a 500 Internal Server Error response.
    pub fn internal_error() -> Self {
        ResponseBuilder::from(StatusCode::InternalServerError)
            .body(&b"500 Internal Server Error"[..])
            .build()
    }

    /// Retrieves the first value of a header (case-insensitive).
    pub fn header(&self, key: &str) -> Option<&str> {
        headers::get(&self.raw_headers, key)
    }

    /// `(field, value)` pairs in arrival order.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        headers::pairs(&self.raw_headers)
    }

    /// 1xx responses precede the final response to a request.
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.status)
    }
}

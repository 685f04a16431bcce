use std::fmt;

use bytes::Bytes;
use url::Url;

use crate::error::Error;
use crate::http::headers;
use crate::http::version::Version;

/// Method names the tokenizer recognises, indexed by method code.
///
/// The order is part of the contract between the tokenizer (which reports a
/// code) and [`Method::from_code`].
pub(crate) const METHOD_NAMES: [&str; 34] = [
    "DELETE",
    "GET",
    "HEAD",
    "POST",
    "PUT",
    "CONNECT",
    "OPTIONS",
    "TRACE",
    "COPY",
    "LOCK",
    "MKCOL",
    "MOVE",
    "PROPFIND",
    "PROPPATCH",
    "SEARCH",
    "UNLOCK",
    "BIND",
    "REBIND",
    "UNBIND",
    "ACL",
    "REPORT",
    "MKACTIVITY",
    "CHECKOUT",
    "MERGE",
    "M-SEARCH",
    "NOTIFY",
    "SUBSCRIBE",
    "UNSUBSCRIBE",
    "PATCH",
    "PURGE",
    "MKCALENDAR",
    "LINK",
    "UNLINK",
    "SOURCE",
];

/// Looks up the code for a method name (case-sensitive).
pub(crate) fn method_code(name: &[u8]) -> Option<u8> {
    METHOD_NAMES
        .iter()
        .position(|m| m.as_bytes() == name)
        .map(|code| code as u8)
}

/// HTTP request methods.
///
/// The methods of RFC 7231 plus PATCH get their own variant. WebDAV, CalDAV
/// and pub/sub extension methods are carried by name in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// DELETE - Delete a resource
    DELETE,
    /// GET - Retrieve a resource
    GET,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// CONNECT - Establish a tunnel
    CONNECT,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// TRACE - Loop-back test
    TRACE,
    /// PATCH - Partial modification of a resource
    PATCH,
    /// Any other method, by name
    Other(String),
}

impl Method {
    /// Maps a tokenizer method code to a method.
    ///
    /// Codes outside the known table map to `Other("UNKNOWN")`; an
    /// unrecognised code never aborts parsing.
    ///
    /// # Example
    ///
    /// ```
    /// # use h1frame::http::request::Method;
    /// assert_eq!(Method::from_code(1), Method::GET);
    /// assert_eq!(Method::from_code(12), Method::Other("PROPFIND".into()));
    /// assert_eq!(Method::from_code(200), Method::Other("UNKNOWN".into()));
    /// ```
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Method::DELETE,
            1 => Method::GET,
            2 => Method::HEAD,
            3 => Method::POST,
            4 => Method::PUT,
            5 => Method::CONNECT,
            6 => Method::OPTIONS,
            7 => Method::TRACE,
            28 => Method::PATCH,
            other => match METHOD_NAMES.get(other as usize) {
                Some(name) => Method::Other((*name).to_string()),
                None => Method::Other("UNKNOWN".to_string()),
            },
        }
    }

    /// Parses an HTTP method from a string.
    ///
    /// Only names in the method table are accepted (case-sensitive).
    ///
    /// # Example
    ///
    /// ```
    /// # use h1frame::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        method_code(s.as_bytes()).map(Method::from_code)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::DELETE => "DELETE",
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::CONNECT => "CONNECT",
            Method::OPTIONS => "OPTIONS",
            Method::TRACE => "TRACE",
            Method::PATCH => "PATCH",
            Method::Other(name) => name,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully assembled HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// The request target exactly as sent (e.g. "/index.html?q=1")
    pub target: String,
    /// The target resolved to an absolute URL
    pub url: Url,
    pub version: Version,
    /// Header fields and values, alternating, in arrival order
    pub raw_headers: Vec<String>,
    pub body: Bytes,
}

/// Builder for constructing Request objects.
#[derive(Debug)]
pub struct RequestBuilder {
    method: Method,
    target: Option<String>,
    version: Version,
    raw_headers: Vec<String>,
    body: Bytes,
}

impl RequestBuilder {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            target: None,
            version: Version::default(),
            raw_headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Appends a header pair; duplicates are kept.
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

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Builds the request, resolving the target into a URL.
    pub fn build(self) -> Result<Request, Error> {
        let method = self.method;
        let target = self.target.unwrap_or_else(|| "/".to_string());
        let host = headers::get(&self.raw_headers, "Host");

        let url = resolve_target(&method, &target, host).map_err(|source| Error::Uri {
            target: target.clone(),
            source,
        })?;

        Ok(Request {
            method,
            target,
            url,
            version: self.version,
            raw_headers: self.raw_headers,
            body: self.body,
        })
    }
}

/// Turns a request target into an absolute URL.
///
/// Origin-form and `*` resolve against `http://{host}`, an empty or missing
/// Host counting as `localhost`. The origin-form path is applied verbatim, so
/// `//a/b` stays a path on that host. CONNECT's authority-form becomes
/// `http://{authority}`; absolute-form parses as is.
fn resolve_target(method: &Method, target: &str, host: Option<&str>) -> Result<Url, url::ParseError> {
    if *method == Method::CONNECT {
        return Url::parse(&format!("http://{}", target));
    }

    let host = host.filter(|h| !h.is_empty()).unwrap_or("localhost");
    let mut base = Url::parse(&format!("http://{}/", host))?;
    if target == "*" {
        return Ok(base);
    }

    if target.starts_with('/') {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target, None),
        };
        base.set_path(path);
        base.set_query(query);
        return Ok(base);
    }

    Url::options().base_url(Some(&base)).parse(target)
}

impl Request {
    /// Retrieves the first value of a header (case-insensitive).
    pub fn header(&self, key: &str) -> Option<&str> {
        headers::get(&self.raw_headers, key)
    }

    /// `(field, value)` pairs in arrival order.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        headers::pairs(&self.raw_headers)
    }

    /// Retrieves the Content-Length header value and parses it as a usize.
    ///
    /// Returns 0 if the header is missing or not a valid number.
    pub fn content_length(&self) -> usize {
        self.header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Determines whether the connection should remain open after the response.
    ///
    /// `Connection: close` always closes. Otherwise HTTP/1.1 keeps the
    /// connection open and HTTP/1.0 needs an explicit `Connection: keep-alive`.
    pub fn keep_alive(&self) -> bool {
        if headers::has_token(&self.raw_headers, "Connection", "close") {
            return false;
        }
        self.version.keeps_alive_by_default()
            || headers::has_token(&self.raw_headers, "Connection", "keep-alive")
    }
}

//! HTTP message types
//!
//! Requests and responses are shared by both protocol versions. An HTTP/2
//! request additionally carries the stream id it arrived on, plus the
//! `:authority` and `:scheme` pseudo-headers.

use std::borrow::Cow;
use std::fmt;
use std::io::{self, Write};

use bytes::Bytes;

use super::{Error, Headers, Result, CRLF};

/// HTTP methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
}

impl Method {
    /// Parse method from string; methods are case-sensitive
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "CONNECT" => Ok(Method::Connect),
            "OPTIONS" => Ok(Method::Options),
            "TRACE" => Ok(Method::Trace),
            "PATCH" => Ok(Method::Patch),
            _ => Err(Error::InvalidMethod(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
        }
    }

    /// Safe and cacheable, the only methods a server may push
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// HTTP version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Version {
    Http10,
    #[default]
    Http11,
    H2,
}

impl Version {
    /// Parse an HTTP/1.x version token
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "HTTP/1.0" => Ok(Version::Http10),
            "HTTP/1.1" => Ok(Version::Http11),
            _ => Err(Error::InvalidVersion(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
            Version::H2 => "HTTP/2",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// HTTP status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status {
    code: u16,
}

impl Status {
    pub fn new(code: u16) -> Result<Self> {
        if (100..600).contains(&code) {
            Ok(Status { code })
        } else {
            Err(Error::InvalidStatus(format!("Invalid status code: {}", code)))
        }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    /// Canonical reason phrase
    pub fn reason_phrase(&self) -> &'static str {
        match self.code {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            203 => "Non-Authoritative Information",
            204 => "No Content",
            205 => "Reset Content",
            206 => "Partial Content",
            300 => "Multiple Choices",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            305 => "Use Proxy",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            402 => "Payment Required",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            406 => "Not Acceptable",
            407 => "Proxy Authentication Required",
            408 => "Request Timeout",
            409 => "Conflict",
            410 => "Gone",
            411 => "Length Required",
            412 => "Precondition Failed",
            413 => "Payload Too Large",
            414 => "URI Too Long",
            415 => "Unsupported Media Type",
            416 => "Range Not Satisfiable",
            417 => "Expectation Failed",
            426 => "Upgrade Required",
            429 => "Too Many Requests",
            431 => "Request Header Fields Too Large",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            _ => "Unknown",
        }
    }

    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Whether a response with this status never has a body (RFC 7230 Section 3.3)
    pub fn forbids_body(&self) -> bool {
        self.is_informational() || self.code == 204 || self.code == 304
    }

    pub const OK: Status = Status { code: 200 };
    pub const BAD_REQUEST: Status = Status { code: 400 };
    pub const NOT_FOUND: Status = Status { code: 404 };
    pub const REQUEST_TIMEOUT: Status = Status { code: 408 };
    pub const PAYLOAD_TOO_LARGE: Status = Status { code: 413 };
    pub const REQUEST_HEADER_FIELDS_TOO_LARGE: Status = Status { code: 431 };
    pub const INTERNAL_SERVER_ERROR: Status = Status { code: 500 };
    pub const NOT_IMPLEMENTED: Status = Status { code: 501 };
    pub const SERVICE_UNAVAILABLE: Status = Status { code: 503 };
    pub const HTTP_VERSION_NOT_SUPPORTED: Status = Status { code: 505 };
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason_phrase())
    }
}

/// Precomputed status lines, sorted by code
static STATUS_LINES: &[(u16, &str)] = &[
    (100, "HTTP/1.1 100 Continue\r\n"),
    (200, "HTTP/1.1 200 OK\r\n"),
    (201, "HTTP/1.1 201 Created\r\n"),
    (202, "HTTP/1.1 202 Accepted\r\n"),
    (204, "HTTP/1.1 204 No Content\r\n"),
    (206, "HTTP/1.1 206 Partial Content\r\n"),
    (301, "HTTP/1.1 301 Moved Permanently\r\n"),
    (302, "HTTP/1.1 302 Found\r\n"),
    (303, "HTTP/1.1 303 See Other\r\n"),
    (304, "HTTP/1.1 304 Not Modified\r\n"),
    (307, "HTTP/1.1 307 Temporary Redirect\r\n"),
    (308, "HTTP/1.1 308 Permanent Redirect\r\n"),
    (400, "HTTP/1.1 400 Bad Request\r\n"),
    (401, "HTTP/1.1 401 Unauthorized\r\n"),
    (403, "HTTP/1.1 403 Forbidden\r\n"),
    (404, "HTTP/1.1 404 Not Found\r\n"),
    (405, "HTTP/1.1 405 Method Not Allowed\r\n"),
    (408, "HTTP/1.1 408 Request Timeout\r\n"),
    (409, "HTTP/1.1 409 Conflict\r\n"),
    (411, "HTTP/1.1 411 Length Required\r\n"),
    (413, "HTTP/1.1 413 Payload Too Large\r\n"),
    (414, "HTTP/1.1 414 URI Too Long\r\n"),
    (415, "HTTP/1.1 415 Unsupported Media Type\r\n"),
    (429, "HTTP/1.1 429 Too Many Requests\r\n"),
    (431, "HTTP/1.1 431 Request Header Fields Too Large\r\n"),
    (500, "HTTP/1.1 500 Internal Server Error\r\n"),
    (501, "HTTP/1.1 501 Not Implemented\r\n"),
    (502, "HTTP/1.1 502 Bad Gateway\r\n"),
    (503, "HTTP/1.1 503 Service Unavailable\r\n"),
    (504, "HTTP/1.1 504 Gateway Timeout\r\n"),
];

/// Status line for an HTTP/1.1 response
///
/// Common codes come from a static table; anything else, or a custom
/// reason phrase, is formatted on demand.
pub fn status_line(status: Status, reason: &str) -> Cow<'static, [u8]> {
    if reason == status.reason_phrase() {
        if let Ok(i) = STATUS_LINES.binary_search_by_key(&status.code(), |&(code, _)| code) {
            return Cow::Borrowed(STATUS_LINES[i].1.as_bytes());
        }
    }
    Cow::Owned(format!("HTTP/1.1 {} {}\r\n", status.code(), reason).into_bytes())
}

/// HTTP request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    uri: String,
    version: Version,
    headers: Headers,
    trailers: Headers,
    body: Vec<u8>,
    authority: Option<String>,
    scheme: Option<String>,
    stream_id: Option<u32>,
}

impl HttpRequest {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        HttpRequest {
            method,
            uri: uri.into(),
            version: Version::default(),
            headers: Headers::new(),
            trailers: Headers::new(),
            body: Vec::new(),
            authority: None,
            scheme: None,
            stream_id: None,
        }
    }

    pub fn builder() -> HttpRequestBuilder {
        HttpRequestBuilder::default()
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Request target as sent (`:path` for HTTP/2)
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Request target without the query string
    pub fn path(&self) -> &str {
        self.uri.split('?').next().unwrap_or("")
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Trailer fields (HTTP/2 only; HTTP/1.1 chunked trailers are discarded)
    pub fn trailers(&self) -> &Headers {
        &self.trailers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    /// `:authority` for HTTP/2, the Host header otherwise
    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref().or_else(|| self.headers.get("Host"))
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// HTTP/2 stream the request arrived on
    pub fn stream_id(&self) -> Option<u32> {
        self.stream_id
    }

    /// Whether the connection may carry another request (RFC 7230 Section 6.3)
    pub fn keep_alive(&self) -> bool {
        let has = |token: &str| self.headers.has_token("Connection", token);

        match self.version {
            Version::H2 => true,
            _ if has("close") => false,
            Version::Http11 => true,
            Version::Http10 => has("keep-alive"),
        }
    }
}

/// Builder for HTTP requests
#[derive(Debug, Default)]
pub struct HttpRequestBuilder {
    method: Option<Method>,
    uri: Option<String>,
    version: Option<Version>,
    headers: Headers,
    trailers: Headers,
    body: Vec<u8>,
    authority: Option<String>,
    scheme: Option<String>,
    stream_id: Option<u32>,
}

impl HttpRequestBuilder {
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn trailers(mut self, trailers: Headers) -> Self {
        self.trailers = trailers;
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    pub fn stream_id(mut self, stream_id: u32) -> Self {
        self.stream_id = Some(stream_id);
        self
    }

    pub fn build(self) -> HttpRequest {
        HttpRequest {
            method: self.method.unwrap_or(Method::Get),
            uri: self.uri.unwrap_or_else(|| "/".to_string()),
            version: self.version.unwrap_or_default(),
            headers: self.headers,
            trailers: self.trailers,
            body: self.body,
            authority: self.authority,
            scheme: self.scheme,
            stream_id: self.stream_id,
        }
    }
}

/// Streaming body producer; runs on the handler thread
pub type BodyStream = Box<dyn FnOnce(&mut dyn Write) -> io::Result<()> + Send>;

/// Response body: a complete buffer or a producer of unknown length
pub enum ResponseBody {
    Full(Bytes),
    Stream(BodyStream),
}

impl Default for ResponseBody {
    fn default() -> Self {
        ResponseBody::Full(Bytes::new())
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            ResponseBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// HTTP response
#[derive(Debug)]
pub struct HttpResponse {
    status: Status,
    reason: String,
    headers: Headers,
    body: ResponseBody,
}

impl HttpResponse {
    pub fn new(status: Status) -> Self {
        HttpResponse {
            status,
            reason: status.reason_phrase().to_string(),
            headers: Headers::new(),
            body: ResponseBody::default(),
        }
    }

    pub fn builder() -> HttpResponseBuilder {
        HttpResponseBuilder::default()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Full body; empty for a streaming response
    pub fn body(&self) -> &[u8] {
        match &self.body {
            ResponseBody::Full(bytes) => bytes,
            ResponseBody::Stream(_) => &[],
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.body, ResponseBody::Stream(_))
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = ResponseBody::Full(Bytes::from(body));
    }

    /// Take the body out, leaving an empty one
    pub fn take_body(&mut self) -> ResponseBody {
        std::mem::take(&mut self.body)
    }

    /// Status line and header section for HTTP/1.1
    pub fn write_head(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&status_line(self.status, &self.reason));
        for (name, value) in self.headers.iter() {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(CRLF.as_bytes());
        }
        buf.extend_from_slice(CRLF.as_bytes());
    }

    /// Serialize a full-body response with its Content-Length
    pub fn to_wire(&self) -> Vec<u8> {
        let body = self.body();
        let mut head = HttpResponse {
            status: self.status,
            reason: self.reason.clone(),
            headers: self.headers.clone(),
            body: ResponseBody::default(),
        };
        if !self.status.forbids_body() {
            head.headers.set("Content-Length", body.len().to_string());
        }

        let mut buf = Vec::with_capacity(128 + body.len());
        head.write_head(&mut buf);
        buf.extend_from_slice(body);
        buf
    }
}

/// Builder for HTTP responses
#[derive(Debug, Default)]
pub struct HttpResponseBuilder {
    status: Option<Status>,
    reason: Option<String>,
    headers: Headers,
    body: ResponseBody,
}

impl HttpResponseBuilder {
    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = ResponseBody::Full(body.into());
        self
    }

    /// Body produced incrementally by `producer`
    pub fn stream<F>(mut self, producer: F) -> Self
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()> + Send + 'static,
    {
        self.body = ResponseBody::Stream(Box::new(producer));
        self
    }

    pub fn build(self) -> HttpResponse {
        let status = self.status.unwrap_or(Status::OK);
        let reason = self
            .reason
            .unwrap_or_else(|| status.reason_phrase().to_string());
        HttpResponse {
            status,
            reason,
            headers: self.headers,
            body: self.body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_from_str() {
        assert_eq!(Method::from_str("GET").unwrap(), Method::Get);
        assert_eq!(Method::from_str("POST").unwrap(), Method::Post);
        assert!(Method::from_str("get").is_err());
        assert!(Method::from_str("INVALID").is_err());
        assert!(Method::Head.is_cacheable());
        assert!(!Method::Post.is_cacheable());
    }

    #[test]
    fn test_version_from_str() {
        assert_eq!(Version::from_str("HTTP/1.0").unwrap(), Version::Http10);
        assert_eq!(Version::from_str("HTTP/1.1").unwrap(), Version::Http11);
        assert!(Version::from_str("HTTP/2.0").is_err());
    }

    #[test]
    fn test_status() {
        let status = Status::new(200).unwrap();
        assert_eq!(status.reason_phrase(), "OK");
        assert!(!status.forbids_body());
        assert!(Status::new(99).is_err());
        assert!(Status::new(204).unwrap().forbids_body());
    }

    #[test]
    fn test_status_line_table_and_fallback() {
        let line = status_line(Status::OK, "OK");
        assert!(matches!(line, Cow::Borrowed(_)));
        assert_eq!(&line[..], b"HTTP/1.1 200 OK\r\n");

        let line = status_line(Status::new(418).unwrap(), "I'm a teapot");
        assert!(matches!(line, Cow::Owned(_)));
        assert_eq!(&line[..], b"HTTP/1.1 418 I'm a teapot\r\n");

        let line = status_line(Status::NOT_FOUND, "Nope");
        assert_eq!(&line[..], b"HTTP/1.1 404 Nope\r\n");
    }

    #[test]
    fn test_status_table_sorted() {
        assert!(STATUS_LINES.windows(2).all(|w| w[0].0 < w[1].0));
        for (code, line) in STATUS_LINES {
            let status = Status::new(*code).unwrap();
            assert_eq!(
                *line,
                format!("HTTP/1.1 {} {}\r\n", code, status.reason_phrase())
            );
        }
    }

    #[test]
    fn test_keep_alive() {
        let req = HttpRequest::builder().build();
        assert!(req.keep_alive());

        let req = HttpRequest::builder().header("Connection", "close").build();
        assert!(!req.keep_alive());

        let req = HttpRequest::builder().version(Version::Http10).build();
        assert!(!req.keep_alive());

        let req = HttpRequest::builder()
            .version(Version::Http10)
            .header("Connection", "Keep-Alive")
            .build();
        assert!(req.keep_alive());
    }

    #[test]
    fn test_request_builder() {
        let req = HttpRequest::builder()
            .method(Method::Post)
            .uri("/test?x=1")
            .header("Content-Type", "text/plain")
            .body(b"Hello".to_vec())
            .stream_id(3)
            .build();

        assert_eq!(req.method(), Method::Post);
        assert_eq!(req.path(), "/test");
        assert_eq!(req.body(), b"Hello");
        assert_eq!(req.stream_id(), Some(3));
    }

    #[test]
    fn test_response_to_wire_sets_length() {
        let resp = HttpResponse::builder()
            .status(Status::OK)
            .header("Content-Type", "text/plain")
            .body("Hello")
            .build();

        let wire = String::from_utf8(resp.to_wire()).unwrap();
        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(wire.contains("Content-Length: 5\r\n"));
        assert!(wire.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn test_streaming_body() {
        let mut resp = HttpResponse::builder()
            .stream(|w| w.write_all(b"chunk"))
            .build();
        assert!(resp.is_streaming());
        assert!(resp.body().is_empty());

        let mut out = Vec::new();
        match resp.take_body() {
            ResponseBody::Stream(producer) => producer(&mut out).unwrap(),
            ResponseBody::Full(_) => panic!("expected a stream"),
        }
        assert_eq!(out, b"chunk");
        assert!(!resp.is_streaming());
    }
}

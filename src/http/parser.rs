//! HTTP/1.1 request parsing
//!
//! [`RequestParser`] is a state machine over the caller's accumulating read
//! buffer: request line, then header lines, then the body. A line is only
//! parsed once its CRLF has arrived. The parser never modifies the buffer;
//! it remembers how far it got, so the caller appends bytes and calls
//! [`RequestParser::parse`] again with the same (grown) buffer.
//!
//! Limits are enforced while bytes arrive, never after buffering a whole
//! message: the header section against `max_header_bytes`, the body against
//! `max_body_size` as soon as `Content-Length` or a chunk size is known.

use super::chunked::{find_crlf, ChunkedDecoder};
use super::config::ServerConfig;
use super::{Error, Headers, HttpRequest, Method, Result, Version, MAX_HEADERS};

/// Size limits applied while parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserLimits {
    /// Request line plus header section
    pub max_header_bytes: usize,
    pub max_body_size: usize,
    pub max_headers: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        ParserLimits {
            max_header_bytes: 64 * 1024,
            max_body_size: 10 * 1024 * 1024,
            max_headers: MAX_HEADERS,
        }
    }
}

impl From<&ServerConfig> for ParserLimits {
    fn from(config: &ServerConfig) -> Self {
        ParserLimits {
            max_header_bytes: config.max_header_bytes,
            max_body_size: config.max_body_size,
            max_headers: MAX_HEADERS,
        }
    }
}

/// Outcome of feeding the parser
#[derive(Debug)]
pub enum ParseStatus {
    /// A request is complete; the first `consumed` bytes of the buffer belong to it
    Complete { request: HttpRequest, consumed: usize },
    /// More bytes are needed
    Partial,
}

/// Parse HTTP request line
///
/// Format: METHOD SP request-target SP HTTP-version, separated by exactly
/// one space each.
pub fn parse_request_line(line: &str) -> Result<(Method, String, Version)> {
    let mut parts = line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::Parse(format!("Invalid request line: {:?}", line)));
    };

    if method.is_empty() || !method.bytes().all(super::headers::is_token_byte) {
        return Err(Error::Parse(format!("Invalid method token: {:?}", method)));
    }
    if target.is_empty() || !target.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(Error::Parse(format!("Invalid request target: {:?}", target)));
    }
    if !version.starts_with("HTTP/") {
        return Err(Error::Parse(format!("Invalid protocol: {:?}", version)));
    }

    let method = Method::from_str(method)?;
    let version = Version::from_str(version)?;

    Ok((method, target.to_string(), version))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ParserState {
    RequestLine,
    Headers,
    Body,
}

#[derive(Debug)]
enum BodyKind {
    None,
    Length(usize),
    Chunked(ChunkedDecoder),
}

/// HTTP request parser
#[derive(Debug)]
pub struct RequestParser {
    limits: ParserLimits,
    state: ParserState,
    /// Bytes of the buffer already consumed by this request
    pos: usize,
    /// Where the request line starts, after skipped empty lines
    start: usize,
    /// Searched for CRLF up to here without finding one
    scanned: usize,
    method: Option<Method>,
    uri: String,
    version: Version,
    headers: Headers,
    body_kind: BodyKind,
    body: Vec<u8>,
}

impl RequestParser {
    /// Create a new request parser
    pub fn new(limits: ParserLimits) -> Self {
        RequestParser {
            limits,
            state: ParserState::RequestLine,
            pos: 0,
            start: 0,
            scanned: 0,
            method: None,
            uri: String::new(),
            version: Version::Http11,
            headers: Headers::new(),
            body_kind: BodyKind::None,
            body: Vec::new(),
        }
    }

    pub fn limits(&self) -> &ParserLimits {
        &self.limits
    }

    /// Whether the request line and header section have been parsed
    pub fn headers_complete(&self) -> bool {
        self.state == ParserState::Body
    }

    /// Whether any byte of a request has been consumed
    pub fn in_progress(&self) -> bool {
        self.pos > 0
    }

    /// Forget the request in progress
    pub fn reset(&mut self) {
        *self = RequestParser::new(self.limits);
    }

    /// Feed the buffer holding the request
    ///
    /// `buf` must start at the first byte of this request and contain
    /// everything passed on earlier calls. After `Complete` the parser is
    /// ready for the next request, which starts at `buf[consumed..]`.
    pub fn parse(&mut self, buf: &[u8]) -> Result<ParseStatus> {
        if self.state == ParserState::RequestLine {
            // RFC 7230 Section 3.5: ignore empty lines before the request line
            while buf[self.pos..].starts_with(b"\r\n") {
                self.pos += 2;
                self.start = self.pos;
            }
            let Some(line) = self.next_line(buf)? else {
                return Ok(ParseStatus::Partial);
            };
            let line = std::str::from_utf8(line)
                .map_err(|_| Error::Parse("request line is not valid UTF-8".to_string()))?;
            let (method, uri, version) = parse_request_line(line)?;
            self.method = Some(method);
            self.uri = uri;
            self.version = version;
            self.state = ParserState::Headers;
        }

        while self.state == ParserState::Headers {
            let Some(line) = self.next_line(buf)? else {
                return Ok(ParseStatus::Partial);
            };
            if line.is_empty() {
                self.body_kind = self.body_framing()?;
                self.state = ParserState::Body;
                break;
            }
            if line[0] == b' ' || line[0] == b'\t' {
                return Err(Error::Parse("obsolete line folding".to_string()));
            }
            if self.headers.len() >= self.limits.max_headers {
                return Err(Error::TooManyHeaders {
                    limit: self.limits.max_headers,
                });
            }
            let line = std::str::from_utf8(line)
                .map_err(|_| Error::InvalidHeader("header line is not valid UTF-8".to_string()))?;
            let (name, value) = Headers::parse_header_line(line)?;
            self.headers.insert(name, value);
        }

        let done = match &mut self.body_kind {
            BodyKind::None => true,
            BodyKind::Length(len) => {
                let len = *len;
                if buf.len() - self.pos < len {
                    false
                } else {
                    self.body.extend_from_slice(&buf[self.pos..self.pos + len]);
                    self.pos += len;
                    true
                }
            }
            BodyKind::Chunked(decoder) => {
                let (consumed, complete) = decoder.decode(&buf[self.pos..], &mut self.body)?;
                self.pos += consumed;
                complete
            }
        };
        if !done {
            return Ok(ParseStatus::Partial);
        }

        let consumed = self.pos;
        let limits = self.limits;
        let parsed = std::mem::replace(self, RequestParser::new(limits));
        let method = parsed
            .method
            .ok_or_else(|| Error::Parse("request line missing".to_string()))?;
        let request = HttpRequest::builder()
            .method(method)
            .uri(parsed.uri)
            .version(parsed.version)
            .headers(parsed.headers)
            .body(parsed.body)
            .build();

        Ok(ParseStatus::Complete { request, consumed })
    }

    /// Next complete line of the header section, without its CRLF
    fn next_line<'a>(&mut self, buf: &'a [u8]) -> Result<Option<&'a [u8]>> {
        let from = self.scanned.saturating_sub(1).max(self.pos);
        let Some(offset) = find_crlf(&buf[from..]) else {
            self.scanned = buf.len();
            if buf.len() - self.start > self.limits.max_header_bytes {
                return Err(Error::HeadersTooLarge {
                    limit: self.limits.max_header_bytes,
                });
            }
            return Ok(None);
        };

        let end = from + offset;
        let line = &buf[self.pos..end];
        self.pos = end + 2;
        self.scanned = self.pos;
        if self.pos - self.start > self.limits.max_header_bytes {
            return Err(Error::HeadersTooLarge {
                limit: self.limits.max_header_bytes,
            });
        }
        Ok(Some(line))
    }

    /// Decide how the body is delimited (RFC 7230 Section 3.3.3)
    fn body_framing(&self) -> Result<BodyKind> {
        let content_length = self.headers.get_all("Content-Length");

        if self.headers.get("Transfer-Encoding").is_some() {
            if !content_length.is_empty() {
                return Err(Error::Parse(
                    "both Content-Length and Transfer-Encoding".to_string(),
                ));
            }
            let last = self.headers.tokens("Transfer-Encoding").last();
            return match last {
                Some(coding) if coding.eq_ignore_ascii_case("chunked") => Ok(BodyKind::Chunked(
                    ChunkedDecoder::with_limit(self.limits.max_body_size),
                )),
                _ => Err(Error::Parse(format!(
                    "final transfer coding is not chunked: {:?}",
                    last
                ))),
            };
        }

        let mut declared: Option<u64> = None;
        for value in content_length.iter().flat_map(|v| v.split(',')) {
            let value = value.trim();
            if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::Parse(format!("Invalid Content-Length: {:?}", value)));
            }
            let len = value
                .parse::<u64>()
                .map_err(|_| Error::Parse(format!("Invalid Content-Length: {:?}", value)))?;
            match declared {
                Some(prev) if prev != len => {
                    return Err(Error::Parse("conflicting Content-Length values".to_string()));
                }
                _ => declared = Some(len),
            }
        }

        match declared {
            None | Some(0) => Ok(BodyKind::None),
            Some(len) if len > self.limits.max_body_size as u64 => Err(Error::BodyTooLarge {
                limit: self.limits.max_body_size,
                declared: len,
            }),
            // fits: bounded by max_body_size
            Some(len) => Ok(BodyKind::Length(len as usize)),
        }
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new(ParserLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> Result<(HttpRequest, usize)> {
        match RequestParser::default().parse(input)? {
            ParseStatus::Complete { request, consumed } => Ok((request, consumed)),
            ParseStatus::Partial => Err(Error::Incomplete),
        }
    }

    #[test]
    fn test_parse_request_line() {
        let (method, uri, version) = parse_request_line("GET /index.html HTTP/1.1").unwrap();
        assert_eq!(method, Method::Get);
        assert_eq!(uri, "/index.html");
        assert_eq!(version, Version::Http11);
    }

    #[test]
    fn test_parse_request_line_rejects() {
        assert!(matches!(
            parse_request_line("GET  /index.html HTTP/1.1"),
            Err(Error::Parse(_))
        ));
        assert!(matches!(parse_request_line("GET /"), Err(Error::Parse(_))));
        assert!(matches!(
            parse_request_line("GET / HTTP/1.1 extra"),
            Err(Error::Parse(_))
        ));
        assert!(matches!(
            parse_request_line("BREW /pot HTTP/1.1"),
            Err(Error::InvalidMethod(_))
        ));
        assert!(matches!(
            parse_request_line("GET / HTTP/2.0"),
            Err(Error::InvalidVersion(_))
        ));
        assert!(matches!(
            parse_request_line("GET / FTP/1.0"),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_simple_get() {
        let input = b"GET /a?b=c HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let (req, consumed) = parse_all(input).unwrap();
        assert_eq!(req.method(), Method::Get);
        assert_eq!(req.uri(), "/a?b=c");
        assert_eq!(req.path(), "/a");
        assert_eq!(req.authority(), Some("example.com"));
        assert!(req.body().is_empty());
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_incremental_byte_by_byte() {
        let input = b"POST /upload HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello";
        let mut parser = RequestParser::default();

        for end in 1..input.len() {
            let status = parser.parse(&input[..end]).unwrap();
            assert!(matches!(status, ParseStatus::Partial), "complete at {}", end);
        }
        assert!(parser.headers_complete());

        match parser.parse(input).unwrap() {
            ParseStatus::Complete { request, consumed } => {
                assert_eq!(request.body(), b"hello");
                assert_eq!(consumed, input.len());
            }
            ParseStatus::Partial => panic!("expected a complete request"),
        }
        assert!(!parser.in_progress());
    }

    #[test]
    fn test_pipelined_requests() {
        let input = b"GET /1 HTTP/1.1\r\n\r\nGET /2 HTTP/1.1\r\n\r\n";
        let mut parser = RequestParser::default();

        let ParseStatus::Complete { request, consumed } = parser.parse(input).unwrap() else {
            panic!("first request incomplete");
        };
        assert_eq!(request.uri(), "/1");

        let ParseStatus::Complete { request, .. } = parser.parse(&input[consumed..]).unwrap() else {
            panic!("second request incomplete");
        };
        assert_eq!(request.uri(), "/2");
    }

    #[test]
    fn test_leading_empty_lines_skipped() {
        let (req, _) = parse_all(b"\r\n\r\nGET / HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.uri(), "/");
    }

    #[test]
    fn test_chunked_body() {
        let input = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
                      5\r\nhello\r\n6\r\n world\r\n0\r\nX-Trailer: 1\r\n\r\n";
        let (req, consumed) = parse_all(input).unwrap();
        assert_eq!(req.body(), b"hello world");
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_chunked_body_over_limit() {
        let limits = ParserLimits {
            max_body_size: 8,
            ..ParserLimits::default()
        };
        let input = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n5\r\nworld\r\n";
        let result = RequestParser::new(limits).parse(input);
        assert!(matches!(result, Err(Error::BodyTooLarge { limit: 8, declared: 10 })));
    }

    #[test]
    fn test_content_length_over_limit() {
        let limits = ParserLimits {
            max_body_size: 100,
            ..ParserLimits::default()
        };
        let input = b"POST / HTTP/1.1\r\nContent-Length: 101\r\n\r\n";
        let err = RequestParser::new(limits).parse(input).unwrap_err();
        assert!(matches!(err, Error::BodyTooLarge { declared: 101, .. }));
        assert_eq!(err.status().code(), 413);
    }

    #[test]
    fn test_header_rejections() {
        let cases: [&[u8]; 8] = [
            b"GET / HTTP/1.1\r\nNoColon\r\n\r\n",
            b"GET / HTTP/1.1\r\nHost : x\r\n\r\n",
            b"GET / HTTP/1.1\r\nX-A: 1\r\n continued\r\n\r\n",
            b"POST / HTTP/1.1\r\nContent-Length: abc\r\n\r\n",
            b"POST / HTTP/1.1\r\nContent-Length: -1\r\n\r\n",
            b"POST / HTTP/1.1\r\nContent-Length: 3\r\nContent-Length: 4\r\n\r\n",
            b"POST / HTTP/1.1\r\nContent-Length: 3\r\nTransfer-Encoding: chunked\r\n\r\n",
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked, gzip\r\n\r\n",
        ];
        for input in cases {
            let err = RequestParser::default().parse(input).unwrap_err();
            assert_eq!(err.status().code(), 400, "{:?}", String::from_utf8_lossy(input));
        }
    }

    #[test]
    fn test_non_utf8_header_line_rejected() {
        let input = b"GET / HTTP/1.1\r\nX-Name: caf\xe9\r\n\r\n";
        let err = RequestParser::default().parse(input).unwrap_err();
        assert!(matches!(err, Error::InvalidHeader(_)));
        assert_eq!(err.status().code(), 400);
    }

    #[test]
    fn test_repeated_identical_content_length() {
        let input = b"POST / HTTP/1.1\r\nContent-Length: 2\r\nContent-Length: 2\r\n\r\nok";
        let (req, _) = parse_all(input).unwrap();
        assert_eq!(req.body(), b"ok");
    }

    #[test]
    fn test_too_many_headers() {
        let mut input = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..=MAX_HEADERS {
            input.extend_from_slice(format!("X-H{}: v\r\n", i).as_bytes());
        }
        input.extend_from_slice(b"\r\n");

        let err = RequestParser::default().parse(&input).unwrap_err();
        assert!(matches!(err, Error::TooManyHeaders { .. }));
        assert_eq!(err.status().code(), 431);
    }

    #[test]
    fn test_header_section_too_large() {
        let limits = ParserLimits {
            max_header_bytes: 64,
            ..ParserLimits::default()
        };
        let mut parser = RequestParser::new(limits);

        // no CRLF yet; the limit still applies to the partial line
        let input = format!("GET /{} HTTP/1.1", "a".repeat(100));
        let err = parser.parse(input.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::HeadersTooLarge { limit: 64 }));
    }

    #[test]
    fn test_http10_request() {
        let (req, _) = parse_all(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(req.version(), Version::Http10);
        assert!(!req.keep_alive());

        let (req, _) = parse_all(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n").unwrap();
        assert!(req.keep_alive());
    }

    #[test]
    fn test_reset() {
        let mut parser = RequestParser::default();
        assert!(matches!(
            parser.parse(b"GET / HTTP/1.1\r\nHo").unwrap(),
            ParseStatus::Partial
        ));
        assert!(parser.in_progress());
        parser.reset();
        assert!(!parser.in_progress());
    }

    #[test]
    fn test_find_crlf() {
        assert_eq!(find_crlf(b"Hello\r\nWorld"), Some(5));
        assert_eq!(find_crlf(b"NoEOL"), None);
        assert_eq!(find_crlf(b"\r\n"), Some(0));
        assert_eq!(find_crlf(b"First\r\nSecond\r\n"), Some(5));
    }
}

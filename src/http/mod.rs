//! HTTP/1.1 and HTTP/2 server protocol engine
//!
//! # Architecture
//!
//! The transport is hidden behind the session operations abstraction so the
//! protocol code never knows whether it talks to plain TCP or TLS:
//!
//! - `SessionOps` defines the transport operations (poll, read, write, close)
//! - `HttpSession` adds timeouts and `io::Write` on top of any `SessionOps`
//! - `FdSessionOps` and `TlsSessionOps` are the two transports
//!
//! A [`Listener`] accepts connections, optionally runs the TLS handshake and
//! hands each connection to the [`shell`], which picks HTTP/2 or HTTP/1.1
//! (ALPN, or the HTTP/2 preface on cleartext connections). The per-protocol
//! drivers ([`Http1Server`], [`h2::H2Server`]) parse requests, run the
//! [`Dispatcher`] on a thread per request and serialize the responses.
//!
//! # Examples
//!
//! ```no_run
//! use httpwire::http::{HttpResponse, Listener, ServerConfig, Status};
//!
//! let config = ServerConfig::default();
//! let listener = Listener::bind("127.0.0.1:8080", config, |req: httpwire::http::HttpRequest, _ctx: &mut httpwire::http::RequestContext| {
//!     HttpResponse::builder()
//!         .status(Status::OK)
//!         .header("Content-Type", "text/plain")
//!         .body(format!("hello from {}", req.path()))
//!         .build()
//! })
//! .unwrap();
//! listener.serve().unwrap();
//! ```

pub mod cancel;
pub mod chunked;
pub mod config;
pub mod dispatch;
pub mod h2;
pub mod headers;
pub mod listener;
pub mod message;
pub mod parser;
pub mod server;
pub mod session;
pub mod shell;
pub mod stats;
pub mod tls;

use std::fmt;

pub use cancel::CancelToken;
pub use config::{ConfigError, ServerConfig, ServerConfigBuilder};
pub use dispatch::{Dispatcher, RequestContext};
pub use h2::PushResource;
pub use headers::Headers;
pub use listener::{Listener, ShutdownHandle};
pub use message::{HttpRequest, HttpResponse, Method, ResponseBody, Status, Version};
pub use parser::{ParseStatus, ParserLimits, RequestParser};
pub use server::Http1Server;
pub use session::{FdSessionOps, HttpSession, PollEvents, SessionOps};
pub use shell::Protocol;
pub use stats::{ServerStats, StatsSnapshot};

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Which deadline expired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Request line and header section not complete in time
    Header,
    /// Body or handler took too long
    Request,
    /// No new request on a keep-alive connection
    Idle,
    /// Transport not readable in time
    Read,
    /// Transport not writable in time
    Write,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimeoutKind::Header => "header",
            TimeoutKind::Request => "request",
            TimeoutKind::Idle => "idle",
            TimeoutKind::Read => "read",
            TimeoutKind::Write => "write",
        };
        f.write_str(name)
    }
}

/// HTTP operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("Body of {declared} bytes exceeds limit of {limit}")]
    BodyTooLarge { limit: usize, declared: u64 },

    #[error("Header section exceeds {limit} bytes")]
    HeadersTooLarge { limit: usize },

    #[error("More than {limit} headers")]
    TooManyHeaders { limit: usize },

    #[error("Incomplete message")]
    Incomplete,

    #[error("{0} timeout")]
    Timeout(TimeoutKind),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("HTTP/2 error: {0}")]
    H2(#[from] h2::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] tls::TlsError),
}

impl Error {
    /// Status to answer an HTTP/1.1 request that failed to parse
    pub fn status(&self) -> Status {
        match self {
            Error::BodyTooLarge { .. } => Status::PAYLOAD_TOO_LARGE,
            Error::HeadersTooLarge { .. } | Error::TooManyHeaders { .. } => {
                Status::REQUEST_HEADER_FIELDS_TOO_LARGE
            }
            Error::InvalidMethod(_) => Status::NOT_IMPLEMENTED,
            Error::InvalidVersion(_) => Status::HTTP_VERSION_NOT_SUPPORTED,
            Error::Timeout(_) => Status::REQUEST_TIMEOUT,
            _ => Status::BAD_REQUEST,
        }
    }
}

/// Maximum number of headers per message
pub const MAX_HEADERS: usize = 64;

/// CRLF line ending
pub const CRLF: &str = "\r\n";

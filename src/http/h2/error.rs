//! HTTP/2 error types
//!
//! Errors map onto the codes of RFC 7540 Section 7. An error either belongs
//! to one stream (answered with RST_STREAM, the connection keeps going) or
//! to the whole connection (answered with GOAWAY). [`Error::stream_id`]
//! tells the two apart.

use std::fmt;

use super::hpack::HpackError;

/// HTTP/2 errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error detected (0x1)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Internal error (0x2)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Flow control error (0x3)
    #[error("Flow control error: {0}")]
    FlowControl(String),

    /// Our SETTINGS were not acknowledged in time (0x4)
    #[error("Settings timeout")]
    SettingsTimeout,

    /// Frame on a stream that is already closed (0x5)
    #[error("Stream closed: {0}")]
    StreamClosed(u32),

    /// Frame size error (0x6)
    #[error("Frame size error: {0}")]
    FrameSize(String),

    /// Peer is generating excessive load (0xb)
    #[error("Enhance your calm: {0}")]
    EnhanceYourCalm(String),

    /// Header block could not be decoded (0x9)
    #[error("Compression error: {0}")]
    Hpack(#[from] HpackError),

    /// Client stream id that is not odd or not strictly increasing
    #[error("Stream id {stream_id} not above last client stream {last}")]
    StreamIdRegression { stream_id: u32, last: u32 },

    /// Stream id with the wrong parity or on a frame that requires one
    #[error("Invalid stream ID: {0}")]
    InvalidStreamId(u32),

    /// Invalid settings value
    #[error("Invalid settings value: {0}")]
    InvalidSettings(String),

    /// Connection did not start with the client preface
    #[error("Missing connection preface")]
    MissingPreface,

    /// Error confined to one stream; answered with RST_STREAM
    #[error("Stream {stream_id} error {code}: {reason}")]
    Stream {
        stream_id: u32,
        code: ErrorCode,
        reason: String,
    },

    /// Server push rejected
    #[error("Push rejected: {0}")]
    Push(#[from] PushError),

    /// Attempt to send more DATA than the window allows
    #[error("Send of {requested} bytes on stream {stream_id} exceeds window of {available}")]
    SendWindowExceeded {
        stream_id: u32,
        requested: usize,
        available: i64,
    },

    /// WINDOW_UPDATE would push a window past 2^31-1
    #[error("Flow control window overflow on stream {stream_id}")]
    WindowOverflow { stream_id: u32 },

    /// Stream not known to the connection
    #[error("Stream not found: {0}")]
    StreamNotFound(u32),

    /// Timeout waiting for the peer
    #[error("Timeout")]
    Timeout,

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,
}

impl Error {
    /// Stream-scoped error
    pub fn stream(stream_id: u32, code: ErrorCode, reason: impl Into<String>) -> Self {
        Error::Stream {
            stream_id,
            code,
            reason: reason.into(),
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Error::Protocol(reason.into())
    }

    /// RFC 7540 error code sent to the peer for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Io(_) | Error::Internal(_) | Error::ConnectionClosed => {
                ErrorCode::InternalError
            }
            Error::Protocol(_)
            | Error::StreamIdRegression { .. }
            | Error::InvalidStreamId(_)
            | Error::InvalidSettings(_)
            | Error::MissingPreface => ErrorCode::ProtocolError,
            Error::FlowControl(_) | Error::WindowOverflow { .. } => ErrorCode::FlowControlError,
            Error::SettingsTimeout | Error::Timeout => ErrorCode::SettingsTimeout,
            Error::StreamClosed(_) => ErrorCode::StreamClosed,
            Error::FrameSize(_) => ErrorCode::FrameSizeError,
            Error::EnhanceYourCalm(_) => ErrorCode::EnhanceYourCalm,
            Error::Hpack(_) => ErrorCode::CompressionError,
            Error::Stream { code, .. } => *code,
            Error::Push(_) | Error::SendWindowExceeded { .. } | Error::StreamNotFound(_) => {
                ErrorCode::InternalError
            }
        }
    }

    /// Stream the error is confined to; `None` for connection errors
    pub fn stream_id(&self) -> Option<u32> {
        match self {
            Error::Stream { stream_id, .. } => Some(*stream_id),
            _ => None,
        }
    }

    /// Whether the error must tear down the whole connection
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Stream { .. } => false,
            // local API misuse; nothing was put on the wire
            Error::Push(_) | Error::SendWindowExceeded { .. } | Error::StreamNotFound(_) => false,
            _ => true,
        }
    }
}

/// Reasons a server push is refused
///
/// Each check has its own variant so callers can branch on the cause.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    #[error("server push is disabled")]
    Disabled,

    #[error("missing pseudo-header {0} in pushed request")]
    MissingPseudoHeader(&'static str),

    #[error("unsafe method {0} for pushed request (only GET and HEAD)")]
    UnsafeMethod(String),

    #[error("pushed stream limit of {limit} reached")]
    TooManyPushedStreams { limit: usize },

    #[error("pushed resource of {size} bytes exceeds limit of {limit}")]
    ResourceTooLarge { size: usize, limit: usize },

    #[error("pushed resource of {size} bytes exceeds flow-control window of {window}")]
    FlowControlWindowExceeded { size: usize, window: i64 },

    #[error("associated stream {0} is not open")]
    InvalidAssociatedStream(u32),

    #[error("peer concurrent stream limit of {limit} reached")]
    ConcurrencyLimit { limit: u32 },

    #[error("connection is going away")]
    GoingAway,

    #[error("server push is not available on this connection")]
    Unavailable,
}

/// HTTP/2 error codes as defined in RFC 7540 Section 7
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// Graceful shutdown
    NoError = 0x0,
    /// Protocol error detected
    ProtocolError = 0x1,
    /// Implementation fault
    InternalError = 0x2,
    /// Flow-control limits exceeded
    FlowControlError = 0x3,
    /// Settings not acknowledged
    SettingsTimeout = 0x4,
    /// Frame received for closed stream
    StreamClosed = 0x5,
    /// Frame size incorrect
    FrameSizeError = 0x6,
    /// Stream not processed
    RefusedStream = 0x7,
    /// Stream cancelled
    Cancel = 0x8,
    /// Compression state not updated
    CompressionError = 0x9,
    /// TCP connection error for CONNECT method
    ConnectError = 0xa,
    /// Processing capacity exceeded
    EnhanceYourCalm = 0xb,
    /// Negotiated TLS parameters not acceptable
    InadequateSecurity = 0xc,
    /// Use HTTP/1.1 for the request
    Http11Required = 0xd,
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Unknown codes map to INTERNAL_ERROR (RFC 7540 Section 7)
    pub fn from_u32(code: u32) -> Self {
        match code {
            0x0 => ErrorCode::NoError,
            0x1 => ErrorCode::ProtocolError,
            0x3 => ErrorCode::FlowControlError,
            0x4 => ErrorCode::SettingsTimeout,
            0x5 => ErrorCode::StreamClosed,
            0x6 => ErrorCode::FrameSizeError,
            0x7 => ErrorCode::RefusedStream,
            0x8 => ErrorCode::Cancel,
            0x9 => ErrorCode::CompressionError,
            0xa => ErrorCode::ConnectError,
            0xb => ErrorCode::EnhanceYourCalm,
            0xc => ErrorCode::InadequateSecurity,
            0xd => ErrorCode::Http11Required,
            _ => ErrorCode::InternalError,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

/// Result type for HTTP/2 operations
pub type Result<T> = std::result::Result<T, Error>;

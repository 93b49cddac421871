//! HTTP/2 server protocol (RFC 7540, RFC 7541)
//!
//! # Architecture
//!
//! The protocol engine is split into layers that can be used and tested on
//! their own:
//!
//! - [`hpack`]: header compression (Huffman code, static and dynamic table)
//! - [`frames`] / [`codec`]: frame types and their wire format
//! - [`settings`], [`flow_control`], [`stream`], [`priority`]: per-connection
//!   and per-stream protocol state
//! - [`connection`]: the sans-IO state machine tying everything together
//! - [`server`]: the driver that owns a transport, a connection and the
//!   handler threads
//!
//! # Example
//!
//! ```no_run
//! use httpwire::http::config::ServerConfig;
//! use httpwire::http::h2::H2Connection;
//!
//! let config = ServerConfig::default();
//! let mut conn = H2Connection::server(&config);
//! let settings = conn.take_output();
//! // write `settings`, then feed every read into `conn.receive(..)`
//! # let _ = settings;
//! ```

pub mod codec;
pub mod connection;
pub mod error;
pub mod flow_control;
pub mod frames;
pub mod hpack;
pub mod priority;
pub mod server;
pub mod settings;
pub mod stream;

pub use connection::{ConnectionEvent, H2Connection, PushResource};
pub use error::{Error, ErrorCode, PushError, Result};
pub use frames::{DataFrame, Frame, FrameFlags, FrameType, HeadersFrame, SettingsFrame};
pub use priority::PriorityTree;
pub use server::H2Server;
pub use settings::{Settings, SettingsBuilder};
pub use stream::{H2Stream, StreamId, StreamState};

/// HTTP/2 connection preface that must be sent by clients
///
/// From RFC 7540 Section 3.5:
/// "PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default initial window size (65535 bytes)
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default maximum frame size (16384 bytes)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Default header table size (4096 bytes)
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// Maximum stream ID value (2^31 - 1)
pub const MAX_STREAM_ID: u32 = 0x7FFFFFFF;

/// Stream ID 0 (connection-level)
pub const CONNECTION_STREAM_ID: u32 = 0;

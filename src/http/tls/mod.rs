//! TLS support for the server
//!
//! TLS is a transport detail here: the handshake runs when a connection is
//! accepted, ALPN picks the protocol, and afterwards the drivers see an
//! ordinary [`SessionOps`](crate::http::SessionOps).
//!
//! # Architecture
//!
//! 1. `TlsConfig` holds the OpenSSL context (certificate, versions, ALPN)
//! 2. `TlsSessionOps` implements the `SessionOps` trait for encrypted I/O
//! 3. All HTTP code remains unchanged - it transparently uses TLS operations
//!
//! # Examples
//!
//! ```no_run
//! use httpwire::http::tls::{TlsConfig, TlsVersion};
//! use std::net::TcpListener;
//!
//! let tls_config = TlsConfig::server()
//!     .cert_file("server.pem")
//!     .unwrap()
//!     .version_range(TlsVersion::Tls12, TlsVersion::Tls13)
//!     .alpn(&["h2", "http/1.1"])
//!     .build()
//!     .unwrap();
//!
//! let listener = TcpListener::bind("127.0.0.1:8443").unwrap();
//! let (tcp_stream, _) = listener.accept().unwrap();
//! let session = tls_config.accept(tcp_stream).unwrap();
//! # let _ = session;
//! ```

pub mod config;
pub mod selfsigned;
pub mod session;

pub use config::{TlsConfigBuilder, TlsConfig, TlsError, TlsVersion};
pub use session::TlsSessionOps;

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;

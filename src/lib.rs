//! httpwire - HTTP/1.1 and HTTP/2 server protocol engine
//!
//! This crate implements the wire side of an HTTP server: an incremental
//! HTTP/1.1 parser with chunked transfer coding, the HTTP/2 framing layer,
//! HPACK header compression, stream prioritization, flow control and server
//! push. A small listener and ALPN shell pick the protocol per connection
//! and hand requests to a user handler.

pub mod http;

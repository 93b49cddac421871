//! TLS session operations
//!
//! This module implements the SessionOps trait for TLS connections,
//! enabling transparent switching between plain TCP and TLS I/O.

use super::config::{TlsConfig, TlsError};
use crate::http::session::{poll_fd, PollEvents, SessionOps};
use crate::http::{Error, Result as HttpResult};
use openssl::ssl::{ErrorCode, Ssl, SslStream};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::AsRawFd;
use std::time::Duration;
use tracing::debug;

/// TLS session operations
///
/// Implements SessionOps trait for TLS-encrypted connections.
/// Wraps an OpenSSL SslStream and provides poll/read/write/close operations.
pub struct TlsSessionOps {
    stream: SslStream<TcpStream>,
    alpn: Option<Vec<u8>>,
    failed: bool,
}

impl TlsSessionOps {
    /// Accept a client connection with TLS (perform handshake)
    pub fn accept(tcp_stream: TcpStream, config: &TlsConfig) -> Result<Self, TlsError> {
        let ssl = Ssl::new(&config.ctx)?;

        // blocking handshake; the caller bounds it with a socket timeout
        let ssl_stream = ssl
            .accept(tcp_stream)
            .map_err(|e| TlsError::HandshakeFailed(format!("Accept failed: {}", e)))?;

        let alpn = ssl_stream.ssl().selected_alpn_protocol().map(<[u8]>::to_vec);
        debug!(
            version = ssl_stream.ssl().version_str(),
            alpn = alpn.as_deref().map(String::from_utf8_lossy).as_deref(),
            "TLS handshake complete"
        );

        Ok(TlsSessionOps {
            stream: ssl_stream,
            alpn,
            failed: false,
        })
    }

    /// Negotiated protocol version, e.g. `TLSv1.3`
    pub fn version(&self) -> &'static str {
        self.stream.ssl().version_str()
    }

    /// Check if TLS failed
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Get reference to underlying TCP stream
    pub fn get_ref(&self) -> &TcpStream {
        self.stream.get_ref()
    }

    fn io_error(&mut self, e: io::Error) -> Error {
        if e.kind() != io::ErrorKind::WouldBlock {
            self.failed = true;
        }
        Error::Io(e)
    }
}

impl SessionOps for TlsSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> HttpResult<bool> {
        // decrypted bytes already buffered inside OpenSSL
        if events != PollEvents::Write && self.stream.ssl().pending() > 0 {
            return Ok(true);
        }
        poll_fd(self.stream.get_ref().as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> HttpResult<usize> {
        match self.stream.ssl_read(buf) {
            Ok(n) => Ok(n),
            // close_notify or an unclean EOF both end the session
            Err(e) if e.code() == ErrorCode::ZERO_RETURN || e.code() == ErrorCode::SYSCALL => {
                if e.io_error().is_some() {
                    self.failed = true;
                }
                Ok(0)
            }
            Err(e) => {
                let err = e
                    .into_io_error()
                    .unwrap_or_else(|e| io::Error::new(io::ErrorKind::Other, e));
                Err(self.io_error(err))
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> HttpResult<usize> {
        match self.stream.write(buf) {
            Ok(n) => Ok(n),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn flush(&mut self) -> HttpResult<()> {
        match self.stream.flush() {
            Ok(()) => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn close(&mut self) -> HttpResult<()> {
        // Perform SSL shutdown if not failed
        if !self.failed {
            let _ = self.stream.shutdown();
        }

        match self.stream.get_mut().shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other.map_err(Error::from),
        }
    }

    fn alpn_protocol(&self) -> Option<&[u8]> {
        self.alpn.as_deref()
    }
}

impl std::fmt::Debug for TlsSessionOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSessionOps")
            .field("version", &self.version())
            .field("alpn", &self.alpn)
            .field("failed", &self.failed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn client(addr: std::net::SocketAddr, alpn: &[u8]) -> SslStream<TcpStream> {
        let mut builder = SslConnector::builder(SslMethod::tls_client()).unwrap();
        builder.set_verify(SslVerifyMode::NONE);
        builder.set_alpn_protos(alpn).unwrap();
        let connector = builder.build();
        let tcp = TcpStream::connect(addr).unwrap();
        connector.connect("localhost", tcp).unwrap()
    }

    #[test]
    fn test_handshake_and_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = TlsConfig::server().alpn(&["h2", "http/1.1"]).build().unwrap();

        let server = thread::spawn(move || {
            let (tcp, _) = listener.accept().unwrap();
            let mut session = config.accept(tcp).unwrap();
            assert_eq!(session.alpn_protocol(), Some(&b"h2"[..]));

            assert!(session
                .poll(PollEvents::Read, Some(Duration::from_secs(5)))
                .unwrap());
            let mut buf = [0u8; 5];
            let n = session.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], b"Hello");
            session.write(b"World").unwrap();
            session.close().unwrap();
        });

        let mut stream = client(addr, b"\x02h2\x08http/1.1");
        assert_eq!(stream.ssl().selected_alpn_protocol(), Some(&b"h2"[..]));
        stream.write_all(b"Hello").unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"World");

        server.join().unwrap();
    }

    #[test]
    fn test_read_after_peer_close_is_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = TlsConfig::server().build().unwrap();

        let server = thread::spawn(move || {
            let (tcp, _) = listener.accept().unwrap();
            let mut session = config.accept(tcp).unwrap();
            assert!(session.alpn_protocol().is_none());
            let mut buf = [0u8; 16];
            session.read(&mut buf).unwrap()
        });

        let mut stream = client(addr, b"\x08http/1.1");
        stream.shutdown().unwrap();
        drop(stream);

        assert_eq!(server.join().unwrap(), 0);
    }
}

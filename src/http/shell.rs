//! Protocol selection for an accepted connection
//!
//! TLS connections announce their protocol through ALPN. Cleartext
//! connections speak HTTP/1.1 unless their first bytes are the HTTP/2
//! connection preface (prior knowledge, RFC 7540 Section 3.4).

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use super::cancel::CancelToken;
use super::config::ServerConfig;
use super::dispatch::Dispatcher;
use super::h2::{H2Server, CONNECTION_PREFACE};
use super::server::Http1Server;
use super::session::{HttpSession, SessionOps};
use super::stats::ServerStats;
use super::{Error, Result, TimeoutKind};

/// Application protocol spoken on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http1,
    Http2,
}

impl Protocol {
    /// Protocol for an ALPN identifier; no ALPN means HTTP/1.1
    pub fn from_alpn(alpn: Option<&[u8]>) -> Self {
        match alpn {
            Some(b"h2") => Protocol::Http2,
            _ => Protocol::Http1,
        }
    }

    /// ALPN identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http1 => "http/1.1",
            Protocol::Http2 => "h2",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify the first bytes of a cleartext connection
///
/// `None` while `buf` is a strict prefix of the HTTP/2 preface.
pub fn sniff(buf: &[u8]) -> Option<Protocol> {
    let n = buf.len().min(CONNECTION_PREFACE.len());
    if buf[..n] != CONNECTION_PREFACE[..n] {
        Some(Protocol::Http1)
    } else if n == CONNECTION_PREFACE.len() {
        Some(Protocol::Http2)
    } else {
        None
    }
}

/// Pick the protocol and run its driver until the connection ends
pub fn serve_connection<S: SessionOps>(
    mut session: HttpSession<S>,
    config: Arc<ServerConfig>,
    dispatcher: Arc<dyn Dispatcher>,
    stats: Arc<ServerStats>,
    cancel: CancelToken,
) -> Result<()> {
    let mut initial = Vec::new();
    let protocol = match session.alpn_protocol() {
        Some(alpn) => Protocol::from_alpn(Some(alpn)),
        None => match detect(&mut session, &config, &cancel, &mut initial)? {
            Some(protocol) => protocol,
            None => {
                let _ = session.close();
                return Ok(());
            }
        },
    };

    stats.protocol_selected(protocol);
    debug!(protocol = %protocol, "protocol selected");

    match protocol {
        Protocol::Http2 => {
            H2Server::new(session, config, dispatcher, stats, cancel).serve(&initial)
        }
        Protocol::Http1 => {
            Http1Server::new(session, config, dispatcher, stats, cancel).serve(&initial)
        }
    }
}

/// Read until the first bytes decide the protocol
///
/// `None` when the peer closed, the connection stayed idle, or shutdown
/// started before anything arrived.
fn detect<S: SessionOps>(
    session: &mut HttpSession<S>,
    config: &ServerConfig,
    cancel: &CancelToken,
    buf: &mut Vec<u8>,
) -> Result<Option<Protocol>> {
    let accepted = Instant::now();
    let mut first_byte: Option<Instant> = None;
    let mut chunk = [0u8; 64];

    loop {
        let deadline = match first_byte {
            None => accepted + config.idle_timeout,
            Some(t) => t + config.header_timeout,
        };
        let now = Instant::now();
        if now >= deadline {
            return match first_byte {
                None => Ok(None),
                Some(_) => Err(Error::Timeout(TimeoutKind::Header)),
            };
        }
        if first_byte.is_none() && cancel.is_cancelled() {
            return Ok(None);
        }

        if !session.wait_readable((deadline - now).min(config.poll_interval))? {
            continue;
        }
        let n = session.read(&mut chunk)?;
        if n == 0 {
            return match first_byte {
                None => Ok(None),
                Some(_) => Err(Error::ConnectionClosed),
            };
        }
        first_byte.get_or_insert_with(Instant::now);
        buf.extend_from_slice(&chunk[..n]);

        if let Some(protocol) = sniff(buf) {
            return Ok(Some(protocol));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_alpn() {
        assert_eq!(Protocol::from_alpn(Some(b"h2")), Protocol::Http2);
        assert_eq!(Protocol::from_alpn(Some(b"http/1.1")), Protocol::Http1);
        assert_eq!(Protocol::from_alpn(None), Protocol::Http1);
        assert_eq!(Protocol::Http2.to_string(), "h2");
    }

    #[test]
    fn test_sniff() {
        assert_eq!(sniff(b""), None);
        assert_eq!(sniff(b"PRI * HTTP"), None);
        assert_eq!(sniff(CONNECTION_PREFACE), Some(Protocol::Http2));
        assert_eq!(sniff(b"POST / HTTP/1.1\r\n"), Some(Protocol::Http1));
        assert_eq!(sniff(b"GET"), Some(Protocol::Http1));

        let mut with_frames = CONNECTION_PREFACE.to_vec();
        with_frames.extend_from_slice(&[0, 0, 0, 4, 0, 0, 0, 0, 0]);
        assert_eq!(sniff(&with_frames), Some(Protocol::Http2));
    }
}

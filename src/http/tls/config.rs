//! TLS configuration
//!
//! The builder only collects settings; the OpenSSL context is created in
//! [`TlsConfigBuilder::build`] so every OpenSSL failure surfaces as a
//! [`TlsError`] there.

use std::fs::File;
use std::io::Read;
use std::net::TcpStream;
use std::path::Path;

use openssl::pkey::PKey;
use openssl::ssl::{AlpnError, SslContext, SslContextBuilder, SslMethod, SslVersion};
use openssl::x509::X509;

use super::selfsigned;
use super::session::TlsSessionOps;

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Parse TLS version from string (case-insensitive)
    pub fn from_str(s: &str) -> Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }

    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(&self) -> SslVersion {
        match self {
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Get version as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
}

/// Server-side TLS configuration (immutable after building)
#[derive(Clone)]
pub struct TlsConfig {
    pub(crate) ctx: SslContext,
    alpn: Vec<Vec<u8>>,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let alpn: Vec<_> = self.alpn.iter().map(|p| String::from_utf8_lossy(p)).collect();
        f.debug_struct("TlsConfig").field("alpn", &alpn).finish()
    }
}

impl TlsConfig {
    /// Create a new server configuration builder
    pub fn server() -> TlsConfigBuilder {
        TlsConfigBuilder::new()
    }

    /// Protocols offered through ALPN, in preference order
    pub fn alpn_protocols(&self) -> &[Vec<u8>] {
        &self.alpn
    }

    /// Run the server side of the handshake on an accepted connection
    pub fn accept(&self, stream: TcpStream) -> Result<TlsSessionOps, TlsError> {
        TlsSessionOps::accept(stream, self)
    }
}

/// Server configuration builder
#[derive(Debug, Default)]
pub struct TlsConfigBuilder {
    cert_pem: Option<Vec<u8>>,
    key_pem: Option<Vec<u8>>,
    alpn: Vec<Vec<u8>>,
    min_version: Option<TlsVersion>,
    max_version: Option<TlsVersion>,
    cipher_list: Option<String>,
}

impl TlsConfigBuilder {
    fn new() -> Self {
        Self::default()
    }

    /// Set TLS version (both min and max)
    pub fn version(self, version: TlsVersion) -> Self {
        self.version_range(version, version)
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.min_version = Some(min);
        self.max_version = Some(max);
        self
    }

    /// Set cipher list (for TLS <= 1.2)
    pub fn cipher_list(mut self, ciphers: impl Into<String>) -> Self {
        self.cipher_list = Some(ciphers.into());
        self
    }

    /// Protocols to offer through ALPN, most preferred first
    pub fn alpn(mut self, protocols: &[&str]) -> Self {
        self.alpn = protocols.iter().map(|p| p.as_bytes().to_vec()).collect();
        self
    }

    /// Load certificate and private key from one PEM file
    pub fn cert_file<P: AsRef<Path>>(self, path: P) -> Result<Self, TlsError> {
        let mut pem = Vec::new();
        File::open(path.as_ref())?.read_to_end(&mut pem)?;
        Ok(self.cert_and_key_pem(&pem, &pem))
    }

    /// Certificate (chain) and private key as PEM
    pub fn cert_and_key_pem(mut self, cert: &[u8], key: &[u8]) -> Self {
        self.cert_pem = Some(cert.to_vec());
        self.key_pem = Some(key.to_vec());
        self
    }

    /// Build the TLS configuration
    ///
    /// Without a certificate a self-signed one is generated.
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        let mut ctx = SslContextBuilder::new(SslMethod::tls_server())?;

        let min = self.min_version.unwrap_or(TlsVersion::Tls12);
        ctx.set_min_proto_version(Some(min.to_openssl_version()))?;
        if let Some(max) = self.max_version {
            ctx.set_max_proto_version(Some(max.to_openssl_version()))?;
        }
        if let Some(ciphers) = &self.cipher_list {
            ctx.set_cipher_list(ciphers)?;
        }

        match (&self.cert_pem, &self.key_pem) {
            (Some(cert_pem), Some(key_pem)) => {
                let mut chain = X509::stack_from_pem(cert_pem).map_err(|e| {
                    TlsError::Certificate(format!("Failed to load certificate: {}", e))
                })?;
                if chain.is_empty() {
                    return Err(TlsError::Certificate("no certificate in PEM".to_string()));
                }
                let leaf = chain.remove(0);
                ctx.set_certificate(&leaf)?;
                for extra in chain {
                    ctx.add_extra_chain_cert(extra)?;
                }
                let key = PKey::private_key_from_pem(key_pem).map_err(|e| {
                    TlsError::Certificate(format!("Failed to load private key: {}", e))
                })?;
                ctx.set_private_key(&key)?;
            }
            _ => {
                let (cert, key) = selfsigned::generate("localhost")?;
                ctx.set_certificate(&cert)?;
                ctx.set_private_key(&key)?;
            }
        }
        ctx.check_private_key()
            .map_err(|e| TlsError::Certificate(format!("key does not match certificate: {}", e)))?;

        if !self.alpn.is_empty() {
            let ours = self.alpn.clone();
            ctx.set_alpn_select_callback(move |_ssl, client_protos| {
                select_alpn(&ours, client_protos).ok_or(AlpnError::NOACK)
            });
        }

        Ok(TlsConfig {
            ctx: ctx.build(),
            alpn: self.alpn,
        })
    }
}

/// Pick our most preferred protocol that the client offered
///
/// `client` is the length-prefixed wire list from the ClientHello.
pub fn select_alpn<'a>(ours: &[Vec<u8>], client: &'a [u8]) -> Option<&'a [u8]> {
    let mut offered = Vec::new();
    let mut pos = 0;
    while pos < client.len() {
        let len = client[pos] as usize;
        pos += 1;
        if pos + len > client.len() {
            break;
        }
        offered.push(&client[pos..pos + len]);
        pos += len;
    }

    ours.iter()
        .find_map(|proto| offered.iter().find(|&&p| p == proto.as_slice()).copied())
}

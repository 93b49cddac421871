//! Protocol selection over TLS

mod common;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use common::{fast_config, H2Client, TestServer};
use httpwire::http::h2::Settings;
use httpwire::http::tls::{selfsigned, TlsConfig};
use httpwire::http::{HttpRequest, HttpResponse, Listener, RequestContext};
use openssl::ssl::{SslConnector, SslMethod, SslStream, SslVerifyMode};

fn hello(req: HttpRequest, _ctx: &mut RequestContext) -> HttpResponse {
    HttpResponse::builder()
        .header("x-version", req.version().to_string())
        .body("secure")
        .build()
}

fn tls_server(tls: TlsConfig) -> TestServer {
    let listener = Listener::bind("127.0.0.1:0", fast_config().build().unwrap(), hello)
        .unwrap()
        .tls(tls);
    TestServer::start_listener(listener)
}

fn default_tls() -> TlsConfig {
    TlsConfig::server()
        .alpn(&["h2", "http/1.1"])
        .build()
        .unwrap()
}

/// Connect without verifying the self-signed certificate
fn connect(server: &TestServer, alpn: Option<&[u8]>) -> SslStream<TcpStream> {
    let mut builder = SslConnector::builder(SslMethod::tls()).unwrap();
    builder.set_verify(SslVerifyMode::NONE);
    if let Some(protos) = alpn {
        builder.set_alpn_protos(protos).unwrap();
    }
    let connector = builder.build();
    let tcp = server.connect();
    connector
        .configure()
        .unwrap()
        .verify_hostname(false)
        .connect("localhost", tcp)
        .unwrap()
}

fn read_all(stream: &mut SslStream<TcpStream>) -> String {
    let mut out = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => out.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8(out).unwrap()
}

#[test]
fn test_h2_selected_by_alpn() {
    let server = tls_server(default_tls());
    let stream = connect(&server, Some(b"\x02h2\x08http/1.1"));
    assert_eq!(stream.ssl().selected_alpn_protocol(), Some(&b"h2"[..]));

    let mut client = H2Client::new(stream);
    client.handshake(Settings::default());
    client.get(1, "/");
    let response = client.read_response(1);
    assert_eq!(response.status(), Some("200"));
    assert_eq!(response.header("x-version"), Some("HTTP/2"));
    assert_eq!(response.body, b"secure");
    assert_eq!(server.stats.snapshot().http2_connections, 1);
}

#[test]
fn test_server_preference_wins() {
    let server = tls_server(default_tls());
    let stream = connect(&server, Some(b"\x08http/1.1\x02h2"));
    assert_eq!(stream.ssl().selected_alpn_protocol(), Some(&b"h2"[..]));
}

#[test]
fn test_http1_selected_by_alpn() {
    let server = tls_server(default_tls());
    let mut stream = connect(&server, Some(b"\x08http/1.1"));
    assert_eq!(stream.ssl().selected_alpn_protocol(), Some(&b"http/1.1"[..]));

    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .unwrap();
    let response = read_all(&mut stream);
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("x-version: HTTP/1.1"));
    assert!(response.ends_with("secure"));
}

#[test]
fn test_no_alpn_means_http1() {
    let server = tls_server(default_tls());
    let mut stream = connect(&server, None);
    assert_eq!(stream.ssl().selected_alpn_protocol(), None);

    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .unwrap();
    let response = read_all(&mut stream);
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
}

#[test]
fn test_certificate_from_pem_file() {
    let (cert, key) = selfsigned::generate("localhost").unwrap();
    let mut pem = cert.to_pem().unwrap();
    pem.extend_from_slice(&key.private_key_to_pem_pkcs8().unwrap());
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&pem).unwrap();
    file.flush().unwrap();

    let tls = TlsConfig::server()
        .alpn(&["http/1.1"])
        .cert_file(file.path())
        .unwrap()
        .build()
        .unwrap();
    let server = tls_server(tls);
    let mut stream = connect(&server, Some(b"\x02h2\x08http/1.1"));
    assert_eq!(stream.ssl().selected_alpn_protocol(), Some(&b"http/1.1"[..]));

    let peer = stream.ssl().peer_certificate().unwrap();
    assert_eq!(peer.to_der().unwrap(), cert.to_der().unwrap());

    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .unwrap();
    assert!(read_all(&mut stream).ends_with("secure"));
}

#[test]
fn test_failed_handshake_does_not_stop_listener() {
    let server = tls_server(default_tls());

    let mut plain = server.connect();
    plain
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();
    plain
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut buf = Vec::new();
    let _ = plain.read_to_end(&mut buf);
    assert!(!String::from_utf8_lossy(&buf).contains("secure"));

    let mut stream = connect(&server, Some(b"\x08http/1.1"));
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .unwrap();
    assert!(read_all(&mut stream).ends_with("secure"));
}

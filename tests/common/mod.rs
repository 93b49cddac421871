//! Shared helpers for the integration tests: a running listener and a
//! minimal HTTP/2 client speaking raw frames.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

use bytes::BytesMut;
use httpwire::http::h2::codec::{FrameCodec, MAX_FRAME_SIZE};
use httpwire::http::h2::hpack::{Decoder, Encoder, HeaderField};
use httpwire::http::h2::frames::WindowUpdateFrame;
use httpwire::http::h2::{Frame, HeadersFrame, Settings, SettingsFrame, CONNECTION_PREFACE};
use httpwire::http::{Dispatcher, Listener, ServerConfig, ShutdownHandle};

/// Route `tracing` output through the test harness; `RUST_LOG` filters it
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config with a short poll tick so tests don't wait on it
pub fn fast_config() -> httpwire::http::ServerConfigBuilder {
    ServerConfig::builder().poll_interval(Duration::from_millis(5))
}

/// A listener running on its own thread; shut down on drop
pub struct TestServer {
    pub addr: SocketAddr,
    pub stats: std::sync::Arc<httpwire::http::ServerStats>,
    handle: ShutdownHandle,
    thread: Option<thread::JoinHandle<()>>,
}

impl TestServer {
    pub fn start(config: ServerConfig, dispatcher: impl Dispatcher) -> Self {
        Self::start_listener(Listener::bind("127.0.0.1:0", config, dispatcher).unwrap())
    }

    pub fn start_listener(listener: Listener) -> Self {
        init_tracing();
        let addr = listener.local_addr().unwrap();
        let handle = listener.shutdown_handle();
        let stats = listener.stats();
        let thread = thread::spawn(move || {
            listener.serve().unwrap();
        });
        TestServer {
            addr,
            stats,
            handle,
            thread: Some(thread),
        }
    }

    pub fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Read until the peer closes the connection
pub fn read_to_close(stream: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let _ = stream.read_to_end(&mut out);
    out
}

/// A decoded response on one stream
#[derive(Debug, Default)]
pub struct H2Response {
    pub headers: Vec<HeaderField>,
    pub body: Vec<u8>,
}

impl H2Response {
    pub fn status(&self) -> Option<&str> {
        self.header(":status")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}

/// Raw-frame HTTP/2 client over any byte stream
pub struct H2Client<S: Read + Write> {
    pub stream: S,
    buf: BytesMut,
    codec: FrameCodec,
    pub encoder: Encoder,
    pub decoder: Decoder,
    /// Every frame received so far, in order
    pub frames: Vec<Frame>,
    pending: HashMap<u32, H2Response>,
    completed: HashSet<u32>,
}

impl<S: Read + Write> H2Client<S> {
    pub fn new(stream: S) -> Self {
        H2Client {
            stream,
            buf: BytesMut::new(),
            codec: FrameCodec::new(MAX_FRAME_SIZE),
            encoder: Encoder::default(),
            decoder: Decoder::new(4096, 1 << 20),
            frames: Vec::new(),
            pending: HashMap::new(),
            completed: HashSet::new(),
        }
    }

    /// Send the preface and our SETTINGS
    pub fn handshake(&mut self, settings: Settings) {
        let mut out = BytesMut::new();
        out.extend_from_slice(CONNECTION_PREFACE);
        FrameCodec::encode(&Frame::Settings(SettingsFrame::new(settings)), &mut out);
        self.stream.write_all(&out).unwrap();
    }

    pub fn send(&mut self, frame: Frame) {
        let mut out = BytesMut::new();
        FrameCodec::encode(&frame, &mut out);
        self.stream.write_all(&out).unwrap();
    }

    /// Automatic replies; the server may already be gone
    fn reply(&mut self, frame: Frame) {
        let mut out = BytesMut::new();
        FrameCodec::encode(&frame, &mut out);
        let _ = self.stream.write_all(&out);
    }

    pub fn request(&mut self, stream_id: u32, fields: &[HeaderField], end_stream: bool) {
        let block = self.encoder.encode_block(fields);
        self.send(Frame::Headers(HeadersFrame::new(stream_id, block, end_stream, true)));
    }

    pub fn get(&mut self, stream_id: u32, path: &str) {
        let fields = [
            HeaderField::new(":method", "GET"),
            HeaderField::new(":scheme", "http"),
            HeaderField::new(":path", path),
            HeaderField::new(":authority", "localhost"),
        ];
        self.request(stream_id, &fields, true);
    }

    /// Next frame, or `None` once the server closed the connection
    ///
    /// SETTINGS are acknowledged and received DATA is credited back right
    /// away, so large responses never stall on our windows.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buf).unwrap() {
                match &frame {
                    Frame::Settings(s) if !s.ack => {
                        self.reply(Frame::Settings(SettingsFrame::ack()));
                    }
                    Frame::Data(d) if !d.data.is_empty() => {
                        let len = d.data.len() as u32;
                        self.reply(Frame::WindowUpdate(WindowUpdateFrame::new(0, len)));
                        if !d.end_stream {
                            self.reply(Frame::WindowUpdate(WindowUpdateFrame::new(d.stream_id, len)));
                        }
                    }
                    _ => {}
                }
                self.frames.push(frame.clone());
                return Some(frame);
            }
            let mut chunk = [0u8; 16 * 1024];
            let n = self.stream.read(&mut chunk).unwrap_or(0);
            if n == 0 {
                return None;
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Read frames until the response on `stream_id` is complete
    ///
    /// Header blocks on every stream are decoded in arrival order so the
    /// HPACK state stays in sync. Responses completing on other streams are
    /// kept for a later call.
    pub fn read_response(&mut self, stream_id: u32) -> H2Response {
        loop {
            if self.completed.contains(&stream_id) {
                self.completed.remove(&stream_id);
                return self.pending.remove(&stream_id).unwrap_or_default();
            }
            let Some(frame) = self.next_frame() else {
                panic!("connection closed before stream {stream_id} completed");
            };
            match frame {
                Frame::Headers(h) => {
                    let fields = self.decoder.decode(&h.header_block).unwrap();
                    self.pending.entry(h.stream_id).or_default().headers.extend(fields);
                    if h.end_stream {
                        self.completed.insert(h.stream_id);
                    }
                }
                Frame::PushPromise(p) => {
                    self.decoder.decode(&p.header_block).unwrap();
                }
                Frame::Data(d) => {
                    self.pending
                        .entry(d.stream_id)
                        .or_default()
                        .body
                        .extend_from_slice(&d.data);
                    if d.end_stream {
                        self.completed.insert(d.stream_id);
                    }
                }
                Frame::RstStream(r) if r.stream_id == stream_id => {
                    panic!("stream {stream_id} reset with {:?}", r.error_code);
                }
                Frame::Goaway(g) => {
                    panic!("GOAWAY {:?} while waiting for stream {stream_id}", g.error_code);
                }
                _ => {}
            }
        }
    }
}

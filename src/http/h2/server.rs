//! HTTP/2 connection driver
//!
//! Owns the transport and an [`H2Connection`]; everything that touches the
//! wire, HPACK state or flow-control windows happens on the thread running
//! [`H2Server::serve`]. Each request is dispatched on a handler thread and
//! the results come back through the connection's message queue.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use super::connection::{ConnectionEvent, H2Connection};
use super::error::{Error as H2Error, ErrorCode, PushError};
use super::stream::StreamId;
use crate::http::cancel::CancelToken;
use crate::http::config::ServerConfig;
use crate::http::dispatch::{
    spawn_handler, Dispatcher, HandlerMessage, OutboundBudget, RequestContext,
    HANDLER_QUEUE_DEPTH, STREAM_BUFFER_LIMIT,
};
use crate::http::session::{HttpSession, SessionOps};
use crate::http::stats::ServerStats;
use crate::http::{Headers, HttpRequest, Method, ResponseBody, Result};

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// A request whose handler has not finished yet
#[derive(Debug)]
struct InFlight {
    cancel: CancelToken,
    head: bool,
    headers_sent: bool,
    budget: Arc<OutboundBudget>,
    /// Streamed bytes handed to the connection so far
    accepted: u64,
}

/// Serves one HTTP/2 connection
pub struct H2Server<S: SessionOps> {
    session: HttpSession<S>,
    conn: H2Connection,
    config: Arc<ServerConfig>,
    dispatcher: Arc<dyn Dispatcher>,
    stats: Arc<ServerStats>,
    cancel: CancelToken,
    in_flight: HashMap<StreamId, InFlight>,
    tx: SyncSender<HandlerMessage>,
    rx: Receiver<HandlerMessage>,
    last_activity: Instant,
}

impl<S: SessionOps> H2Server<S> {
    pub fn new(
        session: HttpSession<S>,
        config: Arc<ServerConfig>,
        dispatcher: Arc<dyn Dispatcher>,
        stats: Arc<ServerStats>,
        cancel: CancelToken,
    ) -> Self {
        let (tx, rx) = mpsc::sync_channel(HANDLER_QUEUE_DEPTH);
        H2Server {
            session,
            conn: H2Connection::server(&config),
            config,
            dispatcher,
            stats,
            cancel,
            in_flight: HashMap::new(),
            tx,
            rx,
            last_activity: Instant::now(),
        }
    }

    /// Run the connection to completion
    ///
    /// `initial` holds bytes already read while selecting the protocol.
    /// Returns `Ok` after a graceful shutdown by either side.
    pub fn serve(mut self, initial: &[u8]) -> Result<()> {
        let result = self.run(initial);

        for flight in self.in_flight.values() {
            flight.cancel.cancel();
        }
        // GOAWAY queued by a connection error still goes out
        if self.conn.has_output() {
            let output = self.conn.take_output();
            let _ = self.session.write_all(&output);
        }
        let _ = self.session.close();
        debug!(
            pushed_streams = self.conn.pushed_streams(),
            pushed_bytes = self.conn.pushed_bytes(),
            "HTTP/2 connection closed"
        );
        result
    }

    fn run(&mut self, initial: &[u8]) -> Result<()> {
        if !initial.is_empty() {
            self.process(initial)?;
        }
        self.flush()?;

        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            if self.cancel.is_cancelled() && !self.conn.is_going_away() {
                debug!("shutdown requested");
                self.conn.go_away(ErrorCode::NoError, "shutting down");
            }

            if self.session.wait_readable(self.config.poll_interval)? {
                let n = self.session.read(&mut buf)?;
                if n == 0 {
                    debug!("peer closed the connection");
                    return Ok(());
                }
                self.last_activity = Instant::now();
                self.process(&buf[..n])?;
            }

            self.drain_handlers()?;

            let now = Instant::now();
            let events = self.conn.check_timeouts(now)?;
            self.handle_events(events);

            if self.is_idle()
                && !self.conn.is_going_away()
                && now.duration_since(self.last_activity) > self.config.idle_timeout
            {
                debug!("idle timeout");
                self.conn.go_away(ErrorCode::NoError, "idle timeout");
            }

            self.flush()?;

            if self.conn.is_closed() {
                return Ok(());
            }
            if self.conn.is_going_away() && self.is_idle() {
                return Ok(());
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.in_flight.is_empty() && self.conn.active_streams() == 0
    }

    fn flush(&mut self) -> Result<()> {
        if self.conn.has_output() {
            let output = self.conn.take_output();
            self.session.write_all(&output)?;
        }
        self.release_budgets();
        Ok(())
    }

    /// Return credit for streamed bytes that left the stream queues
    fn release_budgets(&mut self) {
        for (&stream_id, flight) in &self.in_flight {
            let unsent = self.conn.queued_data(stream_id) as u64;
            flight.budget.set_written(flight.accepted.saturating_sub(unsent));
        }
    }

    fn process(&mut self, data: &[u8]) -> Result<()> {
        let events = self.conn.receive(data).map_err(|e| {
            warn!(error = %e, code = %e.code(), "HTTP/2 connection error");
            e
        })?;
        self.handle_events(events);
        Ok(())
    }

    fn handle_events(&mut self, events: Vec<ConnectionEvent>) {
        for event in events {
            match event {
                ConnectionEvent::Request(request) => self.start_request(request),
                ConnectionEvent::StreamReset { stream_id, code } => {
                    if let Some(flight) = self.in_flight.remove(&stream_id) {
                        debug!(stream_id, code = %code, "cancelling handler");
                        flight.cancel.cancel();
                    }
                }
                ConnectionEvent::GoAway {
                    last_stream_id,
                    code,
                } => {
                    debug!(last_stream_id, code = %code, "peer sent GOAWAY");
                }
                ConnectionEvent::SettingsAcknowledged => trace!("SETTINGS acknowledged"),
                ConnectionEvent::PingAck(data) => trace!(?data, "PING acknowledged"),
            }
        }
    }

    fn start_request(&mut self, request: HttpRequest) {
        let Some(stream_id) = request.stream_id() else {
            return;
        };
        self.stats.request();
        debug!(stream_id, method = request.method().as_str(), path = request.path(), "request");

        let cancel = self.cancel.child();
        let head = request.method() == Method::Head;
        let ctx = RequestContext::with_pusher(stream_id, cancel.clone(), self.tx.clone());
        let budget = Arc::new(OutboundBudget::new(STREAM_BUFFER_LIMIT));

        match spawn_handler(
            Arc::clone(&self.dispatcher),
            request,
            ctx,
            stream_id,
            self.tx.clone(),
            Some(Arc::clone(&budget)),
        ) {
            Ok(_) => {
                self.in_flight.insert(
                    stream_id,
                    InFlight {
                        cancel,
                        head,
                        headers_sent: false,
                        budget,
                        accepted: 0,
                    },
                );
            }
            Err(e) => {
                warn!(stream_id, error = %e, "failed to start handler");
                let result = self
                    .conn
                    .send_response(stream_id, 500, &Headers::new(), Bytes::new());
                let _ = self.stream_result(stream_id, result);
            }
        }
    }

    fn drain_handlers(&mut self) -> Result<()> {
        loop {
            match self.rx.try_recv() {
                Ok(message) => self.on_handler_message(message)?,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Ok(()),
            }
        }
    }

    fn on_handler_message(&mut self, message: HandlerMessage) -> Result<()> {
        match message {
            HandlerMessage::Response {
                stream_id,
                mut response,
                streaming,
            } => {
                let Some(flight) = self.in_flight.get_mut(&stream_id) else {
                    return Ok(());
                };
                flight.headers_sent = true;
                let head = flight.head;
                let status = response.status().code();

                let result = if streaming && !head {
                    self.conn
                        .send_headers(stream_id, status, response.headers(), false)
                } else {
                    let body = match response.take_body() {
                        ResponseBody::Full(body) if !head && !response.status().forbids_body() => {
                            body
                        }
                        _ => Bytes::new(),
                    };
                    if let Some(flight) = self.in_flight.remove(&stream_id) {
                        // stops a body producer nobody will read
                        flight.cancel.cancel();
                    }
                    self.conn
                        .send_response(stream_id, status, response.headers(), body)
                };
                self.stream_result(stream_id, result)
            }
            HandlerMessage::Data { stream_id, data } => {
                let Some(flight) = self.in_flight.get_mut(&stream_id) else {
                    return Ok(());
                };
                flight.accepted += data.len() as u64;
                let result = self.conn.send_data(stream_id, data, false);
                self.stream_result(stream_id, result)
            }
            HandlerMessage::End { stream_id } => {
                if self.in_flight.remove(&stream_id).is_none() {
                    return Ok(());
                }
                let result = self.conn.send_data(stream_id, Bytes::new(), true);
                self.stream_result(stream_id, result)
            }
            HandlerMessage::Push {
                stream_id,
                resource,
                reply,
            } => {
                let result = match self.conn.push_resource(stream_id, resource) {
                    Ok(promised) => Ok(promised),
                    Err(H2Error::Push(e)) => {
                        warn!(stream_id, error = %e, "push rejected");
                        Err(e)
                    }
                    Err(e) if e.is_connection_error() => {
                        warn!(stream_id, error = %e, "push failed");
                        Err(PushError::GoingAway)
                    }
                    Err(e) => {
                        warn!(stream_id, error = %e, "push failed");
                        Err(PushError::InvalidAssociatedStream(stream_id))
                    }
                };
                // the handler may have given up waiting
                let _ = reply.send(result);
                Ok(())
            }
            HandlerMessage::Failed {
                stream_id,
                panicked,
            } => {
                let Some(flight) = self.in_flight.remove(&stream_id) else {
                    return Ok(());
                };
                debug!(stream_id, panicked, headers_sent = flight.headers_sent, "handler failed");
                if flight.headers_sent {
                    self.conn.reset_stream(stream_id, ErrorCode::InternalError);
                    Ok(())
                } else {
                    let result = self
                        .conn
                        .send_response(stream_id, 500, &Headers::new(), Bytes::new());
                    self.stream_result(stream_id, result)
                }
            }
        }
    }

    /// Errors confined to one stream drop that stream; the rest end the connection
    fn stream_result(&mut self, stream_id: StreamId, result: super::Result<()>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(
                e @ (H2Error::StreamClosed(_)
                | H2Error::StreamNotFound(_)
                | H2Error::Stream { .. }
                | H2Error::SendWindowExceeded { .. }),
            ) => {
                debug!(stream_id, error = %e, "dropping response");
                if let Some(flight) = self.in_flight.remove(&stream_id) {
                    flight.cancel.cancel();
                }
                Ok(())
            }
            Err(H2Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::codec::FrameCodec;
    use crate::http::h2::frames::{Frame, HeadersFrame, SettingsFrame, WindowUpdateFrame};
    use crate::http::h2::hpack::{Decoder, Encoder, HeaderField};
    use crate::http::h2::settings::{Settings, SettingsBuilder};
    use crate::http::h2::CONNECTION_PREFACE;
    use crate::http::session::from_tcp_stream;
    use crate::http::{HttpResponse, RequestContext};
    use bytes::BytesMut;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn start(dispatcher: impl Dispatcher) -> TcpStream {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(dispatcher);

        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let server = H2Server::new(
                from_tcp_stream(stream),
                Arc::new(ServerConfig::default()),
                dispatcher,
                Arc::new(ServerStats::new()),
                CancelToken::new(),
            );
            let _ = server.serve(&[]);
        });

        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }

    fn read_frames_until(
        stream: &mut TcpStream,
        buf: &mut BytesMut,
        mut done: impl FnMut(&Frame) -> bool,
    ) -> Vec<Frame> {
        let codec = FrameCodec::new(crate::http::h2::codec::MAX_FRAME_SIZE);
        let mut frames = Vec::new();
        loop {
            while let Some(frame) = codec.decode(buf).unwrap() {
                let stop = done(&frame);
                frames.push(frame);
                if stop {
                    return frames;
                }
            }
            let mut chunk = [0u8; 4096];
            let n = stream.read(&mut chunk).unwrap();
            assert!(n > 0, "connection closed early");
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    fn handshake(stream: &mut TcpStream) {
        let mut out = BytesMut::new();
        out.extend_from_slice(CONNECTION_PREFACE);
        FrameCodec::encode(&Frame::Settings(SettingsFrame::new(Settings::default())), &mut out);
        stream.write_all(&out).unwrap();
    }

    fn get(stream: &mut TcpStream, encoder: &mut Encoder, stream_id: u32, path: &str) {
        let fields = [
            HeaderField::new(":method", "GET"),
            HeaderField::new(":scheme", "http"),
            HeaderField::new(":path", path),
            HeaderField::new(":authority", "localhost"),
        ];
        let block = encoder.encode_block(&fields);
        let mut out = BytesMut::new();
        FrameCodec::encode(
            &Frame::Headers(HeadersFrame::new(stream_id, block, true, true)),
            &mut out,
        );
        stream.write_all(&out).unwrap();
    }

    fn status_of(decoder: &mut Decoder, frame: &Frame) -> Option<String> {
        match frame {
            Frame::Headers(h) => decoder
                .decode(&h.header_block)
                .unwrap()
                .into_iter()
                .find(|f| f.name == ":status")
                .map(|f| f.value),
            _ => None,
        }
    }

    #[test]
    fn test_serves_get() {
        let mut stream = start(|req: HttpRequest, _ctx: &mut RequestContext| {
            HttpResponse::builder().body(format!("path={}", req.path())).build()
        });
        handshake(&mut stream);
        get(&mut stream, &mut Encoder::default(), 1, "/hello");

        let mut buf = BytesMut::new();
        let frames = read_frames_until(&mut stream, &mut buf, |f| {
            matches!(f, Frame::Data(d) if d.end_stream)
        });

        let mut decoder = Decoder::new(4096, 65536);
        let status = frames.iter().find_map(|f| status_of(&mut decoder, f));
        assert_eq!(status.as_deref(), Some("200"));
        let body: Vec<u8> = frames
            .iter()
            .filter_map(|f| match f {
                Frame::Data(d) => Some(d.data.to_vec()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(body, b"path=/hello");
    }

    #[test]
    fn test_handler_panic_gives_500() {
        let mut stream = start(|_req: HttpRequest, _ctx: &mut RequestContext| -> HttpResponse {
            panic!("handler bug");
        });
        handshake(&mut stream);
        get(&mut stream, &mut Encoder::default(), 1, "/");

        let mut buf = BytesMut::new();
        let frames = read_frames_until(&mut stream, &mut buf, |f| matches!(f, Frame::Headers(_)));
        let mut decoder = Decoder::new(4096, 65536);
        let status = frames.iter().find_map(|f| status_of(&mut decoder, f));
        assert_eq!(status.as_deref(), Some("500"));
    }

    #[test]
    fn test_streaming_handler_blocks_on_zero_window() {
        const CHUNK: usize = 16 * 1024;
        const CHUNKS: usize = 16;
        let produced = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&produced);
        let mut stream = start(move |_req: HttpRequest, _ctx: &mut RequestContext| {
            let counter = Arc::clone(&counter);
            HttpResponse::builder()
                .stream(move |out| {
                    for _ in 0..CHUNKS {
                        out.write_all(&[b'z'; CHUNK])?;
                        counter.fetch_add(CHUNK, Ordering::SeqCst);
                    }
                    Ok(())
                })
                .build()
        });

        let settings = SettingsBuilder::new().initial_window_size(0).build().unwrap();
        let mut out = BytesMut::new();
        out.extend_from_slice(CONNECTION_PREFACE);
        FrameCodec::encode(&Frame::Settings(SettingsFrame::new(settings)), &mut out);
        stream.write_all(&out).unwrap();
        get(&mut stream, &mut Encoder::default(), 1, "/stream");

        let mut buf = BytesMut::new();
        read_frames_until(&mut stream, &mut buf, |f| matches!(f, Frame::Headers(_)));
        thread::sleep(Duration::from_millis(300));
        assert!(produced.load(Ordering::SeqCst) <= STREAM_BUFFER_LIMIT);

        let mut out = BytesMut::new();
        for stream_id in [0, 1] {
            FrameCodec::encode(
                &Frame::WindowUpdate(WindowUpdateFrame::new(stream_id, 1 << 20)),
                &mut out,
            );
        }
        stream.write_all(&out).unwrap();

        let frames = read_frames_until(&mut stream, &mut buf, |f| {
            matches!(f, Frame::Data(d) if d.end_stream)
        });
        let body_len: usize = frames
            .iter()
            .filter_map(|f| match f {
                Frame::Data(d) => Some(d.data.len()),
                _ => None,
            })
            .sum();
        assert_eq!(body_len, CHUNK * CHUNKS);
        assert_eq!(produced.load(Ordering::SeqCst), CHUNK * CHUNKS);
    }

    #[test]
    fn test_streams_are_concurrent() {
        let mut stream = start(|req: HttpRequest, _ctx: &mut RequestContext| {
            if req.path() == "/slow" {
                thread::sleep(Duration::from_millis(300));
            }
            HttpResponse::builder().body(req.path().to_string()).build()
        });
        handshake(&mut stream);
        let mut encoder = Encoder::default();
        get(&mut stream, &mut encoder, 1, "/slow");
        get(&mut stream, &mut encoder, 3, "/fast");

        let mut buf = BytesMut::new();
        let frames = read_frames_until(&mut stream, &mut buf, |f| {
            matches!(f, Frame::Data(d) if d.end_stream)
        });
        let first = frames
            .iter()
            .find_map(|f| match f {
                Frame::Data(d) => Some(d.stream_id),
                _ => None,
            })
            .unwrap();
        assert_eq!(first, 3);
    }
}

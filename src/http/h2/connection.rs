//! HTTP/2 server connection state machine
//!
//! [`H2Connection`] performs no I/O. The driver hands it whatever the
//! transport produced via [`H2Connection::receive`], acts on the returned
//! events and writes [`H2Connection::take_output`] back to the socket. The
//! HPACK contexts, the stream map, the priority tree and every flow-control
//! window are owned here and only ever touched by the connection's thread.
//!
//! Errors come in two scopes. A stream error queues RST_STREAM and shows up
//! as [`ConnectionEvent::StreamReset`]; the connection carries on. A
//! connection error queues GOAWAY and is returned as `Err`, after which the
//! connection accepts nothing more.

use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use super::codec::FrameCodec;
use super::error::{Error, ErrorCode, PushError, Result};
use super::flow_control::FlowControl;
use super::frames::*;
use super::hpack::{Decoder, Encoder, HeaderField};
use super::priority::PriorityTree;
use super::settings::Settings;
use super::stream::{StreamId, StreamManager, StreamState};
use super::{
    CONNECTION_PREFACE, CONNECTION_STREAM_ID, DEFAULT_HEADER_TABLE_SIZE,
    DEFAULT_INITIAL_WINDOW_SIZE,
};
use crate::http::config::ServerConfig;
use crate::http::{Headers, HttpRequest, Method, Version};

/// Pseudo-headers every request block and every pushed request must carry
pub const REQUIRED_PSEUDO_HEADERS: [&str; 4] = [":method", ":scheme", ":path", ":authority"];

/// Hop-by-hop headers that have no meaning in HTTP/2 (RFC 7540 Section 8.1.2.2)
const CONNECTION_HEADERS: [&str; 5] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

/// PING and SETTINGS frames accepted per second before ENHANCE_YOUR_CALM
const MAX_CONTROL_FRAMES_PER_SECOND: u32 = 100;

/// Cap on the encoder table regardless of what the peer offers
const MAX_ENCODER_TABLE_SIZE: usize = 64 * 1024;

/// Something the driver has to act on
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A complete request (headers, body and trailers)
    Request(HttpRequest),
    /// Stream reset by the peer, by a stream error, or by a timeout
    StreamReset { stream_id: StreamId, code: ErrorCode },
    /// Peer is shutting the connection down
    GoAway {
        last_stream_id: StreamId,
        code: ErrorCode,
    },
    /// Peer acknowledged our SETTINGS
    SettingsAcknowledged,
    /// Answer to a PING we sent
    PingAck([u8; 8]),
}

/// A resource to push alongside a response
#[derive(Debug, Clone)]
pub struct PushResource {
    /// Synthetic request, pseudo-headers first
    pub request: Vec<HeaderField>,
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl PushResource {
    /// Synthetic request from explicit header fields
    pub fn new(request: Vec<HeaderField>) -> Self {
        PushResource {
            request,
            status: 200,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// `GET` request for `path` with all four pseudo-headers
    pub fn get(scheme: &str, authority: &str, path: &str) -> Self {
        Self::new(vec![
            HeaderField::new(":method", "GET"),
            HeaderField::new(":scheme", scheme),
            HeaderField::new(":path", path),
            HeaderField::new(":authority", authority),
        ])
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for the 24-byte client preface
    Preface,
    /// Preface seen; the next frame must be SETTINGS
    Settings,
    Open,
    Closed,
}

/// Header block spread over HEADERS and CONTINUATION frames
#[derive(Debug)]
struct PendingBlock {
    stream_id: StreamId,
    end_stream: bool,
    priority: Option<PrioritySpec>,
    fragment: BytesMut,
    started_at: Instant,
}

/// Server side of one HTTP/2 connection
#[derive(Debug)]
pub struct H2Connection {
    phase: Phase,
    codec: FrameCodec,
    recv_buf: BytesMut,
    output: BytesMut,
    encoder: Encoder,
    decoder: Decoder,
    streams: StreamManager,
    priority: PriorityTree,
    /// Connection-level windows
    flow: FlowControl,
    local: Settings,
    remote: Settings,
    /// Our SETTINGS are unacknowledged since then
    settings_sent_at: Option<Instant>,
    pending_block: Option<PendingBlock>,
    /// Oldest moment `recv_buf` has held an incomplete frame
    partial_frame_since: Option<Instant>,
    created_at: Instant,

    max_body_size: usize,
    max_header_list_size: usize,
    request_timeout: Duration,
    header_timeout: Duration,
    enable_push: bool,
    max_pushed_streams: usize,
    max_pushed_resource_size: usize,

    pushed_streams: usize,
    pushed_bytes: u64,
    goaway_sent: Option<StreamId>,
    goaway_received: Option<StreamId>,

    control_window_start: Instant,
    control_frames: u32,
}

impl H2Connection {
    /// New server connection; our SETTINGS are queued right away
    pub fn server(config: &ServerConfig) -> Self {
        let now = Instant::now();
        let local = config.local_settings();

        let mut conn = H2Connection {
            phase: Phase::Preface,
            codec: FrameCodec::new(config.max_frame_size as usize),
            recv_buf: BytesMut::with_capacity(16 * 1024),
            output: BytesMut::with_capacity(16 * 1024),
            encoder: Encoder::default(),
            // until our SETTINGS are acknowledged the peer may use the default size
            decoder: Decoder::new(
                config.header_table_size.max(DEFAULT_HEADER_TABLE_SIZE) as usize,
                config.max_header_list_size as usize,
            ),
            streams: StreamManager::new(),
            priority: PriorityTree::default(),
            flow: FlowControl::connection(),
            local: local.clone(),
            remote: Settings::default(),
            settings_sent_at: Some(now),
            pending_block: None,
            partial_frame_since: None,
            created_at: now,
            max_body_size: config.max_body_size,
            max_header_list_size: config.max_header_list_size as usize,
            request_timeout: config.request_timeout,
            header_timeout: config.header_timeout,
            enable_push: config.enable_push,
            max_pushed_streams: config.max_pushed_streams,
            max_pushed_resource_size: config.max_pushed_resource_size,
            pushed_streams: 0,
            pushed_bytes: 0,
            goaway_sent: None,
            goaway_received: None,
            control_window_start: now,
            control_frames: 0,
        };

        conn.write_frame(&Frame::Settings(SettingsFrame::new(local)));

        // the connection window is not covered by SETTINGS; widen it explicitly
        if config.initial_window_size > DEFAULT_INITIAL_WINDOW_SIZE {
            let increment = config.initial_window_size - DEFAULT_INITIAL_WINDOW_SIZE;
            if conn.flow.recv.update_initial_size(config.initial_window_size).is_ok() {
                conn.write_frame(&Frame::WindowUpdate(WindowUpdateFrame::new(
                    CONNECTION_STREAM_ID,
                    increment,
                )));
            }
        }
        conn
    }

    /// Feed bytes read from the transport
    pub fn receive(&mut self, data: &[u8]) -> Result<Vec<ConnectionEvent>> {
        if self.phase == Phase::Closed {
            return Err(Error::ConnectionClosed);
        }
        self.recv_buf.extend_from_slice(data);
        let mut events = Vec::new();

        if self.phase == Phase::Preface {
            let n = self.recv_buf.len().min(CONNECTION_PREFACE.len());
            if self.recv_buf[..n] != CONNECTION_PREFACE[..n] {
                return Err(self.fail(Error::MissingPreface));
            }
            if n < CONNECTION_PREFACE.len() {
                return Ok(events);
            }
            self.recv_buf.advance(CONNECTION_PREFACE.len());
            self.phase = Phase::Settings;
            debug!("client preface received");
        }

        let mut decoded = false;
        while self.phase != Phase::Closed {
            let frame = match self.codec.decode(&mut self.recv_buf) {
                Ok(Some(frame)) => {
                    decoded = true;
                    frame
                }
                Ok(None) => break,
                Err(e) => {
                    self.handle_error(e, &mut events)?;
                    continue;
                }
            };
            trace!(frame = frame.name(), stream_id = frame.stream_id(), "recv");

            if let Err(e) = self.handle_frame(frame, &mut events) {
                self.handle_error(e, &mut events)?;
            }
        }

        self.track_partial_frame(decoded);

        if let Err(e) = self.flush_data() {
            return Err(self.fail(e));
        }
        Ok(events)
    }

    /// A frame that keeps arriving in pieces runs one clock; it restarts
    /// whenever a whole frame gets through.
    fn track_partial_frame(&mut self, decoded: bool) {
        if self.recv_buf.is_empty() || self.phase == Phase::Closed {
            self.partial_frame_since = None;
        } else if decoded || self.partial_frame_since.is_none() {
            self.partial_frame_since = Some(Instant::now());
        }
    }

    /// Bytes to write to the transport, in order
    pub fn take_output(&mut self) -> Bytes {
        self.output.split().freeze()
    }

    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// GOAWAY went out or came in
    pub fn is_going_away(&self) -> bool {
        self.goaway_sent.is_some() || self.goaway_received.is_some()
    }

    /// Streams that are not closed yet
    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn stream_state(&self, stream_id: StreamId) -> Option<StreamState> {
        self.streams.get(stream_id).map(|s| s.state())
    }

    pub fn stream_send_window(&self, stream_id: StreamId) -> Option<i64> {
        self.streams.get(stream_id).map(|s| s.flow.send.size())
    }

    /// DATA accepted by [`send_data`](Self::send_data) that is still waiting
    /// for window; 0 once the stream is gone
    pub fn queued_data(&self, stream_id: StreamId) -> usize {
        self.streams.get(stream_id).map_or(0, |s| s.queued_len())
    }

    pub fn connection_send_window(&self) -> i64 {
        self.flow.send.size()
    }

    pub fn remote_settings(&self) -> &Settings {
        &self.remote
    }

    /// Streams pushed over the connection's lifetime
    pub fn pushed_streams(&self) -> usize {
        self.pushed_streams
    }

    /// Body bytes pushed over the connection's lifetime
    pub fn pushed_bytes(&self) -> u64 {
        self.pushed_bytes
    }

    fn write_frame(&mut self, frame: &Frame) {
        trace!(frame = frame.name(), stream_id = frame.stream_id(), "send");
        FrameCodec::encode(frame, &mut self.output);
    }

    /// Route an error by scope; connection errors are returned
    fn handle_error(&mut self, err: Error, events: &mut Vec<ConnectionEvent>) -> Result<()> {
        match err.stream_id() {
            Some(stream_id) => {
                let code = err.code();
                warn!(stream_id, code = %code, error = %err, "stream error");
                self.reset_stream(stream_id, code);
                events.push(ConnectionEvent::StreamReset { stream_id, code });
                Ok(())
            }
            None => Err(self.fail(err)),
        }
    }

    /// Queue GOAWAY for a connection error and stop accepting input
    fn fail(&mut self, err: Error) -> Error {
        if self.phase != Phase::Closed {
            let code = err.code();
            warn!(code = %code, error = %err, "connection error");
            let last = self.streams.last_client_id();
            self.goaway_sent = Some(last);
            self.write_frame(&Frame::Goaway(GoawayFrame::new(
                last,
                code,
                Bytes::from(err.to_string()),
            )));
            self.phase = Phase::Closed;
        }
        err
    }

    fn handle_frame(&mut self, frame: Frame, events: &mut Vec<ConnectionEvent>) -> Result<()> {
        if self.phase == Phase::Settings {
            match &frame {
                Frame::Settings(f) if !f.ack => self.phase = Phase::Open,
                _ => return Err(Error::protocol("first frame after preface must be SETTINGS")),
            }
        }

        if let Some(pending) = &self.pending_block {
            let continues = matches!(&frame, Frame::Continuation(f) if f.stream_id == pending.stream_id);
            if !continues {
                return Err(Error::protocol(format!(
                    "{} while header block on stream {} is incomplete",
                    frame.name(),
                    pending.stream_id
                )));
            }
        }

        match frame {
            Frame::Data(f) => self.on_data(f, events),
            Frame::Headers(f) => self.on_headers(f, events),
            Frame::Continuation(f) => self.on_continuation(f, events),
            Frame::Priority(f) => self.priority.reprioritize(f.stream_id, f.priority),
            Frame::RstStream(f) => self.on_rst_stream(f, events),
            Frame::Settings(f) => self.on_settings(f, events),
            Frame::PushPromise(_) => Err(Error::protocol("PUSH_PROMISE sent by client")),
            Frame::Ping(f) => self.on_ping(f, events),
            Frame::Goaway(f) => {
                self.on_goaway(f, events);
                Ok(())
            }
            Frame::WindowUpdate(f) => self.on_window_update(f),
            Frame::Unknown { kind, stream_id } => {
                trace!(kind, stream_id, "ignoring unknown frame type");
                Ok(())
            }
        }
    }

    fn on_headers(&mut self, frame: HeadersFrame, events: &mut Vec<ConnectionEvent>) -> Result<()> {
        let block = PendingBlock {
            stream_id: frame.stream_id,
            end_stream: frame.end_stream,
            priority: frame.priority,
            fragment: BytesMut::from(&frame.header_block[..]),
            started_at: Instant::now(),
        };
        if frame.end_headers {
            self.on_header_block(block, events)
        } else {
            self.pending_block = Some(block);
            Ok(())
        }
    }

    fn on_continuation(
        &mut self,
        frame: ContinuationFrame,
        events: &mut Vec<ConnectionEvent>,
    ) -> Result<()> {
        let mut block = self
            .pending_block
            .take()
            .ok_or_else(|| Error::protocol("CONTINUATION without preceding HEADERS"))?;

        block.fragment.extend_from_slice(&frame.header_block);
        if block.fragment.len() > self.max_header_list_size {
            return Err(Error::EnhanceYourCalm(format!(
                "header block of {} bytes on stream {} exceeds {}",
                block.fragment.len(),
                block.stream_id,
                self.max_header_list_size
            )));
        }

        if frame.end_headers {
            self.on_header_block(block, events)
        } else {
            self.pending_block = Some(block);
            Ok(())
        }
    }

    fn on_header_block(&mut self, block: PendingBlock, events: &mut Vec<ConnectionEvent>) -> Result<()> {
        let stream_id = block.stream_id;
        // decode even for streams we refuse; the HPACK context must see every block
        let fields = self.decoder.decode(&block.fragment)?;

        if self.streams.contains(stream_id) {
            return self.on_trailers(stream_id, fields, block.end_stream, events);
        }

        if let Some(last) = self.goaway_sent {
            if stream_id > last {
                trace!(stream_id, "ignoring new stream after GOAWAY");
                return Ok(());
            }
        }

        let active = self.streams.active_client_streams();
        let send_window = self.remote.get_initial_window_size();
        let recv_window = self.local.get_initial_window_size();
        self.streams.open_client(stream_id, send_window, recv_window)?;

        let limit = self.local.get_max_concurrent_streams().unwrap_or(u32::MAX);
        if active >= limit as usize {
            return Err(Error::stream(
                stream_id,
                ErrorCode::RefusedStream,
                format!("concurrent stream limit of {} reached", limit),
            ));
        }

        self.priority
            .register(stream_id, block.priority.unwrap_or_default())?;

        validate_request_headers(&fields)
            .map_err(|reason| Error::stream(stream_id, ErrorCode::ProtocolError, reason))?;
        let content_length = content_length(&fields)
            .map_err(|reason| Error::stream(stream_id, ErrorCode::ProtocolError, reason))?;

        let stream = self
            .streams
            .get_mut(stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?;
        stream.recv_headers(block.end_stream)?;
        stream.content_length = content_length;
        stream.headers = fields;
        debug!(stream_id, "stream opened");

        if block.end_stream {
            self.complete_request(stream_id, events)?;
        }
        Ok(())
    }

    fn on_trailers(
        &mut self,
        stream_id: StreamId,
        fields: Vec<HeaderField>,
        end_stream: bool,
        events: &mut Vec<ConnectionEvent>,
    ) -> Result<()> {
        let stream = self
            .streams
            .get_mut(stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?;
        stream.recv_headers(end_stream)?;

        if fields.iter().any(HeaderField::is_pseudo) {
            return Err(Error::stream(
                stream_id,
                ErrorCode::ProtocolError,
                "pseudo-header in trailers",
            ));
        }
        stream.trailers = fields;
        self.complete_request(stream_id, events)
    }

    /// The peer finished sending; hand the request to the driver
    fn complete_request(&mut self, stream_id: StreamId, events: &mut Vec<ConnectionEvent>) -> Result<()> {
        let stream = self
            .streams
            .get_mut(stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?;

        if let Some(expected) = stream.content_length {
            if expected != stream.received {
                return Err(Error::stream(
                    stream_id,
                    ErrorCode::ProtocolError,
                    format!(
                        "content-length {} but {} bytes of DATA",
                        expected, stream.received
                    ),
                ));
            }
        }

        let headers = std::mem::take(&mut stream.headers);
        let trailers = std::mem::take(&mut stream.trailers);
        let body = stream.body.split().to_vec();
        let request = build_request(stream_id, headers, trailers, body)?;
        events.push(ConnectionEvent::Request(request));
        Ok(())
    }

    fn on_data(&mut self, frame: DataFrame, events: &mut Vec<ConnectionEvent>) -> Result<()> {
        let stream_id = frame.stream_id;
        let size = frame.frame_size();

        // counts against the connection even if the stream is gone
        self.flow.recv.consume_recv(size)?;
        if let Some(increment) = self.flow.replenish()? {
            self.write_frame(&Frame::WindowUpdate(WindowUpdateFrame::new(
                CONNECTION_STREAM_ID,
                increment,
            )));
        }

        if !self.streams.contains(stream_id) {
            return Err(if self.streams.was_closed(stream_id) {
                Error::stream(stream_id, ErrorCode::StreamClosed, "DATA on closed stream")
            } else {
                Error::protocol(format!("DATA on idle stream {}", stream_id))
            });
        }
        let stream = self
            .streams
            .get_mut(stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?;

        stream.flow.recv.consume_recv(size)?;
        stream.recv_data(frame.end_stream)?;
        stream.received += frame.data.len() as u64;

        if stream.received > self.max_body_size as u64 {
            return Err(Error::stream(
                stream_id,
                ErrorCode::Cancel,
                format!("request body exceeds {} bytes", self.max_body_size),
            ));
        }
        if let Some(expected) = stream.content_length {
            if stream.received > expected {
                return Err(Error::stream(
                    stream_id,
                    ErrorCode::ProtocolError,
                    format!("DATA exceeds content-length {}", expected),
                ));
            }
        }
        stream.body.extend_from_slice(&frame.data);

        if frame.end_stream {
            return self.complete_request(stream_id, events);
        }

        if let Some(increment) = stream.flow.replenish()? {
            self.write_frame(&Frame::WindowUpdate(WindowUpdateFrame::new(
                stream_id, increment,
            )));
        }
        Ok(())
    }

    fn on_rst_stream(&mut self, frame: RstStreamFrame, events: &mut Vec<ConnectionEvent>) -> Result<()> {
        let stream_id = frame.stream_id;
        if !self.streams.contains(stream_id) && !self.streams.was_closed(stream_id) {
            return Err(Error::protocol(format!(
                "RST_STREAM on idle stream {}",
                stream_id
            )));
        }

        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.reset();
        }
        self.close_stream(stream_id);
        debug!(stream_id, code = %frame.error_code, "stream reset by peer");
        events.push(ConnectionEvent::StreamReset {
            stream_id,
            code: frame.error_code,
        });
        Ok(())
    }

    fn on_settings(&mut self, frame: SettingsFrame, events: &mut Vec<ConnectionEvent>) -> Result<()> {
        if frame.ack {
            if self.settings_sent_at.take().is_some() {
                self.decoder
                    .set_max_table_size(self.local.get_header_table_size() as usize);
                events.push(ConnectionEvent::SettingsAcknowledged);
            } else {
                trace!("unsolicited SETTINGS ACK");
            }
            return Ok(());
        }

        self.check_control_rate()?;
        self.apply_remote_settings(&frame.settings)?;
        self.write_frame(&Frame::Settings(SettingsFrame::ack()));
        Ok(())
    }

    fn apply_remote_settings(&mut self, settings: &Settings) -> Result<()> {
        if let Some(size) = settings.initial_window_size {
            for stream in self.streams.iter_mut() {
                stream.flow.send.update_initial_size(size)?;
            }
        }
        if let Some(size) = settings.header_table_size {
            self.encoder
                .set_max_table_size((size as usize).min(MAX_ENCODER_TABLE_SIZE));
        }
        self.remote.merge(settings);
        debug!(settings = ?self.remote, "peer settings applied");
        Ok(())
    }

    fn on_ping(&mut self, frame: PingFrame, events: &mut Vec<ConnectionEvent>) -> Result<()> {
        if frame.ack {
            events.push(ConnectionEvent::PingAck(frame.data));
            return Ok(());
        }
        self.check_control_rate()?;
        self.write_frame(&Frame::Ping(PingFrame::ack(frame.data)));
        Ok(())
    }

    fn on_goaway(&mut self, frame: GoawayFrame, events: &mut Vec<ConnectionEvent>) {
        self.goaway_received = Some(frame.last_stream_id);
        if frame.error_code == ErrorCode::NoError {
            debug!(last_stream_id = frame.last_stream_id, "GOAWAY received");
        } else {
            warn!(
                last_stream_id = frame.last_stream_id,
                code = %frame.error_code,
                debug = %String::from_utf8_lossy(&frame.debug_data),
                "GOAWAY received"
            );
        }
        events.push(ConnectionEvent::GoAway {
            last_stream_id: frame.last_stream_id,
            code: frame.error_code,
        });
    }

    fn on_window_update(&mut self, frame: WindowUpdateFrame) -> Result<()> {
        let stream_id = frame.stream_id;
        if stream_id == CONNECTION_STREAM_ID {
            self.flow.send.increase(frame.size_increment)?;
            return Ok(());
        }

        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.flow.send.increase(frame.size_increment)?;
        } else if !self.streams.was_closed(stream_id) {
            return Err(Error::protocol(format!(
                "WINDOW_UPDATE on idle stream {}",
                stream_id
            )));
        }
        // a closed stream may cross our END_STREAM or RST_STREAM on the wire
        Ok(())
    }

    fn check_control_rate(&mut self) -> Result<()> {
        let now = Instant::now();
        if now.duration_since(self.control_window_start) >= Duration::from_secs(1) {
            self.control_window_start = now;
            self.control_frames = 1;
            return Ok(());
        }

        self.control_frames += 1;
        if self.control_frames > MAX_CONTROL_FRAMES_PER_SECOND {
            warn!(
                count = self.control_frames,
                limit = MAX_CONTROL_FRAMES_PER_SECOND,
                "control frame flood"
            );
            return Err(Error::EnhanceYourCalm(
                "control frame rate limit exceeded".to_string(),
            ));
        }
        Ok(())
    }

    /// Send response HEADERS on a stream
    pub fn send_headers(
        &mut self,
        stream_id: StreamId,
        status: u16,
        headers: &Headers,
        end_stream: bool,
    ) -> Result<()> {
        if self.phase == Phase::Closed {
            return Err(Error::ConnectionClosed);
        }
        let stream = self
            .streams
            .get_mut(stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?;
        stream.send_headers(end_stream)?;

        let fields = response_fields(status, headers);
        let block = self.encoder.encode_block(&fields);
        self.write_header_block(stream_id, block, end_stream, None);

        if end_stream {
            self.close_if_done(stream_id);
        }
        Ok(())
    }

    /// Queue DATA; it goes out as windows and priorities allow
    pub fn send_data(&mut self, stream_id: StreamId, data: Bytes, end_stream: bool) -> Result<()> {
        if self.phase == Phase::Closed {
            return Err(Error::ConnectionClosed);
        }
        let stream = self
            .streams
            .get_mut(stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?;
        if !stream.response_started {
            return Err(Error::Internal(format!(
                "DATA before HEADERS on stream {}",
                stream_id
            )));
        }
        if !stream.state().can_send() || stream.end_pending {
            return Err(Error::StreamClosed(stream_id));
        }

        if !data.is_empty() {
            stream.outbound.push(data);
        }
        stream.end_pending = end_stream;
        self.flush_data()
    }

    /// Complete response; the body is queued behind the HEADERS
    pub fn send_response(
        &mut self,
        stream_id: StreamId,
        status: u16,
        headers: &Headers,
        body: Bytes,
    ) -> Result<()> {
        let end_stream = body.is_empty();
        self.send_headers(stream_id, status, headers, end_stream)?;
        if !end_stream {
            self.send_data(stream_id, body, true)?;
        }
        Ok(())
    }

    /// Write DATA immediately, bypassing the scheduler
    ///
    /// The whole payload must fit in both the stream and the connection send
    /// window; otherwise nothing is written and `SendWindowExceeded` names
    /// the window that was short. Payloads above the peer's frame size are
    /// split over several frames.
    pub fn write_data_frame(&mut self, stream_id: StreamId, data: Bytes, end_stream: bool) -> Result<()> {
        if self.phase == Phase::Closed {
            return Err(Error::ConnectionClosed);
        }
        let len = data.len();
        let max_frame = self.remote.get_max_frame_size() as usize;

        let stream = self
            .streams
            .get_mut(stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?;
        if !stream.state().can_send() || stream.has_pending_output() {
            return Err(Error::StreamClosed(stream_id));
        }
        if !stream.flow.send.can_send(len) {
            return Err(Error::SendWindowExceeded {
                stream_id,
                requested: len,
                available: stream.flow.send.size(),
            });
        }
        if !self.flow.send.can_send(len) {
            return Err(Error::SendWindowExceeded {
                stream_id: CONNECTION_STREAM_ID,
                requested: len,
                available: self.flow.send.size(),
            });
        }

        stream.flow.send.reserve(len)?;
        stream.send_data(end_stream)?;
        self.flow.send.reserve(len)?;

        let mut rest = data;
        loop {
            let chunk = rest.split_to(rest.len().min(max_frame));
            let last = rest.is_empty();
            self.write_frame(&Frame::Data(DataFrame::new(
                stream_id,
                chunk,
                end_stream && last,
            )));
            if last {
                break;
            }
        }

        if end_stream {
            self.close_if_done(stream_id);
        }
        Ok(())
    }

    /// Push a resource on behalf of a client stream
    ///
    /// Checks run in a fixed order and the first failure is reported:
    /// push disabled, missing pseudo-header, unsafe method, pushed-stream
    /// limit, resource size, and the new stream's flow-control window. On
    /// success the PUSH_PROMISE goes out on `associated` and the response
    /// follows on the returned even stream id.
    pub fn push_resource(&mut self, associated: StreamId, resource: PushResource) -> Result<StreamId> {
        if self.phase == Phase::Closed || self.is_going_away() {
            return Err(PushError::GoingAway.into());
        }
        if !self.enable_push || !self.remote.get_enable_push() {
            return Err(PushError::Disabled.into());
        }

        for name in REQUIRED_PSEUDO_HEADERS {
            if !resource.request.iter().any(|f| f.name == name) {
                return Err(PushError::MissingPseudoHeader(name).into());
            }
        }
        let method = resource
            .request
            .iter()
            .find(|f| f.name == ":method")
            .map(|f| f.value.as_str())
            .unwrap_or_default();
        if !Method::from_str(method).map_or(false, |m| m.is_cacheable()) {
            return Err(PushError::UnsafeMethod(method.to_string()).into());
        }

        if self.pushed_streams >= self.max_pushed_streams {
            return Err(PushError::TooManyPushedStreams {
                limit: self.max_pushed_streams,
            }
            .into());
        }

        let size = resource.body.len();
        if size > self.max_pushed_resource_size {
            return Err(PushError::ResourceTooLarge {
                size,
                limit: self.max_pushed_resource_size,
            }
            .into());
        }

        let send_window = self.remote.get_initial_window_size();
        if size as i64 > i64::from(send_window) {
            return Err(PushError::FlowControlWindowExceeded {
                size,
                window: i64::from(send_window),
            }
            .into());
        }

        match self.streams.get(associated) {
            Some(s)
                if !s.is_pushed()
                    && matches!(s.state(), StreamState::Open | StreamState::HalfClosedRemote) => {}
            _ => return Err(PushError::InvalidAssociatedStream(associated).into()),
        }
        if let Some(limit) = self.remote.get_max_concurrent_streams() {
            if self.streams.active_pushed_streams() >= limit as usize {
                return Err(PushError::ConcurrencyLimit { limit }.into());
            }
        }

        let recv_window = self.local.get_initial_window_size();
        let promised = {
            let stream = self.streams.open_pushed(send_window, recv_window)?;
            stream.reserve_local()?;
            stream.id()
        };

        let block = self.encoder.encode_block(&resource.request);
        self.write_header_block(associated, block, false, Some(promised));
        self.priority
            .register(promised, PrioritySpec::new(associated, false, DEFAULT_WEIGHT))?;
        self.pushed_streams += 1;
        self.pushed_bytes += size as u64;
        debug!(
            associated,
            promised,
            path = resource.request.iter().find(|f| f.name == ":path").map(|f| f.value.as_str()),
            size,
            "resource pushed"
        );

        self.send_response(promised, resource.status, &resource.headers, resource.body)?;
        Ok(promised)
    }

    /// Reset a stream with RST_STREAM
    pub fn reset_stream(&mut self, stream_id: StreamId, code: ErrorCode) {
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.reset();
        }
        self.close_stream(stream_id);
        self.write_frame(&Frame::RstStream(RstStreamFrame {
            stream_id,
            error_code: code,
        }));
    }

    /// Announce shutdown; streams above the last client id are not processed
    pub fn go_away(&mut self, code: ErrorCode, debug_data: &str) {
        if self.phase == Phase::Closed {
            return;
        }
        let last = self.streams.last_client_id();
        self.goaway_sent = Some(last);
        self.write_frame(&Frame::Goaway(GoawayFrame::new(
            last,
            code,
            Bytes::copy_from_slice(debug_data.as_bytes()),
        )));
        if code != ErrorCode::NoError {
            self.phase = Phase::Closed;
        }
    }

    /// Send a PING; the answer arrives as [`ConnectionEvent::PingAck`]
    pub fn ping(&mut self, data: [u8; 8]) {
        self.write_frame(&Frame::Ping(PingFrame::new(data)));
    }

    /// Enforce the handshake, header and per-stream request deadlines
    ///
    /// Expired streams are reset with CANCEL. A missing preface or SETTINGS
    /// ACK past the header timeout is a connection error, and so is a header
    /// block or frame left unfinished for that long.
    pub fn check_timeouts(&mut self, now: Instant) -> Result<Vec<ConnectionEvent>> {
        if self.phase == Phase::Closed {
            return Ok(Vec::new());
        }

        let handshake_done = matches!(self.phase, Phase::Open);
        if !handshake_done && now.duration_since(self.created_at) > self.header_timeout {
            return Err(self.fail(Error::Timeout));
        }
        if let Some(sent) = self.settings_sent_at {
            if now.duration_since(sent) > self.header_timeout {
                return Err(self.fail(Error::SettingsTimeout));
            }
        }
        if let Some(block) = &self.pending_block {
            if now.duration_since(block.started_at) > self.header_timeout {
                let stream_id = block.stream_id;
                warn!(stream_id, "header block not completed in time");
                return Err(self.fail(Error::EnhanceYourCalm(format!(
                    "header block on stream {} not completed in time",
                    stream_id
                ))));
            }
        }
        if let Some(since) = self.partial_frame_since {
            if now.duration_since(since) > self.header_timeout {
                warn!(buffered = self.recv_buf.len(), "frame not completed in time");
                return Err(self.fail(Error::EnhanceYourCalm(
                    "frame not completed in time".to_string(),
                )));
            }
        }

        let expired: Vec<StreamId> = self
            .streams
            .iter()
            .filter(|s| now.duration_since(s.opened_at) > self.request_timeout)
            .map(|s| s.id())
            .collect();

        let mut events = Vec::with_capacity(expired.len());
        for stream_id in expired {
            warn!(stream_id, "request timeout");
            self.reset_stream(stream_id, ErrorCode::Cancel);
            events.push(ConnectionEvent::StreamReset {
                stream_id,
                code: ErrorCode::Cancel,
            });
        }
        Ok(events)
    }

    /// Emit a header block as HEADERS or PUSH_PROMISE plus CONTINUATION frames
    fn write_header_block(
        &mut self,
        stream_id: StreamId,
        mut block: Bytes,
        end_stream: bool,
        promised: Option<StreamId>,
    ) {
        let max_frame = self.remote.get_max_frame_size() as usize;
        // PUSH_PROMISE spends 4 bytes of its payload on the promised id
        let first_max = if promised.is_some() { max_frame - 4 } else { max_frame };

        let first = block.split_to(block.len().min(first_max));
        let end_headers = block.is_empty();
        match promised {
            Some(promised_stream_id) => {
                self.write_frame(&Frame::PushPromise(PushPromiseFrame {
                    stream_id,
                    promised_stream_id,
                    header_block: first,
                    end_headers,
                    padding: None,
                }))
            }
            None => self.write_frame(&Frame::Headers(HeadersFrame::new(
                stream_id, first, end_stream, end_headers,
            ))),
        }

        while !block.is_empty() {
            let fragment = block.split_to(block.len().min(max_frame));
            self.write_frame(&Frame::Continuation(ContinuationFrame {
                stream_id,
                header_block: fragment,
                end_headers: block.is_empty(),
            }));
        }
    }

    /// Move queued DATA onto the wire in priority order, within the windows
    fn flush_data(&mut self) -> Result<()> {
        let max_frame = self.remote.get_max_frame_size() as usize;
        loop {
            let conn_available = self.flow.send.available();
            let streams = &self.streams;
            let next = self.priority.next(|id| {
                streams.get(id).map_or(false, |s| {
                    s.has_pending_output()
                        && (s.outbound.is_empty()
                            || (conn_available > 0 && s.flow.send.available() > 0))
                })
            });
            let stream_id = match next {
                Some(id) => id,
                None => break,
            };

            let stream = self
                .streams
                .get_mut(stream_id)
                .ok_or(Error::StreamNotFound(stream_id))?;
            let allowed = conn_available
                .min(stream.flow.send.available())
                .min(max_frame);

            let chunk = match stream.outbound.first_mut() {
                Some(front) if front.len() <= allowed => stream.outbound.remove(0),
                Some(front) => front.split_to(allowed),
                None => Bytes::new(),
            };
            let end_stream = stream.outbound.is_empty() && stream.end_pending;
            stream.flow.send.reserve(chunk.len())?;
            stream.send_data(end_stream)?;
            if end_stream {
                stream.end_pending = false;
            }
            self.flow.send.reserve(chunk.len())?;

            self.write_frame(&Frame::Data(DataFrame::new(stream_id, chunk, end_stream)));
            if end_stream {
                self.close_if_done(stream_id);
            }
        }
        Ok(())
    }

    fn close_if_done(&mut self, stream_id: StreamId) {
        if self
            .streams
            .get(stream_id)
            .map_or(false, |s| s.state().is_closed())
        {
            self.close_stream(stream_id);
        }
    }

    fn close_stream(&mut self, stream_id: StreamId) {
        if self.streams.remove(stream_id).is_some() {
            trace!(stream_id, "stream closed");
        }
        self.priority.remove(stream_id);
    }
}

/// Request header checks of RFC 7540 Section 8.1.2
fn validate_request_headers(fields: &[HeaderField]) -> std::result::Result<(), String> {
    let mut seen = [false; REQUIRED_PSEUDO_HEADERS.len()];
    let mut seen_regular = false;

    for field in fields {
        if field.name.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(format!("upper-case header name {:?}", field.name));
        }

        if field.is_pseudo() {
            if seen_regular {
                return Err(format!("{} after regular header", field.name));
            }
            let slot = REQUIRED_PSEUDO_HEADERS
                .iter()
                .position(|&name| name == field.name)
                .ok_or_else(|| format!("unknown pseudo-header {}", field.name))?;
            if seen[slot] {
                return Err(format!("duplicate {}", field.name));
            }
            if field.name == ":path" && field.value.is_empty() {
                return Err("empty :path".to_string());
            }
            seen[slot] = true;
        } else {
            seen_regular = true;
            if CONNECTION_HEADERS.contains(&field.name.as_str()) {
                return Err(format!("connection-specific header {}", field.name));
            }
            if field.name == "te" && field.value != "trailers" {
                return Err(format!("te: {} is not allowed", field.value));
            }
        }
    }

    match seen.iter().position(|present| !present) {
        Some(missing) => Err(format!(
            "missing pseudo-header {}",
            REQUIRED_PSEUDO_HEADERS[missing]
        )),
        None => Ok(()),
    }
}

/// Declared content-length; repeated values must agree
fn content_length(fields: &[HeaderField]) -> std::result::Result<Option<u64>, String> {
    let mut declared = None;
    for field in fields.iter().filter(|f| f.name == "content-length") {
        let value: u64 = field
            .value
            .trim()
            .parse()
            .map_err(|_| format!("invalid content-length {:?}", field.value))?;
        match declared {
            Some(previous) if previous != value => {
                return Err("conflicting content-length values".to_string())
            }
            _ => declared = Some(value),
        }
    }
    Ok(declared)
}

fn build_request(
    stream_id: StreamId,
    fields: Vec<HeaderField>,
    trailer_fields: Vec<HeaderField>,
    body: Vec<u8>,
) -> Result<HttpRequest> {
    let mut builder = HttpRequest::builder()
        .version(Version::H2)
        .stream_id(stream_id)
        .body(body);
    let mut headers = Headers::new();
    let mut cookies: Vec<String> = Vec::new();

    for field in fields {
        match field.name.as_str() {
            ":method" => {
                let method = Method::from_str(&field.value).map_err(|_| {
                    Error::stream(
                        stream_id,
                        ErrorCode::ProtocolError,
                        format!("unsupported method {}", field.value),
                    )
                })?;
                builder = builder.method(method);
            }
            ":path" => builder = builder.uri(field.value),
            ":scheme" => builder = builder.scheme(field.value),
            ":authority" => builder = builder.authority(field.value),
            // crumbs are rejoined for HTTP/1.1-style consumers (RFC 7540 Section 8.1.2.5)
            "cookie" => cookies.push(field.value),
            _ => headers.insert(field.name, field.value),
        }
    }
    if !cookies.is_empty() {
        headers.insert("cookie", cookies.join("; "));
    }

    let trailers: Headers = trailer_fields
        .into_iter()
        .map(|f| (f.name, f.value))
        .collect();
    Ok(builder.headers(headers).trailers(trailers).build())
}

/// `:status` plus the response headers, lower-cased, hop-by-hop ones dropped
fn response_fields(status: u16, headers: &Headers) -> Vec<HeaderField> {
    let mut fields = Vec::with_capacity(headers.len() + 1);
    fields.push(HeaderField::new(":status", status.to_string()));
    for (name, value) in headers.iter() {
        let name = name.to_ascii_lowercase();
        if CONNECTION_HEADERS.contains(&name.as_str()) {
            continue;
        }
        fields.push(HeaderField::new(name, value));
    }
    fields
}

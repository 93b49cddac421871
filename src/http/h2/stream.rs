//! HTTP/2 stream state (RFC 7540 Section 5.1)
//!
//! Streams are tracked from the server's point of view: client streams are
//! odd and arrive via HEADERS, pushed streams are even and start in
//! `ReservedLocal`. Closed streams are dropped from the map; the manager
//! remembers the highest id per initiator so a frame for a forgotten stream
//! can still be told apart from one for a stream that never existed.

use std::collections::HashMap;
use std::time::Instant;

use bytes::{Bytes, BytesMut};

use super::error::{Error, ErrorCode, Result};
use super::flow_control::FlowControl;
use super::hpack::HeaderField;

/// Stream ID type
pub type StreamId = u32;

/// Stream state as defined in RFC 7540 Section 5.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    /// PUSH_PROMISE sent
    ReservedLocal,
    /// PUSH_PROMISE received
    ReservedRemote,
    Open,
    /// We sent END_STREAM
    HalfClosedLocal,
    /// Peer sent END_STREAM
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    /// Whether we may still send frames
    pub fn can_send(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Whether the peer may still send frames
    pub fn can_receive(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }

    /// Counted against SETTINGS_MAX_CONCURRENT_STREAMS
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            StreamState::Open | StreamState::HalfClosedLocal | StreamState::HalfClosedRemote
        )
    }
}

/// HTTP/2 stream
#[derive(Debug)]
pub struct H2Stream {
    id: StreamId,
    state: StreamState,
    pub flow: FlowControl,
    /// Decoded request headers, kept until the request is complete
    pub headers: Vec<HeaderField>,
    pub trailers: Vec<HeaderField>,
    pub body: BytesMut,
    /// Declared content-length, checked against the DATA received
    pub content_length: Option<u64>,
    pub received: u64,
    /// Outbound DATA waiting for window and scheduling
    pub outbound: Vec<Bytes>,
    /// Send END_STREAM once `outbound` drains
    pub end_pending: bool,
    /// Response HEADERS have been sent
    pub response_started: bool,
    pub opened_at: Instant,
}

impl H2Stream {
    pub fn new(id: StreamId, send_window: u32, recv_window: u32) -> Self {
        H2Stream {
            id,
            state: StreamState::Idle,
            flow: FlowControl::new(id, send_window, recv_window),
            headers: Vec::new(),
            trailers: Vec::new(),
            body: BytesMut::new(),
            content_length: None,
            received: 0,
            outbound: Vec::new(),
            end_pending: false,
            response_started: false,
            opened_at: Instant::now(),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_pushed(&self) -> bool {
        self.id % 2 == 0
    }

    /// Bytes of DATA queued but not yet written
    pub fn queued_len(&self) -> usize {
        self.outbound.iter().map(Bytes::len).sum()
    }

    /// Whether the scheduler should consider this stream
    pub fn has_pending_output(&self) -> bool {
        self.state.can_send() && (!self.outbound.is_empty() || self.end_pending)
    }

    /// HEADERS received from the peer
    ///
    /// The first block opens the stream; a later block is a trailer section
    /// and must carry END_STREAM.
    pub fn recv_headers(&mut self, end_stream: bool) -> Result<()> {
        self.state = match (self.state, end_stream) {
            (StreamState::Idle, false) => StreamState::Open,
            (StreamState::Idle, true) => StreamState::HalfClosedRemote,
            (StreamState::Open, true) => StreamState::HalfClosedRemote,
            (StreamState::HalfClosedLocal, true) => StreamState::Closed,
            (StreamState::Open | StreamState::HalfClosedLocal, false) => {
                return Err(Error::stream(
                    self.id,
                    ErrorCode::ProtocolError,
                    "trailers without END_STREAM",
                ))
            }
            (state, _) => {
                return Err(Error::stream(
                    self.id,
                    ErrorCode::StreamClosed,
                    format!("HEADERS in state {:?}", state),
                ))
            }
        };
        Ok(())
    }

    /// DATA received from the peer
    pub fn recv_data(&mut self, end_stream: bool) -> Result<()> {
        if !self.state.can_receive() {
            return Err(Error::stream(
                self.id,
                ErrorCode::StreamClosed,
                format!("DATA in state {:?}", self.state),
            ));
        }
        if end_stream {
            self.state = match self.state {
                StreamState::Open => StreamState::HalfClosedRemote,
                _ => StreamState::Closed,
            };
        }
        Ok(())
    }

    /// PUSH_PROMISE sent for this (even) stream
    pub fn reserve_local(&mut self) -> Result<()> {
        if self.state != StreamState::Idle {
            return Err(Error::Internal(format!(
                "cannot reserve stream {} in state {:?}",
                self.id, self.state
            )));
        }
        self.state = StreamState::ReservedLocal;
        Ok(())
    }

    /// HEADERS sent by us
    pub fn send_headers(&mut self, end_stream: bool) -> Result<()> {
        self.state = match (self.state, end_stream) {
            (StreamState::ReservedLocal, false) => StreamState::HalfClosedRemote,
            (StreamState::ReservedLocal, true) => StreamState::Closed,
            (StreamState::Open, false) | (StreamState::HalfClosedRemote, false) => self.state,
            (StreamState::Open, true) => StreamState::HalfClosedLocal,
            (StreamState::HalfClosedRemote, true) => StreamState::Closed,
            (state, _) => {
                return Err(Error::Internal(format!(
                    "cannot send HEADERS on stream {} in state {:?}",
                    self.id, state
                )))
            }
        };
        self.response_started = true;
        Ok(())
    }

    /// DATA sent by us
    pub fn send_data(&mut self, end_stream: bool) -> Result<()> {
        if !self.state.can_send() {
            return Err(Error::Internal(format!(
                "cannot send DATA on stream {} in state {:?}",
                self.id, self.state
            )));
        }
        if end_stream {
            self.state = match self.state {
                StreamState::Open => StreamState::HalfClosedLocal,
                _ => StreamState::Closed,
            };
        }
        Ok(())
    }

    /// RST_STREAM sent or received
    pub fn reset(&mut self) {
        self.state = StreamState::Closed;
        self.outbound.clear();
        self.end_pending = false;
    }
}

/// All streams of one server connection
#[derive(Debug, Default)]
pub struct StreamManager {
    streams: HashMap<StreamId, H2Stream>,
    /// Highest client stream id seen
    last_client_id: StreamId,
    /// Next even id for a pushed stream
    next_push_id: StreamId,
}

impl StreamManager {
    pub fn new() -> Self {
        StreamManager {
            streams: HashMap::new(),
            last_client_id: 0,
            next_push_id: 2,
        }
    }

    pub fn last_client_id(&self) -> StreamId {
        self.last_client_id
    }

    pub fn get(&self, id: StreamId) -> Option<&H2Stream> {
        self.streams.get(&id)
    }

    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut H2Stream> {
        self.streams.get_mut(&id)
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.streams.contains_key(&id)
    }

    /// Whether `id` refers to a stream that existed and is gone now
    pub fn was_closed(&self, id: StreamId) -> bool {
        if self.streams.contains_key(&id) {
            return false;
        }
        if id % 2 == 1 {
            id <= self.last_client_id
        } else {
            id < self.next_push_id
        }
    }

    /// Register a new client stream; ids must be odd and strictly increasing
    pub fn open_client(
        &mut self,
        id: StreamId,
        send_window: u32,
        recv_window: u32,
    ) -> Result<&mut H2Stream> {
        if id % 2 == 0 {
            return Err(Error::InvalidStreamId(id));
        }
        if id <= self.last_client_id {
            return Err(Error::StreamIdRegression {
                stream_id: id,
                last: self.last_client_id,
            });
        }
        self.last_client_id = id;
        Ok(self
            .streams
            .entry(id)
            .or_insert_with(|| H2Stream::new(id, send_window, recv_window)))
    }

    /// Allocate the next even stream id for a push
    pub fn open_pushed(&mut self, send_window: u32, recv_window: u32) -> Result<&mut H2Stream> {
        let id = self.next_push_id;
        if id > super::MAX_STREAM_ID {
            return Err(Error::Push(super::error::PushError::GoingAway));
        }
        self.next_push_id += 2;
        Ok(self
            .streams
            .entry(id)
            .or_insert_with(|| H2Stream::new(id, send_window, recv_window)))
    }

    /// Active streams opened by the client
    pub fn active_client_streams(&self) -> usize {
        self.streams
            .values()
            .filter(|s| !s.is_pushed() && s.state().is_active())
            .count()
    }

    /// Pushed streams not yet closed
    pub fn active_pushed_streams(&self) -> usize {
        self.streams
            .values()
            .filter(|s| s.is_pushed() && !s.state().is_closed())
            .count()
    }

    /// Drop a stream, typically once it is closed
    pub fn remove(&mut self, id: StreamId) -> Option<H2Stream> {
        self.streams.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &H2Stream> {
        self.streams.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut H2Stream> {
        self.streams.values_mut()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_lifecycle() {
        let mut stream = H2Stream::new(1, 65535, 65535);
        stream.recv_headers(false).unwrap();
        assert_eq!(stream.state(), StreamState::Open);

        stream.recv_data(true).unwrap();
        assert_eq!(stream.state(), StreamState::HalfClosedRemote);

        stream.send_headers(false).unwrap();
        assert!(stream.response_started);
        stream.send_data(true).unwrap();
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[test]
    fn test_trailers_need_end_stream() {
        let mut stream = H2Stream::new(1, 65535, 65535);
        stream.recv_headers(false).unwrap();
        let err = stream.recv_headers(false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProtocolError);
        assert_eq!(err.stream_id(), Some(1));

        stream.recv_headers(true).unwrap();
        assert_eq!(stream.state(), StreamState::HalfClosedRemote);
    }

    #[test]
    fn test_data_after_end_stream() {
        let mut stream = H2Stream::new(3, 65535, 65535);
        stream.recv_headers(true).unwrap();
        let err = stream.recv_data(false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::StreamClosed);
    }

    #[test]
    fn test_pushed_lifecycle() {
        let mut stream = H2Stream::new(2, 65535, 0);
        stream.reserve_local().unwrap();
        assert_eq!(stream.state(), StreamState::ReservedLocal);

        stream.send_headers(false).unwrap();
        assert_eq!(stream.state(), StreamState::HalfClosedRemote);

        stream.send_data(true).unwrap();
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[test]
    fn test_client_ids_must_increase() {
        let mut manager = StreamManager::new();
        manager.open_client(1, 65535, 65535).unwrap();
        manager.open_client(5, 65535, 65535).unwrap();

        assert!(matches!(
            manager.open_client(3, 65535, 65535),
            Err(Error::StreamIdRegression { stream_id: 3, last: 5 })
        ));
        assert!(matches!(
            manager.open_client(6, 65535, 65535),
            Err(Error::InvalidStreamId(6))
        ));
    }

    #[test]
    fn test_push_ids_are_even() {
        let mut manager = StreamManager::new();
        assert_eq!(manager.open_pushed(65535, 0).unwrap().id(), 2);
        assert_eq!(manager.open_pushed(65535, 0).unwrap().id(), 4);
    }

    #[test]
    fn test_was_closed() {
        let mut manager = StreamManager::new();
        manager.open_client(1, 65535, 65535).unwrap();
        assert!(!manager.was_closed(1));
        assert!(!manager.was_closed(3));

        manager.remove(1);
        assert!(manager.was_closed(1));
        assert!(!manager.was_closed(3));
    }

    #[test]
    fn test_active_counts() {
        let mut manager = StreamManager::new();
        manager
            .open_client(1, 65535, 65535)
            .unwrap()
            .recv_headers(false)
            .unwrap();
        manager.open_client(3, 65535, 65535).unwrap();
        manager.open_pushed(65535, 0).unwrap().reserve_local().unwrap();

        assert_eq!(manager.active_client_streams(), 1);
        assert_eq!(manager.active_pushed_streams(), 1);
    }
}

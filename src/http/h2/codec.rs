//! HTTP/2 frame encoding and decoding
//!
//! Encoding appends complete frames to a `BytesMut` that the connection
//! later hands to the transport in one write. Decoding works on a receive
//! buffer and only returns a frame once its whole payload is present; the
//! 24-bit length is checked against our SETTINGS_MAX_FRAME_SIZE before the
//! payload is buffered.

use std::io::{self, Read};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::{Error, ErrorCode, Result};
use super::frames::*;
use super::settings::Settings;
use super::DEFAULT_MAX_FRAME_SIZE;

/// HTTP/2 frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = 9;

/// Largest payload expressible in the 24-bit length field
pub const MAX_FRAME_SIZE: usize = 0x00FF_FFFF;

/// Frame codec
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Largest payload we accept (our advertised SETTINGS_MAX_FRAME_SIZE)
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE as usize)
    }
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        FrameCodec {
            max_frame_size: max_frame_size.min(MAX_FRAME_SIZE),
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode a frame header
    pub fn encode_header(
        frame_type: FrameType,
        flags: FrameFlags,
        stream_id: u32,
        length: usize,
    ) -> [u8; FRAME_HEADER_SIZE] {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        let len = (length as u32).to_be_bytes();
        header[0..3].copy_from_slice(&len[1..4]);
        header[3] = frame_type.as_u8();
        header[4] = flags.as_u8();
        header[5..9].copy_from_slice(&(stream_id & 0x7FFF_FFFF).to_be_bytes());
        header
    }

    /// Decode a frame header; the reserved bit of the stream id is ignored
    pub fn decode_header(bytes: &[u8; FRAME_HEADER_SIZE]) -> FrameHeader {
        let length =
            ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | (bytes[2] as usize);
        let stream_id =
            u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & 0x7FFF_FFFF;

        FrameHeader {
            length,
            kind: bytes[3],
            flags: FrameFlags::from_u8(bytes[4]),
            stream_id,
        }
    }

    fn put_header(
        dst: &mut BytesMut,
        frame_type: FrameType,
        flags: FrameFlags,
        stream_id: u32,
        length: usize,
    ) {
        dst.reserve(FRAME_HEADER_SIZE + length);
        dst.put_slice(&Self::encode_header(frame_type, flags, stream_id, length));
    }

    /// Append any frame
    pub fn encode(frame: &Frame, dst: &mut BytesMut) {
        match frame {
            Frame::Data(f) => Self::encode_data_frame(f, dst),
            Frame::Headers(f) => Self::encode_headers_frame(f, dst),
            Frame::Priority(f) => Self::encode_priority_frame(f, dst),
            Frame::RstStream(f) => Self::encode_rst_stream_frame(f, dst),
            Frame::Settings(f) => Self::encode_settings_frame(f, dst),
            Frame::PushPromise(f) => Self::encode_push_promise_frame(f, dst),
            Frame::Ping(f) => Self::encode_ping_frame(f, dst),
            Frame::Goaway(f) => Self::encode_goaway_frame(f, dst),
            Frame::WindowUpdate(f) => Self::encode_window_update_frame(f, dst),
            Frame::Continuation(f) => Self::encode_continuation_frame(f, dst),
            Frame::Unknown { .. } => {}
        }
    }

    pub fn encode_data_frame(frame: &DataFrame, dst: &mut BytesMut) {
        let mut flags = FrameFlags::empty();
        flags.set_if(FrameFlags::END_STREAM, frame.end_stream);
        flags.set_if(FrameFlags::PADDED, frame.padding.is_some());

        Self::put_header(dst, FrameType::Data, flags, frame.stream_id, frame.frame_size());
        if let Some(pad) = frame.padding {
            dst.put_u8(pad);
        }
        dst.put_slice(&frame.data);
        if let Some(pad) = frame.padding {
            dst.put_bytes(0, pad as usize);
        }
    }

    pub fn encode_headers_frame(frame: &HeadersFrame, dst: &mut BytesMut) {
        let mut flags = FrameFlags::empty();
        flags.set_if(FrameFlags::END_STREAM, frame.end_stream);
        flags.set_if(FrameFlags::END_HEADERS, frame.end_headers);
        flags.set_if(FrameFlags::PRIORITY, frame.priority.is_some());
        flags.set_if(FrameFlags::PADDED, frame.padding.is_some());

        let mut length = frame.header_block.len();
        if frame.priority.is_some() {
            length += 5;
        }
        if let Some(pad) = frame.padding {
            length += 1 + pad as usize;
        }

        Self::put_header(dst, FrameType::Headers, flags, frame.stream_id, length);
        if let Some(pad) = frame.padding {
            dst.put_u8(pad);
        }
        if let Some(priority) = &frame.priority {
            Self::put_priority(dst, priority);
        }
        dst.put_slice(&frame.header_block);
        if let Some(pad) = frame.padding {
            dst.put_bytes(0, pad as usize);
        }
    }

    fn put_priority(dst: &mut BytesMut, priority: &PrioritySpec) {
        let mut dep = priority.stream_dependency & 0x7FFF_FFFF;
        if priority.exclusive {
            dep |= 0x8000_0000;
        }
        dst.put_u32(dep);
        dst.put_u8(priority.weight_byte());
    }

    pub fn encode_priority_frame(frame: &PriorityFrame, dst: &mut BytesMut) {
        Self::put_header(dst, FrameType::Priority, FrameFlags::empty(), frame.stream_id, 5);
        Self::put_priority(dst, &frame.priority);
    }

    pub fn encode_rst_stream_frame(frame: &RstStreamFrame, dst: &mut BytesMut) {
        Self::put_header(dst, FrameType::RstStream, FrameFlags::empty(), frame.stream_id, 4);
        dst.put_u32(frame.error_code.as_u32());
    }

    /// SETTINGS frames always go on stream 0; an ACK has no payload
    pub fn encode_settings_frame(frame: &SettingsFrame, dst: &mut BytesMut) {
        if frame.ack {
            Self::put_header(dst, FrameType::Settings, FrameFlags::from_u8(FrameFlags::ACK), 0, 0);
            return;
        }
        let length = frame.settings.encoded_len();
        Self::put_header(dst, FrameType::Settings, FrameFlags::empty(), 0, length);
        frame.settings.encode(dst);
    }

    pub fn encode_push_promise_frame(frame: &PushPromiseFrame, dst: &mut BytesMut) {
        let mut flags = FrameFlags::empty();
        flags.set_if(FrameFlags::END_HEADERS, frame.end_headers);
        flags.set_if(FrameFlags::PADDED, frame.padding.is_some());

        let mut length = 4 + frame.header_block.len();
        if let Some(pad) = frame.padding {
            length += 1 + pad as usize;
        }

        Self::put_header(dst, FrameType::PushPromise, flags, frame.stream_id, length);
        if let Some(pad) = frame.padding {
            dst.put_u8(pad);
        }
        dst.put_u32(frame.promised_stream_id & 0x7FFF_FFFF);
        dst.put_slice(&frame.header_block);
        if let Some(pad) = frame.padding {
            dst.put_bytes(0, pad as usize);
        }
    }

    pub fn encode_ping_frame(frame: &PingFrame, dst: &mut BytesMut) {
        let mut flags = FrameFlags::empty();
        flags.set_if(FrameFlags::ACK, frame.ack);
        Self::put_header(dst, FrameType::Ping, flags, 0, 8);
        dst.put_slice(&frame.data);
    }

    pub fn encode_goaway_frame(frame: &GoawayFrame, dst: &mut BytesMut) {
        let length = 8 + frame.debug_data.len();
        Self::put_header(dst, FrameType::Goaway, FrameFlags::empty(), 0, length);
        dst.put_u32(frame.last_stream_id & 0x7FFF_FFFF);
        dst.put_u32(frame.error_code.as_u32());
        dst.put_slice(&frame.debug_data);
    }

    pub fn encode_window_update_frame(frame: &WindowUpdateFrame, dst: &mut BytesMut) {
        Self::put_header(
            dst,
            FrameType::WindowUpdate,
            FrameFlags::empty(),
            frame.stream_id,
            4,
        );
        dst.put_u32(frame.size_increment & 0x7FFF_FFFF);
    }

    pub fn encode_continuation_frame(frame: &ContinuationFrame, dst: &mut BytesMut) {
        let mut flags = FrameFlags::empty();
        flags.set_if(FrameFlags::END_HEADERS, frame.end_headers);
        Self::put_header(
            dst,
            FrameType::Continuation,
            flags,
            frame.stream_id,
            frame.header_block.len(),
        );
        dst.put_slice(&frame.header_block);
    }

    /// Try to decode one frame from the front of `src`
    ///
    /// Returns `Ok(None)` when more bytes are needed. A length above our
    /// maximum is a FRAME_SIZE_ERROR for the connection and is reported as
    /// soon as the header is visible.
    pub fn decode(&self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut raw = [0u8; FRAME_HEADER_SIZE];
        raw.copy_from_slice(&src[..FRAME_HEADER_SIZE]);
        let header = Self::decode_header(&raw);

        if header.length > self.max_frame_size {
            return Err(Error::FrameSize(format!(
                "frame of {} bytes exceeds maximum {}",
                header.length, self.max_frame_size
            )));
        }

        let total = FRAME_HEADER_SIZE + header.length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut frame_bytes = src.split_to(total);
        frame_bytes.advance(FRAME_HEADER_SIZE);
        Self::parse_payload(header, frame_bytes.freeze()).map(Some)
    }

    /// Validate and decode a payload according to its frame type
    pub fn parse_payload(header: FrameHeader, mut payload: Bytes) -> Result<Frame> {
        let stream_id = header.stream_id;
        let flags = header.flags;

        let frame_type = match header.frame_type() {
            Some(t) => t,
            None => {
                return Ok(Frame::Unknown {
                    kind: header.kind,
                    stream_id,
                })
            }
        };

        match frame_type {
            FrameType::Data => {
                require_stream(frame_type, stream_id)?;
                let padding = strip_padding(flags, &mut payload)?;
                Ok(Frame::Data(DataFrame {
                    stream_id,
                    data: payload,
                    end_stream: flags.is_end_stream(),
                    padding,
                }))
            }
            FrameType::Headers => {
                require_stream(frame_type, stream_id)?;
                let padding = strip_padding(flags, &mut payload)?;
                let priority = if flags.is_priority() {
                    if payload.len() < 5 {
                        return Err(Error::FrameSize("HEADERS priority truncated".into()));
                    }
                    let dep = payload.get_u32();
                    let weight = payload.get_u8();
                    Some(PrioritySpec::from_wire(dep, weight))
                } else {
                    None
                };
                Ok(Frame::Headers(HeadersFrame {
                    stream_id,
                    header_block: payload,
                    end_stream: flags.is_end_stream(),
                    end_headers: flags.is_end_headers(),
                    priority,
                    padding,
                }))
            }
            FrameType::Priority => {
                require_stream(frame_type, stream_id)?;
                if payload.len() != 5 {
                    return Err(Error::stream(
                        stream_id,
                        ErrorCode::FrameSizeError,
                        "PRIORITY payload must be 5 bytes",
                    ));
                }
                let dep = payload.get_u32();
                let weight = payload.get_u8();
                Ok(Frame::Priority(PriorityFrame {
                    stream_id,
                    priority: PrioritySpec::from_wire(dep, weight),
                }))
            }
            FrameType::RstStream => {
                require_stream(frame_type, stream_id)?;
                if payload.len() != 4 {
                    return Err(Error::FrameSize("RST_STREAM payload must be 4 bytes".into()));
                }
                Ok(Frame::RstStream(RstStreamFrame {
                    stream_id,
                    error_code: ErrorCode::from_u32(payload.get_u32()),
                }))
            }
            FrameType::Settings => {
                require_connection(frame_type, stream_id)?;
                if flags.is_ack() {
                    if !payload.is_empty() {
                        return Err(Error::FrameSize("SETTINGS ACK with payload".into()));
                    }
                    return Ok(Frame::Settings(SettingsFrame::ack()));
                }
                if payload.len() % 6 != 0 {
                    return Err(Error::FrameSize(format!(
                        "SETTINGS payload of {} bytes is not a multiple of 6",
                        payload.len()
                    )));
                }
                Ok(Frame::Settings(SettingsFrame::new(Settings::decode(&payload)?)))
            }
            FrameType::PushPromise => {
                require_stream(frame_type, stream_id)?;
                let padding = strip_padding(flags, &mut payload)?;
                if payload.len() < 4 {
                    return Err(Error::FrameSize("PUSH_PROMISE truncated".into()));
                }
                let promised_stream_id = payload.get_u32() & 0x7FFF_FFFF;
                Ok(Frame::PushPromise(PushPromiseFrame {
                    stream_id,
                    promised_stream_id,
                    header_block: payload,
                    end_headers: flags.is_end_headers(),
                    padding,
                }))
            }
            FrameType::Ping => {
                require_connection(frame_type, stream_id)?;
                if payload.len() != 8 {
                    return Err(Error::FrameSize("PING payload must be 8 bytes".into()));
                }
                let mut data = [0u8; 8];
                data.copy_from_slice(&payload);
                Ok(Frame::Ping(PingFrame {
                    ack: flags.is_ack(),
                    data,
                }))
            }
            FrameType::Goaway => {
                require_connection(frame_type, stream_id)?;
                if payload.len() < 8 {
                    return Err(Error::FrameSize("GOAWAY payload truncated".into()));
                }
                let last_stream_id = payload.get_u32() & 0x7FFF_FFFF;
                let error_code = ErrorCode::from_u32(payload.get_u32());
                Ok(Frame::Goaway(GoawayFrame::new(
                    last_stream_id,
                    error_code,
                    payload,
                )))
            }
            FrameType::WindowUpdate => {
                if payload.len() != 4 {
                    return Err(Error::FrameSize("WINDOW_UPDATE payload must be 4 bytes".into()));
                }
                Ok(Frame::WindowUpdate(WindowUpdateFrame::new(
                    stream_id,
                    payload.get_u32() & 0x7FFF_FFFF,
                )))
            }
            FrameType::Continuation => {
                require_stream(frame_type, stream_id)?;
                Ok(Frame::Continuation(ContinuationFrame {
                    stream_id,
                    header_block: payload,
                    end_headers: flags.is_end_headers(),
                }))
            }
        }
    }

    /// Blocking read of one frame; used by clients and tests
    pub fn read_frame<R: Read>(reader: &mut R, max_frame_size: usize) -> io::Result<Frame> {
        let mut raw = [0u8; FRAME_HEADER_SIZE];
        reader.read_exact(&mut raw)?;
        let header = Self::decode_header(&raw);

        if header.length > max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame payload too large: {}", header.length),
            ));
        }

        let mut payload = vec![0u8; header.length];
        reader.read_exact(&mut payload)?;

        Self::parse_payload(header, Bytes::from(payload))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }
}

fn require_stream(frame_type: FrameType, stream_id: u32) -> Result<()> {
    if stream_id == 0 {
        return Err(Error::protocol(format!("{} on stream 0", frame_type.name())));
    }
    Ok(())
}

fn require_connection(frame_type: FrameType, stream_id: u32) -> Result<()> {
    if stream_id != 0 {
        return Err(Error::protocol(format!(
            "{} on stream {}",
            frame_type.name(),
            stream_id
        )));
    }
    Ok(())
}

/// Remove the pad length byte and trailing padding
fn strip_padding(flags: FrameFlags, payload: &mut Bytes) -> Result<Option<u8>> {
    if !flags.is_padded() {
        return Ok(None);
    }
    if payload.is_empty() {
        return Err(Error::FrameSize("padded frame without pad length".into()));
    }
    let pad = payload.get_u8();
    if pad as usize > payload.len() {
        return Err(Error::protocol("padding exceeds frame payload"));
    }
    payload.truncate(payload.len() - pad as usize);
    Ok(Some(pad))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::settings::SettingsBuilder;

    fn encode(frame: &Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameCodec::encode(frame, &mut buf);
        buf
    }

    #[test]
    fn test_encode_decode_header() {
        let flags = FrameFlags::from_u8(FrameFlags::END_STREAM | FrameFlags::END_HEADERS);
        let raw = FrameCodec::encode_header(FrameType::Headers, flags, 42, 1234);
        let header = FrameCodec::decode_header(&raw);

        assert_eq!(header.frame_type(), Some(FrameType::Headers));
        assert_eq!(header.flags, flags);
        assert_eq!(header.stream_id, 42);
        assert_eq!(header.length, 1234);
    }

    #[test]
    fn test_reserved_bit_ignored() {
        let raw = [0, 0, 0, 0x8, 0, 0x80, 0, 0, 7];
        assert_eq!(FrameCodec::decode_header(&raw).stream_id, 7);
    }

    #[test]
    fn test_encode_data_frame() {
        let buf = encode(&Frame::Data(DataFrame::new(1, Bytes::from("Hello"), true)));
        assert_eq!(&buf[0..3], &[0, 0, 5]);
        assert_eq!(buf[3], FrameType::Data.as_u8());
        assert_eq!(buf[4], FrameFlags::END_STREAM);
        assert_eq!(&buf[5..9], &[0, 0, 0, 1]);
        assert_eq!(&buf[9..], b"Hello");
    }

    #[test]
    fn test_padded_data_decodes_without_padding() {
        let frame = DataFrame::new(3, Bytes::from("Hi"), false).with_padding(10);
        let mut buf = encode(&Frame::Data(frame));
        assert_eq!(&buf[0..3], &[0, 0, 13]);

        match FrameCodec::default().decode(&mut buf).unwrap() {
            Some(Frame::Data(f)) => {
                assert_eq!(&f.data[..], b"Hi");
                assert_eq!(f.padding, Some(10));
                assert_eq!(f.frame_size(), 13);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_padding_longer_than_payload() {
        let raw = FrameCodec::encode_header(
            FrameType::Data,
            FrameFlags::from_u8(FrameFlags::PADDED),
            1,
            3,
        );
        let mut buf = BytesMut::from(&raw[..]);
        buf.extend_from_slice(&[5, b'a', b'b']);

        let err = FrameCodec::default().decode(&mut buf).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProtocolError);
    }

    #[test]
    fn test_partial_frame_needs_more() {
        let full = encode(&Frame::Ping(PingFrame::new([1; 8])));
        let mut buf = BytesMut::from(&full[..12]);
        assert!(FrameCodec::default().decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 12);

        buf.extend_from_slice(&full[12..]);
        assert!(matches!(
            FrameCodec::default().decode(&mut buf).unwrap(),
            Some(Frame::Ping(p)) if !p.ack && p.data == [1; 8]
        ));
    }

    #[test]
    fn test_oversized_frame_rejected_from_header() {
        let raw = FrameCodec::encode_header(FrameType::Data, FrameFlags::empty(), 1, 16385);
        let mut buf = BytesMut::from(&raw[..]);

        let err = FrameCodec::new(16384).decode(&mut buf).unwrap_err();
        assert_eq!(err.code(), ErrorCode::FrameSizeError);
    }

    #[test]
    fn test_headers_with_priority() {
        let frame = HeadersFrame::new(5, Bytes::from_static(&[0x82]), false, true)
            .with_priority(PrioritySpec::new(3, true, 201));
        let mut buf = encode(&Frame::Headers(frame));

        match FrameCodec::default().decode(&mut buf).unwrap() {
            Some(Frame::Headers(f)) => {
                let p = f.priority.unwrap();
                assert_eq!(p.stream_dependency, 3);
                assert!(p.exclusive);
                assert_eq!(p.weight, 201);
                assert_eq!(&f.header_block[..], &[0x82]);
                assert!(f.end_headers);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_settings_roundtrip() {
        let settings = SettingsBuilder::new()
            .header_table_size(8192)
            .enable_push(false)
            .initial_window_size(65535)
            .build()
            .unwrap();
        let mut buf = encode(&Frame::Settings(SettingsFrame::new(settings.clone())));
        assert_eq!(&buf[0..3], &[0, 0, 18]);
        assert_eq!(&buf[5..9], &[0, 0, 0, 0]);

        match FrameCodec::default().decode(&mut buf).unwrap() {
            Some(Frame::Settings(f)) => {
                assert!(!f.ack);
                assert_eq!(f.settings, settings);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_settings_ack_with_payload() {
        let raw = FrameCodec::encode_header(
            FrameType::Settings,
            FrameFlags::from_u8(FrameFlags::ACK),
            0,
            6,
        );
        let mut buf = BytesMut::from(&raw[..]);
        buf.extend_from_slice(&[0; 6]);
        let err = FrameCodec::default().decode(&mut buf).unwrap_err();
        assert_eq!(err.code(), ErrorCode::FrameSizeError);
    }

    #[test]
    fn test_settings_on_stream_is_protocol_error() {
        let raw = FrameCodec::encode_header(FrameType::Settings, FrameFlags::empty(), 1, 0);
        let mut buf = BytesMut::from(&raw[..]);
        let err = FrameCodec::default().decode(&mut buf).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProtocolError);
    }

    #[test]
    fn test_data_on_stream_zero() {
        let raw = FrameCodec::encode_header(FrameType::Data, FrameFlags::empty(), 0, 0);
        let mut buf = BytesMut::from(&raw[..]);
        assert!(FrameCodec::default().decode(&mut buf).is_err());
    }

    #[test]
    fn test_priority_wrong_length_is_stream_error() {
        let raw = FrameCodec::encode_header(FrameType::Priority, FrameFlags::empty(), 3, 4);
        let mut buf = BytesMut::from(&raw[..]);
        buf.extend_from_slice(&[0; 4]);
        let err = FrameCodec::default().decode(&mut buf).unwrap_err();
        assert_eq!(err.stream_id(), Some(3));
        assert_eq!(err.code(), ErrorCode::FrameSizeError);
    }

    #[test]
    fn test_push_promise_roundtrip() {
        let frame = PushPromiseFrame {
            stream_id: 1,
            promised_stream_id: 2,
            header_block: Bytes::from_static(&[0x82, 0x87]),
            end_headers: true,
            padding: None,
        };
        let mut buf = encode(&Frame::PushPromise(frame));
        match FrameCodec::default().decode(&mut buf).unwrap() {
            Some(Frame::PushPromise(f)) => {
                assert_eq!(f.stream_id, 1);
                assert_eq!(f.promised_stream_id, 2);
                assert_eq!(&f.header_block[..], &[0x82, 0x87]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_goaway_and_window_update() {
        let mut buf = BytesMut::new();
        FrameCodec::encode_goaway_frame(
            &GoawayFrame::new(7, ErrorCode::EnhanceYourCalm, Bytes::from("slow down")),
            &mut buf,
        );
        FrameCodec::encode_window_update_frame(&WindowUpdateFrame::new(42, 1000), &mut buf);

        let codec = FrameCodec::default();
        match codec.decode(&mut buf).unwrap() {
            Some(Frame::Goaway(f)) => {
                assert_eq!(f.last_stream_id, 7);
                assert_eq!(f.error_code, ErrorCode::EnhanceYourCalm);
                assert_eq!(&f.debug_data[..], b"slow down");
            }
            other => panic!("unexpected {:?}", other),
        }
        match codec.decode(&mut buf).unwrap() {
            Some(Frame::WindowUpdate(f)) => {
                assert_eq!(f.stream_id, 42);
                assert_eq!(f.size_increment, 1000);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_skipped() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0, 0, 2, 0xee, 0, 0, 0, 0, 1, 0xaa, 0xbb]);
        assert!(matches!(
            FrameCodec::default().decode(&mut buf).unwrap(),
            Some(Frame::Unknown { kind: 0xee, stream_id: 1 })
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_read_frame() {
        let buf = encode(&Frame::RstStream(RstStreamFrame {
            stream_id: 9,
            error_code: ErrorCode::Cancel,
        }));
        let mut reader = &buf[..];
        match FrameCodec::read_frame(&mut reader, 16384).unwrap() {
            Frame::RstStream(f) => {
                assert_eq!(f.stream_id, 9);
                assert_eq!(f.error_code, ErrorCode::Cancel);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

//! HTTP/2 SETTINGS parameters (RFC 7540 Section 6.5)
//!
//! A [`Settings`] value only carries the parameters that were present in a
//! frame; the `get_*` accessors fill in the protocol defaults. The
//! connection keeps one merged copy per direction.

use std::fmt;

use bytes::{Buf, BufMut, BytesMut};

use super::error::{Error, Result};
use super::{DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE};

/// Largest legal SETTINGS_MAX_FRAME_SIZE
pub const MAX_MAX_FRAME_SIZE: u32 = 16_777_215;

/// Largest legal flow-control window
pub const MAX_WINDOW_SIZE: u32 = 0x7FFF_FFFF;

/// HTTP/2 settings parameters (RFC 7540 Section 6.5.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SettingsParameter {
    HeaderTableSize = 0x1,
    EnablePush = 0x2,
    MaxConcurrentStreams = 0x3,
    InitialWindowSize = 0x4,
    MaxFrameSize = 0x5,
    MaxHeaderListSize = 0x6,
}

impl SettingsParameter {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Unknown identifiers return `None` and must be ignored by the receiver
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x1 => Some(SettingsParameter::HeaderTableSize),
            0x2 => Some(SettingsParameter::EnablePush),
            0x3 => Some(SettingsParameter::MaxConcurrentStreams),
            0x4 => Some(SettingsParameter::InitialWindowSize),
            0x5 => Some(SettingsParameter::MaxFrameSize),
            0x6 => Some(SettingsParameter::MaxHeaderListSize),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SettingsParameter::HeaderTableSize => "HEADER_TABLE_SIZE",
            SettingsParameter::EnablePush => "ENABLE_PUSH",
            SettingsParameter::MaxConcurrentStreams => "MAX_CONCURRENT_STREAMS",
            SettingsParameter::InitialWindowSize => "INITIAL_WINDOW_SIZE",
            SettingsParameter::MaxFrameSize => "MAX_FRAME_SIZE",
            SettingsParameter::MaxHeaderListSize => "MAX_HEADER_LIST_SIZE",
        }
    }
}

impl fmt::Display for SettingsParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u16())
    }
}

/// HTTP/2 settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: Option<u32>,
    pub enable_push: Option<bool>,
    /// `None` means unlimited
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: Option<u32>,
    pub max_frame_size: Option<u32>,
    /// `None` means unlimited
    pub max_header_list_size: Option<u32>,
}

impl Settings {
    pub fn new() -> Self {
        Settings::default()
    }

    pub fn get_header_table_size(&self) -> u32 {
        self.header_table_size.unwrap_or(DEFAULT_HEADER_TABLE_SIZE)
    }

    pub fn get_enable_push(&self) -> bool {
        self.enable_push.unwrap_or(true)
    }

    pub fn get_max_concurrent_streams(&self) -> Option<u32> {
        self.max_concurrent_streams
    }

    pub fn get_initial_window_size(&self) -> u32 {
        self.initial_window_size.unwrap_or(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    pub fn get_max_frame_size(&self) -> u32 {
        self.max_frame_size.unwrap_or(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Check value ranges
    ///
    /// An out-of-range initial window is a FLOW_CONTROL_ERROR, everything
    /// else a PROTOCOL_ERROR (RFC 7540 Section 6.5.2).
    pub fn validate(&self) -> Result<()> {
        if let Some(size) = self.initial_window_size {
            if size > MAX_WINDOW_SIZE {
                return Err(Error::FlowControl(format!(
                    "initial window size {} exceeds maximum (2^31-1)",
                    size
                )));
            }
        }

        if let Some(size) = self.max_frame_size {
            if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&size) {
                return Err(Error::InvalidSettings(format!(
                    "max frame size {} outside valid range (16384-16777215)",
                    size
                )));
            }
        }

        Ok(())
    }

    /// Overlay the parameters present in `other`
    pub fn merge(&mut self, other: &Settings) {
        if other.header_table_size.is_some() {
            self.header_table_size = other.header_table_size;
        }
        if other.enable_push.is_some() {
            self.enable_push = other.enable_push;
        }
        if other.max_concurrent_streams.is_some() {
            self.max_concurrent_streams = other.max_concurrent_streams;
        }
        if other.initial_window_size.is_some() {
            self.initial_window_size = other.initial_window_size;
        }
        if other.max_frame_size.is_some() {
            self.max_frame_size = other.max_frame_size;
        }
        if other.max_header_list_size.is_some() {
            self.max_header_list_size = other.max_header_list_size;
        }
    }

    /// Serialize as a SETTINGS payload (6 bytes per present parameter)
    pub fn encode(&self, dst: &mut BytesMut) {
        let mut put = |param: SettingsParameter, value: u32| {
            dst.put_u16(param.as_u16());
            dst.put_u32(value);
        };

        if let Some(v) = self.header_table_size {
            put(SettingsParameter::HeaderTableSize, v);
        }
        if let Some(v) = self.enable_push {
            put(SettingsParameter::EnablePush, u32::from(v));
        }
        if let Some(v) = self.max_concurrent_streams {
            put(SettingsParameter::MaxConcurrentStreams, v);
        }
        if let Some(v) = self.initial_window_size {
            put(SettingsParameter::InitialWindowSize, v);
        }
        if let Some(v) = self.max_frame_size {
            put(SettingsParameter::MaxFrameSize, v);
        }
        if let Some(v) = self.max_header_list_size {
            put(SettingsParameter::MaxHeaderListSize, v);
        }
    }

    /// Encoded payload length
    pub fn encoded_len(&self) -> usize {
        let present = [
            self.header_table_size.is_some(),
            self.enable_push.is_some(),
            self.max_concurrent_streams.is_some(),
            self.initial_window_size.is_some(),
            self.max_frame_size.is_some(),
            self.max_header_list_size.is_some(),
        ];
        6 * present.iter().filter(|p| **p).count()
    }

    /// Parse a SETTINGS payload
    ///
    /// The caller has already checked that the length is a multiple of 6.
    /// Later occurrences of a parameter override earlier ones; unknown
    /// parameters are skipped.
    pub fn decode(mut payload: &[u8]) -> Result<Settings> {
        let mut settings = Settings::new();

        while payload.remaining() >= 6 {
            let id = payload.get_u16();
            let value = payload.get_u32();

            match SettingsParameter::from_u16(id) {
                Some(SettingsParameter::HeaderTableSize) => {
                    settings.header_table_size = Some(value)
                }
                Some(SettingsParameter::EnablePush) => {
                    settings.enable_push = Some(match value {
                        0 => false,
                        1 => true,
                        other => {
                            return Err(Error::InvalidSettings(format!(
                                "ENABLE_PUSH must be 0 or 1, got {}",
                                other
                            )))
                        }
                    })
                }
                Some(SettingsParameter::MaxConcurrentStreams) => {
                    settings.max_concurrent_streams = Some(value)
                }
                Some(SettingsParameter::InitialWindowSize) => {
                    settings.initial_window_size = Some(value)
                }
                Some(SettingsParameter::MaxFrameSize) => settings.max_frame_size = Some(value),
                Some(SettingsParameter::MaxHeaderListSize) => {
                    settings.max_header_list_size = Some(value)
                }
                None => {}
            }
        }

        settings.validate()?;
        Ok(settings)
    }
}

/// Builder for HTTP/2 settings
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        SettingsBuilder::default()
    }

    pub fn header_table_size(mut self, size: u32) -> Self {
        self.settings.header_table_size = Some(size);
        self
    }

    pub fn enable_push(mut self, enable: bool) -> Self {
        self.settings.enable_push = Some(enable);
        self
    }

    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings.max_concurrent_streams = Some(max);
        self
    }

    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings.initial_window_size = Some(size);
        self
    }

    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings.max_frame_size = Some(size);
        self
    }

    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.settings.max_header_list_size = Some(size);
        self
    }

    /// Build and validate
    pub fn build(self) -> Result<Settings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::error::ErrorCode;

    #[test]
    fn test_defaults() {
        let settings = Settings::new();
        assert_eq!(settings.get_header_table_size(), 4096);
        assert!(settings.get_enable_push());
        assert_eq!(settings.get_initial_window_size(), 65535);
        assert_eq!(settings.get_max_frame_size(), 16384);
        assert_eq!(settings.get_max_concurrent_streams(), None);
    }

    #[test]
    fn test_encode_decode() {
        let settings = SettingsBuilder::new()
            .max_concurrent_streams(100)
            .initial_window_size(1 << 20)
            .enable_push(false)
            .build()
            .unwrap();

        let mut buf = BytesMut::new();
        settings.encode(&mut buf);
        assert_eq!(buf.len(), 18);
        assert_eq!(settings.encoded_len(), 18);

        assert_eq!(Settings::decode(&buf).unwrap(), settings);
    }

    #[test]
    fn test_unknown_parameter_ignored() {
        let payload = [0x00, 0x42, 0, 0, 0, 7, 0x00, 0x03, 0, 0, 0, 10];
        let settings = Settings::decode(&payload).unwrap();
        assert_eq!(settings.max_concurrent_streams, Some(10));
    }

    #[test]
    fn test_enable_push_out_of_range() {
        let payload = [0x00, 0x02, 0, 0, 0, 2];
        let err = Settings::decode(&payload).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProtocolError);
    }

    #[test]
    fn test_window_too_large_is_flow_control_error() {
        let payload = [0x00, 0x04, 0x80, 0, 0, 0];
        let err = Settings::decode(&payload).unwrap_err();
        assert_eq!(err.code(), ErrorCode::FlowControlError);
    }

    #[test]
    fn test_frame_size_range() {
        assert!(SettingsBuilder::new().max_frame_size(16383).build().is_err());
        assert!(SettingsBuilder::new().max_frame_size(16384).build().is_ok());
        assert!(SettingsBuilder::new()
            .max_frame_size(MAX_MAX_FRAME_SIZE + 1)
            .build()
            .is_err());
    }

    #[test]
    fn test_merge() {
        let mut base = SettingsBuilder::new().max_frame_size(20000).build().unwrap();
        let update = SettingsBuilder::new().initial_window_size(100).build().unwrap();
        base.merge(&update);

        assert_eq!(base.get_max_frame_size(), 20000);
        assert_eq!(base.get_initial_window_size(), 100);
    }
}

//! Server configuration
//!
//! Every limit the protocol engine enforces lives here. Values are checked
//! once in [`ServerConfigBuilder::build`]; the drivers and the HTTP/2
//! connection read them without further validation.

use std::time::Duration;

use super::h2::settings::{Settings, MAX_MAX_FRAME_SIZE, MAX_WINDOW_SIZE};
use super::h2::{DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE};

/// Invalid configuration value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("max_frame_size {0} outside 16384..=16777215")]
    FrameSize(u32),

    #[error("initial_window_size {0} exceeds 2^31-1")]
    WindowSize(u32),
}

/// Limits and timeouts for both protocol versions
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Largest request body accepted (HTTP/1.1 and HTTP/2)
    pub max_body_size: usize,
    /// Request line plus header section, HTTP/1.1
    pub max_header_bytes: usize,
    /// Time allowed for a complete header section once its first byte arrived
    pub header_timeout: Duration,
    /// Time allowed for the body and the handler
    pub request_timeout: Duration,
    /// Wait between keep-alive requests or on an idle HTTP/2 connection
    pub idle_timeout: Duration,
    pub max_concurrent_streams: u32,
    pub max_frame_size: u32,
    /// Decompressed header list limit, also the HPACK bomb ceiling
    pub max_header_list_size: u32,
    pub header_table_size: u32,
    pub initial_window_size: u32,
    pub enable_push: bool,
    pub max_pushed_streams: usize,
    pub max_pushed_resource_size: usize,
    /// Driver tick for socket polling and timeout checks
    pub poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            max_body_size: 10 * 1024 * 1024,
            max_header_bytes: 64 * 1024,
            header_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
            max_concurrent_streams: 100,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: 64 * 1024,
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            enable_push: true,
            max_pushed_streams: 100,
            max_pushed_resource_size: 1024 * 1024,
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    /// SETTINGS we advertise on a new HTTP/2 connection
    ///
    /// ENABLE_PUSH only constrains the server's peer, so it is left out.
    pub fn local_settings(&self) -> Settings {
        let mut settings = Settings::new();
        settings.header_table_size = Some(self.header_table_size);
        settings.max_concurrent_streams = Some(self.max_concurrent_streams);
        settings.initial_window_size = Some(self.initial_window_size);
        settings.max_frame_size = Some(self.max_frame_size);
        settings.max_header_list_size = Some(self.max_header_list_size);
        settings
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("max_body_size", self.max_body_size == 0),
            ("max_header_bytes", self.max_header_bytes == 0),
            ("header_timeout", self.header_timeout.is_zero()),
            ("request_timeout", self.request_timeout.is_zero()),
            ("idle_timeout", self.idle_timeout.is_zero()),
            ("max_concurrent_streams", self.max_concurrent_streams == 0),
            ("max_header_list_size", self.max_header_list_size == 0),
            ("max_pushed_resource_size", self.max_pushed_resource_size == 0),
            ("poll_interval", self.poll_interval.is_zero()),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, zero)| *zero) {
            return Err(ConfigError::Zero(name));
        }

        if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&self.max_frame_size) {
            return Err(ConfigError::FrameSize(self.max_frame_size));
        }
        if self.initial_window_size > MAX_WINDOW_SIZE {
            return Err(ConfigError::WindowSize(self.initial_window_size));
        }
        Ok(())
    }
}

/// Builder for [`ServerConfig`]
#[derive(Debug, Clone, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    pub fn max_header_bytes(mut self, size: usize) -> Self {
        self.config.max_header_bytes = size;
        self
    }

    pub fn header_timeout(mut self, timeout: Duration) -> Self {
        self.config.header_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.config.max_concurrent_streams = max;
        self
    }

    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.config.max_frame_size = size;
        self
    }

    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.config.max_header_list_size = size;
        self
    }

    pub fn header_table_size(mut self, size: u32) -> Self {
        self.config.header_table_size = size;
        self
    }

    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.config.initial_window_size = size;
        self
    }

    pub fn enable_push(mut self, enable: bool) -> Self {
        self.config.enable_push = enable;
        self
    }

    pub fn max_pushed_streams(mut self, max: usize) -> Self {
        self.config.max_pushed_streams = max;
        self
    }

    pub fn max_pushed_resource_size(mut self, size: usize) -> Self {
        self.config.max_pushed_resource_size = size;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

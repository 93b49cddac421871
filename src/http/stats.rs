//! Server counters
//!
//! Lock-free counters shared by the listener and every connection thread.

use std::sync::atomic::{AtomicU64, Ordering};

use super::shell::Protocol;

/// Connection and request counters
#[derive(Debug, Default)]
pub struct ServerStats {
    active_connections: AtomicU64,
    total_connections: AtomicU64,
    total_requests: AtomicU64,
    http1_connections: AtomicU64,
    http2_connections: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub active_connections: u64,
    pub total_connections: u64,
    pub total_requests: u64,
    pub http1_connections: u64,
    pub http2_connections: u64,
}

impl ServerStats {
    pub const fn new() -> Self {
        ServerStats {
            active_connections: AtomicU64::new(0),
            total_connections: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            http1_connections: AtomicU64::new(0),
            http2_connections: AtomicU64::new(0),
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record which protocol a connection ended up speaking
    pub fn protocol_selected(&self, protocol: Protocol) {
        let counter = match protocol {
            Protocol::Http1 => &self.http1_connections,
            Protocol::Http2 => &self.http2_connections,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            http1_connections: self.http1_connections.load(Ordering::Relaxed),
            http2_connections: self.http2_connections.load(Ordering::Relaxed),
        }
    }
}

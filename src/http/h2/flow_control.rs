//! HTTP/2 flow control (RFC 7540 Section 5.2, 6.9)
//!
//! Every stream and the connection itself carry a send window (credit the
//! peer granted us) and a receive window (credit we granted the peer).
//! Sending is strict: [`FlowControlWindow::reserve`] refuses to go below
//! zero, so DATA is checked before a single byte is written. Only a
//! SETTINGS_INITIAL_WINDOW_SIZE reduction may leave a send window negative.

use super::error::{Error, ErrorCode, Result};
use super::settings::MAX_WINDOW_SIZE;
use super::{CONNECTION_STREAM_ID, DEFAULT_INITIAL_WINDOW_SIZE};

/// A single flow-control window
#[derive(Debug, Clone)]
pub struct FlowControlWindow {
    /// 0 for the connection window
    stream_id: u32,
    initial_size: u32,
    /// Signed: may go negative after an initial size reduction
    current_size: i64,
}

impl FlowControlWindow {
    pub fn new(stream_id: u32) -> Self {
        Self::with_initial_size(stream_id, DEFAULT_INITIAL_WINDOW_SIZE)
    }

    pub fn with_initial_size(stream_id: u32, initial_size: u32) -> Self {
        FlowControlWindow {
            stream_id,
            initial_size,
            current_size: initial_size as i64,
        }
    }

    /// Current credit
    pub fn size(&self) -> i64 {
        self.current_size
    }

    /// Credit usable right now; never negative
    pub fn available(&self) -> usize {
        self.current_size.max(0) as usize
    }

    pub fn initial_size(&self) -> u32 {
        self.initial_size
    }

    pub fn can_send(&self, amount: usize) -> bool {
        self.current_size >= amount as i64
    }

    fn is_connection(&self) -> bool {
        self.stream_id == CONNECTION_STREAM_ID
    }

    /// Take `amount` bytes of send credit, or fail without changing anything
    pub fn reserve(&mut self, amount: usize) -> Result<()> {
        if !self.can_send(amount) {
            return Err(Error::SendWindowExceeded {
                stream_id: self.stream_id,
                requested: amount,
                available: self.current_size,
            });
        }
        self.current_size -= amount as i64;
        Ok(())
    }

    /// Apply a WINDOW_UPDATE increment
    ///
    /// A zero increment is a PROTOCOL_ERROR and growing past 2^31-1 a
    /// FLOW_CONTROL_ERROR; both are stream errors unless this is the
    /// connection window.
    pub fn increase(&mut self, increment: u32) -> Result<i64> {
        if increment == 0 {
            return Err(self.scoped(ErrorCode::ProtocolError, "WINDOW_UPDATE increment of 0"));
        }

        let new_size = self.current_size + increment as i64;
        if new_size > MAX_WINDOW_SIZE as i64 {
            return Err(if self.is_connection() {
                Error::WindowOverflow {
                    stream_id: self.stream_id,
                }
            } else {
                self.scoped(ErrorCode::FlowControlError, "window exceeds 2^31-1")
            });
        }

        self.current_size = new_size;
        Ok(self.current_size)
    }

    /// Account for DATA received from the peer
    pub fn consume_recv(&mut self, amount: usize) -> Result<()> {
        if amount as i64 > self.current_size {
            return Err(self.scoped(
                ErrorCode::FlowControlError,
                format!(
                    "peer sent {} bytes with {} bytes of window",
                    amount, self.current_size
                ),
            ));
        }
        self.current_size -= amount as i64;
        Ok(())
    }

    /// Apply a new SETTINGS_INITIAL_WINDOW_SIZE, shifting the window by the delta
    pub fn update_initial_size(&mut self, new_initial_size: u32) -> Result<()> {
        let delta = new_initial_size as i64 - self.initial_size as i64;
        let new_current = self.current_size + delta;

        if new_current > MAX_WINDOW_SIZE as i64 {
            return Err(Error::FlowControl(format!(
                "stream {} window {} exceeds 2^31-1 after SETTINGS",
                self.stream_id, new_current
            )));
        }

        self.initial_size = new_initial_size;
        self.current_size = new_current;
        Ok(())
    }

    /// Increment to send back once less than half the initial window remains
    pub fn pending_update(&self) -> Option<u32> {
        let initial = self.initial_size as i64;
        if initial > 0 && self.current_size < initial / 2 {
            Some((initial - self.current_size) as u32)
        } else {
            None
        }
    }

    fn scoped(&self, code: ErrorCode, reason: impl Into<String>) -> Error {
        let reason = reason.into();
        if self.is_connection() {
            match code {
                ErrorCode::FlowControlError => Error::FlowControl(reason),
                _ => Error::Protocol(reason),
            }
        } else {
            Error::stream(self.stream_id, code, reason)
        }
    }
}

/// Send and receive windows for one stream or the connection
#[derive(Debug, Clone)]
pub struct FlowControl {
    pub send: FlowControlWindow,
    pub recv: FlowControlWindow,
}

impl FlowControl {
    pub fn new(stream_id: u32, send_size: u32, recv_size: u32) -> Self {
        FlowControl {
            send: FlowControlWindow::with_initial_size(stream_id, send_size),
            recv: FlowControlWindow::with_initial_size(stream_id, recv_size),
        }
    }

    /// Connection windows always start at 65,535 (RFC 7540 Section 6.9.2)
    pub fn connection() -> Self {
        FlowControl {
            send: FlowControlWindow::new(CONNECTION_STREAM_ID),
            recv: FlowControlWindow::new(CONNECTION_STREAM_ID),
        }
    }

    /// If a WINDOW_UPDATE is due, credit the receive window and return the increment
    pub fn replenish(&mut self) -> Result<Option<u32>> {
        match self.recv.pending_update() {
            Some(increment) => {
                self.recv.increase(increment)?;
                Ok(Some(increment))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_is_strict() {
        let mut window = FlowControlWindow::with_initial_size(1, 100);
        window.reserve(60).unwrap();
        assert_eq!(window.size(), 40);

        let err = window.reserve(41).unwrap_err();
        assert!(matches!(
            err,
            Error::SendWindowExceeded {
                stream_id: 1,
                requested: 41,
                available: 40
            }
        ));
        assert_eq!(window.size(), 40);

        window.reserve(40).unwrap();
        assert_eq!(window.size(), 0);
        assert_eq!(window.available(), 0);
    }

    #[test]
    fn test_increase() {
        let mut window = FlowControlWindow::with_initial_size(1, 100);
        window.reserve(50).unwrap();
        assert_eq!(window.increase(100).unwrap(), 150);
    }

    #[test]
    fn test_zero_increment() {
        let mut window = FlowControlWindow::new(3);
        let err = window.increase(0).unwrap_err();
        assert_eq!(err.stream_id(), Some(3));
        assert_eq!(err.code(), ErrorCode::ProtocolError);

        let mut conn = FlowControlWindow::new(0);
        let err = conn.increase(0).unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(err.code(), ErrorCode::ProtocolError);
    }

    #[test]
    fn test_overflow() {
        let mut conn = FlowControlWindow::with_initial_size(0, MAX_WINDOW_SIZE);
        let err = conn.increase(1).unwrap_err();
        assert!(matches!(err, Error::WindowOverflow { stream_id: 0 }));
        assert_eq!(err.code(), ErrorCode::FlowControlError);

        let mut stream = FlowControlWindow::with_initial_size(5, MAX_WINDOW_SIZE);
        let err = stream.increase(1).unwrap_err();
        assert_eq!(err.stream_id(), Some(5));
        assert_eq!(err.code(), ErrorCode::FlowControlError);
    }

    #[test]
    fn test_update_initial_size_can_go_negative() {
        let mut window = FlowControlWindow::with_initial_size(1, 100);
        window.reserve(80).unwrap();

        window.update_initial_size(200).unwrap();
        assert_eq!(window.size(), 120);

        window.update_initial_size(10).unwrap();
        assert_eq!(window.size(), -70);
        assert_eq!(window.available(), 0);
        assert!(!window.can_send(1));
        assert!(window.can_send(0));
    }

    #[test]
    fn test_recv_over_window() {
        let mut window = FlowControlWindow::with_initial_size(7, 10);
        window.consume_recv(10).unwrap();
        let err = window.consume_recv(1).unwrap_err();
        assert_eq!(err.stream_id(), Some(7));
        assert_eq!(err.code(), ErrorCode::FlowControlError);
    }

    #[test]
    fn test_replenish_below_half() {
        let mut fc = FlowControl::new(1, 100, 100);
        fc.recv.consume_recv(40).unwrap();
        assert_eq!(fc.replenish().unwrap(), None);

        fc.recv.consume_recv(20).unwrap();
        assert_eq!(fc.replenish().unwrap(), Some(60));
        assert_eq!(fc.recv.size(), 100);
    }

    #[test]
    fn test_connection_window_default() {
        let fc = FlowControl::connection();
        assert_eq!(fc.send.size(), 65535);
        assert_eq!(fc.recv.size(), 65535);
    }
}

//! Boundary between the protocol drivers and application code
//!
//! A [`Dispatcher`] turns a parsed request into a response. The drivers run
//! every dispatch on its own thread; the handler thread never touches the
//! transport. Responses, streamed body chunks and push requests travel back
//! to the connection thread as [`HandlerMessage`]s over a bounded channel.
//! HTTP/2 multiplexes many producers over that channel, so each streaming
//! response also holds an [`OutboundBudget`]: a producer that outpaces the
//! stream's flow-control window blocks instead of buffering.

use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use super::cancel::CancelToken;
use super::h2::{PushError, PushResource};
use super::message::{HttpRequest, HttpResponse, ResponseBody};

/// Messages queued per connection before a handler blocks
pub(crate) const HANDLER_QUEUE_DEPTH: usize = 32;

/// Streamed body bytes one HTTP/2 response may have in flight between its
/// producer and the socket
pub(crate) const STREAM_BUFFER_LIMIT: usize = 64 * 1024;

/// How often a blocked producer re-checks its cancel token
const BUDGET_POLL: Duration = Duration::from_millis(50);

/// Per-stream credit for streamed body bytes
///
/// The producer takes credit before a chunk enters the channel and the
/// connection thread returns it once the bytes have been written, so at
/// most `limit` bytes of one response sit in memory at a time.
#[derive(Debug)]
pub(crate) struct OutboundBudget {
    limit: usize,
    counts: Mutex<BudgetCounts>,
    written: Condvar,
}

#[derive(Debug, Default)]
struct BudgetCounts {
    produced: u64,
    written: u64,
}

impl OutboundBudget {
    pub(crate) fn new(limit: usize) -> Self {
        OutboundBudget {
            limit,
            counts: Mutex::new(BudgetCounts::default()),
            written: Condvar::new(),
        }
    }

    /// Largest chunk a single write may hand over
    pub(crate) fn limit(&self) -> usize {
        self.limit
    }

    /// Wait until `len` more bytes fit; false if `cancel` fired first
    pub(crate) fn acquire(&self, len: usize, cancel: &CancelToken) -> bool {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let queued = counts.produced - counts.written;
            if queued == 0 || queued + len as u64 <= self.limit as u64 {
                counts.produced += len as u64;
                return true;
            }
            counts = self
                .written
                .wait_timeout(counts, BUDGET_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Record the total number of bytes that reached the transport
    pub(crate) fn set_written(&self, total: u64) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        let total = total.min(counts.produced);
        if total > counts.written {
            counts.written = total;
            self.written.notify_all();
        }
    }

    /// Bytes taken but not yet written
    pub(crate) fn queued(&self) -> u64 {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        counts.produced - counts.written
    }
}

/// Application entry point
///
/// Closures taking `(HttpRequest, &mut RequestContext)` implement it.
pub trait Dispatcher: Send + Sync + 'static {
    fn dispatch(&self, request: HttpRequest, ctx: &mut RequestContext) -> HttpResponse;
}

impl<F> Dispatcher for F
where
    F: Fn(HttpRequest, &mut RequestContext) -> HttpResponse + Send + Sync + 'static,
{
    fn dispatch(&self, request: HttpRequest, ctx: &mut RequestContext) -> HttpResponse {
        self(request, ctx)
    }
}

/// Per-request handle given to the dispatcher
#[derive(Debug)]
pub struct RequestContext {
    stream_id: Option<u32>,
    cancel: CancelToken,
    pusher: Option<Pusher>,
}

#[derive(Debug)]
struct Pusher {
    stream_id: u32,
    tx: SyncSender<HandlerMessage>,
}

impl RequestContext {
    /// Context without server push (HTTP/1.1, or a dispatcher called directly)
    pub fn new(stream_id: Option<u32>, cancel: CancelToken) -> Self {
        RequestContext {
            stream_id,
            cancel,
            pusher: None,
        }
    }

    pub(crate) fn with_pusher(
        stream_id: u32,
        cancel: CancelToken,
        tx: SyncSender<HandlerMessage>,
    ) -> Self {
        RequestContext {
            stream_id: Some(stream_id),
            cancel,
            pusher: Some(Pusher { stream_id, tx }),
        }
    }

    /// HTTP/2 stream the request arrived on
    pub fn stream_id(&self) -> Option<u32> {
        self.stream_id
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// The stream was reset, timed out, or the connection is going away
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Push `resource` ahead of this request's response
    ///
    /// Blocks until the connection thread has accepted or refused the push
    /// and returns the promised stream id.
    pub fn push(&mut self, resource: PushResource) -> Result<u32, PushError> {
        let pusher = self.pusher.as_ref().ok_or(PushError::Unavailable)?;
        if self.cancel.is_cancelled() {
            return Err(PushError::GoingAway);
        }

        let (reply, answer) = mpsc::sync_channel(1);
        pusher
            .tx
            .send(HandlerMessage::Push {
                stream_id: pusher.stream_id,
                resource,
                reply,
            })
            .map_err(|_| PushError::GoingAway)?;
        answer.recv().map_err(|_| PushError::GoingAway)?
    }
}

/// Handler to connection thread
#[derive(Debug)]
pub(crate) enum HandlerMessage {
    /// Status and headers; the body is included unless `streaming`
    Response {
        stream_id: u32,
        response: HttpResponse,
        streaming: bool,
    },
    Data {
        stream_id: u32,
        data: Bytes,
    },
    /// Streaming body finished
    End {
        stream_id: u32,
    },
    Push {
        stream_id: u32,
        resource: PushResource,
        reply: SyncSender<Result<u32, PushError>>,
    },
    /// The handler panicked or its body producer failed
    Failed {
        stream_id: u32,
        panicked: bool,
    },
}

/// Run `dispatcher` for `request` on a new thread
///
/// `stream_id` keys the messages sent back on `tx`; HTTP/1.1 uses 0.
/// With a `budget`, a streamed body waits for credit before each chunk.
pub(crate) fn spawn_handler(
    dispatcher: Arc<dyn Dispatcher>,
    request: HttpRequest,
    mut ctx: RequestContext,
    stream_id: u32,
    tx: SyncSender<HandlerMessage>,
    budget: Option<Arc<OutboundBudget>>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("handler-{}", stream_id))
        .spawn(move || {
            let cancel = ctx.cancel.clone();
            let result =
                panic::catch_unwind(AssertUnwindSafe(|| dispatcher.dispatch(request, &mut ctx)));

            let mut response = match result {
                Ok(response) => response,
                Err(_) => {
                    warn!(stream_id, "handler panicked");
                    let _ = tx.send(HandlerMessage::Failed {
                        stream_id,
                        panicked: true,
                    });
                    return;
                }
            };

            if !response.is_streaming() {
                let _ = tx.send(HandlerMessage::Response {
                    stream_id,
                    response,
                    streaming: false,
                });
                return;
            }
            let ResponseBody::Stream(producer) = response.take_body() else {
                return;
            };

            if tx
                .send(HandlerMessage::Response {
                    stream_id,
                    response,
                    streaming: true,
                })
                .is_err()
            {
                return;
            }

            let mut writer = BodyWriter {
                stream_id,
                tx: tx.clone(),
                cancel: cancel.clone(),
                budget,
            };
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| producer(&mut writer)));
            let message = match outcome {
                Ok(Ok(())) => HandlerMessage::End { stream_id },
                Ok(Err(e)) => {
                    if cancel.is_cancelled() {
                        debug!(stream_id, "body producer stopped after cancellation");
                        return;
                    }
                    warn!(stream_id, error = %e, "body producer failed");
                    HandlerMessage::Failed {
                        stream_id,
                        panicked: false,
                    }
                }
                Err(_) => {
                    warn!(stream_id, "body producer panicked");
                    HandlerMessage::Failed {
                        stream_id,
                        panicked: true,
                    }
                }
            };
            let _ = tx.send(message);
        })
}

/// `io::Write` handed to streaming body producers
struct BodyWriter {
    stream_id: u32,
    tx: SyncSender<HandlerMessage>,
    cancel: CancelToken,
    budget: Option<Arc<OutboundBudget>>,
}

fn cancelled() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "request cancelled")
}

impl Write for BodyWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(cancelled());
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let mut buf = buf;
        if let Some(budget) = &self.budget {
            buf = &buf[..buf.len().min(budget.limit())];
            if !budget.acquire(buf.len(), &self.cancel) {
                return Err(cancelled());
            }
        }
        self.tx
            .send(HandlerMessage::Data {
                stream_id: self.stream_id,
                data: Bytes::copy_from_slice(buf),
            })
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "connection closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

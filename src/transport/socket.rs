//! # Connection Socket
//!
//! One live connection: an input [`ByteBuffer`], an [`OutboundQueue`], watermarks and an
//! idle timer, driven by a dedicated I/O task.
//!
//! The handle ([`ConnectionSocket`]) is cheap to clone and is what sessions hold. The
//! I/O task owns the stream exclusively, so the stream is shut down and dropped exactly
//! once, when the task exits. Both buffers sit behind one `std::sync::Mutex` that is
//! only taken for copies and never held across an `.await`.
//!
//! ## Events
//! The task reports to the owner over an mpsc channel:
//! - `DataReady` once the input holds at least `read_watermark.low` bytes (minimum 1)
//! - `Writable` when pending output drops to `write_watermark.low` after congestion
//! - `Timeout` after `idle_timeout` without a successful read or write
//! - `Error` on a read or write failure, after which the task exits
//! - `Closed` when the peer closes its side. Reading stops, but queued output keeps
//!   flushing until the handle closes the socket, so a command that arrived whole is
//!   still answered.
//!
//! ## Backpressure
//! The task never reads more than the input buffer can take. While the input is full the
//! stream is not polled at all and unread bytes stay in the kernel's receive buffer.
//! Draining the input through [`ConnectionSocket::with_input`] wakes the task again.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, instrument, trace, warn};

use crate::core::buffer::ByteBuffer;
use crate::core::queue::OutboundQueue;
use crate::error::SocketError;

pub use crate::config::{SocketConfig, Watermark};

/// Connection handle assigned by the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Notifications from a connection's I/O task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketEvent {
    DataReady,
    Writable,
    Timeout,
    Error(SocketError),
    Closed,
}

/// Byte counters of one connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketStats {
    pub bytes_read: u64,
    pub bytes_written: u64,
}

struct Buffers {
    input: ByteBuffer,
    output: OutboundQueue,
}

struct Shared {
    id: ConnectionId,
    remote: SocketAddr,
    config: SocketConfig,
    buffers: Mutex<Buffers>,
    wake: mpsc::Sender<()>,
    closed: AtomicBool,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl Shared {
    fn buffers(&self) -> MutexGuard<'_, Buffers> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Coalescing wake: a full channel already holds a pending wake
    fn wake(&self) {
        let _ = self.wake.try_send(());
    }
}

/// Handle to one live connection
#[derive(Clone)]
pub struct ConnectionSocket {
    shared: Arc<Shared>,
}

impl ConnectionSocket {
    /// Take ownership of `stream` and spawn its I/O task on the current runtime.
    ///
    /// Returns the handle and the receiver of the connection's events.
    pub fn spawn<S>(
        stream: S,
        id: ConnectionId,
        remote: SocketAddr,
        config: SocketConfig,
    ) -> (Self, mpsc::Receiver<SocketEvent>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        let (wake_tx, wake_rx) = mpsc::channel(1);

        let read_high = config.read_watermark.high;
        let write_high = config.write_watermark.high.max(1);
        let shared = Arc::new(Shared {
            id,
            remote,
            buffers: Mutex::new(Buffers {
                input: ByteBuffer::with_capacity(read_high),
                output: OutboundQueue::new(),
            }),
            config,
            wake: wake_tx,
            closed: AtomicBool::new(false),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        });

        let task = IoTask {
            stream,
            shared: Arc::clone(&shared),
            events: events_tx,
            wake: wake_rx,
            read_scratch: vec![0u8; read_high],
            write_scratch: vec![0u8; write_high],
            congested: false,
        };
        tokio::spawn(task.run());

        (Self { shared }, events_rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.shared.remote
    }

    pub fn config(&self) -> &SocketConfig {
        &self.shared.config
    }

    /// Queue `buffer` for writing and wake the I/O task.
    ///
    /// Never blocks. Empty buffers and sends after close are dropped. Write failures
    /// surface later as [`SocketEvent::Error`].
    pub fn send_async(&self, buffer: ByteBuffer) {
        if buffer.is_empty() || self.is_closed() {
            return;
        }
        self.shared.buffers().output.enqueue(buffer);
        self.shared.wake();
    }

    /// Run `f` against the input buffer.
    ///
    /// If the buffer was full and `f` made room, the I/O task resumes reading.
    pub fn with_input<R>(&self, f: impl FnOnce(&mut ByteBuffer) -> R) -> R {
        let (result, unblocked) = {
            let mut buffers = self.shared.buffers();
            let was_full = buffers.input.is_full();
            let result = f(&mut buffers.input);
            (result, was_full && !buffers.input.is_full())
        };
        if unblocked {
            self.shared.wake();
        }
        result
    }

    /// Readable bytes waiting in the input buffer
    pub fn input_len(&self) -> usize {
        self.shared.buffers().input.readable_len()
    }

    /// Bytes queued but not yet written
    pub fn pending_output(&self) -> usize {
        self.shared.buffers().output.pending_bytes()
    }

    /// Whether pending output exceeds the write watermark's upper bound
    pub fn is_congested(&self) -> bool {
        self.pending_output() > self.shared.config.write_watermark.high
    }

    /// Request a graceful close. Returns false if the socket was already closed.
    ///
    /// The I/O task flushes pending output for at most `linger`, then shuts the stream
    /// down.
    pub fn close(&self) -> bool {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        debug!(conn = %self.shared.id, "Close requested");
        self.shared.wake();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SocketStats {
        SocketStats {
            bytes_read: self.shared.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.shared.bytes_written.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for ConnectionSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSocket")
            .field("id", &self.shared.id)
            .field("remote", &self.shared.remote)
            .field("closed", &self.is_closed())
            .finish()
    }
}

enum Exit {
    Requested,
    Failed(SocketError),
    Abandoned,
}

enum Flush {
    Idle,
    Wrote,
    Stalled,
}

struct IoTask<S> {
    stream: S,
    shared: Arc<Shared>,
    events: mpsc::Sender<SocketEvent>,
    wake: mpsc::Receiver<()>,
    read_scratch: Vec<u8>,
    write_scratch: Vec<u8>,
    congested: bool,
}

impl<S> IoTask<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    #[instrument(skip(self), fields(conn = %self.shared.id, remote = %self.shared.remote))]
    async fn run(mut self) {
        let idle_timeout = self.shared.config.idle_timeout;
        let idle = time::sleep(idle_timeout);
        tokio::pin!(idle);

        let mut read_eof = false;

        let exit = loop {
            if self.shared.closed.load(Ordering::Acquire) {
                break Exit::Requested;
            }
            if self.events.is_closed() {
                break Exit::Abandoned;
            }

            match self.flush().await {
                Ok(Flush::Wrote) => idle.as_mut().reset(Instant::now() + idle_timeout),
                Ok(Flush::Idle) => {}
                Ok(Flush::Stalled) => {
                    let _ = self.events.send(SocketEvent::Timeout).await;
                }
                Err(err) => break Exit::Failed(err),
            }
            if self.shared.closed.load(Ordering::Acquire) {
                break Exit::Requested;
            }

            let room = if read_eof {
                0
            } else {
                self.shared.buffers().input.writable_len().min(self.read_scratch.len())
            };

            tokio::select! {
                result = self.stream.read(&mut self.read_scratch[..room]), if room > 0 => {
                    match result {
                        Ok(0) => {
                            debug!("Connection closed by peer");
                            read_eof = true;
                            // queued after any DataReady for the bytes already admitted
                            if self.events.send(SocketEvent::Closed).await.is_err() {
                                break Exit::Abandoned;
                            }
                        }
                        Ok(n) => {
                            self.admit(n);
                            idle.as_mut().reset(Instant::now() + idle_timeout);
                        }
                        Err(err) => {
                            warn!(error = %err, "Read failed");
                            break Exit::Failed(SocketError::ReadFailed);
                        }
                    }
                }
                _ = self.wake.recv() => {}
                _ = &mut idle => {
                    trace!("Idle timeout");
                    let _ = self.events.send(SocketEvent::Timeout).await;
                    idle.as_mut().reset(Instant::now() + idle_timeout);
                }
            }
        };

        self.shared.closed.store(true, Ordering::Release);
        match exit {
            Exit::Requested => {
                let linger = self.shared.config.linger;
                if time::timeout(linger, self.flush_all()).await.is_err() {
                    debug!(
                        pending = self.shared.buffers().output.pending_bytes(),
                        "Linger expired with pending output"
                    );
                }
                let _ = self.stream.shutdown().await;
                debug!("Connection closed locally");
            }
            Exit::Failed(err) => {
                let _ = self.events.send(SocketEvent::Error(err)).await;
            }
            Exit::Abandoned => {
                let _ = self.stream.shutdown().await;
                debug!("Connection handle dropped");
            }
        }
    }

    /// Append freshly read bytes to the input and signal the owner
    fn admit(&mut self, n: usize) {
        let readable = {
            let mut buffers = self.shared.buffers();
            if let Err(err) = buffers.input.write_bytes(&self.read_scratch[..n]) {
                // room is measured before every read
                warn!(error = %err, "Dropped bytes that did not fit the input buffer");
            }
            buffers.input.readable_len()
        };
        self.shared.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
        trace!(bytes = n, readable, "Read");

        if readable >= self.shared.config.read_watermark.low.max(1) {
            let _ = self.events.try_send(SocketEvent::DataReady);
        }
    }

    /// Write queued output until the queue is empty.
    ///
    /// Each write copies at most `write_watermark.high` bytes off the front packet and
    /// drains only what the stream accepted.
    async fn flush(&mut self) -> Result<Flush, SocketError> {
        let watermark = self.shared.config.write_watermark;
        let idle_timeout = self.shared.config.idle_timeout;
        let mut wrote = false;

        loop {
            let chunk = {
                let buffers = self.shared.buffers();
                let pending = buffers.output.pending_bytes();
                if pending > watermark.high {
                    self.congested = true;
                } else if self.congested && pending <= watermark.low {
                    self.congested = false;
                    let _ = self.events.try_send(SocketEvent::Writable);
                }
                let Some(front) = buffers.output.front() else {
                    break;
                };
                let n = front.readable_len().min(self.write_scratch.len());
                self.write_scratch[..n].copy_from_slice(&front.readable_slice()[..n]);
                n
            };

            let written =
                match time::timeout(idle_timeout, self.stream.write(&self.write_scratch[..chunk]))
                    .await
                {
                    Ok(Ok(0)) => return Err(SocketError::WriteFailed),
                    Ok(Ok(n)) => n,
                    Ok(Err(err)) => {
                        warn!(error = %err, "Write failed");
                        return Err(SocketError::WriteFailed);
                    }
                    Err(_) => return Ok(Flush::Stalled),
                };

            {
                let mut buffers = self.shared.buffers();
                if let Some(front) = buffers.output.front_mut() {
                    if front.drain(written).is_err() {
                        return Err(SocketError::Unknown);
                    }
                }
                buffers.output.dequeue_if_fully_drained();
            }
            self.shared.bytes_written.fetch_add(written as u64, Ordering::Relaxed);
            trace!(bytes = written, "Wrote");
            wrote = true;
        }

        Ok(if wrote { Flush::Wrote } else { Flush::Idle })
    }

    async fn flush_all(&mut self) {
        loop {
            match self.flush().await {
                Ok(Flush::Stalled) => continue,
                Ok(_) | Err(_) => return,
            }
        }
    }
}

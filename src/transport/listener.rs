//! # Connection Listener
//!
//! Binds the logon port and turns accepted TCP streams into [`ConnectionSocket`]s.
//!
//! Binding is separate from accepting so that a bind failure surfaces to the caller
//! before anything is spawned, and so tests can bind port 0 and read the chosen address.
//! The accept loop runs until a shutdown signal arrives or the event receiver is dropped.
//! Consecutive accept failures (descriptor exhaustion, for one) back off exponentially
//! from [`ACCEPT_BACKOFF_MIN`] up to [`ACCEPT_BACKOFF_MAX`].
//!
//! ## Usage
//! ```rust,no_run
//! use glyph_auth::config::SocketConfig;
//! use glyph_auth::transport::listener::{ConnectionListener, ListenerEvent};
//! use tokio::sync::mpsc;
//!
//! # async fn demo() -> glyph_auth::error::Result<()> {
//! let listener = ConnectionListener::bind("127.0.0.1:0".parse().unwrap(), SocketConfig::default()).await?;
//! let (events_tx, mut events) = mpsc::channel(32);
//! let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
//! tokio::spawn(listener.run(events_tx, shutdown_rx));
//!
//! while let Some(ListenerEvent::Accepted(socket, _socket_events)) = events.recv().await {
//!     println!("accepted {}", socket.remote_addr());
//! }
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{AuthError, Result};
use crate::transport::socket::{ConnectionId, ConnectionSocket, SocketConfig, SocketEvent};

pub const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
pub const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause after the `failures`-th accept error in a row
fn accept_backoff(failures: u32) -> Duration {
    ACCEPT_BACKOFF_MIN
        .saturating_mul(1u32 << failures.saturating_sub(1).min(16))
        .min(ACCEPT_BACKOFF_MAX)
}

/// Notifications from the accept loop
#[derive(Debug)]
pub enum ListenerEvent {
    /// A new connection with the receiver of its socket events
    Accepted(ConnectionSocket, mpsc::Receiver<SocketEvent>),
    /// `accept()` failed; the loop keeps running
    AcceptFailed(AuthError),
}

/// Bound TCP listener
pub struct ConnectionListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: SocketConfig,
    next_id: u64,
}

impl ConnectionListener {
    /// Bind `addr`. A failure here is fatal for the process.
    #[instrument(skip(config))]
    pub async fn bind(addr: SocketAddr, config: SocketConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AuthError::bind(addr, e))?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "Listening");
        Ok(Self {
            listener,
            local_addr,
            config,
            next_id: 1,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` fires or `events` is dropped
    #[instrument(skip_all, fields(address = %self.local_addr))]
    pub async fn run(
        mut self,
        events: mpsc::Sender<ListenerEvent>,
        mut shutdown: mpsc::Receiver<()>,
    ) {
        let mut failures = 0u32;
        loop {
            if failures > 0 {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("Listener shutting down");
                        return;
                    }
                    _ = time::sleep(accept_backoff(failures)) => {}
                }
            }

            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Listener shutting down");
                    return;
                }
                _ = events.closed() => {
                    debug!("Event receiver dropped, listener stopping");
                    return;
                }
                accept_result = self.listener.accept() => {
                    let event = match accept_result {
                        Ok((stream, remote)) => {
                            failures = 0;
                            if self.config.nodelay {
                                if let Err(e) = stream.set_nodelay(true) {
                                    warn!(error = %e, remote = %remote, "Failed to set TCP_NODELAY");
                                }
                            }
                            let id = ConnectionId(self.next_id);
                            self.next_id += 1;
                            debug!(conn = %id, remote = %remote, "Accepted connection");

                            let (socket, socket_events) =
                                ConnectionSocket::spawn(stream, id, remote, self.config.clone());
                            ListenerEvent::Accepted(socket, socket_events)
                        }
                        Err(e) => {
                            failures = failures.saturating_add(1);
                            error!(error = %e, failures, "Error accepting connection");
                            ListenerEvent::AcceptFailed(AuthError::Accept(e))
                        }
                    };
                    if let Err(mpsc::error::SendError(ListenerEvent::Accepted(socket, _))) =
                        events.send(event).await
                    {
                        socket.close();
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    #[test]
    fn test_accept_backoff_grows_and_caps() {
        assert_eq!(accept_backoff(1), ACCEPT_BACKOFF_MIN);
        assert_eq!(accept_backoff(2), ACCEPT_BACKOFF_MIN * 2);
        assert_eq!(accept_backoff(4), ACCEPT_BACKOFF_MIN * 8);
        assert_eq!(accept_backoff(8), ACCEPT_BACKOFF_MAX);
        assert_eq!(accept_backoff(u32::MAX), ACCEPT_BACKOFF_MAX);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_bind_error() {
        let first = ConnectionListener::bind("127.0.0.1:0".parse().unwrap(), SocketConfig::default())
            .await
            .unwrap();
        let err = ConnectionListener::bind(first.local_addr(), SocketConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AuthError::Bind { .. }));
        assert!(!err.is_session_fatal());
    }

    #[tokio::test]
    async fn test_ids_increase_per_accept() {
        let listener = ConnectionListener::bind("127.0.0.1:0".parse().unwrap(), SocketConfig::default())
            .await
            .unwrap();
        let addr = listener.local_addr();
        let (events_tx, mut events) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(listener.run(events_tx, shutdown_rx));

        let _a = TcpStream::connect(addr).await.unwrap();
        let _b = TcpStream::connect(addr).await.unwrap();

        let mut ids = Vec::new();
        for _ in 0..2 {
            match events.recv().await.unwrap() {
                ListenerEvent::Accepted(socket, _) => ids.push(socket.id()),
                ListenerEvent::AcceptFailed(e) => panic!("accept failed: {e}"),
            }
        }
        assert_eq!(ids, vec![ConnectionId(1), ConnectionId(2)]);

        shutdown_tx.send(()).await.unwrap();
        handle.await.unwrap();
    }
}

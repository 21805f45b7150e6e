//! # Auth Service
//!
//! Wires the listener, the session registry and the account directory together.
//!
//! [`AuthService::bind`] binds the logon port and returns a [`BoundService`], whose
//! [`run`](BoundService::run) loop admits connections, accounts for closed sessions and
//! logs metrics until shutdown is requested. Bind failures are returned to the caller.
//!
//! ## Shutdown
//! The listener stops first. Open sessions then get `shutdown_timeout` to finish their
//! handshake, after which the remaining ones are closed.

use std::future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::protocol::account::AccountDirectory;
use crate::protocol::session::{AuthSession, CloseReason, SessionContext};
use crate::service::registry::{SessionRegistry, SessionSignal};
use crate::transport::listener::{ConnectionListener, ListenerEvent};
use crate::transport::socket::{ConnectionSocket, SocketEvent};
use crate::utils::metrics::Metrics;

/// Unbound service
pub struct AuthService {
    config: AuthConfig,
    accounts: Arc<dyn AccountDirectory>,
    metrics: Arc<Metrics>,
}

impl AuthService {
    pub fn new(config: AuthConfig, accounts: Arc<dyn AccountDirectory>) -> Self {
        Self {
            config,
            accounts,
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Bind the configured address
    pub async fn bind(self) -> Result<BoundService> {
        let addr: SocketAddr = self
            .config
            .server
            .address
            .parse()
            .map_err(|_| AuthError::InvalidAddress(self.config.server.address.clone()))?;
        let listener = ConnectionListener::bind(addr, self.config.socket.clone()).await?;
        let (registry, signals) = SessionRegistry::new();
        let context = SessionContext {
            accounts: self.accounts,
            allowed_builds: Arc::from(self.config.server.allowed_builds.clone()),
            metrics: Arc::clone(&self.metrics),
        };
        Ok(BoundService {
            listener,
            registry,
            signals,
            context,
            metrics: self.metrics,
            config: self.config,
        })
    }

    /// Bind and serve until `shutdown` fires
    pub async fn run(self, shutdown: mpsc::Receiver<()>) -> Result<()> {
        self.bind().await?.run(shutdown).await
    }
}

/// Service with its port bound, ready to accept
pub struct BoundService {
    listener: ConnectionListener,
    registry: SessionRegistry,
    signals: mpsc::UnboundedReceiver<SessionSignal>,
    context: SessionContext,
    metrics: Arc<Metrics>,
    config: AuthConfig,
}

impl BoundService {
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> SessionRegistry {
        self.registry.clone()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Serve until `shutdown` fires or its sender is dropped
    #[instrument(skip_all, fields(address = %self.listener.local_addr()))]
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        let BoundService {
            listener,
            registry,
            mut signals,
            context,
            metrics,
            config,
        } = self;

        let (events_tx, mut events) = mpsc::channel(config.server.accept_queue);
        let (listener_shutdown, listener_shutdown_rx) = mpsc::channel(1);
        let listener_task = tokio::spawn(listener.run(events_tx, listener_shutdown_rx));

        let admission = Admission {
            registry: registry.clone(),
            context,
            max_connections: config.server.max_connections,
        };
        let mut metrics_tick = metrics_interval(&config);

        info!(
            max_connections = config.server.max_connections,
            "Auth service started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown requested");
                    break;
                }
                event = events.recv() => match event {
                    Some(ListenerEvent::Accepted(socket, socket_events)) => {
                        admission.admit(socket, socket_events);
                    }
                    Some(ListenerEvent::AcceptFailed(err)) => {
                        metrics.connection_error();
                        debug!(error = %err, "Accept failed");
                    }
                    None => {
                        warn!("Listener stopped unexpectedly");
                        break;
                    }
                },
                Some(signal) = signals.recv() => record_close(&metrics, signal),
                _ = tick(&mut metrics_tick) => metrics.log_metrics(),
            }
        }

        let _ = listener_shutdown.send(()).await;
        if let Err(e) = listener_task.await {
            warn!(error = %e, "Listener task failed");
        }
        // connections accepted after the last admit
        events.close();
        while let Some(event) = events.recv().await {
            if let ListenerEvent::Accepted(socket, _) = event {
                socket.close();
            }
        }

        let deadline = Instant::now() + config.server.shutdown_timeout;
        while !registry.is_empty() {
            match time::timeout_at(deadline, signals.recv()).await {
                Ok(Some(signal)) => record_close(&metrics, signal),
                Ok(None) => break,
                Err(_) => {
                    let closed = registry.close_all();
                    warn!(closed, "Shutdown timeout, closing remaining sessions");
                    break;
                }
            }
        }
        while let Ok(signal) = signals.try_recv() {
            record_close(&metrics, signal);
        }

        metrics.log_metrics();
        info!("Auth service stopped");
        Ok(())
    }
}

struct Admission {
    registry: SessionRegistry,
    context: SessionContext,
    max_connections: usize,
}

impl Admission {
    fn admit(&self, socket: ConnectionSocket, events: mpsc::Receiver<SocketEvent>) {
        if self.registry.len() >= self.max_connections {
            self.context.metrics.connection_rejected();
            warn!(
                conn = %socket.id(),
                remote = %socket.remote_addr(),
                limit = self.max_connections,
                "Session limit reached, rejecting connection"
            );
            socket.close();
            return;
        }

        self.context.metrics.connection_established();
        let context = self.context.clone();
        let handle = self
            .registry
            .start_session(socket, events, move |_, socket| AuthSession::new(socket, context));
        debug!(handle = %handle, "Session started");
    }
}

fn record_close(metrics: &Metrics, signal: SessionSignal) {
    let SessionSignal::Closed {
        handle,
        id,
        reason,
        stats,
    } = signal;
    metrics.connection_closed(stats.bytes_written, stats.bytes_read);
    match reason {
        CloseReason::Timeout => metrics.timeout(),
        CloseReason::Transport(_) => metrics.connection_error(),
        CloseReason::Protocol(_) => metrics.protocol_error(),
        CloseReason::PeerClosed | CloseReason::AuthenticationFailed | CloseReason::Requested => {}
    }
    info!(
        handle = %handle,
        conn = %id,
        reason = %reason,
        bytes_read = stats.bytes_read,
        bytes_written = stats.bytes_written,
        "Session closed"
    );
}

fn metrics_interval(config: &AuthConfig) -> Option<Interval> {
    let period = config.server.metrics_interval;
    if period.is_zero() {
        return None;
    }
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

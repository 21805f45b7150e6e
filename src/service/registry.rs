//! # Session Registry
//!
//! Generation-checked arena of live sessions.
//!
//! Every accepted connection gets a slot and a [`SessionHandle`] naming that slot and
//! its generation. Removing an entry bumps the generation, so a handle kept after its
//! session ended never resolves to a later occupant of the same slot. A secondary index
//! maps [`ConnectionId`]s to handles.
//!
//! ## Ownership
//! The registry holds a socket handle per entry, not the session: each session is moved
//! into its own task. An entry leaves the registry exactly once, either through
//! [`SessionRegistry::close_session`] or when the session task ends by itself, and
//! whichever path removes it emits the [`SessionSignal`].
//!
//! ## Thread Safety
//! One `std::sync::Mutex` guards the arena and the index. It is never held across an
//! `.await`; sockets are closed after the lock is released.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::protocol::session::{run_session, AuthSession, CloseReason};
use crate::transport::socket::{ConnectionId, ConnectionSocket, SocketEvent, SocketStats};

/// Generation-checked reference to a registry slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    index: u32,
    generation: u32,
}

impl SessionHandle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Lifecycle notifications for the owning service
#[derive(Debug)]
pub enum SessionSignal {
    Closed {
        handle: SessionHandle,
        id: ConnectionId,
        reason: CloseReason,
        stats: SocketStats,
    },
}

/// Counters exposed by [`SessionRegistry::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub active: usize,
    pub total_started: u64,
    pub total_closed: u64,
}

struct Slot {
    generation: u32,
    socket: Option<ConnectionSocket>,
}

#[derive(Default)]
struct Inner {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_connection: HashMap<ConnectionId, SessionHandle>,
    total_started: u64,
    total_closed: u64,
}

impl Inner {
    fn allocate(&mut self) -> SessionHandle {
        if let Some(index) = self.free.pop() {
            let generation = self.slots[index as usize].generation;
            return SessionHandle { index, generation };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            socket: None,
        });
        SessionHandle {
            index,
            generation: 0,
        }
    }

    fn resolve(&self, handle: SessionHandle) -> Option<&ConnectionSocket> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.socket.as_ref()
    }

    fn remove(&mut self, handle: SessionHandle) -> Option<ConnectionSocket> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let socket = slot.socket.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.by_connection.remove(&socket.id());
        self.total_closed += 1;
        Some(socket)
    }
}

/// Registry of live sessions, cheap to clone
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Mutex<Inner>>,
    signals: mpsc::UnboundedSender<SessionSignal>,
}

impl SessionRegistry {
    /// Create a registry and the receiver of its close signals
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionSignal>) {
        let (signals, signals_rx) = mpsc::unbounded_channel();
        (
            Self {
                inner: Arc::new(Mutex::new(Inner::default())),
                signals,
            },
            signals_rx,
        )
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `socket`, build its session with `factory` and spawn the session task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_session<F>(
        &self,
        socket: ConnectionSocket,
        events: mpsc::Receiver<SocketEvent>,
        factory: F,
    ) -> SessionHandle
    where
        F: FnOnce(SessionHandle, ConnectionSocket) -> AuthSession,
    {
        let mut inner = self.lock();
        let handle = inner.allocate();
        let id = socket.id();
        let session = factory(handle, socket.clone());

        let registry = self.clone();
        tokio::spawn(async move {
            let reason = run_session(session, events).await;
            registry.finish(handle, reason);
        });

        inner.slots[handle.index as usize].socket = Some(socket);
        inner.by_connection.insert(id, handle);
        inner.total_started += 1;
        trace!(handle = %handle, conn = %id, "Session registered");
        handle
    }

    /// Close and remove the session. Returns false for unknown or stale handles.
    pub fn close_session(&self, handle: SessionHandle) -> bool {
        let Some(socket) = self.lock().remove(handle) else {
            return false;
        };
        socket.close();
        self.signal(handle, &socket, CloseReason::Requested);
        true
    }

    pub fn close_connection(&self, id: ConnectionId) -> bool {
        let handle = self.lock().by_connection.get(&id).copied();
        handle.is_some_and(|handle| self.close_session(handle))
    }

    /// Close every live session. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let handles: Vec<SessionHandle> = self.lock().by_connection.values().copied().collect();
        handles
            .into_iter()
            .filter(|&handle| self.close_session(handle))
            .count()
    }

    pub fn contains(&self, handle: SessionHandle) -> bool {
        self.lock().resolve(handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().by_connection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStats {
        let inner = self.lock();
        RegistryStats {
            active: inner.by_connection.len(),
            total_started: inner.total_started,
            total_closed: inner.total_closed,
        }
    }

    /// Called by the session task once it ended by itself
    fn finish(&self, handle: SessionHandle, reason: CloseReason) {
        let Some(socket) = self.lock().remove(handle) else {
            return;
        };
        self.signal(handle, &socket, reason);
    }

    fn signal(&self, handle: SessionHandle, socket: &ConnectionSocket, reason: CloseReason) {
        debug!(handle = %handle, conn = %socket.id(), reason = %reason, "Session removed");
        let _ = self.signals.send(SessionSignal::Closed {
            handle,
            id: socket.id(),
            reason,
            stats: socket.stats(),
        });
    }
}

//! # Transport Layer
//!
//! TCP accept loop and the watermarked connection sockets it produces.

pub mod listener;
pub mod socket;

pub use listener::{ConnectionListener, ListenerEvent};
pub use socket::{ConnectionId, ConnectionSocket, SocketEvent, SocketStats};

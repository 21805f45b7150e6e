//! # Core Buffer Components
//!
//! Byte-level storage shared by the transport and protocol layers.
//!
//! ## Components
//! - **ByteBuffer**: fixed-capacity cursor buffer with little-endian typed access
//! - **OutboundQueue**: FIFO of packets waiting to be flushed to a connection
//!
//! ## Safety
//! - Every access is bounds-checked; failures never move a cursor
//! - Capacity is fixed at construction, so a connection's memory is bounded

pub mod buffer;
pub mod queue;

pub use buffer::{ByteBuffer, WireValue};
pub use queue::OutboundQueue;

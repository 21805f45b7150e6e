//! # Error Types
//!
//! Error handling for the authentication gateway.
//!
//! Errors are grouped by how far their damage reaches:
//! - **Buffer errors**: cursor underflow/overflow inside a single connection's framing
//! - **Framing errors**: unknown command ids, malformed payloads, commands sent in the wrong phase
//! - **SRP errors**: invalid client ephemeral, proof mismatch
//! - **Socket errors**: read/write failures reported by a connection's I/O task
//! - **Process errors**: listener bind failures and invalid configuration
//!
//! Everything except bind and configuration errors is fatal for one session only.
//! A short payload is *not* an error: handlers report it as
//! [`CommandOutcome::Incomplete`](crate::protocol::session::CommandOutcome) and the
//! session waits for more input.
//!
//! ## Example Usage
//! ```rust
//! use glyph_auth::core::buffer::ByteBuffer;
//! use glyph_auth::error::{AuthError, BufferError};
//!
//! let mut buf = ByteBuffer::with_capacity(4);
//! buf.write(7u16).unwrap();
//! match buf.read::<u32>() {
//!     Err(BufferError::Underflow { requested: 4, available: 2 }) => {}
//!     other => panic!("unexpected: {other:?}"),
//! }
//! let err: AuthError = BufferError::NotEmpty.into();
//! assert!(err.is_session_fatal());
//! ```

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Static error messages for hot paths.
pub mod constants {
    /// Framing
    pub const ERR_CHALLENGE_SIZE_MISMATCH: &str = "challenge size disagrees with account name length";
    pub const ERR_CHALLENGE_TOO_LARGE: &str = "challenge larger than the input buffer";
    pub const ERR_EMPTY_ACCOUNT_NAME: &str = "empty account name";
    pub const ERR_WRONG_COMMAND: &str = "payload decoded under the wrong command id";
    pub const ERR_TRUNCATED_PROOF: &str = "truncated proof";
}

/// Cursor errors raised by [`ByteBuffer`](crate::core::buffer::ByteBuffer).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    #[error("buffer underflow: requested {requested} bytes, {available} readable")]
    Underflow { requested: usize, available: usize },

    #[error("buffer overflow: requested {requested} bytes, {available} writable")]
    Overflow { requested: usize, available: usize },

    #[error("buffer reset while it still holds readable bytes")]
    NotEmpty,
}

/// Errors raised while framing the command stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("unknown command id 0x{0:02X}")]
    UnknownCommand(u8),

    #[error("malformed payload: {0}")]
    Malformed(&'static str),

    #[error("command {command} not valid in phase {phase}")]
    UnexpectedCommand {
        command: &'static str,
        phase: &'static str,
    },
}

/// SRP6 verification failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrpError {
    #[error("client public ephemeral is zero modulo N")]
    InvalidPublicKey,

    #[error("client proof does not match")]
    ProofMismatch,
}

/// Transport failures surfaced by a connection's I/O task.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketError {
    #[error("reading from socket failed")]
    ReadFailed,

    #[error("writing to socket failed")]
    WriteFailed,

    #[error("unknown transport error")]
    Unknown,
}

/// AuthError is the primary error type of the crate
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to accept connection: {0}")]
    Accept(io::Error),

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("SRP error: {0}")]
    Srp(#[from] SrpError),

    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AuthError {
    /// Whether the error ends one session without touching the rest of the process.
    pub fn is_session_fatal(&self) -> bool {
        !matches!(
            self,
            AuthError::Bind { .. } | AuthError::ConfigError(_) | AuthError::InvalidAddress(_)
        )
    }

    pub(crate) fn bind(addr: SocketAddr, source: io::Error) -> Self {
        AuthError::Bind {
            addr: addr.to_string(),
            source,
        }
    }
}

/// Type alias for Results using AuthError
pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_errors_are_process_fatal() {
        let err = AuthError::bind(
            "127.0.0.1:3724".parse().unwrap(),
            io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        );
        assert!(!err.is_session_fatal());
        assert!(err.to_string().contains("127.0.0.1:3724"));
    }

    #[test]
    fn test_framing_errors_are_session_fatal() {
        let err: AuthError = FramingError::UnknownCommand(0x7F).into();
        assert!(err.is_session_fatal());
        assert_eq!(err.to_string(), "Framing error: unknown command id 0x7F");
    }
}

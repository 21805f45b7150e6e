//! # Logon Protocol
//!
//! Everything between raw connection bytes and an authenticated client.
//!
//! ## Components
//! - **command**: command ids, result codes, request decoders and response builders
//! - **srp**: SRP6 verifier, server and client computations
//! - **account**: account lookup behind the [`AccountDirectory`] trait
//! - **session**: the per-connection state machine and its driver

pub mod account;
pub mod command;
pub mod session;
pub mod srp;


pub use account::{AccountCredential, AccountDirectory, InMemoryAccountDirectory};
pub use command::{AuthCommand, AuthResult};
pub use session::{run_session, AuthSession, CloseReason, Phase, SessionContext};

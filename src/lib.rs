//! # Glyph Auth
//!
//! SRP6 logon gateway for the classic game client family.
//!
//! A client connects, sends a logon challenge naming its account, receives the server's
//! SRP6 ephemeral and salt, and answers with its own ephemeral and proof. The gateway
//! never sees a password: accounts are stored as salted verifiers.
//!
//! ## Layers
//! - [`core`]: bounds-checked byte buffers and the outbound packet queue
//! - [`transport`]: listener and per-connection sockets with watermark backpressure
//! - [`protocol`]: wire formats, SRP6 and the session state machine
//! - [`service`]: session registry and the service loop
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging and metrics
//!
//! ## Usage
//! ```rust,no_run
//! use std::sync::Arc;
//! use glyph_auth::config::AuthConfig;
//! use glyph_auth::protocol::InMemoryAccountDirectory;
//! use glyph_auth::service::AuthService;
//! use tokio::sync::mpsc;
//!
//! # async fn demo() -> glyph_auth::error::Result<()> {
//! let config = AuthConfig::default();
//! let accounts = Arc::new(InMemoryAccountDirectory::new());
//! accounts.insert_with_password("player", "secret");
//!
//! let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
//! AuthService::new(config, accounts).run(shutdown_rx).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use error::{AuthError, Result};

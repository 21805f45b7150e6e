//! # Service Layer
//!
//! Session bookkeeping and the service loop that owns it.

pub mod auth_service;
pub mod registry;

pub use auth_service::{AuthService, BoundService};
pub use registry::{RegistryStats, SessionHandle, SessionRegistry, SessionSignal};

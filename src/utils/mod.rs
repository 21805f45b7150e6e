//! # Utility Modules
//!
//! Ambient support shared by the service and the sessions.
//!
//! ## Components
//! - **Logging**: installs the `tracing` subscriber from [`LoggingConfig`](crate::config::LoggingConfig)
//! - **Metrics**: atomic service counters and an operation timer

pub mod logging;
pub mod metrics;

pub use metrics::{Metrics, MetricsSnapshot};

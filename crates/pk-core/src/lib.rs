//! pk-core: Core abstractions and configuration for portkeep
//!
//! This crate provides the forwarding rule types, the configuration loader,
//! and the tunnel capability traits consumed by the daemon.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{ConfigError, PkError, TunnelError};
pub use types::{AuthMethod, ForwardRule};

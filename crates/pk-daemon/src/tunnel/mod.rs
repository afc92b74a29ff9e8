//! SSH implementation of the tunnel capability

mod relay;
mod ssh;

pub use ssh::{SshTunnel, SshTunnelFactory};

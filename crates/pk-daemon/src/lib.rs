//! pk-daemon: Keeps SSH port forwards alive
//!
//! One [`supervisor::RuleSupervisor`] per forwarding rule drives a tunnel
//! through a start/observe/retry loop. The [`supervisor::SupervisorSet`]
//! runs them all against a shared cancellation token which the
//! [`shutdown`] coordinator fires on SIGINT or SIGTERM.

pub mod shutdown;
pub mod supervisor;
pub mod tunnel;

pub use supervisor::{RuleSupervisor, SupervisorReport, SupervisorSet, TunnelSettings};
pub use tunnel::{SshTunnel, SshTunnelFactory};

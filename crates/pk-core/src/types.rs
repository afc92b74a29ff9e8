//! Core domain types

use std::fmt;
use std::path::PathBuf;

/// One (local port, remote port) pair to keep forwarded.
///
/// Decoded from either a bare integer or a `{ local_port, remote_port }`
/// table; see [`crate::config`] for the accepted shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ForwardRule {
    /// Port bound on the local loopback interface
    pub local_port: u16,
    /// Port connected to on the remote side of the SSH session
    pub remote_port: u16,
}

impl ForwardRule {
    /// Create a rule forwarding `local_port` to `remote_port`
    pub fn new(local_port: u16, remote_port: u16) -> Self {
        Self {
            local_port,
            remote_port,
        }
    }

    /// Create a rule that forwards a port to the same port number remotely
    pub fn same(port: u16) -> Self {
        Self::new(port, port)
    }
}

impl fmt::Display for ForwardRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.local_port, self.remote_port)
    }
}

/// How a tunnel authenticates to the SSH server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Public key auth with the private key at this path
    KeyFile(PathBuf),
    /// Public key auth using identities held by the SSH agent
    Agent,
}

impl AuthMethod {
    /// Select key file auth for a non-empty path, agent auth otherwise
    pub fn from_key(key: &str) -> Self {
        if key.is_empty() {
            AuthMethod::Agent
        } else {
            AuthMethod::KeyFile(PathBuf::from(key))
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::KeyFile(path) => write!(f, "key file {}", path.display()),
            AuthMethod::Agent => write!(f, "ssh-agent"),
        }
    }
}

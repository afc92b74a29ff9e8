//! Tunnel capability traits
//!
//! A [`Tunnel`] is one forwarded listener: it owns its SSH session, accepts
//! local clients and relays them to the remote port. The supervisor only
//! relies on the surface defined here, so any transport can stand in for
//! SSH (tests use an in-memory fake).

use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;

use crate::error::TunnelError;
use crate::types::AuthMethod;

/// Tunnel lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// Connecting and authenticating
    Starting,
    /// Listening locally and forwarding
    Started,
    /// Not running
    Stopped,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelState::Starting => write!(f, "Starting"),
            TunnelState::Started => write!(f, "Started"),
            TunnelState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Phase of a single forwarded client connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Local client accepted
    Accepted,
    /// Remote channel open, bytes are flowing
    Ready,
    /// Both directions finished
    Closed {
        /// Bytes sent from the local client to the remote port
        sent: u64,
        /// Bytes received from the remote port
        received: u64,
    },
    /// Forwarding failed for this client
    Failed(String),
}

/// Event describing one tunneled connection
#[derive(Debug, Clone)]
pub struct TunneledConnection {
    /// Address of the local client
    pub peer: SocketAddr,
    /// What just happened
    pub phase: ConnectionPhase,
    /// When it happened
    pub at: SystemTime,
}

impl TunneledConnection {
    /// Create an event stamped with the current time
    pub fn new(peer: SocketAddr, phase: ConnectionPhase) -> Self {
        Self {
            peer,
            phase,
            at: SystemTime::now(),
        }
    }
}

impl fmt::Display for TunneledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.phase {
            ConnectionPhase::Accepted => write!(f, "{} accepted", self.peer),
            ConnectionPhase::Ready => write!(f, "{} ready", self.peer),
            ConnectionPhase::Closed { sent, received } => write!(
                f,
                "{} closed ({} bytes sent, {} bytes received)",
                self.peer, sent, received
            ),
            ConnectionPhase::Failed(reason) => write!(f, "{} failed: {}", self.peer, reason),
        }
    }
}

/// Callback receiving tunnel state transitions
pub type StateObserver = Arc<dyn Fn(TunnelState) + Send + Sync>;

/// Callback receiving tunneled connection events
pub type ConnectionObserver = Arc<dyn Fn(&TunneledConnection) + Send + Sync>;

/// One forwarded listener with start/observe/stop semantics
#[async_trait]
pub trait Tunnel: Send {
    /// Configure authentication
    fn set_auth(&mut self, auth: AuthMethod);

    /// Configure the remote user name
    fn set_user(&mut self, user: String);

    /// Register the state transition callback
    fn set_state_observer(&mut self, observer: StateObserver);

    /// Register the per-connection callback
    fn set_connection_observer(&mut self, observer: ConnectionObserver);

    /// Run the tunnel until it fails or `cancel` fires.
    ///
    /// Returns `Ok(())` when cancellation ended the tunnel and an error when
    /// it stopped for any other reason.
    async fn start(&mut self, cancel: CancellationToken) -> Result<(), TunnelError>;
}

/// Builds fresh tunnel instances
pub trait TunnelFactory: Send + Sync + 'static {
    /// The tunnel type produced
    type Tunnel: Tunnel + 'static;

    /// Create a tunnel forwarding `local_port` to `remote_port` through `host`
    fn create(&self, local_port: u16, host: &str, remote_port: u16) -> Self::Tunnel;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tunnel_state_display() {
        assert_eq!(TunnelState::Starting.to_string(), "Starting");
        assert_eq!(TunnelState::Started.to_string(), "Started");
        assert_eq!(TunnelState::Stopped.to_string(), "Stopped");
    }

    #[test]
    fn test_tunneled_connection_display() {
        let peer: SocketAddr = "127.0.0.1:50123".parse().unwrap();

        let event = TunneledConnection::new(peer, ConnectionPhase::Accepted);
        assert_eq!(event.to_string(), "127.0.0.1:50123 accepted");

        let event = TunneledConnection::new(
            peer,
            ConnectionPhase::Closed {
                sent: 12,
                received: 340,
            },
        );
        assert_eq!(
            event.to_string(),
            "127.0.0.1:50123 closed (12 bytes sent, 340 bytes received)"
        );

        let event = TunneledConnection::new(peer, ConnectionPhase::Failed("refused".into()));
        assert_eq!(event.to_string(), "127.0.0.1:50123 failed: refused");
    }

    /// Minimal tunnel honouring the start contract
    struct Loopback {
        observer: Option<StateObserver>,
    }

    #[async_trait]
    impl Tunnel for Loopback {
        fn set_auth(&mut self, _auth: AuthMethod) {}

        fn set_user(&mut self, _user: String) {}

        fn set_state_observer(&mut self, observer: StateObserver) {
            self.observer = Some(observer);
        }

        fn set_connection_observer(&mut self, _observer: ConnectionObserver) {}

        async fn start(&mut self, cancel: CancellationToken) -> Result<(), TunnelError> {
            let notify = |state| {
                if let Some(observer) = &self.observer {
                    observer(state);
                }
            };
            notify(TunnelState::Starting);
            notify(TunnelState::Started);
            cancel.cancelled().await;
            notify(TunnelState::Stopped);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_boxed_tunnel_reports_states_until_cancelled() {
        let states = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&states);

        let mut tunnel: Box<dyn Tunnel> = Box::new(Loopback { observer: None });
        tunnel.set_state_observer(Arc::new(move |state| sink.lock().unwrap().push(state)));

        let cancel = CancellationToken::new();
        cancel.cancel();
        tunnel.start(cancel).await.unwrap();

        assert_eq!(
            *states.lock().unwrap(),
            vec![
                TunnelState::Starting,
                TunnelState::Started,
                TunnelState::Stopped
            ]
        );
    }
}

//! In-memory tunnel used by the supervisor tests

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use pk_core::traits::{
    ConnectionObserver, ConnectionPhase, StateObserver, Tunnel, TunnelFactory, TunnelState,
    TunneledConnection,
};
use pk_core::{AuthMethod, TunnelError};

/// What every fake tunnel does when started
#[derive(Debug, Clone, Copy)]
pub(crate) enum Behavior {
    /// Report Starting then Stopped and return an error immediately
    Fail,
    /// Report Starting and Started, serve one client, then report Stopped
    /// and return `Ok` immediately
    EndCleanly,
    /// Report Starting and Started, serve one client, then block until
    /// cancelled
    RunUntilCancelled,
}

/// Everything recorded about one created tunnel
#[derive(Debug, Clone)]
pub(crate) struct Created {
    pub local_port: u16,
    pub host: String,
    pub remote_port: u16,
    pub user: Option<String>,
    pub auth: Option<AuthMethod>,
    pub started_at: Option<Instant>,
    pub states: Vec<TunnelState>,
    pub has_connection_observer: bool,
}

pub(crate) struct FakeFactory {
    behavior: Behavior,
    created: Arc<Mutex<Vec<Created>>>,
}

impl FakeFactory {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            created: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn created(&self) -> Vec<Created> {
        self.created.lock().unwrap().clone()
    }

    pub fn start_times(&self) -> Vec<Instant> {
        self.created()
            .into_iter()
            .filter_map(|c| c.started_at)
            .collect()
    }

    /// States reported through the observer by the `index`th tunnel
    pub fn states(&self, index: usize) -> Vec<TunnelState> {
        self.created()[index].states.clone()
    }
}

impl TunnelFactory for FakeFactory {
    type Tunnel = FakeTunnel;

    fn create(&self, local_port: u16, host: &str, remote_port: u16) -> FakeTunnel {
        let mut created = self.created.lock().unwrap();
        created.push(Created {
            local_port,
            host: host.to_string(),
            remote_port,
            user: None,
            auth: None,
            started_at: None,
            states: Vec::new(),
            has_connection_observer: false,
        });

        FakeTunnel {
            index: created.len() - 1,
            behavior: self.behavior,
            created: Arc::clone(&self.created),
            state_observer: None,
            connection_observer: None,
        }
    }
}

pub(crate) struct FakeTunnel {
    index: usize,
    behavior: Behavior,
    created: Arc<Mutex<Vec<Created>>>,
    state_observer: Option<StateObserver>,
    connection_observer: Option<ConnectionObserver>,
}

impl FakeTunnel {
    fn record<R>(&self, f: impl FnOnce(&mut Created) -> R) -> R {
        let mut created = self.created.lock().unwrap();
        f(&mut created[self.index])
    }

    fn notify(&self, state: TunnelState) {
        self.record(|c| c.states.push(state));
        if let Some(observer) = &self.state_observer {
            observer(state);
        }
    }

    /// Simulate one client that connects and disconnects
    fn serve_one_client(&self) {
        if let Some(observer) = &self.connection_observer {
            let peer = SocketAddr::from(([127, 0, 0, 1], 40000));
            observer(&TunneledConnection::new(peer, ConnectionPhase::Accepted));
            observer(&TunneledConnection::new(
                peer,
                ConnectionPhase::Closed {
                    sent: 4,
                    received: 4,
                },
            ));
        }
    }
}

#[async_trait]
impl Tunnel for FakeTunnel {
    fn set_auth(&mut self, auth: AuthMethod) {
        self.record(|c| c.auth = Some(auth));
    }

    fn set_user(&mut self, user: String) {
        self.record(|c| c.user = Some(user));
    }

    fn set_state_observer(&mut self, observer: StateObserver) {
        self.state_observer = Some(observer);
    }

    fn set_connection_observer(&mut self, observer: ConnectionObserver) {
        self.record(|c| c.has_connection_observer = true);
        self.connection_observer = Some(observer);
    }

    async fn start(&mut self, cancel: CancellationToken) -> Result<(), TunnelError> {
        self.record(|c| c.started_at = Some(Instant::now()));
        self.notify(TunnelState::Starting);

        let result = match self.behavior {
            Behavior::Fail => Err(TunnelError::SessionLost("fake failure".to_string())),
            Behavior::EndCleanly => {
                self.notify(TunnelState::Started);
                self.serve_one_client();
                Ok(())
            }
            Behavior::RunUntilCancelled => {
                self.notify(TunnelState::Started);
                self.serve_one_client();
                cancel.cancelled().await;
                Ok(())
            }
        };

        self.notify(TunnelState::Stopped);
        result
    }
}

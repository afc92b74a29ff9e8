//! SSH local port forwarding
//!
//! Each [`SshTunnel`] opens its own SSH session, binds the local port on
//! loopback and relays every accepted client through a `direct-tcpip`
//! channel to the remote port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::{ChannelOpenFailure, Disconnect};
use russh_keys::key::PublicKey;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::{CancellationToken, DropGuard};

use pk_core::config::{ForwardConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_SSH_PORT};
use pk_core::traits::{
    ConnectionObserver, ConnectionPhase, StateObserver, Tunnel, TunnelFactory, TunnelState,
    TunneledConnection,
};
use pk_core::{AuthMethod, TunnelError};

use super::relay::relay;

/// Local address the forwarded port is bound on
const LOCAL_BIND_HOST: &str = "127.0.0.1";

/// Host the remote side connects to for each forwarded client
const REMOTE_TARGET_HOST: &str = "localhost";

/// Pause after a failed accept, scaled by the number of failures in a row
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

/// Upper bound on the pause between failing accepts
const MAX_ACCEPT_ERROR_DELAY: Duration = Duration::from_secs(2);

fn accept_error_delay(consecutive_failures: u32) -> Duration {
    ACCEPT_ERROR_DELAY
        .saturating_mul(consecutive_failures.max(1))
        .min(MAX_ACCEPT_ERROR_DELAY)
}

/// Builds [`SshTunnel`]s sharing one SSH port and connect timeout
#[derive(Debug, Clone)]
pub struct SshTunnelFactory {
    ssh_port: u16,
    connect_timeout: Duration,
}

impl SshTunnelFactory {
    /// Create a factory for tunnels through `ssh_port`
    pub fn new(ssh_port: u16, connect_timeout: Duration) -> Self {
        Self {
            ssh_port,
            connect_timeout,
        }
    }

    /// Take the SSH port and connect timeout from the configuration
    pub fn from_config(config: &ForwardConfig) -> Self {
        Self::new(config.port, config.connect_timeout)
    }
}

impl Default for SshTunnelFactory {
    fn default() -> Self {
        Self::new(DEFAULT_SSH_PORT, DEFAULT_CONNECT_TIMEOUT)
    }
}

impl TunnelFactory for SshTunnelFactory {
    type Tunnel = SshTunnel;

    fn create(&self, local_port: u16, host: &str, remote_port: u16) -> SshTunnel {
        SshTunnel::new(local_port, host, remote_port)
            .with_ssh_port(self.ssh_port)
            .with_connect_timeout(self.connect_timeout)
    }
}

/// One SSH-forwarded local port
pub struct SshTunnel {
    local_port: u16,
    host: String,
    remote_port: u16,
    ssh_port: u16,
    connect_timeout: Duration,
    user: String,
    auth: AuthMethod,
    state_observer: Option<StateObserver>,
    connection_observer: Option<ConnectionObserver>,
}

impl SshTunnel {
    /// Create a tunnel forwarding `local_port` to `remote_port` on `host`.
    ///
    /// Defaults to SSH port 22 and agent authentication.
    pub fn new(local_port: u16, host: impl Into<String>, remote_port: u16) -> Self {
        Self {
            local_port,
            host: host.into(),
            remote_port,
            ssh_port: DEFAULT_SSH_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user: String::new(),
            auth: AuthMethod::Agent,
            state_observer: None,
            connection_observer: None,
        }
    }

    /// Use a non-default SSH server port
    pub fn with_ssh_port(mut self, port: u16) -> Self {
        self.ssh_port = port;
        self
    }

    /// Override the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn ssh_address(&self) -> String {
        format!("{}:{}", self.host, self.ssh_port)
    }

    fn notify(&self, state: TunnelState) {
        if let Some(observer) = &self.state_observer {
            observer(state);
        }
    }

    /// Load credentials, connect and authenticate.
    ///
    /// The returned token is cancelled once the SSH session has ended.
    async fn establish(&self) -> Result<(Handle<ClientHandler>, CancellationToken), TunnelError> {
        // Fail before touching the network if the key is unusable
        let key = match &self.auth {
            AuthMethod::KeyFile(path) => Some(Arc::new(
                russh_keys::load_secret_key(path, None).map_err(|e| TunnelError::KeyNotFound {
                    path: path.clone(),
                    message: e.to_string(),
                })?,
            )),
            AuthMethod::Agent => None,
        };

        let address = self.ssh_address();
        let session_closed = CancellationToken::new();
        let handler = ClientHandler::new(session_closed.clone().drop_guard());

        tracing::debug!("Connecting to {}", address);
        let mut session = tokio::time::timeout(
            self.connect_timeout,
            client::connect(Arc::new(Config::default()), address.as_str(), handler),
        )
        .await
        .map_err(|_| TunnelError::Connect {
            address: address.clone(),
            message: format!("Connection timed out after {:?}", self.connect_timeout),
        })?
        .map_err(|e| TunnelError::Connect {
            address: address.clone(),
            message: e.to_string(),
        })?;

        tracing::debug!("Authenticating as user '{}'", self.user);
        let authenticated = match key {
            Some(key) => session
                .authenticate_publickey(&self.user, key)
                .await
                .map_err(|e| TunnelError::Ssh(format!("Authentication error: {}", e)))?,
            None => authenticate_with_agent(&mut session, &self.user).await?,
        };

        if !authenticated {
            return Err(TunnelError::AuthRejected(self.user.clone()));
        }

        Ok((session, session_closed))
    }

    /// Accept local clients until the session ends or `cancel` fires
    async fn forward(
        &self,
        session: Arc<Handle<ClientHandler>>,
        session_closed: CancellationToken,
        cancel: &CancellationToken,
    ) -> Result<(), TunnelError> {
        let listener = TcpListener::bind((LOCAL_BIND_HOST, self.local_port))
            .await
            .map_err(|source| TunnelError::Bind {
                port: self.local_port,
                source,
            })?;

        tracing::info!(
            "Listening on {}:{}, forwarding to {}:{} via {}",
            LOCAL_BIND_HOST,
            self.local_port,
            REMOTE_TARGET_HOST,
            self.remote_port,
            self.ssh_address()
        );
        self.notify(TunnelState::Started);

        let mut accept_failures: u32 = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = session_closed.cancelled() => {
                    return Err(TunnelError::SessionLost(format!(
                        "connection to {} closed",
                        self.ssh_address()
                    )));
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        accept_failures = 0;
                        tokio::spawn(forward_connection(
                            Arc::clone(&session),
                            stream,
                            peer,
                            self.remote_port,
                            self.connection_observer.clone(),
                        ));
                    }
                    Err(e) => {
                        accept_failures = accept_failures.saturating_add(1);
                        let delay = accept_error_delay(accept_failures);
                        tracing::warn!(
                            "Failed to accept connection ({} in a row), pausing {:?}: {}",
                            accept_failures,
                            delay,
                            e
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => return Ok(()),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                },
            }
        }
    }

    /// One full session: establish, forward, disconnect
    async fn run(&self, cancel: &CancellationToken) -> Result<(), TunnelError> {
        let (session, session_closed) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            established = self.establish() => established?,
        };

        let session = Arc::new(session);
        let result = self
            .forward(Arc::clone(&session), session_closed, cancel)
            .await;

        if let Err(e) = session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!("Failed to disconnect gracefully: {}", e);
        }
        result
    }
}

#[async_trait]
impl Tunnel for SshTunnel {
    fn set_auth(&mut self, auth: AuthMethod) {
        self.auth = auth;
    }

    fn set_user(&mut self, user: String) {
        self.user = user;
    }

    fn set_state_observer(&mut self, observer: StateObserver) {
        self.state_observer = Some(observer);
    }

    fn set_connection_observer(&mut self, observer: ConnectionObserver) {
        self.connection_observer = Some(observer);
    }

    async fn start(&mut self, cancel: CancellationToken) -> Result<(), TunnelError> {
        self.notify(TunnelState::Starting);
        let result = self.run(&cancel).await;
        self.notify(TunnelState::Stopped);
        result
    }
}

/// Open a channel for one accepted client and relay it
async fn forward_connection(
    session: Arc<Handle<ClientHandler>>,
    stream: TcpStream,
    peer: SocketAddr,
    remote_port: u16,
    observer: Option<ConnectionObserver>,
) {
    let notify = |phase: ConnectionPhase| {
        if let Some(observer) = &observer {
            observer(&TunneledConnection::new(peer, phase));
        }
    };

    notify(ConnectionPhase::Accepted);

    let channel = match session
        .channel_open_direct_tcpip(
            REMOTE_TARGET_HOST,
            u32::from(remote_port),
            peer.ip().to_string(),
            u32::from(peer.port()),
        )
        .await
    {
        Ok(channel) => channel,
        Err(russh::Error::ChannelOpenFailure(reason)) => {
            notify(ConnectionPhase::Failed(describe_open_failure(reason)));
            return;
        }
        Err(e) => {
            notify(ConnectionPhase::Failed(format!("Failed to open channel: {}", e)));
            return;
        }
    };

    relay(stream, channel.into_stream(), peer, observer.clone()).await;
}

fn describe_open_failure(reason: ChannelOpenFailure) -> String {
    format!("remote refused the channel ({:?})", reason)
}

#[cfg(unix)]
async fn authenticate_with_agent(
    session: &mut Handle<ClientHandler>,
    user: &str,
) -> Result<bool, TunnelError> {
    use russh_keys::agent::client::AgentClient;

    let mut agent = AgentClient::connect_env()
        .await
        .map_err(|e| TunnelError::Agent(format!("Failed to connect to agent: {}", e)))?;

    let identities = agent
        .request_identities()
        .await
        .map_err(|e| TunnelError::Agent(format!("Failed to list identities: {}", e)))?;

    if identities.is_empty() {
        return Err(TunnelError::Agent("agent holds no identities".to_string()));
    }

    for key in identities {
        let fingerprint = key.fingerprint();
        let (returned, result) = session.authenticate_future(user, key, agent).await;
        agent = returned;

        match result {
            Ok(true) => {
                tracing::debug!("Authenticated with agent identity {}", fingerprint);
                return Ok(true);
            }
            Ok(false) => tracing::debug!("Agent identity {} rejected", fingerprint),
            Err(e) => tracing::debug!("Agent identity {} failed: {:?}", fingerprint, e),
        }
    }

    Ok(false)
}

#[cfg(not(unix))]
async fn authenticate_with_agent(
    _session: &mut Handle<ClientHandler>,
    _user: &str,
) -> Result<bool, TunnelError> {
    Err(TunnelError::Agent(
        "agent authentication is only supported on unix".to_string(),
    ))
}

/// SSH client handler for a tunnel session
struct ClientHandler {
    /// Cancels the session-closed token when russh drops the handler
    _closed: DropGuard,
}

impl ClientHandler {
    fn new(closed: DropGuard) -> Self {
        Self { _closed: closed }
    }
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    /// Host keys are not pinned; the fingerprint is logged for the operator
    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!("Server host key: {}", server_public_key.fingerprint());
        Ok(true)
    }
}

//! Tunnel supervision
//!
//! A [`RuleSupervisor`] keeps one forwarding rule tunneled: it builds a
//! fresh tunnel, runs it until it ends, waits the retry interval and starts
//! over. Only cancellation ends the loop. Tunnel errors are logged and never
//! leave the supervisor.

mod set;
#[cfg(test)]
pub(crate) mod testing;

pub use set::SupervisorSet;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use pk_core::config::ForwardConfig;
use pk_core::traits::{
    ConnectionPhase, Tunnel, TunnelFactory, TunnelState, TunneledConnection,
};
use pk_core::{AuthMethod, ForwardRule};

/// Connection parameters shared by every rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSettings {
    /// SSH server host
    pub host: String,
    /// Remote user name
    pub user: String,
    /// Key file or agent
    pub auth: AuthMethod,
}

impl TunnelSettings {
    /// Extract the per-tunnel settings from the configuration
    pub fn from_config(config: &ForwardConfig) -> Self {
        Self {
            host: config.host.clone(),
            user: config.user.clone(),
            auth: config.auth_method(),
        }
    }
}

/// Summary returned when a supervisor's loop ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorReport {
    /// The rule that was supervised
    pub rule: ForwardRule,
    /// Number of tunnel start attempts made
    pub attempts: u64,
    /// Number of client connections accepted across all tunnels
    pub connections: u64,
}

/// Keeps a single forwarding rule tunneled until cancelled
pub struct RuleSupervisor<F: TunnelFactory> {
    rule: ForwardRule,
    settings: Arc<TunnelSettings>,
    factory: Arc<F>,
    retry_interval: Duration,
    state_tx: Arc<watch::Sender<Option<TunnelState>>>,
    connections: Arc<AtomicU64>,
}

impl<F: TunnelFactory> RuleSupervisor<F> {
    /// Create a supervisor for `rule`
    pub fn new(
        rule: ForwardRule,
        settings: Arc<TunnelSettings>,
        factory: Arc<F>,
        retry_interval: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(None);
        Self {
            rule,
            settings,
            factory,
            retry_interval,
            state_tx: Arc::new(state_tx),
            connections: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The rule this supervisor owns
    pub fn rule(&self) -> ForwardRule {
        self.rule
    }

    /// Watch the last state reported by the current tunnel.
    ///
    /// `None` until the first tunnel reports a state.
    pub fn subscribe(&self) -> watch::Receiver<Option<TunnelState>> {
        self.state_tx.subscribe()
    }

    /// Run the retry loop until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> SupervisorReport {
        let mut attempts: u64 = 0;

        while !cancel.is_cancelled() {
            attempts += 1;
            tracing::info!("Starting tunnel for {} (attempt {})", self.rule, attempts);

            // Exactly one tunnel at a time: it is dropped before the next is built
            let mut tunnel = self.build_tunnel();
            match tunnel.start(cancel.clone()).await {
                Ok(()) => tracing::debug!("Tunnel for {} ended", self.rule),
                Err(e) => tracing::warn!("Error starting tunnel for {}: {}", self.rule, e),
            }
            drop(tunnel);

            if cancel.is_cancelled() {
                break;
            }

            tracing::info!(
                "Restarting tunnel for {} in {:?}",
                self.rule,
                self.retry_interval
            );
            tokio::select! {
                _ = tokio::time::sleep(self.retry_interval) => {}
                _ = cancel.cancelled() => break,
            }
        }

        let connections = self.connections.load(Ordering::Relaxed);
        tracing::info!(
            "Supervisor for {} stopped after {} attempts and {} connections",
            self.rule,
            attempts,
            connections
        );
        SupervisorReport {
            rule: self.rule,
            attempts,
            connections,
        }
    }

    fn build_tunnel(&self) -> F::Tunnel {
        let rule = self.rule;
        let mut tunnel =
            self.factory
                .create(rule.local_port, &self.settings.host, rule.remote_port);

        tunnel.set_auth(self.settings.auth.clone());
        tunnel.set_user(self.settings.user.clone());

        let state_tx = Arc::clone(&self.state_tx);
        tunnel.set_state_observer(Arc::new(move |state: TunnelState| {
            tracing::info!("State of {} is {}", rule, state);
            state_tx.send_replace(Some(state));
        }));
        let connections = Arc::clone(&self.connections);
        tunnel.set_connection_observer(Arc::new(move |event: &TunneledConnection| {
            if event.phase == ConnectionPhase::Accepted {
                connections.fetch_add(1, Ordering::Relaxed);
            }
            tracing::info!("Connection on {}: {}", rule, event);
        }));

        tunnel
    }
}

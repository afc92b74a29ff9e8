//! Fan-out of rule supervisors

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use pk_core::config::ForwardConfig;
use pk_core::traits::{TunnelFactory, TunnelState};
use pk_core::ForwardRule;

use super::{RuleSupervisor, TunnelSettings};

/// Runs one [`RuleSupervisor`] per configured rule.
///
/// Supervisors are spawned on a [`TaskTracker`] and share one cancellation
/// token. [`SupervisorSet::run`] only waits for that token; it does not join
/// the supervisors, so in-flight tunnels are simply dropped when the process
/// exits.
pub struct SupervisorSet {
    tracker: TaskTracker,
    cancel: CancellationToken,
    states: Vec<(ForwardRule, watch::Receiver<Option<TunnelState>>)>,
}

impl SupervisorSet {
    /// Spawn a supervisor for every rule in `config`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F: TunnelFactory>(
        config: &ForwardConfig,
        factory: F,
        cancel: CancellationToken,
    ) -> Self {
        let settings = Arc::new(TunnelSettings::from_config(config));
        let factory = Arc::new(factory);
        Self::spawn_rules(
            &config.ports,
            settings,
            factory,
            config.retry_interval,
            cancel,
        )
    }

    /// Spawn a supervisor for each of `rules` with explicit settings
    pub fn spawn_rules<F: TunnelFactory>(
        rules: &[ForwardRule],
        settings: Arc<TunnelSettings>,
        factory: Arc<F>,
        retry_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let tracker = TaskTracker::new();
        let mut states = Vec::with_capacity(rules.len());

        for &rule in rules {
            let supervisor = RuleSupervisor::new(
                rule,
                Arc::clone(&settings),
                Arc::clone(&factory),
                retry_interval,
            );
            states.push((rule, supervisor.subscribe()));

            let span = tracing::info_span!(
                "rule",
                local = rule.local_port,
                remote = rule.remote_port
            );
            tracker.spawn(supervisor.run(cancel.clone()).instrument(span));
        }

        tracker.close();
        tracing::debug!("Spawned {} rule supervisors", rules.len());

        Self {
            tracker,
            cancel,
            states,
        }
    }

    /// Number of supervisors spawned
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether no rules were configured
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// The rules being supervised, in configuration order
    pub fn rules(&self) -> Vec<ForwardRule> {
        self.states.iter().map(|(rule, _)| *rule).collect()
    }

    /// Last reported tunnel state for each rule
    pub fn states(&self) -> Vec<(ForwardRule, Option<TunnelState>)> {
        self.states
            .iter()
            .map(|(rule, rx)| (*rule, *rx.borrow()))
            .collect()
    }

    /// Block until the cancellation token fires
    pub async fn run(self) {
        self.cancel.cancelled().await;
        tracing::info!(
            "Shutdown requested, leaving {} supervisors",
            self.tracker.len()
        );
    }

    /// Wait until every supervisor has exited its loop
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }
}

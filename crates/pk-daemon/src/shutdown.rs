//! Interrupt handling
//!
//! A listener task turns process signals into [`Interrupt`] notifications on
//! a channel of capacity one. The coordinator drains that channel and fires
//! the shared cancellation token. Cancelling an already cancelled token is a
//! no-op, so repeated interrupts have no further effect.

use std::fmt;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Capacity of the interrupt channel. One pending notification is enough to
/// trigger shutdown; further ones are dropped while it is full.
pub const INTERRUPT_CHANNEL_CAPACITY: usize = 1;

/// An external request to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// SIGINT / Ctrl+C
    CtrlC,
    /// SIGTERM
    Terminate,
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::CtrlC => write!(f, "Ctrl+C"),
            Interrupt::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Spawn the signal listener and return the receiving end of its channel.
///
/// Must be called from within a tokio runtime.
pub fn spawn_signal_listener() -> mpsc::Receiver<Interrupt> {
    let (tx, rx) = mpsc::channel(INTERRUPT_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut terminate = install_terminate_handler();

        loop {
            let interrupt = tokio::select! {
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => Interrupt::CtrlC,
                    Err(e) => {
                        tracing::error!("Failed to listen for Ctrl+C: {}", e);
                        return;
                    }
                },
                _ = terminate_received(&mut terminate) => Interrupt::Terminate,
            };

            if let Err(TrySendError::Closed(_)) = tx.try_send(interrupt) {
                return;
            }
        }
    });

    rx
}

/// Fire `cancel` for every interrupt received, until the channel closes.
pub async fn run_coordinator(mut interrupts: mpsc::Receiver<Interrupt>, cancel: CancellationToken) {
    while let Some(interrupt) = interrupts.recv().await {
        if cancel.is_cancelled() {
            tracing::info!("Received {}, shutdown already in progress", interrupt);
        } else {
            tracing::info!("Received {}, initiating shutdown...", interrupt);
        }
        cancel.cancel();
    }

    tracing::debug!("Interrupt channel closed, coordinator exiting");
}

#[cfg(unix)]
type TerminateHandler = Option<tokio::signal::unix::Signal>;

#[cfg(not(unix))]
type TerminateHandler = ();

#[cfg(unix)]
fn install_terminate_handler() -> TerminateHandler {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(signal) => Some(signal),
        Err(e) => {
            tracing::warn!("Failed to install SIGTERM handler: {}", e);
            None
        }
    }
}

#[cfg(not(unix))]
fn install_terminate_handler() -> TerminateHandler {}

#[cfg(unix)]
async fn terminate_received(handler: &mut TerminateHandler) {
    if let Some(signal) = handler {
        if signal.recv().await.is_some() {
            return;
        }
    }
    std::future::pending::<()>().await
}

#[cfg(not(unix))]
async fn terminate_received(_handler: &mut TerminateHandler) {
    std::future::pending::<()>().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_interrupt_cancels_token() {
        let (tx, rx) = mpsc::channel(INTERRUPT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let coordinator = tokio::spawn(run_coordinator(rx, cancel.clone()));

        tx.send(Interrupt::CtrlC).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), cancel.cancelled())
            .await
            .expect("token should be cancelled");

        drop(tx);
        coordinator.await.unwrap();
    }

    #[tokio::test]
    async fn test_repeated_interrupts_are_absorbed() {
        let (tx, rx) = mpsc::channel(INTERRUPT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let child = cancel.child_token();
        let coordinator = tokio::spawn(run_coordinator(rx, cancel.clone()));

        tx.send(Interrupt::CtrlC).await.unwrap();
        tx.send(Interrupt::Terminate).await.unwrap();
        tx.send(Interrupt::CtrlC).await.unwrap();
        drop(tx);

        // Coordinator keeps draining until the channel closes
        coordinator.await.unwrap();
        assert!(cancel.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_channel_close_without_interrupt_leaves_token() {
        let (tx, rx) = mpsc::channel::<Interrupt>(INTERRUPT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        drop(tx);
        run_coordinator(rx, cancel.clone()).await;

        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn test_buffer_holds_one_pending_interrupt() {
        let (tx, _rx) = mpsc::channel(INTERRUPT_CHANNEL_CAPACITY);

        assert!(tx.try_send(Interrupt::CtrlC).is_ok());
        assert!(matches!(
            tx.try_send(Interrupt::CtrlC),
            Err(TrySendError::Full(_))
        ));
    }

    #[test]
    fn test_interrupt_display() {
        assert_eq!(Interrupt::CtrlC.to_string(), "Ctrl+C");
        assert_eq!(Interrupt::Terminate.to_string(), "SIGTERM");
    }
}

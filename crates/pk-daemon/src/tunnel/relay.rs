//! Byte relay for one forwarded client

use std::net::SocketAddr;

use tokio::io::{copy_bidirectional, AsyncRead, AsyncWrite};

use pk_core::traits::{ConnectionObserver, ConnectionPhase, TunneledConnection};

/// Copy bytes between a local client and its remote stream until both sides
/// finish, reporting `Ready` and then `Closed` or `Failed` to `observer`.
pub async fn relay<L, R>(
    mut local: L,
    mut remote: R,
    peer: SocketAddr,
    observer: Option<ConnectionObserver>,
) where
    L: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + AsyncWrite + Unpin,
{
    let notify = |phase: ConnectionPhase| {
        if let Some(observer) = &observer {
            observer(&TunneledConnection::new(peer, phase));
        }
    };

    notify(ConnectionPhase::Ready);

    match copy_bidirectional(&mut local, &mut remote).await {
        Ok((sent, received)) => notify(ConnectionPhase::Closed { sent, received }),
        Err(e) => notify(ConnectionPhase::Failed(e.to_string())),
    }
}

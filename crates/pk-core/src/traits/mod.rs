//! Core trait definitions

mod tunnel;

pub use tunnel::{
    ConnectionObserver, ConnectionPhase, StateObserver, Tunnel, TunnelFactory, TunnelState,
    TunneledConnection,
};

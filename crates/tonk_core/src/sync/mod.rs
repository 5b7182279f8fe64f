//! Sync engine: wire protocol plus the WebSocket transport that carries it.

pub mod protocol;

/// WebSocket transport (requires the `native-sync` feature).
#[cfg(feature = "native-sync")]
pub mod transport;

pub use protocol::{SyncMessage, SyncSession};

#[cfg(feature = "native-sync")]
pub use transport::{ConnectionState, Transport, TransportConfig};

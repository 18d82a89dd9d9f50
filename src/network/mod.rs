//! Network Topology
//!
//! In-memory view of every game server sharing the database, kept current
//! by a heartbeat-driven fetch/sync cycle.

mod manager;
mod map;
mod node;
mod requests;
mod scheduler;
mod server;

pub use manager::NetworkManager;
pub use map::NetworkMap;
pub use node::{NetworkNode, SlotCounts};
pub use requests::{FetchNodeListRequest, SyncRequest};
pub use scheduler::{SyncAction, SyncScheduler, SyncState};
pub use server::{CloseHook, NetworkServer, ServerId, DEFAULT_PORT};

/// Seconds since a server's last sync after which it no longer counts as online
pub const DEFAULT_STALENESS_SECS: i64 = 100;

/// Current unix time in seconds
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Contexts that own a [`NetworkManager`]
pub trait NetworkContext {
    fn network(&self) -> &NetworkManager;

    fn network_mut(&mut self) -> &mut NetworkManager;
}

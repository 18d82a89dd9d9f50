//! FleetSync - Shared-Database Request Pipeline for Game-Server Fleets
//!
//! Runs MySQL work for a game server off the control task and keeps an
//! in-memory map of every server that shares the same database.
//!
//! # Architecture
//!
//! Requests are submitted to a fixed pool of workers, each holding one cached
//! connection. Results come back through a completion dispatcher and are
//! applied on the single control task, which owns all mutable state: the
//! feature flags, the account cache and the network topology.
//!
//! # Features
//!
//! - Idempotent schema checks gating the auth, bans and network features
//! - Typed query results (`Success`, `Select`, `Error`) with elapsed time
//! - Heartbeat-driven topology fetch and per-server sync
//! - Staleness-aware slot counts and first-fit server selection

pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod network;
pub mod service;

pub use config::FleetSyncConfig;
pub use error::{Error, Result};
pub use service::Core;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::FleetSyncConfig;
    pub use crate::context::{ActiveFlag, HostContext, PlayerCounts, ProcessLifecycle};
    pub use crate::database::{
        CompletionDispatcher, Credentials, DatabaseRequest, QueryResult, RequestSink, WorkerPool,
    };
    pub use crate::error::{Error, Result};
    pub use crate::network::{NetworkManager, NetworkMap, NetworkNode, NetworkServer};
    pub use crate::service::Core;
}

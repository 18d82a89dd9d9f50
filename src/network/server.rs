//! Network Server
//!
//! One game server as seen through the shared network tables.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// Server identifier, unique across the whole network
pub type ServerId = u32;

pub const DEFAULT_PORT: u16 = 19132;

/// Callback fired once when a server record is closed
#[derive(Clone)]
pub struct CloseHook(Arc<dyn Fn(ServerId) + Send + Sync>);

impl CloseHook {
    pub fn new(hook: impl Fn(ServerId) + Send + Sync + 'static) -> Self {
        Self(Arc::new(hook))
    }

    fn fire(&self, id: ServerId) {
        (self.0)(id)
    }
}

impl fmt::Debug for CloseHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CloseHook")
    }
}

/// A server record
#[derive(Debug, Clone, Serialize)]
pub struct NetworkServer {
    pub id: ServerId,
    pub name: String,
    /// Name of the node this server belongs to
    pub node: String,
    pub ip: String,
    pub port: u16,
    pub online_players: u32,
    pub max_players: u32,
    pub players: Vec<String>,
    /// Unix timestamp of the last sync this server pushed
    pub last_sync: i64,
    pub online: bool,
    pub locked: bool,
    #[serde(skip)]
    on_close: Option<CloseHook>,
    #[serde(skip)]
    closed: bool,
}

impl NetworkServer {
    pub fn new(id: ServerId, node: impl Into<String>) -> Self {
        Self {
            id,
            name: String::new(),
            node: node.into(),
            ip: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            online_players: 0,
            max_players: 0,
            players: Vec::new(),
            last_sync: 0,
            online: false,
            locked: false,
            on_close: None,
            closed: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_address(mut self, ip: impl Into<String>, port: u16) -> Self {
        self.ip = ip.into();
        self.port = port;
        self
    }

    pub fn with_slots(mut self, online_players: u32, max_players: u32) -> Self {
        self.online_players = online_players;
        self.max_players = max_players;
        self
    }

    /// Mark the server as having synced at `timestamp`
    pub fn synced_at(mut self, timestamp: i64) -> Self {
        self.online = true;
        self.last_sync = timestamp;
        self
    }

    pub fn with_close_hook(mut self, hook: CloseHook) -> Self {
        self.on_close = Some(hook);
        self
    }

    /// `ip:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Synced within the last `staleness_secs` seconds
    pub fn is_fresh_at(&self, now: i64, staleness_secs: i64) -> bool {
        now - self.last_sync <= staleness_secs
    }

    /// Flagged online and fresh
    pub fn is_online_at(&self, now: i64, staleness_secs: i64) -> bool {
        self.online && self.is_fresh_at(now, staleness_secs)
    }

    /// Whether a player can be sent here right now
    pub fn is_available_at(&self, now: i64, staleness_secs: i64) -> bool {
        self.is_online_at(now, staleness_secs)
            && self.online_players < self.max_players
            && !self.locked
    }

    pub fn is_available(&self, staleness_secs: i64) -> bool {
        self.is_available_at(super::unix_now(), staleness_secs)
    }

    /// Copy the synced state of `other` onto this record, keeping identity and hook
    pub fn refresh_from(&mut self, other: &NetworkServer) {
        self.name.clone_from(&other.name);
        self.node.clone_from(&other.node);
        self.ip.clone_from(&other.ip);
        self.port = other.port;
        self.online_players = other.online_players;
        self.max_players = other.max_players;
        self.players.clone_from(&other.players);
        self.last_sync = other.last_sync;
        self.online = other.online;
        self.locked = other.locked;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release the record. Only the first call has any effect.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(hook) = self.on_close.take() {
            hook.fire(self.id);
        }
    }
}

impl fmt::Display for NetworkServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {}/{} ({}) {}/{}",
            self.id,
            self.node,
            self.name,
            self.address(),
            self.online_players,
            self.max_players
        )
    }
}

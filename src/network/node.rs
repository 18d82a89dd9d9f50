//! Network Node
//!
//! A named group of servers (a lobby pool, a game mode) with aggregate
//! player counts.

use std::ops::Add;

use serde::Serialize;

use super::server::{NetworkServer, ServerId};
use super::{unix_now, DEFAULT_STALENESS_SECS};

/// Online and maximum players summed over fresh servers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SlotCounts {
    pub online: u32,
    pub max: u32,
}

impl SlotCounts {
    pub fn new(online: u32, max: u32) -> Self {
        Self { online, max }
    }
}

impl Add for SlotCounts {
    type Output = SlotCounts;

    fn add(self, other: SlotCounts) -> SlotCounts {
        SlotCounts {
            online: self.online.saturating_add(other.online),
            max: self.max.saturating_add(other.max),
        }
    }
}

/// A group of servers, kept in insertion order
#[derive(Debug, Clone, Serialize)]
pub struct NetworkNode {
    name: String,
    display: String,
    servers: Vec<NetworkServer>,
    #[serde(skip)]
    staleness_secs: i64,
    #[serde(skip)]
    closed: bool,
}

impl NetworkNode {
    pub fn new(name: impl Into<String>, display: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display: display.into(),
            servers: Vec::new(),
            staleness_secs: DEFAULT_STALENESS_SECS,
            closed: false,
        }
    }

    pub fn with_staleness(mut self, staleness_secs: i64) -> Self {
        self.staleness_secs = staleness_secs;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display name, falling back to the node name
    pub fn display(&self) -> &str {
        if self.display.is_empty() {
            &self.name
        } else {
            &self.display
        }
    }

    pub fn staleness_secs(&self) -> i64 {
        self.staleness_secs
    }

    pub fn servers(&self) -> &[NetworkServer] {
        &self.servers
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Add a server unless one with the same id is already present
    pub fn add_server(&mut self, server: NetworkServer) -> bool {
        if self.find_server(server.id).is_some() {
            return false;
        }
        self.servers.push(server);
        true
    }

    pub fn find_server(&self, id: ServerId) -> Option<&NetworkServer> {
        self.servers.iter().find(|s| s.id == id)
    }

    pub fn find_server_mut(&mut self, id: ServerId) -> Option<&mut NetworkServer> {
        self.servers.iter_mut().find(|s| s.id == id)
    }

    /// Remove and close a server
    pub fn remove_server(&mut self, id: ServerId) -> bool {
        match self.servers.iter().position(|s| s.id == id) {
            Some(idx) => {
                let mut server = self.servers.remove(idx);
                server.close();
                true
            }
            None => false,
        }
    }

    /// Sum the slots of members that are online at `now`
    pub fn recalculate_slot_counts_at(&self, now: i64) -> SlotCounts {
        let staleness = self.staleness_secs;
        self.servers
            .iter()
            .filter(|s| s.is_online_at(now, staleness))
            .fold(SlotCounts::default(), |counts, s| {
                counts + SlotCounts::new(s.online_players, s.max_players)
            })
    }

    pub fn recalculate_slot_counts(&self) -> SlotCounts {
        self.recalculate_slot_counts_at(unix_now())
    }

    pub fn online_players_at(&self, now: i64) -> u32 {
        self.recalculate_slot_counts_at(now).online
    }

    /// Players on members that are online right now
    pub fn online_players(&self) -> u32 {
        self.online_players_at(unix_now())
    }

    pub fn max_players_at(&self, now: i64) -> u32 {
        self.recalculate_slot_counts_at(now).max
    }

    pub fn max_players(&self) -> u32 {
        self.max_players_at(unix_now())
    }

    /// First available server in insertion order
    pub fn suitable_server_at(&self, now: i64) -> Option<&NetworkServer> {
        self.servers
            .iter()
            .find(|s| s.is_available_at(now, self.staleness_secs))
    }

    pub fn suitable_server(&self) -> Option<&NetworkServer> {
        self.suitable_server_at(unix_now())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close every member and empty the node
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for server in &mut self.servers {
            server.close();
        }
        self.servers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::CloseHook;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn server(id: ServerId, online: u32, max: u32, last_sync: i64) -> NetworkServer {
        NetworkServer::new(id, "lobby")
            .with_slots(online, max)
            .synced_at(last_sync)
    }

    #[test]
    fn test_slot_counts_skip_stale_servers() {
        // Last synced 0s, 50s and 150s before now
        let now = 160;
        let mut node = NetworkNode::new("lobby", "Lobby");
        node.add_server(server(1, 5, 20, now));
        node.add_server(server(2, 3, 20, now - 50));
        node.add_server(server(3, 7, 20, now - 150));

        assert_eq!(node.recalculate_slot_counts_at(now), SlotCounts::new(8, 40));

        // Exactly at the threshold still counts
        assert_eq!(node.online_players_at(now + 50), 8);
        assert_eq!(node.online_players_at(now + 51), 5);
    }

    #[test]
    fn test_slot_counts_at_absolute_sync_times() {
        // Synced at t=0, t=50 and t=150, counted at t=160
        let mut node = NetworkNode::new("lobby", "Lobby");
        node.add_server(server(1, 5, 20, 0));
        node.add_server(server(2, 3, 20, 50));
        node.add_server(server(3, 7, 20, 150));

        assert_eq!(node.recalculate_slot_counts_at(160), SlotCounts::new(7, 20));
        assert_eq!(node.suitable_server_at(160).map(|s| s.id), Some(3));
    }

    #[test]
    fn test_slot_counts_drop_as_servers_age() {
        let now = 1_000;
        let mut node = NetworkNode::new("lobby", "");
        node.add_server(server(1, 7, 20, now));

        assert_eq!(node.online_players_at(now), 7);
        assert_eq!(node.max_players_at(now), 20);

        // No further sync: the same member ages out of the totals
        assert_eq!(node.recalculate_slot_counts_at(now + 101), SlotCounts::default());
        assert!(node.suitable_server_at(now + 101).is_none());
    }

    #[test]
    fn test_offline_servers_do_not_count() {
        let mut node = NetworkNode::new("lobby", "");
        let mut down = server(1, 5, 20, 100);
        down.online = false;
        node.add_server(down);
        node.add_server(server(2, 1, 10, 100));

        assert_eq!(node.recalculate_slot_counts_at(100), SlotCounts::new(1, 10));
        assert_eq!(node.display(), "lobby");
    }

    #[test]
    fn test_suitable_server_is_first_fit() {
        let now = 1_000;
        let mut node = NetworkNode::new("skywars", "SkyWars");
        let mut locked = server(1, 0, 12, now);
        locked.locked = true;
        node.add_server(locked);
        node.add_server(server(2, 4, 12, now));
        node.add_server(server(3, 0, 12, now));

        assert_eq!(node.suitable_server_at(now).map(|s| s.id), Some(2));
    }

    #[test]
    fn test_no_suitable_server() {
        let now = 1_000;
        let mut node = NetworkNode::new("skywars", "SkyWars");
        node.add_server(server(1, 12, 12, now));
        node.add_server(server(2, 0, 12, now - 500));
        assert!(node.suitable_server_at(now).is_none());
    }

    #[test]
    fn test_add_server_is_insert_if_absent() {
        let mut node = NetworkNode::new("lobby", "");
        assert!(node.add_server(server(1, 5, 20, 0)));
        assert!(!node.add_server(server(1, 9, 99, 0)));
        assert_eq!(node.server_count(), 1);
        assert_eq!(node.find_server(1).map(|s| s.max_players), Some(20));

        assert!(node.remove_server(1));
        assert!(!node.remove_server(1));
        assert!(node.find_server(1).is_none());
    }

    #[test]
    fn test_close_is_idempotent() {
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = closed.clone();
        let hook = CloseHook::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut node = NetworkNode::new("lobby", "");
        node.add_server(server(1, 0, 10, 0).with_close_hook(hook.clone()));
        node.add_server(server(2, 0, 10, 0).with_close_hook(hook));

        node.close();
        node.close();
        assert!(node.is_closed());
        assert_eq!(node.server_count(), 0);
        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }
}

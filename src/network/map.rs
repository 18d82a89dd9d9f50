//! Network Map
//!
//! Every node of the network plus this process's own server record.
//! Mutated only on the control task.

use std::collections::BTreeMap;

use serde::Serialize;

use super::node::{NetworkNode, SlotCounts};
use super::server::{NetworkServer, ServerId};
use super::unix_now;

/// In-memory network topology
#[derive(Debug, Serialize)]
pub struct NetworkMap {
    own: NetworkServer,
    nodes: BTreeMap<String, NetworkNode>,
    #[serde(skip)]
    staleness_secs: i64,
    #[serde(skip)]
    has_nodes: bool,
    #[serde(skip)]
    closed: bool,
}

impl NetworkMap {
    pub fn new(own: NetworkServer, staleness_secs: i64) -> Self {
        Self {
            own,
            nodes: BTreeMap::new(),
            staleness_secs,
            has_nodes: false,
            closed: false,
        }
    }

    pub fn own_server(&self) -> &NetworkServer {
        &self.own
    }

    pub fn own_server_mut(&mut self) -> &mut NetworkServer {
        &mut self.own
    }

    /// Whether a node list has been loaded yet
    pub fn has_nodes(&self) -> bool {
        self.has_nodes
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NetworkNode> {
        self.nodes.values()
    }

    pub fn node(&self, name: &str) -> Option<&NetworkNode> {
        self.nodes.get(name)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn server_count(&self) -> usize {
        self.nodes.values().map(NetworkNode::server_count).sum()
    }

    /// Replace the node table, closing every node it held before
    pub fn set_nodes(&mut self, nodes: Vec<NetworkNode>) {
        let previous = std::mem::take(&mut self.nodes);
        for (_, mut node) in previous {
            node.close();
        }

        for node in nodes {
            let node = node.with_staleness(self.staleness_secs);
            self.nodes.insert(node.name().to_string(), node);
        }
        self.has_nodes = true;
    }

    /// Fold freshly synced server rows into the map
    ///
    /// Known servers are refreshed in place, unknown ones are added, and a
    /// node that appears for the first time is created. Returns how many
    /// servers were new.
    pub fn apply_sync(&mut self, servers: Vec<NetworkServer>) -> usize {
        let mut added = 0;
        for server in servers {
            let moved_from = self
                .nodes
                .values()
                .find(|n| n.name() != server.node && n.find_server(server.id).is_some())
                .map(|n| n.name().to_string());
            if let Some(old) = moved_from {
                if let Some(node) = self.nodes.get_mut(&old) {
                    node.remove_server(server.id);
                }
            }

            let staleness = self.staleness_secs;
            let node = self
                .nodes
                .entry(server.node.clone())
                .or_insert_with(|| NetworkNode::new(server.node.clone(), "").with_staleness(staleness));

            match node.find_server_mut(server.id) {
                Some(existing) => existing.refresh_from(&server),
                None => {
                    node.add_server(server);
                    added += 1;
                }
            }
        }
        added
    }

    pub fn find_server(&self, id: ServerId) -> Option<&NetworkServer> {
        self.nodes.values().find_map(|n| n.find_server(id))
    }

    /// Network totals over servers that are fresh at `now`
    pub fn recalculate_slots_at(&self, now: i64) -> SlotCounts {
        self.nodes
            .values()
            .fold(SlotCounts::default(), |counts, node| {
                counts + node.recalculate_slot_counts_at(now)
            })
    }

    pub fn recalculate_slots(&self) -> SlotCounts {
        self.recalculate_slots_at(unix_now())
    }

    pub fn online_players(&self) -> u32 {
        self.recalculate_slots().online
    }

    pub fn max_players(&self) -> u32 {
        self.recalculate_slots().max
    }

    /// First available server of a node
    pub fn suitable_server_at(&self, node: &str, now: i64) -> Option<&NetworkServer> {
        self.nodes.get(node)?.suitable_server_at(now)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close every node. Only the first call has any effect.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for (_, mut node) in std::mem::take(&mut self.nodes) {
            node.close();
        }
        self.own.close();
    }
}

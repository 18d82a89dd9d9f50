//! Topology Requests
//!
//! The two requests the heartbeat submits: a one-off fetch of the node list
//! and the recurring sync of our own server row.

use async_trait::async_trait;

use super::node::NetworkNode;
use super::server::{NetworkServer, ServerId, DEFAULT_PORT};
use super::NetworkContext;
use crate::database::{
    execute_query, DatabaseRequest, QueryResult, Row, Value, WorkerConnection,
};
use crate::error::Result;

const FETCH_NODES_SQL: &str = "SELECT n.name AS node_name, n.display AS node_display, \
    s.id, s.name, s.ip, s.port, s.online_players, s.max_players, s.players, \
    s.last_sync, s.online, s.locked \
    FROM network_nodes n LEFT JOIN network_servers s ON s.node = n.name \
    ORDER BY n.name, s.id";

const UPSERT_SERVER_SQL: &str = "INSERT INTO network_servers \
    (id, node, name, ip, port, online_players, max_players, players, last_sync, online, locked) \
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
    ON DUPLICATE KEY UPDATE node = VALUES(node), name = VALUES(name), ip = VALUES(ip), \
    port = VALUES(port), online_players = VALUES(online_players), \
    max_players = VALUES(max_players), players = VALUES(players), \
    last_sync = VALUES(last_sync), online = VALUES(online)";

const SELECT_SERVERS_SQL: &str = "SELECT node AS node_name, id, name, ip, port, \
    online_players, max_players, players, last_sync, online, locked \
    FROM network_servers ORDER BY node, id";

/// Decode a server from a row; `None` when the row has no server id
/// (a node without servers in a LEFT JOIN).
pub(crate) fn server_from_row(row: &Row) -> Option<NetworkServer> {
    let id = ServerId::try_from(row.get_i64("id")?).ok()?;
    let node = row.get_str("node_name").unwrap_or_default();
    let count = |name: &str| {
        row.get_i64(name)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0)
    };

    let mut server = NetworkServer::new(id, node)
        .with_name(row.get_str("name").unwrap_or_default())
        .with_address(
            row.get_str("ip").unwrap_or("0.0.0.0"),
            row.get_i64("port")
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(DEFAULT_PORT),
        )
        .with_slots(count("online_players"), count("max_players"));
    server.players = row
        .get_str("players")
        .map(split_players)
        .unwrap_or_default();
    server.last_sync = row.get_i64("last_sync").unwrap_or(0);
    server.online = row.get_i64("online").unwrap_or(0) != 0;
    server.locked = row.get_i64("locked").unwrap_or(0) != 0;
    Some(server)
}

fn split_players(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}

/// Group joined node/server rows into nodes, keeping row order
pub(crate) fn nodes_from_rows(rows: &[Row]) -> Vec<NetworkNode> {
    let mut nodes: Vec<NetworkNode> = Vec::new();
    for row in rows {
        let Some(name) = row.get_str("node_name") else {
            continue;
        };
        if nodes.last().map(|n| n.name()) != Some(name) {
            let display = row.get_str("node_display").unwrap_or_default();
            nodes.push(NetworkNode::new(name, display));
        }
        if let (Some(server), Some(node)) = (server_from_row(row), nodes.last_mut()) {
            node.add_server(server);
        }
    }
    nodes
}

/// Load every node and its servers
#[derive(Debug, Default)]
pub struct FetchNodeListRequest;

impl FetchNodeListRequest {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<C: NetworkContext + 'static> DatabaseRequest<C> for FetchNodeListRequest {
    fn name(&self) -> &str {
        "fetch-nodes"
    }

    async fn execute(&mut self, conn: &mut WorkerConnection) -> QueryResult {
        execute_query(conn, FETCH_NODES_SQL, &[]).await
    }

    fn complete(self: Box<Self>, ctx: &mut C, result: QueryResult) -> Result<()> {
        match result.into_rows() {
            Ok(rows) => ctx.network_mut().apply_fetch(nodes_from_rows(&rows)),
            Err(e) => ctx.network_mut().fetch_failed(&e),
        }
        Ok(())
    }
}

/// Push our own row, then pull every server row
#[derive(Debug)]
pub struct SyncRequest {
    own: NetworkServer,
}

impl SyncRequest {
    pub fn new(own: NetworkServer) -> Self {
        Self { own }
    }

    fn upsert_params(&self) -> Vec<Value> {
        let s = &self.own;
        vec![
            Value::from(s.id),
            Value::from(s.node.as_str()),
            Value::from(s.name.as_str()),
            Value::from(s.ip.as_str()),
            Value::from(s.port),
            Value::from(s.online_players),
            Value::from(s.max_players),
            Value::from(s.players.join(",")),
            Value::from(s.last_sync),
            Value::from(s.online),
            Value::from(s.locked),
        ]
    }
}

#[async_trait]
impl<C: NetworkContext + 'static> DatabaseRequest<C> for SyncRequest {
    fn name(&self) -> &str {
        "sync-server"
    }

    async fn execute(&mut self, conn: &mut WorkerConnection) -> QueryResult {
        let pushed = execute_query(conn, UPSERT_SERVER_SQL, &self.upsert_params()).await;
        if pushed.is_error() {
            return pushed;
        }
        execute_query(conn, SELECT_SERVERS_SQL, &[]).await
    }

    fn complete(self: Box<Self>, ctx: &mut C, result: QueryResult) -> Result<()> {
        match result.into_rows() {
            Ok(rows) => {
                let servers = rows.iter().filter_map(server_from_row).collect();
                ctx.network_mut().apply_sync(servers);
            }
            Err(e) => ctx.network_mut().sync_failed(&e),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_row(node: &str, display: &str, id: Option<i64>, online: i64) -> Row {
        let row = Row::new()
            .with("node_name", node)
            .with("node_display", display);
        match id {
            Some(id) => row
                .with("id", id)
                .with("name", format!("{}-{}", node, id))
                .with("ip", "10.0.0.1")
                .with("port", 19133i64)
                .with("online_players", online)
                .with("max_players", 20i64)
                .with("players", "alex, steve,,")
                .with("last_sync", 1_000i64)
                .with("online", 1i64)
                .with("locked", 0i64),
            None => row
                .with("id", Value::Null)
                .with("name", Value::Null)
                .with("players", Value::Null),
        }
    }

    #[test]
    fn test_server_from_row() {
        let server = server_from_row(&node_row("lobby", "Lobby", Some(4), 2)).unwrap();
        assert_eq!(server.id, 4);
        assert_eq!(server.node, "lobby");
        assert_eq!(server.name, "lobby-4");
        assert_eq!(server.address(), "10.0.0.1:19133");
        assert_eq!(server.players, vec!["alex", "steve"]);
        assert!(server.online);
        assert!(!server.locked);

        assert!(server_from_row(&node_row("empty", "", None, 0)).is_none());
    }

    #[test]
    fn test_nodes_from_rows_keeps_order() {
        let rows = vec![
            node_row("bedwars", "BedWars", None, 0),
            node_row("lobby", "Lobby", Some(1), 3),
            node_row("lobby", "Lobby", Some(2), 5),
            node_row("skywars", "SkyWars", Some(7), 0),
        ];
        let nodes = nodes_from_rows(&rows);

        let names: Vec<_> = nodes.iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["bedwars", "lobby", "skywars"]);
        assert_eq!(nodes[0].server_count(), 0);
        let ids: Vec<_> = nodes[1].servers().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(nodes[2].display(), "SkyWars");
    }

    #[test]
    fn test_upsert_params_match_placeholders() {
        let own = NetworkServer::new(3, "lobby")
            .with_name("lobby-3")
            .with_slots(2, 40)
            .synced_at(99);
        let request = SyncRequest::new(own);
        let params = request.upsert_params();

        let placeholders = UPSERT_SERVER_SQL.matches('?').count();
        assert_eq!(params.len(), placeholders);
        assert_eq!(params[0], Value::Int(3));
        assert_eq!(params[9], Value::Int(1));
    }
}

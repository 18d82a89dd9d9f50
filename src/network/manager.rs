//! Network Manager
//!
//! Owns the topology map and the sync scheduler, turns heartbeats into
//! requests and folds their results back into the map.

use std::time::Instant;

use super::map::NetworkMap;
use super::node::{NetworkNode, SlotCounts};
use super::requests::{FetchNodeListRequest, SyncRequest};
use super::scheduler::{SyncAction, SyncScheduler, SyncState};
use super::server::NetworkServer;
use super::{unix_now, NetworkContext};
use crate::config::NetworkConfig;
use crate::context::PlayerCounts;
use crate::database::{QueryError, RequestSink};
use crate::error::Result;

pub struct NetworkManager {
    map: NetworkMap,
    scheduler: SyncScheduler,
    sync_started: Option<Instant>,
    closed: bool,
}

impl NetworkManager {
    pub fn new(config: &NetworkConfig, staleness_secs: i64) -> Self {
        let own = NetworkServer::new(config.id, config.node.as_str())
            .with_name(config.display_name.as_str())
            .with_address(config.ip.as_str(), config.port)
            .with_slots(0, config.max_players);

        Self {
            map: NetworkMap::new(own, staleness_secs),
            scheduler: SyncScheduler::new(),
            sync_started: None,
            closed: false,
        }
    }

    pub fn map(&self) -> &NetworkMap {
        &self.map
    }

    pub fn state(&self) -> SyncState {
        self.scheduler.state()
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    pub fn own_server(&self) -> &NetworkServer {
        self.map.own_server()
    }

    /// Network totals over servers that are fresh at `now`
    pub fn slot_counts_at(&self, now: i64) -> SlotCounts {
        self.map.recalculate_slots_at(now)
    }

    /// Players online across the network right now
    pub fn online_players(&self) -> u32 {
        self.slot_counts_at(unix_now()).online
    }

    pub fn max_players(&self) -> u32 {
        self.slot_counts_at(unix_now()).max
    }

    /// Submit the initial node list fetch
    pub fn start<C: NetworkContext + 'static>(&mut self, sink: &dyn RequestSink<C>) -> Result<()> {
        match self.scheduler.start() {
            Some(action) => self.submit(action, sink),
            None => Ok(()),
        }
    }

    /// Heartbeat: refresh our own record and submit whatever the scheduler asks for
    pub fn tick<C: NetworkContext + 'static>(
        &mut self,
        players: &dyn PlayerCounts,
        sink: &dyn RequestSink<C>,
    ) -> Result<Option<SyncAction>> {
        let Some(action) = self.scheduler.tick() else {
            return Ok(None);
        };
        if action == SyncAction::Sync {
            self.refresh_own_at(players, unix_now());
        }
        self.submit(action, sink)?;
        Ok(Some(action))
    }

    fn submit<C: NetworkContext + 'static>(
        &mut self,
        action: SyncAction,
        sink: &dyn RequestSink<C>,
    ) -> Result<()> {
        let submitted = match action {
            SyncAction::Fetch => sink.submit(Box::new(FetchNodeListRequest::new())),
            SyncAction::Sync => {
                self.sync_started = Some(Instant::now());
                sink.submit(Box::new(SyncRequest::new(self.map.own_server().clone())))
            }
        };

        if let Err(e) = submitted {
            match action {
                SyncAction::Fetch => self.scheduler.fetch_completed(false),
                SyncAction::Sync => self.scheduler.sync_completed(),
            }
            return Err(e);
        }
        Ok(())
    }

    /// Copy the host's live counts onto our own server record
    pub fn refresh_own_at(&mut self, players: &dyn PlayerCounts, now: i64) {
        let own = self.map.own_server_mut();
        own.online_players = players.online_players();
        own.max_players = players.max_players();
        own.players = players.player_names();
        own.last_sync = now;
        own.online = true;
    }

    pub fn apply_fetch(&mut self, nodes: Vec<NetworkNode>) {
        if self.closed {
            tracing::debug!("Ignoring node list fetched after close");
            return;
        }
        let node_count = nodes.len();
        let server_count: usize = nodes.iter().map(NetworkNode::server_count).sum();

        self.map.set_nodes(nodes);
        self.scheduler.fetch_completed(true);
        tracing::info!(
            "Loaded network topology: {} nodes, {} servers",
            node_count,
            server_count
        );
    }

    pub fn fetch_failed(&mut self, err: &QueryError) {
        tracing::warn!("Failed to fetch network nodes due to a {}: {}", err.kind, err.message);
        self.scheduler.fetch_completed(false);
    }

    pub fn apply_sync(&mut self, servers: Vec<NetworkServer>) {
        if self.closed {
            return;
        }
        let added = self.map.apply_sync(servers);
        self.scheduler.sync_completed();

        if added > 0 {
            tracing::info!("Discovered {} new servers", added);
        }
        if let Some(started) = self.sync_started.take() {
            let counts = self.map.recalculate_slots();
            tracing::debug!(
                "Ticked network sync in {:.3}s ({}/{} players online)",
                started.elapsed().as_secs_f64(),
                counts.online,
                counts.max
            );
        }
    }

    pub fn sync_failed(&mut self, err: &QueryError) {
        tracing::debug!("Network sync failed due to a {}: {}", err.kind, err.message);
        self.sync_started = None;
        self.scheduler.sync_completed();
    }

    /// Stop scheduling further fetches and syncs
    pub fn cancel(&mut self) {
        self.scheduler.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.scheduler.cancel();
        self.map.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StaticPlayerCounts;
    use crate::database::{DatabaseRequest, QueryErrorKind, QueryResult, Row};
    use std::sync::Mutex;

    struct Ctx {
        network: NetworkManager,
    }

    impl NetworkContext for Ctx {
        fn network(&self) -> &NetworkManager {
            &self.network
        }

        fn network_mut(&mut self) -> &mut NetworkManager {
            &mut self.network
        }
    }

    #[derive(Default)]
    struct Recorder {
        submitted: Mutex<Vec<Box<dyn DatabaseRequest<Ctx>>>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<Box<dyn DatabaseRequest<Ctx>>> {
            std::mem::take(&mut *self.submitted.lock().unwrap())
        }
    }

    impl RequestSink<Ctx> for Recorder {
        fn submit(&self, request: Box<dyn DatabaseRequest<Ctx>>) -> Result<()> {
            self.submitted.lock().unwrap().push(request);
            Ok(())
        }
    }

    fn config() -> NetworkConfig {
        NetworkConfig {
            id: 1,
            node: "lobby".into(),
            display_name: "lobby-1".into(),
            ip: "10.0.0.1".into(),
            port: 19132,
            max_players: 50,
        }
    }

    fn ctx() -> Ctx {
        Ctx {
            network: NetworkManager::new(&config(), 100),
        }
    }

    fn server_row(node: &str, id: i64, online: i64, last_sync: i64) -> Row {
        Row::new()
            .with("node_name", node)
            .with("node_display", node.to_uppercase())
            .with("id", id)
            .with("name", format!("{}-{}", node, id))
            .with("ip", "10.0.0.2")
            .with("port", 19132i64)
            .with("online_players", online)
            .with("max_players", 20i64)
            .with("players", "")
            .with("last_sync", last_sync)
            .with("online", 1i64)
            .with("locked", 0i64)
    }

    #[test]
    fn test_no_sync_until_fetch_completes() {
        let mut ctx = ctx();
        let sink = Recorder::default();
        let players = StaticPlayerCounts::new(50);

        ctx.network.start(&sink).unwrap();
        let fetch = sink.take();
        assert_eq!(fetch.len(), 1);
        assert_eq!(fetch[0].name(), "fetch-nodes");

        // Heartbeats while the fetch is in flight do nothing
        assert_eq!(ctx.network.tick(&players, &sink).unwrap(), None);
        assert_eq!(ctx.network.tick(&players, &sink).unwrap(), None);
        assert!(sink.take().is_empty());

        let now = unix_now();
        let rows = vec![server_row("lobby", 2, 4, now), server_row("skywars", 3, 6, now)];
        for request in fetch {
            request.complete(&mut ctx, QueryResult::select(rows.clone())).unwrap();
        }
        assert!(ctx.network.map().has_nodes());
        assert_eq!(ctx.network.map().node_count(), 2);
        assert_eq!(ctx.network.online_players(), 10);

        assert_eq!(
            ctx.network.tick(&players, &sink).unwrap(),
            Some(SyncAction::Sync)
        );
        let syncs = sink.take();
        assert_eq!(syncs.len(), 1);
        assert_eq!(syncs[0].name(), "sync-server");

        // Still in flight
        assert_eq!(ctx.network.tick(&players, &sink).unwrap(), None);
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_sync_refreshes_map() {
        let mut ctx = ctx();
        let sink = Recorder::default();
        let players = StaticPlayerCounts::new(50);
        players.set_players(vec!["alex".into(), "steve".into()]);

        ctx.network.start(&sink).unwrap();
        for request in sink.take() {
            request.complete(&mut ctx, QueryResult::select(vec![])).unwrap();
        }

        ctx.network.tick(&players, &sink).unwrap();
        assert_eq!(ctx.network.own_server().online_players, 2);
        assert!(ctx.network.own_server().online);

        let now = unix_now();
        let rows = vec![server_row("lobby", 1, 2, now), server_row("lobby", 5, 7, now)];
        for request in sink.take() {
            request.complete(&mut ctx, QueryResult::select(rows.clone())).unwrap();
        }

        assert_eq!(ctx.network.state(), SyncState::Synchronized);
        assert_eq!(ctx.network.map().server_count(), 2);
        assert_eq!(ctx.network.online_players(), 9);
        assert_eq!(
            ctx.network.map().suitable_server_at("lobby", now).map(|s| s.id),
            Some(1)
        );
    }

    #[test]
    fn test_failed_fetch_retries_on_next_tick() {
        let mut ctx = ctx();
        let sink = Recorder::default();
        let players = StaticPlayerCounts::new(50);

        ctx.network.start(&sink).unwrap();
        let failure = QueryResult::error(QueryError::new(QueryErrorKind::ConnectionError, "refused"));
        for request in sink.take() {
            request.complete(&mut ctx, failure.clone()).unwrap();
        }
        assert_eq!(ctx.network.state(), SyncState::NoTopology);

        assert_eq!(
            ctx.network.tick(&players, &sink).unwrap(),
            Some(SyncAction::Fetch)
        );
        assert_eq!(sink.take().len(), 1);
    }

    #[test]
    fn test_totals_drop_when_syncs_keep_failing() {
        let mut ctx = ctx();
        let sink = Recorder::default();
        let players = StaticPlayerCounts::new(50);

        ctx.network.start(&sink).unwrap();
        let now = unix_now();
        for request in sink.take() {
            request
                .complete(&mut ctx, QueryResult::select(vec![server_row("lobby", 2, 7, now)]))
                .unwrap();
        }
        assert_eq!(ctx.network.slot_counts_at(now), SlotCounts::new(7, 20));

        ctx.network.tick(&players, &sink).unwrap();
        let failure = QueryResult::error(QueryError::new(QueryErrorKind::ConnectionError, "refused"));
        for request in sink.take() {
            request.complete(&mut ctx, failure.clone()).unwrap();
        }
        assert_eq!(ctx.network.state(), SyncState::Synchronized);

        let later = now + 101;
        assert_eq!(ctx.network.slot_counts_at(later), SlotCounts::default());
        assert!(ctx.network.map().suitable_server_at("lobby", later).is_none());
    }

    #[test]
    fn test_fetch_in_flight_at_cancel_is_applied() {
        let mut ctx = ctx();
        let sink = Recorder::default();
        let players = StaticPlayerCounts::new(50);

        ctx.network.start(&sink).unwrap();
        let fetch = sink.take();
        assert_eq!(fetch.len(), 1);

        ctx.network.cancel();
        let now = unix_now();
        let rows = vec![server_row("lobby", 2, 4, now), server_row("skywars", 3, 6, now)];
        for request in fetch {
            request.complete(&mut ctx, QueryResult::select(rows.clone())).unwrap();
        }

        assert_eq!(ctx.network.map().node_count(), 2);
        assert_eq!(ctx.network.slot_counts_at(now).online, 10);
        assert!(ctx.network.scheduler().has_nodes());
        assert_eq!(ctx.network.state(), SyncState::Cancelled);

        assert_eq!(ctx.network.tick(&players, &sink).unwrap(), None);
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_sync_in_flight_at_cancel_is_applied() {
        let mut ctx = ctx();
        let sink = Recorder::default();
        let players = StaticPlayerCounts::new(50);

        ctx.network.start(&sink).unwrap();
        for request in sink.take() {
            request.complete(&mut ctx, QueryResult::select(vec![])).unwrap();
        }
        ctx.network.tick(&players, &sink).unwrap();
        let sync = sink.take();
        assert_eq!(sync.len(), 1);

        ctx.network.cancel();
        let now = unix_now();
        for request in sync {
            request
                .complete(&mut ctx, QueryResult::select(vec![server_row("duels", 8, 3, now)]))
                .unwrap();
        }

        assert_eq!(ctx.network.map().find_server(8).map(|s| s.online_players), Some(3));
        assert_eq!(ctx.network.state(), SyncState::Cancelled);
        assert_eq!(ctx.network.tick(&players, &sink).unwrap(), None);
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_close_cancels_scheduling() {
        let mut ctx = ctx();
        let sink = Recorder::default();
        let players = StaticPlayerCounts::new(50);

        ctx.network.close();
        ctx.network.close();
        assert!(ctx.network.is_closed());
        assert!(ctx.network.map().is_closed());
        ctx.network.start(&sink).unwrap();
        assert_eq!(ctx.network.tick(&players, &sink).unwrap(), None);
        assert!(sink.take().is_empty());

        ctx.network.apply_fetch(vec![NetworkNode::new("lobby", "")]);
        assert_eq!(ctx.network.map().node_count(), 0);
    }
}

//! Control Task
//!
//! `Core` is the state every completion handler runs against. It owns the
//! feature flags, the network manager and the account cache, and is only
//! ever touched from the task driving [`Core::run`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::FleetSyncConfig;
use crate::context::{Feature, FeatureContext, FeatureState, Features, HostContext};
use crate::database::{
    AuthContext, AuthLookupRequest, AuthRecord, AuthUpdateHashRequest, CompletionDispatcher,
    RequestContext, RequestSink, SchemaCheckRequest, SchemaTable,
};
use crate::error::{Error, Result};
use crate::network::{NetworkContext, NetworkManager};

/// Handle used by request completions
pub struct Core {
    host: HostContext,
    requests: Arc<dyn RequestSink<Core>>,
    network: NetworkManager,
    features: Features,
    accounts: HashMap<String, Option<AuthRecord>>,
    heartbeat_interval: Duration,
    heartbeats: u64,
    closed: bool,
}

impl Core {
    pub fn new(
        config: &FleetSyncConfig,
        host: HostContext,
        requests: Arc<dyn RequestSink<Core>>,
    ) -> Self {
        let staleness = i64::try_from(config.sync.staleness_secs).unwrap_or(i64::MAX);
        Self {
            host,
            requests,
            network: NetworkManager::new(&config.network, staleness),
            features: Features::default(),
            accounts: HashMap::new(),
            heartbeat_interval: config.heartbeat_interval(),
            heartbeats: 0,
            closed: false,
        }
    }

    pub fn host(&self) -> &HostContext {
        &self.host
    }

    pub fn heartbeats(&self) -> u64 {
        self.heartbeats
    }

    /// Submit the schema checks
    pub fn check_schema(&self) -> Result<()> {
        for table in SchemaTable::ALL {
            self.requests.submit(Box::new(SchemaCheckRequest::new(table)))?;
        }
        Ok(())
    }

    /// Submit the schema checks and the initial node list fetch
    pub fn start(&mut self) -> Result<()> {
        tracing::info!(
            "Starting server #{} on node '{}'",
            self.network.own_server().id,
            self.network.own_server().node
        );
        self.check_schema()?;
        self.network.start(self.requests.as_ref())
    }

    /// One heartbeat: let the scheduler submit its next fetch or sync
    pub fn heartbeat(&mut self) -> Result<()> {
        self.heartbeats += 1;
        if self.features.get(Feature::Network) == FeatureState::Disabled {
            tracing::trace!("Skipping heartbeat, network tables are unavailable");
            return Ok(());
        }
        if let Some(action) = self.network.tick(self.host.players(), self.requests.as_ref())? {
            tracing::trace!("Heartbeat {} submitted {:?}", self.heartbeats, action);
        }
        Ok(())
    }

    /// Load an account into the cache. Refused while the auth table is unavailable.
    pub fn lookup_account(&self, username: &str) -> Result<()> {
        self.require(Feature::Auth)?;
        self.requests.submit(Box::new(AuthLookupRequest::new(username)))
    }

    /// Replace an account's password hash
    pub fn update_password_hash(&self, username: &str, hash: &str) -> Result<()> {
        self.require(Feature::Auth)?;
        self.requests
            .submit(Box::new(AuthUpdateHashRequest::new(username, hash)))
    }

    /// Cached lookup result: outer `None` until the lookup finished
    pub fn account(&self, username: &str) -> Option<Option<&AuthRecord>> {
        self.accounts
            .get(&username.to_lowercase())
            .map(Option::as_ref)
    }

    fn require(&self, feature: Feature) -> Result<()> {
        match self.features.get(feature) {
            FeatureState::Disabled => Err(Error::FeatureDisabled(feature)),
            _ => Ok(()),
        }
    }

    /// Drive completions and heartbeats until `shutdown` resolves
    ///
    /// Returns the first fatal error. Non-fatal handler errors are logged.
    pub async fn run<F>(
        &mut self,
        dispatcher: &mut CompletionDispatcher<Core>,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Received shutdown signal");
                    return Ok(());
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = self.heartbeat() {
                        if e.is_fatal() {
                            return Err(e);
                        }
                        tracing::warn!("Heartbeat failed: {}", e);
                    }
                }
                completion = dispatcher.next() => {
                    let Some(completion) = completion else {
                        return Err(Error::WorkerPool("all request workers have stopped".into()));
                    };
                    if let Err(e) = dispatcher.dispatch(self, completion) {
                        if e.is_fatal() {
                            return Err(e);
                        }
                        tracing::warn!("Completion failed: {}", e);
                    }
                }
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release the topology. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.network.close();
        self.accounts.clear();
        tracing::debug!("Core closed after {} heartbeats", self.heartbeats);
    }
}

impl RequestContext for Core {
    fn is_active(&self) -> bool {
        self.host.is_active()
    }
}

impl FeatureContext for Core {
    fn features(&self) -> &Features {
        &self.features
    }

    fn features_mut(&mut self) -> &mut Features {
        &mut self.features
    }
}

impl NetworkContext for Core {
    fn network(&self) -> &NetworkManager {
        &self.network
    }

    fn network_mut(&mut self) -> &mut NetworkManager {
        &mut self.network
    }
}

impl AuthContext for Core {
    fn account_loaded(&mut self, username: &str, record: Option<AuthRecord>) {
        self.accounts.insert(username.to_string(), record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ActiveFlag, StaticPlayerCounts};
    use crate::database::{
        Completion, DatabaseRequest, QueryError, QueryErrorKind, QueryResult, Row,
    };
    use crate::network::SyncState;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Recorder {
        submitted: Mutex<Vec<Box<dyn DatabaseRequest<Core>>>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<Box<dyn DatabaseRequest<Core>>> {
            std::mem::take(&mut *self.submitted.lock().unwrap())
        }
    }

    impl RequestSink<Core> for Recorder {
        fn submit(&self, request: Box<dyn DatabaseRequest<Core>>) -> Result<()> {
            self.submitted.lock().unwrap().push(request);
            Ok(())
        }
    }

    const CONFIG: &str = r#"
[network]
id = 1
node = "lobby"

[database]
host = "127.0.0.1"
user = "fleet"
password = "secret"
database = "network"
"#;

    fn core(flag: Arc<ActiveFlag>, sink: Arc<Recorder>) -> Core {
        let config = FleetSyncConfig::from_str(CONFIG).unwrap();
        let host = HostContext::new(flag, Arc::new(StaticPlayerCounts::new(50)));
        Core::new(&config, host, sink)
    }

    fn names(requests: &[Box<dyn DatabaseRequest<Core>>]) -> Vec<String> {
        requests.iter().map(|r| r.name().to_string()).collect()
    }

    fn dispatcher() -> (mpsc::UnboundedSender<Completion<Core>>, CompletionDispatcher<Core>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, CompletionDispatcher::new(rx))
    }

    #[test]
    fn test_start_submits_checks_and_fetch() {
        let sink = Arc::new(Recorder::default());
        let mut core = core(Arc::new(ActiveFlag::new()), sink.clone());

        core.start().unwrap();
        assert_eq!(
            names(&sink.take()),
            vec![
                "check-auth",
                "check-bans",
                "check-network_nodes",
                "check-network_servers",
                "fetch-nodes"
            ]
        );
    }

    #[test]
    fn test_heartbeat_syncs_after_fetch() {
        let sink = Arc::new(Recorder::default());
        let mut core = core(Arc::new(ActiveFlag::new()), sink.clone());
        let (_tx, mut dispatcher) = dispatcher();

        core.start().unwrap();
        core.heartbeat().unwrap();

        for request in sink.take() {
            let result = match request.name() {
                "fetch-nodes" => QueryResult::select(vec![Row::new()
                    .with("node_name", "lobby")
                    .with("node_display", "Lobby")]),
                _ => QueryResult::success(0, 0),
            };
            let completion = Completion { request, result, worker_id: 0 };
            dispatcher.dispatch(&mut core, completion).unwrap();
        }
        assert!(core.features().is_enabled(Feature::Network));
        assert_eq!(core.network().state(), SyncState::Synchronized);

        core.heartbeat().unwrap();
        core.heartbeat().unwrap();
        assert_eq!(names(&sink.take()), vec!["sync-server"]);
    }

    #[test]
    fn test_failed_schema_check_disables_auth() {
        let sink = Arc::new(Recorder::default());
        let mut core = core(Arc::new(ActiveFlag::new()), sink.clone());
        let (_tx, mut dispatcher) = dispatcher();

        core.check_schema().unwrap();
        let failed = QueryError::new(QueryErrorKind::QueryError, "table is read only");
        let mut fatal = 0;
        for request in sink.take() {
            let result = if request.name() == "check-auth" {
                QueryResult::error(failed.clone())
            } else {
                QueryResult::success(0, 0)
            };
            let completion = Completion { request, result, worker_id: 1 };
            if let Err(e) = dispatcher.dispatch(&mut core, completion) {
                assert!(matches!(e, Error::FatalRequest { .. }));
                fatal += 1;
            }
        }

        assert_eq!(fatal, 1);
        assert_eq!(core.features().get(Feature::Auth), FeatureState::Disabled);
        assert!(core.features().is_enabled(Feature::Bans));
        assert!(matches!(
            core.lookup_account("steve"),
            Err(Error::FeatureDisabled(Feature::Auth))
        ));
    }

    #[test]
    fn test_late_result_is_not_applied() {
        let flag = Arc::new(ActiveFlag::new());
        let sink = Arc::new(Recorder::default());
        let mut core = core(flag.clone(), sink.clone());
        let (_tx, mut dispatcher) = dispatcher();

        core.start().unwrap();
        flag.deactivate();
        core.close();

        for request in sink.take() {
            let completion = Completion {
                request,
                result: QueryResult::success(0, 0),
                worker_id: 0,
            };
            let err = dispatcher.dispatch(&mut core, completion).unwrap_err();
            assert!(matches!(err, Error::ProcessInactive(_)));
        }
        assert_eq!(core.features().get(Feature::Auth), FeatureState::Pending);
        assert_eq!(dispatcher.dropped(), 5);
    }

    #[test]
    fn test_account_lookup_is_cached() {
        let sink = Arc::new(Recorder::default());
        let mut core = core(Arc::new(ActiveFlag::new()), sink.clone());
        let (_tx, mut dispatcher) = dispatcher();

        core.lookup_account("Steve").unwrap();
        assert!(core.account("steve").is_none());

        for request in sink.take() {
            let completion = Completion {
                request,
                result: QueryResult::select(vec![]),
                worker_id: 0,
            };
            dispatcher.dispatch(&mut core, completion).unwrap();
        }
        assert_eq!(core.account("STEVE"), Some(None));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let sink = Arc::new(Recorder::default());
        let mut core = core(Arc::new(ActiveFlag::new()), sink.clone());
        let (_tx, mut dispatcher) = dispatcher();

        core.start().unwrap();
        let result = core
            .run(&mut dispatcher, tokio::time::sleep(Duration::from_millis(20)))
            .await;
        assert!(result.is_ok());
        assert!(core.heartbeats() >= 1);
    }

    #[tokio::test]
    async fn test_run_fails_when_workers_stop() {
        let sink = Arc::new(Recorder::default());
        let mut core = core(Arc::new(ActiveFlag::new()), sink);
        let (tx, mut dispatcher) = dispatcher();
        drop(tx);

        let result = core.run(&mut dispatcher, std::future::pending()).await;
        assert!(matches!(result, Err(Error::WorkerPool(_))));
    }
}

//! Schema Checks
//!
//! Idempotent table provisioning run once at startup. Each check gates the
//! feature that depends on its table.

use async_trait::async_trait;

use super::connection::WorkerConnection;
use super::query::execute_raw;
use super::request::{Criticality, DatabaseRequest};
use super::result::QueryResult;
use crate::context::{Feature, FeatureContext};
use crate::error::Result;

const AUTH_TABLE: &str = "CREATE TABLE IF NOT EXISTS auth (
    username VARCHAR(16) PRIMARY KEY,
    hash CHAR(128),
    email VARCHAR(32) DEFAULT '',
    lastip VARCHAR(50) DEFAULT '0.0.0.0',
    islocked INT DEFAULT 0,
    lockreason VARCHAR(128) DEFAULT '',
    lang CHAR(6) DEFAULT 'en',
    timeplayed INT DEFAULT 0,
    lastlogin INT DEFAULT 0,
    registerdate INT DEFAULT 0,
    coins INT DEFAULT 0
)";

const BANS_TABLE: &str = "CREATE TABLE IF NOT EXISTS bans (
    id INT AUTO_INCREMENT PRIMARY KEY,
    username VARCHAR(16),
    ip VARCHAR(50) DEFAULT '0.0.0.0',
    uid VARCHAR(128),
    expires INT DEFAULT 0,
    created INT DEFAULT 0,
    reason VARCHAR(256),
    issuer_name VARCHAR(16),
    valid BIT DEFAULT 1
)";

const NETWORK_NODES_TABLE: &str = "CREATE TABLE IF NOT EXISTS network_nodes (
    name VARCHAR(32) PRIMARY KEY,
    display VARCHAR(64) DEFAULT ''
)";

const NETWORK_SERVERS_TABLE: &str = "CREATE TABLE IF NOT EXISTS network_servers (
    id INT PRIMARY KEY,
    node VARCHAR(32),
    name VARCHAR(64) DEFAULT '',
    ip VARCHAR(50) DEFAULT '0.0.0.0',
    port INT DEFAULT 19132,
    online_players INT DEFAULT 0,
    max_players INT DEFAULT 0,
    players TEXT,
    last_sync INT DEFAULT 0,
    online TINYINT DEFAULT 0,
    locked TINYINT DEFAULT 0
)";

/// Tables provisioned by FleetSync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaTable {
    Auth,
    Bans,
    NetworkNodes,
    NetworkServers,
}

impl SchemaTable {
    pub const ALL: [SchemaTable; 4] = [
        SchemaTable::Auth,
        SchemaTable::Bans,
        SchemaTable::NetworkNodes,
        SchemaTable::NetworkServers,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            SchemaTable::Auth => "auth",
            SchemaTable::Bans => "bans",
            SchemaTable::NetworkNodes => "network_nodes",
            SchemaTable::NetworkServers => "network_servers",
        }
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this table
    pub fn ddl(&self) -> &'static str {
        match self {
            SchemaTable::Auth => AUTH_TABLE,
            SchemaTable::Bans => BANS_TABLE,
            SchemaTable::NetworkNodes => NETWORK_NODES_TABLE,
            SchemaTable::NetworkServers => NETWORK_SERVERS_TABLE,
        }
    }

    pub fn feature(&self) -> Feature {
        match self {
            SchemaTable::Auth => Feature::Auth,
            SchemaTable::Bans => Feature::Bans,
            SchemaTable::NetworkNodes | SchemaTable::NetworkServers => Feature::Network,
        }
    }
}

/// Make sure a table exists and is usable
pub struct SchemaCheckRequest {
    table: SchemaTable,
    name: String,
}

impl SchemaCheckRequest {
    pub fn new(table: SchemaTable) -> Self {
        Self {
            table,
            name: format!("check-{}", table.table_name()),
        }
    }

    pub fn table(&self) -> SchemaTable {
        self.table
    }
}

#[async_trait]
impl<C: FeatureContext + 'static> DatabaseRequest<C> for SchemaCheckRequest {
    fn name(&self) -> &str {
        &self.name
    }

    fn criticality(&self) -> Criticality {
        Criticality::Critical
    }

    async fn execute(&mut self, conn: &mut WorkerConnection) -> QueryResult {
        execute_raw(conn, self.table.ddl()).await
    }

    fn complete(self: Box<Self>, ctx: &mut C, result: QueryResult) -> Result<()> {
        let feature = self.table.feature();
        match result.error_ref() {
            None => {
                tracing::debug!(
                    "Successfully completed schema check for {} table in {:?}",
                    self.table.table_name(),
                    result.elapsed
                );
                ctx.features_mut().record(feature, true);
            }
            Some(err) => {
                tracing::debug!(
                    "Failed to complete schema check for {} table due to a {}: {}",
                    self.table.table_name(),
                    err.kind,
                    err.message
                );
                ctx.features_mut().record(feature, false);
            }
        }
        Ok(())
    }
}

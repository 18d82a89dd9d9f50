//! Account Requests
//!
//! Reads and updates rows of the `auth` table on behalf of the login and
//! change-password flows. Failures here are never fatal: the player is told
//! to try again and the next action retries.

use async_trait::async_trait;
use serde::Serialize;

use super::connection::WorkerConnection;
use super::query::execute_query;
use super::request::DatabaseRequest;
use super::result::QueryResult;
use super::value::{Row, Value};
use crate::error::Result;

/// One row of the `auth` table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthRecord {
    pub username: String,
    pub hash: String,
    pub email: String,
    pub last_ip: String,
    pub locked: bool,
    pub lock_reason: String,
    pub lang: String,
    pub time_played: i64,
    pub last_login: i64,
    pub register_date: i64,
    pub coins: i64,
}

impl AuthRecord {
    /// Build a record from an `auth` row; `None` without a username
    pub fn from_row(row: &Row) -> Option<Self> {
        let text = |name: &str, default: &str| {
            row.get_str(name).unwrap_or(default).to_string()
        };
        let int = |name: &str| row.get_i64(name).unwrap_or(0);

        Some(Self {
            username: row.get_str("username")?.to_string(),
            hash: text("hash", ""),
            email: text("email", ""),
            last_ip: text("lastip", "0.0.0.0"),
            locked: int("islocked") != 0,
            lock_reason: text("lockreason", ""),
            lang: text("lang", "en").trim_end().to_string(),
            time_played: int("timeplayed"),
            last_login: int("lastlogin"),
            register_date: int("registerdate"),
            coins: int("coins"),
        })
    }
}

/// Control-side hooks for account requests
pub trait AuthContext {
    /// A lookup finished; `None` means no such account (or the lookup failed)
    fn account_loaded(&mut self, username: &str, record: Option<AuthRecord>);
}

/// Fetch a single account by name
pub struct AuthLookupRequest {
    username: String,
}

impl AuthLookupRequest {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into().to_lowercase(),
        }
    }
}

#[async_trait]
impl<C: AuthContext + 'static> DatabaseRequest<C> for AuthLookupRequest {
    fn name(&self) -> &str {
        "auth-lookup"
    }

    async fn execute(&mut self, conn: &mut WorkerConnection) -> QueryResult {
        execute_query(
            conn,
            "SELECT * FROM auth WHERE username = ?",
            &[Value::from(self.username.as_str())],
        )
        .await
    }

    fn complete(self: Box<Self>, ctx: &mut C, result: QueryResult) -> Result<()> {
        let record = match result.into_rows() {
            Ok(rows) => rows.first().and_then(AuthRecord::from_row),
            Err(e) => {
                tracing::warn!("Account lookup for {} failed: {}", self.username, e);
                None
            }
        };
        ctx.account_loaded(&self.username, record);
        Ok(())
    }
}

/// Replace an account's password hash
pub struct AuthUpdateHashRequest {
    username: String,
    hash: String,
}

impl AuthUpdateHashRequest {
    pub fn new(username: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            username: username.into().to_lowercase(),
            hash: hash.into(),
        }
    }
}

#[async_trait]
impl<C: 'static> DatabaseRequest<C> for AuthUpdateHashRequest {
    fn name(&self) -> &str {
        "auth-update-hash"
    }

    async fn execute(&mut self, conn: &mut WorkerConnection) -> QueryResult {
        execute_query(
            conn,
            "UPDATE auth SET hash = ? WHERE username = ?",
            &[
                Value::from(self.hash.as_str()),
                Value::from(self.username.as_str()),
            ],
        )
        .await
    }

    fn complete(self: Box<Self>, _ctx: &mut C, result: QueryResult) -> Result<()> {
        match (result.affected_rows(), result.error_ref()) {
            (Some(0), _) => {
                tracing::warn!("Password update for {} matched no account", self.username)
            }
            (Some(_), _) => tracing::debug!("Updated password hash for {}", self.username),
            (None, Some(e)) => {
                tracing::warn!("Password update for {} failed: {}", self.username, e)
            }
            (None, None) => {}
        }
        Ok(())
    }
}

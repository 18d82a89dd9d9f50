//! Request Protocol
//!
//! A request is split across two threads of control: `execute` runs on a
//! worker against that worker's connection, `complete` runs later on the
//! control task with the context the request is meant to update.

use async_trait::async_trait;

use super::connection::WorkerConnection;
use super::result::QueryResult;
use crate::error::Result;

/// How the dispatcher treats a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Criticality {
    /// Failures are logged; the calling feature degrades
    #[default]
    Normal,
    /// Connection/query failures are fatal for the dependent feature
    Critical,
}

/// Control-side context completions run against
pub trait RequestContext {
    /// Whether the owning process is still running
    fn is_active(&self) -> bool;
}

/// A unit of database work
///
/// `execute` must not panic or return early without a result: every failure
/// is reported as an error [`QueryResult`]. A panic is still caught by the
/// worker, but the cached connection is dropped when that happens.
#[async_trait]
pub trait DatabaseRequest<C>: Send + 'static {
    /// Short label used in logs
    fn name(&self) -> &str;

    fn criticality(&self) -> Criticality {
        Criticality::Normal
    }

    /// Run the request on a worker
    async fn execute(&mut self, conn: &mut WorkerConnection) -> QueryResult;

    /// Apply the result on the control task. Called exactly once.
    fn complete(self: Box<Self>, ctx: &mut C, result: QueryResult) -> Result<()>;
}

//! Request Results
//!
//! The typed outcome of a database request. Every failure inside a worker
//! is captured here; nothing else leaves a worker.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::value::Row;

/// Category of a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryErrorKind {
    /// The database could not be reached
    ConnectionError,
    /// The server rejected the statement while preparing it
    StatementPrepareError,
    /// Arguments did not match the prepared statement
    BindError,
    /// A prepared statement failed while executing
    ExecuteError,
    /// A plain-text (unprepared) statement failed, typically DDL
    QueryError,
}

impl QueryErrorKind {
    /// Kinds that make a schema check fatal for its feature
    pub fn is_schema_fatal(&self) -> bool {
        matches!(self, QueryErrorKind::ConnectionError | QueryErrorKind::QueryError)
    }
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryErrorKind::ConnectionError => write!(f, "CONNECTION_ERROR"),
            QueryErrorKind::StatementPrepareError => write!(f, "STATEMENT_PREPARE_ERROR"),
            QueryErrorKind::BindError => write!(f, "BIND_ERROR"),
            QueryErrorKind::ExecuteError => write!(f, "EXECUTE_ERROR"),
            QueryErrorKind::QueryError => write!(f, "QUERY_ERROR"),
        }
    }
}

/// A failed request: category plus the driver-reported message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
}

impl QueryError {
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify a driver error. Transport-level failures are always
    /// connection errors, whatever step was running when they happened.
    pub fn from_sqlx(step: QueryErrorKind, err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => QueryErrorKind::ConnectionError,
            _ => step,
        };
        Self::new(kind, err.to_string())
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Discriminant of a [`QueryOutcome`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Success,
    SelectSuccess,
    Error,
}

/// What a request produced
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// A mutating statement ran
    Success { affected_rows: u64, insert_id: u64 },
    /// A row-returning statement ran; rows keep the server's order
    Select { rows: Vec<Row> },
    /// The request failed
    Error(QueryError),
}

/// Outcome of a request plus how long it took
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub outcome: QueryOutcome,
    pub elapsed: Duration,
}

impl QueryResult {
    pub fn success(affected_rows: u64, insert_id: u64) -> Self {
        Self::from_outcome(QueryOutcome::Success {
            affected_rows,
            insert_id,
        })
    }

    pub fn select(rows: Vec<Row>) -> Self {
        Self::from_outcome(QueryOutcome::Select { rows })
    }

    pub fn error(error: QueryError) -> Self {
        Self::from_outcome(QueryOutcome::Error(error))
    }

    pub fn from_outcome(outcome: QueryOutcome) -> Self {
        Self {
            outcome,
            elapsed: Duration::ZERO,
        }
    }

    /// Set the measured execution time
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn kind(&self) -> ResultKind {
        match self.outcome {
            QueryOutcome::Success { .. } => ResultKind::Success,
            QueryOutcome::Select { .. } => ResultKind::SelectSuccess,
            QueryOutcome::Error(_) => ResultKind::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind() == ResultKind::Error
    }

    pub fn error_ref(&self) -> Option<&QueryError> {
        match &self.outcome {
            QueryOutcome::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Rows of a select; empty for every other outcome
    pub fn rows(&self) -> &[Row] {
        match &self.outcome {
            QueryOutcome::Select { rows } => rows,
            _ => &[],
        }
    }

    pub fn affected_rows(&self) -> Option<u64> {
        match self.outcome {
            QueryOutcome::Success { affected_rows, .. } => Some(affected_rows),
            _ => None,
        }
    }

    pub fn insert_id(&self) -> Option<u64> {
        match self.outcome {
            QueryOutcome::Success { insert_id, .. } => Some(insert_id),
            _ => None,
        }
    }

    /// Consume into rows, or the error that prevented them
    pub fn into_rows(self) -> std::result::Result<Vec<Row>, QueryError> {
        match self.outcome {
            QueryOutcome::Select { rows } => Ok(rows),
            QueryOutcome::Success { .. } => Ok(Vec::new()),
            QueryOutcome::Error(e) => Err(e),
        }
    }
}

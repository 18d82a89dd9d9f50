//! Statement Execution Helpers
//!
//! Shared building blocks for `DatabaseRequest::execute` implementations.
//! Every failure is returned as an error result; the statement and any
//! fetched rows are owned values dropped before the helper returns.

use sqlx::mysql::{MySqlArguments, MySqlConnection};
use sqlx::{Either, Executor, Statement};

use super::connection::WorkerConnection;
use super::result::{QueryError, QueryErrorKind, QueryOutcome, QueryResult};
use super::value::{Row, Value};

/// Prepare, bind and execute a statement on the worker's connection
///
/// Statements with a result set produce `Select`, everything else `Success`.
pub async fn execute_query(conn: &mut WorkerConnection, sql: &str, args: &[Value]) -> QueryResult {
    let connection = match conn.acquire().await {
        Ok(c) => c,
        Err(e) => return QueryResult::error(e),
    };

    let outcome = run_prepared(connection, sql, args).await;
    finish(conn, sql, outcome)
}

/// Run a statement through the plain-text protocol (no prepare step)
///
/// Used for DDL. Failures are reported as `QueryError`.
pub async fn execute_raw(conn: &mut WorkerConnection, sql: &str) -> QueryResult {
    let connection = match conn.acquire().await {
        Ok(c) => c,
        Err(e) => return QueryResult::error(e),
    };

    let outcome = match (&mut *connection).execute(sql).await {
        Ok(done) => Ok(QueryOutcome::Success {
            affected_rows: done.rows_affected(),
            insert_id: done.last_insert_id(),
        }),
        Err(e) => Err(QueryError::from_sqlx(QueryErrorKind::QueryError, e)),
    };
    finish(conn, sql, outcome)
}

async fn run_prepared(
    connection: &mut MySqlConnection,
    sql: &str,
    args: &[Value],
) -> std::result::Result<QueryOutcome, QueryError> {
    let statement = (&mut *connection)
        .prepare(sql)
        .await
        .map_err(|e| QueryError::from_sqlx(QueryErrorKind::StatementPrepareError, e))?;

    let expected = match statement.parameters() {
        Some(Either::Right(count)) => count,
        Some(Either::Left(types)) => types.len(),
        None => args.len(),
    };
    if expected != args.len() {
        return Err(QueryError::new(
            QueryErrorKind::BindError,
            format!(
                "statement expects {} parameters but {} were bound",
                expected,
                args.len()
            ),
        ));
    }

    let mut arguments = MySqlArguments::default();
    for value in args {
        value.bind_to(&mut arguments);
    }

    if statement.columns().is_empty() {
        let done = statement
            .query_with(arguments)
            .execute(&mut *connection)
            .await
            .map_err(|e| QueryError::from_sqlx(QueryErrorKind::ExecuteError, e))?;

        Ok(QueryOutcome::Success {
            affected_rows: done.rows_affected(),
            insert_id: done.last_insert_id(),
        })
    } else {
        let rows = statement
            .query_with(arguments)
            .fetch_all(&mut *connection)
            .await
            .map_err(|e| QueryError::from_sqlx(QueryErrorKind::ExecuteError, e))?;

        Ok(QueryOutcome::Select {
            rows: rows.iter().map(Row::from_mysql).collect(),
        })
    }
}

fn finish(
    conn: &mut WorkerConnection,
    sql: &str,
    outcome: std::result::Result<QueryOutcome, QueryError>,
) -> QueryResult {
    match outcome {
        Ok(outcome) => QueryResult::from_outcome(outcome),
        Err(e) => {
            if e.kind == QueryErrorKind::ConnectionError {
                conn.invalidate();
            }
            tracing::debug!(
                "Worker {} statement '{}...' failed: {}",
                conn.worker_id(),
                sql.chars().take(50).collect::<String>(),
                e
            );
            QueryResult::error(e)
        }
    }
}

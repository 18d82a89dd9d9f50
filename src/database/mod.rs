//! Asynchronous Database Request Pipeline
//!
//! Requests are executed by a fixed pool of workers, each owning one cached
//! MySQL connection. Finished results travel back to the control task through
//! the [`CompletionDispatcher`], which hands each one to the request's
//! completion handler exactly once.

mod auth;
mod connection;
mod credentials;
mod dispatcher;
mod pool;
mod query;
mod request;
mod result;
mod schema;
mod value;

pub use auth::{AuthContext, AuthLookupRequest, AuthRecord, AuthUpdateHashRequest};
pub use connection::{WorkerConnection, WorkerId};
pub use credentials::Credentials;
pub use dispatcher::CompletionDispatcher;
pub use pool::{Completion, RequestSink, WorkerPool};
pub use query::{execute_query, execute_raw};
pub use request::{Criticality, DatabaseRequest, RequestContext};
pub use result::{QueryError, QueryErrorKind, QueryOutcome, QueryResult, ResultKind};
pub use schema::{SchemaCheckRequest, SchemaTable};
pub use value::{Row, Value};

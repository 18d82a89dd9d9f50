//! Completion Dispatcher
//!
//! Receives finished requests from the workers and runs their completion
//! handlers on the control task. This is the only place where a failed
//! request can become fatal.

use tokio::sync::mpsc;

use super::pool::Completion;
use super::request::{Criticality, RequestContext};
use super::result::{QueryError, QueryOutcome};
use crate::error::{Error, Result};

/// Delivers results back to their requests, one at a time
pub struct CompletionDispatcher<C> {
    receiver: mpsc::UnboundedReceiver<Completion<C>>,
    delivered: u64,
    dropped: u64,
}

impl<C: 'static> CompletionDispatcher<C> {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<Completion<C>>) -> Self {
        Self {
            receiver,
            delivered: 0,
            dropped: 0,
        }
    }

    /// Wait for the next finished request. `None` once every worker has stopped.
    pub async fn next(&mut self) -> Option<Completion<C>> {
        self.receiver.recv().await
    }

    /// Take a finished request if one is ready
    pub fn try_next(&mut self) -> Option<Completion<C>> {
        self.receiver.try_recv().ok()
    }

    /// Completion handlers run so far
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Results refused because the process was no longer active
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Discard every queued result without running handlers
    pub fn discard_ready(&mut self) -> usize {
        let mut count = 0;
        while let Some(completion) = self.try_next() {
            tracing::debug!("Discarding result for '{}'", completion.request.name());
            count += 1;
        }
        self.dropped += count as u64;
        count
    }
}

impl<C: RequestContext + 'static> CompletionDispatcher<C> {
    /// Run the completion handler for one finished request
    ///
    /// Returns `Error::ProcessInactive` without touching `ctx` when the
    /// owning process has stopped, and `Error::FatalRequest` after the
    /// handler ran when a critical request hit a fatal failure.
    pub fn dispatch(&mut self, ctx: &mut C, completion: Completion<C>) -> Result<()> {
        let Completion {
            request,
            result,
            worker_id,
        } = completion;
        let name = request.name().to_string();

        if !ctx.is_active() {
            self.dropped += 1;
            tracing::debug!(
                "Attempted to complete '{}' while the owning process isn't active",
                name
            );
            return Err(Error::ProcessInactive(name));
        }

        let escalate: Option<QueryError> = match &result.outcome {
            QueryOutcome::Success { affected_rows, .. } => {
                tracing::trace!(
                    "'{}' succeeded on worker {} in {:?} ({} rows affected)",
                    name,
                    worker_id,
                    result.elapsed,
                    affected_rows
                );
                None
            }
            QueryOutcome::Select { rows } => {
                tracing::trace!(
                    "'{}' selected {} rows on worker {} in {:?}",
                    name,
                    rows.len(),
                    worker_id,
                    result.elapsed
                );
                None
            }
            QueryOutcome::Error(err)
                if request.criticality() == Criticality::Critical && err.kind.is_schema_fatal() =>
            {
                Some(err.clone())
            }
            QueryOutcome::Error(err) => {
                tracing::warn!("'{}' failed on worker {}: {}", name, worker_id, err);
                None
            }
        };

        self.delivered += 1;
        request.complete(ctx, result)?;

        match escalate {
            Some(err) => {
                tracing::error!("'{}' failed fatally: {}", name, err);
                Err(Error::FatalRequest {
                    request: name,
                    kind: err.kind,
                    message: err.message,
                })
            }
            None => Ok(()),
        }
    }

    /// Dispatch everything that is ready right now
    ///
    /// Stops at the first error, which is returned.
    pub fn dispatch_ready(&mut self, ctx: &mut C) -> Result<usize> {
        let mut count = 0;
        while let Some(completion) = self.try_next() {
            self.dispatch(ctx, completion)?;
            count += 1;
        }
        Ok(count)
    }
}

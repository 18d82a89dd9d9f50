//! Request Worker Pool
//!
//! A fixed set of worker tasks, each with its own queue and its own cached
//! connection. Requests queued on one worker run strictly one after another;
//! different workers run in parallel.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::connection::{WorkerConnection, WorkerId};
use super::credentials::Credentials;
use super::dispatcher::CompletionDispatcher;
use super::request::DatabaseRequest;
use super::result::{QueryError, QueryErrorKind, QueryResult};
use crate::error::{Error, Result};

type BoxedRequest<C> = Box<dyn DatabaseRequest<C>>;

/// Anything requests can be handed to without waiting
pub trait RequestSink<C>: Send + Sync {
    fn submit(&self, request: BoxedRequest<C>) -> Result<()>;
}

/// A finished request travelling back to the control task
pub struct Completion<C> {
    pub request: BoxedRequest<C>,
    pub result: QueryResult,
    pub worker_id: WorkerId,
}

struct WorkerHandle<C> {
    id: WorkerId,
    queue: Mutex<Option<mpsc::UnboundedSender<BoxedRequest<C>>>>,
    pending: Arc<AtomicUsize>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Pool of request workers
pub struct WorkerPool<C> {
    workers: Vec<WorkerHandle<C>>,
    closed: AtomicBool,
}

impl<C: 'static> WorkerPool<C> {
    /// Spawn `size` workers on the current tokio runtime
    ///
    /// Returns the pool and the dispatcher that receives every result.
    pub fn new(size: usize, credentials: Arc<Credentials>) -> (Self, CompletionDispatcher<C>) {
        let size = size.max(1);
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        let workers = (0..size)
            .map(|id| {
                let (queue_tx, queue_rx) = mpsc::unbounded_channel();
                let pending = Arc::new(AtomicUsize::new(0));
                let task = tokio::spawn(run_worker(
                    id,
                    WorkerConnection::new(id, Arc::clone(&credentials)),
                    queue_rx,
                    Arc::clone(&pending),
                    completion_tx.clone(),
                ));

                WorkerHandle {
                    id,
                    queue: Mutex::new(Some(queue_tx)),
                    pending,
                    task: Mutex::new(Some(task)),
                }
            })
            .collect();

        tracing::info!(
            "Started {} database workers for {}",
            size,
            credentials.redacted_url()
        );

        (
            Self {
                workers,
                closed: AtomicBool::new(false),
            },
            CompletionDispatcher::new(completion_rx),
        )
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Requests queued or running across all workers
    pub fn pending(&self) -> usize {
        self.workers
            .iter()
            .map(|w| w.pending.load(Ordering::Acquire))
            .sum()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Least-loaded worker; the lowest id wins ties
    fn select_worker(&self) -> Option<&WorkerHandle<C>> {
        self.workers
            .iter()
            .min_by_key(|w| w.pending.load(Ordering::Acquire))
    }

    /// Queue a request without waiting for it
    pub fn submit(&self, request: BoxedRequest<C>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ShuttingDown);
        }

        let worker = self
            .select_worker()
            .ok_or_else(|| Error::WorkerPool("pool has no workers".into()))?;

        let guard = worker
            .queue
            .lock()
            .map_err(|_| Error::Internal("worker queue lock poisoned".into()))?;
        let queue = guard.as_ref().ok_or(Error::ShuttingDown)?;

        tracing::trace!("Queued '{}' on worker {}", request.name(), worker.id);
        worker.pending.fetch_add(1, Ordering::AcqRel);
        if queue.send(request).is_err() {
            worker.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::WorkerPool(format!("worker {} has stopped", worker.id)));
        }
        Ok(())
    }

    /// Stop accepting requests and wait for every worker to drain its queue
    ///
    /// Requests already queued still execute and their results are still
    /// sent to the dispatcher.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut tasks = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            if let Ok(mut queue) = worker.queue.lock() {
                queue.take();
            }
            if let Ok(mut task) = worker.task.lock() {
                if let Some(handle) = task.take() {
                    tasks.push((worker.id, handle));
                }
            }
        }

        for (id, handle) in tasks {
            if let Err(e) = handle.await {
                tracing::warn!("Database worker {} ended abnormally: {}", id, e);
            }
        }
        tracing::info!("Database workers stopped");
    }
}

impl<C: 'static> RequestSink<C> for WorkerPool<C> {
    fn submit(&self, request: BoxedRequest<C>) -> Result<()> {
        WorkerPool::submit(self, request)
    }
}

async fn run_worker<C: 'static>(
    id: WorkerId,
    mut connection: WorkerConnection,
    mut queue: mpsc::UnboundedReceiver<BoxedRequest<C>>,
    pending: Arc<AtomicUsize>,
    completions: mpsc::UnboundedSender<Completion<C>>,
) {
    tracing::debug!("Database worker {} started", id);

    while let Some(mut request) = queue.recv().await {
        let started = Instant::now();

        let result = match AssertUnwindSafe(request.execute(&mut connection))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                connection.invalidate();
                QueryResult::error(QueryError::new(
                    QueryErrorKind::ExecuteError,
                    format!("request panicked: {}", panic_message(panic.as_ref())),
                ))
            }
        }
        .with_elapsed(started.elapsed());

        pending.fetch_sub(1, Ordering::AcqRel);
        tracing::trace!(
            "Worker {} finished '{}' in {:?} ({:?})",
            id,
            request.name(),
            result.elapsed,
            result.kind()
        );

        if completions
            .send(Completion {
                request,
                result,
                worker_id: id,
            })
            .is_err()
        {
            tracing::debug!("Completion dispatcher gone, worker {} dropping result", id);
        }
    }

    connection.close().await;
    tracing::debug!("Database worker {} stopped", id);
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

//! Fixed-size worker pool with round-robin dispatch.
//!
//! Each worker is a dedicated OS thread draining its own FIFO queue. The pool
//! picks a worker by advancing a cursor modulo the pool size and hands it the
//! request together with a one-shot reply channel. The caller awaits the
//! returned [`PendingResponse`] on the async runtime while the worker thread
//! does the CPU-bound part.
//!
//! ## Fairness
//!
//! Dispatch is O(1) and never looks at worker load. A worker that happens to
//! receive a slow request keeps its queue in order, so requests routed to it
//! wait behind the slow one even if other workers are idle. Requests on
//! different workers therefore complete out of submission order.
//!
//! ## Failure
//!
//! Workers are never respawned. If a worker thread dies its queue closes and
//! every request routed to it resolves to an error instead of hanging.

use crate::analysis::{analyze, AnalysisRequest, Analyzer, WorkResponse};
use crate::error::{PoolError, WorkError};
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

/// A request travelling to a worker together with its reply channel.
struct Job {
    request: AnalysisRequest,
    reply: oneshot::Sender<WorkResponse>,
}

/// Pool-side handle to one worker thread.
struct Worker {
    queue: mpsc::Sender<Job>,
    /// Requests routed to this worker
    dispatched: AtomicU64,
    /// Requests this worker has answered
    completed: Arc<AtomicU64>,
    thread: JoinHandle<()>,
}

/// Fixed set of analysis workers plus the round-robin cursor.
pub struct WorkerPool {
    workers: Vec<Worker>,
    cursor: AtomicUsize,
}

impl WorkerPool {
    /// Create a pool running the default [`analyze`] function.
    pub fn new(size: usize) -> Result<Self, PoolError> {
        Self::with_analyzer(size, analyze)
    }

    /// Create a pool of `size` workers (at least one) running `analyzer`.
    ///
    /// Workers that fail to spawn are skipped; only a pool with no workers
    /// at all is an error.
    pub fn with_analyzer(size: usize, analyzer: Analyzer) -> Result<Self, PoolError> {
        let size = size.max(1);
        let mut workers = Vec::with_capacity(size);
        let mut last_error = None;

        for _ in 0..size {
            let worker_id = workers.len();
            let (queue, jobs) = mpsc::channel::<Job>();
            let completed = Arc::new(AtomicU64::new(0));
            let counter = Arc::clone(&completed);

            let spawned = thread::Builder::new()
                .name(format!("worker-{worker_id}"))
                .spawn(move || worker_loop(worker_id, jobs, analyzer, counter));

            match spawned {
                Ok(thread) => workers.push(Worker {
                    queue,
                    dispatched: AtomicU64::new(0),
                    completed,
                    thread,
                }),
                Err(e) => {
                    error!(worker = worker_id, error = %e, "Failed to spawn worker");
                    last_error = Some(e);
                }
            }
        }

        if workers.is_empty() {
            let e = last_error
                .unwrap_or_else(|| io::Error::other("no workers requested"));
            return Err(PoolError::NoWorkers(e));
        }

        info!(
            requested = size,
            workers = workers.len(),
            "Worker pool started"
        );

        Ok(Self {
            workers,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Route a request to the next worker in round-robin order.
    ///
    /// Never blocks: the request is queued on the chosen worker even if it is
    /// busy.
    pub fn dispatch(&self, request: AnalysisRequest) -> PendingResponse {
        let index = self.advance_cursor();
        let worker = &self.workers[index];
        let (reply, response) = oneshot::channel();

        worker.dispatched.fetch_add(1, Ordering::Relaxed);
        trace!(worker = index, text = %request.text, "Dispatching request");

        match worker.queue.send(Job { request, reply }) {
            Ok(()) => PendingResponse {
                worker: index,
                state: Pending::Waiting(response),
            },
            Err(_) => {
                warn!(worker = index, "Worker queue closed, request rejected");
                PendingResponse {
                    worker: index,
                    state: Pending::Failed(WorkError::WorkerUnavailable { worker: index }),
                }
            }
        }
    }

    /// Take the worker index at the cursor and move the cursor one step.
    fn advance_cursor(&self) -> usize {
        let len = self.workers.len();
        // Closure always returns Some, so both arms carry the previous value
        match self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len))
        {
            Ok(previous) | Err(previous) => previous,
        }
    }

    /// Number of workers in the pool.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Index of the worker that will receive the next dispatch.
    #[cfg(test)]
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Requests routed to each worker so far, by worker index.
    #[cfg(test)]
    pub fn dispatched_counts(&self) -> Vec<u64> {
        self.workers
            .iter()
            .map(|w| w.dispatched.load(Ordering::Relaxed))
            .collect()
    }

    /// Requests answered by each worker so far, by worker index.
    #[cfg(test)]
    pub fn completed_counts(&self) -> Vec<u64> {
        self.workers
            .iter()
            .map(|w| w.completed.load(Ordering::Relaxed))
            .collect()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Dropping each queue sender lets its worker drain and exit
        let mut threads = Vec::with_capacity(self.workers.len());
        for (id, worker) in self.workers.drain(..).enumerate() {
            debug!(
                worker = id,
                dispatched = worker.dispatched.load(Ordering::Relaxed),
                completed = worker.completed.load(Ordering::Relaxed),
                "Stopping worker"
            );
            threads.push(worker.thread);
        }

        for thread in threads {
            let _ = thread.join();
        }
    }
}

fn worker_loop(
    worker_id: usize,
    jobs: mpsc::Receiver<Job>,
    analyzer: Analyzer,
    completed: Arc<AtomicU64>,
) {
    debug!(worker = worker_id, "Worker ready");

    while let Ok(job) = jobs.recv() {
        let response = analyzer(&job.request.text);
        completed.fetch_add(1, Ordering::Relaxed);

        if job.reply.send(response).is_err() {
            trace!(worker = worker_id, "Requester gone before reply");
        }
    }

    debug!(worker = worker_id, "Worker exiting");
}

enum Pending {
    Waiting(oneshot::Receiver<WorkResponse>),
    Failed(WorkError),
}

/// Handle for the reply to one dispatched request. Awaited exactly once.
pub struct PendingResponse {
    worker: usize,
    state: Pending,
}

impl PendingResponse {
    /// Index of the worker the request was routed to.
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Wait for the worker's reply.
    pub async fn recv(self) -> WorkResponse {
        let worker = self.worker;
        match self.state {
            Pending::Failed(e) => Err(e),
            Pending::Waiting(response) => response
                .await
                .unwrap_or(Err(WorkError::WorkerDisconnected { worker })),
        }
    }

    /// Wait for the reply, giving up after `timeout` when one is set.
    pub async fn recv_timeout(self, timeout: Option<Duration>) -> WorkResponse {
        let worker = self.worker;
        match timeout {
            None => self.recv().await,
            Some(after) => tokio::time::timeout(after, self.recv())
                .await
                .unwrap_or(Err(WorkError::Timeout { worker, after })),
        }
    }
}

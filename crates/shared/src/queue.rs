//! Rate-limited request queue.
//!
//! Serializes async operations through a single worker task, enforcing a minimum
//! spacing between the completion of one operation and the start of the next.
//! Execution order equals submission order; there is no priority and no
//! cancellation once an operation has been handed to the worker.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, warn};

type BoxedOperation = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Errors raised by the queue itself (never by the queued operation)
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("request queue worker has stopped")]
    WorkerStopped,

    #[error("queued operation panicked")]
    Panicked,
}

/// An operation waiting for the worker
struct QueuedTask {
    id: u64,
    operation: BoxedOperation,
    enqueued_at: Instant,
}

/// FIFO queue drained by exactly one worker loop
///
/// The worker is spawned once in [`RequestQueue::new`]; submissions from inside a
/// running operation simply append to the channel and never start a second loop.
#[derive(Clone)]
pub struct RequestQueue {
    sender: mpsc::UnboundedSender<QueuedTask>,
    pending: Arc<AtomicUsize>,
    next_id: Arc<AtomicU64>,
    min_spacing: Duration,
}

impl RequestQueue {
    /// Create a queue and spawn its worker on the current Tokio runtime
    pub fn new(min_spacing: Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        tokio::spawn(run_worker(receiver, min_spacing));

        Self {
            sender,
            pending,
            next_id: Arc::new(AtomicU64::new(0)),
            min_spacing,
        }
    }

    /// Number of submitted operations that have not yet completed
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn min_spacing(&self) -> Duration {
        self.min_spacing
    }

    /// Submit an operation and wait for its result
    ///
    /// A failing operation is logged and its error is returned only to this caller;
    /// the queue keeps draining sibling tasks.
    pub async fn submit<T, E, F, Fut>(&self, operation: F) -> Result<Result<T, E>, QueueError>
    where
        T: Send + 'static,
        E: std::fmt::Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (done_tx, done_rx) = oneshot::channel();
        let pending = Arc::clone(&self.pending);

        let wrapped = async move {
            // Closure is called inside the guard; it may panic before yielding a future
            let outcome = AssertUnwindSafe(async move { operation().await })
                .catch_unwind()
                .await;
            let result = match outcome {
                Ok(Ok(value)) => Ok(Ok(value)),
                Ok(Err(e)) => {
                    warn!(task_id = id, error = %e, "Queued operation failed");
                    Ok(Err(e))
                }
                Err(_) => {
                    warn!(task_id = id, "Queued operation panicked");
                    Err(QueueError::Panicked)
                }
            };
            // Counted as done before the caller can observe the result
            pending.fetch_sub(1, Ordering::SeqCst);
            // Caller may have gone away; that is not the queue's problem
            let _ = done_tx.send(result);
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        let task = QueuedTask {
            id,
            operation: Box::pin(wrapped),
            enqueued_at: Instant::now(),
        };

        if self.sender.send(task).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::WorkerStopped);
        }

        debug!(task_id = id, pending = self.len(), "Operation enqueued");

        done_rx.await.map_err(|_| QueueError::WorkerStopped)?
    }
}

async fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<QueuedTask>,
    min_spacing: Duration,
) {
    let mut last_run_at: Option<Instant> = None;

    while let Some(task) = receiver.recv().await {
        if let Some(last) = last_run_at {
            let elapsed = last.elapsed();
            if elapsed < min_spacing {
                let wait_time = min_spacing - elapsed;
                debug!(
                    task_id = task.id,
                    wait_ms = wait_time.as_millis() as u64,
                    "Request queue: waiting for spacing"
                );
                sleep(wait_time).await;
            }
        }

        debug!(
            task_id = task.id,
            queued_ms = task.enqueued_at.elapsed().as_millis() as u64,
            "Running queued operation"
        );

        task.operation.await;

        // Spacing is measured from completion, success or failure
        last_run_at = Some(Instant::now());
    }

    debug!("Request queue worker exiting");
}

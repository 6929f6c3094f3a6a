//! Bounded worker pool that runs asset fetches in the background.
//!
//! Every finished task is reported on the bus as a `FetchMessage`; failures
//! are isolated to their own task and never retried. Shutdown stops intake,
//! interrupts in-flight downloads and joins every worker.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver as JobReceiver, Sender as JobSender};
use log::{debug, error, info, warn};
use tokio::sync::broadcast::Sender;

use crate::app_bootstrap::services::panic_payload_to_string;
use crate::asset_fetcher::{AssetFetcher, AssetKind};
use crate::errors::FetchError;
use crate::protocol::{BatchId, FetchMessage, Message};

/// One unit of background download work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTask {
    pub resource_url: String,
    pub destination_path: PathBuf,
    /// Caller-chosen id echoed back in the notification (the row index for thumbnails).
    pub correlation_id: usize,
    pub kind: AssetKind,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("fetch coordinator is shut down")]
    ShutDown,
}

struct FetchJob {
    batch: BatchId,
    task: FetchTask,
}

#[derive(Clone)]
struct WorkerContext {
    fetcher: Arc<AssetFetcher>,
    bus_producer: Sender<Message>,
    shutdown: Arc<AtomicBool>,
    cancelled_before: Arc<AtomicU64>,
}

impl WorkerContext {
    fn is_cancelled(&self, batch: BatchId) -> bool {
        self.shutdown.load(Ordering::SeqCst) || batch < self.cancelled_before.load(Ordering::SeqCst)
    }
}

pub struct FetchCoordinator {
    job_sender: Mutex<Option<JobSender<FetchJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    cancelled_before: Arc<AtomicU64>,
    next_batch: AtomicU64,
}

impl FetchCoordinator {
    /// Spawns `worker_count` fetch workers (at least one).
    pub fn new(
        fetcher: Arc<AssetFetcher>,
        worker_count: usize,
        bus_producer: Sender<Message>,
    ) -> std::io::Result<Self> {
        let (job_sender, job_receiver) = crossbeam_channel::unbounded::<FetchJob>();
        let context = WorkerContext {
            fetcher,
            bus_producer,
            shutdown: Arc::new(AtomicBool::new(false)),
            cancelled_before: Arc::new(AtomicU64::new(0)),
        };

        let mut workers = Vec::new();
        for worker_index in 0..worker_count.max(1) {
            let receiver = job_receiver.clone();
            let context = context.clone();
            let handle = thread::Builder::new()
                .name(format!("fetch-worker-{worker_index}"))
                .spawn(move || Self::worker_loop(receiver, context))?;
            workers.push(handle);
        }
        info!("Fetch coordinator started with {} workers", workers.len());

        Ok(Self {
            job_sender: Mutex::new(Some(job_sender)),
            workers: Mutex::new(workers),
            shutdown: context.shutdown,
            cancelled_before: context.cancelled_before,
            next_batch: AtomicU64::new(1),
        })
    }

    fn worker_loop(jobs: JobReceiver<FetchJob>, context: WorkerContext) {
        // Ends once the sender is dropped and the queue is drained.
        for job in jobs.iter() {
            let FetchJob { batch, task } = job;
            if context.is_cancelled(batch) {
                debug!(
                    "Skipping fetch {} of cancelled batch {}",
                    task.correlation_id, batch
                );
                continue;
            }

            let is_cancelled = || context.is_cancelled(batch);
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                context.fetcher.fetch_cancellable(
                    &task.resource_url,
                    &task.destination_path,
                    task.kind,
                    &is_cancelled,
                )
            }))
            .unwrap_or_else(|payload| {
                error!(
                    "Fetch worker recovered from panic: {}",
                    panic_payload_to_string(payload.as_ref())
                );
                Err(FetchError::Io("fetch panicked".to_string()))
            });

            let message = match outcome {
                Ok(path) => FetchMessage::Completed {
                    batch,
                    correlation_id: task.correlation_id,
                    path,
                },
                Err(FetchError::Cancelled) => continue,
                Err(error) => {
                    warn!(
                        "Background fetch {} ({}) failed: {}",
                        task.correlation_id, task.resource_url, error
                    );
                    FetchMessage::Failed {
                        batch,
                        correlation_id: task.correlation_id,
                        error: error.to_string(),
                    }
                }
            };
            if context.shutdown.load(Ordering::SeqCst) {
                continue;
            }
            let _ = context.bus_producer.send(Message::Fetch(message));
        }
    }

    /// Queues `tasks` as one batch and returns its id without waiting.
    pub fn dispatch(&self, tasks: Vec<FetchTask>) -> Result<BatchId, DispatchError> {
        let guard = self.job_sender.lock().expect("job sender lock poisoned");
        let Some(sender) = guard.as_ref() else {
            return Err(DispatchError::ShutDown);
        };
        let batch = self.next_batch.fetch_add(1, Ordering::SeqCst);
        let count = tasks.len();
        for task in tasks {
            if sender.send(FetchJob { batch, task }).is_err() {
                return Err(DispatchError::ShutDown);
            }
        }
        debug!("Dispatched fetch batch {} with {} tasks", batch, count);
        Ok(batch)
    }

    /// Drops queued work and interrupts in-flight work of every batch older than `batch`.
    pub fn cancel_batches_before(&self, batch: BatchId) {
        self.cancelled_before.fetch_max(batch, Ordering::SeqCst);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Stops intake, cancels in-flight fetches and joins all workers. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.job_sender
            .lock()
            .expect("job sender lock poisoned")
            .take();
        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .expect("worker list lock poisoned")
            .drain(..)
            .collect();
        if workers.is_empty() {
            return;
        }
        let count = workers.len();
        for worker in workers {
            if let Err(payload) = worker.join() {
                error!(
                    "Fetch worker terminated due to panic: {}",
                    panic_payload_to_string(payload.as_ref())
                );
            }
        }
        info!("Fetch coordinator stopped ({} workers joined)", count);
    }
}

impl Drop for FetchCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

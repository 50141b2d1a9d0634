//! Bounded worker pool for queued matching runs.

use crate::services::executor::{RunExecutor, RunJob};
use service_core::error::AppError;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

const SHUTDOWN_REASON: &str = "service shutting down";

#[derive(Clone)]
pub struct RunQueue {
    job_tx: mpsc::Sender<RunJob>,
    shutdown_token: CancellationToken,
    tracker: TaskTracker,
}

#[derive(Clone)]
struct Worker {
    id: usize,
    executor: RunExecutor,
    /// One run at a time per worker.
    slot: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl Worker {
    async fn process_job(&self, job: RunJob) {
        let permit = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            permit = self.slot.clone().acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            self.executor.abandon(job, SHUTDOWN_REASON).await;
            return;
        };

        tracing::info!(
            worker_id = self.id,
            match_set_id = %job.match_set_id,
            run_id = %job.run_id,
            "Queued run started"
        );
        self.executor.execute(job).await;
    }
}

impl RunQueue {
    /// Spawns the distributor and returns the handle used to enqueue runs.
    pub fn start(executor: RunExecutor, worker_count: usize, queue_size: usize) -> Self {
        let (job_tx, mut job_rx) = mpsc::channel::<RunJob>(queue_size.max(1));
        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();

        let workers: Vec<Worker> = (0..worker_count.max(1))
            .map(|id| Worker {
                id,
                executor: executor.clone(),
                slot: Arc::new(Semaphore::new(1)),
                shutdown: shutdown_token.clone(),
            })
            .collect();

        tracing::info!(worker_count = workers.len(), queue_size, "Starting run queue");

        let shutdown = shutdown_token.clone();
        let worker_tracker = tracker.clone();
        tracker.spawn(async move {
            let mut next_worker = 0;

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        tracing::info!("Run distributor shutting down");
                        break;
                    }
                    job = job_rx.recv() => {
                        match job {
                            Some(job) => {
                                // Round-robin distribution
                                let worker = workers[next_worker].clone();
                                next_worker = (next_worker + 1) % workers.len();

                                tracing::debug!(
                                    worker_id = worker.id,
                                    run_id = %job.run_id,
                                    "Dispatching run to worker"
                                );

                                worker_tracker.spawn(async move {
                                    worker.process_job(job).await;
                                });
                            }
                            None => {
                                tracing::info!("Channel closed, run distributor exiting");
                                break;
                            }
                        }
                    }
                }
            }

            // Every queued job already owns its match set.
            job_rx.close();
            while let Ok(job) = job_rx.try_recv() {
                executor.abandon(job, SHUTDOWN_REASON).await;
            }
        });

        Self {
            job_tx,
            shutdown_token,
            tracker,
        }
    }

    pub fn enqueue(&self, job: RunJob) -> Result<(), AppError> {
        self.job_tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                AppError::ServiceUnavailable(anyhow::anyhow!("Run queue is full"))
            }
            mpsc::error::TrySendError::Closed(_) => {
                AppError::ServiceUnavailable(anyhow::anyhow!("Run queue is shut down"))
            }
        })
    }

    /// Stops accepting runs, fails the ones still waiting and waits for
    /// in-flight runs to finish.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating run queue shutdown");
        self.shutdown_token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("Run queue stopped");
    }
}

//! Bounded job queue drained by a fixed pool of workers.
//!
//! `submit` never waits: a full queue is reported to the caller immediately.
//! A panic inside one job is logged and the worker moves on to the next job.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use metrics::{counter, gauge};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::DispatcherConfig;
use crate::error::DispatchError;
use crate::job::ProcessingJob;

/// Work performed for each dequeued job
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: ProcessingJob);
}

pub struct Dispatcher {
    sender: mpsc::Sender<ProcessingJob>,
    receiver: Arc<Mutex<mpsc::Receiver<ProcessingJob>>>,
    shutdown: CancellationToken,
    workers: Mutex<JoinSet<()>>,
    worker_count: usize,
    busy: Arc<AtomicUsize>,
}

impl Dispatcher {
    /// Spawn the worker pool. Must be called from within a Tokio runtime.
    pub fn start(handler: Arc<dyn JobHandler>, config: &DispatcherConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let shutdown = CancellationToken::new();
        let busy = Arc::new(AtomicUsize::new(0));

        let mut workers = JoinSet::new();
        for worker_id in 0..config.workers {
            workers.spawn(worker_loop(
                worker_id,
                receiver.clone(),
                handler.clone(),
                shutdown.clone(),
                busy.clone(),
            ));
        }

        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "Dispatcher started"
        );

        Self {
            sender,
            receiver,
            shutdown,
            workers: Mutex::new(workers),
            worker_count: config.workers,
            busy,
        }
    }

    /// Enqueue a job without waiting for capacity
    pub fn submit(&self, job: ProcessingJob) -> Result<(), DispatchError> {
        if self.shutdown.is_cancelled() {
            return Err(DispatchError::Closed);
        }

        match self.sender.try_send(job) {
            Ok(()) => {
                gauge!("docproc_queue_depth").set(self.queue_depth() as f64);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(job_id = %job.id, "Job queue full, rejecting");
                Err(DispatchError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DispatchError::Closed),
        }
    }

    /// Jobs waiting for a worker
    pub fn queue_depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn queue_capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    /// Workers currently running a job
    pub fn busy_workers(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Stop accepting jobs and let workers finish what is queued.
    ///
    /// Returns `false` if the drain timed out and the remaining workers were aborted.
    pub async fn shutdown(&self, drain_timeout: Duration) -> bool {
        self.shutdown.cancel();
        info!(
            queued = self.queue_depth(),
            busy = self.busy_workers(),
            "Dispatcher draining"
        );

        let mut workers = self.workers.lock().await;
        let drained = tokio::time::timeout(drain_timeout, async {
            while workers.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        if drained {
            info!("Dispatcher stopped");
        } else {
            warn!(
                timeout_secs = drain_timeout.as_secs(),
                "Drain timed out, aborting remaining jobs"
            );
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }

        let mut receiver = self.receiver.lock().await;
        receiver.close();
        while let Ok(job) = receiver.try_recv() {
            counter!("docproc_jobs_dropped_total").increment(1);
            warn!(job_id = %job.id, "Job dropped at shutdown");
        }

        drained
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<ProcessingJob>>>,
    handler: Arc<dyn JobHandler>,
    shutdown: CancellationToken,
    busy: Arc<AtomicUsize>,
) {
    loop {
        let next = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                job = receiver.recv() => job,
                _ = shutdown.cancelled() => {
                    receiver.close();
                    receiver.try_recv().ok()
                }
            }
        };

        let Some(job) = next else {
            break;
        };

        let job_id = job.id.clone();
        busy.fetch_add(1, Ordering::SeqCst);
        gauge!("docproc_workers_busy").increment(1.0);

        let outcome = AssertUnwindSafe(handler.handle(job)).catch_unwind().await;

        busy.fetch_sub(1, Ordering::SeqCst);
        gauge!("docproc_workers_busy").decrement(1.0);

        if outcome.is_err() {
            counter!("docproc_job_panics_total").increment(1);
            error!(worker_id, job_id = %job_id, "Job panicked, worker continues");
        }
    }

    info!(worker_id, "Worker stopped");
}

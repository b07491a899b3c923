//! Background queue for durable writes.
//!
//! The monitoring loop hands jobs over and moves on; a single worker task
//! drains them in order. Every job reports back through a [`JobReceipt`] and
//! the shared [`DeliveryStats`] counters, so failures are observable without
//! ever blocking or rolling back the in-memory numbers.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use image::{ImageFormat, RgbImage};
use serde::Serialize;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::tracking::ClosureEvent;

use super::store::ProductivityStore;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error};

#[derive(Debug, Clone)]
pub enum PersistJob {
    Closure {
        identity_id: i64,
        session_id: Option<String>,
        event: ClosureEvent,
    },
    /// Encode `image` as JPEG at `path`, then log the reference.
    Frame {
        identity_id: i64,
        image: RgbImage,
        path: PathBuf,
        captured_at: DateTime<Utc>,
    },
}

impl PersistJob {
    fn describe(&self) -> String {
        match self {
            PersistJob::Closure { identity_id, event, .. } => {
                format!("closure {:.2}s for employee {identity_id}", event.duration_secs)
            }
            PersistJob::Frame { identity_id, path, .. } => {
                format!("frame {} for employee {identity_id}", path.display())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStats {
    pub delivered: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Completion handle for one submitted job. Dropping it is fine.
#[derive(Debug)]
pub struct JobReceipt {
    rx: oneshot::Receiver<Result<()>>,
}

impl JobReceipt {
    pub async fn wait(self) -> Result<()> {
        self.rx
            .await
            .map_err(|_| anyhow!("persistence worker stopped before finishing the job"))?
    }
}

enum Envelope {
    Job(PersistJob, oneshot::Sender<Result<()>>),
    Flush(oneshot::Sender<()>),
}

/// Cheap to clone; the worker exits once every clone is dropped.
#[derive(Clone)]
pub struct PersistenceWriter {
    tx: mpsc::UnboundedSender<Envelope>,
    counters: Arc<Counters>,
}

impl PersistenceWriter {
    /// Start the worker on the current tokio runtime.
    pub fn spawn<S: ProductivityStore>(store: S) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let handle = tokio::spawn(run_worker(store, rx, Arc::clone(&counters)));
        (Self { tx, counters }, handle)
    }

    /// Queue `job`. Never blocks; if the worker is gone the receipt resolves
    /// to an error and the job counts as failed.
    pub fn submit(&self, job: PersistJob) -> JobReceipt {
        let (reply_tx, reply_rx) = oneshot::channel();
        if let Err(mpsc::error::SendError(Envelope::Job(job, reply_tx))) =
            self.tx.send(Envelope::Job(job, reply_tx))
        {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            log_error!("persistence worker unavailable, dropped {}", job.describe());
            let _ = reply_tx.send(Err(anyhow!("persistence worker unavailable")));
        }
        JobReceipt { rx: reply_rx }
    }

    /// Resolves once every job submitted before this call has finished.
    pub async fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Envelope::Flush(done_tx))
            .map_err(|_| anyhow!("persistence worker unavailable"))?;
        done_rx
            .await
            .context("persistence worker stopped during flush")
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker<S: ProductivityStore>(
    store: S,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    counters: Arc<Counters>,
) {
    while let Some(envelope) = rx.recv().await {
        match envelope {
            Envelope::Job(job, reply) => {
                let description = job.describe();
                let result = perform(&store, job).await;
                match &result {
                    Ok(()) => {
                        counters.delivered.fetch_add(1, Ordering::Relaxed);
                        log_debug!("persisted {description}");
                    }
                    Err(err) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        log_error!("failed to persist {description}: {err:?}");
                    }
                }
                let _ = reply.send(result);
            }
            Envelope::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    log_debug!("persistence worker shutting down");
}

async fn perform<S: ProductivityStore>(store: &S, job: PersistJob) -> Result<()> {
    match job {
        PersistJob::Closure {
            identity_id,
            session_id,
            event,
        } => store.log_closure(identity_id, session_id, event).await,
        PersistJob::Frame {
            identity_id,
            image,
            path,
            captured_at,
        } => {
            let target = path.clone();
            tokio::task::spawn_blocking(move || -> Result<()> {
                if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
                image
                    .save_with_format(&target, ImageFormat::Jpeg)
                    .with_context(|| format!("failed to write {}", target.display()))
            })
            .await
            .context("frame writer join failed")??;

            store.log_frame_reference(identity_id, path, captured_at).await
        }
    }
}

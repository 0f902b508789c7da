//! The UI-affine main queue.
//!
//! Anything that touches a render surface or presentation state runs as a
//! job on this queue, one at a time, in submission order. A host either
//! spawns [`MainQueueWorker::run`] on the thread that owns its UI, or pumps
//! [`MainQueueWorker::drain`] from its own loop.

use tokio::sync::mpsc;

use crate::error::{Result, RuntimeError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Submitting side of the main queue. Cheap to clone.
#[derive(Clone)]
pub struct MainQueue {
    tx: mpsc::UnboundedSender<Job>,
}

/// Consuming side of the main queue. There is exactly one.
pub struct MainQueueWorker {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl MainQueue {
    pub fn new() -> (Self, MainQueueWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, MainQueueWorker { rx })
    }

    /// Schedule a job. Fails once the worker is gone.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        self.tx
            .send(Box::new(job))
            .map_err(|_| RuntimeError::RealmClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl MainQueueWorker {
    /// Run jobs until every [`MainQueue`] handle is dropped.
    pub async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            job();
        }
        tracing::debug!("main queue closed");
    }

    /// Run every job queued right now, including jobs those jobs queue.
    /// Returns how many ran.
    pub fn drain(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }
}

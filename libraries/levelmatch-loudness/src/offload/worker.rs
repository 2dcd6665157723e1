//! Offload workers
//!
//! A worker is anything that consumes [`WorkerRequest`]s and answers with
//! [`WorkerEvent`]s. The manager only sees the two channel ends, so the
//! backing execution context is swappable:
//!
//! ```text
//! OffloadManager                     loudness-worker thread
//!       │                                     │
//!       │  WorkerRequest::Analyze { id, .. }  │
//!       │────────────────────────────────────>│ validate + compute_metrics
//!       │                                     │
//!       │  WorkerEvent::Response(..)          │
//!       │<────────────────────────────────────│
//!       │                                     │
//!       │  drop(requests)                     │
//!       │────────────────────────────────────>│ exits
//! ```

use super::protocol::{compute_metrics, WorkerEvent, WorkerRequest, WorkerResponse};
use crate::error::OffloadError;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Name of the thread backing [`ThreadWorkerSpawner`] workers
pub const WORKER_THREAD_NAME: &str = "loudness-worker";

/// Manager-side ends of a running worker
///
/// Dropping `requests` is the shutdown signal: the worker finishes what it
/// is doing, then closes `events`.
#[derive(Debug)]
pub struct WorkerChannel {
    pub requests: mpsc::UnboundedSender<WorkerRequest>,
    pub events: mpsc::UnboundedReceiver<WorkerEvent>,
}

/// Starts offload workers
pub trait WorkerSpawner: Send + Sync {
    /// Start a fresh worker
    ///
    /// # Errors
    ///
    /// Returns [`OffloadError::WorkerUnavailable`] when no worker can run;
    /// callers then compute in-process.
    fn spawn(&self) -> Result<WorkerChannel, OffloadError>;
}

/// Runs each worker on a dedicated OS thread
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadWorkerSpawner;

impl WorkerSpawner for ThreadWorkerSpawner {
    fn spawn(&self) -> Result<WorkerChannel, OffloadError> {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || worker_loop(request_rx, event_tx))
            .map_err(|e| OffloadError::WorkerUnavailable(e.to_string()))?;

        Ok(WorkerChannel {
            requests: request_tx,
            events: event_rx,
        })
    }
}

/// Never starts a worker; every analysis runs in-process
#[derive(Debug, Clone, Default)]
pub struct UnavailableSpawner {
    reason: String,
}

impl UnavailableSpawner {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl WorkerSpawner for UnavailableSpawner {
    fn spawn(&self) -> Result<WorkerChannel, OffloadError> {
        let reason = if self.reason.is_empty() {
            "offload disabled"
        } else {
            self.reason.as_str()
        };
        Err(OffloadError::WorkerUnavailable(reason.to_string()))
    }
}

fn worker_loop(
    mut requests: mpsc::UnboundedReceiver<WorkerRequest>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    info!("Loudness worker started");

    while let Some(request) = requests.blocking_recv() {
        let WorkerRequest::Analyze { id, payload } = request;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            payload.validate().map(|()| compute_metrics(&payload))
        }));

        let event = match outcome {
            Ok(Ok(result)) => WorkerEvent::Response(WorkerResponse::Result { id, result }),
            Ok(Err(e)) => {
                debug!(id, error = %e, "Rejecting analysis request");
                WorkerEvent::Response(WorkerResponse::Error {
                    id,
                    error: e.to_string(),
                })
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(id, %message, "Loudness worker panicked");
                let _ = events.send(WorkerEvent::Fault(message));
                return;
            }
        };

        if events.send(event).is_err() {
            debug!("Offload manager gone, stopping worker");
            return;
        }
    }

    info!("Loudness worker stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

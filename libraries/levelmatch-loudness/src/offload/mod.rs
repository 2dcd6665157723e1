//! Concurrency offload for block integration
//!
//! [`OffloadManager`] moves the gating work for a track onto a background
//! worker and hands the caller a future for the result. The worker is
//! started on first use and restarted lazily after it faults.
//!
//! Failure handling:
//! - no worker can be spawned (or no tokio runtime is running):
//!   [`OffloadManager::dispatch`] returns `None` and the caller computes
//!   in-process with [`compute_metrics`]
//! - the worker reports an error for one request: only that request fails
//! - the worker faults or its event stream closes: every pending request
//!   fails with [`OffloadError::WorkerRuntime`] and the worker is retired
//!
//! Both paths run the same [`compute_metrics`], so results are identical
//! wherever they were computed.

pub mod protocol;
pub mod worker;

pub use protocol::{
    compute_metrics, measure, AnalysisPayload, WorkerEvent, WorkerRequest, WorkerResponse,
};
pub use worker::{ThreadWorkerSpawner, UnavailableSpawner, WorkerChannel, WorkerSpawner};

use crate::analyzer::LoudnessMetrics;
use crate::error::OffloadError;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

type Completion = oneshot::Sender<Result<LoudnessMetrics, OffloadError>>;

static GLOBAL: OnceLock<Arc<OffloadManager>> = OnceLock::new();

/// Owns one offload worker and the requests in flight to it
pub struct OffloadManager {
    spawner: Arc<dyn WorkerSpawner>,
    shared: Arc<Mutex<Shared>>,
}

struct ActiveWorker {
    requests: mpsc::UnboundedSender<WorkerRequest>,
    generation: u64,
}

#[derive(Default)]
struct Shared {
    worker: Option<ActiveWorker>,
    pending: HashMap<u64, Completion>,
    next_id: u64,
    generation: u64,
}

impl OffloadManager {
    pub fn new(spawner: Arc<dyn WorkerSpawner>) -> Self {
        Self {
            spawner,
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    /// Process-wide manager backed by a [`ThreadWorkerSpawner`]
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new(Arc::new(ThreadWorkerSpawner)))))
    }

    /// Send an analysis to the worker
    ///
    /// `make_payload` runs only once a worker is available, so callers can
    /// defer copying their buffers until the transfer actually happens. It
    /// runs without the manager lock held.
    /// Returns `None` when no worker can run; compute in-process instead.
    pub fn dispatch<F>(&self, make_payload: F) -> Option<PendingAnalysis>
    where
        F: FnOnce() -> AnalysisPayload,
    {
        let Ok(runtime) = Handle::try_current() else {
            debug!("No tokio runtime, skipping offload");
            return None;
        };

        let mut shared = lock(&self.shared);
        let mut started = None;
        if shared.worker.is_none() {
            match self.spawner.spawn() {
                Ok(channel) => started = Some(shared.install_worker(channel)),
                Err(e) => {
                    warn!(error = %e, "Offload worker unavailable, analyzing in-process");
                    return None;
                }
            }
        }
        let (requests, generation) = shared
            .worker
            .as_ref()
            .map(|worker| (worker.requests.clone(), worker.generation))?;

        // Registered before sending so a fast reply always finds its request
        let id = shared.allocate_id();
        let (completion, receiver) = oneshot::channel();
        shared.pending.insert(id, completion);
        drop(shared);

        // The pump takes the lock itself, so it starts only once ours is released
        if let Some((generation, events)) = started {
            self.spawn_pump(&runtime, generation, events);
        }

        let request = WorkerRequest::Analyze {
            id,
            payload: make_payload(),
        };
        if requests.send(request).is_err() {
            let mut shared = lock(&self.shared);
            shared.pending.remove(&id);
            shared.fail_worker(generation, "worker stopped accepting requests");
            return None;
        }

        debug!(id, "Dispatched analysis");
        Some(PendingAnalysis { id, receiver })
    }

    /// Stop the worker and reject everything still pending
    pub fn shutdown(&self) {
        let mut shared = lock(&self.shared);
        if shared.retire_worker() {
            info!("Offload worker shut down");
        }
        for (_, completion) in shared.pending.drain() {
            let _ = completion.send(Err(OffloadError::Shutdown));
        }
    }

    /// Requests sent and not yet answered
    pub fn pending_count(&self) -> usize {
        lock(&self.shared).pending.len()
    }

    pub fn is_worker_running(&self) -> bool {
        lock(&self.shared).worker.is_some()
    }

    fn spawn_pump(
        &self,
        runtime: &Handle,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    ) {
        let guard = PumpGuard {
            shared: Arc::downgrade(&self.shared),
            generation,
        };
        runtime.spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(shared) = guard.shared.upgrade() else {
                    return;
                };
                lock(&shared).handle_event(generation, event);
            }
            // guard drops here and retires this generation
        });
    }
}

impl Drop for OffloadManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for OffloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = lock(&self.shared);
        f.debug_struct("OffloadManager")
            .field("worker_running", &shared.worker.is_some())
            .field("pending", &shared.pending.len())
            .field("generation", &shared.generation)
            .finish()
    }
}

impl Shared {
    /// Make `channel` the current worker, returning its generation and event stream
    fn install_worker(
        &mut self,
        channel: WorkerChannel,
    ) -> (u64, mpsc::UnboundedReceiver<WorkerEvent>) {
        self.generation = self.generation.wrapping_add(1);
        self.worker = Some(ActiveWorker {
            requests: channel.requests,
            generation: self.generation,
        });
        info!(generation = self.generation, "Offload worker started");
        (self.generation, channel.events)
    }

    fn allocate_id(&mut self) -> u64 {
        loop {
            self.next_id = self.next_id.wrapping_add(1);
            if !self.pending.contains_key(&self.next_id) {
                return self.next_id;
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| worker.generation == generation)
    }

    fn handle_event(&mut self, generation: u64, event: WorkerEvent) {
        if !self.is_current(generation) {
            debug!(generation, "Ignoring event from retired worker");
            return;
        }

        match event {
            WorkerEvent::Response(WorkerResponse::Result { id, result }) => {
                self.resolve(id, Ok(result));
            }
            WorkerEvent::Response(WorkerResponse::Error { id, error }) => {
                self.resolve(id, Err(OffloadError::Call(error)));
            }
            WorkerEvent::Fault(message) => self.fail_worker(generation, &message),
        }
    }

    fn resolve(&mut self, id: u64, outcome: Result<LoudnessMetrics, OffloadError>) {
        match self.pending.remove(&id) {
            // The caller may have stopped waiting
            Some(completion) => {
                let _ = completion.send(outcome);
            }
            None => debug!(id, "Ignoring response with no pending request"),
        }
    }

    fn fail_worker(&mut self, generation: u64, reason: &str) {
        if !self.is_current(generation) {
            return;
        }

        error!(
            generation,
            reason,
            rejected = self.pending.len(),
            "Offload worker failed"
        );
        self.retire_worker();
        for (_, completion) in self.pending.drain() {
            let _ = completion.send(Err(OffloadError::WorkerRuntime(reason.to_string())));
        }
    }

    /// Drop the current worker; its thread exits once the request channel closes
    fn retire_worker(&mut self) -> bool {
        self.worker.take().is_some()
    }
}

/// Retires the worker generation when its event pump ends, however it ends
struct PumpGuard {
    shared: Weak<Mutex<Shared>>,
    generation: u64,
}

impl Drop for PumpGuard {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared).fail_worker(self.generation, "worker event stream closed");
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An analysis in flight on the worker
#[derive(Debug)]
pub struct PendingAnalysis {
    id: u64,
    receiver: oneshot::Receiver<Result<LoudnessMetrics, OffloadError>>,
}

impl PendingAnalysis {
    /// Correlation id of the request
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for PendingAnalysis {
    type Output = Result<LoudnessMetrics, OffloadError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(OffloadError::Shutdown)))
    }
}

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use super::{ConnectionSettings, Request, RequestQueue, RequestWorker};
use crate::wire::simple_http::TransportError;

pub const DEFAULT_MAX_CLIENTS: usize = 10;
pub const DEFAULT_MAX_CONNECTIONS: usize = 2;

#[derive(Clone, Copy, Debug)]
pub struct DispatcherSettings {
    pub max_clients: usize,
    pub max_connections: usize,
    pub threaded: bool,
    pub connection: ConnectionSettings,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            max_clients: DEFAULT_MAX_CLIENTS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            threaded: true,
            connection: ConnectionSettings::default(),
        }
    }
}

impl DispatcherSettings {
    #[must_use]
    pub fn is_synchronous(&self) -> bool {
        self.max_clients <= 1 || !self.threaded
    }
}

struct WorkerSlot {
    busy: Arc<AtomicBool>,
    _thread: thread::JoinHandle<()>,
}

enum Mode {
    /// The submitting thread drives this worker itself.
    Synchronous(Mutex<RequestWorker>),
    Threaded {
        workers: Mutex<Vec<WorkerSlot>>,
        shutdown: Arc<AtomicBool>,
    },
}

/// Routes requests onto a FIFO queue served by a bounded pool of workers.
///
/// With one client (or threading off) no threads are spawned: the caller
/// of [`RequestDispatcher::request`] runs the worker until its request is
/// settled.
pub struct RequestDispatcher {
    settings: DispatcherSettings,
    queue: Arc<RequestQueue>,
    next_id: AtomicUsize,
    mode: Mode,
}

impl core::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("settings", &self.settings)
            .field("queued", &self.queue.len())
            .field("workers", &self.worker_count())
            .finish()
    }
}

impl RequestDispatcher {
    #[must_use]
    pub fn new(settings: DispatcherSettings) -> Self {
        let mode = if settings.is_synchronous() {
            Mode::Synchronous(Mutex::new(RequestWorker::new(
                0,
                settings.max_connections,
                settings.connection,
            )))
        } else {
            Mode::Threaded {
                workers: Mutex::new(Vec::new()),
                shutdown: Arc::new(AtomicBool::new(false)),
            }
        };

        Self {
            settings,
            queue: Arc::new(RequestQueue::unbounded()),
            next_id: AtomicUsize::new(1),
            mode,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    #[must_use]
    pub fn is_synchronous(&self) -> bool {
        matches!(self.mode, Mode::Synchronous(_))
    }

    /// Spawned worker threads; always zero in synchronous mode.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        match &self.mode {
            Mode::Synchronous(_) => 0,
            Mode::Threaded { workers, .. } => {
                workers.lock().unwrap_or_else(PoisonError::into_inner).len()
            }
        }
    }

    /// Submits a request. In synchronous mode this returns once the
    /// request is settled; otherwise it returns after queueing and callers
    /// use [`Request::wait`].
    pub fn request(&self, request: Arc<Request>) {
        if let Err(err) = self.queue.push(request) {
            err.into_inner().fail(TransportError::ConnectFailed {
                target: String::from("dispatcher"),
                reason: "dispatcher shut down".into(),
            });
            return;
        }

        match &self.mode {
            Mode::Synchronous(worker) => self.drive(worker),
            Mode::Threaded { workers, shutdown } => self.ensure_worker(workers, shutdown),
        }
    }

    /// Runs the single worker on the calling thread until the queue is
    /// drained, which includes every retry of the submitted request.
    fn drive(&self, worker: &Mutex<RequestWorker>) {
        let mut worker = worker.lock().unwrap_or_else(PoisonError::into_inner);
        while let Ok(next) = self.queue.pop() {
            if next.is_complete() {
                continue;
            }
            let outcome = worker.handle_request(&next);
            worker.settle(&self.queue, next, outcome);
        }
    }

    fn ensure_worker(&self, workers: &Mutex<Vec<WorkerSlot>>, shutdown: &Arc<AtomicBool>) {
        let mut workers = workers.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = workers
            .iter()
            .any(|slot| !slot.busy.load(Ordering::Acquire));
        if idle || workers.len() >= self.settings.max_clients {
            return;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let worker = RequestWorker::new(id, self.settings.max_connections, self.settings.connection);
        let busy = worker.busy_flag();
        let queue = self.queue.clone();
        let shutdown = shutdown.clone();

        match thread::Builder::new()
            .name(format!("client-{id}"))
            .spawn(move || worker.run(queue, shutdown))
        {
            Ok(handle) => {
                restobj_logs::debug!("spawned request worker client-{}", id);
                workers.push(WorkerSlot {
                    busy,
                    _thread: handle,
                });
            }
            Err(err) => {
                restobj_logs::error!("failed to spawn request worker: {}", err);
            }
        }
    }
}

impl Drop for RequestDispatcher {
    fn drop(&mut self) {
        if let Mode::Threaded { shutdown, .. } = &self.mode {
            shutdown.store(true, Ordering::Release);
        }
        self.queue.close();
        while let Ok(pending) = self.queue.pop() {
            pending.fail(TransportError::ConnectFailed {
                target: pending.key.to_string(),
                reason: "dispatcher shut down".into(),
            });
        }
    }
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use concurrent_queue::ConcurrentQueue;

use super::{Connection, ConnectionKey, ConnectionSettings, Request, Response};
use crate::wire::simple_http::TransportError;

/// How long an idle worker waits on the queue before sweeping its
/// connections.
pub const PULL_TIMEOUT: Duration = Duration::from_secs(5);

const PULL_MAX_BACKOFF: Duration = Duration::from_millis(20);

pub type RequestQueue = ConcurrentQueue<Arc<Request>>;

/// What became of one attempt at a request.
#[derive(Debug)]
pub enum HandleOutcome {
    Completed(Response),

    /// Transient failure with budget left; requeue after the wait.
    Retry(Duration),

    /// No room for another connection; requeue the request untouched.
    Deferred,

    Fatal(TransportError),
}

/// Owns a small map of connections and executes requests over them.
pub struct RequestWorker {
    id: usize,
    max_connections: usize,
    settings: ConnectionSettings,
    connections: HashMap<ConnectionKey, Connection>,
    busy: Arc<AtomicBool>,
}

impl core::fmt::Debug for RequestWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestWorker")
            .field("id", &self.id)
            .field("max_connections", &self.max_connections)
            .field("connections", &self.connections.len())
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl RequestWorker {
    #[must_use]
    pub fn new(id: usize, max_connections: usize, settings: ConnectionSettings) -> Self {
        Self {
            id,
            max_connections: max_connections.max(1),
            settings,
            connections: HashMap::new(),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub fn busy_flag(&self) -> Arc<AtomicBool> {
        self.busy.clone()
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn has_connection(&self, key: &ConnectionKey) -> bool {
        self.connections.contains_key(key)
    }

    /// Makes one attempt at `request`.
    ///
    /// Every failure evicts the connection it happened on; only transient
    /// ones with retry budget left come back as [`HandleOutcome::Retry`].
    pub fn handle_request(&mut self, request: &Request) -> HandleOutcome {
        let key = &request.key;

        if let Some(connection) = self.connections.get_mut(key) {
            if !connection.check() {
                self.connections.remove(key);
            }
        }

        if !self.connections.contains_key(key) {
            if self.connections.len() >= self.max_connections {
                restobj_logs::debug!(
                    "worker {} has no room for a connection to {}, deferring",
                    self.id,
                    key
                );
                return HandleOutcome::Deferred;
            }
            self.connections
                .insert(key.clone(), Connection::new(key.clone(), self.settings));
        }

        let Some(connection) = self.connections.get_mut(key) else {
            return HandleOutcome::Deferred;
        };

        restobj_logs::traffic!("{} {}{}", request.method, key, request.path);
        let result = request.with_payload(|payload| {
            connection.request(request.method, &request.path, &request.headers, payload)
        });

        match result {
            Ok(raw) => {
                restobj_logs::traffic!(
                    "{} {}{} -> {} {}",
                    request.method,
                    key,
                    request.path,
                    raw.status,
                    raw.reason
                );
                HandleOutcome::Completed(Response::from_raw(request.method, &request.path, raw))
            }
            Err(err) if err.is_transient() => {
                self.connections.remove(key);
                request.record_failure(err.clone());
                match request.retry() {
                    Some(wait) => {
                        restobj_logs::debug!(
                            "transient failure on {} {}: {}, retrying",
                            request.method,
                            request.path,
                            err
                        );
                        HandleOutcome::Retry(wait)
                    }
                    None => HandleOutcome::Fatal(TransportError::RetriesExhausted(Box::new(err))),
                }
            }
            Err(err) => {
                self.connections.remove(key);
                restobj_logs::warn!(
                    "request {} {} failed on {}: {}",
                    request.method,
                    request.path,
                    key,
                    err
                );
                HandleOutcome::Fatal(err)
            }
        }
    }

    /// Drops the connection that has gone unused the longest.
    pub fn evict_least_recently_used(&mut self) -> Option<ConnectionKey> {
        let key = self
            .connections
            .values()
            .min_by_key(|connection| connection.last_used())
            .map(|connection| connection.key().clone())?;
        self.connections.remove(&key);
        Some(key)
    }

    /// Runs `check()` over every connection, dropping the expired ones.
    pub fn sweep(&mut self) -> usize {
        let before = self.connections.len();
        self.connections.retain(|_, connection| connection.check());
        before - self.connections.len()
    }

    /// Applies an outcome: latches results and failures, requeues the rest.
    pub fn settle(&mut self, queue: &RequestQueue, request: Arc<Request>, outcome: HandleOutcome) {
        match outcome {
            HandleOutcome::Completed(response) => {
                request.set_response(response);
            }
            HandleOutcome::Fatal(err) => {
                request.fail(err);
            }
            HandleOutcome::Retry(wait) => {
                if !wait.is_zero() {
                    thread::sleep(wait);
                }
                requeue(queue, request);
            }
            HandleOutcome::Deferred => {
                // make room so this request can be served on a later pull
                self.evict_least_recently_used();
                requeue(queue, request);
            }
        }
    }

    /// Thread body: drain the queue until `shutdown` is raised.
    pub fn run(mut self, queue: Arc<RequestQueue>, shutdown: Arc<AtomicBool>) {
        restobj_logs::debug!("worker {} started", self.id);
        while !shutdown.load(Ordering::Acquire) {
            match pull(&queue, &shutdown, PULL_TIMEOUT) {
                Some(request) => {
                    self.busy.store(true, Ordering::Release);
                    if !request.is_complete() {
                        let outcome = self.handle_request(&request);
                        self.settle(&queue, request, outcome);
                    }
                    self.busy.store(false, Ordering::Release);
                }
                None => {
                    let expired = self.sweep();
                    if expired > 0 {
                        restobj_logs::debug!("worker {} expired {} idle connections", self.id, expired);
                    }
                }
            }
        }
        restobj_logs::debug!("worker {} stopped", self.id);
    }
}

fn requeue(queue: &RequestQueue, request: Arc<Request>) {
    if let Err(err) = queue.push(request) {
        let request = err.into_inner();
        request.fail(TransportError::ConnectFailed {
            target: request.key.to_string(),
            reason: "dispatcher shut down".into(),
        });
    }
}

/// Takes the next request, waiting at most `timeout`.
fn pull(queue: &RequestQueue, shutdown: &AtomicBool, timeout: Duration) -> Option<Arc<Request>> {
    let started = Instant::now();
    let mut pause = Duration::from_millis(1);
    loop {
        if let Ok(request) = queue.pop() {
            return Some(request);
        }
        if queue.is_closed() || shutdown.load(Ordering::Acquire) || started.elapsed() >= timeout {
            return None;
        }
        thread::sleep(pause);
        pause = (pause * 2).min(PULL_MAX_BACKOFF);
    }
}

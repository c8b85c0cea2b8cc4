use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use super::ConnectionKey;
use crate::retries::{RetryDecider, RetryState, SameBackoffDecider};
use crate::wire::simple_http::{
    first_header, Payload, RawResponse, SimpleHeader, SimpleHeaders, SimpleMethod,
    TransportError,
};

/// How often [`Request::wait`] looks at the response slot.
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub const DEFAULT_REQUEST_RETRIES: u32 = 10;

/// A response whose body has been read in full, so the connection that
/// carried it is already free for the next request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub method: SimpleMethod,
    pub path: String,
    pub status: u16,
    pub reason: String,
    pub headers: SimpleHeaders,
    pub body: Vec<u8>,
}

impl Response {
    #[must_use]
    pub fn from_raw(method: SimpleMethod, path: impl Into<String>, raw: RawResponse) -> Self {
        Self {
            method,
            path: path.into(),
            status: raw.status,
            reason: raw.reason,
            headers: raw.headers,
            body: raw.body,
        }
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        first_header(&self.headers, &SimpleHeader::from(name))
    }

    /// Media type without parameters, lower-cased.
    #[must_use]
    pub fn content_type(&self) -> Option<String> {
        first_header(&self.headers, &SimpleHeader::CONTENT_TYPE).map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }

    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    TimedOut(Duration),
    Failed(TransportError),
}

type Outcome = Result<Arc<Response>, TransportError>;

/// One unit of work handed to the dispatcher, and the latch its caller
/// waits on.
///
/// The outcome slot latches once; later writes are ignored so a duplicate
/// delivery cannot replace a result a waiter already saw.
pub struct Request {
    pub method: SimpleMethod,
    pub key: ConnectionKey,
    pub path: String,
    pub headers: SimpleHeaders,
    payload: Mutex<Payload>,
    retries: Mutex<RetryState>,
    decider: SameBackoffDecider,
    last_failure: Mutex<Option<TransportError>>,
    outcome: OnceLock<Outcome>,
}

impl core::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("key", &self.key)
            .field("path", &self.path)
            .field("complete", &self.is_complete())
            .finish_non_exhaustive()
    }
}

impl Request {
    #[must_use]
    pub fn new(
        method: SimpleMethod,
        key: ConnectionKey,
        path: impl Into<String>,
        headers: SimpleHeaders,
        payload: Payload,
    ) -> Self {
        Self {
            method,
            key,
            path: path.into(),
            headers,
            payload: Mutex::new(payload),
            retries: Mutex::new(RetryState::new(0, DEFAULT_REQUEST_RETRIES, None)),
            decider: SameBackoffDecider::new(Duration::ZERO),
            last_failure: Mutex::new(None),
            outcome: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn with_retries(mut self, total_allowed: u32, backoff: Duration) -> Self {
        self.retries = Mutex::new(RetryState::new(0, total_allowed, None));
        self.decider = SameBackoffDecider::new(backoff);
        self
    }

    /// Consumes one unit of the retry budget.
    ///
    /// Returns the wait before the next attempt, or `None` once the budget
    /// is spent.
    pub fn retry(&self) -> Option<Duration> {
        let mut state = self.retries.lock().unwrap_or_else(PoisonError::into_inner);
        let next = self.decider.decide(state.clone())?;
        let wait = next.wait.unwrap_or_default();
        *state = next;
        Some(wait)
    }

    #[must_use]
    pub fn retries_remaining(&self) -> u32 {
        self.retries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remaining()
    }

    /// Runs `call` with exclusive access to the body.
    pub fn with_payload<T>(&self, call: impl FnOnce(&mut Payload) -> T) -> T {
        let mut payload = self.payload.lock().unwrap_or_else(PoisonError::into_inner);
        call(&mut payload)
    }

    pub fn record_failure(&self, err: TransportError) {
        *self.last_failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
    }

    #[must_use]
    pub fn last_failure(&self) -> Option<TransportError> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Latches the response; returns false when an outcome was already set.
    pub fn set_response(&self, response: Response) -> bool {
        self.outcome.set(Ok(Arc::new(response))).is_ok()
    }

    /// Latches a failure; returns false when an outcome was already set.
    pub fn fail(&self, err: TransportError) -> bool {
        self.outcome.set(Err(err)).is_ok()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.outcome.get().is_some()
    }

    #[must_use]
    pub fn outcome(&self) -> Option<Result<Arc<Response>, TransportError>> {
        self.outcome.get().cloned()
    }

    /// Polls the outcome slot every [`WAIT_POLL_INTERVAL`] until it is set.
    ///
    /// A timed out wait does not stop a worker that already started the
    /// call; its result is simply never observed.
    ///
    /// # Errors
    ///
    /// [`WaitError::TimedOut`] once `timeout` elapses, or
    /// [`WaitError::Failed`] with the transport failure latched by a worker.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<Arc<Response>, WaitError> {
        let started = Instant::now();
        loop {
            if let Some(outcome) = self.outcome.get() {
                return outcome.clone().map_err(WaitError::Failed);
            }
            let elapsed = started.elapsed();
            let pause = match timeout {
                Some(limit) if elapsed >= limit => return Err(WaitError::TimedOut(elapsed)),
                Some(limit) => WAIT_POLL_INTERVAL.min(limit - elapsed),
                None => WAIT_POLL_INTERVAL,
            };
            thread::sleep(pause);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::simple_http::client::Scheme;

    fn request() -> Request {
        Request::new(
            SimpleMethod::GET,
            ConnectionKey::new(Scheme::Http, "localhost", 80),
            "/api",
            SimpleHeaders::new(),
            Payload::Empty,
        )
    }

    fn response(status: u16) -> Response {
        Response {
            method: SimpleMethod::GET,
            path: "/api".into(),
            status,
            reason: String::new(),
            headers: SimpleHeaders::new(),
            body: Vec::new(),
        }
    }

    /// WHY: A duplicate delivery must not corrupt an observed result
    /// WHAT: The first response wins and later writes are rejected
    #[test]
    fn test_response_slot_latches_once() {
        let request = request();
        assert!(request.set_response(response(200)));
        assert!(!request.set_response(response(500)));
        assert!(!request.fail(TransportError::BadStatusLine(String::new())));

        let outcome = request.wait(None).expect("has response");
        assert_eq!(outcome.status, 200);
    }

    #[test]
    fn test_wait_times_out() {
        let request = request();
        let started = Instant::now();
        let result = request.wait(Some(Duration::from_millis(150)));
        assert!(matches!(result, Err(WaitError::TimedOut(_))));
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn test_wait_sees_response_from_other_thread() {
        let request = Arc::new(request());
        let writer = request.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            writer.set_response(response(204));
        });

        let outcome = request.wait(Some(Duration::from_secs(5))).expect("response arrives");
        assert_eq!(outcome.status, 204);
        handle.join().expect("writer thread");
    }

    #[test]
    fn test_failure_reaches_waiter() {
        let request = request();
        request.fail(TransportError::MalformedResponse("bad".into()));
        assert_eq!(
            request.wait(None),
            Err(WaitError::Failed(TransportError::MalformedResponse("bad".into())))
        );
    }

    #[test]
    fn test_retry_budget_is_consumed() {
        let request = request().with_retries(2, Duration::from_millis(5));
        assert_eq!(request.retries_remaining(), 2);
        assert_eq!(request.retry(), Some(Duration::from_millis(5)));
        assert_eq!(request.retry(), Some(Duration::from_millis(5)));
        assert_eq!(request.retry(), None);
        assert_eq!(request.retries_remaining(), 0);
    }

    #[test]
    fn test_content_type_strips_parameters() {
        let mut response = response(200);
        crate::wire::simple_http::add_header(
            &mut response.headers,
            "Content-Type",
            "Application/JSON; charset=utf-8",
        );
        assert_eq!(response.content_type().as_deref(), Some("application/json"));
        assert_eq!(response.header("content-type"), Some("Application/JSON; charset=utf-8"));
    }
}

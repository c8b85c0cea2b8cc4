//! Test HTTP server implementation.
//!
//! WHY: Integration tests need a real peer on a real socket so pooling,
//! keep-alive reuse and retries are exercised end to end.
//!
//! WHAT: `TestHttpServer` listens on localhost, serves every connection on
//! its own thread, keeps connections alive across requests and records
//! each request it parses.
//!
//! HOW: Requests are parsed with `restobj_core::wire::simple_http::read_request`,
//! so Content-Length and chunked uploads both arrive as complete bodies.

use std::io::{BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use restobj_core::wire::simple_http::{read_request, RawRequest, SimpleMethod};

type ResponseHandler = Arc<dyn Fn(&RawRequest) -> HttpResponse + Send + Sync>;
type RequestLog = Arc<Mutex<Vec<RawRequest>>>;

/// How long an idle keep-alive connection is held open.
const CONNECTION_IDLE: Duration = Duration::from_secs(10);

/// Simple HTTP response representation for testing.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code (e.g., 200)
    pub status: u16,
    /// Status text (e.g., "OK")
    pub status_text: String,
    /// Response headers; Content-Length is added when rendering.
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Vec<u8>,
    /// Close the socket after writing without announcing it, the way a
    /// server drops an idle keep-alive connection.
    pub drop_connection: bool,
}

impl HttpResponse {
    /// Create 200 OK response with a plain text body.
    #[must_use]
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::status(200, "OK")
            .with_header("Content-Type", "text/plain")
            .with_body(body)
    }

    /// Create a JSON document response.
    #[must_use]
    pub fn json(status: u16, document: &serde_json::Value) -> Self {
        Self::status(status, reason_phrase(status))
            .with_header("Content-Type", "application/json")
            .with_body(document.to_string())
    }

    /// Create a 3xx response pointing at `location`.
    #[must_use]
    pub fn redirect(status: u16, location: &str) -> Self {
        Self::status(status, reason_phrase(status)).with_header("Location", location)
    }

    /// Create custom status response without a body.
    #[must_use]
    pub fn status(code: u16, text: &str) -> Self {
        Self {
            status: code,
            status_text: text.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
            drop_connection: false,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn and_drop_connection(mut self) -> Self {
        self.drop_connection = true;
        self
    }

    /// Render response to HTTP/1.1 format.
    fn render(&self) -> Vec<u8> {
        let mut response = format!("HTTP/1.1 {} {}\r\n", self.status, self.status_text);
        for (key, value) in &self.headers {
            response.push_str(&format!("{key}: {value}\r\n"));
        }
        response.push_str(&format!("Content-Length: {}\r\n\r\n", self.body.len()));

        let mut bytes = response.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

#[must_use]
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Test HTTP server for integration testing.
///
/// Starts on a random localhost port and answers every request through the
/// handler it was built with. The accept loop stops when the server is
/// dropped; connections already open are served until the client closes
/// them or they idle out.
///
/// ```rust,no_run
/// use restobj_testing::http::{HttpResponse, TestHttpServer};
///
/// let server = TestHttpServer::with_response(|req| {
///     if req.target == "/redirect" {
///         HttpResponse::redirect(302, "/target")
///     } else {
///         HttpResponse::ok(b"Success".to_vec())
///     }
/// });
/// assert!(server.url("/redirect").starts_with("http://127.0.0.1:"));
/// ```
pub struct TestHttpServer {
    addr: String,
    _handle: Option<thread::JoinHandle<()>>,
    running: Arc<AtomicBool>,
    requests: RequestLog,
    connections: Arc<AtomicUsize>,
}

impl core::fmt::Debug for TestHttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestHttpServer")
            .field("addr", &self.addr)
            .field("connections", &self.connections_accepted())
            .finish_non_exhaustive()
    }
}

impl TestHttpServer {
    /// Start a server that answers 200 OK to everything.
    #[must_use]
    pub fn start() -> Self {
        Self::with_response(|_req| HttpResponse::ok(b"OK".to_vec()))
    }

    /// Start server with custom response handler.
    ///
    /// # Panics
    ///
    /// When no localhost port can be bound.
    #[must_use]
    pub fn with_response<F>(handler: F) -> Self
    where
        F: Fn(&RawRequest) -> HttpResponse + Send + Sync + 'static,
    {
        let listener =
            TcpListener::bind("127.0.0.1:0").expect("Failed to bind test HTTP server to localhost");
        let addr = format!(
            "http://{}",
            listener.local_addr().expect("bound listener has an address")
        );

        let running = Arc::new(AtomicBool::new(true));
        let requests: RequestLog = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let handler: ResponseHandler = Arc::new(handler);

        let running_clone = Arc::clone(&running);
        let requests_clone = Arc::clone(&requests);
        let connections_clone = Arc::clone(&connections);

        let handle = thread::spawn(move || {
            // Set non-blocking so we can check running flag
            listener
                .set_nonblocking(true)
                .expect("Failed to set non-blocking");

            while running_clone.load(Ordering::Relaxed) {
                match listener.accept() {
                    Ok((stream, sock_addr)) => {
                        tracing::debug!("Got a client connection: {sock_addr:?}");
                        connections_clone.fetch_add(1, Ordering::SeqCst);
                        let handler = Arc::clone(&handler);
                        let requests = Arc::clone(&requests_clone);
                        thread::spawn(move || {
                            if let Err(e) = Self::handle_connection(stream, &handler, &requests) {
                                tracing::debug!("TestHttpServer connection error: {e}");
                            }
                        });
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(e) => {
                        tracing::info!("TestHttpServer accept error: {e}");
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            _handle: Some(handle),
            running,
            requests,
            connections,
        }
    }

    /// Full URL for a path on this server, e.g. `http://127.0.0.1:54321/api`.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.addr
    }

    /// Every request parsed so far, in arrival order.
    #[must_use]
    pub fn requests(&self) -> Vec<RawRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests seen for `method` on exactly `target`.
    #[must_use]
    pub fn hits(&self, method: SimpleMethod, target: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|request| request.method == method && request.target == target)
            .count()
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn clear_requests(&self) {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// TCP connections accepted so far.
    #[must_use]
    pub fn connections_accepted(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Serves requests off one connection until the peer closes it.
    fn handle_connection(
        stream: TcpStream,
        handler: &ResponseHandler,
        requests: &RequestLog,
    ) -> Result<(), Box<dyn std::error::Error>> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(CONNECTION_IDLE))?;
        let mut writer = stream.try_clone()?;
        let mut reader = BufReader::new(stream);

        loop {
            let Some(request) = read_request(&mut reader)? else {
                tracing::debug!("Client closed connection");
                return Ok(());
            };
            tracing::debug!("Received {} {}", request.method, request.target);

            requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request.clone());

            let response = handler(&request);
            writer.write_all(&response.render())?;
            writer.flush()?;

            let client_closes = request
                .header("connection")
                .is_some_and(|value| value.eq_ignore_ascii_case("close"));
            if response.drop_connection || client_closes {
                writer.shutdown(std::net::Shutdown::Both)?;
                return Ok(());
            }
        }
    }
}

impl Drop for TestHttpServer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

use std::io::{self, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::wire::simple_http::{
    read_response, write_request, Payload, RawResponse, SimpleHeaders, SimpleMethod,
    TransportError,
};

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidScheme`] for anything but http(s).
    pub fn parse(scheme: &str) -> Result<Self, TransportError> {
        match scheme.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(TransportError::InvalidScheme(other.to_string())),
        }
    }

    #[must_use]
    pub fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

impl core::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Https => write!(f, "https"),
        }
    }
}

/// Identity of a pooled connection: `(scheme, host:port)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl ConnectionKey {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
        }
    }

    #[must_use]
    pub fn hostport(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl core::fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ConnectionSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

enum RawStream {
    Plain(TcpStream),
    #[cfg(feature = "ssl-rustls")]
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

impl Read for RawStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.read(buf),
            #[cfg(feature = "ssl-rustls")]
            Self::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for RawStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.write(buf),
            #[cfg(feature = "ssl-rustls")]
            Self::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(stream) => stream.flush(),
            #[cfg(feature = "ssl-rustls")]
            Self::Tls(stream) => stream.flush(),
        }
    }
}

#[cfg(feature = "ssl-rustls")]
fn tls_config() -> Result<std::sync::Arc<rustls::ClientConfig>, TransportError> {
    use std::sync::{Arc, OnceLock};

    static CONFIG: OnceLock<Arc<rustls::ClientConfig>> = OnceLock::new();
    if let Some(config) = CONFIG.get() {
        return Ok(config.clone());
    }

    let roots = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|err| TransportError::TlsHandshakeFailed(err.to_string()))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(CONFIG.get_or_init(|| Arc::new(config)).clone())
}

/// One socket to one `(scheme, host:port)`, opened on first use and kept
/// open across requests until it idles out or fails.
///
/// Owned by exactly one worker, so nothing here is synchronized.
pub struct Connection {
    key: ConnectionKey,
    settings: ConnectionSettings,
    stream: Option<BufReader<RawStream>>,
    last_used: Instant,
    served: usize,
}

impl core::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.key)
            .field("open", &self.stream.is_some())
            .field("served", &self.served)
            .finish()
    }
}

impl Connection {
    #[must_use]
    pub fn new(key: ConnectionKey, settings: ConnectionSettings) -> Self {
        Self {
            key,
            settings,
            stream: None,
            last_used: Instant::now(),
            served: 0,
        }
    }

    #[must_use]
    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    #[must_use]
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Number of responses read over this connection.
    #[must_use]
    pub fn served(&self) -> usize {
        self.served
    }

    /// Closes the socket if it sat idle past the idle timeout.
    ///
    /// Returns false once the connection has expired, after which the
    /// owning worker drops it.
    pub fn check(&mut self) -> bool {
        if self.last_used.elapsed() >= self.settings.idle_timeout {
            if self.stream.is_some() {
                restobj_logs::debug!("Closing idle connection to {}", self.key);
            }
            self.close();
            return false;
        }
        true
    }

    pub fn close(&mut self) {
        self.stream = None;
    }

    /// Sends one request and reads its response in full.
    ///
    /// # Errors
    ///
    /// Any failure closes the socket. Failures on a reused socket that look
    /// like the server having dropped it are reported as
    /// [`TransportError::StaleConnection`].
    pub fn request(
        &mut self,
        method: SimpleMethod,
        path: &str,
        headers: &SimpleHeaders,
        payload: &mut Payload,
    ) -> Result<RawResponse, TransportError> {
        let reused = self.stream.is_some();
        if !reused {
            self.open()?;
        }

        let result = match self.stream.as_mut() {
            Some(stream) => write_request(stream.get_mut(), method, path, headers, payload)
                .and_then(|()| read_response(stream, method)),
            None => Err(TransportError::ConnectFailed {
                target: self.key.to_string(),
                reason: "socket not open".into(),
            }),
        };

        self.last_used = Instant::now();
        match result {
            Ok(response) => {
                self.served += 1;
                if response.close_connection {
                    self.close();
                }
                Ok(response)
            }
            Err(err) => {
                self.close();
                Err(if reused { classify_reused_failure(err) } else { err })
            }
        }
    }

    fn open(&mut self) -> Result<(), TransportError> {
        let target = self.key.hostport();
        let connect_failed = |reason: String| TransportError::ConnectFailed {
            target: target.clone(),
            reason,
        };

        let addrs = (self.key.host.as_str(), self.key.port)
            .to_socket_addrs()
            .map_err(|err| connect_failed(err.to_string()))?;

        let mut last_error = String::from("no addresses resolved");
        let mut tcp = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.settings.connect_timeout) {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(err) => last_error = err.to_string(),
            }
        }
        let tcp = tcp.ok_or_else(|| connect_failed(last_error))?;
        tcp.set_read_timeout(Some(self.settings.read_timeout))?;
        tcp.set_write_timeout(Some(self.settings.read_timeout))?;
        tcp.set_nodelay(true)?;

        let raw = match self.key.scheme {
            Scheme::Http => RawStream::Plain(tcp),
            Scheme::Https => self.wrap_tls(tcp)?,
        };

        restobj_logs::debug!("Opened connection to {}", self.key);
        self.stream = Some(BufReader::new(raw));
        self.last_used = Instant::now();
        Ok(())
    }

    #[cfg(feature = "ssl-rustls")]
    fn wrap_tls(&self, tcp: TcpStream) -> Result<RawStream, TransportError> {
        let server_name = rustls::pki_types::ServerName::try_from(self.key.host.clone())
            .map_err(|err| TransportError::TlsHandshakeFailed(err.to_string()))?;
        let connection = rustls::ClientConnection::new(tls_config()?, server_name)
            .map_err(|err| TransportError::TlsHandshakeFailed(err.to_string()))?;
        Ok(RawStream::Tls(Box::new(rustls::StreamOwned::new(
            connection, tcp,
        ))))
    }

    #[cfg(not(feature = "ssl-rustls"))]
    fn wrap_tls(&self, _tcp: TcpStream) -> Result<RawStream, TransportError> {
        Err(TransportError::TlsUnavailable(self.key.to_string()))
    }
}

fn classify_reused_failure(err: TransportError) -> TransportError {
    match err {
        TransportError::IoError { kind, message }
            if matches!(
                kind,
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ) =>
        {
            TransportError::StaleConnection(message)
        }
        other => other,
    }
}

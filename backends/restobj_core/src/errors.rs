use std::time::Duration;

use derive_more::From;
use restobj_config::ConfigError;

use crate::document::DocumentError;
use crate::wire::simple_http::TransportError;

pub type RobjResult<T> = std::result::Result<T, RobjError>;

/// Typed classification of an error status returned by the server.
///
/// The mapping from status code to kind is public so callers can match on
/// the exact failure instead of parsing status numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpErrorKind {
    BadRequest,
    Unauthorized,
    PaymentRequired,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    ProxyAuthenticationRequired,
    RequestTimeout,
    Conflict,
    Gone,
    LengthRequired,
    PreconditionFailed,
    PayloadTooLarge,
    UriTooLong,
    UnsupportedMediaType,
    RangeNotSatisfiable,
    ExpectationFailed,
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    HttpVersionNotSupported,

    /// Any other 4xx.
    ClientError,

    /// Any other 5xx.
    ServerError,
}

impl HttpErrorKind {
    /// Returns the kind for an error status, or `None` for non-error codes.
    #[must_use]
    pub fn from_status(status: u16) -> Option<Self> {
        let kind = match status {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            402 => Self::PaymentRequired,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            405 => Self::MethodNotAllowed,
            406 => Self::NotAcceptable,
            407 => Self::ProxyAuthenticationRequired,
            408 => Self::RequestTimeout,
            409 => Self::Conflict,
            410 => Self::Gone,
            411 => Self::LengthRequired,
            412 => Self::PreconditionFailed,
            413 => Self::PayloadTooLarge,
            414 => Self::UriTooLong,
            415 => Self::UnsupportedMediaType,
            416 => Self::RangeNotSatisfiable,
            417 => Self::ExpectationFailed,
            500 => Self::InternalServerError,
            501 => Self::NotImplemented,
            502 => Self::BadGateway,
            503 => Self::ServiceUnavailable,
            504 => Self::GatewayTimeout,
            505 => Self::HttpVersionNotSupported,
            400..=499 => Self::ClientError,
            500..=599 => Self::ServerError,
            _ => return None,
        };
        Some(kind)
    }
}

/// An error status together with the request that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpStatusError {
    pub kind: HttpErrorKind,
    pub method: String,
    pub uri: String,
    pub status: u16,
    pub reason: String,
}

impl core::fmt::Display for HttpStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}: {} {} returned {} {}",
            self.kind, self.method, self.uri, self.status, self.reason
        )
    }
}

#[derive(From, Debug)]
pub enum RobjError {
    /// Connection level failure, after any transparent retries.
    #[from]
    Transport(TransportError),

    /// The caller stopped waiting for a response.
    #[from(ignore)]
    ResponseTimeout {
        method: String,
        uri: String,
        waited: Duration,
    },

    /// Non-success status mapped through the error table.
    #[from]
    Http(HttpStatusError),

    /// DELETE answered with something other than 200 or 404.
    #[from(ignore)]
    Delete(HttpStatusError),

    /// 300, 305 and 306 are never followed.
    #[from(ignore)]
    UnhandledRedirect { uri: String, status: u16 },

    #[from(ignore)]
    UnknownRedirect { uri: String, status: u16 },

    /// Redirect chain longer than the configured bound, or a cycle.
    #[from(ignore)]
    MaxRedirects { uri: String, hops: usize },

    #[from(ignore)]
    MissingLocation { uri: String, status: u16 },

    /// A URI points outside of the client's base URI.
    #[from(ignore)]
    ExternalUri { uri: String, base: String },

    #[from(ignore)]
    InvalidUri { uri: String, reason: String },

    /// Writing over an attribute that is its own remote resource.
    #[from(ignore)]
    RemoteInstanceOverwrite {
        name: String,
        uri: String,
        id: String,
    },

    /// A document has no tag to serialize under.
    #[from(ignore)]
    Serialization(String),

    #[from]
    Document(DocumentError),

    /// The response body is not in the document format.
    #[from(ignore)]
    NotADocument {
        uri: String,
        content_type: Option<String>,
    },

    #[from(ignore)]
    NoSuchAttribute { name: String, proxy: String },

    /// A field path such as `address.zipcode` that cannot be interpreted.
    #[from(ignore)]
    InvalidPath { path: String, reason: String },

    #[from(ignore)]
    NotACollection { uri: String, tag: String },

    #[from(ignore)]
    IndexOutOfRange { index: usize, len: usize },

    /// The proxy's parent node has been replaced since it was handed out.
    #[from(ignore)]
    StaleProxy { uri: String },

    /// The owning client has been dropped.
    #[from(ignore)]
    ClientClosed,

    #[from]
    Config(ConfigError),
}

impl RobjError {
    /// The status code carried by response level errors.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http(err) | Self::Delete(err) => Some(err.status),
            Self::UnhandledRedirect { status, .. }
            | Self::UnknownRedirect { status, .. }
            | Self::MissingLocation { status, .. } => Some(*status),
            _ => None,
        }
    }

    #[must_use]
    pub fn http_kind(&self) -> Option<HttpErrorKind> {
        match self {
            Self::Http(err) => Some(err.kind),
            _ => None,
        }
    }
}

impl std::error::Error for RobjError {}

impl core::fmt::Display for RobjError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(err) => write!(f, "Transport error: {err}"),
            Self::ResponseTimeout {
                method,
                uri,
                waited,
            } => write!(f, "Timed out after {waited:?} waiting for {method} {uri}"),
            Self::Http(err) => write!(f, "{err}"),
            Self::Delete(err) => write!(f, "Delete failed, {err}"),
            Self::UnhandledRedirect { uri, status } => {
                write!(f, "Unhandled redirect {status} for {uri}")
            }
            Self::UnknownRedirect { uri, status } => {
                write!(f, "Unknown redirect status {status} for {uri}")
            }
            Self::MaxRedirects { uri, hops } => {
                write!(f, "Exceeded redirect limit after {hops} hops from {uri}")
            }
            Self::MissingLocation { uri, status } => {
                write!(f, "Redirect {status} for {uri} carries no Location")
            }
            Self::ExternalUri { uri, base } => {
                write!(f, "URI {uri} is outside of base {base}")
            }
            Self::InvalidUri { uri, reason } => write!(f, "Invalid URI {uri}: {reason}"),
            Self::RemoteInstanceOverwrite { name, uri, id } => write!(
                f,
                "Refusing to overwrite attribute `{name}` of {uri}, it is the remote instance {id}"
            ),
            Self::Serialization(msg) => write!(f, "Serialization failed: {msg}"),
            Self::Document(err) => write!(f, "Document error: {err}"),
            Self::NotADocument { uri, content_type } => write!(
                f,
                "Response from {uri} is not a document (content type {content_type:?})"
            ),
            Self::NoSuchAttribute { name, proxy } => {
                write!(f, "'{proxy}' has no attribute '{name}'")
            }
            Self::InvalidPath { path, reason } => write!(f, "Invalid path `{path}`: {reason}"),
            Self::NotACollection { uri, tag } => {
                write!(f, "{tag} at {uri} is not a collection")
            }
            Self::IndexOutOfRange { index, len } => {
                write!(f, "Index {index} out of range for collection of {len}")
            }
            Self::StaleProxy { uri } => {
                write!(f, "Proxy for {uri} was invalidated by a refresh of its parent")
            }
            Self::ClientClosed => write!(f, "The owning client has been dropped"),
            Self::Config(err) => write!(f, "Configuration error: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// WHY: The status table is part of the public contract
    /// WHAT: Known codes map to their own kind, unknown codes to the class kind
    #[test]
    fn test_status_mapping_table() {
        assert_eq!(HttpErrorKind::from_status(404), Some(HttpErrorKind::NotFound));
        assert_eq!(HttpErrorKind::from_status(409), Some(HttpErrorKind::Conflict));
        assert_eq!(
            HttpErrorKind::from_status(503),
            Some(HttpErrorKind::ServiceUnavailable)
        );
        assert_eq!(HttpErrorKind::from_status(418), Some(HttpErrorKind::ClientError));
        assert_eq!(HttpErrorKind::from_status(599), Some(HttpErrorKind::ServerError));
        assert_eq!(HttpErrorKind::from_status(200), None);
        assert_eq!(HttpErrorKind::from_status(302), None);
    }

    #[test]
    fn test_no_such_attribute_display() {
        let err = RobjError::NoSuchAttribute {
            name: "foo".into(),
            proxy: "<restobj(api)>".into(),
        };
        assert_eq!(err.to_string(), "'<restobj(api)>' has no attribute 'foo'");
    }

    #[test]
    fn test_status_accessor() {
        let err = RobjError::Delete(HttpStatusError {
            kind: HttpErrorKind::Conflict,
            method: "DELETE".into(),
            uri: "/employees/1".into(),
            status: 409,
            reason: "Conflict".into(),
        });
        assert_eq!(err.status(), Some(409));
        assert_eq!(err.http_kind(), None);
    }
}

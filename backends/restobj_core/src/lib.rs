//! Lazy object proxies over HTTP document APIs.
//!
//! [`connect`] builds an [`HttpClient`] for a base URI; its
//! [`HttpClient::root`] returns a [`ResourceProxy`] whose attributes are
//! resolved on access, following links and caching identified resources.

extern crate url;

pub mod collections;
pub mod document;
pub mod errors;
pub mod glue;
pub mod proxy;
pub mod retries;
pub mod wire;

pub use collections::PagedCollection;
pub use document::{DocumentMapper, Input, JsonMapper, Node, NodeHandle, Value};
pub use errors::{HttpErrorKind, RobjError, RobjResult};
pub use glue::{DeleteOutcome, Fetched, HttpClient};
pub use proxy::{AttrValue, FieldPath, ResourceProxy, Resolved};
pub use restobj_config::ClientSettings;
pub use wire::simple_http::HttpData;

/// Connects a JSON client with `settings`.
///
/// # Errors
///
/// [`RobjError::Config`] for invalid settings, [`RobjError::InvalidUri`]
/// for a malformed base URI.
pub fn connect(settings: ClientSettings) -> RobjResult<HttpClient> {
    HttpClient::new(settings)
}

/// Connects with default settings to `base_uri`.
///
/// # Errors
///
/// As [`connect`].
pub fn connect_uri(base_uri: &str) -> RobjResult<HttpClient> {
    connect(ClientSettings::new(base_uri))
}

/// Loads settings from a TOML file and connects.
///
/// # Errors
///
/// [`RobjError::Config`] when the file cannot be loaded, otherwise as
/// [`connect`].
pub fn connect_from_path(path: impl Into<std::path::PathBuf>) -> RobjResult<HttpClient> {
    connect(ClientSettings::from_path(path)?)
}

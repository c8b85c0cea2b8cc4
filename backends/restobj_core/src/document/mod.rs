//! Tagged document trees and the mapper that moves them on and off the wire.
//!
//! A [`Node`] has a tag, an attribute map, ordered child elements and
//! optional text. Child elements hold a [`Value`]: text, a nested node, or
//! a list of either. Nodes live behind [`NodeHandle`]s so proxies can share
//! and edit subtrees in place.

mod input;
mod json;
mod node;

pub use input::*;
pub use json::*;
pub use node::*;

use derive_more::From;

#[derive(From, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[from(ignore)]
    Parse(String),

    /// A document must be one object with a single key naming its root.
    #[from(ignore)]
    InvalidRoot(String),

    #[from(ignore)]
    InvalidAttribute { name: String, reason: String },

    /// Nothing to serialize the document under.
    #[from(ignore)]
    MissingTag,

    #[from(ignore)]
    Serialize(String),
}

impl std::error::Error for DocumentError {}

impl core::fmt::Display for DocumentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "Failed to parse document: {msg}"),
            Self::InvalidRoot(msg) => write!(f, "Invalid document root: {msg}"),
            Self::InvalidAttribute { name, reason } => {
                write!(f, "Invalid attribute `{name}`: {reason}")
            }
            Self::MissingTag => write!(f, "Document has no tag to serialize under"),
            Self::Serialize(msg) => write!(f, "Failed to serialize document: {msg}"),
        }
    }
}

pub type DocumentResult<T> = std::result::Result<T, DocumentError>;

/// Converts bytes to and from document trees.
pub trait DocumentMapper: Send + Sync {
    /// Media type sent in `Accept`/`Content-Type` and used to recognize
    /// document responses.
    fn media_type(&self) -> &str;

    /// Whether a response content type carries documents.
    fn accepts(&self, content_type: &str) -> bool {
        content_type.eq_ignore_ascii_case(self.media_type())
    }

    /// # Errors
    ///
    /// Returns a [`DocumentError`] for bytes that are not a document.
    fn parse(&self, bytes: &[u8]) -> DocumentResult<NodeHandle>;

    /// Serializes `node` under `tag`, falling back to the node's own tag.
    ///
    /// # Errors
    ///
    /// [`DocumentError::MissingTag`] when neither is available.
    fn serialize(&self, node: &NodeHandle, tag: Option<&str>) -> DocumentResult<Vec<u8>>;
}

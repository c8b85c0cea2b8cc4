use std::sync::Arc;

use crate::document::{read_node, NodeHandle, Value};
use crate::errors::{RobjError, RobjResult};
use crate::glue::{Fetched, HttpClient};
use crate::wire::simple_http::client::Response;

use super::ResourceProxy;

/// What a stored value stands for, before anything is fetched or wrapped.
#[derive(Debug, Clone)]
pub enum Resolved {
    Scalar(String),

    /// Points at another resource by `href`.
    Linked { href: String, node: NodeHandle },

    /// Embedded copy of a resource that has its own `id`.
    Identified { id: String, node: NodeHandle },

    /// Nested structure belonging to the same resource.
    Structured(NodeHandle),

    Sequence(Vec<Value>),

    /// A node without child elements: text and attributes at most.
    Empty(NodeHandle),
}

impl Resolved {
    /// Classifies `value`; a one item list stands for its item.
    #[must_use]
    pub fn classify(value: &Value) -> Self {
        match value {
            Value::Text(text) => Self::Scalar(text.clone()),
            Value::List(items) => match items.as_slice() {
                [only] => Self::classify(only),
                _ => Self::Sequence(items.clone()),
            },
            Value::Node(handle) => {
                let node = read_node(handle);
                if let Some(id) = node.scalar("id") {
                    Self::Identified {
                        id: id.to_string(),
                        node: handle.clone(),
                    }
                } else if let Some(href) = node.scalar("href") {
                    Self::Linked {
                        href: href.to_string(),
                        node: handle.clone(),
                    }
                } else if node.has_elements() {
                    Self::Structured(handle.clone())
                } else {
                    Self::Empty(handle.clone())
                }
            }
        }
    }

    /// Identifier or link of a value that is its own remote resource.
    #[must_use]
    pub fn remote_reference(&self) -> Option<&str> {
        match self {
            Self::Identified { id, .. } => Some(id),
            Self::Linked { href, .. } => Some(href),
            _ => None,
        }
    }
}

/// A value read from a proxy.
#[derive(Debug, Clone)]
pub enum AttrValue {
    Text(String),
    Proxy(ResourceProxy),

    /// A link outside the client's base URI, left unresolved.
    Link(String),

    Node(NodeHandle),
    List(Vec<AttrValue>),

    /// A linked resource that is not a document.
    Content(Arc<Response>),
}

impl AttrValue {
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_proxy(&self) -> Option<&ResourceProxy> {
        match self {
            Self::Proxy(proxy) => Some(proxy),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_proxy(self) -> Option<ResourceProxy> {
        match self {
            Self::Proxy(proxy) => Some(proxy),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[AttrValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_content(&self) -> Option<&Response> {
        match self {
            Self::Content(response) => Some(response),
            _ => None,
        }
    }
}

impl ResourceProxy {
    /// Turns a resolved value into what callers see: cached proxies for
    /// identified values, fetched proxies for links, local child proxies
    /// for nested structure.
    pub(super) fn wrap(&self, resolved: Resolved) -> RobjResult<AttrValue> {
        match resolved {
            Resolved::Scalar(text) => Ok(AttrValue::Text(text)),
            Resolved::Empty(node) => Ok(AttrValue::Node(node)),
            Resolved::Structured(node) => Ok(AttrValue::Proxy(self.local_child(node))),
            Resolved::Sequence(items) => Ok(AttrValue::List(
                items
                    .iter()
                    .map(|item| self.wrap(Resolved::classify(item)))
                    .collect::<RobjResult<_>>()?,
            )),
            Resolved::Identified { id, node } => {
                let client = self.client()?;
                match client.normalize(&id) {
                    Ok(uri) => Ok(AttrValue::Proxy(
                        client.cache().cache(&client, &uri, node, Some(self)),
                    )),
                    Err(RobjError::ExternalUri { .. }) => {
                        restobj_logs::warn!("{} embeds {} from outside the base", self.uri(), id);
                        Ok(AttrValue::Proxy(self.local_child(node)))
                    }
                    Err(err) => Err(err),
                }
            }
            Resolved::Linked { href, .. } => {
                let client = self.client()?;
                let uri = match client.normalize(&href) {
                    Ok(uri) => uri,
                    Err(RobjError::ExternalUri { .. }) => return Ok(AttrValue::Link(href)),
                    Err(err) => return Err(err),
                };
                Ok(match client.fetch(&uri, Some(self), true)? {
                    Fetched::Resource(proxy) => AttrValue::Proxy(proxy),
                    Fetched::Content(response) => AttrValue::Content(response),
                })
            }
        }
    }

    pub(super) fn resolve_in(&self, root: &NodeHandle, name: &str) -> RobjResult<Resolved> {
        let found = {
            let node = read_node(root);
            node.element(name).map(Resolved::classify).or_else(|| {
                node.attribute(name)
                    .map(|attribute| Resolved::Scalar(attribute.to_string()))
            })
        };
        found.ok_or_else(|| RobjError::NoSuchAttribute {
            name: name.to_string(),
            proxy: self.to_string(),
        })
    }

    pub(super) fn remote_overwrite(&self, name: &str, resolved: &Resolved) -> RobjResult<()> {
        match resolved.remote_reference() {
            Some(id) => Err(RobjError::RemoteInstanceOverwrite {
                name: name.to_string(),
                uri: self.uri().to_string(),
                id: id.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub(crate) fn client(&self) -> RobjResult<HttpClient> {
        HttpClient::upgrade(&self.inner.client)
    }
}

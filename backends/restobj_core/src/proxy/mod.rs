//! Lazy proxies over fetched documents.
//!
//! A [`ResourceProxy`] wraps the root node of one resource. Reads go
//! through [`ResourceProxy::resolve`] and [`ResourceProxy::get`], which
//! classify the stored value and only then fetch, look up or wrap it.
//! Writes stay local (marking the proxy dirty) until
//! [`ResourceProxy::persist`], except for writes to linked resources which
//! are posted straight away.
//!
//! Nested structure is wrapped in child proxies bound to the same URI.
//! They share the parent's dirty flag and hold only a weak reference to
//! it; once the parent's node is replaced they report
//! [`RobjError::StaleProxy`].

mod collection;
mod path;
mod resolve;
mod shape;

pub use path::*;
pub use resolve::*;
pub use shape::*;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::document::{node_identity, read_node, write_node, Input, NodeHandle, Value};
use crate::errors::{RobjError, RobjResult};
use crate::glue::{DeleteOutcome, Fetched, HttpClient, RequestBody, WeakClient};

struct ParentLink {
    proxy: Weak<ProxyInner>,

    /// Parent generation this proxy was derived from.
    generation: u64,
    same_uri: bool,
}

struct ProxyState {
    root: NodeHandle,
    shape: Shape,
    children: HashMap<usize, ResourceProxy>,
    generation: u64,
}

struct ProxyInner {
    uri: String,
    client: WeakClient,
    parent: Option<ParentLink>,
    dirty: Arc<AtomicBool>,

    /// Serializes the public operations of this proxy.
    ops: Mutex<()>,
    state: Mutex<ProxyState>,
}

/// A local, lazily materialized view of one remote resource.
///
/// Clones share the same proxy; [`ResourceProxy::ptr_eq`] tells whether
/// two handles are the same instance.
#[derive(Clone)]
pub struct ResourceProxy {
    inner: Arc<ProxyInner>,
}

impl ResourceProxy {
    /// A proxy for `uri` backed by `node`. Same-URI children of `parent`
    /// share its dirty flag.
    #[must_use]
    pub fn new(
        client: &HttpClient,
        uri: &str,
        node: NodeHandle,
        parent: Option<&ResourceProxy>,
    ) -> Self {
        let parent = parent.map(|parent| (parent, parent.generation()));
        Self::build(client.downgrade(), uri, node, parent)
    }

    /// A proxy bound to no client; remote operations fail with
    /// [`RobjError::ClientClosed`].
    #[must_use]
    pub fn detached(uri: &str, node: NodeHandle) -> Self {
        Self::build(Weak::new(), uri, node, None)
    }

    fn build(
        client: WeakClient,
        uri: &str,
        node: NodeHandle,
        parent: Option<(&ResourceProxy, u64)>,
    ) -> Self {
        let (link, dirty) = match parent {
            Some((parent, generation)) => {
                let same_uri = parent.uri() == uri;
                let dirty = if same_uri {
                    parent.inner.dirty.clone()
                } else {
                    Arc::new(AtomicBool::new(false))
                };
                let link = ParentLink {
                    proxy: Arc::downgrade(&parent.inner),
                    generation,
                    same_uri,
                };
                (Some(link), dirty)
            }
            None => (None, Arc::new(AtomicBool::new(false))),
        };

        let shape = Shape::infer(&read_node(&node));
        Self {
            inner: Arc::new(ProxyInner {
                uri: uri.to_string(),
                client,
                parent: link,
                dirty,
                ops: Mutex::new(()),
                state: Mutex::new(ProxyState {
                    root: node,
                    shape,
                    children: HashMap::new(),
                    generation: 0,
                }),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ProxyState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_ops(&self) -> MutexGuard<'_, ()> {
        self.inner.ops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &ResourceProxy) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    fn mark_dirty(&self) {
        self.inner.dirty.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn shape(&self) -> Shape {
        self.state().shape.clone()
    }

    #[must_use]
    pub fn tag(&self) -> Option<String> {
        self.state().shape.tag.clone()
    }

    #[must_use]
    pub fn is_collection(&self) -> bool {
        self.state().shape.is_collection
    }

    #[must_use]
    pub fn child_tag(&self) -> Option<String> {
        self.state().shape.child_tag.clone()
    }

    /// Number of times the backing node has been replaced.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state().generation
    }

    /// The proxy this one was reached through, while it is alive.
    #[must_use]
    pub fn parent(&self) -> Option<ResourceProxy> {
        let link = self.inner.parent.as_ref()?;
        link.proxy.upgrade().map(|inner| ResourceProxy { inner })
    }

    /// True for nested structure bound to the parent's URI.
    #[must_use]
    pub fn shares_parent_uri(&self) -> bool {
        self.inner.parent.as_ref().is_some_and(|link| link.same_uri)
    }

    /// The same-URI parent, which owns persistence for this proxy.
    fn owning_parent(&self) -> RobjResult<Option<ResourceProxy>> {
        let Some(link) = self.inner.parent.as_ref().filter(|link| link.same_uri) else {
            return Ok(None);
        };
        let stale = || RobjError::StaleProxy {
            uri: self.inner.uri.clone(),
        };
        let parent = link
            .proxy
            .upgrade()
            .map(|inner| ResourceProxy { inner })
            .ok_or_else(stale)?;
        if parent.generation() != link.generation {
            return Err(stale());
        }
        Ok(Some(parent))
    }

    fn ensure_live(&self) -> RobjResult<()> {
        let Some(link) = self.inner.parent.as_ref().filter(|link| link.same_uri) else {
            return Ok(());
        };
        if let Some(parent) = link.proxy.upgrade() {
            let parent = ResourceProxy { inner: parent };
            if parent.generation() != link.generation {
                return Err(RobjError::StaleProxy {
                    uri: self.inner.uri.clone(),
                });
            }
        }
        Ok(())
    }

    /// The node currently backing this proxy.
    ///
    /// # Errors
    ///
    /// [`RobjError::StaleProxy`] when the parent's node was replaced.
    pub fn root_node(&self) -> RobjResult<NodeHandle> {
        self.ensure_live()?;
        Ok(self.state().root.clone())
    }

    /// Swaps in a freshly fetched node, re-inferring the shape and
    /// dropping every child proxy handed out so far.
    pub(crate) fn replace_root(&self, node: NodeHandle) {
        let mut state = self.state();
        if Arc::ptr_eq(&state.root, &node) {
            return;
        }
        state.shape = Shape::infer(&read_node(&node));
        state.root = node;
        state.children.clear();
        state.generation += 1;
    }

    /// Child proxy for nested structure, one per node.
    fn local_child(&self, node: NodeHandle) -> ResourceProxy {
        let key = node_identity(&node);
        let mut state = self.state();
        if let Some(child) = state.children.get(&key) {
            return child.clone();
        }
        let generation = state.generation;
        let child = Self::build(
            self.inner.client.clone(),
            &self.inner.uri,
            node,
            Some((self, generation)),
        );
        state.children.insert(key, child.clone());
        child
    }

    fn forget_children(&self, old: &Value) {
        let mut state = self.state();
        for item in old.items() {
            if let Value::Node(node) = item {
                state.children.remove(&node_identity(&node));
            }
        }
    }

    /// Classifies `name` without fetching anything.
    ///
    /// # Errors
    ///
    /// [`RobjError::NoSuchAttribute`] when the node has no such element or
    /// attribute.
    pub fn resolve(&self, name: &str) -> RobjResult<Resolved> {
        let _ops = self.lock_ops();
        let root = self.root_node()?;
        self.resolve_in(&root, name)
    }

    /// Reads `name`, fetching or wrapping it as needed.
    ///
    /// # Errors
    ///
    /// [`RobjError::NoSuchAttribute`], or whatever fetching a link fails
    /// with.
    pub fn get(&self, name: &str) -> RobjResult<AttrValue> {
        let _ops = self.lock_ops();
        let root = self.root_node()?;
        let resolved = self.resolve_in(&root, name)?;
        self.wrap(resolved)
    }

    /// Writes `name` locally and marks the proxy dirty.
    ///
    /// A slot holding a link is updated remotely instead: the value (or
    /// raw [`Input::Data`]) is posted to the link right away.
    ///
    /// # Errors
    ///
    /// [`RobjError::RemoteInstanceOverwrite`] when the slot holds an
    /// identified resource, [`RobjError::Serialization`] for values that
    /// cannot be stored.
    pub fn set(&self, name: &str, input: impl Into<Input>) -> RobjResult<()> {
        let input = input.into();
        let _ops = self.lock_ops();
        let root = self.root_node()?;

        let (existing, attribute_only) = {
            let node = read_node(&root);
            let existing = node.element(name).cloned();
            let attribute_only = existing.is_none() && node.attribute(name).is_some();
            (existing, attribute_only)
        };

        if let Some(existing) = &existing {
            match Resolved::classify(existing) {
                Resolved::Linked { href, .. } => return self.post_to_link(name, &href, input),
                resolved @ Resolved::Identified { .. } => {
                    return self.remote_overwrite(name, &resolved)
                }
                _ => {}
            }
        }

        if attribute_only {
            let Input::Text(text) = input else {
                return Err(RobjError::Serialization(format!(
                    "attribute `{name}` of {} only holds text",
                    self.inner.uri
                )));
            };
            self.mark_dirty();
            write_node(&root).set_attribute(name, text);
            return Ok(());
        }

        let value = input.into_value(name)?;
        self.mark_dirty();
        write_node(&root).set_element(name, value);
        if let Some(old) = existing {
            self.forget_children(&old);
        }
        Ok(())
    }

    fn post_to_link(&self, name: &str, href: &str, input: Input) -> RobjResult<()> {
        let client = self.client()?;
        let uri = client.normalize(href)?;
        let body = match input {
            Input::Data(data) => RequestBody::Data(data),
            other => RequestBody::Document(other.into_node(name)?),
        };
        client.do_post(&uri, body, Some(self))?;
        Ok(())
    }

    /// Element names followed by attribute names.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let root = self.state().root.clone();
        let node = read_node(&root);
        let mut names = node.element_names();
        names.extend(node.attributes().keys().cloned());
        names
    }

    #[must_use]
    pub fn elements(&self) -> Vec<String> {
        let root = self.state().root.clone();
        let names = read_node(&root).element_names();
        names
    }

    #[must_use]
    pub fn attributes(&self) -> Vec<String> {
        let root = self.state().root.clone();
        let names = read_node(&root).attributes().keys().cloned().collect();
        names
    }

    /// False for a node with nothing in it.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        let root = self.state().root.clone();
        let node = read_node(&root);
        node.has_elements()
            || !node.attributes().is_empty()
            || node.text().is_some_and(|text| !text.is_empty())
    }

    /// Writes local edits with a PUT, or refreshes when there are none.
    ///
    /// Nested structure persists through its parent. The dirty flag is
    /// cleared before the PUT so the response can be recached into this
    /// proxy; it is set again if the PUT fails.
    ///
    /// # Errors
    ///
    /// Request failures, [`RobjError::StaleProxy`] for an invalidated child.
    pub fn persist(&self, force: bool) -> RobjResult<()> {
        if !(self.is_dirty() || force) {
            return self.refresh(false);
        }
        if let Some(parent) = self.owning_parent()? {
            return parent.persist(true);
        }

        let _ops = self.lock_ops();
        let root = self.root_node()?;
        let client = self.client()?;

        self.inner.dirty.store(false, Ordering::SeqCst);
        match client.do_put(&self.inner.uri, RequestBody::Document(root)) {
            Ok(Fetched::Resource(updated)) => {
                if !updated.ptr_eq(self) {
                    self.replace_root(updated.root_node()?);
                }
                Ok(())
            }
            Ok(Fetched::Content(_)) => Ok(()),
            Err(err) => {
                self.mark_dirty();
                Err(err)
            }
        }
    }

    /// Re-fetches the resource unless it has local edits (or `force`),
    /// invalidating every child proxy handed out so far.
    ///
    /// # Errors
    ///
    /// Request failures, [`RobjError::NotADocument`].
    pub fn refresh(&self, force: bool) -> RobjResult<()> {
        if self.is_dirty() && !force {
            return Ok(());
        }
        if let Some(parent) = self.owning_parent()? {
            return parent.refresh(force);
        }

        let _ops = self.lock_ops();
        let client = self.client()?;
        self.inner.dirty.store(false, Ordering::SeqCst);
        let fetched = client.fetch(&self.inner.uri, None, false)?.into_resource()?;
        if !fetched.ptr_eq(self) {
            self.replace_root(fetched.root_node()?);
        }
        Ok(())
    }

    /// Deletes the resource on the server.
    ///
    /// # Errors
    ///
    /// [`RobjError::Delete`] for statuses other than 200 and 404.
    pub fn delete(&self) -> RobjResult<DeleteOutcome> {
        self.client()?.do_delete(&self.inner.uri)
    }
}

impl core::fmt::Display for ResourceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<restobj({})>", self.tag().unwrap_or_default())
    }
}

impl core::fmt::Debug for ResourceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shape = self.shape();
        f.debug_struct("ResourceProxy")
            .field("uri", &self.inner.uri)
            .field("tag", &shape.tag)
            .field("is_collection", &shape.is_collection)
            .field("dirty", &self.is_dirty())
            .finish_non_exhaustive()
    }
}

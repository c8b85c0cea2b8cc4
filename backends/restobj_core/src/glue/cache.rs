use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::HttpClient;
use crate::document::NodeHandle;
use crate::proxy::ResourceProxy;

/// One live proxy per normalized URI, owned by the client.
///
/// Recaching a URI whose proxy is clean swaps the new node into the
/// existing proxy, so everyone holding it sees the fresh state. A dirty
/// proxy keeps its node: local edits win until persisted or refreshed.
#[derive(Default)]
pub struct InstanceCache {
    entries: Mutex<HashMap<String, ResourceProxy>>,
}

impl core::fmt::Debug for InstanceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceCache")
            .field("entries", &self.len())
            .finish()
    }
}

impl InstanceCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, ResourceProxy>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the proxy for `uri`, registering a new one or refreshing
    /// the existing one with `node`.
    pub fn cache(
        &self,
        client: &HttpClient,
        uri: &str,
        node: NodeHandle,
        parent: Option<&ResourceProxy>,
    ) -> ResourceProxy {
        let mut entries = self.entries();
        if let Some(existing) = entries.get(uri) {
            if existing.is_dirty() {
                restobj_logs::debug!("Keeping dirty instance for {uri}, discarding fetched node");
            } else {
                existing.replace_root(node);
            }
            return existing.clone();
        }

        let proxy = ResourceProxy::new(client, uri, node, parent);
        entries.insert(uri.to_string(), proxy.clone());
        proxy
    }

    #[must_use]
    pub fn get(&self, uri: &str) -> Option<ResourceProxy> {
        self.entries().get(uri).cloned()
    }

    #[must_use]
    pub fn contains(&self, uri: &str) -> bool {
        self.entries().contains_key(uri)
    }

    /// Drops the entry for `uri`, or every entry when `None`.
    pub fn clear(&self, uri: Option<&str>) {
        let mut entries = self.entries();
        match uri {
            Some(uri) => {
                entries.remove(uri);
            }
            None => entries.clear(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{read_node, Input, Node, Value};
    use restobj_config::ClientSettings;

    fn client() -> HttpClient {
        HttpClient::new(ClientSettings::new("http://localhost:1/api").with_threaded(false))
            .expect("client")
    }

    fn employee(name: &str) -> NodeHandle {
        let mut node = Node::new("employee");
        node.set_element("name", Value::from(name));
        node.into_handle()
    }

    /// WHY: Callers holding a proxy must observe fresh data after a recache
    /// WHAT: A clean entry keeps its identity and swaps in the new node
    #[test]
    fn test_clean_entry_is_swapped_in_place() {
        let client = client();
        let cache = client.cache();
        let first = cache.cache(&client, "/employees/1", employee("Joe"), None);
        let second = cache.cache(&client, "/employees/1", employee("Bob"), None);

        assert!(first.ptr_eq(&second));
        assert_eq!(first.get("name").expect("name").as_text(), Some("Bob"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_dirty_entry_keeps_local_edits() {
        let client = client();
        let cache = client.cache();
        let proxy = cache.cache(&client, "/employees/1", employee("Joe"), None);
        proxy.set("name", Input::from("Ann")).expect("set");
        assert!(proxy.is_dirty());

        let again = cache.cache(&client, "/employees/1", employee("Bob"), None);
        assert!(again.ptr_eq(&proxy));
        let root = proxy.root_node().expect("root");
        assert_eq!(
            read_node(&root).element("name").and_then(Value::as_text),
            Some("Ann")
        );
    }

    #[test]
    fn test_clear_one_or_all() {
        let client = client();
        let cache = client.cache();
        cache.cache(&client, "/employees/1", employee("Joe"), None);
        cache.cache(&client, "/employees/2", employee("Ann"), None);

        cache.clear(Some("/employees/1"));
        assert!(!cache.contains("/employees/1"));
        assert!(cache.contains("/employees/2"));

        cache.clear(None);
        assert!(cache.is_empty());
    }
}

use crate::document::{read_node, write_node, Input, Node, Value};
use crate::errors::{RobjError, RobjResult};
use crate::glue::Fetched;

use super::{AttrValue, ResourceProxy, Resolved};

impl ResourceProxy {
    fn require_collection(&self) -> RobjResult<String> {
        let shape = self.shape();
        match shape.child_tag {
            Some(child_tag) if shape.is_collection => Ok(child_tag),
            _ => Err(RobjError::NotACollection {
                uri: self.uri().to_string(),
                tag: shape.tag.unwrap_or_default(),
            }),
        }
    }

    fn items(&self) -> RobjResult<(String, Vec<Value>)> {
        let child_tag = self.require_collection()?;
        let root = self.root_node()?;
        let items = read_node(&root).items(&child_tag);
        Ok((child_tag, items))
    }

    fn item_at(&self, index: usize) -> RobjResult<(String, Value)> {
        let (child_tag, items) = self.items()?;
        let len = items.len();
        let item = items
            .into_iter()
            .nth(index)
            .ok_or(RobjError::IndexOutOfRange { index, len })?;
        Ok((child_tag, item))
    }

    /// # Errors
    ///
    /// [`RobjError::NotACollection`].
    pub fn len(&self) -> RobjResult<usize> {
        let _ops = self.lock_ops();
        Ok(self.items()?.1.len())
    }

    /// # Errors
    ///
    /// [`RobjError::NotACollection`].
    pub fn is_empty(&self) -> RobjResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Reads item `index`, wrapped the same way attributes are.
    ///
    /// # Errors
    ///
    /// [`RobjError::NotACollection`], [`RobjError::IndexOutOfRange`], or
    /// whatever fetching a linked item fails with.
    pub fn item(&self, index: usize) -> RobjResult<AttrValue> {
        let _ops = self.lock_ops();
        let (_, item) = self.item_at(index)?;
        self.wrap(Resolved::classify(&item))
    }

    /// Replaces item `index` locally and marks the proxy dirty.
    ///
    /// # Errors
    ///
    /// [`RobjError::RemoteInstanceOverwrite`] when the item is its own
    /// remote resource.
    pub fn set_item(&self, index: usize, input: impl Into<Input>) -> RobjResult<()> {
        let input = input.into();
        let _ops = self.lock_ops();
        let (child_tag, old) = self.item_at(index)?;
        self.remote_overwrite(&index.to_string(), &Resolved::classify(&old))?;

        let value = input.into_value(&child_tag)?;
        let root = self.root_node()?;
        self.mark_dirty();
        replace_item(&mut write_node(&root), &child_tag, index, Some(value));
        self.forget_children(&old);
        Ok(())
    }

    /// Removes item `index`. An item that is its own remote resource is
    /// deleted on the server first; plain items only locally, leaving the
    /// proxy dirty.
    ///
    /// # Errors
    ///
    /// [`RobjError::Delete`] when the remote delete fails.
    pub fn delete_item(&self, index: usize) -> RobjResult<()> {
        let _ops = self.lock_ops();
        let (child_tag, old) = self.item_at(index)?;
        let resolved = Resolved::classify(&old);

        match resolved.remote_reference() {
            Some(reference) => {
                let client = self.client()?;
                client.do_delete(reference)?;
            }
            None => self.mark_dirty(),
        }

        let root = self.root_node()?;
        replace_item(&mut write_node(&root), &child_tag, index, None);
        self.forget_children(&old);
        Ok(())
    }

    /// Every item, wrapped. The proxy stays locked while the items are
    /// materialized.
    ///
    /// # Errors
    ///
    /// As [`ResourceProxy::item`].
    pub fn iter(&self) -> RobjResult<Vec<AttrValue>> {
        let _ops = self.lock_ops();
        let (_, items) = self.items()?;
        items
            .iter()
            .map(|item| self.wrap(Resolved::classify(item)))
            .collect()
    }

    /// Adds an item under `tag`, or the inferred child tag.
    ///
    /// With `post` the item is created on the server and the returned
    /// document is appended; otherwise it is appended locally and the
    /// proxy is marked dirty. The collection itself is never refetched.
    ///
    /// # Errors
    ///
    /// [`RobjError::NotACollection`] when no child tag is known, request
    /// failures when posting.
    pub fn append(
        &self,
        input: impl Into<Input>,
        post: bool,
        tag: Option<&str>,
    ) -> RobjResult<AttrValue> {
        let input = input.into();
        let _ops = self.lock_ops();
        let shape = self.shape();
        let child_tag = tag
            .map(str::to_string)
            .or(shape.child_tag)
            .ok_or_else(|| RobjError::NotACollection {
                uri: self.uri().to_string(),
                tag: shape.tag.unwrap_or_default(),
            })?;
        let root = self.root_node()?;

        let (value, appended) = if post {
            let client = self.client()?;
            let node = input.into_node(&child_tag)?;
            match client.do_post(self.uri(), node, Some(self))? {
                Fetched::Resource(created) => {
                    let node = created.root_node()?;
                    (Value::Node(node), Some(AttrValue::Proxy(created)))
                }
                Fetched::Content(response) => return Ok(AttrValue::Content(response)),
            }
        } else {
            let value = input.into_value(&child_tag)?;
            self.mark_dirty();
            (value, None)
        };

        write_node(&root).push_item(&child_tag, value.clone());
        {
            let mut state = self.state();
            state.shape.is_collection = true;
            state.shape.child_tag = Some(child_tag);
        }

        match appended {
            Some(created) => Ok(created),
            None => self.wrap(Resolved::classify(&value)),
        }
    }
}

/// Replaces (`Some`) or removes (`None`) one item under `child_tag`.
fn replace_item(node: &mut Node, child_tag: &str, index: usize, value: Option<Value>) {
    let Some(slot) = node.element_mut(child_tag) else {
        return;
    };
    match (slot, value) {
        (Value::List(items), Some(value)) => {
            if let Some(item) = items.get_mut(index) {
                *item = value;
            }
        }
        (Value::List(items), None) => {
            if index < items.len() {
                items.remove(index);
            }
        }
        (slot, Some(value)) => *slot = value,
        (slot, None) => *slot = Value::List(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentMapper, JsonMapper};

    fn tags() -> ResourceProxy {
        let node = JsonMapper
            .parse(br#"{"tags": {"tag": ["red", "green", "blue"]}}"#)
            .expect("parses");
        ResourceProxy::detached("/tags", node)
    }

    #[test]
    fn test_indexed_access() {
        let tags = tags();
        assert!(tags.is_collection());
        assert_eq!(tags.len().expect("len"), 3);
        assert_eq!(tags.item(1).expect("item").as_text(), Some("green"));
        assert!(matches!(
            tags.item(3),
            Err(RobjError::IndexOutOfRange { index: 3, len: 3 })
        ));
        let all: Vec<_> = tags
            .iter()
            .expect("iter")
            .iter()
            .filter_map(|item| item.as_text().map(str::to_string))
            .collect();
        assert_eq!(all, vec!["red", "green", "blue"]);
    }

    #[test]
    fn test_local_edits_mark_dirty() {
        let tags = tags();
        tags.set_item(0, "black").expect("set");
        assert!(tags.is_dirty());
        tags.delete_item(2).expect("delete");
        assert_eq!(tags.len().expect("len"), 2);
        assert_eq!(tags.item(0).expect("item").as_text(), Some("black"));
    }

    /// WHY: Local appends defer the write and must not refetch the collection
    /// WHAT: An empty plural collection becomes a collection once appended to
    #[test]
    fn test_local_append_to_empty_plural() {
        let employees = ResourceProxy::detached("/employees", Node::new("employees").into_handle());
        assert!(!employees.is_collection());
        assert!(matches!(employees.len(), Err(RobjError::NotACollection { .. })));

        let item = employees
            .append(Input::map([("name", "Joe"), ("age", "31")]), false, None)
            .expect("append");
        assert!(item.as_proxy().is_some());
        assert!(employees.is_collection());
        assert_eq!(employees.child_tag().as_deref(), Some("employee"));
        assert_eq!(employees.len().expect("len"), 1);
        assert!(employees.is_dirty());
    }

    #[test]
    fn test_append_needs_a_child_tag() {
        let employee = ResourceProxy::detached("/employees/1", Node::new("employee").into_handle());
        assert!(matches!(
            employee.append("x", false, None),
            Err(RobjError::NotACollection { .. })
        ));
        employee.append("x", false, Some("alias")).expect("explicit tag");
        assert!(employee.is_collection());
    }

    #[test]
    fn test_remote_items_refuse_overwrite() {
        let node = JsonMapper
            .parse(br#"{"employees": {"employee": [{"@id": "/employees/1", "name": "Joe"}, {"@id": "/employees/2", "name": "Ann"}]}}"#)
            .expect("parses");
        let employees = ResourceProxy::detached("/employees", node);
        assert!(matches!(
            employees.set_item(0, "x"),
            Err(RobjError::RemoteInstanceOverwrite { .. })
        ));
        assert!(matches!(employees.delete_item(0), Err(RobjError::ClientClosed)));
        assert_eq!(employees.len().expect("len"), 2);
    }
}

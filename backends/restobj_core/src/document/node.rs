use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared, editable handle to a node. Identity (the allocation) is what
/// proxies key their child caches by.
pub type NodeHandle = Arc<RwLock<Node>>;

#[derive(Debug, Clone)]
pub enum Value {
    Text(String),
    Node(NodeHandle),
    List(Vec<Value>),
}

impl Value {
    /// The items this value stands for: a list's elements, or itself.
    #[must_use]
    pub fn items(&self) -> Vec<Value> {
        match self {
            Self::List(items) => items.clone(),
            other => vec![other.clone()],
        }
    }

    #[must_use]
    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_node(&self) -> Option<&NodeHandle> {
        match self {
            Self::Node(node) => Some(node),
            _ => None,
        }
    }

    /// Structural equality, comparing nodes by content.
    #[must_use]
    pub fn same_content(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Node(a), Self::Node(b)) => {
                Arc::ptr_eq(a, b) || read_node(a).same_content(&read_node(b))
            }
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_content(y))
            }
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<NodeHandle> for Value {
    fn from(value: NodeHandle) -> Self {
        Self::Node(value)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Node {
    tag: Option<String>,
    attributes: BTreeMap<String, String>,
    elements: Vec<(String, Value)>,
    text: Option<String>,
}

impl Node {
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            ..Self::default()
        }
    }

    /// A node with no tag; it can only be serialized under an explicit one.
    #[must_use]
    pub fn untagged() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn into_handle(self) -> NodeHandle {
        Arc::new(RwLock::new(self))
    }

    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.tag = Some(tag.into());
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<String> {
        self.attributes.remove(name)
    }

    /// An attribute, or failing that a text element, called `name`.
    #[must_use]
    pub fn scalar(&self, name: &str) -> Option<&str> {
        self.attribute(name)
            .or_else(|| self.element(name).and_then(Value::as_text))
    }

    #[must_use]
    pub fn element(&self, name: &str) -> Option<&Value> {
        self.elements
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn element_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.elements
            .iter_mut()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Replaces the element in place, or appends it when new.
    pub fn set_element(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.element_mut(&name) {
            Some(slot) => *slot = value,
            None => self.elements.push((name, value)),
        }
    }

    pub fn remove_element(&mut self, name: &str) -> Option<Value> {
        let position = self.elements.iter().position(|(key, _)| key == name)?;
        Some(self.elements.remove(position).1)
    }

    /// Child element names in document order.
    #[must_use]
    pub fn element_names(&self) -> Vec<String> {
        self.elements.iter().map(|(name, _)| name.clone()).collect()
    }

    #[must_use]
    pub fn elements(&self) -> &[(String, Value)] {
        &self.elements
    }

    #[must_use]
    pub fn has_elements(&self) -> bool {
        !self.elements.is_empty()
    }

    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = Some(text.into());
    }

    /// No attributes, elements or text.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.elements.is_empty() && self.text.is_none()
    }

    /// Items stored under `name`, flattening a list value.
    #[must_use]
    pub fn items(&self, name: &str) -> Vec<Value> {
        self.element(name).map(Value::items).unwrap_or_default()
    }

    /// Appends one item under `name`, turning a single value into a list.
    pub fn push_item(&mut self, name: &str, item: Value) {
        match self.element_mut(name) {
            Some(Value::List(items)) => items.push(item),
            Some(slot) => {
                let previous = std::mem::replace(slot, Value::List(Vec::new()));
                *slot = Value::List(vec![previous, item]);
            }
            None => self.elements.push((name.to_string(), Value::List(vec![item]))),
        }
    }

    /// Replaces the item list under `name`.
    pub fn set_items(&mut self, name: &str, items: Vec<Value>) {
        self.set_element(name, Value::List(items));
    }

    #[must_use]
    pub fn same_content(&self, other: &Node) -> bool {
        self.tag == other.tag
            && self.attributes == other.attributes
            && self.text == other.text
            && self.elements.len() == other.elements.len()
            && self
                .elements
                .iter()
                .zip(&other.elements)
                .all(|((a_name, a), (b_name, b))| a_name == b_name && a.same_content(b))
    }
}

pub fn read_node(node: &NodeHandle) -> RwLockReadGuard<'_, Node> {
    node.read().unwrap_or_else(PoisonError::into_inner)
}

pub fn write_node(node: &NodeHandle) -> RwLockWriteGuard<'_, Node> {
    node.write().unwrap_or_else(PoisonError::into_inner)
}

/// Stable identity of a node allocation.
#[must_use]
pub fn node_identity(node: &NodeHandle) -> usize {
    Arc::as_ptr(node) as *const () as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_element_replaces_in_place() {
        let mut node = Node::new("employee");
        node.set_element("name", "Joe".into());
        node.set_element("phone", "555".into());
        node.set_element("name", "Bob".into());

        assert_eq!(node.element_names(), vec!["name".to_string(), "phone".into()]);
        assert_eq!(node.element("name").and_then(Value::as_text), Some("Bob"));
    }

    /// WHY: Appending to a collection must keep earlier items
    /// WHAT: A single value becomes a list when a second item is pushed
    #[test]
    fn test_push_item_promotes_single_value_to_list() {
        let mut node = Node::new("employees");
        node.set_element("employee", Value::Node(Node::new("employee").into_handle()));
        node.push_item("employee", Value::Node(Node::new("employee").into_handle()));
        node.push_item("manager", "Ann".into());

        assert_eq!(node.items("employee").len(), 2);
        assert!(node.element("employee").is_some_and(Value::is_list));
        assert_eq!(node.items("manager").len(), 1);
        assert!(node.items("missing").is_empty());
    }

    #[test]
    fn test_scalar_prefers_attributes() {
        let mut node = Node::new("page");
        node.set_attribute("count", "25");
        node.set_element("count", "7".into());
        node.set_element("limit", "10".into());
        assert_eq!(node.scalar("count"), Some("25"));
        assert_eq!(node.scalar("limit"), Some("10"));
        assert_eq!(node.scalar("missing"), None);
    }

    #[test]
    fn test_identity_differs_per_allocation() {
        let a = Node::new("a").into_handle();
        let b = Node::new("a").into_handle();
        assert_eq!(node_identity(&a), node_identity(&a.clone()));
        assert_ne!(node_identity(&a), node_identity(&b));
        assert!(read_node(&a).same_content(&read_node(&b)));
    }
}

use super::{Node, NodeHandle, Value};
use crate::errors::{RobjError, RobjResult};
use crate::wire::simple_http::HttpData;

use super::json::{ATTRIBUTE_PREFIX, TEXT_KEY};

/// A value written into a proxy.
///
/// Maps become nodes tagged with the attribute they are written to, so
/// `employee.set("address", Input::map([("zipcode", "90210")]))` produces
/// an `address` node.
#[derive(Debug)]
pub enum Input {
    Text(String),
    Map(Vec<(String, Input)>),
    List(Vec<Input>),
    Node(NodeHandle),

    /// Raw content, only accepted by attributes holding a link.
    Data(HttpData),
}

impl Input {
    pub fn map<K, V, I>(fields: I) -> Self
    where
        K: Into<String>,
        V: Into<Input>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Map(
            fields
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    pub fn list<V, I>(items: I) -> Self
    where
        V: Into<Input>,
        I: IntoIterator<Item = V>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Converts into a stored value for the slot `name`.
    ///
    /// # Errors
    ///
    /// [`RobjError::Serialization`] for raw data or non-text attributes.
    pub fn into_value(self, name: &str) -> RobjResult<Value> {
        match self {
            Self::Text(text) => Ok(Value::Text(text)),
            Self::Node(node) => Ok(Value::Node(node)),
            Self::List(items) => Ok(Value::List(
                items
                    .into_iter()
                    .map(|item| item.into_value(name))
                    .collect::<RobjResult<_>>()?,
            )),
            Self::Map(fields) => Ok(Value::Node(Self::map_into_node(name, fields)?.into_handle())),
            Self::Data(_) => Err(RobjError::Serialization(format!(
                "raw content written to `{name}` can only be sent to a linked resource"
            ))),
        }
    }

    /// Converts into a standalone node tagged `tag`, as used for POST
    /// bodies.
    ///
    /// # Errors
    ///
    /// As [`Input::into_value`]; lists and raw data are not nodes.
    pub fn into_node(self, tag: &str) -> RobjResult<NodeHandle> {
        match self {
            Self::Node(node) => Ok(node),
            Self::Map(fields) => Ok(Self::map_into_node(tag, fields)?.into_handle()),
            Self::Text(text) => {
                let mut node = Node::new(tag);
                node.set_text(text);
                Ok(node.into_handle())
            }
            Self::List(_) | Self::Data(_) => Err(RobjError::Serialization(format!(
                "a list or raw content cannot be sent as the `{tag}` document"
            ))),
        }
    }

    fn map_into_node(tag: &str, fields: Vec<(String, Input)>) -> RobjResult<Node> {
        let mut node = Node::new(tag);
        for (key, value) in fields {
            if let Some(attribute) = key.strip_prefix(ATTRIBUTE_PREFIX) {
                let Self::Text(text) = value else {
                    return Err(RobjError::Serialization(format!(
                        "attribute `{attribute}` of `{tag}` must be text"
                    )));
                };
                node.set_attribute(attribute, text);
            } else if key == TEXT_KEY {
                let Self::Text(text) = value else {
                    return Err(RobjError::Serialization(format!("text of `{tag}` must be text")));
                };
                node.set_text(text);
            } else {
                let value = value.into_value(&key)?;
                node.set_element(key, value);
            }
        }
        Ok(node)
    }
}

impl From<&str> for Input {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Input {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<NodeHandle> for Input {
    fn from(value: NodeHandle) -> Self {
        Self::Node(value)
    }
}

impl From<HttpData> for Input {
    fn from(value: HttpData) -> Self {
        Self::Data(value)
    }
}

impl From<Vec<Input>> for Input {
    fn from(value: Vec<Input>) -> Self {
        Self::List(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::read_node;

    /// WHY: Map-shaped writes stand in for nested documents
    /// WHAT: A map becomes a node tagged with the slot name, keeping attributes
    #[test]
    fn test_map_becomes_node_tagged_with_slot() {
        let value = Input::map([
            ("@kind", Input::from("home")),
            ("street", "Main".into()),
            ("zipcode", "90210".into()),
        ])
        .into_value("address")
        .expect("converts");

        let node = value.as_node().expect("a node");
        let node = read_node(node);
        assert_eq!(node.tag(), Some("address"));
        assert_eq!(node.attribute("kind"), Some("home"));
        assert_eq!(node.element("zipcode").and_then(Value::as_text), Some("90210"));
    }

    #[test]
    fn test_lists_convert_item_by_item() {
        let value = Input::list(["a", "b"]).into_value("tags").expect("converts");
        assert_eq!(value.items().len(), 2);
    }

    #[test]
    fn test_raw_data_is_not_a_value() {
        let data = HttpData::bytes(b"x".to_vec(), "text/plain");
        assert!(matches!(
            Input::from(data).into_value("file"),
            Err(RobjError::Serialization(_))
        ));
    }

    #[test]
    fn test_non_text_attribute_is_rejected() {
        let result = Input::map([("@id", Input::list(["1"]))]).into_value("x");
        assert!(matches!(result, Err(RobjError::Serialization(_))));
    }
}

use serde_json::{Map, Value as Json};

use super::{read_node, DocumentError, DocumentMapper, DocumentResult, Node, NodeHandle, Value};

pub const JSON_MEDIA_TYPE: &str = "application/json";

/// Key prefix marking an attribute.
pub const ATTRIBUTE_PREFIX: char = '@';

/// Key holding a node's text when it also has attributes or elements.
pub const TEXT_KEY: &str = "#text";

/// Maps JSON documents onto tagged trees.
///
/// A document is an object with a single key, the root tag:
///
/// ```json
/// {"employee": {"@id": "http://host/api/employees/1",
///               "name": "Joe",
///               "address": {"zipcode": "90210"},
///               "phones": {"phone": ["555-1234", "555-9876"]}}}
/// ```
///
/// Keys starting with `@` are attributes, `#text` is text content, arrays
/// become list values, other scalars become text and `null` an empty node.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMapper;

impl JsonMapper {
    fn node_from_json(tag: &str, json: Json) -> DocumentResult<Node> {
        let mut node = Node::new(tag);
        match json {
            Json::Object(fields) => {
                for (key, value) in fields {
                    if let Some(name) = key.strip_prefix(ATTRIBUTE_PREFIX) {
                        node.set_attribute(name, scalar_text(name, value)?);
                    } else if key == TEXT_KEY {
                        node.set_text(scalar_text(TEXT_KEY, value)?);
                    } else {
                        let value = Self::value_from_json(&key, value)?;
                        node.set_element(key, value);
                    }
                }
            }
            Json::Null => {}
            Json::Array(_) => {
                return Err(DocumentError::InvalidRoot(format!(
                    "`{tag}` holds a list where a node was expected"
                )))
            }
            scalar => node.set_text(scalar_text(tag, scalar)?),
        }
        Ok(node)
    }

    fn value_from_json(name: &str, json: Json) -> DocumentResult<Value> {
        Ok(match json {
            Json::Object(_) | Json::Null => Value::Node(Self::node_from_json(name, json)?.into_handle()),
            Json::Array(items) => Value::List(
                items
                    .into_iter()
                    .map(|item| Self::value_from_json(name, item))
                    .collect::<DocumentResult<_>>()?,
            ),
            scalar => Value::Text(scalar_text(name, scalar)?),
        })
    }

    fn node_to_json(node: &Node) -> Json {
        if node.is_empty() {
            return Json::Null;
        }
        if node.attributes().is_empty() && !node.has_elements() {
            if let Some(text) = node.text() {
                return Json::String(text.to_string());
            }
        }

        let mut fields = Map::new();
        for (name, value) in node.attributes() {
            fields.insert(format!("{ATTRIBUTE_PREFIX}{name}"), Json::String(value.clone()));
        }
        if let Some(text) = node.text() {
            fields.insert(TEXT_KEY.to_string(), Json::String(text.to_string()));
        }
        for (name, value) in node.elements() {
            fields.insert(name.clone(), Self::value_to_json(value));
        }
        Json::Object(fields)
    }

    fn value_to_json(value: &Value) -> Json {
        match value {
            Value::Text(text) => Json::String(text.clone()),
            Value::Node(node) => Self::node_to_json(&read_node(node)),
            Value::List(items) => Json::Array(items.iter().map(Self::value_to_json).collect()),
        }
    }
}

fn scalar_text(name: &str, json: Json) -> DocumentResult<String> {
    match json {
        Json::String(text) => Ok(text),
        Json::Number(number) => Ok(number.to_string()),
        Json::Bool(flag) => Ok(flag.to_string()),
        Json::Null => Ok(String::new()),
        Json::Array(_) | Json::Object(_) => Err(DocumentError::InvalidAttribute {
            name: name.to_string(),
            reason: "expected a scalar".into(),
        }),
    }
}

impl DocumentMapper for JsonMapper {
    fn media_type(&self) -> &str {
        JSON_MEDIA_TYPE
    }

    fn accepts(&self, content_type: &str) -> bool {
        content_type.eq_ignore_ascii_case(JSON_MEDIA_TYPE) || content_type.ends_with("+json")
    }

    fn parse(&self, bytes: &[u8]) -> DocumentResult<NodeHandle> {
        let json: Json =
            serde_json::from_slice(bytes).map_err(|err| DocumentError::Parse(err.to_string()))?;
        let Json::Object(root) = json else {
            return Err(DocumentError::InvalidRoot("document is not an object".into()));
        };
        if root.len() != 1 {
            return Err(DocumentError::InvalidRoot(format!(
                "expected one root key, found {}",
                root.len()
            )));
        }
        let Some((tag, body)) = root.into_iter().next() else {
            return Err(DocumentError::InvalidRoot("empty document".into()));
        };
        Ok(Self::node_from_json(&tag, body)?.into_handle())
    }

    fn serialize(&self, node: &NodeHandle, tag: Option<&str>) -> DocumentResult<Vec<u8>> {
        let node = read_node(node);
        let tag = tag
            .or_else(|| node.tag())
            .ok_or(DocumentError::MissingTag)?
            .to_string();

        let mut root = Map::new();
        root.insert(tag, Self::node_to_json(&node));
        serde_json::to_vec(&Json::Object(root)).map_err(|err| DocumentError::Serialize(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPLOYEES: &str = r#"{"employees": {
        "@id": "http://localhost/api/employees",
        "employee": [
            {"@id": "http://localhost/api/employees/1", "name": "Joe", "age": 31},
            {"@id": "http://localhost/api/employees/2", "name": "Ann", "manager": null}
        ]
    }}"#;

    #[test]
    fn test_parse_maps_attributes_elements_and_lists() {
        let root = JsonMapper.parse(EMPLOYEES.as_bytes()).expect("should parse");
        let root = read_node(&root);

        assert_eq!(root.tag(), Some("employees"));
        assert_eq!(root.attribute("id"), Some("http://localhost/api/employees"));
        assert_eq!(root.element_names(), vec!["employee".to_string()]);

        let items = root.items("employee");
        assert_eq!(items.len(), 2);
        let first = read_node(items[0].as_node().expect("node"));
        assert_eq!(first.tag(), Some("employee"));
        assert_eq!(first.element("name").and_then(Value::as_text), Some("Joe"));
        assert_eq!(first.element("age").and_then(Value::as_text), Some("31"));

        let second = read_node(items[1].as_node().expect("node"));
        let manager = second.element("manager").and_then(Value::as_node).expect("empty node");
        assert!(read_node(manager).is_empty());
    }

    #[test]
    fn test_rejects_documents_without_single_root() {
        assert!(matches!(
            JsonMapper.parse(br#"{"a": {}, "b": {}}"#),
            Err(DocumentError::InvalidRoot(_))
        ));
        assert!(matches!(JsonMapper.parse(b"[1, 2]"), Err(DocumentError::InvalidRoot(_))));
        assert!(matches!(JsonMapper.parse(b"{nope"), Err(DocumentError::Parse(_))));
    }

    /// WHY: Writes send back exactly what was read plus local edits
    /// WHAT: A parsed document serializes to an equivalent document
    #[test]
    fn test_serialize_preserves_structure() {
        let original = JsonMapper.parse(EMPLOYEES.as_bytes()).expect("should parse");
        let bytes = JsonMapper.serialize(&original, None).expect("should serialize");
        let reparsed = JsonMapper.parse(&bytes).expect("should reparse");
        assert!(read_node(&original).same_content(&read_node(&reparsed)));
    }

    #[test]
    fn test_text_with_attributes_uses_text_key() {
        let mut node = Node::new("name");
        node.set_attribute("lang", "en");
        node.set_text("Joe");
        let bytes = JsonMapper
            .serialize(&node.into_handle(), None)
            .expect("should serialize");
        let json: Json = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(json["name"]["@lang"], "en");
        assert_eq!(json["name"]["#text"], "Joe");
    }

    #[test]
    fn test_untagged_node_needs_explicit_tag() {
        let node = Node::untagged().into_handle();
        assert_eq!(JsonMapper.serialize(&node, None), Err(DocumentError::MissingTag));
        assert!(JsonMapper.serialize(&node, Some("employee")).is_ok());
    }
}

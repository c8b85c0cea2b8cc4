use std::str::FromStr;

use crate::document::Input;
use crate::errors::{RobjError, RobjResult};

use super::{AttrValue, ResourceProxy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Name(String),
    Index(usize),
}

impl core::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{name}"),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

/// A dotted field path such as `employees.3.address.zipcode`; numeric
/// segments index into collections and lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    /// # Errors
    ///
    /// [`RobjError::InvalidPath`] for an empty path or an empty segment.
    pub fn parse(raw: &str) -> RobjResult<Self> {
        let invalid = |reason: &str| RobjError::InvalidPath {
            path: raw.to_string(),
            reason: reason.to_string(),
        };
        if raw.is_empty() {
            return Err(invalid("path is empty"));
        }

        let segments = raw
            .split('.')
            .map(|segment| {
                if segment.is_empty() {
                    return Err(invalid("empty segment"));
                }
                Ok(match segment.parse::<usize>() {
                    Ok(index) => Segment::Index(index),
                    Err(_) => Segment::Name(segment.to_string()),
                })
            })
            .collect::<RobjResult<_>>()?;
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    fn step(&self, current: AttrValue, segment: &Segment) -> RobjResult<AttrValue> {
        match (current, segment) {
            (AttrValue::Proxy(proxy), Segment::Name(name)) => proxy.get(name),
            (AttrValue::Proxy(proxy), Segment::Index(index)) => proxy.item(*index),
            (AttrValue::List(items), Segment::Index(index)) => {
                let len = items.len();
                items
                    .into_iter()
                    .nth(*index)
                    .ok_or(RobjError::IndexOutOfRange { index: *index, len })
            }
            (_, segment) => Err(RobjError::InvalidPath {
                path: self.raw.clone(),
                reason: format!("cannot step into `{segment}`"),
            }),
        }
    }
}

impl FromStr for FieldPath {
    type Err = RobjError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl core::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl ResourceProxy {
    /// Reads a dotted path, one [`ResourceProxy::get`] or
    /// [`ResourceProxy::item`] per segment.
    ///
    /// # Errors
    ///
    /// [`RobjError::InvalidPath`] when a segment leads nowhere, plus
    /// anything the individual reads fail with.
    pub fn traverse(&self, path: &str) -> RobjResult<AttrValue> {
        let path = FieldPath::parse(path)?;
        path.segments()
            .iter()
            .try_fold(AttrValue::Proxy(self.clone()), |current, segment| {
                path.step(current, segment)
            })
    }

    /// Writes the last segment of a dotted path on the proxy the rest of
    /// the path leads to.
    ///
    /// # Errors
    ///
    /// As [`ResourceProxy::traverse`], [`ResourceProxy::set`] and
    /// [`ResourceProxy::set_item`].
    pub fn set_path(&self, path: &str, input: impl Into<Input>) -> RobjResult<()> {
        let path = FieldPath::parse(path)?;
        let Some((last, leading)) = path.segments().split_last() else {
            return Err(RobjError::InvalidPath {
                path: path.raw.clone(),
                reason: "path is empty".into(),
            });
        };

        let target = leading
            .iter()
            .try_fold(AttrValue::Proxy(self.clone()), |current, segment| {
                path.step(current, segment)
            })?;
        let AttrValue::Proxy(target) = target else {
            return Err(RobjError::InvalidPath {
                path: path.raw.clone(),
                reason: "does not lead to a resource".into(),
            });
        };

        match last {
            Segment::Name(name) => target.set(name, input),
            Segment::Index(index) => target.set_item(*index, input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentMapper, JsonMapper};

    fn employee() -> ResourceProxy {
        let node = JsonMapper
            .parse(
                br#"{"employee": {
                    "name": "Joe",
                    "address": {"street": "Main", "zipcode": "10001"},
                    "phones": {"phone": ["555-1234", "555-9876"]},
                    "tags": ["a", "b", "c"]
                }}"#,
            )
            .expect("parses");
        ResourceProxy::detached("/employees/1", node)
    }

    #[test]
    fn test_parse_segments() {
        let path: FieldPath = "employees.3.address".parse().expect("parses");
        assert_eq!(
            path.segments(),
            &[
                Segment::Name("employees".into()),
                Segment::Index(3),
                Segment::Name("address".into()),
            ]
        );
        assert!(matches!(FieldPath::parse(""), Err(RobjError::InvalidPath { .. })));
        assert!(matches!(FieldPath::parse("a..b"), Err(RobjError::InvalidPath { .. })));
    }

    #[test]
    fn test_traverse_names_and_indexes() {
        let employee = employee();
        assert_eq!(
            employee.traverse("address.zipcode").expect("zip").as_text(),
            Some("10001")
        );
        assert_eq!(
            employee.traverse("phones.1").expect("phone").as_text(),
            Some("555-9876")
        );
        assert_eq!(employee.traverse("tags.2").expect("tag").as_text(), Some("c"));
        assert!(matches!(
            employee.traverse("name.first"),
            Err(RobjError::InvalidPath { .. })
        ));
    }

    /// WHY: Dynamic callers write nested fields without holding intermediate proxies
    /// WHAT: set_path writes through the same-URI child and dirties the root
    #[test]
    fn test_set_path_marks_root_dirty() {
        let employee = employee();
        employee.set_path("address.zipcode", "90210").expect("set");
        assert!(employee.is_dirty());
        assert_eq!(
            employee.traverse("address.zipcode").expect("zip").as_text(),
            Some("90210")
        );

        employee.set_path("phones.0", "555-0000").expect("set item");
        assert_eq!(
            employee.traverse("phones.0").expect("phone").as_text(),
            Some("555-0000")
        );
    }
}

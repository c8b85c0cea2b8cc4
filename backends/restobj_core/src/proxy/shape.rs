use crate::document::Node;

/// What a proxy's node looks like: its tag and whether it is a collection
/// of `child_tag` items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Shape {
    pub tag: Option<String>,
    pub is_collection: bool,
    pub child_tag: Option<String>,
}

impl Shape {
    /// Infers the shape from the node alone; the first matching rule wins:
    ///
    /// 1. a plural tag (`employees`) without any `employee` child: not yet
    ///    a collection, but appends go under `employee`;
    /// 2. exactly one child element: a collection of that element;
    /// 3. exactly one list valued child element: a collection of it;
    /// 4. the singular of the tag among the children: a collection of it.
    ///
    /// Rule 2 also matches a resource that merely has one nested element,
    /// so such a resource reads as a one item collection.
    #[must_use]
    pub fn infer(node: &Node) -> Self {
        let tag = node.tag().map(str::to_string);
        let names = node.element_names();
        let singular = tag.as_deref().and_then(singular);

        if let Some(singular) = &singular {
            if !names.contains(singular) {
                return Self {
                    tag,
                    is_collection: false,
                    child_tag: Some(singular.clone()),
                };
            }
        }

        if let [only] = names.as_slice() {
            return Self::collection(tag, only.clone());
        }

        let lists: Vec<&String> = node
            .elements()
            .iter()
            .filter(|(_, value)| value.is_list())
            .map(|(name, _)| name)
            .collect();
        if let [only] = lists.as_slice() {
            return Self::collection(tag, (*only).clone());
        }

        match singular {
            Some(singular) => Self::collection(tag, singular),
            None => Self {
                tag,
                ..Self::default()
            },
        }
    }

    fn collection(tag: Option<String>, child_tag: String) -> Self {
        Self {
            tag,
            is_collection: true,
            child_tag: Some(child_tag),
        }
    }
}

/// `employees` -> `employee`; `None` for tags not ending in `s`.
#[must_use]
pub fn singular(tag: &str) -> Option<String> {
    tag.strip_suffix('s')
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
}

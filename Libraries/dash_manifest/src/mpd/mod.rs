//! Declarative tree used to assemble MPEG-DASH manifests.
//! Parts of the tree may still be pending on a network result (e.g. an OTF probe);
//! these are resolved and rendered by [`render`].

pub mod render;
pub mod tags;

use std::future::Future;

use futures::future::{BoxFuture, FutureExt};

use crate::error::Result;
use tags::normalize_tag;

/// A subtree that is not known yet. Once awaited it yields a node, which may be a fragment.
pub type PendingNode = BoxFuture<'static, Result<Node>>;

/// Value bound to an attribute. `Absent` attributes are never serialized.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Absent,
    Text(String),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl AttrValue {
    /// Canonical text form of the value, `None` when absent.
    pub fn render(&self) -> Option<String> {
        match self {
            AttrValue::Absent => None,
            AttrValue::Text(value) => Some(value.clone()),
            AttrValue::UInt(value) => Some(value.to_string()),
            AttrValue::Float(value) => Some(value.to_string()),
            AttrValue::Bool(value) => Some(value.to_string()),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

impl From<&String> for AttrValue {
    fn from(value: &String) -> Self {
        AttrValue::Text(value.clone())
    }
}

impl From<u32> for AttrValue {
    fn from(value: u32) -> Self {
        AttrValue::UInt(value.into())
    }
}

impl From<u64> for AttrValue {
    fn from(value: u64) -> Self {
        AttrValue::UInt(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl<T: Into<AttrValue>> From<Option<T>> for AttrValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(AttrValue::Absent, Into::into)
    }
}

/// Ordered attribute mapping. Insertion order is the serialization order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(Vec<(String, AttrValue)>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Sets `name`, keeping the original position when it already exists.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.0.iter().find(|(existing, _)| existing == name).map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Builds an [`Attributes`] list in declaration order.
///
/// ```
/// let attributes = dash_manifest::attrs! { "id" => 0u32, "mimeType" => "video/mp4" };
/// assert_eq!(attributes.len(), 2);
/// ```
#[macro_export]
macro_rules! attrs {
    () => {
        $crate::mpd::Attributes::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {
        $crate::mpd::Attributes::new()$(.with($name, $value))+
    };
}

#[derive(Debug)]
pub struct Element {
    /// Tag name, already normalized to the MPD spelling.
    pub tag: String,
    pub attributes: Attributes,
    pub children: Vec<Node>,
}

pub enum Node {
    Element(Element),
    Text(String),
    /// Sibling nodes without a wrapping element.
    Fragment(Vec<Node>),
    Pending(PendingNode),
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::Element(element) => element.fmt(f),
            Node::Text(value) => f.debug_tuple("Text").field(value).finish(),
            Node::Fragment(nodes) => f.debug_tuple("Fragment").field(nodes).finish(),
            Node::Pending(_) => f.write_str("Pending(<future>)"),
        }
    }
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Node::Text(value.to_string())
    }
}

impl From<String> for Node {
    fn from(value: String) -> Self {
        Node::Text(value)
    }
}

impl From<Vec<Node>> for Node {
    fn from(nodes: Vec<Node>) -> Self {
        Node::Fragment(nodes)
    }
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Node::Element(element)
    }
}

/// Properties handed to a component: its attributes plus the normalized children.
#[derive(Debug, Default)]
pub struct Props {
    pub attributes: Attributes,
    pub children: Vec<Node>,
}

/// Flattens fragments one level deep.
fn normalize_children(children: Vec<Node>) -> Vec<Node> {
    let mut normalized = Vec::with_capacity(children.len());
    for child in children {
        match child {
            Node::Fragment(nodes) => normalized.extend(nodes),
            other => normalized.push(other),
        }
    }
    normalized
}

/// Creates an element node. `tag` is given in lowercase-hyphenated form (`segment-template`).
pub fn create_element(tag: &str, attributes: Attributes, children: Vec<Node>) -> Node {
    Node::Element(Element {
        tag: normalize_tag(tag),
        attributes,
        children: normalize_children(children),
    })
}

/// Invokes a component with its attributes and normalized children.
/// The component decides what it produces: a node, a fragment, a pending node or a `Result` of those.
pub fn create_component<F, R>(component: F, attributes: Attributes, children: Vec<Node>) -> R
where
    F: FnOnce(Props) -> R,
{
    component(Props {
        attributes,
        children: normalize_children(children),
    })
}

/// Groups sibling nodes without introducing a wrapping element.
pub fn fragment(children: Vec<Node>) -> Node {
    Node::Fragment(children)
}

pub fn text(value: impl Into<String>) -> Node {
    Node::Text(value.into())
}

/// Wraps a future producing a subtree.
pub fn pending<F>(future: F) -> Node
where
    F: Future<Output = Result<Node>> + Send + 'static,
{
    Node::Pending(future.boxed())
}

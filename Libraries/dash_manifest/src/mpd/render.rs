use std::io::Cursor;

use futures::future::{try_join_all, BoxFuture, FutureExt};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use tracing::{debug, instrument};

use super::tags::emitted_attributes;
use super::Node;
use crate::error::{Error, Result};

/// A fully resolved node, ready to be written out.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedNode {
    Element {
        tag: String,
        attributes: Vec<(String, String)>,
        children: Vec<ResolvedNode>,
    },
    Text(String),
}

impl ResolvedNode {
    pub fn tag(&self) -> Option<&str> {
        match self {
            ResolvedNode::Element { tag, .. } => Some(tag),
            ResolvedNode::Text(_) => None,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        match self {
            ResolvedNode::Element { attributes, .. } => attributes
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str()),
            ResolvedNode::Text(_) => None,
        }
    }

    pub fn children(&self) -> &[ResolvedNode] {
        match self {
            ResolvedNode::Element { children, .. } => children,
            ResolvedNode::Text(_) => &[],
        }
    }

    /// Direct child elements with the given tag.
    pub fn children_by_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a ResolvedNode> + 'a {
        self.children().iter().filter(move |child| child.tag() == Some(tag))
    }
}

/// Resolves one child slot into the concrete nodes it stands for.
///
/// Every pending subtree below a node is awaited concurrently, but the results are
/// reassembled in declaration order, so completion order never shows in the output.
pub fn resolve(node: Node) -> BoxFuture<'static, Result<Vec<ResolvedNode>>> {
    async move {
        match node {
            Node::Text(value) => Ok(vec![ResolvedNode::Text(value)]),
            Node::Element(element) => {
                let attributes = emitted_attributes(&element.attributes);
                let children = resolve_all(element.children).await?;
                Ok(vec![ResolvedNode::Element {
                    tag: element.tag,
                    attributes,
                    children,
                }])
            }
            Node::Fragment(nodes) => resolve_all(nodes).await,
            Node::Pending(future) => resolve(future.await?).await,
        }
    }
    .boxed()
}

async fn resolve_all(nodes: Vec<Node>) -> Result<Vec<ResolvedNode>> {
    // try_join_all keeps results in input order and drops the remaining futures on the first error
    let slots = try_join_all(nodes.into_iter().map(resolve)).await?;
    Ok(slots.into_iter().flatten().collect())
}

/// Resolves a document root, which must end up as exactly one element.
pub async fn resolve_root(node: Node) -> Result<ResolvedNode> {
    let mut nodes = resolve(node).await?;
    match (nodes.pop(), nodes.is_empty()) {
        (Some(root @ ResolvedNode::Element { .. }), true) => Ok(root),
        _ => Err(Error::InvalidRoot),
    }
}

/// Serializes a tree to a compact XML document.
#[instrument(skip_all)]
pub async fn serialize(node: Node) -> Result<String> {
    let root = resolve_root(node).await?;
    write_document(Writer::new(Cursor::new(Vec::new())), &root)
}

/// Same as [`serialize`], indented by two spaces per level.
#[instrument(skip_all)]
pub async fn serialize_pretty(node: Node) -> Result<String> {
    let root = resolve_root(node).await?;
    write_document(Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2), &root)
}

fn write_document(mut writer: Writer<Cursor<Vec<u8>>>, root: &ResolvedNode) -> Result<String> {
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    write_node(&mut writer, root)?;

    let result = writer.into_inner().into_inner();
    debug!("Serialized document of {} bytes", result.len());
    String::from_utf8(result).map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

fn write_node(writer: &mut Writer<Cursor<Vec<u8>>>, node: &ResolvedNode) -> Result<()> {
    match node {
        ResolvedNode::Text(value) => {
            writer.write_event(Event::Text(BytesText::new(value)))?;
        }
        ResolvedNode::Element {
            tag,
            attributes,
            children,
        } => {
            let mut start = BytesStart::new(tag.as_str());
            for (name, value) in attributes {
                start.push_attribute((name.as_str(), value.as_str()));
            }

            if children.is_empty() {
                writer.write_event(Event::Empty(start))?;
            } else {
                writer.write_event(Event::Start(start))?;
                for child in children {
                    write_node(writer, child)?;
                }
                writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
            }
        }
    }
    Ok(())
}

//! The binary XML node tree.
//!
//! Every frame on the wire is one [`Node`]: a tag, an ordered attribute
//! map and either child nodes or an opaque byte payload.

use std::collections::BTreeMap;
use std::fmt;

use crate::types::JID;

/// Attributes of a node.
pub type Attrs = BTreeMap<String, AttrValue>;

/// Typed attribute values.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    String(String),
    JID(JID),
    Int(i64),
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::String(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::String(s)
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        AttrValue::Int(n)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::String(if b { "true" } else { "false" }.to_string())
    }
}

impl From<JID> for AttrValue {
    fn from(jid: JID) -> Self {
        AttrValue::JID(jid)
    }
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(n) => Some(*n),
            AttrValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_jid(&self) -> Option<JID> {
        match self {
            AttrValue::JID(jid) => Some(jid.clone()),
            AttrValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::String(s) => write!(f, "{s}"),
            AttrValue::JID(jid) => write!(f, "{jid}"),
            AttrValue::Int(n) => write!(f, "{n}"),
        }
    }
}

/// Content of a node: nothing, child nodes, or raw bytes.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum NodeContent {
    #[default]
    None,
    Children(Vec<Node>),
    Bytes(Vec<u8>),
}

/// One element of the binary XML tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    pub tag: String,
    pub attrs: Attrs,
    pub content: NodeContent,
}

impl Node {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: Attrs::new(),
            content: NodeContent::None,
        }
    }

    pub fn with_attrs<const N: usize>(
        tag: impl Into<String>,
        attrs: [(&str, AttrValue); N],
    ) -> Self {
        let mut node = Self::new(tag);
        for (k, v) in attrs {
            node.attrs.insert(k.to_string(), v);
        }
        node
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.attrs.insert(key.into(), value.into());
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(AttrValue::as_str)
    }

    pub fn attr_int(&self, key: &str) -> Option<i64> {
        self.attrs.get(key).and_then(AttrValue::as_int)
    }

    pub fn attr_jid(&self, key: &str) -> Option<JID> {
        self.attrs.get(key).and_then(AttrValue::as_jid)
    }

    pub fn set_children(&mut self, children: Vec<Node>) {
        self.content = NodeContent::Children(children);
    }

    pub fn add_child(&mut self, child: Node) {
        match &mut self.content {
            NodeContent::Children(children) => children.push(child),
            _ => self.content = NodeContent::Children(vec![child]),
        }
    }

    pub fn set_bytes(&mut self, bytes: Vec<u8>) {
        self.content = NodeContent::Bytes(bytes);
    }

    pub fn children(&self) -> &[Node] {
        match &self.content {
            NodeContent::Children(children) => children,
            _ => &[],
        }
    }

    pub fn children_by_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Node> {
        self.children().iter().filter(move |n| n.tag == tag)
    }

    pub fn child_by_tag(&self, tag: &str) -> Option<&Node> {
        self.children().iter().find(|n| n.tag == tag)
    }

    /// Walks a path of nested tags, returning the innermost node.
    pub fn child_by_path(&self, tags: &[&str]) -> Option<&Node> {
        let mut current = self;
        for tag in tags {
            current = current.child_by_tag(tag)?;
        }
        Some(current)
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.content {
            NodeContent::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl fmt::Display for Node {
    /// XML-ish rendering for logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.tag)?;
        for (key, value) in &self.attrs {
            match value {
                AttrValue::String(s) => write!(f, " {key}={s:?}")?,
                AttrValue::JID(jid) => write!(f, " {key}=\"{jid}\"")?,
                AttrValue::Int(n) => write!(f, " {key}=\"{n}\"")?,
            }
        }
        match &self.content {
            NodeContent::None => write!(f, "/>"),
            NodeContent::Bytes(bytes) => {
                write!(f, ">{}</{}>", hex::encode(bytes), self.tag)
            }
            NodeContent::Children(children) => {
                write!(f, ">")?;
                for child in children {
                    write!(f, "{child}")?;
                }
                write!(f, "</{}>", self.tag)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_accessors() {
        let mut node = Node::new("iq");
        node.set_attr("id", "ab-1");
        node.set_attr("code", 515i64);
        node.set_attr("from", JID::new("123", "s.whatsapp.net"));

        assert_eq!(node.attr_str("id"), Some("ab-1"));
        assert_eq!(node.attr_int("code"), Some(515));
        assert_eq!(node.attr_jid("from").unwrap().user, "123");
        assert_eq!(node.attr_str("missing"), None);
    }

    #[test]
    fn string_attr_coerces() {
        let mut node = Node::new("stream:error");
        node.set_attr("code", "401");
        assert_eq!(node.attr_int("code"), Some(401));

        node.set_attr("from", "9876@s.whatsapp.net");
        assert_eq!(node.attr_jid("from").unwrap().user, "9876");
    }

    #[test]
    fn child_by_path_walks_tree() {
        let mut inner = Node::new("list");
        inner.add_child(Node::new("user"));
        let mut usync = Node::new("usync");
        usync.add_child(inner);
        let mut iq = Node::new("iq");
        iq.add_child(usync);

        assert!(iq.child_by_path(&["usync", "list"]).is_some());
        assert!(iq.child_by_path(&["usync", "query"]).is_none());
    }

    #[test]
    fn display_renders_xmlish() {
        let mut node = Node::new("presence");
        node.set_attr("type", "available");
        assert_eq!(node.to_string(), "<presence type=\"available\"/>");
    }
}

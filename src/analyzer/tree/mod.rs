//! Dialect-agnostic syntax tree.
//!
//! Every front-end (the YAML parser in [`yaml`], the shell-word lexer used for
//! Dockerfile arguments, or an external dialect parser) produces [`Node`]s:
//! - a [`NodeKind`] tag
//! - a [`Location`] and [`TextRange`] into the text the node was parsed from
//! - an optional scalar value and string attributes
//! - an ordered list of owned children, plus attached comments
//!
//! Children are owned, so the structure is a strict tree.

pub mod yaml;

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::analyzer::location::{HasTextRange, Location, TextRange};

/// Node variants across dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum NodeKind {
    /// Root of a parsed file.
    File,
    /// One document of a multi-document stream.
    Document,
    /// Key/value container; children are `Tuple`s.
    Mapping,
    /// A single `key: value` entry; children are `[key, value]`.
    Tuple,
    /// Ordered list of values.
    Sequence,
    /// Leaf value.
    Scalar,
    /// Function or intrinsic call (`!Ref`, `fn(..)`).
    FunctionCall,
    /// Named block with a body (`resource "x" { .. }`, a Dockerfile instruction).
    Block,
    /// One shell command; children are `Argument`s.
    Command,
    /// One shell word; children are `Literal`/`Expansion` fragments.
    Argument,
    /// Literal fragment of a word, quotes already removed.
    Literal,
    /// Variable reference, command substitution or other expansion.
    Expansion,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Document => "document",
            Self::Mapping => "mapping",
            Self::Tuple => "tuple",
            Self::Sequence => "sequence",
            Self::Scalar => "scalar",
            Self::FunctionCall => "function-call",
            Self::Block => "block",
            Self::Command => "command",
            Self::Argument => "argument",
            Self::Literal => "literal",
            Self::Expansion => "expansion",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A source comment with its marker included in `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub text: String,
    pub location: Location,
    pub range: TextRange,
}

impl Comment {
    /// Text without the leading `#` and surrounding whitespace.
    pub fn content(&self) -> &str {
        self.text.trim_start_matches('#').trim()
    }
}

impl HasTextRange for Comment {
    fn text_range(&self) -> TextRange {
        self.range
    }
}

/// A node of the generic tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    kind: NodeKind,
    location: Location,
    range: TextRange,
    value: Option<String>,
    attributes: BTreeMap<String, String>,
    comments: Vec<Comment>,
    children: Vec<Node>,
}

impl Node {
    pub fn new(kind: NodeKind, location: Location, range: TextRange) -> Self {
        Self {
            kind,
            location,
            range,
            value: None,
            attributes: BTreeMap::new(),
            comments: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn push_child(&mut self, child: Node) {
        self.children.push(child);
    }

    pub fn push_comment(&mut self, comment: Comment) {
        self.comments.push(comment);
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn range(&self) -> TextRange {
        self.range
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn is(&self, kind: NodeKind) -> bool {
        self.kind == kind
    }

    /// Scalar value, `None` for any other kind or for an implicit null.
    pub fn as_str(&self) -> Option<&str> {
        if self.kind == NodeKind::Scalar {
            self.value()
        } else {
            None
        }
    }

    /// Key of a `Tuple`.
    pub fn key(&self) -> Option<&Node> {
        if self.kind == NodeKind::Tuple {
            self.children.first()
        } else {
            None
        }
    }

    /// Value of a `Tuple`.
    pub fn tuple_value(&self) -> Option<&Node> {
        if self.kind == NodeKind::Tuple {
            self.children.get(1)
        } else {
            None
        }
    }

    /// Entries of a `Mapping`.
    pub fn entries(&self) -> impl Iterator<Item = &Node> {
        let entries: &[Node] = if self.kind == NodeKind::Mapping {
            &self.children
        } else {
            &[]
        };
        entries.iter().filter(|c| c.kind == NodeKind::Tuple)
    }

    /// The `Tuple` of a mapping whose scalar key equals `key`.
    pub fn entry(&self, key: &str) -> Option<&Node> {
        self.entries()
            .find(|t| t.key().and_then(Node::as_str) == Some(key))
    }

    /// The value stored under `key` in a mapping.
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.entry(key).and_then(Node::tuple_value)
    }

    /// Follow a chain of mapping keys.
    pub fn path(&self, keys: &[&str]) -> Option<&Node> {
        keys.iter().try_fold(self, |node, key| node.get(key))
    }

    /// Items of a `Sequence`.
    pub fn items(&self) -> &[Node] {
        if self.kind == NodeKind::Sequence {
            &self.children
        } else {
            &[]
        }
    }

    /// Pre-order iterator over this node and all of its descendants.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }
}

impl HasTextRange for Node {
    fn text_range(&self) -> TextRange {
        self.range
    }
}

/// Pre-order depth-first iterator.
pub struct Descendants<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// A parsed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    root: Node,
}

impl Tree {
    pub fn new(root: Node) -> Self {
        Self { root }
    }

    /// A tree with no documents, used for files that produce no content.
    pub fn empty() -> Self {
        let range = TextRange::of(1, 0, 1, 0);
        Self::new(Node::new(NodeKind::File, Location::default(), range))
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    /// Top-level documents.
    pub fn documents(&self) -> impl Iterator<Item = &Node> {
        self.root
            .children
            .iter()
            .filter(|n| n.kind == NodeKind::Document)
    }

    /// Content node of each document.
    pub fn document_roots(&self) -> impl Iterator<Item = &Node> {
        self.documents().filter_map(|d| d.children.first())
    }
}

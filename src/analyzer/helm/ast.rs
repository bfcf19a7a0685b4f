//! Go template syntax tree as emitted by the template engine.
//!
//! The engine serializes its parse tree as a flat node list; children are
//! referenced by index and node 0 is the root `List`. Layout (little-endian):
//!
//! ```text
//! magic   b"GTPL"
//! version u16            (1)
//! count   u32
//! count × node:
//!   kind      u8
//!   pos       u32        byte offset into the template source
//!   length    u32
//!   payload   u32 + bytes  UTF-8 (text of Text/String/Comment nodes, names of fields...)
//!   children  u32 + u32 × n
//! ```
//!
//! Decoding checks every index and the tree shape up front; the typed
//! accessors on [`NodeRef`] then report a missing child as
//! [`AstError::MissingChild`] instead of assuming a fixed arity.

use std::fmt;

use log::debug;

const MAGIC: &[u8; 4] = b"GTPL";
const VERSION: u16 = 1;
/// kind + pos + length + payload length + child count
const MIN_NODE_SIZE: usize = 1 + 4 + 4 + 4 + 4;

/// Node kinds of the Go template parse tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GoNodeKind {
    List,
    Text,
    Action,
    If,
    Range,
    With,
    Pipe,
    Command,
    Field,
    Chain,
    Variable,
    Identifier,
    Dot,
    Nil,
    Bool,
    Number,
    String,
    Template,
    Comment,
    Break,
    Continue,
    /// A kind this decoder does not know; kept so positions stay usable.
    Unknown(u8),
}

impl GoNodeKind {
    pub fn from_u8(code: u8) -> Self {
        match code {
            0 => Self::List,
            1 => Self::Text,
            2 => Self::Action,
            3 => Self::If,
            4 => Self::Range,
            5 => Self::With,
            6 => Self::Pipe,
            7 => Self::Command,
            8 => Self::Field,
            9 => Self::Chain,
            10 => Self::Variable,
            11 => Self::Identifier,
            12 => Self::Dot,
            13 => Self::Nil,
            14 => Self::Bool,
            15 => Self::Number,
            16 => Self::String,
            17 => Self::Template,
            18 => Self::Comment,
            19 => Self::Break,
            20 => Self::Continue,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::List => 0,
            Self::Text => 1,
            Self::Action => 2,
            Self::If => 3,
            Self::Range => 4,
            Self::With => 5,
            Self::Pipe => 6,
            Self::Command => 7,
            Self::Field => 8,
            Self::Chain => 9,
            Self::Variable => 10,
            Self::Identifier => 11,
            Self::Dot => 12,
            Self::Nil => 13,
            Self::Bool => 14,
            Self::Number => 15,
            Self::String => 16,
            Self::Template => 17,
            Self::Comment => 18,
            Self::Break => 19,
            Self::Continue => 20,
            Self::Unknown(code) => *code,
        }
    }

    /// `If`, `Range` and `With` share the pipe/list/else-list shape.
    pub fn is_branch(&self) -> bool {
        matches!(self, Self::If | Self::Range | Self::With)
    }
}

impl fmt::Display for GoNodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "Unknown({code})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Errors raised while decoding or navigating a template AST.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AstError {
    #[error("AST is truncated at byte {offset}")]
    Truncated { offset: usize },
    #[error("AST does not start with the expected header")]
    BadMagic,
    #[error("Unsupported AST version {0}")]
    UnsupportedVersion(u16),
    #[error("AST has no root node")]
    Empty,
    #[error("Node {index} references missing node {child}")]
    BadChildIndex { index: usize, child: usize },
    #[error("Node {0} has more than one parent")]
    MultipleParents(usize),
    #[error("Payload of node {0} is not valid UTF-8")]
    InvalidPayload(usize),
    #[error("{kind} node {index} has no child #{position}")]
    MissingChild {
        index: usize,
        kind: GoNodeKind,
        position: usize,
    },
    #[error("Expected {expected} at node {index}, found {found}")]
    UnexpectedKind {
        index: usize,
        expected: &'static str,
        found: GoNodeKind,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RawNode {
    kind: GoNodeKind,
    pos: usize,
    length: usize,
    payload: String,
    children: Vec<usize>,
}

/// A decoded template AST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoTemplateAst {
    nodes: Vec<RawNode>,
}

impl GoTemplateAst {
    /// Decode the engine's serialized node list.
    pub fn decode(bytes: &[u8]) -> Result<Self, AstError> {
        let mut reader = Reader { bytes, offset: 0 };
        if reader.take(4)? != MAGIC {
            return Err(AstError::BadMagic);
        }
        let version = reader.u16()?;
        if version != VERSION {
            return Err(AstError::UnsupportedVersion(version));
        }

        let count = reader.u32()? as usize;
        if count == 0 {
            return Err(AstError::Empty);
        }
        if count.saturating_mul(MIN_NODE_SIZE) > reader.remaining() {
            return Err(AstError::Truncated { offset: bytes.len() });
        }

        let mut nodes = Vec::with_capacity(count);
        for index in 0..count {
            let code = reader.u8()?;
            let kind = GoNodeKind::from_u8(code);
            if let GoNodeKind::Unknown(code) = kind {
                debug!("Unknown template node kind {} at node {}", code, index);
            }
            let pos = reader.u32()? as usize;
            let length = reader.u32()? as usize;
            let payload_len = reader.u32()? as usize;
            let payload = std::str::from_utf8(reader.take(payload_len)?)
                .map_err(|_| AstError::InvalidPayload(index))?
                .to_string();
            let child_count = reader.u32()? as usize;
            if child_count.saturating_mul(4) > reader.remaining() {
                return Err(AstError::Truncated { offset: reader.offset });
            }
            let mut children = Vec::with_capacity(child_count);
            for _ in 0..child_count {
                children.push(reader.u32()? as usize);
            }
            nodes.push(RawNode {
                kind,
                pos,
                length,
                payload,
                children,
            });
        }

        let ast = Self { nodes };
        ast.check_shape()?;
        Ok(ast)
    }

    /// Every child index exists, the root has no parent and no node has two.
    fn check_shape(&self) -> Result<(), AstError> {
        let mut has_parent = vec![false; self.nodes.len()];
        for (index, node) in self.nodes.iter().enumerate() {
            for &child in &node.children {
                if child >= self.nodes.len() {
                    return Err(AstError::BadChildIndex { index, child });
                }
                if child == 0 || has_parent[child] {
                    return Err(AstError::MultipleParents(child));
                }
                has_parent[child] = true;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> NodeRef<'_> {
        NodeRef { ast: self, index: 0 }
    }

    pub fn node(&self, index: usize) -> Option<NodeRef<'_>> {
        (index < self.nodes.len()).then_some(NodeRef { ast: self, index })
    }
}

/// Borrowed handle on one node.
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    ast: &'a GoTemplateAst,
    index: usize,
}

impl fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("index", &self.index)
            .field("kind", &self.kind())
            .field("pos", &self.pos())
            .finish()
    }
}

/// Typed view of a node.
#[derive(Debug, Clone, Copy)]
pub enum TemplateNode<'a> {
    /// Sequence of nodes.
    List(NodeRef<'a>),
    /// Literal text copied to the output.
    Text { text: &'a str },
    /// `{{ pipeline }}`
    Action { pipe: NodeRef<'a> },
    /// `if`, `range` or `with` with their bodies.
    Branch {
        kind: GoNodeKind,
        pipe: NodeRef<'a>,
        list: NodeRef<'a>,
        else_list: Option<NodeRef<'a>>,
    },
    /// `{{ template "name" pipeline }}`
    Template { name: &'a str },
    /// Everything that only appears inside pipelines, and unknown kinds.
    Other(GoNodeKind),
}

impl<'a> NodeRef<'a> {
    fn raw(&self) -> &'a RawNode {
        &self.ast.nodes[self.index]
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> GoNodeKind {
        self.raw().kind
    }

    /// Byte offset into the template source.
    pub fn pos(&self) -> usize {
        self.raw().pos
    }

    pub fn length(&self) -> usize {
        self.raw().length
    }

    pub fn end(&self) -> usize {
        self.pos() + self.length()
    }

    pub fn payload(&self) -> &'a str {
        &self.raw().payload
    }

    pub fn child_count(&self) -> usize {
        self.raw().children.len()
    }

    pub fn children(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        let ast = self.ast;
        self.raw()
            .children
            .iter()
            .map(move |&index| NodeRef { ast, index })
    }

    /// Child at `position`, or [`AstError::MissingChild`].
    pub fn child(&self, position: usize) -> Result<NodeRef<'a>, AstError> {
        self.raw()
            .children
            .get(position)
            .map(|&index| NodeRef {
                ast: self.ast,
                index,
            })
            .ok_or(AstError::MissingChild {
                index: self.index,
                kind: self.kind(),
                position,
            })
    }

    /// Pipe of an `Action` or a branch node.
    pub fn pipe(&self) -> Result<NodeRef<'a>, AstError> {
        self.expect(|k| k == GoNodeKind::Action || k.is_branch(), "action or branch")?;
        self.child(0)
    }

    /// Body of a branch node.
    pub fn list(&self) -> Result<NodeRef<'a>, AstError> {
        self.expect(|k| k.is_branch(), "branch")?;
        self.child(1)
    }

    /// `else` body of a branch node, if any.
    pub fn else_list(&self) -> Result<Option<NodeRef<'a>>, AstError> {
        self.expect(|k| k.is_branch(), "branch")?;
        Ok(self.child(2).ok())
    }

    fn expect(&self, accept: impl Fn(GoNodeKind) -> bool, expected: &'static str) -> Result<(), AstError> {
        if accept(self.kind()) {
            Ok(())
        } else {
            Err(AstError::UnexpectedKind {
                index: self.index,
                expected,
                found: self.kind(),
            })
        }
    }

    /// Typed view of this node.
    pub fn view(&self) -> Result<TemplateNode<'a>, AstError> {
        Ok(match self.kind() {
            GoNodeKind::List => TemplateNode::List(*self),
            GoNodeKind::Text => TemplateNode::Text {
                text: self.payload(),
            },
            GoNodeKind::Action => TemplateNode::Action { pipe: self.pipe()? },
            kind if kind.is_branch() => TemplateNode::Branch {
                kind,
                pipe: self.pipe()?,
                list: self.list()?,
                else_list: self.else_list()?,
            },
            GoNodeKind::Template => TemplateNode::Template {
                name: self.payload(),
            },
            other => TemplateNode::Other(other),
        })
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], AstError> {
        let end = self
            .offset
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(AstError::Truncated {
                offset: self.offset,
            })?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, AstError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, AstError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, AstError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Serializer for the node-list format.
///
/// The first pushed node is the root.
#[derive(Debug, Default)]
pub struct AstWriter {
    nodes: Vec<RawNode>,
}

impl AstWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node and return its index.
    pub fn push(&mut self, kind: GoNodeKind, pos: usize, length: usize, payload: &str) -> usize {
        self.nodes.push(RawNode {
            kind,
            pos,
            length,
            payload: payload.to_string(),
            children: Vec::new(),
        });
        self.nodes.len() - 1
    }

    /// Append `child` to the children of `parent`.
    pub fn adopt(&mut self, parent: usize, child: usize) {
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.push(child);
        }
    }

    /// Add a node as the last child of `parent`.
    pub fn push_child(
        &mut self,
        parent: usize,
        kind: GoNodeKind,
        pos: usize,
        length: usize,
        payload: &str,
    ) -> usize {
        let child = self.push(kind, pos, length, payload);
        self.adopt(parent, child);
        child
    }

    pub fn finish(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&(self.nodes.len() as u32).to_le_bytes());
        for node in &self.nodes {
            out.push(node.kind.code());
            out.extend_from_slice(&(node.pos as u32).to_le_bytes());
            out.extend_from_slice(&(node.length as u32).to_le_bytes());
            out.extend_from_slice(&(node.payload.len() as u32).to_le_bytes());
            out.extend_from_slice(node.payload.as_bytes());
            out.extend_from_slice(&(node.children.len() as u32).to_le_bytes());
            for child in &node.children {
                out.extend_from_slice(&(*child as u32).to_le_bytes());
            }
        }
        out
    }
}

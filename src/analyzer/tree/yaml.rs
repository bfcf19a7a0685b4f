//! YAML front-end producing the generic tree.
//!
//! Built on the `yaml-rust2` event parser, which reports a marker for every
//! event. Scalar end offsets are not reported by the parser and are recovered
//! from the source text according to the scalar's style. Block scalars are
//! not marked on their `|`/`>` indicator, which is looked up in the source.

use yaml_rust2::parser::{Event, MarkedEventReceiver, Parser};
use yaml_rust2::scanner::{Marker, TScalarStyle};

use crate::analyzer::location::{LineIndex, Location, TextPointer, TextRange};
use crate::analyzer::tree::{Comment, Node, NodeKind, Tree};

/// Error type for parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("YAML syntax error at {position}: {message}")]
    Syntax {
        message: String,
        position: TextPointer,
    },
    #[error("Unexpected end of YAML event stream")]
    UnexpectedEnd,
}

/// Parse YAML text (possibly several documents) into a tree.
pub fn parse(text: &str) -> Result<Tree, ParseError> {
    let index = LineIndex::new(text);
    let mut collector = EventCollector::default();
    let mut parser = Parser::new_from_str(text);
    if let Err(err) = parser.load(&mut collector, true) {
        let offset = byte_offsets(text)
            .get(err.marker().index())
            .copied()
            .unwrap_or(text.len());
        let position = index
            .pointer(offset)
            .unwrap_or_else(|| TextPointer::new(1, 0));
        return Err(ParseError::Syntax {
            message: err.info().to_string(),
            position,
        });
    }

    let builder = TreeBuilder {
        text,
        index: &index,
        offsets: byte_offsets(text),
        events: collector.events,
    };
    builder.build()
}

/// Byte offset of every char index, plus the end of the text.
fn byte_offsets(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect()
}

#[derive(Default)]
struct EventCollector {
    events: Vec<(Event, Marker)>,
}

impl MarkedEventReceiver for EventCollector {
    fn on_event(&mut self, ev: Event, mark: Marker) {
        self.events.push((ev, mark));
    }
}

struct TreeBuilder<'a> {
    text: &'a str,
    index: &'a LineIndex<'a>,
    offsets: Vec<usize>,
    events: Vec<(Event, Marker)>,
}

impl TreeBuilder<'_> {
    fn build(&self) -> Result<Tree, ParseError> {
        let mut documents = Vec::new();
        let mut i = 0;
        while i < self.events.len() {
            match &self.events[i].0 {
                Event::DocumentStart { .. } => {
                    let start = self.offset_at(i);
                    let (content, next) = self.node(i + 1)?;
                    let end = content.location().end().max(start);
                    let mut document = self.node_at(NodeKind::Document, start, end);
                    document.push_child(content);
                    documents.push(document);
                    i = next;
                }
                _ => i += 1,
            }
        }

        self.attach_comments(&mut documents);
        let mut root = self.node_at(NodeKind::File, 0, self.text.len());
        for document in documents {
            root.push_child(document);
        }
        Ok(Tree::new(root))
    }

    /// Build the node starting at event `i`; returns it with the index of the next event.
    fn node(&self, i: usize) -> Result<(Node, usize), ParseError> {
        let (event, _) = self.events.get(i).ok_or(ParseError::UnexpectedEnd)?;
        match event {
            Event::Scalar(value, style, _, tag) => {
                let mut node = self.scalar(i, value, *style);
                if let Some(tag) = tag {
                    node = node.with_attribute("tag", format!("{}{}", tag.handle, tag.suffix));
                }
                Ok((node, i + 1))
            }
            Event::Alias(id) => {
                let start = self.offset_at(i);
                let node = self
                    .node_at(NodeKind::Scalar, start, start)
                    .with_attribute("alias", id.to_string());
                Ok((node, i + 1))
            }
            Event::MappingStart(..) => self.collection(i, NodeKind::Mapping),
            Event::SequenceStart(..) => self.collection(i, NodeKind::Sequence),
            _ => Err(ParseError::UnexpectedEnd),
        }
    }

    fn collection(&self, i: usize, kind: NodeKind) -> Result<(Node, usize), ParseError> {
        let start = self.offset_at(i);
        let mut children = Vec::new();
        let mut next = i + 1;
        loop {
            match self.events.get(next).map(|(e, _)| e) {
                Some(Event::MappingEnd) | Some(Event::SequenceEnd) => break,
                None => return Err(ParseError::UnexpectedEnd),
                _ => {}
            }
            if kind == NodeKind::Mapping {
                let (key, after_key) = self.node(next)?;
                let (value, after_value) = self.node(after_key)?;
                let tuple_start = key.location().position();
                let tuple_end = value.location().end().max(key.location().end());
                let tuple = self
                    .node_at(NodeKind::Tuple, tuple_start, tuple_end)
                    .with_child(key)
                    .with_child(value);
                children.push(tuple);
                next = after_value;
            } else {
                let (item, after_item) = self.node(next)?;
                children.push(item);
                next = after_item;
            }
        }

        let flow_close = match self.text.as_bytes().get(start) {
            Some(b'{') => Some(b'}'),
            Some(b'[') => Some(b']'),
            _ => None,
        };
        let end = match flow_close {
            // The closing event is marked on the bracket itself.
            Some(close) => {
                let at = self.offset_at(next);
                if self.text.as_bytes().get(at) == Some(&close) {
                    at + 1
                } else {
                    at
                }
            }
            None => children
                .last()
                .map(|c| c.location().end())
                .unwrap_or(start),
        };
        let node = self
            .node_at(kind, start, end.max(start))
            .with_children(children);
        Ok((node, next + 1))
    }

    fn scalar(&self, i: usize, value: &str, style: TScalarStyle) -> Node {
        let marked = self.offset_at(i);
        let rest = &self.text[marked..];
        let (style, start, end) = match style {
            TScalarStyle::DoubleQuoted => ("double", marked, marked + closing_double_quote(rest)),
            TScalarStyle::SingleQuoted => ("single", marked, marked + closing_single_quote(rest)),
            TScalarStyle::Literal => {
                let start = self.block_indicator(i, marked, '|');
                ("literal", start, self.end_before_next_event(i, start))
            }
            TScalarStyle::Folded => {
                let start = self.block_indicator(i, marked, '>');
                ("folded", start, self.end_before_next_event(i, start))
            }
            TScalarStyle::Plain if rest.starts_with(value) => ("plain", marked, marked + value.len()),
            TScalarStyle::Plain => ("plain", marked, self.end_before_next_event(i, marked)),
        };

        let node = self
            .node_at(NodeKind::Scalar, start, end)
            .with_attribute("style", style);
        if style == "plain" && value.is_empty() {
            // implicit null, e.g. `key:` with nothing after it
            node
        } else {
            node.with_value(value)
        }
    }

    /// Offset of a block scalar's `|`/`>` indicator: on the header line
    /// before `marked`, past the previous event, or on the marked line.
    fn block_indicator(&self, i: usize, marked: usize, indicator: char) -> usize {
        if self.text[marked..].starts_with(indicator) {
            return marked;
        }
        let floor = i
            .checked_sub(1)
            .map(|prev| self.offset_at(prev))
            .unwrap_or(0)
            .min(marked);
        let before = self.text[floor..marked].trim_end();
        let line_start = before.rfind('\n').map_or(0, |n| n + 1);
        let header = &before[line_start..];
        let header = comment_start(header).map_or(header, |c| &header[..c]);
        if let Some(k) = header.rfind(indicator) {
            return floor + line_start + k;
        }

        let line = self.text[marked..].split('\n').next().unwrap_or_default();
        let line = comment_start(line).map_or(line, |c| &line[..c]);
        line.find(indicator).map_or(marked, |k| marked + k)
    }

    /// Last non-blank byte before the following event, for scalars whose
    /// source spelling differs from their value.
    fn end_before_next_event(&self, i: usize, start: usize) -> usize {
        let limit = if i + 1 < self.events.len() {
            self.offset_at(i + 1)
        } else {
            self.text.len()
        };
        let limit = limit.max(start);
        let slice = self.text[start..limit].trim_end();
        let slice = slice.strip_suffix(':').map(str::trim_end).unwrap_or(slice);
        start + slice.len()
    }

    fn offset_at(&self, i: usize) -> usize {
        self.events
            .get(i)
            .and_then(|(_, mark)| self.offsets.get(mark.index()))
            .copied()
            .unwrap_or(self.text.len())
    }

    fn node_at(&self, kind: NodeKind, start: usize, end: usize) -> Node {
        let location = Location::between(start, end);
        let range = self
            .index
            .range(location)
            .unwrap_or_else(|| TextRange::of(1, 0, 1, 0));
        Node::new(kind, location, range)
    }

    fn attach_comments(&self, documents: &mut [Node]) {
        for comment in self.comments() {
            let position = comment.location.position();
            let owner = documents
                .iter_mut()
                .rev()
                .find(|d| d.location().position() <= position);
            if let Some(document) = owner {
                document.push_comment(comment);
            } else if let Some(first) = documents.first_mut() {
                first.push_comment(comment);
            }
        }
    }

    fn comments(&self) -> Vec<Comment> {
        let mut comments = Vec::new();
        let mut line_start = 0;
        for line in self.text.split_inclusive('\n') {
            if let Some(col) = comment_start(line) {
                let content = line[col..].trim_end_matches(['\n', '\r']);
                let location = Location::new(line_start + col, content.len());
                if let Some(range) = self.index.range(location) {
                    comments.push(Comment {
                        text: content.to_string(),
                        location,
                        range,
                    });
                }
            }
            line_start += line.len();
        }
        comments
    }
}

/// Byte length of a double-quoted scalar including both quotes.
fn closing_double_quote(rest: &str) -> usize {
    let mut escaped = false;
    for (i, c) in rest.char_indices().skip(1) {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => return i + 1,
            _ => {}
        }
    }
    rest.len()
}

/// Byte length of a single-quoted scalar including both quotes (`''` escapes a quote).
fn closing_single_quote(rest: &str) -> usize {
    let bytes = rest.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    rest.len()
}

/// Byte column of a `#` comment on a line, ignoring `#` inside quotes or words.
fn comment_start(line: &str) -> Option<usize> {
    let mut in_single = false;
    let mut in_double = false;
    let mut prev: Option<char> = None;
    for (i, c) in line.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '#' if !in_single && !in_double && prev.is_none_or(char::is_whitespace) => {
                return Some(i);
            }
            _ => {}
        }
        prev = Some(c);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mapping_positions() {
        let text = "kind: Pod\nmetadata:\n  name: web\n";
        let tree = parse(text).unwrap();
        let root = tree.document_roots().next().unwrap();
        assert!(root.is(NodeKind::Mapping));

        let name = root.path(&["metadata", "name"]).unwrap();
        assert_eq!(name.as_str(), Some("web"));
        assert_eq!(name.range(), TextRange::of(3, 8, 3, 11));

        let kind = root.entry("kind").unwrap();
        assert_eq!(kind.range(), TextRange::of(1, 0, 1, 9));
    }

    #[test]
    fn test_quoted_scalar_ranges_include_quotes() {
        let text = "a: \"x\\\"y\"\nb: 'it''s'\n";
        let tree = parse(text).unwrap();
        let root = tree.document_roots().next().unwrap();

        let a = root.get("a").unwrap();
        assert_eq!(a.as_str(), Some("x\"y"));
        assert_eq!(a.attribute("style"), Some("double"));
        assert_eq!(a.range(), TextRange::of(1, 3, 1, 9));

        let b = root.get("b").unwrap();
        assert_eq!(b.as_str(), Some("it's"));
        assert_eq!(b.range(), TextRange::of(2, 3, 2, 10));
    }

    #[test]
    fn test_multiple_documents() {
        let text = "kind: A\n---\nkind: B\n";
        let tree = parse(text).unwrap();
        let kinds: Vec<_> = tree
            .document_roots()
            .filter_map(|r| r.get("kind").and_then(Node::as_str))
            .collect();
        assert_eq!(kinds, vec!["A", "B"]);
    }

    #[test]
    fn test_sequences_and_flow_collections() {
        let text = "items:\n  - one\n  - two\nflow: [a, b]\n";
        let tree = parse(text).unwrap();
        let root = tree.document_roots().next().unwrap();

        let items = root.get("items").unwrap();
        assert!(items.is(NodeKind::Sequence));
        assert_eq!(items.items().len(), 2);
        assert_eq!(items.items()[1].range(), TextRange::of(3, 4, 3, 7));

        let flow = root.get("flow").unwrap();
        assert_eq!(flow.range(), TextRange::of(4, 6, 4, 12));
    }

    #[test]
    fn test_implicit_null_has_no_value() {
        let tree = parse("key:\nother: 1\n").unwrap();
        let root = tree.document_roots().next().unwrap();
        assert!(root.get("key").is_some_and(|v| v.as_str().is_none()));
        assert_eq!(root.get("other").and_then(Node::as_str), Some("1"));
    }

    #[test]
    fn test_comments_attach_to_documents() {
        let text = "# head\nkey: value # trailing\nurl: \"a#b\"\n";
        let tree = parse(text).unwrap();
        let document = tree.documents().next().unwrap();
        let comments: Vec<_> = document.comments().iter().map(Comment::content).collect();
        assert_eq!(comments, vec!["head", "trailing"]);
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let err = parse("key: [unclosed\n").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
    }

    #[test]
    fn test_empty_text_is_empty_tree() {
        let tree = parse("").unwrap();
        assert!(tree.is_empty());
    }

    #[test]
    fn test_block_scalar_range() {
        let text = "script: |\n  echo hi\n  exit 0\nnext: 1\n";
        let tree = parse(text).unwrap();
        let root = tree.document_roots().next().unwrap();
        let script = root.get("script").unwrap();
        assert_eq!(script.attribute("style"), Some("literal"));
        assert_eq!(script.as_str(), Some("echo hi\nexit 0\n"));
        assert_eq!(script.range().start, TextPointer::new(1, 8));
        assert_eq!(script.range().end, TextPointer::new(3, 8));
    }

    #[test]
    fn test_folded_scalar_with_header_comment() {
        let text = "folded: >- # note | here\n  folded\n  text\nnext: 1\n";
        let tree = parse(text).unwrap();
        let root = tree.document_roots().next().unwrap();
        let folded = root.get("folded").unwrap();
        assert_eq!(folded.attribute("style"), Some("folded"));
        assert_eq!(folded.as_str(), Some("folded text"));
        assert_eq!(folded.range(), TextRange::of(1, 8, 3, 6));
    }
}

//! Shell word lexing for command-line arguments.
//!
//! Turns a command line such as a Dockerfile `RUN` body into a tree:
//!
//! ```text
//! File
//! └── Command
//!     ├── Argument          htpasswd
//!     │   └── Literal
//!     ├── Argument          "$USER"-x
//!     │   ├── Expansion     (variable USER)
//!     │   └── Literal       -x
//!     └── Argument          &&          (operators are kept as words)
//! ```
//!
//! Quotes are removed from literal fragments. Expansions carry attributes:
//! - `expansion`: `variable`, `command`, `arithmetic` or `unterminated`
//! - `name`: variable name, for `variable`
//! - `modifier` / `operand`: for `${NAME<op><word>}` forms

use crate::analyzer::location::{LineIndex, Location, TextRange};
use crate::analyzer::tree::{Node, NodeKind, Tree};

/// Command separators recognized as standalone words.
pub const OPERATORS: [&str; 4] = ["&&", "||", ";", "|"];

/// Lex a command line into `File > Command > Argument > fragment` nodes.
pub fn parse_command_line(text: &str) -> Tree {
    let index = LineIndex::new(text);
    let mut lexer = Lexer {
        text,
        index: &index,
        pos: 0,
    };
    let arguments = lexer.words();
    let root_range = index.range(Location::new(0, text.len())).unwrap_or_else(|| TextRange::of(1, 0, 1, 0));
    let root = Node::new(NodeKind::File, Location::new(0, text.len()), root_range);
    if arguments.is_empty() {
        return Tree::new(root);
    }

    let start = arguments[0].location().position();
    let end = arguments[arguments.len() - 1].location().end();
    let command = lexer.node(NodeKind::Command, start, end).with_children(arguments);
    Tree::new(root.with_child(command))
}

struct Lexer<'a> {
    text: &'a str,
    index: &'a LineIndex<'a>,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn node(&self, kind: NodeKind, start: usize, end: usize) -> Node {
        let location = Location::between(start, end);
        let range = self
            .index
            .range(location)
            .unwrap_or_else(|| TextRange::of(1, 0, 1, 0));
        Node::new(kind, location, range)
    }

    fn words(&mut self) -> Vec<Node> {
        let mut words = Vec::new();
        loop {
            self.skip_blanks();
            if self.pos >= self.text.len() {
                return words;
            }
            if let Some(op) = OPERATORS.iter().find(|op| self.rest().starts_with(**op)) {
                let start = self.pos;
                self.pos += op.len();
                let literal = self.node(NodeKind::Literal, start, self.pos).with_value(*op);
                words.push(
                    self.node(NodeKind::Argument, start, self.pos)
                        .with_value(*op)
                        .with_child(literal),
                );
                continue;
            }
            words.push(self.word());
        }
    }

    /// Skip whitespace and line continuations between words.
    fn skip_blanks(&mut self) {
        loop {
            let rest = self.rest();
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();
            if let Some(after) = trimmed.strip_prefix("\\\r\n").or_else(|| trimmed.strip_prefix("\\\n")) {
                self.pos += trimmed.len() - after.len();
            } else {
                return;
            }
        }
    }

    fn word(&mut self) -> Node {
        let start = self.pos;
        let mut fragments = Vec::new();
        let mut literal = String::new();
        let mut literal_start = self.pos;

        while let Some(c) = self.peek() {
            if c.is_whitespace() || OPERATORS.iter().any(|op| self.rest().starts_with(op)) {
                break;
            }
            match c {
                '\\' => {
                    self.pos += 1;
                    match self.peek() {
                        // line continuation joins the word
                        Some('\n') => self.pos += 1,
                        Some(escaped) => {
                            literal.push(escaped);
                            self.pos += escaped.len_utf8();
                        }
                        None => literal.push('\\'),
                    }
                }
                '\'' => {
                    let quote_start = self.pos;
                    match self.rest()[1..].find('\'') {
                        Some(close) => {
                            literal.push_str(&self.rest()[1..1 + close]);
                            self.pos += close + 2;
                        }
                        None => {
                            self.flush(&mut fragments, &mut literal, literal_start, quote_start);
                            fragments.push(self.unterminated(quote_start));
                            literal_start = self.pos;
                        }
                    }
                }
                '"' => {
                    self.pos += 1;
                    self.double_quoted(&mut fragments, &mut literal, &mut literal_start);
                }
                '$' | '`' => {
                    let here = self.pos;
                    match self.expansion() {
                        Some(expansion) => {
                            self.flush(&mut fragments, &mut literal, literal_start, here);
                            fragments.push(expansion);
                            literal_start = self.pos;
                        }
                        None => {
                            literal.push('$');
                            self.pos += 1;
                        }
                    }
                }
                _ => {
                    literal.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }
        self.flush(&mut fragments, &mut literal, literal_start, self.pos);
        if fragments.is_empty() {
            // `''` and `""` are empty literals, not missing ones
            fragments.push(self.node(NodeKind::Literal, start, self.pos).with_value(""));
        }

        let raw = &self.text[start..self.pos];
        self.node(NodeKind::Argument, start, self.pos)
            .with_value(raw)
            .with_children(fragments)
    }

    /// Body of a double-quoted string; the opening quote is already consumed.
    fn double_quoted(&mut self, fragments: &mut Vec<Node>, literal: &mut String, literal_start: &mut usize) {
        let quote_start = self.pos - 1;
        while let Some(c) = self.peek() {
            match c {
                '"' => {
                    self.pos += 1;
                    return;
                }
                '\\' => {
                    self.pos += 1;
                    match self.peek() {
                        Some(e @ ('"' | '\\' | '$' | '`')) => {
                            literal.push(e);
                            self.pos += 1;
                        }
                        Some('\n') => self.pos += 1,
                        _ => literal.push('\\'),
                    }
                }
                '$' | '`' => {
                    let here = self.pos;
                    match self.expansion() {
                        Some(expansion) => {
                            self.flush(fragments, literal, *literal_start, here);
                            fragments.push(expansion);
                            *literal_start = self.pos;
                        }
                        None => {
                            literal.push('$');
                            self.pos += 1;
                        }
                    }
                }
                _ => {
                    literal.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }
        // closing quote never came
        self.flush(fragments, literal, *literal_start, self.pos);
        fragments.push(self.unterminated(quote_start));
        *literal_start = self.pos;
    }

    /// Expansion starting at `self.pos` (`$` or a backtick). `None` for a lone `$`.
    fn expansion(&mut self) -> Option<Node> {
        let start = self.pos;
        let rest = self.rest();

        if let Some(body) = rest.strip_prefix('`') {
            return Some(match body.find('`') {
                Some(close) => {
                    self.pos += close + 2;
                    self.node(NodeKind::Expansion, start, self.pos)
                        .with_attribute("expansion", "command")
                }
                None => self.unterminated(start),
            });
        }

        let body = rest.strip_prefix('$')?;
        if body.starts_with("((") {
            return Some(match find_closing(body, '(', ')') {
                Some(close) => {
                    self.pos += 1 + close + 1;
                    self.node(NodeKind::Expansion, start, self.pos)
                        .with_attribute("expansion", "arithmetic")
                }
                None => self.unterminated(start),
            });
        }
        if body.starts_with('(') {
            return Some(match find_closing(body, '(', ')') {
                Some(close) => {
                    self.pos += 1 + close + 1;
                    self.node(NodeKind::Expansion, start, self.pos)
                        .with_attribute("expansion", "command")
                }
                None => self.unterminated(start),
            });
        }
        if body.starts_with('{') {
            return Some(match find_closing(body, '{', '}') {
                Some(close) => {
                    let inner = &body[1..close];
                    self.pos += 1 + close + 1;
                    braced_variable(self.node(NodeKind::Expansion, start, self.pos), inner)
                }
                None => self.unterminated(start),
            });
        }

        let first = body.chars().next()?;
        let name_len = if first.is_ascii_alphabetic() || first == '_' {
            body.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(body.len())
        } else if first.is_ascii_digit() || "@*#?$!-".contains(first) {
            1
        } else {
            return None;
        };
        let name = &body[..name_len];
        self.pos += 1 + name_len;
        Some(
            self.node(NodeKind::Expansion, start, self.pos)
                .with_attribute("expansion", "variable")
                .with_attribute("name", name),
        )
    }

    fn unterminated(&mut self, start: usize) -> Node {
        self.pos = self.text.len();
        self.node(NodeKind::Expansion, start, self.pos)
            .with_attribute("expansion", "unterminated")
    }

    fn flush(&self, fragments: &mut Vec<Node>, literal: &mut String, start: usize, end: usize) {
        if literal.is_empty() {
            return;
        }
        let value = std::mem::take(literal);
        fragments.push(self.node(NodeKind::Literal, start, end.max(start)).with_value(value));
    }
}

/// Attributes for `${inner}`.
fn braced_variable(node: Node, inner: &str) -> Node {
    let name_len = inner
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(inner.len());
    let (name, tail) = inner.split_at(name_len);
    let node = node
        .with_attribute("expansion", "variable")
        .with_attribute("name", name);
    if tail.is_empty() {
        return node;
    }
    let modifier_len = if tail.starts_with(':') { 2.min(tail.len()) } else { 1 };
    let (modifier, operand) = tail.split_at(modifier_len);
    node.with_attribute("modifier", modifier)
        .with_attribute("operand", operand)
}

/// Byte index in `s` of the bracket closing the one at index 0 (or 1 for `((`).
fn find_closing(s: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        if c == open {
            depth += 1;
        } else if c == close {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

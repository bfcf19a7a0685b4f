//! Dockerfile front-end: build stages with their variable assignments and
//! shell-form `RUN` instructions.
//!
//! ```text
//! File
//! └── Block               stage (from `FROM` to the next `FROM`)
//!     ├── Block           ARG / ENV, children are `Tuple [Scalar name, Argument value]`
//!     └── Block           RUN, children are `Command`s
//! ```
//!
//! Every argument is lexed on a copy of the file where all other bytes are
//! blanked out, so node ranges are positions in the Dockerfile itself.
//! A file without `FROM` is a single implicit stage. Exec-form bodies
//! (`RUN ["cmd", ...]`), other instructions and comments are not analyzed.

use std::collections::HashMap;
use std::path::Path;

use crate::analyzer::docker::word::parse_command_line;
use crate::analyzer::location::{LineIndex, Location, TextRange};
use crate::analyzer::tree::{Node, NodeKind, Tree};

/// Attribute naming the instruction of an instruction block.
pub const INSTRUCTION: &str = "instruction";
/// Attribute holding the zero-based index of a stage block.
pub const STAGE: &str = "stage";
/// Attribute set to `true` on the last stage of the file.
pub const FINAL_STAGE: &str = "final";
/// Attribute set to `true` on `RUN --mount=type=secret` instructions.
pub const SECRET_MOUNT: &str = "secret-mount";

/// Whether `path` names a Dockerfile (`Dockerfile`, `Dockerfile.dev`,
/// `app.dockerfile`).
pub fn is_dockerfile(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let lower = name.to_ascii_lowercase();
    lower == "dockerfile" || lower.starts_with("dockerfile.") || lower.ends_with(".dockerfile")
}

/// Byte range of each logical instruction, continuation lines included.
fn instructions(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let content = line.trim_end_matches(['\n', '\r']);
        let is_comment = content.trim_start().starts_with('#');
        if start.is_none() && !content.trim().is_empty() && !is_comment {
            start = Some(offset);
        }
        offset += line.len();
        if let Some(begin) = start {
            if !content.trim_end().ends_with('\\') {
                spans.push((begin, offset));
                start = None;
            }
        }
    }
    if let Some(begin) = start {
        spans.push((begin, text.len()));
    }
    spans
}

/// Upper-cased keyword of the instruction at `span` and the offset of its body.
fn keyword(text: &str, span: (usize, usize)) -> Option<(String, usize)> {
    let instruction = &text[span.0..span.1];
    let leading = instruction.len() - instruction.trim_start().len();
    let trimmed = &instruction[leading..];
    let len = trimmed
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(trimmed.len());
    if len == 0 {
        return None;
    }
    let after = &trimmed[len..];
    if !after.is_empty() && !after.starts_with(char::is_whitespace) {
        return None;
    }
    let body = after.trim_start();
    let offset = span.0 + leading + len + (after.len() - body.len());
    Some((trimmed[..len].to_ascii_uppercase(), offset))
}

/// Skip blanks and line continuations.
fn skip_blank(text: &str, mut pos: usize, end: usize) -> usize {
    loop {
        let rest = &text[pos..end];
        let trimmed = rest.trim_start_matches([' ', '\t']);
        let trimmed = trimmed
            .strip_prefix("\\\r\n")
            .or_else(|| trimmed.strip_prefix("\\\n"))
            .unwrap_or(trimmed);
        let trimmed = trimmed.trim_start_matches([' ', '\t', '\r', '\n']);
        if trimmed.len() == rest.len() {
            return pos;
        }
        pos += rest.len() - trimmed.len();
    }
}

/// `--flag` options in front of a `RUN` body and the offset of the body.
fn run_options(text: &str, mut pos: usize, end: usize) -> (Vec<&str>, usize) {
    let mut options = Vec::new();
    while text[pos..end].starts_with("--") {
        let rest = &text[pos..end];
        let len = rest.find(char::is_whitespace).unwrap_or(rest.len());
        options.push(&rest[..len]);
        pos = skip_blank(text, pos + len, end);
    }
    (options, pos)
}

fn is_secret_mount(option: &str) -> bool {
    option
        .strip_prefix("--mount=")
        .is_some_and(|spec| spec.split(',').any(|part| part == "type=secret"))
}

fn blank_outside(text: &str, start: usize, end: usize) -> String {
    let bytes: Vec<u8> = text
        .bytes()
        .enumerate()
        .map(|(i, b)| {
            if (start..end).contains(&i) || b == b'\n' || b == b'\r' {
                b
            } else {
                b' '
            }
        })
        .collect();
    // non-ASCII bytes are replaced whole, kept ones form complete characters
    String::from_utf8(bytes).unwrap_or_default()
}

/// Commands of the text between `start` and `end`, in file positions.
fn commands(text: &str, start: usize, end: usize) -> Vec<Node> {
    parse_command_line(&blank_outside(text, start, end))
        .root()
        .children()
        .to_vec()
}

/// Shell words of the text between `start` and `end`, in file positions.
fn words(text: &str, start: usize, end: usize) -> Vec<Node> {
    commands(text, start, end)
        .first()
        .map(|command| command.children().to_vec())
        .unwrap_or_default()
}

fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

struct Builder<'a> {
    text: &'a str,
    index: LineIndex<'a>,
}

impl Builder<'_> {
    fn node(&self, kind: NodeKind, start: usize, end: usize) -> Node {
        let location = Location::between(start, end);
        let range = self
            .index
            .range(location)
            .unwrap_or_else(|| TextRange::of(1, 0, 1, 0));
        Node::new(kind, location, range)
    }

    /// `name=value` pairs of an `ARG` or `ENV` body; `ARG NAME` has no value.
    fn assignments(&self, body: usize, end: usize, legacy_env: bool) -> Vec<(String, Node, Option<Node>)> {
        let words = words(self.text, body, end);
        let raw = |word: &Node| &self.text[word.location().position()..word.location().end()];

        // `ENV NAME value`
        if legacy_env && words.len() >= 2 && !raw(&words[0]).contains('=') {
            let name = raw(&words[0]);
            if !is_variable_name(name) {
                return Vec::new();
            }
            let key = self.name_node(&words[0], name);
            // a value spanning several words is kept unresolved
            let value = (words.len() == 2).then(|| words[1].clone());
            return vec![(name.to_string(), key, value)];
        }

        let mut pairs = Vec::new();
        for word in &words {
            let raw = raw(word);
            let (name, value) = match raw.find('=') {
                Some(eq) => {
                    let value_start = word.location().position() + eq + 1;
                    let value_end = word.location().end();
                    let value = if value_start == value_end {
                        self.node(NodeKind::Argument, value_start, value_start)
                    } else {
                        match self::words(self.text, value_start, value_end).into_iter().next() {
                            Some(value) => value,
                            None => continue,
                        }
                    };
                    (&raw[..eq], Some(value))
                }
                None => (raw, None),
            };
            if is_variable_name(name) {
                pairs.push((name.to_string(), self.name_node(word, name), value));
            }
        }
        pairs
    }

    fn name_node(&self, word: &Node, name: &str) -> Node {
        let start = word.location().position();
        self.node(NodeKind::Scalar, start, start + name.len())
            .with_value(name)
    }
}

#[derive(Default)]
struct StageParts {
    start: usize,
    end: usize,
    children: Vec<Node>,
}

/// Parse a Dockerfile into stages of `ARG`/`ENV`/`RUN` instruction blocks.
pub fn parse_dockerfile(text: &str) -> Tree {
    let builder = Builder {
        text,
        index: LineIndex::new(text),
    };
    let mut root = builder.node(NodeKind::File, 0, text.len());

    // ARG defaults declared before the first FROM
    let mut globals: HashMap<String, Node> = HashMap::new();
    let mut preamble = StageParts::default();
    let mut stages: Vec<StageParts> = Vec::new();

    for span in instructions(text) {
        let Some((keyword, body)) = keyword(text, span) else {
            continue;
        };
        let start = span.0 + (text[span.0..span.1].len() - text[span.0..span.1].trim_start().len());
        let end = span.0 + text[span.0..span.1].trim_end().len();

        let instruction = match keyword.as_str() {
            "FROM" => {
                stages.push(StageParts {
                    start,
                    end,
                    children: Vec::new(),
                });
                continue;
            }
            "ARG" | "ENV" => {
                let in_stage = !stages.is_empty();
                let mut block = builder
                    .node(NodeKind::Block, start, end)
                    .with_attribute(INSTRUCTION, keyword.as_str());
                for (name, key, value) in builder.assignments(body, span.1, keyword == "ENV") {
                    let value = match value {
                        Some(value) => {
                            if !in_stage && keyword == "ARG" {
                                globals.insert(name, value.clone());
                            }
                            Some(value)
                        }
                        // `ARG NAME` in a stage takes the global default
                        None if in_stage => globals.get(&name).cloned(),
                        None => None,
                    };
                    let pair_end = value.as_ref().map_or(key.location().end(), |v| {
                        v.location().end().max(key.location().end())
                    });
                    let mut pair = builder
                        .node(NodeKind::Tuple, key.location().position(), pair_end)
                        .with_child(key);
                    if let Some(value) = value {
                        pair.push_child(value);
                    }
                    block.push_child(pair);
                }
                block
            }
            "RUN" => {
                let (options, body) = run_options(text, body, span.1);
                if text[body..span.1].starts_with('[') {
                    continue;
                }
                let mut block = builder
                    .node(NodeKind::Block, start, end)
                    .with_attribute(INSTRUCTION, "RUN")
                    .with_children(commands(text, body, span.1));
                if options.iter().any(|o| is_secret_mount(o)) {
                    block = block.with_attribute(SECRET_MOUNT, "true");
                }
                block
            }
            _ => continue,
        };

        let parts = stages.last_mut().unwrap_or(&mut preamble);
        parts.end = end;
        parts.children.push(instruction);
    }

    if stages.is_empty() && !preamble.children.is_empty() {
        preamble.start = preamble.children[0].location().position();
        stages.push(preamble);
    }

    let count = stages.len();
    for (i, parts) in stages.into_iter().enumerate() {
        let mut stage = builder
            .node(NodeKind::Block, parts.start, parts.end.max(parts.start))
            .with_attribute(STAGE, i.to_string())
            .with_children(parts.children);
        if i + 1 == count {
            stage = stage.with_attribute(FINAL_STAGE, "true");
        }
        root.push_child(stage);
    }
    Tree::new(root)
}

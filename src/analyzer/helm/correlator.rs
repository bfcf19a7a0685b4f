//! Maps offsets in rendered template output back to the template source.
//!
//! The template AST lists the literal text of the template in source order,
//! interleaved with actions and control structures. Walking that list while
//! consuming the rendered output splits the output into contiguous segments:
//!
//! - **verbatim**: bytes copied from a `Text` node, mapped one-to-one
//! - **generated**: bytes produced by an action, a branch body that did
//!   not match a text node, a range iteration... mapped to the start of the
//!   construct that produced them
//!
//! Text that does not occur where it is expected (a branch that was not
//! taken) is skipped. A gap between two matched texts is only accepted when a
//! construct sits between them in the source.

use std::ops::Range;

use log::trace;

use crate::analyzer::helm::ast::{AstError, GoTemplateAst, NodeRef, TemplateNode};
use crate::analyzer::location::{LineIndex, Location, TextRange};

/// Where a run of rendered bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOrigin {
    /// Copied from the source, starting at `original`.
    Verbatim { original: usize },
    /// Produced by the construct spanning `original..original + length`.
    Generated { original: usize, length: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub rendered: Range<usize>,
    pub origin: SegmentOrigin,
}

#[derive(Debug, Clone)]
enum Item<'a> {
    Text { original: usize, text: &'a str },
    Generated { original: usize, length: usize },
}

/// Offset map from one rendering of a template back to its source.
#[derive(Debug, Clone)]
pub struct PositionCorrelator {
    segments: Vec<Segment>,
    original: String,
    rendered: String,
}

impl PositionCorrelator {
    /// Correlate `rendered` with the template `original` through its AST.
    pub fn build(ast: &GoTemplateAst, original: &str, rendered: &str) -> Result<Self, AstError> {
        let mut items = Vec::new();
        flatten(ast.root(), original, &mut items)?;

        let mut segments: Vec<Segment> = Vec::new();
        let mut cursor = 0;
        let mut pending: Option<(usize, usize)> = None;
        let mut last_construct: Option<(usize, usize)> = None;

        for item in items {
            match item {
                Item::Generated { original, length } => {
                    pending.get_or_insert((original, length));
                    last_construct = Some((original, length));
                }
                Item::Text { text, .. } if text.is_empty() => {}
                Item::Text { original, text } => {
                    let found = rendered[cursor..].find(text);
                    let gap = match (found, pending) {
                        (Some(0), _) => None,
                        (Some(k), Some(construct)) => Some((k, construct)),
                        _ => {
                            trace!("Template text at {} was not rendered here", original);
                            continue;
                        }
                    };
                    if let Some((k, (construct, length))) = gap {
                        segments.push(Segment {
                            rendered: cursor..cursor + k,
                            origin: SegmentOrigin::Generated {
                                original: construct,
                                length,
                            },
                        });
                        cursor += k;
                    }
                    segments.push(Segment {
                        rendered: cursor..cursor + text.len(),
                        origin: SegmentOrigin::Verbatim { original },
                    });
                    cursor += text.len();
                    pending = None;
                }
            }
        }

        if cursor < rendered.len() {
            let (original, length) = pending.or(last_construct).unwrap_or((0, 0));
            segments.push(Segment {
                rendered: cursor..rendered.len(),
                origin: SegmentOrigin::Generated { original, length },
            });
        }

        Ok(Self {
            segments,
            original: original.to_string(),
            rendered: rendered.to_string(),
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    fn segment_at(&self, offset: usize) -> Option<&Segment> {
        // a boundary belongs to the segment that starts there
        let idx = self.segments.partition_point(|s| s.rendered.end <= offset);
        self.segments.get(idx).or_else(|| self.segments.last())
    }

    /// Source offset of a rendered offset.
    pub fn original_offset(&self, offset: usize) -> usize {
        let Some(segment) = self.segment_at(offset) else {
            return 0;
        };
        match segment.origin {
            SegmentOrigin::Verbatim { original } => {
                original + offset.min(segment.rendered.end) - segment.rendered.start
            }
            SegmentOrigin::Generated { original, .. } => original,
        }
    }

    /// Source offset of an exclusive rendered end offset.
    ///
    /// The end belongs to the segment holding the byte before it, so a range
    /// ending at a segment boundary does not reach into whatever follows in
    /// the source. A range ending in generated output ends with the construct.
    pub fn original_end_offset(&self, end: usize) -> usize {
        let Some(last) = end.checked_sub(1) else {
            return self.original_offset(0);
        };
        let Some(segment) = self.segment_at(last) else {
            return 0;
        };
        match segment.origin {
            SegmentOrigin::Verbatim { original } => {
                original + end.min(segment.rendered.end) - segment.rendered.start
            }
            SegmentOrigin::Generated { original, length } => original + length,
        }
    }

    /// Source location of a rendered location.
    ///
    /// Start and end are mapped separately. A location that collapses into a
    /// single generated construct is widened to the whole construct.
    pub fn original_location(&self, location: Location) -> Location {
        let start = self.original_offset(location.position());
        let end = if location.end() > location.position() {
            self.original_end_offset(location.end()).max(start)
        } else {
            start
        };
        if start == end {
            if let Some(Segment {
                origin: SegmentOrigin::Generated { original, length },
                ..
            }) = self.segment_at(location.position())
            {
                return Location::new(*original, *length);
            }
        }
        Location::between(start, end)
    }

    /// Source range of a range computed against the rendered text.
    pub fn original_range(&self, range: &TextRange) -> Option<TextRange> {
        let location = LineIndex::new(&self.rendered).location(range)?;
        LineIndex::new(&self.original).range(self.original_location(location))
    }
}

fn flatten<'a>(node: NodeRef<'a>, source: &'a str, items: &mut Vec<Item<'a>>) -> Result<(), AstError> {
    match node.view()? {
        TemplateNode::List(list) => {
            for child in list.children() {
                flatten(child, source, items)?;
            }
        }
        TemplateNode::Text { text } => {
            let text = if text.is_empty() {
                source.get(node.pos()..node.end()).unwrap_or_default()
            } else {
                text
            };
            items.push(Item::Text {
                original: node.pos(),
                text,
            });
        }
        TemplateNode::Branch {
            list, else_list, ..
        } => {
            let construct = Item::Generated {
                original: node.pos(),
                length: node.length(),
            };
            items.push(construct.clone());
            flatten(list, source, items)?;
            items.push(construct.clone());
            if let Some(else_list) = else_list {
                flatten(else_list, source, items)?;
                items.push(construct);
            }
        }
        TemplateNode::Action { .. } | TemplateNode::Template { .. } | TemplateNode::Other(_) => {
            items.push(Item::Generated {
                original: node.pos(),
                length: node.length(),
            });
        }
    }
    Ok(())
}

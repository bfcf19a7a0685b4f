//! Line-number annotations for templates without a usable syntax tree.
//!
//! Before rendering, every template line gets a trailing ` #N` comment (or
//! ` #first:last` on the closing line of an action that spans lines). Those
//! comments survive rendering, so after evaluation each output line names
//! the template line it came from. [`clean_rendered`] strips them again and
//! records the mapping in a [`LocationShifter`].

use std::sync::LazyLock;

use regex::Regex;

use crate::analyzer::helm::shifter::LocationShifter;

static LINE_NUMBER_COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"#(?P<start>\d+)(?::(?P<end>\d+))?(?: #\d+:?\d*)*$").unwrap()
});

/// Split `text` into `(content, terminator)` pairs. The last pair has an
/// empty terminator; an empty text is one empty line.
fn lines_with_terminators(text: &str) -> Vec<(&str, &str)> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let terminator_end = match c {
            '\r' => match chars.peek() {
                Some((_, '\n')) => {
                    chars.next();
                    i + 2
                }
                _ => i + 1,
            },
            '\n' | '\u{2028}' | '\u{2029}' => i + c.len_utf8(),
            _ => continue,
        };
        lines.push((&text[start..i], &text[i..terminator_end]));
        start = terminator_end;
    }
    lines.push((&text[start..], ""));
    lines
}

/// `{{` minus `}}` occurrences on a line.
pub fn unmatched_opening_braces(line: &str) -> isize {
    line.matches("{{").count() as isize - line.matches("}}").count() as isize
}

fn is_document_marker(line: &str) -> bool {
    matches!(line.trim_end(), "---" | "...")
}

/// Append line-number comments to every line of a template.
///
/// Lines inside a multi-line action are left alone; the line that closes
/// the action carries the whole range. Document markers are not annotated.
pub fn insert_line_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len() + source.len() / 4);
    let mut open_braces: isize = 0;
    let mut range_start: Option<usize> = None;

    for (idx, (content, terminator)) in lines_with_terminators(source).into_iter().enumerate() {
        let line = idx + 1;
        out.push_str(content);
        open_braces = (open_braces + unmatched_opening_braces(content)).max(0);

        if open_braces > 0 {
            range_start.get_or_insert(line);
        } else if let Some(first) = range_start.take() {
            out.push_str(&format!(" #{first}:{line}"));
        } else if !is_document_marker(content) {
            out.push_str(&format!(" #{line}"));
        }
        out.push_str(terminator);
    }
    out
}

/// Strip line-number comments from rendered output.
///
/// Lines that are blank once their comment is removed are dropped, and so
/// are trailing line terminators. For every kept line carrying a comment,
/// `shifter` learns which template lines it maps to.
pub fn clean_rendered(rendered: &str, shifter: &mut LocationShifter) -> String {
    let mut out = String::with_capacity(rendered.len());
    let mut line = 0;

    for (content, terminator) in lines_with_terminators(rendered) {
        let (kept, target) = strip_comment(content);
        if kept.trim().is_empty() {
            continue;
        }
        line += 1;
        if let Some((first, last)) = target {
            shifter.add_shifted_range(line, first, last);
        }
        out.push_str(kept);
        out.push_str(terminator);
    }

    let trimmed = out.trim_end_matches(['\n', '\r', '\u{2028}', '\u{2029}']).len();
    out.truncate(trimmed);
    out
}

fn strip_comment(content: &str) -> (&str, Option<(usize, usize)>) {
    let Some(captures) = LINE_NUMBER_COMMENT.captures(content) else {
        return (content, None);
    };
    let (Some(whole), Some(start)) = (captures.get(0), captures.name("start")) else {
        return (content, None);
    };
    let Ok(first) = start.as_str().parse::<usize>() else {
        return (content, None);
    };
    let last = captures
        .name("end")
        .and_then(|m| m.as_str().parse::<usize>().ok())
        .unwrap_or(first);

    let before = &content[..whole.start()];
    let kept = before.strip_suffix(' ').unwrap_or(before);
    (kept, Some((first, last)))
}

//! K8S002: clear-text `http://` URLs in manifest values.
//!
//! Only literal loopback hosts are exempt: `localhost`, `127.x.x.x` and
//! `[::1]`. Private ranges, `0.0.0.0` and the link-local metadata address are
//! reported like any other host.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use crate::analyzer::checks::{Check, InitContext};
use crate::analyzer::location::{TextPointer, TextRange};
use crate::analyzer::tree::{Node, NodeKind};

const MESSAGE: &str = "Make sure that using clear-text protocols is safe here.";

static HTTP_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bhttp://(?P<host>\[[^\]\s]*\]|[^\s/:?#"'<>\[\]]+)(?::\d+)?[^\s"'<>]*"#).unwrap()
});

static LOOPBACK_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:localhost|127\.\d{1,3}\.\d{1,3}\.\d{1,3}|\[::1\])$").unwrap()
});

/// Whether a URL host is exempt from the clear-text rule.
pub fn is_loopback_host(host: &str) -> bool {
    LOOPBACK_HOST.is_match(host)
}

/// Byte ranges of the clear-text URLs in `text`, exempt hosts excluded.
pub fn find_unencrypted_urls(text: &str) -> Vec<Range<usize>> {
    HTTP_URL
        .captures_iter(text)
        .filter(|c| c.name("host").is_some_and(|h| !is_loopback_host(h.as_str())))
        .filter_map(|c| c.get(0).map(|m| m.range()))
        .collect()
}

/// Whether `text` holds at least one reportable clear-text URL.
pub fn has_unencrypted_url(text: &str) -> bool {
    !find_unencrypted_urls(text).is_empty()
}

pub struct UnencryptedUrlCheck;

impl Check for UnencryptedUrlCheck {
    fn code(&self) -> &'static str {
        "K8S002"
    }

    fn name(&self) -> &'static str {
        "unencrypted-url"
    }

    fn initialize(&self, init: &mut InitContext) {
        init.register(NodeKind::Scalar, |ctx, scalar| {
            let Some(value) = scalar.as_str() else {
                return;
            };
            for url in find_unencrypted_urls(value) {
                let range = url_range(scalar, value, url);
                ctx.report_issue(&range, MESSAGE);
            }
        });
    }
}

/// Range of `url` (byte offsets into the scalar value) in the source.
///
/// Exact for single-line plain and quoted scalars. Anything else, where the
/// value is not a verbatim slice of the source, gets the whole scalar.
fn url_range(scalar: &Node, value: &str, url: Range<usize>) -> TextRange {
    let range = scalar.range();
    let quote = match scalar.attribute("style") {
        Some("plain") | None => 0,
        Some("single") | Some("double") => 1,
        _ => return range,
    };
    if range.start.line != range.end.line {
        return range;
    }
    let source_width = range.end.line_offset.saturating_sub(range.start.line_offset);
    if source_width != value.chars().count() + 2 * quote {
        return range;
    }

    let column = |offset: usize| range.start.line_offset + quote + value[..offset].chars().count();
    TextRange::new(
        TextPointer::new(range.start.line, column(url.start)),
        TextPointer::new(range.start.line, column(url.end)),
    )
}

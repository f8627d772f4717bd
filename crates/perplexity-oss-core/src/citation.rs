//! Inline citation markers.
//!
//! Answer text cites sources with 1-based markers like `fact[1]`. A marker
//! immediately followed by `(` is a markdown link label, not a citation.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use crate::types::SearchResult;

static CITATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("citation pattern is valid"));

/// A `[n]` marker found in message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation<'a> {
    /// The number as written (1-based).
    pub number: usize,
    /// Byte range of the marker in the content.
    pub range: Range<usize>,
    /// `sources[number - 1]`, if it exists.
    pub source: Option<&'a SearchResult>,
}

impl Citation<'_> {
    /// Target URL, or an empty string when the marker points past the sources.
    pub fn href(&self) -> &str {
        self.source.map(|s| s.url.as_str()).unwrap_or("")
    }

    /// 0-based index into the sources list.
    pub fn source_index(&self) -> Option<usize> {
        self.number.checked_sub(1)
    }
}

/// Find every citation marker in `content`, resolved against `sources`.
pub fn find_citations<'a>(content: &str, sources: &'a [SearchResult]) -> Vec<Citation<'a>> {
    CITATION_RE
        .captures_iter(content)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            if content[whole.end()..].starts_with('(') {
                return None;
            }
            // Unparseable numbers (overflow, non-ASCII digits) cite nothing
            let number: usize = caps[1].parse().unwrap_or(usize::MAX);
            let source = number.checked_sub(1).and_then(|i| sources.get(i));
            Some(Citation {
                number,
                range: whole.range(),
                source,
            })
        })
        .collect()
}

/// Rewrite every citation marker with `render`, leaving the rest of the text intact.
pub fn replace_citations<F>(content: &str, sources: &[SearchResult], mut render: F) -> String
where
    F: FnMut(&Citation<'_>) -> String,
{
    let mut out = String::with_capacity(content.len());
    let mut last = 0;
    for citation in find_citations(content, sources) {
        out.push_str(&content[last..citation.range.start]);
        out.push_str(&render(&citation));
        last = citation.range.end;
    }
    out.push_str(&content[last..]);
    out
}

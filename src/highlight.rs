use std::collections::HashSet;
use std::ops::Range;

use regex::{Regex, RegexBuilder};

pub fn build_highlight_regex(tokens: &[String]) -> Option<Regex> {
    if tokens.is_empty() {
        return None;
    }
    let mut unique = Vec::new();
    let mut seen = HashSet::new();
    for token in tokens {
        if token.is_empty() {
            continue;
        }
        let lowered = token.to_lowercase();
        if seen.insert(lowered) {
            unique.push(token.clone());
        }
    }
    if unique.is_empty() {
        return None;
    }
    unique.sort_by(|a, b| b.len().cmp(&a.len()));
    let pattern = unique
        .into_iter()
        .map(|token| regex::escape(&token))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .ok()
}

/// Marks search hits inside entry previews.
#[derive(Debug, Clone)]
pub struct Highlighter {
    regex: Regex,
}

impl Highlighter {
    pub fn from_terms(terms: &[String]) -> Option<Self> {
        build_highlight_regex(terms).map(|regex| Self { regex })
    }

    /// For `--regex` searches. An empty pattern highlights nothing.
    pub fn from_regex(regex: Regex) -> Option<Self> {
        if regex.as_str().is_empty() {
            None
        } else {
            Some(Self { regex })
        }
    }

    pub fn spans(&self, text: &str) -> Vec<Range<usize>> {
        self.regex
            .find_iter(text)
            .filter(|m| !m.is_empty())
            .map(|m| m.range())
            .collect()
    }

    /// Wraps every hit in `open`/`close`.
    pub fn render(&self, text: &str, open: &str, close: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for span in self.spans(text) {
            out.push_str(&text[cursor..span.start]);
            out.push_str(open);
            out.push_str(&text[span.clone()]);
            out.push_str(close);
            cursor = span.end;
        }
        out.push_str(&text[cursor..]);
        out
    }
}

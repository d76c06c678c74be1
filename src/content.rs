//! Plain-text views of entry content. Entries are stored as editor HTML (or
//! markdown-like text with font-size markers); listings, search and character
//! counts work on the text a reader actually sees.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

static BLOCK_BREAK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<\s*(br\s*/?|/p|/h[1-6]|/li|/blockquote|/div)\s*>")
        .expect("valid block break pattern")
});
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag pattern"));
static SIZE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{/?(small|normal|large|xlarge)\}").expect("valid size marker pattern")
});
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

const ENTITIES: [(&str, &str); 6] = [
    ("&nbsp;", " "),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    // last so "&amp;lt;" decodes to "&lt;" rather than "<"
    ("&amp;", "&"),
];

pub fn plain_text(content: &str) -> String {
    let text = BLOCK_BREAK.replace_all(content, " ");
    let text = TAG.replace_all(&text, "");
    let text = SIZE_MARKER.replace_all(&text, "");
    let mut decoded = text.into_owned();
    for (entity, replacement) in ENTITIES {
        decoded = decoded.replace(entity, replacement);
    }
    WHITESPACE.replace_all(decoded.trim(), " ").into_owned()
}

pub fn preview(content: &str, max_chars: usize) -> String {
    let text = plain_text(content);
    let graphemes: Vec<&str> = text.graphemes(true).collect();
    if graphemes.len() <= max_chars {
        return text;
    }
    let mut out: String = graphemes[..max_chars].concat();
    out.truncate(out.trim_end().len());
    out.push('…');
    out
}

pub fn character_count(content: &str) -> usize {
    plain_text(content).graphemes(true).count()
}

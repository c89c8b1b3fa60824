// src/pipeline/text.rs
//! Text helpers shared by retrieval and the item contract check.

use once_cell::sync::OnceCell;
use regex::Regex;

/// Cap on normalized page text handed to the summarizer.
pub const MAX_TEXT_CHARS: usize = 6_000;

/// Normalize text: decode entities, strip tags, ASCII quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) Drop script/style bodies entirely
    static RE_BLOCKS: OnceCell<Regex> = OnceCell::new();
    let re_blocks = RE_BLOCKS.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|noscript)\b[^>]*>.*?</(script|style|noscript)>")
            .expect("static regex")
    });
    let mut out = re_blocks.replace_all(s, " ").to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("static regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) HTML entity decode (after tag stripping so `&lt;b&gt;` survives as text)
    out = html_escape::decode_html_entities(&out).to_string();

    // 4) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 5) Collapse whitespace
    out = out.split_whitespace().collect::<Vec<_>>().join(" ");

    // 6) Length cap
    if out.chars().count() > MAX_TEXT_CHARS {
        out = out.chars().take(MAX_TEXT_CHARS).collect();
    }

    out
}

/// Contents of the first `<title>` element, normalized.
pub fn extract_title(html: &str) -> Option<String> {
    static RE_TITLE: OnceCell<Regex> = OnceCell::new();
    let re = RE_TITLE
        .get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("static regex"));
    let raw = re.captures(html)?.get(1)?.as_str();
    let t = normalize_text(raw);
    (!t.is_empty()).then_some(t)
}

pub fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

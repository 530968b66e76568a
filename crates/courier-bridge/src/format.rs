//! Output formatting: worker markdown → channel HTML, plus chunking.
//!
//! All functions here are pure. Code spans are extracted behind opaque
//! placeholders before any escaping or inline rule runs, and restored
//! only at the very end, so their contents are escaped exactly once and
//! never re-processed by the style rules.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

pub const DEFAULT_MAX_CHUNK_LEN: usize = 4000;

static FENCED_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```\w*\n?(.*?)```").expect("valid regex"));
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]+)`").expect("valid regex"));
static BOLD_STARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("valid regex"));
static BOLD_UNDERSCORES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"__(.+?)__").expect("valid regex"));
static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^#{1,6}[ \t]+(.+)$").expect("valid regex"));
static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").expect("valid regex"));
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Converts the worker's markdown subset into the channel's HTML subset.
///
/// Fenced code blocks become `<pre>`, inline code `<code>`, bold and
/// headings `<b>`, single-asterisk italics `<i>`; link labels survive
/// without their URLs; the three markup metacharacters are escaped in
/// every plain-text span.
pub fn markdown_to_html(text: &str) -> String {
    // Code first, so its contents bypass escaping and inline rules.
    let mut code_blocks: Vec<String> = Vec::new();
    let mut out = FENCED_CODE
        .replace_all(text, |caps: &Captures| {
            let idx = code_blocks.len();
            code_blocks.push(format!("<pre>{}</pre>", escape_html(caps[1].trim_end())));
            format!("\u{0}CODEBLOCK_{idx}\u{0}")
        })
        .into_owned();

    let mut inline_codes: Vec<String> = Vec::new();
    out = INLINE_CODE
        .replace_all(&out, |caps: &Captures| {
            let idx = inline_codes.len();
            inline_codes.push(format!("<code>{}</code>", escape_html(&caps[1])));
            format!("\u{0}INLINE_{idx}\u{0}")
        })
        .into_owned();

    out = escape_html(&out);

    out = BOLD_STARS.replace_all(&out, "<b>$1</b>").into_owned();
    out = BOLD_UNDERSCORES.replace_all(&out, "<b>$1</b>").into_owned();
    out = HEADING.replace_all(&out, "<b>$1</b>").into_owned();
    out = apply_italics(&out);
    out = LINK.replace_all(&out, "$1").into_owned();

    for (idx, code) in inline_codes.iter().enumerate() {
        out = out.replace(&format!("\u{0}INLINE_{idx}\u{0}"), code);
    }
    for (idx, block) in code_blocks.iter().enumerate() {
        out = out.replace(&format!("\u{0}CODEBLOCK_{idx}\u{0}"), block);
    }

    out
}

/// Single-asterisk italics; double asterisks (bold leftovers) pass
/// through untouched. Hand-rolled because the regex crate has no
/// lookaround.
fn apply_italics(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '*' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == '*' {
            run += 1;
        }
        if run > 1 {
            out.extend(std::iter::repeat_n('*', run));
            i += run;
            continue;
        }
        // Single opener: the closer must itself be a lone asterisk with a
        // non-empty, asterisk-free span in between.
        let mut close = None;
        let mut j = i + 1;
        while j < chars.len() {
            if chars[j] == '*' {
                if chars.get(j + 1) != Some(&'*') && j > i + 1 {
                    close = Some(j);
                }
                break;
            }
            j += 1;
        }
        if let Some(j) = close {
            out.push_str("<i>");
            out.extend(&chars[i + 1..j]);
            out.push_str("</i>");
            i = j + 1;
        } else {
            out.push('*');
            i += 1;
        }
    }
    out
}

/// Splits `text` into windows of at most `max` bytes, preferring to cut
/// just after a paragraph break (`\n\n`). The separator stays with the
/// earlier chunk, so concatenating the chunks reproduces the input
/// byte-for-byte. A paragraph longer than `max` is hard-cut at the last
/// char boundary within the window.
pub fn chunk_message(text: &str, max: usize) -> Vec<String> {
    if text.len() <= max {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= max {
            chunks.push(remaining.to_string());
            break;
        }

        let window_end = floor_char_boundary(remaining, max);
        let window = &remaining[..window_end];
        let mut cut = match window.rfind("\n\n") {
            Some(idx) if idx > 0 => idx + 2,
            _ => window_end,
        };
        if cut == 0 {
            // max smaller than the first code point; take it whole anyway.
            cut = remaining
                .chars()
                .next()
                .map_or(remaining.len(), char::len_utf8);
        }
        chunks.push(remaining[..cut].to_string());
        remaining = &remaining[cut..];
    }
    chunks
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Plain-text fallback for chunks the channel rejects as HTML.
pub fn strip_html_tags(html: &str) -> String {
    HTML_TAG.replace_all(html, "").into_owned()
}

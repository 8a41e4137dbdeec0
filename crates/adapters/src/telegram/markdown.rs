//! Conversion between caption markdown and what the Bot API speaks
//!
//! Captions are authored in a small markdown subset (`**bold**`, `` `code` ``,
//! `[text](url)`). The Bot API takes HTML on the way in and hands back plain
//! text plus entities on the way out. Entity offsets and lengths are counted
//! in UTF-16 code units.

use serde::Deserialize;

/// A formatting span as returned by the Bot API
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: usize,
    pub length: usize,
    #[serde(default)]
    pub url: Option<String>,
}

/// Render the markdown subset as Telegram HTML
pub fn to_html(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len() + 32);
    let mut bold = false;
    let mut rest = markdown;

    while let Some(c) = rest.chars().next() {
        if let Some(after) = rest.strip_prefix("**") {
            out.push_str(if bold { "</b>" } else { "<b>" });
            bold = !bold;
            rest = after;
            continue;
        }

        if c == '`' {
            if let Some(end) = rest[1..].find('`') {
                out.push_str("<code>");
                out.push_str(&escape(&rest[1..1 + end]));
                out.push_str("</code>");
                rest = &rest[end + 2..];
                continue;
            }
        }

        if c == '[' {
            if let Some((text, url, consumed)) = split_link(rest) {
                out.push_str("<a href=\"");
                out.push_str(&escape(url).replace('"', "&quot;"));
                out.push_str("\">");
                out.push_str(&escape(text));
                out.push_str("</a>");
                rest = &rest[consumed..];
                continue;
            }
        }

        out.push_str(&escape(&rest[..c.len_utf8()]));
        rest = &rest[c.len_utf8()..];
    }

    if bold {
        out.push_str("</b>");
    }
    out
}

/// Rebuild caption markdown from plain text and its entities
pub fn from_entities(text: &str, entities: &[MessageEntity]) -> String {
    // (utf16 position, is_open, span length, entity index, marker)
    let mut marks: Vec<(usize, bool, usize, usize, String)> = Vec::new();
    for (index, entity) in entities.iter().enumerate() {
        let (open, close) = match entity.kind.as_str() {
            "bold" => ("**".to_string(), "**".to_string()),
            "code" | "pre" => ("`".to_string(), "`".to_string()),
            "text_link" => match &entity.url {
                Some(url) => ("[".to_string(), format!("]({})", url)),
                None => continue,
            },
            _ => continue,
        };
        marks.push((entity.offset, true, entity.length, index, open));
        marks.push((entity.offset + entity.length, false, entity.length, index, close));
    }

    // Closes before opens; outer spans open first and close last
    marks.sort_by(|a, b| {
        a.0.cmp(&b.0).then(a.1.cmp(&b.1)).then_with(|| {
            if a.1 {
                b.2.cmp(&a.2).then(a.3.cmp(&b.3))
            } else {
                a.2.cmp(&b.2).then(b.3.cmp(&a.3))
            }
        })
    });

    let mut out = String::with_capacity(text.len() + marks.len() * 4);
    let mut marks = marks.into_iter().peekable();
    let mut position = 0;

    for c in text.chars() {
        while let Some((_, _, _, _, marker)) = marks.next_if(|m| m.0 <= position) {
            out.push_str(&marker);
        }
        out.push(c);
        position += c.len_utf16();
    }
    for (_, _, _, _, marker) in marks {
        out.push_str(&marker);
    }

    out
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// `[text](url)` at the start of `input`: (text, url, bytes consumed)
fn split_link(input: &str) -> Option<(&str, &str, usize)> {
    let close_text = input.find("](")?;
    let text = &input[1..close_text];
    if text.contains('\n') {
        return None;
    }
    let url_start = close_text + 2;
    let url_len = input[url_start..].find(')')?;
    let url = &input[url_start..url_start + url_len];
    if url.contains(char::is_whitespace) {
        return None;
    }
    Some((text, url, url_start + url_len + 1))
}

//! Caption codec - the only persisted-state format
//!
//! A posted message carries four fixed-template lines: id, url, liked,
//! favorited. The channel history is replayed through [`Caption::parse`] on
//! every start, so rendered output must stay byte-stable.

use regex::Regex;
use std::sync::LazyLock;

use crate::model::{CombinedPost, MessageId, MessagingPost, SourcePostId};

/// Current caption format version. Version 1 carries no version line.
pub const FORMAT_VERSION: u32 = 1;

/// A literal prefix/suffix pair wrapped around one field value
#[derive(Debug, Clone, Copy)]
pub struct FieldTemplate {
    pub prefix: &'static str,
    pub suffix: &'static str,
}

impl FieldTemplate {
    const fn new(prefix: &'static str, suffix: &'static str) -> Self {
        Self { prefix, suffix }
    }

    fn render(&self, value: &str) -> String {
        format!("{}{}{}", self.prefix, value, self.suffix)
    }

    fn pattern(&self) -> Regex {
        Regex::new(&format!(
            "(?:{})(.*?)(?:{})",
            regex::escape(self.prefix),
            regex::escape(self.suffix)
        ))
        .expect("escaped template is a valid pattern")
    }
}

pub const TEMPLATE_POST_ID: FieldTemplate = FieldTemplate::new("**_id:** `", "`");
pub const TEMPLATE_LINK: FieldTemplate = FieldTemplate::new("**lnk:** [here](", ")");
pub const TEMPLATE_LIKED: FieldTemplate = FieldTemplate::new("**lkd:** `", "`");
pub const TEMPLATE_FAVORITED: FieldTemplate = FieldTemplate::new("**fav:** `", "`");
pub const TEMPLATE_VERSION: FieldTemplate = FieldTemplate::new("**ver:** `", "`");

static RE_POST_ID: LazyLock<Regex> = LazyLock::new(|| TEMPLATE_POST_ID.pattern());
static RE_LINK: LazyLock<Regex> = LazyLock::new(|| TEMPLATE_LINK.pattern());
static RE_LIKED: LazyLock<Regex> = LazyLock::new(|| TEMPLATE_LIKED.pattern());
static RE_FAVORITED: LazyLock<Regex> = LazyLock::new(|| TEMPLATE_FAVORITED.pattern());
static RE_VERSION: LazyLock<Regex> = LazyLock::new(|| TEMPLATE_VERSION.pattern());

/// Structured content of a post caption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caption {
    pub source_post_id: SourcePostId,
    pub url: String,
    pub liked: bool,
    pub favorited: bool,
    pub version: u32,
}

impl Caption {
    pub fn from_post(post: &CombinedPost) -> Self {
        Self {
            source_post_id: post.id(),
            url: post.source.url.clone(),
            liked: post.source.liked,
            favorited: post.source.favorited,
            version: FORMAT_VERSION,
        }
    }

    pub fn render(&self) -> String {
        let mut lines = vec![
            TEMPLATE_POST_ID.render(&self.source_post_id.to_string()),
            TEMPLATE_LINK.render(&self.url),
            TEMPLATE_LIKED.render(render_bool(self.liked)),
            TEMPLATE_FAVORITED.render(render_bool(self.favorited)),
        ];
        if self.version > 1 {
            lines.push(TEMPLATE_VERSION.render(&self.version.to_string()));
        }
        lines.join("\n")
    }

    /// Parse message text. `None` for anything that is not a post caption,
    /// such as trailing attachment messages of a multi-message post.
    pub fn parse(text: &str) -> Option<Self> {
        // Id and url are the primary key; the rest degrade to defaults
        let source_post_id = capture(&RE_POST_ID, text)?.trim().parse().ok()?;
        let url = capture(&RE_LINK, text)?.trim().to_string();
        if url.is_empty() {
            return None;
        }

        Some(Self {
            source_post_id,
            url,
            liked: capture(&RE_LIKED, text).is_some_and(parse_bool),
            favorited: capture(&RE_FAVORITED, text).is_some_and(parse_bool),
            version: capture(&RE_VERSION, text)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(1),
        })
    }

    pub fn into_messaging(self, message_id: MessageId) -> MessagingPost {
        MessagingPost {
            message_id,
            source_post_id: self.source_post_id,
            url: self.url,
            liked: self.liked,
            favorited: self.favorited,
        }
    }
}

/// Render the caption for a post about to be sent
pub fn render_caption(post: &CombinedPost) -> String {
    Caption::from_post(post).render()
}

fn capture<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn render_bool(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

fn parse_bool(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

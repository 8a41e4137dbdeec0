//! Parsing of raw TikTok web API records into domain posts

use serde::Deserialize;
use serde_json::Value;
use tikdog_domain::{FeedError, MediaAsset, MediaKind, PostKind, SourcePost, SourcePostId};

/// Author handle used when a record carries none; TikTok resolves post URLs by id
const UNKNOWN_AUTHOR: &str = "user";

/// Envelope of the liked and favorited list endpoints
#[derive(Debug, Deserialize)]
pub(crate) struct ItemListResponse {
    #[serde(rename = "statusCode", default)]
    pub status_code: i64,
    #[serde(rename = "statusMsg", default)]
    pub status_msg: Option<String>,
    #[serde(rename = "itemList", default)]
    pub item_list: Vec<Value>,
    #[serde(default)]
    pub cursor: Value,
    #[serde(rename = "hasMore", default)]
    pub has_more: bool,
}

impl ItemListResponse {
    /// Cursors arrive as strings or numbers depending on the endpoint
    pub fn next_cursor(&self) -> String {
        match &self.cursor {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => String::new(),
        }
    }
}

/// Envelope of the single item endpoint
#[derive(Debug, Deserialize)]
pub(crate) struct ItemDetailResponse {
    #[serde(rename = "statusCode", default)]
    pub status_code: i64,
    #[serde(rename = "statusMsg", default)]
    pub status_msg: Option<String>,
    #[serde(rename = "itemInfo")]
    pub item_info: Option<ItemInfo>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ItemInfo {
    #[serde(rename = "itemStruct")]
    pub item_struct: Value,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    id: Value,
    author: Option<RawAuthor>,
    #[serde(rename = "imagePost")]
    image_post: Option<RawImagePost>,
    video: Option<RawVideo>,
    music: Option<RawMusic>,
}

#[derive(Debug, Deserialize)]
struct RawAuthor {
    #[serde(rename = "uniqueId", default)]
    unique_id: String,
}

#[derive(Debug, Deserialize)]
struct RawImagePost {
    #[serde(default)]
    images: Vec<RawImage>,
}

#[derive(Debug, Deserialize)]
struct RawImage {
    #[serde(rename = "imageURL")]
    image_url: Option<UrlField>,
}

#[derive(Debug, Deserialize)]
struct RawVideo {
    #[serde(rename = "playAddr")]
    play_addr: Option<UrlField>,
    #[serde(rename = "downloadAddr")]
    download_addr: Option<UrlField>,
}

#[derive(Debug, Deserialize)]
struct RawMusic {
    title: Option<String>,
    #[serde(rename = "playUrl")]
    play_url: Option<UrlField>,
    #[serde(rename = "coverLarge")]
    cover_large: Option<UrlField>,
}

/// A plain URL or a `{ "urlList": [...] }` object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UrlField {
    One(String),
    Many {
        #[serde(rename = "urlList", default)]
        url_list: Vec<String>,
    },
}

impl UrlField {
    fn urls(self) -> Vec<String> {
        let urls = match self {
            UrlField::One(url) => vec![url],
            UrlField::Many { url_list } => url_list,
        };
        urls.into_iter().filter(|u| !u.trim().is_empty()).collect()
    }

    fn first(self) -> Option<String> {
        self.urls().into_iter().next()
    }
}

/// Parse one raw record. Errors carry the record verbatim.
pub fn parse_item(raw: &Value) -> Result<SourcePost, FeedError> {
    let item: RawItem =
        serde_json::from_value(raw.clone()).map_err(|e| parse_error(e.to_string(), raw))?;

    let id = parse_id(&item.id).ok_or_else(|| parse_error("invalid item id".to_string(), raw))?;

    let kind = if item.image_post.is_some() {
        PostKind::Photo
    } else if item.video.is_some() {
        PostKind::Video
    } else {
        return Err(parse_error("neither imagePost nor video".to_string(), raw));
    };

    let author = item
        .author
        .map(|a| a.unique_id)
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());

    let media = match kind {
        PostKind::Photo => photo_media(id, item.image_post, item.music),
        PostKind::Video => video_media(id, item.video),
    };

    Ok(SourcePost {
        id,
        kind,
        url: format!("https://www.tiktok.com/@{}/{}/{}", author, kind, id),
        liked: false,
        favorited: false,
        media,
    })
}

fn parse_id(value: &Value) -> Option<SourcePostId> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

fn photo_media(
    id: SourcePostId,
    image_post: Option<RawImagePost>,
    music: Option<RawMusic>,
) -> Vec<MediaAsset> {
    let mut media: Vec<MediaAsset> = image_post
        .map(|p| p.images)
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(seq, image)| {
            let urls = image.image_url.map(UrlField::urls).unwrap_or_default();
            MediaAsset::new(id, MediaKind::Photo, seq, urls)
        })
        .collect();

    // Photo posts play their sound as a slideshow soundtrack
    if let Some(music) = music {
        if let Some(url) = music.play_url.and_then(UrlField::first) {
            let audio = MediaAsset::new(id, MediaKind::Audio, media.len(), vec![url])
                .with_display_name(music.title.filter(|t| !t.trim().is_empty()))
                .with_cover_url(music.cover_large.and_then(UrlField::first));
            media.push(audio);
        }
    }

    media
}

fn video_media(id: SourcePostId, video: Option<RawVideo>) -> Vec<MediaAsset> {
    let Some(video) = video else {
        return vec![];
    };
    let mut urls = video.play_addr.map(UrlField::urls).unwrap_or_default();
    urls.extend(video.download_addr.map(UrlField::urls).unwrap_or_default());
    vec![MediaAsset::new(id, MediaKind::Video, 0, urls)]
}

fn parse_error(message: String, raw: &Value) -> FeedError {
    let raw = raw.to_string();
    tracing::error!(error = %message, raw = %raw, "Failed to parse TikTok post, bailing out");
    FeedError::Parse { message, raw }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn video_item() -> Value {
        json!({
            "id": "7455398333754952967",
            "author": { "uniqueId": "fisch" },
            "video": {
                "playAddr": "https://v16.example/play.mp4",
                "downloadAddr": "https://v16.example/download.mp4"
            },
            "music": { "title": "original sound", "playUrl": "https://sf.example/music.mp3" }
        })
    }

    fn photo_item() -> Value {
        json!({
            "id": "7300000000000000001",
            "author": { "uniqueId": "someone" },
            "imagePost": {
                "images": [
                    { "imageURL": { "urlList": ["https://p16.example/a.jpeg", "https://p19.example/a.jpeg"] } },
                    { "imageURL": { "urlList": ["https://p16.example/b.jpeg"] } }
                ]
            },
            "music": {
                "title": "Song Title",
                "playUrl": "https://sf.example/song.mp3",
                "coverLarge": "https://p16.example/cover.jpeg"
            }
        })
    }

    #[test]
    fn test_parse_video() {
        let post = parse_item(&video_item()).unwrap();

        assert_eq!(post.id, 7455398333754952967);
        assert_eq!(post.kind, PostKind::Video);
        assert_eq!(
            post.url,
            "https://www.tiktok.com/@fisch/video/7455398333754952967"
        );
        assert_eq!(post.media.len(), 1);
        assert_eq!(
            post.media[0].source_urls,
            vec![
                "https://v16.example/play.mp4".to_string(),
                "https://v16.example/download.mp4".to_string()
            ]
        );
        assert!(post.media_complete());
    }

    #[test]
    fn test_parse_photo_with_audio() {
        let post = parse_item(&photo_item()).unwrap();

        assert_eq!(post.kind, PostKind::Photo);
        assert_eq!(post.url, "https://www.tiktok.com/@someone/photo/7300000000000000001");
        assert_eq!(post.media.len(), 3);
        assert_eq!(post.media[0].kind, MediaKind::Photo);
        assert_eq!(post.media[0].source_urls.len(), 2);
        assert_eq!(post.media[1].sequence, 1);

        let audio = &post.media[2];
        assert_eq!(audio.kind, MediaKind::Audio);
        assert_eq!(audio.sequence, 2);
        assert_eq!(audio.display_name.as_deref(), Some("Song Title"));
        assert_eq!(
            audio.cover_url.as_deref(),
            Some("https://p16.example/cover.jpeg")
        );
        assert_eq!(audio.filename(), "7300000000000000001_audio_2.mp3");
    }

    #[test]
    fn test_parse_ignores_feed_flags() {
        let mut raw = video_item();
        raw["digged"] = json!(true);
        raw["collected"] = json!(true);
        let post = parse_item(&raw).unwrap();
        assert!(!post.liked);
        assert!(!post.favorited);
    }

    #[test]
    fn test_parse_missing_video_url_is_incomplete() {
        let raw = json!({
            "id": "42",
            "author": { "uniqueId": "x" },
            "video": { "playAddr": "" }
        });
        let post = parse_item(&raw).unwrap();
        assert!(!post.media_complete());
    }

    #[test]
    fn test_parse_missing_author() {
        let raw = json!({ "id": 42, "video": { "playAddr": "https://v.example/x.mp4" } });
        let post = parse_item(&raw).unwrap();
        assert_eq!(post.url, "https://www.tiktok.com/@user/video/42");
    }

    #[test]
    fn test_parse_malformed_keeps_raw() {
        let raw = json!({ "id": "not-a-number", "video": {} });
        match parse_item(&raw) {
            Err(FeedError::Parse { raw: logged, .. }) => {
                assert!(logged.contains("not-a-number"));
            }
            other => panic!("expected parse error, got {:?}", other),
        }

        assert!(matches!(
            parse_item(&json!({ "id": "1" })),
            Err(FeedError::Parse { .. })
        ));
        assert!(matches!(
            parse_item(&json!({ "desc": "no id" })),
            Err(FeedError::Parse { .. })
        ));
    }

    #[test]
    fn test_cursor_forms() {
        let response: ItemListResponse =
            serde_json::from_value(json!({ "cursor": "1700000000000", "hasMore": true })).unwrap();
        assert_eq!(response.next_cursor(), "1700000000000");

        let response: ItemListResponse =
            serde_json::from_value(json!({ "cursor": 25, "hasMore": false })).unwrap();
        assert_eq!(response.next_cursor(), "25");
        assert!(response.item_list.is_empty());
    }
}

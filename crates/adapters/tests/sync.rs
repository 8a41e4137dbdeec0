//! End-to-end sync over in-memory feeds and channel with real downloads

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tikdog_adapters::media::{HttpMediaStore, MediaConfig};
use tikdog_adapters::memory::{InMemoryChannel, InMemoryFeed};
use tikdog_domain::usecases::{
    Caption, LinkerConfig, ReconcileConfig, SyncConfig, SyncLoop, render_caption,
};
use tikdog_domain::{Channel, CombinedPost, MediaAsset, MediaKind, PostKind, SourcePost};
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn video(server: &MockServer, id: u64) -> SourcePost {
    SourcePost {
        id,
        kind: PostKind::Video,
        url: format!("https://www.tiktok.com/@someone/video/{}", id),
        liked: false,
        favorited: false,
        media: vec![MediaAsset::new(
            id,
            MediaKind::Video,
            0,
            vec![format!("{}/media/{}.mp4", server.uri(), id)],
        )],
    }
}

fn config() -> SyncConfig {
    SyncConfig {
        poll_interval: Duration::from_secs(1),
        dry_run: false,
        reconcile: ReconcileConfig {
            page_delay: Duration::ZERO,
            media_retry_limit: 1,
            media_retry_delay: Duration::ZERO,
        },
        linker: LinkerConfig {
            allowed_empty_gap: 5,
        },
    }
}

async fn media_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/media/\d+\.mp4$"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8; 2048], "video/mp4"))
        .mount(&server)
        .await;
    server
}

fn posted_ids(channel: &InMemoryChannel) -> Vec<u64> {
    channel
        .messages()
        .iter()
        .filter_map(|m| m.text.as_deref().and_then(Caption::parse))
        .map(|c| c.source_post_id)
        .collect()
}

#[tokio::test]
async fn test_sync_posts_once_across_restarts() {
    let server = media_server().await;
    let dir = TempDir::new().unwrap();

    let liked = Arc::new(InMemoryFeed::with_posts(
        vec![video(&server, 3), video(&server, 2), video(&server, 1)],
        2,
    ));
    let favorited = Arc::new(InMemoryFeed::with_posts(vec![video(&server, 2)], 2));
    let channel = Arc::new(InMemoryChannel::new());

    // Post 1 was mirrored by an earlier run
    let mut earlier = video(&server, 1);
    earlier.liked = true;
    channel
        .send_text(&render_caption(&CombinedPost::new(earlier)))
        .await
        .unwrap();

    let store = Arc::new(HttpMediaStore::new(MediaConfig {
        dir: dir.path().to_path_buf(),
        ..Default::default()
    }));

    let mut sync = SyncLoop::new(
        Arc::clone(&liked),
        Arc::clone(&favorited),
        Arc::clone(&channel),
        Arc::clone(&store),
        config(),
    );
    sync.rebuild().await.unwrap();
    let report = sync.post_pending().await.unwrap();

    assert_eq!(report.posted, 2);
    assert_eq!(posted_ids(&channel), vec![1, 2, 3]);

    let post_two = channel
        .messages()
        .into_iter()
        .filter_map(|m| m.text.as_deref().and_then(Caption::parse))
        .find(|c| c.source_post_id == 2)
        .unwrap();
    assert!(post_two.liked);
    assert!(post_two.favorited);

    // Downloads are cleaned up after posting
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

    // A fresh process links everything and posts nothing
    let mut restarted = SyncLoop::new(liked, favorited, Arc::clone(&channel), store, config());
    restarted.rebuild().await.unwrap();
    assert!(restarted.registry().unposted().is_empty());

    let report = restarted.post_pending().await.unwrap();
    assert_eq!(report.posted, 0);
    assert_eq!(posted_ids(&channel), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_new_like_is_posted_after_poll() {
    let server = media_server().await;
    let dir = TempDir::new().unwrap();

    let liked = Arc::new(InMemoryFeed::with_posts(vec![video(&server, 1)], 10));
    let favorited = Arc::new(InMemoryFeed::new(10));
    let channel = Arc::new(InMemoryChannel::new());
    let store = Arc::new(HttpMediaStore::new(MediaConfig {
        dir: dir.path().to_path_buf(),
        ..Default::default()
    }));

    let mut sync = SyncLoop::new(
        Arc::clone(&liked),
        favorited,
        Arc::clone(&channel),
        store,
        config(),
    );
    sync.rebuild().await.unwrap();
    sync.post_pending().await.unwrap();

    liked.push_newest(video(&server, 2)).unwrap();
    let requests_before = liked.page_requests();
    sync.poll().await.unwrap();
    sync.post_pending().await.unwrap();

    assert_eq!(liked.page_requests(), requests_before + 1);
    assert_eq!(posted_ids(&channel), vec![1, 2]);
}

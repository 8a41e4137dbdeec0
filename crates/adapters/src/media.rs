//! HTTP media store with download validation
//!
//! Files land in one flat directory under their deterministic names, so a
//! file that exists is a file that was fully downloaded: bytes go to a
//! `.part` sibling first and are renamed into place only after validation.

use async_trait::async_trait;
use reqwest::{Client, Response, header};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tikdog_domain::{LocalMedia, MediaAsset, MediaError, MediaKind, MediaStore};
use tokio::io::AsyncWriteExt;

use crate::ffmpeg::{AudioTagger, AudioTags};

/// Settings for [`HttpMediaStore`]
#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub dir: PathBuf,
    /// Smaller downloads are rejected as error pages in disguise
    pub min_bytes: u64,
    pub timeout: Duration,
    pub user_agent: String,
    pub referer: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./tmp"),
            min_bytes: 1024,
            timeout: Duration::from_secs(120),
            user_agent: crate::tiktok::DEFAULT_USER_AGENT.to_string(),
            referer: "https://www.tiktok.com/".to_string(),
        }
    }
}

pub struct HttpMediaStore {
    client: Client,
    config: MediaConfig,
    cookie: Option<SecretString>,
    tagger: Option<Arc<dyn AudioTagger>>,
}

impl HttpMediaStore {
    pub fn new(config: MediaConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            config,
            cookie: None,
            tagger: None,
        }
    }

    /// Send the session cookie with downloads; some CDN links require it
    pub fn with_cookie(mut self, cookie: SecretString) -> Self {
        self.cookie = Some(cookie);
        self
    }

    pub fn with_tagger(mut self, tagger: Arc<dyn AudioTagger>) -> Self {
        self.tagger = Some(tagger);
        self
    }

    pub fn path_for(&self, asset: &MediaAsset) -> PathBuf {
        self.config.dir.join(asset.filename())
    }

    async fn is_cached(path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Try each source URL in order; the last failure wins
    async fn download(&self, asset: &MediaAsset, path: &Path) -> Result<(), MediaError> {
        let filename = asset.filename();
        let mut last_error = MediaError::NoSource(filename.clone());

        for url in asset.source_urls.iter().filter(|u| !u.trim().is_empty()) {
            match self.download_url(url, &filename, path).await {
                Ok(bytes) => {
                    tracing::debug!(filename = %filename, bytes, "Downloaded");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(filename = %filename, url = %url, error = %e, "Download attempt failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn download_url(&self, url: &str, filename: &str, path: &Path) -> Result<u64, MediaError> {
        let rejected = |reason: String| MediaError::DownloadValidationFailed {
            filename: filename.to_string(),
            reason,
        };

        let mut request = self
            .client
            .get(url)
            .header(header::REFERER, self.config.referer.as_str());
        if let Some(cookie) = &self.cookie {
            request = request.header(header::COOKIE, cookie.expose_secret());
        }

        let mut response = request
            .send()
            .await
            .map_err(|e| MediaError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(rejected(format!("HTTP {}", status)));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if content_type.starts_with("text/html") {
            return Err(rejected(format!("content-type {}", content_type)));
        }

        let partial = partial_path(path);
        let written = match write_body(&mut response, &partial).await {
            Ok(written) => written,
            Err(e) => {
                remove_quietly(&partial).await;
                return Err(e);
            }
        };

        if written < self.config.min_bytes {
            remove_quietly(&partial).await;
            return Err(rejected(format!(
                "{} bytes, expected at least {}",
                written, self.config.min_bytes
            )));
        }

        tokio::fs::rename(&partial, path).await?;
        Ok(written)
    }

    /// Embed title and cover into a downloaded track. Failures only warn.
    async fn tag_audio(&self, asset: &MediaAsset, path: &Path) {
        let Some(tagger) = &self.tagger else {
            return;
        };
        if asset.display_name.is_none() && asset.cover_url.is_none() {
            return;
        }

        let cover_path = self
            .config
            .dir
            .join(format!("{}_cover_{}.jpg", asset.post_id, asset.sequence));
        let cover = match &asset.cover_url {
            Some(url) => match self.download_url(url, &asset.filename(), &cover_path).await {
                Ok(_) => Some(cover_path.clone()),
                Err(e) => {
                    tracing::warn!(post_id = asset.post_id, error = %e, "Cover download failed");
                    None
                }
            },
            None => None,
        };

        let tags = AudioTags {
            title: asset.display_name.clone(),
            cover: cover.clone(),
        };
        if let Err(e) = tagger.tag(path, &tags).await {
            tracing::warn!(filename = %asset.filename(), error = %e, "Audio tagging failed");
        }

        if cover.is_some() {
            remove_quietly(&cover_path).await;
        }
    }
}

#[async_trait]
impl MediaStore for HttpMediaStore {
    async fn fetch(&self, assets: &[MediaAsset]) -> Result<Vec<LocalMedia>, MediaError> {
        tokio::fs::create_dir_all(&self.config.dir).await?;

        let mut files = Vec::with_capacity(assets.len());
        for asset in assets {
            let path = self.path_for(asset);

            if Self::is_cached(&path).await {
                tracing::debug!(filename = %asset.filename(), "Already downloaded");
            } else {
                tracing::debug!(post_id = asset.post_id, kind = %asset.kind, "Downloading");
                self.download(asset, &path).await?;
                if asset.kind == MediaKind::Audio {
                    self.tag_audio(asset, &path).await;
                }
            }

            files.push(LocalMedia {
                path,
                kind: asset.kind,
            });
        }

        Ok(files)
    }

    async fn delete(&self, assets: &[MediaAsset]) {
        for asset in assets {
            let path = self.path_for(asset);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to delete media");
                }
            }
        }
    }
}

/// Stream the response body into `partial`, returning the byte count
async fn write_body(response: &mut Response, partial: &Path) -> Result<u64, MediaError> {
    let mut file = tokio::fs::File::create(partial).await?;
    let mut written: u64 = 0;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| MediaError::Network(e.to_string()))?
    {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    Ok(written)
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffmpeg::TagError;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use wiremock::matchers::{header as header_matcher, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(dir: &TempDir) -> HttpMediaStore {
        HttpMediaStore::new(MediaConfig {
            dir: dir.path().to_path_buf(),
            min_bytes: 16,
            ..Default::default()
        })
    }

    fn asset(server: &MockServer, kind: MediaKind, seq: usize, route: &str) -> MediaAsset {
        MediaAsset::new(1, kind, seq, vec![format!("{}{}", server.uri(), route)])
    }

    fn payload() -> Vec<u8> {
        vec![7u8; 64]
    }

    #[tokio::test]
    async fn test_fetch_downloads_and_caches() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/v.mp4"))
            .and(header_matcher("referer", "https://www.tiktok.com/"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(payload(), "video/mp4"))
            .expect(1)
            .mount(&server)
            .await;

        let store = store(&dir);
        let assets = vec![asset(&server, MediaKind::Video, 0, "/v.mp4")];

        let files = store.fetch(&assets).await.unwrap();
        assert_eq!(files[0].path, dir.path().join("1_video_0.mp4"));
        assert_eq!(std::fs::read(&files[0].path).unwrap(), payload());
        assert!(!dir.path().join("1_video_0.mp4.part").exists());

        // Second fetch is served from disk
        store.fetch(&assets).await.unwrap();
    }

    #[tokio::test]
    async fn test_html_with_ok_status_is_rejected() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/v.mp4"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html>please log in</html>".repeat(10), "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;

        let result = store(&dir)
            .fetch(&[asset(&server, MediaKind::Video, 0, "/v.mp4")])
            .await;

        assert!(matches!(
            result,
            Err(MediaError::DownloadValidationFailed { .. })
        ));
        assert!(!dir.path().join("1_video_0.mp4").exists());
    }

    #[tokio::test]
    async fn test_short_body_is_rejected() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/p.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![1u8; 3], "image/jpeg"))
            .mount(&server)
            .await;

        let result = store(&dir)
            .fetch(&[asset(&server, MediaKind::Photo, 0, "/p.jpg")])
            .await;

        assert!(matches!(
            result,
            Err(MediaError::DownloadValidationFailed { .. })
        ));
        assert!(!dir.path().join("1_photo_0.jpg").exists());
        assert!(!dir.path().join("1_photo_0.jpg.part").exists());
    }

    #[tokio::test]
    async fn test_interrupted_body_leaves_no_partial_file() {
        use tokio::io::AsyncReadExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            let head = "HTTP/1.1 200 OK\r\ncontent-type: video/mp4\r\ncontent-length: 4096\r\n\r\n";
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&[5u8; 512]).await.unwrap();
            socket.flush().await.unwrap();
        });

        let dir = TempDir::new().unwrap();
        let assets = vec![MediaAsset::new(
            1,
            MediaKind::Video,
            0,
            vec![format!("http://{}/v.mp4", addr)],
        )];

        let result = store(&dir).fetch(&assets).await;

        assert!(matches!(result, Err(MediaError::Network(_))));
        assert!(!dir.path().join("1_video_0.mp4").exists());
        assert!(!dir.path().join("1_video_0.mp4.part").exists());
    }

    #[tokio::test]
    async fn test_falls_back_to_next_url() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/gone.mp4"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ok.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(payload(), "video/mp4"))
            .mount(&server)
            .await;

        let asset = MediaAsset::new(
            1,
            MediaKind::Video,
            0,
            vec![
                format!("{}/gone.mp4", server.uri()),
                format!("{}/ok.mp4", server.uri()),
            ],
        );
        let files = store(&dir).fetch(&[asset]).await.unwrap();
        assert!(files[0].path.exists());
    }

    #[tokio::test]
    async fn test_no_source() {
        let dir = TempDir::new().unwrap();
        let asset = MediaAsset::new(1, MediaKind::Video, 0, vec![]);
        assert!(matches!(
            store(&dir).fetch(&[asset]).await,
            Err(MediaError::NoSource(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_is_best_effort() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let present = asset(&server, MediaKind::Photo, 0, "/a.jpg");
        let missing = asset(&server, MediaKind::Photo, 1, "/b.jpg");
        std::fs::write(store.path_for(&present), payload()).unwrap();

        store.delete(&[present.clone(), missing]).await;

        assert!(!store.path_for(&present).exists());
    }

    struct RecordingTagger {
        calls: Mutex<Vec<(PathBuf, AudioTags)>>,
    }

    #[async_trait]
    impl AudioTagger for RecordingTagger {
        async fn tag(&self, file: &Path, tags: &AudioTags) -> Result<(), TagError> {
            if let Some(cover) = &tags.cover {
                assert!(cover.exists());
            }
            self.calls
                .lock()
                .unwrap()
                .push((file.to_path_buf(), tags.clone()));
            Err(TagError::Timeout)
        }
    }

    #[tokio::test]
    async fn test_audio_is_tagged_and_failure_tolerated() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/song.mp3"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(payload(), "audio/mpeg"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cover.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(payload(), "image/jpeg"))
            .mount(&server)
            .await;

        let tagger = Arc::new(RecordingTagger {
            calls: Mutex::new(vec![]),
        });
        let store = store(&dir).with_tagger(tagger.clone());
        let audio = asset(&server, MediaKind::Audio, 2, "/song.mp3")
            .with_display_name(Some("Song".to_string()))
            .with_cover_url(Some(format!("{}/cover.jpg", server.uri())));

        let files = store.fetch(&[audio]).await.unwrap();

        assert!(files[0].path.exists());
        let calls = tagger.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.title.as_deref(), Some("Song"));
        assert!(calls[0].1.cover.is_some());
        assert!(!dir.path().join("1_cover_2.jpg").exists());
    }
}

//! Audio tagging through a local ffmpeg binary

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Metadata to embed into a track
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioTags {
    pub title: Option<String>,
    /// Local image file to embed as front cover
    pub cover: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum TagError {
    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Tagger exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("Tagger timed out")]
    Timeout,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Writes tags into an audio file in place
#[async_trait]
pub trait AudioTagger: Send + Sync {
    async fn tag(&self, file: &Path, tags: &AudioTags) -> Result<(), TagError>;
}

pub struct FfmpegTagger {
    command: String,
    timeout: Duration,
}

impl FfmpegTagger {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Arguments that copy `input` to `output` with the tags applied
    fn build_args(input: &Path, output: &Path, tags: &AudioTags) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-i".into(),
            input.into(),
        ];

        if let Some(cover) = &tags.cover {
            args.extend([
                "-i".into(),
                cover.into(),
                "-map".into(),
                "0:a".into(),
                "-map".into(),
                "1:v".into(),
                "-metadata:s:v".into(),
                "title=Album cover".into(),
                "-metadata:s:v".into(),
                "comment=Cover (front)".into(),
            ]);
        }

        args.extend(["-c".into(), "copy".into(), "-id3v2_version".into(), "3".into()]);

        if let Some(title) = &tags.title {
            args.extend(["-metadata".into(), format!("title={}", title).into()]);
        }

        args.push(output.into());
        args
    }
}

#[async_trait]
impl AudioTagger for FfmpegTagger {
    async fn tag(&self, file: &Path, tags: &AudioTags) -> Result<(), TagError> {
        let output = file.with_extension("tagged.mp3");
        let args = Self::build_args(file, &output, tags);

        let mut child = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TagError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(result) => result?,
            Err(_) => {
                let _ = child.kill().await;
                let _ = tokio::fs::remove_file(&output).await;
                return Err(TagError::Timeout);
            }
        };

        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr).await;
            }
            let _ = tokio::fs::remove_file(&output).await;
            return Err(TagError::Failed {
                status: status.to_string(),
                stderr: stderr.lines().last().unwrap_or_default().to_string(),
            });
        }

        tokio::fs::rename(&output, file).await?;
        tracing::debug!(file = %file.display(), "Tagged audio");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_args_with_title_and_cover() {
        let args = FfmpegTagger::build_args(
            Path::new("tmp/1_audio_2.mp3"),
            Path::new("tmp/1_audio_2.tagged.mp3"),
            &AudioTags {
                title: Some("Song".to_string()),
                cover: Some(PathBuf::from("tmp/1_cover_2.jpg")),
            },
        );
        let args = strings(args);

        assert_eq!(&args[3..6], ["-y", "-i", "tmp/1_audio_2.mp3"]);
        assert!(args.windows(2).any(|w| w == ["-i", "tmp/1_cover_2.jpg"]));
        assert!(args.windows(2).any(|w| w == ["-map", "1:v"]));
        assert!(args.windows(2).any(|w| w == ["-metadata", "title=Song"]));
        assert_eq!(args.last().unwrap(), "tmp/1_audio_2.tagged.mp3");
    }

    #[test]
    fn test_args_title_only() {
        let args = strings(FfmpegTagger::build_args(
            Path::new("a.mp3"),
            Path::new("b.mp3"),
            &AudioTags {
                title: Some("T".to_string()),
                cover: None,
            },
        ));
        assert!(!args.iter().any(|a| a == "-map"));
        assert!(args.contains(&"title=T".to_string()));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("a.mp3");
        std::fs::write(&file, b"x").unwrap();

        let tagger = FfmpegTagger::new("definitely-not-a-real-ffmpeg-binary");
        let result = tagger.tag(&file, &AudioTags::default()).await;

        assert!(matches!(result, Err(TagError::Spawn { .. })));
        assert!(file.exists());
    }
}

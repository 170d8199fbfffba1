use crate::api::remote_status_error;
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::media::MediaAsset;
use crate::{logi, logok, logw};
use futures_util::StreamExt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Bytes handed to the progress callback per step.
pub const CHUNK_SIZE: usize = 1024;
const VIDEO_EXTENSION: &str = ".mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub written: u64,
    /// From `Content-Length`; `None` when absent or zero.
    pub total: Option<u64>,
}

impl DownloadProgress {
    pub fn fraction(&self) -> Option<f64> {
        self.total.map(|t| (self.written as f64 / t as f64).min(1.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub size_mb: f64,
    pub filename: String,
}

/// Bare file name ending in `.mp4`; a timestamped name when none is given.
pub fn normalize_filename(filename: Option<&str>) -> String {
    let name = filename
        .and_then(|f| Path::new(f.trim()).file_name())
        .map(|f| f.to_string_lossy().into_owned())
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| format!("video_{}", chrono::Local::now().format("%Y%m%d_%H%M%S")));
    if name.ends_with(VIDEO_EXTENSION) {
        name
    } else {
        format!("{}{}", name, VIDEO_EXTENSION)
    }
}

pub struct VideoDownloader {
    http: reqwest::Client,
    output_dir: PathBuf,
}

impl VideoDownloader {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            http: crate::api::build_http_client(std::time::Duration::from_secs(600))?,
            output_dir: output_dir.into(),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(cfg.videos_dir.clone())
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Download `url` into the videos directory, logging progress in quarters.
    pub async fn fetch(&self, url: &str, filename: Option<&str>) -> Result<MediaAsset> {
        let mut next_quarter = 1u32;
        self.fetch_with_progress(url, filename, |p| {
            if let Some(fraction) = p.fraction() {
                while next_quarter <= 4 && fraction >= next_quarter as f64 / 4.0 {
                    logi(format!("Download {}% ({} bytes)", next_quarter * 25, p.written));
                    next_quarter += 1;
                }
            }
        })
        .await
    }

    /// Stream `url` to disk, reporting after every chunk written and at least
    /// once in total, so an empty body still reports completion.
    ///
    /// A failed transfer leaves the partial file in place with every byte
    /// received so far.
    pub async fn fetch_with_progress<F>(
        &self,
        url: &str,
        filename: Option<&str>,
        mut on_progress: F,
    ) -> Result<MediaAsset>
    where
        F: FnMut(DownloadProgress),
    {
        let context = "Failed to download video";
        let name = normalize_filename(filename);
        let dest = self.output_dir.join(&name);

        logi(format!("Downloading video from {}", url));
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::remote(context, e))?;
        if !resp.status().is_success() {
            return Err(remote_status_error(context, resp).await);
        }

        let total = resp.content_length().filter(|len| *len > 0);

        fs::create_dir_all(&self.output_dir).await.map_err(|e| {
            PipelineError::io(format!("Failed to create dir {}", self.output_dir.display()), e)
        })?;
        let file = fs::File::create(&dest)
            .await
            .map_err(|e| PipelineError::io(format!("Failed to create {}", dest.display()), e))?;
        let mut writer = BufWriter::new(file);
        let write_err = |e| PipelineError::io(format!("Failed to write {}", dest.display()), e);

        let mut written = 0u64;
        let mut stream = resp.bytes_stream();
        let mut reported = false;
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    // Keep what already arrived in the partial file.
                    if let Err(flush_err) = writer.flush().await {
                        logw(format!("Failed to flush partial {}: {}", dest.display(), flush_err));
                    }
                    return Err(PipelineError::remote(context, err));
                }
            };
            for piece in chunk.chunks(CHUNK_SIZE) {
                writer.write_all(piece).await.map_err(write_err)?;
                written += piece.len() as u64;
                on_progress(DownloadProgress { written, total });
                reported = true;
            }
        }
        writer.flush().await.map_err(write_err)?;
        if !reported {
            on_progress(DownloadProgress { written, total });
        }

        logok(format!("Video downloaded successfully to: {}", dest.display()));
        Ok(MediaAsset::video(dest))
    }

    pub async fn info(&self, path: &Path) -> Result<VideoInfo> {
        let meta = fs::metadata(path)
            .await
            .map_err(|e| PipelineError::io(format!("Failed to get video info for {}", path.display()), e))?;
        let size_bytes = meta.len();
        Ok(VideoInfo {
            path: path.to_path_buf(),
            size_bytes,
            size_mb: size_bytes as f64 / (1024.0 * 1024.0),
            filename: path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_appends_extension() {
        assert_eq!(normalize_filename(Some("poetry_background")), "poetry_background.mp4");
        assert_eq!(normalize_filename(Some("clip.mp4")), "clip.mp4");
    }

    #[test]
    fn test_normalize_strips_directories() {
        assert_eq!(normalize_filename(Some("../../etc/clip")), "clip.mp4");
    }

    #[test]
    fn test_normalize_defaults_to_timestamp() {
        let name = normalize_filename(None);
        assert!(name.starts_with("video_"));
        assert!(name.ends_with(".mp4"));
        assert_eq!(name.len(), "video_20240101_120000.mp4".len());
        assert!(normalize_filename(Some("  ")).starts_with("video_"));
    }

    #[test]
    fn test_progress_fraction() {
        let p = DownloadProgress { written: 512, total: Some(1024) };
        assert_eq!(p.fraction(), Some(0.5));
        let unknown = DownloadProgress { written: 512, total: None };
        assert_eq!(unknown.fraction(), None);
    }

    #[tokio::test]
    async fn test_info_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, vec![0u8; 2048]).unwrap();

        let downloader = VideoDownloader::new(dir.path()).unwrap();
        let info = downloader.info(&path).await.unwrap();
        assert_eq!(info.size_bytes, 2048);
        assert_eq!(info.filename, "clip.mp4");
        assert!((info.size_mb - 2048.0 / 1048576.0).abs() < f64::EPSILON);
    }
}

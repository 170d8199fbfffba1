//! Data carried between pipeline stages: remote video jobs, local media files
//! and the one-shot request handed to the compositor.

use crate::error::{PipelineError, Result};
use crate::logw;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Ready,
    Failed,
}

/// A video-generation request known to the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationJob {
    pub job_id: String,
    pub submitted_at: DateTime<Utc>,
    status: JobStatus,
    result_url: Option<String>,
}

impl GenerationJob {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            submitted_at: Utc::now(),
            status: JobStatus::Pending,
            result_url: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn result_url(&self) -> Option<&str> {
        self.result_url.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status != JobStatus::Pending
    }

    /// Record the result URL. The first non-empty URL wins; later calls with a
    /// different value are ignored.
    pub fn mark_ready(&mut self, url: &str) {
        let url = url.trim();
        if url.is_empty() {
            return;
        }
        match self.result_url.as_deref() {
            Some(existing) if existing != url => {
                logw(format!(
                    "Job {} already resolved to {}; ignoring {}",
                    self.job_id, existing, url
                ));
            }
            Some(_) => {}
            None => {
                self.result_url = Some(url.to_string());
                self.status = JobStatus::Ready;
            }
        }
    }

    pub fn mark_failed(&mut self) {
        if self.status == JobStatus::Pending {
            self.status = JobStatus::Failed;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
}

/// A media file on local storage, owned by whoever created it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAsset {
    pub local_path: PathBuf,
    pub kind: MediaKind,
    /// Seconds, once probed.
    pub duration: Option<f64>,
}

impl MediaAsset {
    pub fn new(local_path: impl Into<PathBuf>, kind: MediaKind) -> Self {
        Self {
            local_path: local_path.into(),
            kind,
            duration: None,
        }
    }

    pub fn audio(local_path: impl Into<PathBuf>) -> Self {
        Self::new(local_path, MediaKind::Audio)
    }

    pub fn video(local_path: impl Into<PathBuf>) -> Self {
        Self::new(local_path, MediaKind::Video)
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    pub fn path(&self) -> &Path {
        &self.local_path
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.local_path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Delete the file. Returns `false` when there was nothing to delete.
    pub async fn remove(&self) -> Result<bool> {
        match fs::remove_file(&self.local_path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(PipelineError::io(
                format!("Failed to remove {}", self.local_path.display()),
                err,
            )),
        }
    }
}

/// Inputs for one compositor pass. Consumed by `Compositor::compose`.
#[derive(Debug, Clone)]
pub struct CompositionSpec {
    pub video_asset: MediaAsset,
    pub audio_asset: MediaAsset,
    pub output_path: PathBuf,
}

impl CompositionSpec {
    pub fn new(
        video_asset: MediaAsset,
        audio_asset: MediaAsset,
        output_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        if video_asset.kind != MediaKind::Video {
            return Err(PipelineError::InvalidInput(format!(
                "{} is not a video asset",
                video_asset.local_path.display()
            )));
        }
        if audio_asset.kind != MediaKind::Audio {
            return Err(PipelineError::InvalidInput(format!(
                "{} is not an audio asset",
                audio_asset.local_path.display()
            )));
        }
        Ok(Self {
            video_asset,
            audio_asset,
            output_path: output_path.into(),
        })
    }
}

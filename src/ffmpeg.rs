use crate::config::Config;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

const STDERR_SNIPPET_CHARS: usize = 1200;

/// The two media primitives the compositor needs.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Container duration in seconds.
    async fn probe_duration(&self, path: &Path) -> Result<f64>;

    /// Run one ffmpeg invocation. `args` excludes the program name and the
    /// global `-y -hide_banner -loglevel error` flags.
    async fn render(&self, args: &[String]) -> Result<()>;
}

/// ffmpeg/ffprobe executables found on PATH or configured explicitly.
#[derive(Debug, Clone)]
pub struct SystemFfmpeg {
    ffmpeg: String,
    ffprobe: String,
}

impl Default for SystemFfmpeg {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl SystemFfmpeg {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.ffmpeg_path.clone(), cfg.ffprobe_path.clone())
    }
}

fn stderr_snippet(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let skip = text.chars().count().saturating_sub(STDERR_SNIPPET_CHARS);
    text.chars().skip(skip).collect()
}

pub(crate) fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
}

#[async_trait]
impl MediaToolkit for SystemFfmpeg {
    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PipelineError::media("ffprobe execution failed", e))?;

        let context = format!("ffprobe duration failed for {}", path.display());
        if !output.status.success() {
            return Err(PipelineError::media(context, stderr_snippet(&output.stderr)));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        parse_duration(&text)
            .ok_or_else(|| PipelineError::media(context, format!("invalid duration {:?}", text.trim())))
    }

    async fn render(&self, args: &[String]) -> Result<()> {
        let output = Command::new(&self.ffmpeg)
            .args(["-y", "-hide_banner", "-loglevel", "error"])
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PipelineError::media("ffmpeg execution failed", e))?;

        if !output.status.success() {
            return Err(PipelineError::media(
                format!("ffmpeg exited with status {:?}", output.status.code()),
                stderr_snippet(&output.stderr),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("3.250000\n"), Some(3.25));
        assert_eq!(parse_duration("N/A"), None);
        assert_eq!(parse_duration("0"), None);
        assert_eq!(parse_duration("-1"), None);
    }

    #[test]
    fn test_stderr_snippet_keeps_tail() {
        let long = format!("{}END", "x".repeat(5000));
        let snippet = stderr_snippet(long.as_bytes());
        assert!(snippet.ends_with("END"));
        assert_eq!(snippet.chars().count(), STDERR_SNIPPET_CHARS);
    }

    #[tokio::test]
    async fn test_missing_binary_is_media_error() {
        let toolkit = SystemFfmpeg::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        assert!(matches!(
            toolkit.probe_duration(Path::new("a.mp4")).await,
            Err(PipelineError::Media { .. })
        ));
        assert!(matches!(
            toolkit.render(&["-version".to_string()]).await,
            Err(PipelineError::Media { .. })
        ));
    }
}

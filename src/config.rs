use crate::error::{PipelineError, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

pub const ARIA_BASE_URL_ENV: &str = "ARIA_BASE_URL";
pub const ARIA_API_KEY_ENV: &str = "ARIA_API_KEY";
pub const ALLEGRO_BASE_URL_ENV: &str = "ALLEGRO_BASE_URL";
pub const ALLEGRO_API_KEY_ENV: &str = "ALLEGRO_API_KEY";
pub const OPENAI_BASE_URL_ENV: &str = "OPENAI_BASE_URL";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub aria_base_url: String,
    #[serde(default)]
    pub aria_api_key: String,
    #[serde(default = "default_allegro_base_url")]
    pub allegro_base_url: String,
    #[serde(default)]
    pub allegro_api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(rename = "open_api_key", alias = "openai_api_key", default)]
    pub openai_api_key: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_videos_dir")]
    pub videos_dir: PathBuf,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default)]
    pub poll: PollSettings,
}

/// Polling knobs for the video job. Seconds throughout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollSettings {
    #[serde(default = "default_initial_wait_secs")]
    pub initial_wait_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            initial_wait_secs: default_initial_wait_secs(),
            max_retries: default_max_retries(),
            wait_secs: default_wait_secs(),
        }
    }
}

fn default_allegro_base_url() -> String {
    "https://api.rhymes.ai/v1".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_videos_dir() -> PathBuf {
    PathBuf::from("videos")
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_http_timeout_secs() -> u64 {
    300
}

fn default_initial_wait_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    10
}

fn default_wait_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            aria_base_url: String::new(),
            aria_api_key: String::new(),
            allegro_base_url: default_allegro_base_url(),
            allegro_api_key: String::new(),
            openai_base_url: default_openai_base_url(),
            openai_api_key: String::new(),
            output_dir: default_output_dir(),
            videos_dir: default_videos_dir(),
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            http_timeout_secs: default_http_timeout_secs(),
            poll: PollSettings::default(),
        }
    }
}

impl Config {
    /// Read a JSON config file.
    pub async fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.as_ref().display()))?;
        Ok(config)
    }

    /// Read `path` when it exists (defaults otherwise), then apply `.env` and
    /// process environment overrides.
    pub async fn resolve<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let mut config = if fs::metadata(&path).await.is_ok() {
            Self::load(&path).await?
        } else {
            Self::default()
        };
        dotenv::dotenv().ok();
        config.apply_env_from(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Override fields from a key lookup. Empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let fields: [(&str, &mut String); 6] = [
            (ARIA_BASE_URL_ENV, &mut self.aria_base_url),
            (ARIA_API_KEY_ENV, &mut self.aria_api_key),
            (ALLEGRO_BASE_URL_ENV, &mut self.allegro_base_url),
            (ALLEGRO_API_KEY_ENV, &mut self.allegro_api_key),
            (OPENAI_BASE_URL_ENV, &mut self.openai_base_url),
            (OPENAI_API_KEY_ENV, &mut self.openai_api_key),
        ];
        for (key, slot) in fields {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = value.trim().to_string();
            }
        }
    }

    pub fn require_aria(&self) -> Result<()> {
        if self.aria_base_url.is_empty() {
            return Err(PipelineError::Config(format!("{} missing", ARIA_BASE_URL_ENV)));
        }
        if self.aria_api_key.is_empty() {
            return Err(PipelineError::Config(format!("{} missing", ARIA_API_KEY_ENV)));
        }
        Ok(())
    }

    pub fn require_openai(&self) -> Result<()> {
        if self.openai_api_key.is_empty() {
            return Err(PipelineError::Config(format!("{} missing", OPENAI_API_KEY_ENV)));
        }
        Ok(())
    }

    pub fn require_allegro(&self) -> Result<()> {
        if self.allegro_api_key.is_empty() {
            return Err(PipelineError::Config(format!("{} missing", ALLEGRO_API_KEY_ENV)));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.http_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.allegro_base_url, "https://api.rhymes.ai/v1");
        assert_eq!(cfg.openai_base_url, "https://api.openai.com/v1");
        assert_eq!(cfg.output_dir, PathBuf::from("output"));
        assert_eq!(cfg.videos_dir, PathBuf::from("videos"));
        assert_eq!(cfg.poll, PollSettings::default());
        assert_eq!(cfg.poll.max_retries, 10);
        assert_eq!(cfg.poll.wait_secs, 30);
        assert_eq!(cfg.poll.initial_wait_secs, 120);
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut cfg: Config = serde_json::from_str(
            r#"{"aria_api_key": "from-file", "open_api_key": "openai-file"}"#,
        )
        .unwrap();
        let env: HashMap<&str, &str> = [
            (ARIA_API_KEY_ENV, "from-env"),
            (ARIA_BASE_URL_ENV, "https://aria.example/v1"),
            (OPENAI_API_KEY_ENV, "  "),
        ]
        .into_iter()
        .collect();

        cfg.apply_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(cfg.aria_api_key, "from-env");
        assert_eq!(cfg.aria_base_url, "https://aria.example/v1");
        assert_eq!(cfg.openai_api_key, "openai-file");
    }

    #[test]
    fn test_partial_poll_settings_fill_defaults() {
        let cfg: Config = serde_json::from_str(r#"{"poll": {"max_retries": 5, "initial_wait_secs": 150}}"#)
            .unwrap();
        assert_eq!(cfg.poll.max_retries, 5);
        assert_eq!(cfg.poll.initial_wait_secs, 150);
        assert_eq!(cfg.poll.wait_secs, 30);
    }

    #[test]
    fn test_require_checks_only_named_service() {
        let mut cfg = Config::default();
        cfg.openai_api_key = "sk-test".to_string();
        assert!(cfg.require_openai().is_ok());
        assert!(matches!(cfg.require_aria(), Err(PipelineError::Config(_))));
        assert!(matches!(cfg.require_allegro(), Err(PipelineError::Config(_))));
    }

    #[tokio::test]
    async fn test_load_reads_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"allegro_api_key": "rk", "output_dir": "audio"}"#).unwrap();

        let cfg = Config::load(&path).await.unwrap();
        assert_eq!(cfg.allegro_api_key, "rk");
        assert_eq!(cfg.output_dir, PathBuf::from("audio"));
    }

    #[tokio::test]
    async fn test_load_missing_file_fails_with_path() {
        let err = Config::load("/definitely/not/here.json").await.unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }
}

use super::{build_http_client, endpoint, remote_status_error};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::logok;
use crate::media::MediaAsset;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;

pub const TTS_MODEL: &str = "tts-1";
pub const DEFAULT_SPEECH_FILENAME: &str = "speech.mp3";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    #[default]
    Onyx,
    Alloy,
    Echo,
    Fable,
    Nova,
    Shimmer,
}

impl Voice {
    pub const ALL: [Voice; 6] = [
        Voice::Onyx,
        Voice::Alloy,
        Voice::Echo,
        Voice::Fable,
        Voice::Nova,
        Voice::Shimmer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Onyx => "onyx",
            Voice::Alloy => "alloy",
            Voice::Echo => "echo",
            Voice::Fable => "fable",
            Voice::Nova => "nova",
            Voice::Shimmer => "shimmer",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Voice {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Voice::ALL
            .into_iter()
            .find(|v| v.as_str() == wanted)
            .ok_or_else(|| PipelineError::InvalidInput(format!("unknown voice: {}", s)))
    }
}

/// Text-to-speech client writing audio files into a managed directory.
pub struct SpeechClient {
    http: Client,
    base_url: String,
    api_key: String,
    output_dir: PathBuf,
}

impl SpeechClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(PipelineError::Config("OpenAI API key missing".to_string()));
        }
        Ok(Self {
            http: build_http_client(std::time::Duration::from_secs(300))?,
            base_url: base_url.into(),
            api_key,
            output_dir: output_dir.into(),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        cfg.require_openai()?;
        Ok(Self {
            http: build_http_client(cfg.http_timeout())?,
            base_url: cfg.openai_base_url.clone(),
            api_key: cfg.openai_api_key.clone(),
            output_dir: cfg.output_dir.clone(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Speak `text` with `voice` into `{output_dir}/{filename}`.
    ///
    /// Directory components of `filename` are dropped. The file is
    /// overwritten if it exists; callers running several
    /// pipelines at once must pass distinct filenames.
    pub async fn synthesize(&self, text: &str, voice: Voice, filename: &str) -> Result<MediaAsset> {
        if text.trim().is_empty() {
            return Err(PipelineError::InvalidInput("speech text is empty".to_string()));
        }
        let filename = Path::new(filename.trim())
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_SPEECH_FILENAME.to_string());

        let body = serde_json::json!({
            "model": TTS_MODEL,
            "voice": voice.as_str(),
            "input": text,
        });

        let context = "Failed to generate speech";
        let resp = self
            .http
            .post(endpoint(&self.base_url, "audio/speech"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::remote(context, e))?;

        if !resp.status().is_success() {
            return Err(remote_status_error(context, resp).await);
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| PipelineError::remote(context, e))?;

        fs::create_dir_all(&self.output_dir).await.map_err(|e| {
            PipelineError::io(
                format!("Failed to create dir {}", self.output_dir.display()),
                e,
            )
        })?;
        let out_path = self.output_dir.join(filename);
        fs::write(&out_path, &bytes)
            .await
            .map_err(|e| PipelineError::io(format!("Failed to write {}", out_path.display()), e))?;

        logok(format!(
            "Speech written: {} ({} bytes, voice {})",
            out_path.display(),
            bytes.len(),
            voice
        ));
        Ok(MediaAsset::audio(out_path))
    }
}

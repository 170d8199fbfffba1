use super::{build_http_client, endpoint, remote_status_error};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::{logi, logw};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const ARIA_MODEL: &str = "aria";
const STOP_SEQUENCE: &str = "<|im_end|>";
const TEMPERATURE: f64 = 0.6;
const TOP_P: f64 = 1.0;
const MAX_TOKENS: u32 = 1024;

pub const DEFAULT_TITLE: &str = "a beautiful theme";
pub const DEFAULT_TONE: &str = "reflective";
pub const DEFAULT_LANGUAGE: &str = "english";

/// Descriptive options for a poem. Everything but `title` and `tone` is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoemOptions {
    /// Subject of the poem. Defaults to "a beautiful theme".
    pub title: String,
    /// Defaults to "reflective".
    pub tone: String,
    pub style: Option<String>,
    pub keywords: Option<String>,
}

impl Default for PoemOptions {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            tone: DEFAULT_TONE.to_string(),
            style: None,
            keywords: None,
        }
    }
}

/// Everything needed to ask for one poem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoemRequest {
    pub options: PoemOptions,
    /// Number of verses, at least 1.
    pub verses: u32,
    /// Defaults to "english".
    pub language: String,
}

impl Default for PoemRequest {
    fn default() -> Self {
        Self {
            options: PoemOptions::default(),
            verses: 1,
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl PoemRequest {
    /// Flat form: a free-text style such as "sad heartbroken".
    pub fn from_style(style: impl Into<String>, verses: u32, language: impl Into<String>) -> Self {
        Self {
            options: PoemOptions {
                style: non_blank(Some(style.into())),
                ..PoemOptions::default()
            },
            verses: verses.max(1),
            language: non_blank(Some(language.into()))
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
        }
    }

    /// Structured form. Blank title/tone/language fall back to their defaults.
    pub fn from_options(options: PoemOptions, verses: u32, language: impl Into<String>) -> Self {
        let title = non_blank(Some(options.title)).unwrap_or_else(|| DEFAULT_TITLE.to_string());
        let tone = non_blank(Some(options.tone)).unwrap_or_else(|| DEFAULT_TONE.to_string());
        let language =
            non_blank(Some(language.into())).unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
        Self {
            options: PoemOptions {
                title,
                tone,
                style: non_blank(options.style),
                keywords: non_blank(options.keywords),
            },
            verses: verses.max(1),
            language,
        }
    }

    pub fn prompt(&self) -> String {
        let mut prompt = format!(
            "Write a short, {}-verse poem about {} in {} language.\nThe tone should be {}, with simple, evocative language.",
            self.verses, self.options.title, self.language, self.options.tone
        );
        if let Some(style) = &self.options.style {
            prompt.push_str(&format!("\nThe style should reflect {}.", style));
        }
        if let Some(keywords) = &self.options.keywords {
            prompt.push_str(&format!("\nUse the following keywords: {}", keywords));
        }
        prompt
    }
}

fn extract_completion_text(root: &serde_json::Value) -> Option<String> {
    let message = root.get("choices")?.as_array()?.first()?.get("message")?;
    match message.get("content")? {
        serde_json::Value::String(text) => Some(text.clone()),
        serde_json::Value::Array(parts) => {
            let text = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("");
            Some(text)
        }
        _ => None,
    }
}

/// Chat-completion client for the ARIA text model.
pub struct AriaClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl AriaClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(PipelineError::Config("ARIA API key missing".to_string()));
        }
        Ok(Self {
            http: build_http_client(std::time::Duration::from_secs(300))?,
            base_url: base_url.into(),
            api_key,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        cfg.require_aria()?;
        Ok(Self {
            http: build_http_client(cfg.http_timeout())?,
            base_url: cfg.aria_base_url.clone(),
            api_key: cfg.aria_api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Generate a poem. Returns the trimmed, non-empty completion text.
    pub async fn generate_poem(&self, request: &PoemRequest) -> Result<String> {
        logi(format!(
            "Generating {}-verse {} poem (tone: {})",
            request.verses, request.language, request.options.tone
        ));
        self.complete(&request.prompt(), "Failed to generate poem").await
    }

    /// Free-form completion for the assistant mode.
    pub async fn generate_text(&self, prompt: &str) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(PipelineError::InvalidInput("prompt is empty".to_string()));
        }
        self.complete(prompt, "Failed to generate text").await
    }

    async fn complete(&self, prompt: &str, context: &str) -> Result<String> {
        let body = json!({
            "model": ARIA_MODEL,
            "messages": [
                {
                    "role": "user",
                    "content": [{"type": "text", "text": prompt}],
                }
            ],
            "stop": [STOP_SEQUENCE],
            "stream": false,
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
            "top_p": TOP_P,
        });

        let resp = self
            .http
            .post(endpoint(&self.base_url, "chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::remote(context, e))?;

        if !resp.status().is_success() {
            let err = remote_status_error(context, resp).await;
            logw(err.to_string());
            return Err(err);
        }

        let root: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| PipelineError::remote(context, e))?;

        let text = extract_completion_text(&root)
            .map(|t| t.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(PipelineError::remote(context, "completion contained no text"));
        }
        Ok(text)
    }
}

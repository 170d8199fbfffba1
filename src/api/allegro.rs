//! Client for the Allegro text-to-video service.
//!
//! Generation is asynchronous: `submit` returns a job id immediately and the
//! result URL only shows up on the query endpoint minutes later. Submission
//! failures are fatal; query failures are folded into [`PollOutcome`] so the
//! poll loop can retry them.

use super::{build_http_client, endpoint, remote_status_error};
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::media::GenerationJob;
use crate::poll::{PollOutcome, PollPolicy, run_poll_loop};
use crate::{logi, logok};
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const DEFAULT_NUM_STEPS: u32 = 100;
pub const DEFAULT_CFG_SCALE: f64 = 7.5;
pub const DEFAULT_SEED: u64 = 100_000;

/// Sampling parameters sent with every submission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoParams {
    pub num_steps: u32,
    pub cfg_scale: f64,
    pub seed: u64,
}

impl Default for VideoParams {
    fn default() -> Self {
        Self {
            num_steps: DEFAULT_NUM_STEPS,
            cfg_scale: DEFAULT_CFG_SCALE,
            seed: DEFAULT_SEED,
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    refined_prompt: &'a str,
    num_step: u32,
    cfg_scale: f64,
    user_prompt: &'a str,
    rand_seed: u64,
}

#[derive(Debug, Deserialize)]
struct DataResponse {
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl DataResponse {
    fn data_text(&self) -> Option<String> {
        match self.data.as_ref()? {
            serde_json::Value::String(s) => Some(s.trim().to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
        .filter(|s| !s.is_empty())
    }
}

pub struct AllegroClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl AllegroClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(PipelineError::Config("Allegro API key missing".to_string()));
        }
        Ok(Self {
            http: build_http_client(std::time::Duration::from_secs(60))?,
            base_url: base_url.into(),
            api_key,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        cfg.require_allegro()?;
        Ok(Self {
            http: build_http_client(cfg.http_timeout())?,
            base_url: cfg.allegro_base_url.clone(),
            api_key: cfg.allegro_api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Submit a generation job. Any failure here is final: no job exists.
    pub async fn submit(&self, prompt: &str, params: &VideoParams) -> Result<GenerationJob> {
        if prompt.trim().is_empty() {
            return Err(PipelineError::InvalidInput("video prompt is empty".to_string()));
        }

        let context = "Failed to generate video";
        let body = GenerateRequest {
            refined_prompt: prompt,
            num_step: params.num_steps,
            cfg_scale: params.cfg_scale,
            user_prompt: prompt,
            rand_seed: params.seed,
        };

        let resp = self
            .http
            .post(endpoint(&self.base_url, "generateVideoSyn"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::remote(context, e))?;

        if !resp.status().is_success() {
            return Err(remote_status_error(context, resp).await);
        }

        let parsed: DataResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::remote(context, e))?;
        let job_id = parsed
            .data_text()
            .ok_or_else(|| PipelineError::remote(context, "response carried no request id"))?;

        logok(format!("Video generation started with request ID: {}", job_id));
        Ok(GenerationJob::new(job_id))
    }

    /// One status query. Never fails; faults come back as `TransientError`.
    pub async fn query(&self, job_id: &str) -> PollOutcome {
        let resp = match self
            .http
            .get(endpoint(&self.base_url, "videoQuery"))
            .bearer_auth(&self.api_key)
            .query(&[("requestId", job_id)])
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => return PollOutcome::TransientError(err.to_string()),
        };

        if !resp.status().is_success() {
            return PollOutcome::TransientError(
                remote_status_error("Video query failed", resp).await.to_string(),
            );
        }

        match resp.json::<DataResponse>().await {
            Ok(parsed) => match parsed.data_text() {
                Some(url) => PollOutcome::Ready(url),
                None => PollOutcome::Empty,
            },
            Err(err) => PollOutcome::TransientError(format!("malformed query response: {}", err)),
        }
    }

    /// Run the poll loop for an already-submitted job and record the result on it.
    pub async fn poll_until_ready(
        &self,
        job: &mut GenerationJob,
        policy: &PollPolicy,
        cancel: &CancelToken,
    ) -> Result<String> {
        if let Some(url) = job.result_url() {
            return Ok(url.to_string());
        }

        let job_id = job.job_id.as_str();
        let outcome = run_poll_loop(job_id, policy, cancel, move |_| self.query(job_id)).await;
        match outcome {
            Ok(url) => {
                job.mark_ready(&url);
                Ok(url)
            }
            Err(err) => {
                if err.is_retry_exhausted() {
                    job.mark_failed();
                }
                Err(err)
            }
        }
    }

    /// Submit, then optionally wait out the grace period and poll.
    ///
    /// With `wait == false` the job comes back pending and the URL is `None`;
    /// the caller can poll later with [`AllegroClient::poll_until_ready`].
    pub async fn create_and_wait(
        &self,
        prompt: &str,
        params: &VideoParams,
        policy: &PollPolicy,
        cancel: &CancelToken,
        wait: bool,
    ) -> Result<(GenerationJob, Option<String>)> {
        let mut job = self.submit(prompt, params).await?;
        if !wait {
            return Ok((job, None));
        }

        if !policy.initial_wait.is_zero() {
            logi(format!(
                "Waiting {} seconds for initial processing...",
                policy.initial_wait.as_secs()
            ));
            cancel.sleep(policy.initial_wait).await?;
        }

        let url = self.poll_until_ready(&mut job, policy, cancel).await?;
        Ok((job, Some(url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = VideoParams::default();
        assert_eq!(params.num_steps, 100);
        assert_eq!(params.cfg_scale, 7.5);
        assert_eq!(params.seed, 100_000);
    }

    #[test]
    fn test_request_body_shape() {
        let body = GenerateRequest {
            refined_prompt: "sea",
            num_step: 100,
            cfg_scale: 7.5,
            user_prompt: "sea",
            rand_seed: 100_000,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "refined_prompt": "sea",
                "num_step": 100,
                "cfg_scale": 7.5,
                "user_prompt": "sea",
                "rand_seed": 100000
            })
        );
    }

    #[test]
    fn test_data_text_variants() {
        let parse = |s: &str| serde_json::from_str::<DataResponse>(s).unwrap().data_text();
        assert_eq!(parse(r#"{"data": "abc"}"#).as_deref(), Some("abc"));
        assert_eq!(parse(r#"{"data": "  "}"#), None);
        assert_eq!(parse(r#"{"data": null}"#), None);
        assert_eq!(parse(r#"{}"#), None);
        assert_eq!(parse(r#"{"data": 42}"#).as_deref(), Some("42"));
    }

    #[test]
    fn test_new_rejects_empty_key() {
        assert!(AllegroClient::new("https://api.rhymes.ai/v1", "").is_err());
    }
}

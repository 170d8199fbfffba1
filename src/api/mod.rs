pub mod allegro;
pub mod aria;
pub mod speech;

use crate::error::{PipelineError, Result};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ERROR_SNIPPET_CHARS: usize = 800;

pub(crate) fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| PipelineError::remote("Failed to build HTTP client", e))
}

/// Join a base URL and an endpoint path without doubling the slash.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Turn a non-2xx response into a `Remote` error carrying status and body.
pub(crate) async fn remote_status_error(context: &str, resp: reqwest::Response) -> PipelineError {
    let status = resp.status();
    let raw = resp.text().await.unwrap_or_default();
    let snippet = raw.chars().take(ERROR_SNIPPET_CHARS).collect::<String>();
    if snippet.is_empty() {
        PipelineError::remote(context, format!("HTTP {}", status.as_u16()))
    } else {
        PipelineError::remote(context, format!("HTTP {}: {}", status.as_u16(), snippet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_cleanly() {
        assert_eq!(endpoint("https://a.b/v1/", "/chat/completions"), "https://a.b/v1/chat/completions");
        assert_eq!(endpoint("https://a.b/v1", "videoQuery"), "https://a.b/v1/videoQuery");
    }
}

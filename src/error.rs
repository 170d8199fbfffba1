use std::io;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors surfaced by the pipeline stages.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// HTTP failure, non-2xx status, network fault or malformed response body.
    #[error("{context}: {message}")]
    Remote { context: String, message: String },

    /// The poll loop used every attempt without the job becoming ready.
    #[error("video job {job_id} not ready after {attempts} attempts")]
    RetryExhausted { job_id: String, attempts: u32 },

    #[error("{context}: {source}")]
    LocalIo {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("operation cancelled")]
    Cancelled,

    /// ffmpeg/ffprobe failed or produced unusable output.
    #[error("{context}: {message}")]
    Media { context: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl PipelineError {
    pub fn remote(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Remote {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::LocalIo {
            context: context.into(),
            source,
        }
    }

    pub fn media(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Media {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display_includes_context() {
        let err = PipelineError::remote("Failed to generate poem", "HTTP 502");
        assert_eq!(err.to_string(), "Failed to generate poem: HTTP 502");
    }

    #[test]
    fn test_retry_exhausted_display() {
        let err = PipelineError::RetryExhausted {
            job_id: "abc".to_string(),
            attempts: 10,
        };
        assert_eq!(err.to_string(), "video job abc not ready after 10 attempts");
        assert!(err.is_retry_exhausted());
    }

    #[test]
    fn test_io_error_keeps_source() {
        let err = PipelineError::io(
            "Failed to write audio",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().starts_with("Failed to write audio"));
    }
}

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::logi;
use std::path::Path;
use tokio::fs;

pub async fn ensure_directories(cfg: &Config) -> Result<()> {
    for dir in [&cfg.output_dir, &cfg.videos_dir] {
        if !Path::new(dir).exists() {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| PipelineError::io(format!("Failed to create {}", dir.display()), e))?;
            logi(format!("Created directory: {}", dir.display()));
        }
    }
    Ok(())
}

pub async fn check_ffmpeg(ffmpeg_path: &str) -> bool {
    match tokio::process::Command::new(ffmpeg_path)
        .arg("-version")
        .output()
        .await
    {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

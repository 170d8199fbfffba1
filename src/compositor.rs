//! Lays a looping visual under an audio track.
//!
//! The source clip is played forward then backward, and that pair is repeated
//! until it covers the audio. Reversed playback meets the forward clip on the
//! same frame, so the loop boundary has no visible jump. The result is cut to
//! the audio's exact length; audio shorter than one pair cuts mid-clip.
//!
//! Intermediate files live in a scoped temporary directory that is removed on
//! every exit path, and ffmpeg children are killed if the future is dropped.

use crate::error::{PipelineError, Result};
use crate::ffmpeg::MediaToolkit;
use crate::media::CompositionSpec;
use crate::{logi, logok, logw};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
pub const DEFAULT_OUTPUT_NAME: &str = "final_video.mp4";
const LOOP_UNIT_NAME: &str = "loop_unit.mp4";

/// How many forward+reverse units are needed to cover the audio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopPlan {
    pub clip_duration: f64,
    /// Forward plus reversed copy: twice the clip.
    pub unit_duration: f64,
    pub repeats: u32,
    pub target_duration: f64,
}

impl LoopPlan {
    pub fn new(clip_duration: f64, target_duration: f64) -> Result<Self> {
        if !(clip_duration.is_finite() && clip_duration > 0.0) {
            return Err(PipelineError::InvalidInput(format!(
                "video duration must be positive, got {}",
                clip_duration
            )));
        }
        if !(target_duration.is_finite() && target_duration > 0.0) {
            return Err(PipelineError::InvalidInput(format!(
                "audio duration must be positive, got {}",
                target_duration
            )));
        }

        let unit_duration = clip_duration * 2.0;
        let repeats = ((target_duration / unit_duration).ceil() as u32).max(1);
        Ok(Self {
            clip_duration,
            unit_duration,
            repeats,
            target_duration,
        })
    }

    /// Length of the untrimmed concatenation; always >= `target_duration`.
    pub fn covered_duration(&self) -> f64 {
        self.unit_duration * self.repeats as f64
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

/// ffmpeg arguments for `[forward, reversed]` rendered into `unit_out`.
pub fn loop_unit_args(video_in: &Path, unit_out: &Path, video_codec: &str) -> Vec<String> {
    vec![
        "-i".to_string(),
        path_arg(video_in),
        "-filter_complex".to_string(),
        "[0:v]split=2[fwd][src];[src]reverse[rev];[fwd][rev]concat=n=2:v=1:a=0[v]".to_string(),
        "-map".to_string(),
        "[v]".to_string(),
        "-an".to_string(),
        "-c:v".to_string(),
        video_codec.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        path_arg(unit_out),
    ]
}

/// ffmpeg arguments repeating `unit_in`, trimming to the audio length and
/// attaching `audio_in` unchanged.
pub fn final_mux_args(
    plan: &LoopPlan,
    unit_in: &Path,
    audio_in: &Path,
    out: &Path,
    video_codec: &str,
) -> Vec<String> {
    vec![
        "-stream_loop".to_string(),
        (plan.repeats - 1).to_string(),
        "-i".to_string(),
        path_arg(unit_in),
        "-i".to_string(),
        path_arg(audio_in),
        "-filter_complex".to_string(),
        format!(
            "[0:v]trim=duration={:.3},setpts=PTS-STARTPTS[v]",
            plan.target_duration
        ),
        "-map".to_string(),
        "[v]".to_string(),
        "-map".to_string(),
        "1:a:0".to_string(),
        "-c:v".to_string(),
        video_codec.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-c:a".to_string(),
        "copy".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        path_arg(out),
    ]
}

pub struct Compositor {
    toolkit: Arc<dyn MediaToolkit>,
    video_codec: String,
    work_root: Option<PathBuf>,
}

impl Compositor {
    pub fn new(toolkit: Arc<dyn MediaToolkit>) -> Self {
        Self {
            toolkit,
            video_codec: DEFAULT_VIDEO_CODEC.to_string(),
            work_root: None,
        }
    }

    pub fn with_video_codec(mut self, codec: impl Into<String>) -> Self {
        self.video_codec = codec.into();
        self
    }

    /// Parent for the scratch directory; the system temp dir by default.
    pub fn with_work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(root.into());
        self
    }

    /// Default destination when the caller names none.
    pub fn default_output_path() -> PathBuf {
        std::env::temp_dir().join(DEFAULT_OUTPUT_NAME)
    }

    pub async fn plan(&self, spec: &CompositionSpec) -> Result<LoopPlan> {
        let clip = match spec.video_asset.duration {
            Some(d) => d,
            None => self.toolkit.probe_duration(spec.video_asset.path()).await?,
        };
        let audio = match spec.audio_asset.duration {
            Some(d) => d,
            None => self.toolkit.probe_duration(spec.audio_asset.path()).await?,
        };
        LoopPlan::new(clip, audio)
    }

    /// Render `spec` and return the output path.
    pub async fn compose(&self, spec: CompositionSpec) -> Result<PathBuf> {
        let plan = self.plan(&spec).await?;
        logi(format!(
            "Composing: clip {:.2}s, unit {:.2}s x{} -> {:.2}s (audio {:.2}s)",
            plan.clip_duration,
            plan.unit_duration,
            plan.repeats,
            plan.covered_duration(),
            plan.target_duration
        ));

        let workspace = self.workspace()?;
        let unit_path = workspace.path().join(LOOP_UNIT_NAME);

        self.toolkit
            .render(&loop_unit_args(
                spec.video_asset.path(),
                &unit_path,
                &self.video_codec,
            ))
            .await?;

        if let Some(parent) = spec.output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                PipelineError::io(format!("Failed to create dir {}", parent.display()), e)
            })?;
        }

        self.toolkit
            .render(&final_mux_args(
                &plan,
                &unit_path,
                spec.audio_asset.path(),
                &spec.output_path,
                &self.video_codec,
            ))
            .await?;

        if let Err(err) = workspace.close() {
            logw(format!("Failed to remove compositor scratch dir: {}", err));
        }

        logok(format!("Final video written: {}", spec.output_path.display()));
        Ok(spec.output_path)
    }

    fn workspace(&self) -> Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pulse-prism-");
        let dir = match &self.work_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        dir.map_err(|e| PipelineError::io("Failed to create compositor scratch dir", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_covers_target() {
        let plan = LoopPlan::new(4.0, 19.0).unwrap();
        assert_eq!(plan.unit_duration, 8.0);
        assert_eq!(plan.repeats, 3);
        assert!(plan.covered_duration() >= plan.target_duration);
    }

    #[test]
    fn test_plan_exact_multiple_needs_no_extra_unit() {
        let plan = LoopPlan::new(5.0, 20.0).unwrap();
        assert_eq!(plan.repeats, 2);
        assert_eq!(plan.covered_duration(), 20.0);
    }

    #[test]
    fn test_plan_short_audio_uses_one_unit() {
        let plan = LoopPlan::new(6.0, 2.5).unwrap();
        assert_eq!(plan.repeats, 1);
        assert!(plan.covered_duration() > plan.target_duration);
    }

    #[test]
    fn test_plan_rejects_non_positive_durations() {
        assert!(LoopPlan::new(0.0, 10.0).is_err());
        assert!(LoopPlan::new(3.0, -1.0).is_err());
        assert!(LoopPlan::new(f64::NAN, 10.0).is_err());
    }

    #[test]
    fn test_final_args_loop_and_trim() {
        let plan = LoopPlan::new(4.0, 19.0).unwrap();
        let args = final_mux_args(
            &plan,
            Path::new("/tmp/unit.mp4"),
            Path::new("speech.mp3"),
            Path::new("out.mp4"),
            "libx264",
        );
        assert_eq!(args[0], "-stream_loop");
        assert_eq!(args[1], "2");
        assert!(args.contains(&"[0:v]trim=duration=19.000,setpts=PTS-STARTPTS[v]".to_string()));
        let copy_at = args.iter().position(|a| a == "-c:a").unwrap();
        assert_eq!(args[copy_at + 1], "copy");
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn test_unit_args_reverse_and_drop_audio() {
        let args = loop_unit_args(Path::new("in.mp4"), Path::new("unit.mp4"), "mpeg4");
        assert!(args.iter().any(|a| a.contains("reverse") && a.contains("concat=n=2")));
        assert!(args.contains(&"-an".to_string()));
        assert!(args.contains(&"mpeg4".to_string()));
    }
}

use crate::api::allegro::{AllegroClient, VideoParams};
use crate::api::aria::{AriaClient, PoemRequest};
use crate::api::speech::{SpeechClient, Voice};
use crate::cancel::CancelToken;
use crate::compositor::Compositor;
use crate::config::Config;
use crate::download::VideoDownloader;
use crate::error::{PipelineError, Result};
use crate::ffmpeg::SystemFfmpeg;
use crate::media::{CompositionSpec, GenerationJob, MediaAsset};
use crate::poll::PollPolicy;
use crate::{logi, logok, logw};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use walkdir::WalkDir;

pub const POEM_AUDIO_STEM: &str = "generated_poem";
pub const POEM_VIDEO_STEM: &str = "poetry_background";
pub const CUSTOM_AUDIO_STEM: &str = "custom_audio";
pub const CUSTOM_VIDEO_STEM: &str = "custom_video";
pub const FINAL_VIDEO_STEM: &str = "final_poetry_video";

static UNSAFE_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid filename regex"));

/// `{timestamp}-{6 hex digits}`, unique enough to keep concurrent runs apart.
pub fn new_run_id() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    format!("{}-{:06x}", chrono::Local::now().format("%Y%m%d-%H%M%S"), suffix)
}

/// `{stem}-{run_id}.{ext}` with anything outside `[A-Za-z0-9._-]` replaced.
pub fn qualified_filename(stem: &str, run_id: &str, ext: &str) -> String {
    let raw = format!("{}-{}.{}", stem, run_id, ext.trim_start_matches('.'));
    UNSAFE_FILENAME_CHARS.replace_all(&raw, "_").into_owned()
}

pub fn default_video_prompt(poem: &str) -> String {
    format!(
        "A serene natural scene with gentle movements, perfect for poetry background \n the poetry is {}",
        poem
    )
}

/// State of one pipeline run. Created fresh per run and handed to each stage.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub run_id: String,
    pub poem: Option<String>,
    pub audio: Option<MediaAsset>,
    pub job: Option<GenerationJob>,
    pub video: Option<MediaAsset>,
    pub final_video: Option<MediaAsset>,
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineContext {
    pub fn new() -> Self {
        Self::with_run_id(new_run_id())
    }

    pub fn with_run_id(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            poem: None,
            audio: None,
            job: None,
            video: None,
            final_video: None,
        }
    }

    /// Composite destination used when the caller names none:
    /// `<temp dir>/final_poetry_video-{run_id}.mp4`.
    pub fn default_final_path(&self) -> PathBuf {
        std::env::temp_dir().join(qualified_filename(FINAL_VIDEO_STEM, &self.run_id, "mp4"))
    }

    /// Delete every file this run produced and forget them. Returns how many
    /// files were actually removed.
    pub async fn cleanup(&mut self) -> Result<usize> {
        let mut removed = 0;
        for slot in [&mut self.audio, &mut self.video, &mut self.final_video] {
            if let Some(asset) = slot.take() {
                if asset.remove().await? {
                    removed += 1;
                }
            }
        }
        self.poem = None;
        self.job = None;
        Ok(removed)
    }
}

#[derive(Debug, Clone)]
pub struct PoetryRunRequest {
    pub poem: PoemRequest,
    pub voice: Voice,
    /// Derived from the poem when `None`.
    pub video_prompt: Option<String>,
    pub video_params: VideoParams,
    /// [`PipelineContext::default_final_path`] when `None`.
    pub output_path: Option<PathBuf>,
}

impl PoetryRunRequest {
    pub fn new(poem: PoemRequest) -> Self {
        Self {
            poem,
            voice: Voice::default(),
            video_prompt: None,
            video_params: VideoParams::default(),
            output_path: None,
        }
    }
}

/// User-supplied narration plus a free video prompt; nothing is composited.
#[derive(Debug, Clone)]
pub struct CustomRunRequest {
    pub text: String,
    pub voice: Voice,
    pub video_prompt: Option<String>,
    pub video_params: VideoParams,
}

/// Sequences poem -> audio -> video job -> download -> composite.
pub struct Pipeline {
    aria: Option<AriaClient>,
    speech: SpeechClient,
    video: AllegroClient,
    downloader: VideoDownloader,
    compositor: Compositor,
    policy: PollPolicy,
    cancel: CancelToken,
}

impl Pipeline {
    pub fn new(
        speech: SpeechClient,
        video: AllegroClient,
        downloader: VideoDownloader,
        compositor: Compositor,
    ) -> Self {
        Self {
            aria: None,
            speech,
            video,
            downloader,
            compositor,
            policy: PollPolicy::default(),
            cancel: CancelToken::new(),
        }
    }

    /// Build every stage from configuration. The text client is optional so
    /// that the custom-text flow runs without ARIA credentials.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let aria = match cfg.require_aria() {
            Ok(()) => Some(AriaClient::from_config(cfg)?),
            Err(_) => None,
        };
        let compositor = Compositor::new(Arc::new(SystemFfmpeg::from_config(cfg)));
        Ok(Self::new(
            SpeechClient::from_config(cfg)?,
            AllegroClient::from_config(cfg)?,
            VideoDownloader::from_config(cfg)?,
            compositor,
        )
        .with_policy(PollPolicy::from(&cfg.poll))
        .with_aria_opt(aria))
    }

    pub fn with_aria(self, aria: AriaClient) -> Self {
        self.with_aria_opt(Some(aria))
    }

    fn with_aria_opt(mut self, aria: Option<AriaClient>) -> Self {
        self.aria = aria;
        self
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    pub async fn write_poem(&self, ctx: &mut PipelineContext, request: &PoemRequest) -> Result<String> {
        self.cancel.check()?;
        let aria = self.aria.as_ref().ok_or_else(|| {
            PipelineError::Config("ARIA text generation is not configured".to_string())
        })?;
        let poem = aria.generate_poem(request).await?;
        logok(format!("Poetry generated ({} chars)", poem.chars().count()));
        ctx.poem = Some(poem.clone());
        Ok(poem)
    }

    /// Speak the context's poem.
    pub async fn speak_poem(&self, ctx: &mut PipelineContext, voice: Voice) -> Result<MediaAsset> {
        let poem = ctx
            .poem
            .clone()
            .ok_or_else(|| PipelineError::InvalidInput("generate a poem first".to_string()))?;
        self.speak(ctx, &poem, voice, POEM_AUDIO_STEM).await
    }

    pub async fn speak(
        &self,
        ctx: &mut PipelineContext,
        text: &str,
        voice: Voice,
        stem: &str,
    ) -> Result<MediaAsset> {
        self.cancel.check()?;
        let filename = qualified_filename(stem, &ctx.run_id, "mp3");
        let audio = self.speech.synthesize(text, voice, &filename).await?;
        ctx.audio = Some(audio.clone());
        Ok(audio)
    }

    /// Submit, wait for and download the background video.
    pub async fn generate_video(
        &self,
        ctx: &mut PipelineContext,
        prompt: &str,
        params: &VideoParams,
        stem: &str,
    ) -> Result<MediaAsset> {
        self.cancel.check()?;
        let (job, url) = self
            .video
            .create_and_wait(prompt, params, &self.policy, &self.cancel, true)
            .await?;
        ctx.job = Some(job);
        let url = url.ok_or_else(|| PipelineError::remote("Video generation", "no result URL"))?;

        self.cancel.check()?;
        let filename = qualified_filename(stem, &ctx.run_id, "mp4");
        let video = self.downloader.fetch(&url, Some(&filename)).await?;
        ctx.video = Some(video.clone());
        Ok(video)
    }

    /// Composite the context's video under its audio.
    pub async fn compose(&self, ctx: &mut PipelineContext, output_path: Option<&Path>) -> Result<MediaAsset> {
        self.cancel.check()?;
        let (video, audio) = match (&ctx.video, &ctx.audio) {
            (Some(v), Some(a)) => (v.clone(), a.clone()),
            _ => {
                return Err(PipelineError::InvalidInput(
                    "generate video and audio first".to_string(),
                ));
            }
        };
        let output = output_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| ctx.default_final_path());

        let mut spec = CompositionSpec::new(video, audio, output)?;
        let plan = self.compositor.plan(&spec).await?;
        spec.video_asset.duration = Some(plan.clip_duration);
        spec.audio_asset.duration = Some(plan.target_duration);
        if let Some(a) = ctx.audio.as_mut() {
            a.duration = Some(plan.target_duration);
        }
        if let Some(v) = ctx.video.as_mut() {
            v.duration = Some(plan.clip_duration);
        }

        let out = self.compositor.compose(spec).await?;
        let final_video = MediaAsset::video(out).with_duration(plan.target_duration);
        ctx.final_video = Some(final_video.clone());
        Ok(final_video)
    }

    /// Full poetry flow. Partial results stay in `ctx` on failure so the
    /// caller can inspect or clean them up; nothing is resumed.
    pub async fn run_poetry(&self, ctx: &mut PipelineContext, request: &PoetryRunRequest) -> Result<MediaAsset> {
        logi(format!("=== Poetry run {} ===", ctx.run_id));
        let poem = self.write_poem(ctx, &request.poem).await?;
        self.speak_poem(ctx, request.voice).await?;

        let prompt = request
            .video_prompt
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| default_video_prompt(&poem));
        self.generate_video(ctx, &prompt, &request.video_params, POEM_VIDEO_STEM)
            .await?;

        let final_video = self.compose(ctx, request.output_path.as_deref()).await?;
        logok(format!("DONE: {}", final_video.local_path.display()));
        Ok(final_video)
    }

    /// Custom flow: speak user text and, when a prompt is given, fetch a video.
    pub async fn run_custom(&self, ctx: &mut PipelineContext, request: &CustomRunRequest) -> Result<()> {
        logi(format!("=== Custom run {} ===", ctx.run_id));
        self.speak(ctx, &request.text, request.voice, CUSTOM_AUDIO_STEM)
            .await?;
        match request.video_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(prompt) => {
                self.generate_video(ctx, prompt, &request.video_params, CUSTOM_VIDEO_STEM)
                    .await?;
            }
            None => logi("No video prompt; audio only."),
        }
        Ok(())
    }
}

/// Remove every file below each directory, keeping the directories. Returns
/// the number of files removed.
pub async fn purge_directories(dirs: &[&Path]) -> Result<usize> {
    let mut removed = 0;
    for dir in dirs {
        if !dir.is_dir() {
            continue;
        }
        for entry in WalkDir::new(dir).min_depth(1).contents_first(true) {
            let entry = entry.map_err(|e| {
                PipelineError::io(
                    format!("Failed to walk {}", dir.display()),
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("filesystem loop")),
                )
            })?;
            let path = entry.path();
            if entry.file_type().is_dir() {
                if let Err(err) = fs::remove_dir(path).await {
                    logw(format!("Could not remove {}: {}", path.display(), err));
                }
            } else {
                fs::remove_file(path)
                    .await
                    .map_err(|e| PipelineError::io(format!("Failed to remove {}", path.display()), e))?;
                removed += 1;
            }
        }
    }
    Ok(removed)
}

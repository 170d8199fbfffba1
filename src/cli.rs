use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use pulse_prism::CancelToken;
use pulse_prism::api::allegro::{AllegroClient, VideoParams};
use pulse_prism::api::aria::{AriaClient, PoemOptions, PoemRequest};
use pulse_prism::api::speech::{SpeechClient, Voice};
use pulse_prism::compositor::Compositor;
use pulse_prism::config::Config;
use pulse_prism::download::VideoDownloader;
use pulse_prism::ffmpeg::SystemFfmpeg;
use pulse_prism::init;
use pulse_prism::media::{CompositionSpec, GenerationJob, MediaAsset};
use pulse_prism::pipeline::{
    self, CustomRunRequest, FINAL_VIDEO_STEM, Pipeline, PipelineContext, PoetryRunRequest,
};
use pulse_prism::poll::{PollOutcome, PollPolicy};

#[derive(Parser, Debug)]
#[command(name = "pulse-prism", version, about = "Poem, voice and video in one pipeline")]
struct Cli {
    /// JSON config file; environment variables override it.
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a poem and print it.
    Poem(PoemArgs),
    /// Ask the text model anything.
    Ask { prompt: String },
    /// Turn text into speech.
    Speak {
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        text: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long, default_value = "onyx", value_parser = parse_voice)]
        voice: Voice,
        #[arg(long, default_value = "speech.mp3")]
        out: String,
    },
    /// Video generation jobs.
    #[command(subcommand)]
    Video(VideoCommand),
    /// Download a finished video.
    Download {
        url: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Loop a video forward and backward under an audio track.
    Compose {
        video: PathBuf,
        audio: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Poem -> speech -> video -> final composite.
    Run {
        #[command(flatten)]
        poem: PoemArgs,
        #[arg(long, default_value = "onyx", value_parser = parse_voice)]
        voice: Voice,
        /// Video prompt; derived from the poem when omitted.
        #[arg(long)]
        prompt: Option<String>,
        #[arg(long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        video: VideoArgs,
        /// Remove intermediate audio and video once the composite exists.
        #[arg(long)]
        clean: bool,
    },
    /// Speak your own text and optionally fetch a matching video.
    Custom {
        #[arg(long)]
        text: String,
        #[arg(long, default_value = "onyx", value_parser = parse_voice)]
        voice: Voice,
        #[arg(long)]
        prompt: Option<String>,
        #[command(flatten)]
        video: VideoArgs,
    },
    /// Delete every file in the output and videos directories.
    Clean,
}

#[derive(Subcommand, Debug)]
enum VideoCommand {
    /// Submit a job and print its id.
    Submit {
        prompt: String,
        #[command(flatten)]
        video: VideoArgs,
    },
    /// Query a job once.
    Status { job_id: String },
    /// Poll a previously submitted job until it is ready.
    Wait {
        job_id: String,
        #[command(flatten)]
        video: VideoArgs,
    },
    /// Submit and (unless --no-wait) wait for the result URL.
    Create {
        prompt: String,
        #[arg(long)]
        no_wait: bool,
        #[command(flatten)]
        video: VideoArgs,
    },
}

#[derive(Args, Debug, Clone)]
struct PoemArgs {
    /// Free-text style, e.g. "sad", "romantic", "spiritual".
    #[arg(long)]
    style: Option<String>,
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..=5))]
    verses: u32,
    #[arg(long, default_value = "english")]
    language: String,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    tone: Option<String>,
    #[arg(long)]
    keywords: Option<String>,
}

impl PoemArgs {
    fn to_request(&self) -> PoemRequest {
        let defaults = PoemOptions::default();
        PoemRequest::from_options(
            PoemOptions {
                title: self.title.clone().unwrap_or(defaults.title),
                tone: self.tone.clone().unwrap_or(defaults.tone),
                style: self.style.clone(),
                keywords: self.keywords.clone(),
            },
            self.verses,
            self.language.clone(),
        )
    }
}

#[derive(Args, Debug, Clone, Default)]
struct VideoArgs {
    #[arg(long)]
    steps: Option<u32>,
    #[arg(long)]
    cfg_scale: Option<f64>,
    #[arg(long)]
    seed: Option<u64>,
    /// Override the configured grace period (seconds).
    #[arg(long)]
    initial_wait: Option<u64>,
    #[arg(long)]
    max_retries: Option<u32>,
    /// Seconds between polls.
    #[arg(long)]
    wait: Option<u64>,
}

impl VideoArgs {
    fn params(&self) -> VideoParams {
        let defaults = VideoParams::default();
        VideoParams {
            num_steps: self.steps.unwrap_or(defaults.num_steps),
            cfg_scale: self.cfg_scale.unwrap_or(defaults.cfg_scale),
            seed: self.seed.unwrap_or(defaults.seed),
        }
    }

    fn policy(&self, cfg: &Config) -> PollPolicy {
        let base = PollPolicy::from(&cfg.poll);
        PollPolicy::new(
            self.initial_wait.map(Duration::from_secs).unwrap_or(base.initial_wait),
            self.max_retries.unwrap_or(base.max_retries),
            self.wait.map(Duration::from_secs).unwrap_or(base.wait_time),
        )
    }
}

fn parse_voice(s: &str) -> std::result::Result<Voice, String> {
    s.parse::<Voice>().map_err(|e| e.to_string())
}

fn cancel_on_ctrl_c() -> CancelToken {
    let token = CancelToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Ctrl-C received, cancelling");
            trigger.cancel();
        }
    });
    token
}

fn download_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏ "),
    );
    pb
}

async fn download_with_bar(downloader: &VideoDownloader, url: &str, name: Option<&str>) -> Result<MediaAsset> {
    let pb = download_bar();
    let asset = downloader
        .fetch_with_progress(url, name, |p| {
            if let Some(total) = p.total {
                pb.set_length(total);
            }
            pb.set_position(p.written);
        })
        .await?;
    pb.finish_and_clear();
    Ok(asset)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::resolve(&cli.config).await?;
    init::ensure_directories(&cfg).await?;

    match cli.command {
        Command::Poem(args) => {
            let aria = AriaClient::from_config(&cfg)?;
            let poem = aria.generate_poem(&args.to_request()).await?;
            println!("{}", poem);
        }
        Command::Ask { prompt } => {
            let aria = AriaClient::from_config(&cfg)?;
            println!("{}", aria.generate_text(&prompt).await?);
        }
        Command::Speak { text, file, voice, out } => {
            let text = match (text, file) {
                (Some(text), _) => text,
                (None, Some(path)) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => anyhow::bail!("--text or --file is required"),
            };
            let speech = SpeechClient::from_config(&cfg)?;
            let audio = speech.synthesize(&text, voice, &out).await?;
            println!("{}", audio.local_path.display());
        }
        Command::Video(cmd) => run_video_command(&cfg, cmd).await?,
        Command::Download { url, name } => {
            let downloader = VideoDownloader::from_config(&cfg)?;
            let asset = download_with_bar(&downloader, &url, name.as_deref()).await?;
            let info = downloader.info(&asset.local_path).await?;
            println!("{} ({:.2} MB)", info.path.display(), info.size_mb);
        }
        Command::Compose { video, audio, out } => {
            if !init::check_ffmpeg(&cfg.ffmpeg_path).await {
                anyhow::bail!("FFmpeg not found. Please install FFmpeg.");
            }
            let compositor = Compositor::new(Arc::new(SystemFfmpeg::from_config(&cfg)));
            let out = out.unwrap_or_else(Compositor::default_output_path);
            let spec = CompositionSpec::new(MediaAsset::video(video), MediaAsset::audio(audio), out)?;
            println!("{}", compositor.compose(spec).await?.display());
        }
        Command::Run {
            poem,
            voice,
            prompt,
            out,
            video,
            clean,
        } => {
            if !init::check_ffmpeg(&cfg.ffmpeg_path).await {
                anyhow::bail!("FFmpeg not found. Please install FFmpeg.");
            }
            let pipeline = Pipeline::from_config(&cfg)?
                .with_policy(video.policy(&cfg))
                .with_cancel(cancel_on_ctrl_c());
            let mut ctx = PipelineContext::new();
            let out = out.unwrap_or_else(|| {
                PathBuf::from(pipeline::qualified_filename(FINAL_VIDEO_STEM, &ctx.run_id, "mp4"))
            });
            let request = PoetryRunRequest {
                poem: poem.to_request(),
                voice,
                video_prompt: prompt,
                video_params: video.params(),
                output_path: Some(out),
            };

            let final_video = pipeline.run_poetry(&mut ctx, &request).await?;
            if let Some(poem) = &ctx.poem {
                println!("{}\n", poem);
            }
            println!("{}", final_video.local_path.display());

            if clean {
                for asset in [ctx.audio.take(), ctx.video.take()].into_iter().flatten() {
                    asset.remove().await?;
                }
            }
        }
        Command::Custom {
            text,
            voice,
            prompt,
            video,
        } => {
            let pipeline = Pipeline::from_config(&cfg)?
                .with_policy(video.policy(&cfg))
                .with_cancel(cancel_on_ctrl_c());
            let mut ctx = PipelineContext::new();
            let request = CustomRunRequest {
                text,
                voice,
                video_prompt: prompt,
                video_params: video.params(),
            };
            pipeline.run_custom(&mut ctx, &request).await?;
            for asset in [&ctx.audio, &ctx.video].into_iter().flatten() {
                println!("{}", asset.local_path.display());
            }
        }
        Command::Clean => {
            let removed = pipeline::purge_directories(&[cfg.output_dir.as_path(), cfg.videos_dir.as_path()]).await?;
            println!("Removed {} file(s)", removed);
        }
    }

    Ok(())
}

async fn run_video_command(cfg: &Config, cmd: VideoCommand) -> Result<()> {
    let client = AllegroClient::from_config(cfg)?;
    match cmd {
        VideoCommand::Submit { prompt, video } => {
            let job = client.submit(&prompt, &video.params()).await?;
            println!("{}", job.job_id);
        }
        VideoCommand::Status { job_id } => match client.query(&job_id).await {
            PollOutcome::Ready(url) => println!("ready {}", url),
            PollOutcome::Empty => println!("pending"),
            PollOutcome::TransientError(cause) => anyhow::bail!("query failed: {}", cause),
        },
        VideoCommand::Wait { job_id, video } => {
            let mut job = GenerationJob::new(job_id);
            let url = client
                .poll_until_ready(&mut job, &video.policy(cfg), &cancel_on_ctrl_c())
                .await?;
            println!("{}", url);
        }
        VideoCommand::Create { prompt, no_wait, video } => {
            let (job, url) = client
                .create_and_wait(
                    &prompt,
                    &video.params(),
                    &video.policy(cfg),
                    &cancel_on_ctrl_c(),
                    !no_wait,
                )
                .await?;
            match url {
                Some(url) => println!("{}", url),
                None => println!("Video generation started. Request ID: {}", job.job_id),
            }
        }
    }
    Ok(())
}

mod api;
mod config;
mod error;
mod files;
mod metrics;
mod pipeline;
mod render;
mod retry;
mod scene;
mod validation;
mod video;

#[cfg(test)]
mod testing;

use anyhow::Context;
use api::OpenAiClient;
use clap::{Parser, ValueEnum};
use config::Config;
use error::{ErrorKind, SceneError};
use pipeline::{Deliverable, Pipeline, RunReport};
use render::PovRayRenderer;
use scene::{Antialias, RenderOptions, RunMode, SceneRequest};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use video::FfmpegEncoder;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[derive(Parser, Debug)]
#[command(name = "povcraft")]
#[command(about = "Generate POV-Ray scenes from text prompts and render them", long_about = None)]
struct Args {
    /// Natural-language description of the scene
    prompt: Option<String>,

    /// Read the scene description from a file
    #[arg(short = 'f', long, conflicts_with = "prompt")]
    prompt_file: Option<PathBuf>,

    /// Generate the scene code only, without rendering
    #[arg(long, visible_alias = "no-render")]
    dry_run: bool,

    /// Render an existing .pov file instead of generating one
    #[arg(long, value_name = "FILE", conflicts_with_all = ["prompt", "prompt_file", "animate"])]
    render: Option<PathBuf>,

    /// Render an animation driven by the scene's Clock variable
    #[arg(short, long)]
    animate: bool,

    /// Animation length in seconds
    #[arg(long)]
    duration: Option<f64>,

    /// Animation frame rate
    #[arg(long)]
    fps: Option<u32>,

    /// Exact number of animation frames (overrides duration × fps)
    #[arg(long)]
    frames: Option<usize>,

    /// Resolution preset: 480p, 720p, 1080p, 1440p or 4k
    #[arg(short, long)]
    resolution: Option<String>,

    /// Image width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Image height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// Render quality (1-10)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=10))]
    quality: Option<u8>,

    /// Fast low-resolution preview (320x240, quality 4)
    #[arg(long)]
    preview: bool,

    /// Antialiasing
    #[arg(long, value_enum, default_value_t = Toggle::On)]
    antialias: Toggle,

    /// Antialiasing threshold
    #[arg(long, default_value_t = 0.3)]
    antialias_threshold: f64,

    /// Antialiasing recursion depth
    #[arg(long, default_value_t = 2)]
    antialias_depth: u8,

    /// Render timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Model used to generate scene code
    #[arg(short, long)]
    model: Option<String>,

    /// Model used to verify and repair scene code
    #[arg(long)]
    verifier_model: Option<String>,

    /// Skip the verification stage
    #[arg(long, conflicts_with = "verifier_model")]
    no_verification: bool,

    /// Maximum render attempts, auto-repairs included
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Output directory for scenes and renders
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// API key for the OpenAI-compatible endpoint
    #[arg(long)]
    api_key: Option<String>,

    /// Show progress information
    #[arg(short, long)]
    verbose: bool,

    /// Show debug output
    #[arg(long)]
    debug: bool,

    /// Also write a debug log to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    if let Err(e) = init_logging(&args) {
        eprintln!("✗ Failed: {e:#}");
        return ExitCode::from(1);
    }

    match run(args).await {
        Ok(report) => conclude(&report),
        Err(e) => {
            let code = match e.downcast_ref::<SceneError>() {
                Some(err) if err.is_preflight() => 2,
                _ => 1,
            };
            eprintln!("✗ Failed: {e:#}");
            ExitCode::from(code)
        }
    }
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let console_level = if args.debug {
        LevelFilter::DEBUG
    } else if args.verbose {
        LevelFilter::INFO
    } else {
        LevelFilter::WARN
    };
    let console = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(console_level);

    let file = match &args.log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(LevelFilter::DEBUG),
            )
        }
        None => None,
    };

    tracing_subscriber::registry().with(console).with(file).init();
    Ok(())
}

fn build_config(args: &Args) -> Config {
    let mut config = Config::from_env();
    if let Some(key) = &args.api_key {
        config.api_key = Some(key.clone());
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(model) = &args.model {
        config.generator_model = model.clone();
    }
    if args.no_verification {
        config.verifier_model = None;
    } else if let Some(model) = &args.verifier_model {
        config.verifier_model = Some(model.clone());
    }
    if let Some(attempts) = args.max_attempts {
        config.max_attempts = attempts;
    }
    config
}

fn render_options(args: &Args) -> RenderOptions {
    RenderOptions {
        resolution: args.resolution.clone(),
        width: args.width,
        height: args.height,
        quality: args.quality,
        preview: args.preview,
        antialias: Antialias {
            enabled: args.antialias == Toggle::On,
            threshold: args.antialias_threshold,
            depth: args.antialias_depth,
        },
        timeout: args.timeout.map(Duration::from_secs),
        fps: args.fps,
        duration: args.duration,
        frames: args.frames,
    }
}

async fn run(args: Args) -> anyhow::Result<RunReport> {
    let config = build_config(&args);
    let options = render_options(&args);
    let renderer = PovRayRenderer::new(&config);
    let encoder = FfmpegEncoder::new(&config);

    if let Some(scene_file) = &args.render {
        let pipeline: Pipeline<OpenAiClient, _, _> = Pipeline::new(config, None, renderer, encoder);
        return Ok(pipeline.render_existing(scene_file, &options).await);
    }

    let prompt = if let Some(prompt) = args.prompt.clone() {
        prompt
    } else if let Some(path) = &args.prompt_file {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt file: {}", path.display()))?
            .trim()
            .to_string()
    } else {
        return Err(SceneError::validation(
            "provide a prompt, --prompt-file or --render <FILE>",
        )
        .into());
    };
    info!("Prompt length: {} characters", prompt.chars().count());

    // Without a key the pipeline reports the configuration failure itself.
    let client = match config.api_key {
        Some(_) => Some(OpenAiClient::new(&config)?),
        None => None,
    };
    let pipeline = Pipeline::new(config, client, renderer, encoder);
    debug!("Output directory: {}", pipeline.config().output_dir.display());

    let mode = RunMode::from_flags(args.animate, args.dry_run);
    let request = SceneRequest::new(prompt, mode, options);
    Ok(pipeline.run(&request).await)
}

/// Prints the single final status line and picks the exit code.
fn conclude(report: &RunReport) -> ExitCode {
    if !report.success {
        eprintln!(
            "✗ Failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        );
        return match report.error_kind {
            Some(ErrorKind::Configuration | ErrorKind::Validation) => ExitCode::from(2),
            _ => ExitCode::from(1),
        };
    }

    let scene = report
        .scene_file
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    match &report.deliverable {
        Some(Deliverable::Image { path, size }) => println!(
            "✓ Rendered {} ({:.1} KB) from {}",
            path.display(),
            *size as f64 / 1024.0,
            scene
        ),
        Some(Deliverable::Animation { video, frames }) => println!(
            "✓ Animation created: {} ({} frames)",
            video.display(),
            frames.len()
        ),
        Some(Deliverable::Frames { frames }) => println!(
            "✓ Rendered {} frames (video encoding unavailable), first frame: {}",
            frames.len(),
            frames.first().map(|p| p.display().to_string()).unwrap_or_default()
        ),
        Some(Deliverable::CodeOnly) | None => println!("✓ Scene code saved: {scene}"),
    }
    ExitCode::SUCCESS
}

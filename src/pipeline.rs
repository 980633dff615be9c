//! Prompt-to-output orchestration.
//!
//! A run goes through preflight, generation, save and verification, then
//! exactly one of the [`RunMode`] branches. Every run, successful or not, ends
//! in a [`RunReport`] whose metrics were finished exactly once and which is
//! persisted as the scene's `.metadata.json`.

use crate::api::{ChatModel, SceneAuthor};
use crate::config::Config;
use crate::error::{ErrorKind, Result, SceneError};
use crate::files::{FileManager, RunPaths, TempFiles};
use crate::metrics::{MetricsRecorder, PhaseClock, RunMetrics};
use crate::render::{RenderJob, RenderOutcome, Renderer};
use crate::retry::{RetryPolicy, retry};
use crate::scene::{
    RenderOptions, ResolvedOptions, RunMode, SceneArtifact, SceneRequest, frame_clocks,
    inject_clock,
};
use crate::validation::{
    extract_relevant_error, fix_common_issues, validate_prompt, validate_scene_code,
};
use crate::video::Encoder;
use chrono::Local;
use serde::Serialize;
use std::cell::Cell;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// What a successful run produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Deliverable {
    Image { path: PathBuf, size: u64 },
    Animation { video: PathBuf, frames: Vec<PathBuf> },
    /// The encoder was unavailable or failed; the rendered frames are the result.
    Frames { frames: Vec<PathBuf> },
    CodeOnly,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub scene_file: Option<PathBuf>,
    pub backup_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<ResolvedOptions>,
    pub deliverable: Option<Deliverable>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// Time spent inside the renderer, summed over every attempt and frame.
    pub render_time_secs: f64,
    pub metrics: RunMetrics,
    pub metadata_file: Option<PathBuf>,
    pub scene_code: Option<String>,
}

/// Partial results gathered while a run progresses, kept even when it fails.
#[derive(Debug, Default)]
struct RunState {
    scene_file: Option<PathBuf>,
    backup_file: Option<PathBuf>,
    scene_code: Option<String>,
    options: Option<ResolvedOptions>,
}

/// Mutable context shared by every render attempt of one run.
///
/// `budget` is the number of repairs left for the whole run, frames included.
struct RepairSession<'s> {
    artifact: &'s mut SceneArtifact,
    metrics: &'s mut MetricsRecorder,
    scene_path: &'s Path,
    budget: u32,
}

pub struct Pipeline<M, R, E> {
    config: Config,
    author: Option<SceneAuthor<M>>,
    renderer: R,
    encoder: E,
    files: FileManager,
}

impl<M: ChatModel, R: Renderer, E: Encoder> Pipeline<M, R, E> {
    /// `model` may be `None` when only existing scene files will be rendered.
    pub fn new(config: Config, model: Option<M>, renderer: R, encoder: E) -> Self {
        let author = model.map(|m| SceneAuthor::new(m, &config));
        let files = FileManager::new(&config);
        Self {
            config,
            author,
            renderer,
            encoder,
            files,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn run(&self, request: &SceneRequest) -> RunReport {
        let operation = match request.mode {
            RunMode::Render => "scene_generation",
            RunMode::Animate => "animation_generation",
            RunMode::CodeOnly => "code_generation",
        };
        info!("Starting {} for prompt: {:?}", operation, request.prompt);

        let mut metrics = MetricsRecorder::start(operation);
        let mut state = RunState::default();
        let paths = self.files.run_paths(&request.prompt, Local::now());

        let result = self.drive(request, &paths, &mut metrics, &mut state).await;
        let mut report = self.conclude(metrics, state, result);
        report.prompt = Some(request.prompt.clone());
        self.persist(report, &paths.metadata).await
    }

    /// Renders an existing scene file once. No model is contacted and nothing is repaired.
    pub async fn render_existing(&self, scene_file: &Path, options: &RenderOptions) -> RunReport {
        info!("Rendering existing scene file: {}", scene_file.display());

        let mut metrics = MetricsRecorder::start("file_rendering");
        let mut state = RunState::default();
        let label = scene_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let paths = self.files.run_paths(&label, Local::now());

        let result = self
            .render_file(scene_file, options, &paths, &mut metrics, &mut state)
            .await;
        let report = self.conclude(metrics, state, result);
        self.persist(report, &paths.metadata).await
    }

    async fn drive(
        &self,
        request: &SceneRequest,
        paths: &RunPaths,
        metrics: &mut MetricsRecorder,
        state: &mut RunState,
    ) -> Result<Deliverable> {
        self.files.ensure_directories().await?;
        self.config.preflight()?;
        validate_prompt(&request.prompt)?;
        let options = request.options.resolve(&self.config)?;
        state.options = Some(options.clone());

        let author = self
            .author
            .as_ref()
            .ok_or_else(|| SceneError::configuration("no LLM client configured"))?;
        metrics.note("generator_model", author.generator_model());
        metrics.note("verifier_model", author.verifier_model());

        let clock = PhaseClock::start();
        let generated = author.generate(&request.prompt).await;
        metrics.record_generation(clock, generated.as_ref().err());
        let mut code = generated?;
        info!("Generated {} characters of scene code", code.len());

        if self.config.validate_syntax {
            let report = validate_scene_code(&code);
            for warning in &report.warnings {
                debug!("Generated code: {}", warning);
            }
            if !report.is_valid() {
                warn!(
                    "Generated code has issues ({}), applying common fixes",
                    report.errors.join("; ")
                );
                code = fix_common_issues(&code);
                metrics.note("auto_fixed", true);
            }
        }
        let mut artifact = SceneArtifact::new(code);

        self.files.write_scene(&paths.scene, artifact.current()).await?;
        state.scene_file = Some(paths.scene.clone());
        state.backup_file = self.files.backup_scene(&paths.backup, artifact.original()).await;
        state.scene_code = Some(artifact.current().to_string());
        info!("Scene saved: {}", paths.scene.display());

        let clock = PhaseClock::start();
        match author.verify(&request.prompt, artifact.current()).await {
            Ok(Some(verified)) if verified.trim().is_empty() => {
                let err = SceneError::validation("verifier returned empty code");
                warn!("Verification unusable, keeping generated code: {}", err);
                metrics.record_verification(clock, Some(&err));
                metrics.note("verification_error", err.to_string());
            }
            Ok(Some(verified)) => {
                metrics.record_verification(clock, None);
                let changed = verified != artifact.current();
                artifact.apply_verified(verified);
                if changed {
                    self.files.write_scene(&paths.scene, artifact.current()).await?;
                    info!("Scene updated with verified code");
                }
            }
            Ok(None) => debug!("Verification disabled"),
            Err(err) => {
                warn!("Verification failed, continuing with unverified code: {}", err);
                metrics.record_verification(clock, Some(&err));
                metrics.note("verification_error", err.to_string());
            }
        }
        metrics.note("verified", artifact.is_verified());
        state.scene_code = Some(artifact.current().to_string());

        let mut session = RepairSession {
            artifact: &mut artifact,
            metrics,
            scene_path: &paths.scene,
            budget: self.config.max_attempts.saturating_sub(1),
        };
        let delivered = match request.mode {
            RunMode::CodeOnly => {
                info!("Dry run: skipping render");
                Ok(Deliverable::CodeOnly)
            }
            RunMode::Render => {
                let job = self.image_job(&paths.scene, &paths.image, &options, None);
                self.render_with_repair(author, &mut session, &job, None)
                    .await
                    .map(|outcome| Deliverable::Image {
                        path: outcome.output_path,
                        size: outcome.output_size,
                    })
            }
            RunMode::Animate => self.animate(author, &mut session, paths, &options).await,
        };
        session.metrics.note("repairs", session.artifact.repairs());
        state.scene_code = Some(artifact.into_current());
        delivered
    }

    fn image_job(
        &self,
        scene: &Path,
        output: &Path,
        options: &ResolvedOptions,
        clock: Option<f64>,
    ) -> RenderJob {
        RenderJob {
            scene_path: scene.to_path_buf(),
            output_path: output.to_path_buf(),
            width: options.width,
            height: options.height,
            quality: options.quality,
            antialias: options.antialias.clone(),
            clock,
            timeout: options.timeout,
        }
    }

    /// Renders `job`, repairing the scene through the model after each failed attempt
    /// while the session still has budget. The last render error is returned unchanged.
    async fn render_with_repair(
        &self,
        author: &SceneAuthor<M>,
        session: &mut RepairSession<'_>,
        job: &RenderJob,
        frame: Option<usize>,
    ) -> Result<RenderOutcome> {
        let policy = RetryPolicy::immediate(1 + session.budget);
        // Set when a frame's repair call fails; that frame then stops with its render error.
        let gave_up = Cell::new(false);

        retry(
            &policy,
            |err: &SceneError| !gave_up.get() && err.is_render_retryable(),
            async |attempt| {
                let clock = PhaseClock::start();
                let rendered = self.renderer.render(job).await;
                session.metrics.record_render_attempt(
                    attempt,
                    frame,
                    clock.elapsed(),
                    rendered.as_ref().err(),
                );

                let err = match rendered {
                    Ok(outcome) => return Ok(outcome),
                    Err(err) => err,
                };
                if !err.is_render_retryable() || session.budget == 0 {
                    return Err(err);
                }

                warn!("Render attempt {} failed: {}. Attempting auto-repair", attempt, err);
                session.budget -= 1;
                let relevant = extract_relevant_error(&err.to_string());
                let repaired = match author.repair(session.artifact.current(), &relevant).await {
                    Ok(code) => code,
                    Err(repair_err) if frame.is_some() => {
                        warn!("Auto-repair failed, giving up on this frame: {}", repair_err);
                        session.metrics.note("repair_error", repair_err.to_string());
                        gave_up.set(true);
                        return Err(err);
                    }
                    Err(repair_err) => return Err(repair_err),
                };
                if repaired.trim().is_empty() {
                    warn!("Auto-repair returned empty code, retrying with the current scene");
                    return Err(err);
                }

                session.artifact.apply_repair(repaired);
                session.metrics.record_repair();
                self.files
                    .write_scene(session.scene_path, session.artifact.current())
                    .await?;
                if let Some(clock) = job.clock {
                    self.files
                        .write_scene(
                            &job.scene_path,
                            &inject_clock(session.artifact.current(), clock),
                        )
                        .await?;
                }
                info!(
                    "Scene repaired ({} repairs left), retrying render",
                    session.budget
                );
                Err(err)
            },
        )
        .await
    }

    async fn animate(
        &self,
        author: &SceneAuthor<M>,
        session: &mut RepairSession<'_>,
        paths: &RunPaths,
        options: &ResolvedOptions,
    ) -> Result<Deliverable> {
        let count = options.frame_count;
        if count == 0 {
            return Err(SceneError::validation("animation needs at least one frame"));
        }
        info!("Rendering {} frames at {} fps", count, options.fps);

        let mut frames = Vec::new();
        let mut last_error = None;

        for (index, clock) in frame_clocks(count).enumerate() {
            let mut temps = TempFiles::new();
            let frame_scene = temps.track(paths.frame_scene(self.files.temp_dir(), index));
            self.files
                .write_scene(&frame_scene, &inject_clock(session.artifact.current(), clock))
                .await?;

            let job = self.image_job(&frame_scene, &paths.frame_image(index), options, Some(clock));
            match self.render_with_repair(author, session, &job, Some(index)).await {
                Ok(outcome) => {
                    debug!("Frame {}/{} rendered", index + 1, count);
                    frames.push(outcome.output_path);
                }
                Err(err) if err.is_render_retryable() => {
                    error!("Frame {}/{} failed: {}", index + 1, count, err);
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        session.metrics.note("frames_requested", count);
        session.metrics.note("frames_rendered", frames.len());
        if frames.is_empty() {
            return Err(last_error.unwrap_or_else(|| SceneError::rendering("no frames rendered")));
        }
        if frames.len() < count {
            warn!("{} of {} frames failed", count - frames.len(), count);
        }

        let clock = PhaseClock::start();
        let encoded = self
            .encoder
            .encode(&frames, options.fps, &paths.animation, self.config.encode_timeout)
            .await;
        session.metrics.record_encoding(clock, encoded.as_ref().err());

        match encoded {
            Ok(outcome) => {
                session.metrics.note("video_bytes", outcome.output_size);
                Ok(Deliverable::Animation {
                    video: outcome.output_path,
                    frames,
                })
            }
            Err(err) => {
                warn!(
                    "Video encoding failed ({}), delivering {} frames instead",
                    err,
                    frames.len()
                );
                session.metrics.note("encoding_error", err.to_string());
                Ok(Deliverable::Frames { frames })
            }
        }
    }

    async fn render_file(
        &self,
        scene_file: &Path,
        options: &RenderOptions,
        paths: &RunPaths,
        metrics: &mut MetricsRecorder,
        state: &mut RunState,
    ) -> Result<Deliverable> {
        if !tokio::fs::try_exists(scene_file).await? {
            return Err(SceneError::validation(format!(
                "scene file not found: {}",
                scene_file.display()
            )));
        }
        self.files.ensure_directories().await?;
        let options = options.resolve(&self.config)?;
        state.scene_file = Some(scene_file.to_path_buf());
        state.scene_code = Some(tokio::fs::read_to_string(scene_file).await?);
        state.options = Some(options.clone());

        let job = self.image_job(scene_file, &paths.image, &options, None);
        let clock = PhaseClock::start();
        let rendered = self.renderer.render(&job).await;
        metrics.record_render_attempt(1, None, clock.elapsed(), rendered.as_ref().err());

        let outcome = rendered?;
        Ok(Deliverable::Image {
            path: outcome.output_path,
            size: outcome.output_size,
        })
    }

    /// Finishes the metrics. The only place a run is completed.
    fn conclude(
        &self,
        metrics: MetricsRecorder,
        state: RunState,
        result: Result<Deliverable>,
    ) -> RunReport {
        let (deliverable, err) = match result {
            Ok(deliverable) => (Some(deliverable), None),
            Err(err) => (None, Some(err)),
        };
        let metrics = metrics.finish(err.as_ref());

        match &err {
            None => info!("Run completed in {:.2}s", metrics.duration_secs),
            Some(err) => error!("Run failed after {:.2}s: {}", metrics.duration_secs, err),
        }

        RunReport {
            success: err.is_none(),
            operation: metrics.operation.clone(),
            prompt: None,
            scene_file: state.scene_file,
            backup_file: state.backup_file,
            options: state.options,
            deliverable,
            error: err.as_ref().map(ToString::to_string),
            error_kind: err.as_ref().map(SceneError::kind),
            render_time_secs: metrics.render_time_secs(),
            metrics,
            metadata_file: None,
            scene_code: state.scene_code,
        }
    }

    async fn persist(&self, mut report: RunReport, path: &Path) -> RunReport {
        report.metadata_file = Some(path.to_path_buf());
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!("Cannot create metadata directory {}: {}", parent.display(), e);
            }
        }
        if let Err(e) = self.files.save_metadata(path, &report).await {
            warn!("Failed to save metadata {}: {}", path.display(), e);
            report.metadata_file = None;
        }
        report
    }
}

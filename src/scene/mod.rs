use crate::config::Config;
use crate::error::{Result, SceneError};
use crate::validation::{resolution_preset, validate_frame_count, validate_resolution};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Duration;

pub const PREVIEW_SIZE: (u32, u32) = (320, 240);
pub const PREVIEW_QUALITY: u8 = 4;

/// What a run delivers once the scene code exists. Exactly one per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Render,
    Animate,
    CodeOnly,
}

impl RunMode {
    /// Animation takes precedence over a dry run.
    pub fn from_flags(animate: bool, dry_run: bool) -> Self {
        match (animate, dry_run) {
            (true, _) => RunMode::Animate,
            (false, true) => RunMode::CodeOnly,
            (false, false) => RunMode::Render,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Antialias {
    pub enabled: bool,
    pub threshold: f64,
    pub depth: u8,
}

impl Default for Antialias {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.3,
            depth: 2,
        }
    }
}

/// Rendering options as requested. Missing values fall back to [`Config`] defaults.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RenderOptions {
    pub resolution: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub quality: Option<u8>,
    pub preview: bool,
    pub antialias: Antialias,
    pub timeout: Option<Duration>,
    pub fps: Option<u32>,
    pub duration: Option<f64>,
    pub frames: Option<usize>,
}

/// Options after defaults, presets and preview mode have been applied.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedOptions {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub antialias: Antialias,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub fps: u32,
    pub frame_count: usize,
}

impl RenderOptions {
    pub fn resolve(&self, config: &Config) -> Result<ResolvedOptions> {
        let (width, height, quality) = if self.preview {
            (Some(PREVIEW_SIZE.0), Some(PREVIEW_SIZE.1), PREVIEW_QUALITY)
        } else {
            let (base_w, base_h) = match &self.resolution {
                Some(preset) => resolution_preset(preset)?,
                None => (config.default_width, config.default_height),
            };
            (
                Some(self.width.unwrap_or(base_w)),
                Some(self.height.unwrap_or(base_h)),
                self.quality.unwrap_or(config.default_quality),
            )
        };
        let (width, height) = validate_resolution(width, height)?;

        if !(1..=11).contains(&quality) {
            return Err(SceneError::validation(format!(
                "quality must be between 1 and 11, got {quality}"
            )));
        }

        let fps = self.fps.unwrap_or(config.default_fps);
        if fps == 0 {
            return Err(SceneError::validation("fps must be positive"));
        }
        let duration = self.duration.unwrap_or(config.default_duration);
        if !duration.is_finite() || duration < 0.0 {
            return Err(SceneError::validation("duration must be a non-negative number"));
        }

        let frame_count = match self.frames {
            Some(frames) => validate_frame_count(frames as f64)?,
            None => frame_count(duration, fps)?,
        };

        Ok(ResolvedOptions {
            width,
            height,
            quality,
            antialias: self.antialias.clone(),
            timeout: self.timeout.unwrap_or(config.render_timeout),
            fps,
            frame_count,
        })
    }
}

/// One prompt-to-output request. Not modified once a run starts.
#[derive(Debug, Clone, Serialize)]
pub struct SceneRequest {
    pub prompt: String,
    pub mode: RunMode,
    pub options: RenderOptions,
}

impl SceneRequest {
    pub fn new(prompt: impl Into<String>, mode: RunMode, options: RenderOptions) -> Self {
        Self {
            prompt: prompt.into(),
            mode,
            options,
        }
    }
}

/// Generated scene source: the raw generation plus the current working revision.
#[derive(Debug, Clone)]
pub struct SceneArtifact {
    original: String,
    current: String,
    verified: bool,
    repairs: u32,
}

impl SceneArtifact {
    pub fn new(code: String) -> Self {
        Self {
            current: code.clone(),
            original: code,
            verified: false,
            repairs: 0,
        }
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    pub fn repairs(&self) -> u32 {
        self.repairs
    }

    pub fn apply_verified(&mut self, code: String) {
        self.current = code;
        self.verified = true;
    }

    pub fn apply_repair(&mut self, code: String) {
        self.current = code;
        self.repairs += 1;
    }

    pub fn into_current(self) -> String {
        self.current
    }
}

pub fn frame_count(duration_secs: f64, fps: u32) -> Result<usize> {
    validate_frame_count((duration_secs * f64::from(fps)).round())
}

/// Clock values for `count` frames, evenly spaced over [0, 1] including both ends.
pub fn frame_clocks(count: usize) -> impl ExactSizeIterator<Item = f64> {
    let last = count.saturating_sub(1).max(1) as f64;
    (0..count).map(move |i| i as f64 / last)
}

/// Sets `#declare Clock = <value>;` in the scene source.
///
/// An existing declaration is replaced; otherwise one is inserted after the first
/// blank line (the end of the include block), after the first line, or at the top.
pub fn inject_clock(code: &str, clock: f64) -> String {
    static CLOCK_DECL: OnceLock<Regex> = OnceLock::new();
    let decl = CLOCK_DECL.get_or_init(|| {
        Regex::new(r"(?i)#declare\s+Clock\s*=\s*[^;]+;").expect("clock regex should compile")
    });

    let line = format!("#declare Clock = {clock};");
    if decl.is_match(code) {
        return decl.replace_all(code, regex::NoExpand(&line)).into_owned();
    }

    let insert_at = code.find("\n\n").or_else(|| code.find('\n'));
    match insert_at {
        Some(pos) => format!("{}\n{}{}", &code[..pos], line, &code[pos..]),
        None => format!("{line}\n{code}"),
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }
}

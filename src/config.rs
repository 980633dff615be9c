use crate::error::{Result, SceneError};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_GENERATOR_MODEL: &str = "gpt-4o";
pub const DEFAULT_VERIFIER_MODEL: &str = "gpt-4o-mini";

/// Process-wide settings. Built once in `main` and passed by reference.
#[derive(Debug, Clone)]
pub struct Config {
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,

    pub api_key: Option<String>,
    pub base_url: String,
    pub generator_model: String,
    /// `None` skips the verification stage.
    pub verifier_model: Option<String>,

    pub renderer_bin: PathBuf,
    pub encoder_bin: PathBuf,

    pub default_width: u32,
    pub default_height: u32,
    pub default_quality: u8,
    pub render_timeout: Duration,
    pub encode_timeout: Duration,

    pub default_fps: u32,
    pub default_duration: f64,

    /// Upper bound on render attempts (the first render plus repairs).
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub api_timeout: Duration,

    pub validate_syntax: bool,
    pub backup_generations: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./output"),
            temp_dir: std::env::temp_dir().join("povcraft"),
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            generator_model: DEFAULT_GENERATOR_MODEL.to_string(),
            verifier_model: Some(DEFAULT_VERIFIER_MODEL.to_string()),
            renderer_bin: PathBuf::from("povray"),
            encoder_bin: PathBuf::from("ffmpeg"),
            default_width: 1920,
            default_height: 1080,
            default_quality: 9,
            render_timeout: Duration::from_secs(300),
            encode_timeout: Duration::from_secs(600),
            default_fps: 30,
            default_duration: 5.0,
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
            api_timeout: Duration::from_secs(60),
            validate_syntax: true,
            backup_generations: true,
        }
    }
}

impl Config {
    /// Defaults overlaid with credentials from the environment. Call after `dotenvy::dotenv()`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = Self::default();
        config.api_key = non_empty("POVCRAFT_API_KEY").or_else(|| non_empty("OPENAI_API_KEY"));
        if let Some(url) = non_empty("POVCRAFT_BASE_URL").or_else(|| non_empty("OPENAI_BASE_URL")) {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        config
    }

    pub fn scenes_dir(&self) -> PathBuf {
        self.output_dir.join("scenes")
    }

    pub fn renders_dir(&self) -> PathBuf {
        self.output_dir.join("renders")
    }

    /// Checks that must pass before any model is contacted.
    pub fn preflight(&self) -> Result<()> {
        if self.api_key.is_none() {
            return Err(SceneError::configuration(
                "API key not found. Set POVCRAFT_API_KEY (or OPENAI_API_KEY), or pass --api-key",
            ));
        }
        if self.max_attempts == 0 {
            return Err(SceneError::configuration("max attempts must be at least 1"));
        }
        if self.base_url == DEFAULT_BASE_URL {
            warn!("POVCRAFT_BASE_URL not set, using default endpoint {}", DEFAULT_BASE_URL);
        }
        Ok(())
    }

    /// Model used for auto-repair: the verifier, or the generator when verification is off.
    pub fn repair_model(&self) -> &str {
        self.verifier_model
            .as_deref()
            .unwrap_or(&self.generator_model)
    }
}

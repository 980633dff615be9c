use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Which LLM failure happened. Drives retry decisions in the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    Authentication,
    RateLimit,
    Server,
    Transport,
    Request,
    MalformedResponse,
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ApiErrorKind::Authentication => "authentication",
            ApiErrorKind::RateLimit => "rate limit",
            ApiErrorKind::Server => "server",
            ApiErrorKind::Transport => "transport",
            ApiErrorKind::Request => "request",
            ApiErrorKind::MalformedResponse => "malformed response",
        };
        f.write_str(label)
    }
}

/// The blocking call that ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutStage {
    Api,
    Render,
    Encode,
}

impl fmt::Display for TimeoutStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TimeoutStage::Api => "LLM request",
            TimeoutStage::Render => "renderer",
            TimeoutStage::Encode => "encoder",
        };
        f.write_str(label)
    }
}

/// Coarse classification recorded in run metadata and mapped to exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Validation,
    Api,
    Rendering,
    Timeout,
    Dependency,
    Encoding,
    Io,
    Unexpected,
}

#[derive(Error, Debug)]
pub enum SceneError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("API error ({kind}): {message}")]
    Api { kind: ApiErrorKind, message: String },

    #[error("rendering error: {0}")]
    Rendering(String),

    #[error("timeout: {stage} exceeded {seconds}s")]
    Timeout { stage: TimeoutStage, seconds: u64 },

    #[error("missing dependency: {0}")]
    Dependency(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SceneError>;

impl SceneError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn api(kind: ApiErrorKind, msg: impl Into<String>) -> Self {
        Self::Api {
            kind,
            message: msg.into(),
        }
    }

    pub fn rendering(msg: impl Into<String>) -> Self {
        Self::Rendering(msg.into())
    }

    pub fn timeout(stage: TimeoutStage, limit: std::time::Duration) -> Self {
        Self::Timeout {
            stage,
            seconds: limit.as_secs(),
        }
    }

    pub fn dependency(msg: impl Into<String>) -> Self {
        Self::Dependency(msg.into())
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SceneError::Configuration(_) => ErrorKind::Configuration,
            SceneError::Validation(_) => ErrorKind::Validation,
            SceneError::Api { .. } => ErrorKind::Api,
            SceneError::Rendering(_) => ErrorKind::Rendering,
            SceneError::Timeout { .. } => ErrorKind::Timeout,
            SceneError::Dependency(_) => ErrorKind::Dependency,
            SceneError::Encoding(_) => ErrorKind::Encoding,
            SceneError::Io(_) => ErrorKind::Io,
            SceneError::Json(_) | SceneError::Other(_) => ErrorKind::Unexpected,
        }
    }

    /// Failures of an LLM call that are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            SceneError::Api { kind, .. } => matches!(
                kind,
                ApiErrorKind::RateLimit | ApiErrorKind::Server | ApiErrorKind::Transport
            ),
            SceneError::Timeout { stage, .. } => *stage == TimeoutStage::Api,
            _ => false,
        }
    }

    /// Renderer failures that the repair loop answers with another attempt.
    pub fn is_render_retryable(&self) -> bool {
        match self {
            SceneError::Rendering(_) => true,
            SceneError::Timeout { stage, .. } => *stage == TimeoutStage::Render,
            _ => false,
        }
    }

    /// Configuration and validation failures are reported before any work happens.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            SceneError::Configuration(_) | SceneError::Validation(_)
        )
    }
}

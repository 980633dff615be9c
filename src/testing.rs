//! In-memory stand-ins for the LLM, the renderer and the encoder.

use crate::api::{ChatModel, ChatRequest};
use crate::error::{ApiErrorKind, Result, SceneError};
use crate::render::{RenderJob, RenderOutcome, Renderer};
use crate::video::{EncodeOutcome, Encoder};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ChatCall {
    pub model: String,
    pub system: String,
    pub user: String,
}

/// Replays canned completions in order and records every request.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String>>>,
    calls: Mutex<Vec<ChatCall>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Result<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<ChatCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl ChatModel for ScriptedModel {
    async fn complete(&self, request: &ChatRequest<'_>) -> Result<String> {
        self.calls.lock().unwrap().push(ChatCall {
            model: request.model.to_string(),
            system: request.system.to_string(),
            user: request.user.clone(),
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SceneError::api(ApiErrorKind::Request, "script exhausted")))
    }
}

#[derive(Debug, Clone)]
pub struct RenderCall {
    pub scene_path: PathBuf,
    pub output_path: PathBuf,
    pub clock: Option<f64>,
    pub scene_code: String,
}

/// Fails with the scripted errors first, then succeeds (or keeps failing with
/// `fallback_error`). Calls listed in `failing_calls` (zero-based) always fail.
/// Success writes a small file at the output path.
pub struct ScriptedRenderer {
    failures: Mutex<VecDeque<SceneError>>,
    fallback_error: Option<String>,
    failing_calls: Vec<usize>,
    calls: Mutex<Vec<RenderCall>>,
}

impl ScriptedRenderer {
    pub fn succeeding() -> Self {
        Self::failing_first(vec![])
    }

    pub fn failing_first(failures: Vec<SceneError>) -> Self {
        Self {
            failures: Mutex::new(failures.into()),
            fallback_error: None,
            failing_calls: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn always_failing(message: &str) -> Self {
        Self {
            failures: Mutex::new(VecDeque::new()),
            fallback_error: Some(message.to_string()),
            failing_calls: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_calls(calls: &[usize]) -> Self {
        Self {
            failing_calls: calls.to_vec(),
            ..Self::succeeding()
        }
    }

    pub fn calls(&self) -> Vec<RenderCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl Renderer for ScriptedRenderer {
    async fn render(&self, job: &RenderJob) -> Result<RenderOutcome> {
        let scene_code = std::fs::read_to_string(&job.scene_path).unwrap_or_default();
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(RenderCall {
                scene_path: job.scene_path.clone(),
                output_path: job.output_path.clone(),
                clock: job.clock,
                scene_code,
            });
            calls.len() - 1
        };

        if self.failing_calls.contains(&index) {
            return Err(SceneError::rendering(format!(
                "Parse Error: scripted failure on render {index}"
            )));
        }
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        if let Some(message) = &self.fallback_error {
            return Err(SceneError::rendering(message.clone()));
        }

        if let Some(parent) = job.output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&job.output_path, b"PNG")?;
        Ok(RenderOutcome {
            output_path: job.output_path.clone(),
            output_size: 3,
        })
    }
}

/// Encoder double. `missing()` behaves like an absent ffmpeg.
pub struct ScriptedEncoder {
    available: bool,
    calls: Mutex<Vec<Vec<PathBuf>>>,
}

impl ScriptedEncoder {
    pub fn working() -> Self {
        Self {
            available: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn missing() -> Self {
        Self {
            available: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<PathBuf>> {
        self.calls.lock().unwrap().clone()
    }
}

impl Encoder for ScriptedEncoder {
    async fn encode(
        &self,
        frames: &[PathBuf],
        _fps: u32,
        output_path: &Path,
        _timeout: Duration,
    ) -> Result<EncodeOutcome> {
        self.calls.lock().unwrap().push(frames.to_vec());
        if !self.available {
            return Err(SceneError::dependency("encoder 'ffmpeg' not found"));
        }
        std::fs::write(output_path, b"mp4")?;
        Ok(EncodeOutcome {
            output_path: output_path.to_path_buf(),
            output_size: 3,
        })
    }
}

/// Writes an executable shell script standing in for an external binary.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

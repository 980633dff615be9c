use super::{EncodeOutcome, Encoder};
use crate::config::Config;
use crate::error::{Result, SceneError, TimeoutStage};
use crate::files::TempFiles;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info};

/// Encodes PNG frames into an H.264 MP4 through the ffmpeg concat demuxer.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    program: PathBuf,
    temp_dir: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(config: &Config) -> Self {
        Self {
            program: config.encoder_bin.clone(),
            temp_dir: config.temp_dir.clone(),
        }
    }

    pub async fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

/// Concat-demuxer list. The last frame is listed twice so its duration is honored.
fn concat_list(frames: &[PathBuf], fps: u32) -> Result<String> {
    let frame_duration = 1.0 / f64::from(fps);
    let mut list = String::new();
    for frame in frames {
        let abs = std::path::absolute(frame)?;
        let escaped = abs.display().to_string().replace('\'', "'\\''");
        list.push_str(&format!("file '{escaped}'\nduration {frame_duration}\n"));
    }
    if let Some(last) = frames.last() {
        let abs = std::path::absolute(last)?;
        let escaped = abs.display().to_string().replace('\'', "'\\''");
        list.push_str(&format!("file '{escaped}'\n"));
    }
    Ok(list)
}

impl Encoder for FfmpegEncoder {
    async fn encode(
        &self,
        frames: &[PathBuf],
        fps: u32,
        output_path: &Path,
        timeout: Duration,
    ) -> Result<EncodeOutcome> {
        if frames.is_empty() {
            return Err(SceneError::encoding("no frames to encode"));
        }
        if fps == 0 {
            return Err(SceneError::validation("fps must be positive"));
        }
        if !self.is_available().await {
            return Err(SceneError::dependency(format!(
                "encoder '{}' not found. Install ffmpeg to produce videos",
                self.program.display()
            )));
        }

        info!("Encoding {} frames at {} fps...", frames.len(), fps);

        tokio::fs::create_dir_all(&self.temp_dir).await?;
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut temps = TempFiles::new();
        let stem = output_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());
        let list_path = temps.track(self.temp_dir.join(format!("{stem}_frames.txt")));
        tokio::fs::write(&list_path, concat_list(frames, fps)?).await?;
        debug!("Concat list written: {}", list_path.display());

        let fps_filter = format!("fps={fps}");
        let child = Command::new(&self.program)
            .arg("-y")
            .args(["-f", "concat", "-safe", "0", "-i"])
            .arg(&list_path)
            .args([
                "-c:v",
                "libx264",
                "-preset",
                "medium",
                "-crf",
                "23",
                "-pix_fmt",
                "yuv420p",
                "-vf",
                &fps_filter,
                "-movflags",
                "+faststart",
            ])
            .arg(output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SceneError::dependency(format!("encoder '{}' not found", self.program.display()))
                } else {
                    SceneError::encoding(format!("failed to run ffmpeg: {e}"))
                }
            })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                error!("Encoding timed out after {:?}", timeout);
                return Err(SceneError::timeout(TimeoutStage::Encode, timeout));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(20).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            return Err(SceneError::encoding(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                tail.join("\n")
            )));
        }

        let size = match tokio::fs::metadata(output_path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if size == 0 {
            return Err(SceneError::encoding(format!(
                "ffmpeg reported success but {} is missing or empty",
                output_path.display()
            )));
        }

        info!(
            "Video created: {} ({:.1} MB)",
            output_path.display(),
            size as f64 / (1024.0 * 1024.0)
        );
        Ok(EncodeOutcome {
            output_path: output_path.to_path_buf(),
            output_size: size,
        })
    }
}

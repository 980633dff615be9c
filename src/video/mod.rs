mod encoder;

pub use encoder::FfmpegEncoder;

use crate::error::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EncodeOutcome {
    pub output_path: PathBuf,
    pub output_size: u64,
}

/// Turns an ordered frame sequence into a video file.
pub trait Encoder {
    async fn encode(
        &self,
        frames: &[PathBuf],
        fps: u32,
        output_path: &Path,
        timeout: Duration,
    ) -> Result<EncodeOutcome>;
}

mod povray;

pub use povray::PovRayRenderer;

use crate::error::Result;
use crate::scene::Antialias;
use std::path::PathBuf;
use std::time::Duration;

/// Everything the renderer needs for one image.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub scene_path: PathBuf,
    pub output_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub antialias: Antialias,
    pub clock: Option<f64>,
    pub timeout: Duration,
}

/// A confirmed render: the process exited cleanly and the image is on disk.
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub output_path: PathBuf,
    pub output_size: u64,
}

pub trait Renderer {
    async fn render(&self, job: &RenderJob) -> Result<RenderOutcome>;
}

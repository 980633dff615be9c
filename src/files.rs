use crate::config::Config;
use crate::error::Result;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const SLUG_MAX_CHARS: usize = 30;

/// Lowercase, underscore-separated, filesystem-safe prefix of a prompt.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    let mut pending_sep = false;

    for ch in text.to_lowercase().chars() {
        if ch.is_alphanumeric() || ch == '_' {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(ch);
        } else if ch.is_whitespace() || ch == '-' {
            pending_sep = true;
        }
    }

    let slug: String = slug.chars().take(SLUG_MAX_CHARS).collect();
    let slug = slug.trim_matches('_').to_string();
    if slug.is_empty() { "scene".to_string() } else { slug }
}

/// Output paths for one run. Every name carries the run's timestamp.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub scene: PathBuf,
    pub backup: PathBuf,
    pub metadata: PathBuf,
    pub image: PathBuf,
    pub animation: PathBuf,
    stem: String,
    renders_dir: PathBuf,
}

impl RunPaths {
    pub fn frame_image(&self, index: usize) -> PathBuf {
        self.renders_dir
            .join(format!("render_{}_frame_{index:03}.png", self.stem))
    }

    pub fn frame_scene(&self, temp_dir: &Path, index: usize) -> PathBuf {
        temp_dir.join(format!("scene_{}_frame_{index:03}.pov", self.stem))
    }
}

pub struct FileManager {
    scenes_dir: PathBuf,
    renders_dir: PathBuf,
    temp_dir: PathBuf,
    backup_generations: bool,
}

impl FileManager {
    pub fn new(config: &Config) -> Self {
        Self {
            scenes_dir: config.scenes_dir(),
            renders_dir: config.renders_dir(),
            temp_dir: config.temp_dir.clone(),
            backup_generations: config.backup_generations,
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub async fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.scenes_dir, &self.renders_dir, &self.temp_dir] {
            tokio::fs::create_dir_all(dir).await?;
            debug!("Directory ensured: {}", dir.display());
        }
        Ok(())
    }

    pub fn run_paths(&self, label: &str, now: DateTime<Local>) -> RunPaths {
        let stem = format!("{}_{}", now.format("%Y%m%d_%H%M%S"), slugify(label));
        let scene = self.scenes_dir.join(format!("scene_{stem}.pov"));
        RunPaths {
            backup: scene.with_extension("backup.pov"),
            metadata: scene.with_extension("metadata.json"),
            image: self.renders_dir.join(format!("render_{stem}.png")),
            animation: self.renders_dir.join(format!("render_{stem}.mp4")),
            scene,
            stem,
            renders_dir: self.renders_dir.clone(),
        }
    }

    pub async fn write_scene(&self, path: &Path, code: &str) -> Result<()> {
        tokio::fs::write(path, code).await?;
        debug!("Scene written: {} ({} chars)", path.display(), code.len());
        Ok(())
    }

    /// Keeps the raw generation next to the scene. A failed backup only warns.
    pub async fn backup_scene(&self, path: &Path, code: &str) -> Option<PathBuf> {
        if !self.backup_generations {
            return None;
        }
        match tokio::fs::write(path, code).await {
            Ok(()) => {
                debug!("Scene backup created: {}", path.display());
                Some(path.to_path_buf())
            }
            Err(e) => {
                warn!("Failed to create backup {}: {}", path.display(), e);
                None
            }
        }
    }

    pub async fn save_metadata<T: Serialize>(&self, path: &Path, record: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        tokio::fs::write(path, json).await?;
        debug!("Metadata saved: {}", path.display());
        Ok(())
    }
}

/// Deletes every registered path when dropped, on success and failure paths alike.
#[derive(Debug, Default)]
pub struct TempFiles {
    paths: Vec<PathBuf>,
}

impl TempFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, path: impl Into<PathBuf>) -> PathBuf {
        let path = path.into();
        self.paths.push(path.clone());
        path
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("Cleaned up temporary file: {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to clean up {}: {}", path.display(), e),
            }
        }
    }
}

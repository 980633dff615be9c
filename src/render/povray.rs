use super::{RenderJob, RenderOutcome, Renderer};
use crate::config::Config;
use crate::error::{Result, SceneError, TimeoutStage};
use crate::files::TempFiles;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Runs the `povray` binary once per job, driven by a generated INI file.
#[derive(Debug, Clone)]
pub struct PovRayRenderer {
    program: PathBuf,
    temp_dir: PathBuf,
}

static INI_SEQ: AtomicU64 = AtomicU64::new(0);

impl PovRayRenderer {
    pub fn new(config: &Config) -> Self {
        Self {
            program: config.renderer_bin.clone(),
            temp_dir: config.temp_dir.clone(),
        }
    }

    /// A fresh INI path under the temp dir, never next to the scene.
    fn ini_path(&self, scene_path: &Path) -> PathBuf {
        let stem = scene_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scene".to_string());
        let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let seq = INI_SEQ.fetch_add(1, Ordering::Relaxed);
        // Absolute: the renderer runs inside the scene directory.
        absolute(&self.temp_dir.join(format!("{stem}_{ts}_{}_{seq}.ini", std::process::id())))
    }

    async fn write_ini(&self, job: &RenderJob) -> Result<PathBuf> {
        if job.width == 0 || job.height == 0 {
            return Err(SceneError::validation(format!(
                "invalid dimensions: {}x{}",
                job.width, job.height
            )));
        }
        if !tokio::fs::try_exists(&job.scene_path).await? {
            return Err(SceneError::rendering(format!(
                "scene file does not exist: {}",
                job.scene_path.display()
            )));
        }
        if let Some(parent) = job.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::create_dir_all(&self.temp_dir).await?;
        let ini_path = self.ini_path(&job.scene_path);
        tokio::fs::write(&ini_path, ini_contents(job)).await?;
        debug!("INI file created: {}", ini_path.display());
        Ok(ini_path)
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn ini_contents(job: &RenderJob) -> String {
    let aa = &job.antialias;
    let mut ini = format!(
        "Input_File_Name=\"{}\"\n\
         Output_File_Name=\"{}\"\n\
         Output_File_Type=N\n\
         Width={}\n\
         Height={}\n\
         Quality={}\n\
         Antialias={}\n\
         Antialias_Threshold={}\n\
         Antialias_Depth={}\n\
         Output_Alpha=Off\n\
         Display=Off\n",
        absolute(&job.scene_path).display(),
        absolute(&job.output_path).display(),
        job.width,
        job.height,
        job.quality,
        if aa.enabled { "On" } else { "Off" },
        aa.threshold,
        aa.depth,
    );
    if let Some(clock) = job.clock {
        ini.push_str(&format!("Clock={clock}\n"));
    }
    ini
}

impl Renderer for PovRayRenderer {
    async fn render(&self, job: &RenderJob) -> Result<RenderOutcome> {
        let mut temps = TempFiles::new();
        let ini_path = temps.track(self.write_ini(job).await?);

        // Stale output from an earlier attempt must not count as success.
        match tokio::fs::remove_file(&job.output_path).await {
            Ok(()) => debug!("Removed stale output {}", job.output_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut cmd = Command::new(&self.program);
        cmd.arg(&ini_path)
            .args(["+P", "+V"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = job.scene_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }

        info!(
            "Rendering {} -> {} ({}x{}, Q{})",
            job.scene_path.display(),
            job.output_path.display(),
            job.width,
            job.height,
            job.quality
        );

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SceneError::dependency(format!(
                    "renderer '{}' not found. Install POV-Ray 3.7 or later",
                    self.program.display()
                ))
            } else {
                SceneError::rendering(format!("failed to start renderer: {e}"))
            }
        })?;

        let started = Instant::now();
        let output = match tokio::time::timeout(job.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                // Dropping the wait future drops the child, which kills it.
                error!("Rendering timed out after {:?}", job.timeout);
                return Err(SceneError::timeout(TimeoutStage::Render, job.timeout));
            }
        };
        let elapsed = started.elapsed();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            error!("Renderer exited with {}", output.status);
            debug!("Renderer stderr: {}", stderr);
            return Err(SceneError::rendering(format!(
                "renderer exited with {}:\n{}\n{}",
                output.status,
                stderr.trim(),
                stdout.trim()
            )));
        }

        let size = match tokio::fs::metadata(&job.output_path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if size == 0 {
            warn!(
                "Renderer reported success but output is missing: {}",
                job.output_path.display()
            );
            return Err(SceneError::rendering(format!(
                "renderer reported success but {} is missing or empty",
                job.output_path.display()
            )));
        }

        info!(
            "Render completed in {:.2}s: {} ({:.1} KB)",
            elapsed.as_secs_f64(),
            job.output_path.display(),
            size as f64 / 1024.0
        );
        Ok(RenderOutcome {
            output_path: job.output_path.clone(),
            output_size: size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Antialias;
    use std::time::Duration;

    fn job(dir: &Path, timeout: Duration) -> RenderJob {
        let scene_path = dir.join("scene.pov");
        std::fs::write(&scene_path, "sphere { 0, 1 }").unwrap();
        RenderJob {
            scene_path,
            output_path: dir.join("renders").join("out.png"),
            width: 320,
            height: 240,
            quality: 4,
            antialias: Antialias::default(),
            clock: Some(0.5),
            timeout,
        }
    }

    fn leftover_inis(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().extension().is_some_and(|x| x == "ini"))
                    .count()
            })
            .unwrap_or(0)
    }

    #[test]
    fn ini_paths_are_unique_and_outside_the_scene_dir() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = PovRayRenderer {
            program: PathBuf::from("povray"),
            temp_dir: dir.path().join("tmp"),
        };
        let scene = dir.path().join("myscene.pov");
        let first = renderer.ini_path(&scene);
        let second = renderer.ini_path(&scene);
        assert_ne!(first, second);
        assert!(first.starts_with(absolute(&dir.path().join("tmp"))));
        assert!(first.file_name().unwrap().to_string_lossy().starts_with("myscene_"));
        assert_ne!(first, absolute(&scene.with_extension("ini")));
    }

    #[test]
    fn ini_carries_settings_and_clock() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path(), Duration::from_secs(1));
        let ini = ini_contents(&job);
        assert!(ini.contains("Width=320\n"));
        assert!(ini.contains("Height=240\n"));
        assert!(ini.contains("Quality=4\n"));
        assert!(ini.contains("Antialias=On\n"));
        assert!(ini.contains("Antialias_Threshold=0.3\n"));
        assert!(ini.contains("Clock=0.5\n"));
        assert!(ini.contains("out.png\"\n"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_dependency_error() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = PovRayRenderer {
            program: dir.path().join("no-such-povray"),
            temp_dir: dir.path().join("tmp"),
        };
        let err = renderer
            .render(&job(dir.path(), Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, SceneError::Dependency(_)), "{err:?}");
        assert_eq!(leftover_inis(&dir.path().join("tmp")), 0);
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::testing::write_script;

        const WRITES_OUTPUT: &str = r#"#!/bin/sh
out=$(sed -n 's/^Output_File_Name="\(.*\)"$/\1/p' "$1")
printf 'PNG' > "$out"
"#;

        #[tokio::test]
        async fn successful_render_reports_the_output() {
            let dir = tempfile::tempdir().unwrap();
            let renderer = PovRayRenderer {
                program: write_script(dir.path(), "povray", WRITES_OUTPUT),
                temp_dir: dir.path().join("tmp"),
            };
            let outcome = renderer
                .render(&job(dir.path(), Duration::from_secs(10)))
                .await
                .unwrap();
            assert_eq!(outcome.output_size, 3);
            assert!(outcome.output_path.exists());
            assert_eq!(leftover_inis(&dir.path().join("tmp")), 0);
        }

        #[tokio::test]
        async fn an_ini_beside_the_scene_is_left_alone() {
            let dir = tempfile::tempdir().unwrap();
            let user_ini = dir.path().join("scene.ini");
            std::fs::write(&user_ini, "; hand-tuned settings\nWidth=1920\n").unwrap();
            let renderer = PovRayRenderer {
                program: write_script(dir.path(), "povray", WRITES_OUTPUT),
                temp_dir: dir.path().join("tmp"),
            };
            renderer
                .render(&job(dir.path(), Duration::from_secs(10)))
                .await
                .unwrap();
            assert_eq!(
                std::fs::read_to_string(&user_ini).unwrap(),
                "; hand-tuned settings\nWidth=1920\n"
            );
            assert_eq!(leftover_inis(&dir.path().join("tmp")), 0);
        }

        #[tokio::test]
        async fn nonzero_exit_is_a_rendering_error_with_the_log() {
            let dir = tempfile::tempdir().unwrap();
            let script = "#!/bin/sh\necho 'Parse Error: No matching } in sphere' >&2\nexit 1\n";
            let renderer = PovRayRenderer {
                program: write_script(dir.path(), "povray", script),
                temp_dir: dir.path().join("tmp"),
            };
            let err = renderer
                .render(&job(dir.path(), Duration::from_secs(10)))
                .await
                .unwrap_err();
            match err {
                SceneError::Rendering(msg) => assert!(msg.contains("Parse Error"), "{msg}"),
                other => panic!("unexpected {other:?}"),
            }
        }

        #[tokio::test]
        async fn clean_exit_without_output_is_a_rendering_error() {
            let dir = tempfile::tempdir().unwrap();
            let renderer = PovRayRenderer {
                program: write_script(dir.path(), "povray", "#!/bin/sh\nexit 0\n"),
                temp_dir: dir.path().join("tmp"),
            };
            let err = renderer
                .render(&job(dir.path(), Duration::from_secs(10)))
                .await
                .unwrap_err();
            assert!(matches!(err, SceneError::Rendering(_)), "{err:?}");
        }

        #[tokio::test]
        async fn hung_renderer_times_out() {
            let dir = tempfile::tempdir().unwrap();
            let renderer = PovRayRenderer {
                program: write_script(dir.path(), "povray", "#!/bin/sh\nexec sleep 30\n"),
                temp_dir: dir.path().join("tmp"),
            };
            let started = Instant::now();
            let err = renderer
                .render(&job(dir.path(), Duration::from_millis(300)))
                .await
                .unwrap_err();
            assert!(
                matches!(err, SceneError::Timeout { stage: TimeoutStage::Render, .. }),
                "{err:?}"
            );
            assert!(started.elapsed() < Duration::from_secs(10));
        }
    }
}

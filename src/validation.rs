//! Pure checks on prompts, resolutions and generated SDL.
//!
//! Nothing here performs I/O. SDL checks stay shallow: braces and a
//! handful of structural keywords, never a real parse.

use crate::error::{Result, SceneError};
use std::sync::OnceLock;

use regex::Regex;

pub const MIN_PROMPT_CHARS: usize = 5;
pub const MAX_PROMPT_CHARS: usize = 4000;
pub const MAX_DIMENSION: u32 = 8192;
pub const MAX_PIXELS: u64 = 50_000_000;
pub const MAX_FRAMES: usize = 10_000;

const DENYLIST: [&str; 4] = ["exec(", "eval(", "system(", "subprocess"];
pub const STANDARD_INCLUDES: [&str; 3] = ["colors.inc", "textures.inc", "finish.inc"];

pub const RESOLUTION_PRESETS: [(&str, (u32, u32)); 5] = [
    ("480p", (854, 480)),
    ("720p", (1280, 720)),
    ("1080p", (1920, 1080)),
    ("1440p", (2560, 1440)),
    ("4k", (3840, 2160)),
];

pub fn validate_prompt(prompt: &str) -> Result<()> {
    let trimmed = prompt.trim();
    let mut problems = Vec::new();

    if trimmed.is_empty() {
        problems.push("prompt cannot be empty".to_string());
    } else if trimmed.chars().count() < MIN_PROMPT_CHARS {
        problems.push(format!(
            "prompt must be at least {MIN_PROMPT_CHARS} characters long"
        ));
    }

    let len = prompt.chars().count();
    if len > MAX_PROMPT_CHARS {
        problems.push(format!(
            "prompt is {len} characters, maximum is {MAX_PROMPT_CHARS}"
        ));
    }

    let lowered = prompt.to_lowercase();
    for pattern in DENYLIST {
        if lowered.contains(pattern) {
            problems.push(format!("prompt contains disallowed pattern: {pattern}"));
        }
    }

    if prompt.matches('{').count() != prompt.matches('}').count() {
        problems.push("unbalanced braces in prompt".to_string());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(SceneError::validation(problems.join("; ")))
    }
}

pub fn resolution_preset(name: &str) -> Result<(u32, u32)> {
    let wanted = name.trim().to_ascii_lowercase();
    RESOLUTION_PRESETS
        .iter()
        .find(|(preset, _)| *preset == wanted)
        .map(|(_, dims)| *dims)
        .ok_or_else(|| {
            let known: Vec<_> = RESOLUTION_PRESETS.iter().map(|(p, _)| *p).collect();
            SceneError::validation(format!(
                "unknown resolution preset '{name}' (expected one of {})",
                known.join(", ")
            ))
        })
}

/// Absent dimensions are rejected here rather than compared against the bounds.
pub fn validate_resolution(width: Option<u32>, height: Option<u32>) -> Result<(u32, u32)> {
    let (Some(width), Some(height)) = (width, height) else {
        return Err(SceneError::validation(
            "resolution dimensions cannot be absent",
        ));
    };

    if width == 0 || height == 0 {
        return Err(SceneError::validation(format!(
            "resolution must be positive, got {width}x{height}"
        )));
    }
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(SceneError::validation(format!(
            "resolution {width}x{height} exceeds {MAX_DIMENSION}x{MAX_DIMENSION}"
        )));
    }
    if u64::from(width) * u64::from(height) > MAX_PIXELS {
        return Err(SceneError::validation(format!(
            "resolution {width}x{height} exceeds 50 megapixels"
        )));
    }

    Ok((width, height))
}

/// Checks a requested frame count, explicit or derived from duration × fps.
pub fn validate_frame_count(frames: f64) -> Result<usize> {
    if !frames.is_finite() || frames < 0.0 {
        return Err(SceneError::validation(format!(
            "frame count must be a non-negative number, got {frames}"
        )));
    }
    if frames > MAX_FRAMES as f64 {
        return Err(SceneError::validation(format!(
            "animation of {frames} frames exceeds the limit of {MAX_FRAMES}"
        )));
    }
    Ok(frames as usize)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl CodeReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn validate_scene_code(code: &str) -> CodeReport {
    let mut report = CodeReport::default();

    if code.trim().is_empty() {
        report.errors.push("scene code cannot be empty".to_string());
        return report;
    }

    let open = code.matches('{').count();
    let close = code.matches('}').count();
    if open != close {
        report.errors.push(format!(
            "unbalanced braces: {open} opening, {close} closing"
        ));
    }

    for include in STANDARD_INCLUDES {
        if !has_include(code, include) {
            report
                .warnings
                .push(format!("scene code may be missing include: {include}"));
        }
    }

    let lowered = code.to_lowercase();
    if !lowered.contains("camera") {
        report
            .warnings
            .push("no camera definition found in scene".to_string());
    }
    if !lowered.contains("light_source") {
        report
            .warnings
            .push("no light source definition found in scene".to_string());
    }

    report
}

fn has_include(code: &str, include: &str) -> bool {
    code.contains(&format!("#include \"{include}\""))
}

/// Prepends missing standard includes and closes dangling braces.
pub fn fix_common_issues(code: &str) -> String {
    let mut fixed = String::new();
    for include in STANDARD_INCLUDES {
        if !has_include(code, include) {
            fixed.push_str(&format!("#include \"{include}\"\n"));
        }
    }
    fixed.push_str(code);

    let open = code.matches('{').count();
    let close = code.matches('}').count();
    if open > close {
        fixed.push('\n');
        fixed.push_str(&"}".repeat(open - close));
        fixed.push('\n');
    }
    fixed
}

/// Removes a surrounding markdown code fence from model output.
pub fn strip_code_fences(text: &str) -> String {
    static OPEN_FENCE: OnceLock<Regex> = OnceLock::new();
    static CLOSE_FENCE: OnceLock<Regex> = OnceLock::new();

    let open = OPEN_FENCE.get_or_init(|| {
        Regex::new(r"(?m)^```[A-Za-z0-9_-]*[ \t]*\r?\n").expect("open fence regex should compile")
    });
    let close = CLOSE_FENCE.get_or_init(|| {
        Regex::new(r"(?m)\r?\n```[ \t]*$").expect("close fence regex should compile")
    });

    let trimmed = text.trim();
    let without_open = open.replace(trimmed, "");
    let without_close = close.replace(&without_open, "");
    without_close.trim().to_string()
}

/// Picks the lines of a renderer log that explain a failure.
///
/// Parse and fatal errors plus a few lines of context; otherwise the tail of the log.
pub fn extract_relevant_error(log: &str) -> String {
    const CONTEXT_LINES: usize = 10;
    const TAIL_LINES: usize = 20;

    let lines: Vec<&str> = log.lines().collect();
    let mut relevant = Vec::new();
    let mut capturing = false;

    for line in &lines {
        if line.contains("Parse Error") || line.contains("Fatal error") {
            relevant.push(*line);
            capturing = true;
        } else if line.contains("Parse Warning") {
            continue;
        } else if capturing && relevant.len() < CONTEXT_LINES {
            relevant.push(*line);
        }
    }

    if relevant.is_empty() {
        let start = lines.len().saturating_sub(TAIL_LINES);
        lines[start..].join("\n")
    } else {
        relevant.join("\n")
    }
}

use anyhow::{bail, Context, Result};
use image::DynamicImage;
use std::path::Path;
use std::process::Command;

/// Extracts one decoded frame at a time offset into a video.
pub trait ThumbnailExtractor: Send + Sync {
    fn extract(&self, path: &Path, offset_seconds: f64) -> Result<DynamicImage>;
}

/// Decodes a single frame by piping it out of `ffmpeg` as PNG.
pub struct FfmpegThumbnailExtractor;

impl FfmpegThumbnailExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FfmpegThumbnailExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ThumbnailExtractor for FfmpegThumbnailExtractor {
    fn extract(&self, path: &Path, offset_seconds: f64) -> Result<DynamicImage> {
        let output = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            .arg("-ss")
            .arg(format!("{offset_seconds:.3}"))
            .arg("-i")
            .arg(path)
            .args(["-frames:v", "1", "-f", "image2", "-c:v", "png", "pipe:1"])
            .output()
            .context("Failed to execute ffmpeg")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "ffmpeg failed to extract frame at {offset_seconds:.3}s from {}: {}",
                path.display(),
                stderr.trim()
            );
        }
        if output.stdout.is_empty() {
            bail!(
                "ffmpeg produced no frame at {offset_seconds:.3}s for {}",
                path.display()
            );
        }

        image::load_from_memory(&output.stdout)
            .with_context(|| format!("undecodable frame from {}", path.display()))
    }
}

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

/// Media metadata lookups. Failures are surfaced as errors; the record
/// layer downgrades a failed duration probe to the zero sentinel.
pub trait MediaProbe: Send + Sync {
    fn duration(&self, path: &Path) -> Result<Duration>;

    fn file_size(&self, path: &Path) -> Result<u64> {
        Ok(fs::metadata(path)?.len())
    }
}

/// Probes duration by invoking `ffprobe`.
pub struct FfprobeMediaProbe;

impl FfprobeMediaProbe {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FfprobeMediaProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaProbe for FfprobeMediaProbe {
    fn duration(&self, path: &Path) -> Result<Duration> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "csv=p=0",
            ])
            .arg(path)
            .output()
            .context("Failed to execute ffprobe")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("ffprobe failed for {}: {}", path.display(), stderr.trim());
        }

        parse_duration_seconds(&String::from_utf8_lossy(&output.stdout))
    }
}

fn parse_duration_seconds(raw: &str) -> Result<Duration> {
    let seconds: f64 = raw
        .trim()
        .parse()
        .with_context(|| format!("unparseable duration: {raw:?}"))?;
    if !seconds.is_finite() || seconds < 0.0 {
        bail!("invalid duration value: {seconds}");
    }
    Ok(Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fractional_seconds() {
        let duration = parse_duration_seconds("2425.237007\n").unwrap();
        assert_eq!(duration.as_secs(), 2425);
    }

    #[test]
    fn rejects_garbage_and_negative_values() {
        assert!(parse_duration_seconds("N/A").is_err());
        assert!(parse_duration_seconds("").is_err());
        assert!(parse_duration_seconds("-3.0").is_err());
    }
}

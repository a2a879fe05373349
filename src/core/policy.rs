use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File extensions treated as video files when none are configured.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg",
];

/// Everything one pass needs: where to look and how to compare.
/// A running pass keeps the configuration it was started with; updates
/// only affect future passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub folder: FolderSettings,
    pub comparison: ComparisonPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderSettings {
    /// Root of the watched directory tree.
    pub base_path: PathBuf,
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Subtrees skipped during discovery and ignored by the watcher.
    pub excluded_directories: Vec<PathBuf>,
    /// Allowed extensions, stored lowercase without the leading dot.
    pub file_extensions: Vec<String>,
    /// Location of the persisted record cache.
    pub cache_path: PathBuf,
}

impl FolderSettings {
    pub fn new(base_path: impl Into<PathBuf>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            recursive: true,
            excluded_directories: Vec::new(),
            file_extensions: DEFAULT_EXTENSIONS.iter().map(ToString::to_string).collect(),
            cache_path: cache_path.into(),
        }
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.file_extensions = extensions
            .into_iter()
            .map(|ext| normalize_extension(ext.as_ref()))
            .collect();
        self
    }

    /// Extension filter, case-insensitive. Files without an extension never match.
    pub fn allows_extension(&self, path: &Path) -> bool {
        let Some(ext) = path.extension() else {
            return false;
        };
        let ext = ext.to_string_lossy().to_lowercase();
        self.file_extensions.iter().any(|allowed| *allowed == ext)
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim_start_matches('.').to_lowercase()
}

/// Governs whether two durations are considered equal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DurationRule {
    /// Durations match when they differ by less than this many seconds.
    AbsoluteSeconds(f64),
    /// Durations match when they differ by less than this percentage of the
    /// first operand's duration. The first operand is the percentage base;
    /// the rule is deliberately not symmetric.
    RelativePercent(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComparisonPolicy {
    pub duration_rule: DurationRule,
    /// Evenly spaced frames sampled per video.
    pub thumbnail_count: u32,
    /// Per-thumbnail difference threshold, in percent.
    pub max_difference_percent: f64,
    /// Differing thumbnail pairs tolerated before a pair is declared non-duplicate.
    pub max_different_thumbnails: u32,
}

impl Default for ComparisonPolicy {
    fn default() -> Self {
        Self {
            duration_rule: DurationRule::AbsoluteSeconds(2.0),
            thumbnail_count: 5,
            max_difference_percent: 10.0,
            max_different_thumbnails: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_filter_is_case_insensitive() {
        let folder = FolderSettings::new("/videos", "/videos/cache.json");

        assert!(folder.allows_extension(Path::new("/videos/a.mp4")));
        assert!(folder.allows_extension(Path::new("/videos/a.MP4")));
        assert!(folder.allows_extension(Path::new("/videos/b.Mkv")));
        assert!(!folder.allows_extension(Path::new("/videos/notes.txt")));
        assert!(!folder.allows_extension(Path::new("/videos/no_extension")));
    }

    #[test]
    fn with_extensions_normalizes_dots_and_case() {
        let folder = FolderSettings::new("/videos", "/videos/cache.json")
            .with_extensions([".MP4", "Mov"]);

        assert_eq!(folder.file_extensions, vec!["mp4", "mov"]);
        assert!(folder.allows_extension(Path::new("clip.mp4")));
        assert!(folder.allows_extension(Path::new("clip.mov")));
        assert!(!folder.allows_extension(Path::new("clip.mkv")));
    }
}

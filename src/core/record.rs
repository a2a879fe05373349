use crate::services::{MediaProbe, ThumbnailExtractor};
use image::DynamicImage;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

/// One inventoried video file.
///
/// Identity is the path: two records are equal iff their paths are equal.
/// Duration and size are resolved once and never change for the lifetime of
/// the record; if the underlying file changes, delete and recreate the
/// record instead. A duration that cannot be probed resolves to
/// `Duration::ZERO`, which marks the record invalid for comparison.
#[derive(Debug)]
pub struct VideoRecord {
    path: PathBuf,
    duration: OnceLock<Duration>,
    file_size: OnceLock<u64>,
    /// Per-pass frame cache, discarded once the record's comparisons are
    /// done. Failed extractions are cached too so a broken file is not
    /// re-probed for every pair.
    thumbnails: Mutex<HashMap<u32, Option<Arc<DynamicImage>>>>,
}

impl VideoRecord {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            duration: OnceLock::new(),
            file_size: OnceLock::new(),
            thumbnails: Mutex::new(HashMap::new()),
        }
    }

    /// Rebuild a record from persisted cache fields.
    pub fn from_cache(
        path: impl Into<PathBuf>,
        duration: Option<Duration>,
        file_size: Option<u64>,
    ) -> Self {
        let record = Self::new(path);
        if let Some(duration) = duration {
            let _ = record.duration.set(duration);
        }
        if let Some(file_size) = file_size {
            let _ = record.file_size.set(file_size);
        }
        record
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Resolve the duration, probing on first access. A probe failure
    /// resolves to the zero sentinel and is never retried.
    pub fn resolve_duration(&self, probe: &dyn MediaProbe) -> Duration {
        *self.duration.get_or_init(|| match probe.duration(&self.path) {
            Ok(duration) => duration,
            Err(err) => {
                log::warn!("duration probe failed for {}: {err:#}", self.path.display());
                Duration::ZERO
            }
        })
    }

    pub fn cached_duration(&self) -> Option<Duration> {
        self.duration.get().copied()
    }

    /// Resolve the byte size, reading it on first access. Rarely needed by
    /// comparison; kept for future heuristics.
    pub fn resolve_file_size(&self, probe: &dyn MediaProbe) -> u64 {
        *self.file_size.get_or_init(|| match probe.file_size(&self.path) {
            Ok(size) => size,
            Err(err) => {
                log::warn!("size lookup failed for {}: {err:#}", self.path.display());
                0
            }
        })
    }

    pub fn cached_file_size(&self) -> Option<u64> {
        self.file_size.get().copied()
    }

    /// Fetch the frame for one sample index, extracting and caching it on
    /// first access. Sample `index` of `count` sits at offset
    /// `duration / (count + 1) * (index + 1)`. Returns `None` when the
    /// duration is unresolved or zero, or when extraction failed.
    pub fn thumbnail(
        &self,
        index: u32,
        count: u32,
        extractor: &dyn ThumbnailExtractor,
    ) -> Option<Arc<DynamicImage>> {
        let duration = match self.cached_duration() {
            Some(duration) if !duration.is_zero() => duration,
            _ => return None,
        };

        let mut cache = self.thumbnails.lock().unwrap();
        cache
            .entry(index)
            .or_insert_with(|| {
                let stepping = duration.as_secs_f64() / f64::from(count + 1);
                let offset = stepping * f64::from(index + 1);
                match extractor.extract(&self.path, offset) {
                    Ok(frame) => Some(Arc::new(frame)),
                    Err(err) => {
                        log::warn!(
                            "thumbnail {index} extraction failed for {}: {err:#}",
                            self.path.display()
                        );
                        None
                    }
                }
            })
            .clone()
    }

    /// Drop all cached frames. Called once the record's comparisons for the
    /// current pass are finished; frames are never persisted.
    pub fn discard_thumbnails(&self) {
        self.thumbnails.lock().unwrap().clear();
    }
}

impl PartialEq for VideoRecord {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for VideoRecord {}

impl Hash for VideoRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use image::DynamicImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProbe {
        duration: Option<Duration>,
        calls: AtomicUsize,
    }

    impl CountingProbe {
        fn new(duration: Option<Duration>) -> Self {
            Self {
                duration,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl MediaProbe for CountingProbe {
        fn duration(&self, _path: &Path) -> Result<Duration> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.duration.ok_or_else(|| anyhow!("probe failed"))
        }
    }

    struct CountingExtractor {
        calls: AtomicUsize,
    }

    impl ThumbnailExtractor for CountingExtractor {
        fn extract(&self, _path: &Path, _offset_seconds: f64) -> Result<DynamicImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DynamicImage::new_luma8(4, 4))
        }
    }

    #[test]
    fn duration_is_probed_once_and_memoized() {
        let record = VideoRecord::new("/videos/a.mp4");
        let probe = CountingProbe::new(Some(Duration::from_secs(90)));

        assert_eq!(record.cached_duration(), None);
        assert_eq!(record.resolve_duration(&probe), Duration::from_secs(90));
        assert_eq!(record.resolve_duration(&probe), Duration::from_secs(90));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert_eq!(record.cached_duration(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn failed_probe_resolves_to_zero_sentinel() {
        let record = VideoRecord::new("/videos/broken.mp4");
        let probe = CountingProbe::new(None);

        assert_eq!(record.resolve_duration(&probe), Duration::ZERO);
        // The sentinel is memoized; the probe is not retried.
        assert_eq!(record.resolve_duration(&probe), Duration::ZERO);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn thumbnails_are_cached_until_discarded() {
        let record =
            VideoRecord::from_cache("/videos/a.mp4", Some(Duration::from_secs(60)), None);
        let extractor = CountingExtractor {
            calls: AtomicUsize::new(0),
        };

        assert!(record.thumbnail(0, 3, &extractor).is_some());
        assert!(record.thumbnail(0, 3, &extractor).is_some());
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);

        record.discard_thumbnails();
        assert!(record.thumbnail(0, 3, &extractor).is_some());
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn no_thumbnail_without_resolved_duration() {
        let record = VideoRecord::new("/videos/a.mp4");
        let extractor = CountingExtractor {
            calls: AtomicUsize::new(0),
        };

        assert!(record.thumbnail(0, 3, &extractor).is_none());
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn equality_is_by_path_only() {
        let a = VideoRecord::from_cache("/videos/a.mp4", Some(Duration::from_secs(10)), None);
        let b = VideoRecord::new("/videos/a.mp4");
        let c = VideoRecord::new("/videos/c.mp4");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}

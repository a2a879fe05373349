use crate::core::record::VideoRecord;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persisted form of one record: the path plus whatever metadata had been
/// resolved when the cache was written. Thumbnails are never persisted.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    path: PathBuf,
    duration_secs: Option<f64>,
    file_size: Option<u64>,
}

/// The baseline record set, unique by path. Storage order is irrelevant;
/// the engine sorts by duration when it compares.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: Vec<VideoRecord>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the persisted cache. Any read or deserialization failure yields
    /// an empty store; a corrupt cache is rebuilt by the next scan, never a
    /// fatal error.
    pub fn load(cache_path: &Path) -> Self {
        let raw = match fs::read_to_string(cache_path) {
            Ok(raw) => raw,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    log::warn!("unreadable record cache {}: {err}", cache_path.display());
                }
                return Self::new();
            }
        };

        let entries: Vec<CacheEntry> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(err) => {
                log::warn!("corrupt record cache {}: {err}", cache_path.display());
                return Self::new();
            }
        };

        let records = entries
            .into_iter()
            .map(|entry| {
                VideoRecord::from_cache(
                    entry.path,
                    entry.duration_secs.map(Duration::from_secs_f64),
                    entry.file_size,
                )
            })
            .collect();
        Self { records }
    }

    /// Write the entire current set, superseding the previous cache content.
    pub fn save(&self, cache_path: &Path) -> io::Result<()> {
        let entries: Vec<CacheEntry> = self
            .records
            .iter()
            .map(|record| CacheEntry {
                path: record.path().to_path_buf(),
                duration_secs: record.cached_duration().map(|d| d.as_secs_f64()),
                file_size: record.cached_file_size(),
            })
            .collect();

        let json = serde_json::to_string_pretty(&entries)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        fs::write(cache_path, json)
    }

    /// Deterministic merge of the persisted cache with a fresh directory
    /// listing: cache entries for vanished files are dropped, entries
    /// outside the root's immediate directory are dropped when recursion is
    /// off, and newly discovered paths are added without duplicating ones
    /// the cache already knows.
    pub fn reconcile(
        cached: Self,
        discovered: Vec<PathBuf>,
        recursive: bool,
        base_path: &Path,
    ) -> Self {
        let mut records = cached.records;
        if !recursive {
            records.retain(|record| record.path().parent() == Some(base_path));
        }
        records.retain(|record| record.path().exists());

        for path in discovered {
            if !records.iter().any(|record| record.path() == path) {
                records.push(VideoRecord::new(path));
            }
        }
        Self { records }
    }

    pub fn add(&mut self, record: VideoRecord) {
        if !self.contains(record.path()) {
            self.records.push(record);
        }
    }

    pub fn remove(&mut self, path: &Path) -> bool {
        let before = self.records.len();
        self.records.retain(|record| record.path() != path);
        self.records.len() != before
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.records.iter().any(|record| record.path() == path)
    }

    pub fn get(&self, path: &Path) -> Option<&VideoRecord> {
        self.records.iter().find(|record| record.path() == path)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[VideoRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [VideoRecord] {
        &mut self.records
    }

    /// Drop records whose resolved duration is the zero sentinel
    /// (unreadable or not real media).
    pub fn retain_valid(&mut self) {
        self.records
            .retain(|record| record.cached_duration().is_some_and(|d| !d.is_zero()));
    }
}

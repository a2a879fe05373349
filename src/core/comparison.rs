use crate::core::policy::{ComparisonPolicy, DurationRule};
use crate::core::record::VideoRecord;
use crate::services::{ImageDifferencer, ThumbnailExtractor};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Observations emitted while a pass runs; the engine turns these into
/// log and progress events.
#[derive(Debug, Clone, PartialEq)]
pub enum CompareEvent {
    Checking { path: PathBuf, duration: Duration },
    Progress { current: usize, total: usize },
    DuplicateFound { first: PathBuf, second: PathBuf },
}

/// Applies one immutable comparison policy to record pairs.
pub struct Comparer<'a> {
    policy: &'a ComparisonPolicy,
    thumbnails: &'a dyn ThumbnailExtractor,
    differencer: &'a dyn ImageDifferencer,
}

impl<'a> Comparer<'a> {
    pub fn new(
        policy: &'a ComparisonPolicy,
        thumbnails: &'a dyn ThumbnailExtractor,
        differencer: &'a dyn ImageDifferencer,
    ) -> Self {
        Self {
            policy,
            thumbnails,
            differencer,
        }
    }

    /// Duration equality under the configured rule. The relative rule uses
    /// the first operand's duration as the percentage base, so the check is
    /// not symmetric in its arguments.
    pub fn is_duration_equal(&self, first: &VideoRecord, second: &VideoRecord) -> bool {
        let a = first.cached_duration().unwrap_or(Duration::ZERO).as_secs_f64();
        let b = second.cached_duration().unwrap_or(Duration::ZERO).as_secs_f64();
        match self.policy.duration_rule {
            DurationRule::AbsoluteSeconds(max) => (a - b).abs() < max,
            DurationRule::RelativePercent(max) => (a - b).abs() < a * max / 100.0,
        }
    }

    /// Sample evenly spaced frames from both records and count the pairs
    /// whose difference exceeds the threshold. Stops sampling as soon as
    /// the tolerated count is exceeded. A failed extraction counts as a
    /// maximally different sample rather than being skipped, biasing
    /// failures toward "not a duplicate".
    pub fn are_thumbnails_equal(&self, first: &VideoRecord, second: &VideoRecord) -> bool {
        let count = self.policy.thumbnail_count;
        let threshold = self.policy.max_difference_percent / 100.0;
        let mut different = 0u32;

        for index in 0..count {
            let score = match (
                first.thumbnail(index, count, self.thumbnails),
                second.thumbnail(index, count, self.thumbnails),
            ) {
                (Some(a), Some(b)) => self.differencer.difference(&a, &b),
                _ => 1.0,
            };
            log::debug!(
                "sample {index} difference {score:.3} for {} / {}",
                first.path().display(),
                second.path().display()
            );

            if score > threshold {
                different += 1;
            }
            if different > self.policy.max_different_thumbnails {
                return false;
            }
        }
        true
    }

    /// Full pairwise pass. Records are sorted by ascending duration, so the
    /// inner loop can stop at the first record that falls outside the
    /// duration window; everything after it is even further away. Every
    /// passing pair is reported; no dedup-of-duplicates is performed. A
    /// record's frames are discarded once its row is finished.
    pub fn find_duplicates(
        &self,
        records: &mut [VideoRecord],
        cancel: &AtomicBool,
        on_event: &mut dyn FnMut(CompareEvent),
    ) {
        records.sort_by_key(|record| record.cached_duration().unwrap_or(Duration::ZERO));
        let total = records.len();
        on_event(CompareEvent::Progress { current: 0, total });

        for index in 0..total.saturating_sub(1) {
            if cancel.load(Ordering::Relaxed) {
                return;
            }

            let record = &records[index];
            on_event(CompareEvent::Checking {
                path: record.path().to_path_buf(),
                duration: record.cached_duration().unwrap_or(Duration::ZERO),
            });
            on_event(CompareEvent::Progress {
                current: index + 1,
                total,
            });

            for next in index + 1..total {
                if cancel.load(Ordering::Relaxed) {
                    return;
                }
                let other = &records[next];
                if !self.is_duration_equal(record, other) {
                    break;
                }
                if self.are_thumbnails_equal(record, other) {
                    on_event(CompareEvent::DuplicateFound {
                        first: record.path().to_path_buf(),
                        second: other.path().to_path_buf(),
                    });
                }
            }

            records[index].discard_thumbnails();
        }

        on_event(CompareEvent::Progress {
            current: total,
            total,
        });
    }

    /// Targeted pass for one new or changed record: scan the entire current
    /// list, since a single insertion does not justify re-sorting. Existing
    /// records are the first operand of the duration rule, matching the
    /// full pass where the longer-known record drives the window.
    pub fn find_duplicates_of(
        &self,
        records: &[VideoRecord],
        target: &VideoRecord,
        cancel: &AtomicBool,
        on_event: &mut dyn FnMut(CompareEvent),
    ) {
        for other in records {
            if cancel.load(Ordering::Relaxed) {
                return;
            }
            if other.path() == target.path() {
                continue;
            }
            if !self.is_duration_equal(other, target) {
                continue;
            }
            if self.are_thumbnails_equal(other, target) {
                on_event(CompareEvent::DuplicateFound {
                    first: target.path().to_path_buf(),
                    second: other.path().to_path_buf(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use image::DynamicImage;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Extractor that records which paths were sampled and optionally fails.
    struct TrackingExtractor {
        calls: AtomicUsize,
        sampled_paths: Mutex<Vec<PathBuf>>,
        fail: bool,
    }

    impl TrackingExtractor {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                sampled_paths: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new()
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ThumbnailExtractor for TrackingExtractor {
        fn extract(&self, path: &Path, _offset_seconds: f64) -> Result<DynamicImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.sampled_paths.lock().unwrap().push(path.to_path_buf());
            if self.fail {
                return Err(anyhow!("no frame"));
            }
            Ok(DynamicImage::new_luma8(4, 4))
        }
    }

    struct FixedDifferencer {
        score: f64,
    }

    impl ImageDifferencer for FixedDifferencer {
        fn difference(&self, _a: &DynamicImage, _b: &DynamicImage) -> f64 {
            self.score
        }
    }

    fn record(path: &str, secs: f64) -> VideoRecord {
        VideoRecord::from_cache(path, Some(Duration::from_secs_f64(secs)), None)
    }

    fn policy(rule: DurationRule) -> ComparisonPolicy {
        ComparisonPolicy {
            duration_rule: rule,
            ..ComparisonPolicy::default()
        }
    }

    #[test]
    fn absolute_rule_uses_strict_window() {
        let extractor = TrackingExtractor::new();
        let differencer = FixedDifferencer { score: 0.0 };
        let policy = policy(DurationRule::AbsoluteSeconds(3.0));
        let comparer = Comparer::new(&policy, &extractor, &differencer);

        assert!(comparer.is_duration_equal(&record("/a", 10.0), &record("/b", 12.0)));
        assert!(!comparer.is_duration_equal(&record("/a", 10.0), &record("/b", 13.0)));
    }

    #[test]
    fn relative_rule_is_asymmetric_in_the_first_operand() {
        let extractor = TrackingExtractor::new();
        let differencer = FixedDifferencer { score: 0.0 };
        let policy = policy(DurationRule::RelativePercent(10.0));
        let comparer = Comparer::new(&policy, &extractor, &differencer);

        let shorter = record("/shorter", 90.0);
        let longer = record("/longer", 99.5);

        // |90 - 99.5| = 9.5 >= 9.0 (10% of 90) but < 9.95 (10% of 99.5):
        // equal only when the longer file is the percentage base.
        assert!(!comparer.is_duration_equal(&shorter, &longer));
        assert!(comparer.is_duration_equal(&longer, &shorter));
    }

    #[test]
    fn thumbnail_short_circuit_stops_sampling() {
        let extractor = TrackingExtractor::new();
        let differencer = FixedDifferencer { score: 1.0 };
        let policy = ComparisonPolicy {
            duration_rule: DurationRule::AbsoluteSeconds(3.0),
            thumbnail_count: 5,
            max_difference_percent: 10.0,
            max_different_thumbnails: 1,
        };
        let comparer = Comparer::new(&policy, &extractor, &differencer);

        let a = record("/a", 10.0);
        let b = record("/b", 10.0);
        assert!(!comparer.are_thumbnails_equal(&a, &b));

        // Two differing samples exceed the tolerated one; samples 2..5 are
        // never extracted. Two extractions per sample.
        assert_eq!(extractor.call_count(), 4);
    }

    #[test]
    fn extraction_failure_counts_as_maximal_difference() {
        let extractor = TrackingExtractor::failing();
        let differencer = FixedDifferencer { score: 0.0 };
        let policy = ComparisonPolicy {
            duration_rule: DurationRule::AbsoluteSeconds(3.0),
            thumbnail_count: 3,
            max_difference_percent: 10.0,
            max_different_thumbnails: 0,
        };
        let comparer = Comparer::new(&policy, &extractor, &differencer);

        let a = record("/a", 10.0);
        let b = record("/b", 10.0);
        assert!(!comparer.are_thumbnails_equal(&a, &b));
    }

    #[test]
    fn duration_window_prunes_sorted_tail() {
        let extractor = TrackingExtractor::new();
        let differencer = FixedDifferencer { score: 0.0 };
        let policy = ComparisonPolicy {
            duration_rule: DurationRule::AbsoluteSeconds(3.0),
            thumbnail_count: 1,
            max_difference_percent: 10.0,
            max_different_thumbnails: 0,
        };
        let comparer = Comparer::new(&policy, &extractor, &differencer);

        let mut records = vec![
            record("/ten", 10.0),
            record("/twelve", 12.0),
            record("/forty", 40.0),
        ];
        let cancel = AtomicBool::new(false);
        let mut duplicates = Vec::new();
        comparer.find_duplicates(&mut records, &cancel, &mut |event| {
            if let CompareEvent::DuplicateFound { first, second } = event {
                duplicates.push((first, second));
            }
        });

        // Only the 10s/12s pair is within the window; the 40s record never
        // reaches thumbnail comparison.
        assert_eq!(
            duplicates,
            vec![(PathBuf::from("/ten"), PathBuf::from("/twelve"))]
        );
        let sampled = extractor.sampled_paths.lock().unwrap();
        assert!(!sampled.contains(&PathBuf::from("/forty")));
        assert_eq!(extractor.call_count(), 2);
    }

    #[test]
    fn full_pass_reports_every_passing_pair() {
        let extractor = TrackingExtractor::new();
        let differencer = FixedDifferencer { score: 0.0 };
        let policy = ComparisonPolicy {
            duration_rule: DurationRule::AbsoluteSeconds(5.0),
            thumbnail_count: 1,
            max_difference_percent: 10.0,
            max_different_thumbnails: 0,
        };
        let comparer = Comparer::new(&policy, &extractor, &differencer);

        let mut records = vec![record("/a", 10.0), record("/b", 11.0), record("/c", 12.0)];
        let cancel = AtomicBool::new(false);
        let mut duplicates = 0;
        comparer.find_duplicates(&mut records, &cancel, &mut |event| {
            if matches!(event, CompareEvent::DuplicateFound { .. }) {
                duplicates += 1;
            }
        });

        // a-b, a-c and b-c all pass; a file may be reported against
        // multiple others.
        assert_eq!(duplicates, 3);
    }

    #[test]
    fn cancellation_stops_the_pass_between_pairs() {
        let extractor = TrackingExtractor::new();
        let differencer = FixedDifferencer { score: 0.0 };
        let policy = ComparisonPolicy {
            duration_rule: DurationRule::AbsoluteSeconds(5.0),
            thumbnail_count: 1,
            max_difference_percent: 10.0,
            max_different_thumbnails: 0,
        };
        let comparer = Comparer::new(&policy, &extractor, &differencer);

        let mut records = vec![record("/a", 10.0), record("/b", 11.0), record("/c", 12.0)];
        let cancel = AtomicBool::new(true);
        let mut events = Vec::new();
        comparer.find_duplicates(&mut records, &cancel, &mut |event| events.push(event));

        assert_eq!(
            events,
            vec![CompareEvent::Progress {
                current: 0,
                total: 3
            }]
        );
        assert_eq!(extractor.call_count(), 0);
    }

    #[test]
    fn targeted_pass_scans_the_whole_list() {
        let extractor = TrackingExtractor::new();
        let differencer = FixedDifferencer { score: 0.0 };
        let policy = ComparisonPolicy {
            duration_rule: DurationRule::AbsoluteSeconds(3.0),
            thumbnail_count: 1,
            max_difference_percent: 10.0,
            max_different_thumbnails: 0,
        };
        let comparer = Comparer::new(&policy, &extractor, &differencer);

        let records = vec![record("/a", 10.0), record("/b", 40.0), record("/c", 11.0)];
        let target = record("/new", 10.5);
        let cancel = AtomicBool::new(false);
        let mut duplicates = Vec::new();
        comparer.find_duplicates_of(&records, &target, &cancel, &mut |event| {
            if let CompareEvent::DuplicateFound { first, second } = event {
                duplicates.push((first, second));
            }
        });

        // The unsorted list is scanned end to end; /b is skipped by the
        // duration rule, not by position.
        assert_eq!(
            duplicates,
            vec![
                (PathBuf::from("/new"), PathBuf::from("/a")),
                (PathBuf::from("/new"), PathBuf::from("/c")),
            ]
        );
    }
}

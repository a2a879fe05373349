use crate::core::comparison::{CompareEvent, Comparer};
use crate::core::policy::{EngineConfig, FolderSettings};
use crate::core::record::VideoRecord;
use crate::core::scanner;
use crate::core::store::RecordStore;
use crate::core::watcher::{FileChangeSource, FileEvent};
use crate::services::Providers;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// A filesystem create/modify event can arrive before the writer has
/// finished the file; new files get this many open attempts, spaced by the
/// retry delay, before they are skipped.
const ACCESS_RETRY_ATTEMPTS: u32 = 20;
const ACCESS_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no configuration set")]
    NotConfigured,

    #[error("watched folder does not exist: {}", .path.display())]
    MissingBasePath { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Events emitted for the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Logged {
        message: String,
    },
    ProgressUpdate {
        phase: EnginePhase,
        current: usize,
        total: usize,
        style: ProgressStyle,
    },
    DuplicateFound {
        first: PathBuf,
        second: PathBuf,
    },
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EnginePhase {
    Searching,
    Loading,
    Comparing,
    Monitoring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProgressStyle {
    Indeterminate,
    Bounded,
    None,
}

/// What the engine is currently doing, for polling clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineOperation {
    Idle,
    Scanning,
    Preloading,
    Comparing,
    Monitoring,
    Processing,
    Stopped,
}

/// Point-in-time view of the engine, cheap to take while a pass runs.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EngineSnapshot {
    pub operation: EngineOperation,
    pub duplicate_count: usize,
    pub record_count: usize,
}

/// Caller-chosen outcome for a reported duplicate pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicateResolution {
    KeepBoth,
    DeleteFirst,
    DeleteSecond,
}

struct TaskSlot {
    /// Guarded by the slot's mutex: exactly one pass runs at a time, and
    /// two concurrent watch events must never launch two passes.
    running: bool,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TaskSlot {
    fn new() -> Self {
        Self {
            running: false,
            cancel: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }
}

struct EngineInner {
    providers: Providers,
    config: Mutex<Option<Arc<EngineConfig>>>,
    events: Mutex<Option<UnboundedSender<EngineEvent>>>,
    status: Mutex<EngineSnapshot>,
    task: Mutex<TaskSlot>,
    /// Producer/consumer queues fed by the watch dispatch loop and drained
    /// only by the background pass. Event callbacks never touch the store.
    created_files: Mutex<VecDeque<PathBuf>>,
    deleted_files: Mutex<VecDeque<PathBuf>>,
    store: Mutex<RecordStore>,
    source: Mutex<Box<dyn FileChangeSource>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

/// Incremental duplicate-detection engine.
///
/// `start` launches one cancellable background pipeline (scan, preload,
/// compare) and begins watching the root; file events queue up and are
/// drained by delta passes. `stop` cancels the running pass and waits for
/// it to exit. Must be used from within a tokio runtime.
pub struct DedupEngine {
    inner: Arc<EngineInner>,
}

impl DedupEngine {
    pub fn new(providers: Providers, source: Box<dyn FileChangeSource>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                providers,
                config: Mutex::new(None),
                events: Mutex::new(None),
                status: Mutex::new(EngineSnapshot {
                    operation: EngineOperation::Idle,
                    duplicate_count: 0,
                    record_count: 0,
                }),
                task: Mutex::new(TaskSlot::new()),
                created_files: Mutex::new(VecDeque::new()),
                deleted_files: Mutex::new(VecDeque::new()),
                store: Mutex::new(RecordStore::new()),
                source: Mutex::new(source),
                dispatch: Mutex::new(None),
            }),
        }
    }

    pub fn with_event_sender(self, sender: UnboundedSender<EngineEvent>) -> Self {
        *self.inner.events.lock().unwrap() = Some(sender);
        self
    }

    /// Replace the configuration used by future passes. A pass already in
    /// progress keeps the configuration it was started with.
    pub fn update_configuration(&self, config: EngineConfig) {
        *self.inner.config.lock().unwrap() = Some(Arc::new(config));
    }

    /// Begin watching and launch the full pipeline. A second call while a
    /// pass is running is a no-op.
    pub fn start(&self) -> Result<(), EngineError> {
        let config = self
            .inner
            .current_config()
            .ok_or(EngineError::NotConfigured)?;
        if !config.folder.base_path.is_dir() {
            return Err(EngineError::MissingBasePath {
                path: config.folder.base_path.clone(),
            });
        }

        let mut task = self.inner.task.lock().unwrap();
        if task.running {
            return Ok(());
        }

        self.inner.created_files.lock().unwrap().clear();
        self.inner.deleted_files.lock().unwrap().clear();
        {
            let mut status = self.inner.status.lock().unwrap();
            status.operation = EngineOperation::Scanning;
            status.duplicate_count = 0;
        }

        self.start_watching(&config);

        task.running = true;
        task.cancel = Arc::new(AtomicBool::new(false));
        let cancel = task.cancel.clone();
        task.handle = Some(tokio::spawn(run_pass(
            self.inner.clone(),
            config,
            cancel,
            true,
        )));
        Ok(())
    }

    /// Disable the watch, cancel the running pass and wait for it to
    /// observe the cancellation and exit.
    pub async fn stop(&self) {
        self.inner.source.lock().unwrap().stop();
        if let Some(dispatch) = self.inner.dispatch.lock().unwrap().take() {
            dispatch.abort();
        }

        let handle = {
            let mut task = self.inner.task.lock().unwrap();
            task.cancel.store(true, Ordering::Relaxed);
            task.handle.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.inner.set_operation(EngineOperation::Stopped);
        self.inner.emit(EngineEvent::Stopped);
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.inner.status.lock().unwrap().clone()
    }

    /// Execute the caller's decision for a reported pair. Deleting a side
    /// removes the file from disk and the baseline and persists the cache.
    pub fn resolve(
        &self,
        first: &Path,
        second: &Path,
        resolution: DuplicateResolution,
    ) -> Result<(), EngineError> {
        let doomed = match resolution {
            DuplicateResolution::KeepBoth => {
                self.inner.emit_logged(format!(
                    "Keeping both {} and {}",
                    first.display(),
                    second.display()
                ));
                return Ok(());
            }
            DuplicateResolution::DeleteFirst => first,
            DuplicateResolution::DeleteSecond => second,
        };

        fs::remove_file(doomed)?;
        let remaining = {
            let mut store = self.inner.store.lock().unwrap();
            store.remove(doomed);
            if let Some(config) = self.inner.current_config() {
                if let Err(err) = store.save(&config.folder.cache_path) {
                    log::warn!(
                        "failed to persist record cache {}: {err}",
                        config.folder.cache_path.display()
                    );
                }
            }
            store.len()
        };
        {
            let mut status = self.inner.status.lock().unwrap();
            status.record_count = remaining;
            status.duplicate_count = status.duplicate_count.saturating_sub(1);
        }
        self.inner
            .emit_logged(format!("Deleted duplicate file: {}", doomed.display()));
        Ok(())
    }

    fn start_watching(&self, config: &EngineConfig) {
        let mut source = self.inner.source.lock().unwrap();
        match source.watch(&config.folder.base_path, config.folder.recursive) {
            Ok(receiver) => {
                let handle = tokio::spawn(dispatch_events(self.inner.clone(), receiver));
                if let Some(old) = self.inner.dispatch.lock().unwrap().replace(handle) {
                    old.abort();
                }
            }
            Err(err) => {
                log::warn!("file watcher unavailable: {err:#}");
                self.inner.emit_logged(format!(
                    "File watcher unavailable, changes will not be monitored: {err:#}"
                ));
            }
        }
    }
}

impl EngineInner {
    fn current_config(&self) -> Option<Arc<EngineConfig>> {
        self.config.lock().unwrap().clone()
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(sender) = &*self.events.lock().unwrap() {
            let _ = sender.send(event);
        }
    }

    fn emit_logged(&self, message: impl AsRef<str>) {
        let message = format!(
            "{} {}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S"),
            message.as_ref()
        );
        self.emit(EngineEvent::Logged { message });
    }

    fn emit_progress(&self, phase: EnginePhase, current: usize, total: usize, style: ProgressStyle) {
        self.emit(EngineEvent::ProgressUpdate {
            phase,
            current,
            total,
            style,
        });
    }

    fn set_operation(&self, operation: EngineOperation) {
        self.status.lock().unwrap().operation = operation;
    }

    fn set_record_count(&self, record_count: usize) {
        self.status.lock().unwrap().record_count = record_count;
    }

    fn pop_created(&self) -> Option<PathBuf> {
        self.created_files.lock().unwrap().pop_front()
    }

    fn pop_deleted(&self) -> Option<PathBuf> {
        self.deleted_files.lock().unwrap().pop_front()
    }

    fn queues_empty(&self) -> bool {
        self.created_files.lock().unwrap().is_empty()
            && self.deleted_files.lock().unwrap().is_empty()
    }

    fn mark_not_running(&self) {
        self.task.lock().unwrap().running = false;
    }

    /// Relevance filter applied to every watch event before it is queued.
    fn is_relevant(&self, path: &Path, folder: &FolderSettings) -> bool {
        if !path.starts_with(&folder.base_path) {
            self.emit_logged(format!("File not in watched folder: {}", path.display()));
            return false;
        }
        if folder
            .excluded_directories
            .iter()
            .any(|excluded| path.starts_with(excluded))
        {
            self.emit_logged(format!("File is in excluded directory: {}", path.display()));
            return false;
        }
        if !folder.allows_extension(path) {
            self.emit_logged(format!(
                "File does not have a watched extension: {}",
                path.display()
            ));
            return false;
        }
        true
    }

    fn handle_compare_event(&self, event: CompareEvent) {
        match event {
            CompareEvent::Checking { path, duration } => {
                self.emit_logged(format!(
                    "Checking: {} - Duration: {}",
                    path.display(),
                    format_duration(duration)
                ));
            }
            CompareEvent::Progress { current, total } => {
                self.emit_progress(
                    EnginePhase::Comparing,
                    current,
                    total,
                    ProgressStyle::Bounded,
                );
            }
            CompareEvent::DuplicateFound { first, second } => {
                self.emit_logged(format!(
                    "Found duplicate of {} and {}",
                    first.display(),
                    second.display()
                ));
                self.status.lock().unwrap().duplicate_count += 1;
                self.emit(EngineEvent::DuplicateFound { first, second });
            }
        }
    }
}

/// Consumes the watcher's event stream. Only ever enqueues and, when no
/// pass is running, launches a delta pass; the baseline itself is touched
/// exclusively by the background task.
async fn dispatch_events(inner: Arc<EngineInner>, mut receiver: UnboundedReceiver<FileEvent>) {
    while let Some(event) = receiver.recv().await {
        match event {
            FileEvent::Created(path) | FileEvent::Modified(path) => {
                enqueue_created(&inner, path);
            }
            FileEvent::Deleted(path) => {
                enqueue_deleted(&inner, path);
            }
            FileEvent::Renamed { from, to } => {
                enqueue_deleted(&inner, from);
                enqueue_created(&inner, to);
            }
            FileEvent::Fault(message) => {
                log::warn!("file watcher fault: {message}");
                inner.emit_logged(format!(
                    "File watcher failed, monitoring stops until restart: {message}"
                ));
            }
        }
    }
}

fn enqueue_created(inner: &Arc<EngineInner>, path: PathBuf) {
    let Some(config) = inner.current_config() else {
        return;
    };
    if !inner.is_relevant(&path, &config.folder) {
        return;
    }
    inner.emit_logged(format!("File created: {}", path.display()));
    inner.created_files.lock().unwrap().push_back(path);
    spawn_changes_if_idle(inner);
}

fn enqueue_deleted(inner: &Arc<EngineInner>, path: PathBuf) {
    let Some(config) = inner.current_config() else {
        return;
    };
    if !inner.is_relevant(&path, &config.folder) {
        return;
    }
    inner.emit_logged(format!("File deleted: {}", path.display()));
    inner.deleted_files.lock().unwrap().push_back(path);
    spawn_changes_if_idle(inner);
}

/// Launch a delta pass unless a pass is already running, in which case the
/// running pass will pick the queued change up at its next drain. The slot
/// mutex makes sure two concurrent events never launch two passes.
fn spawn_changes_if_idle(inner: &Arc<EngineInner>) {
    let Some(config) = inner.current_config() else {
        return;
    };
    let mut task = inner.task.lock().unwrap();
    if task.running {
        return;
    }
    task.running = true;
    task.cancel = Arc::new(AtomicBool::new(false));
    let cancel = task.cancel.clone();
    task.handle = Some(tokio::spawn(run_pass(inner.clone(), config, cancel, false)));
}

/// One background pass: the full pipeline on start, then delta drains until
/// the queues stay empty. The queue re-check happens under the task slot
/// mutex so a change queued while draining is never lost between "queues
/// look empty" and "pass marked finished".
async fn run_pass(
    inner: Arc<EngineInner>,
    config: Arc<EngineConfig>,
    cancel: Arc<AtomicBool>,
    initial_scan: bool,
) {
    if initial_scan && !full_pass(&inner, &config, &cancel).await {
        inner.mark_not_running();
        return;
    }

    loop {
        if !process_changes(&inner, &config, &cancel).await {
            inner.mark_not_running();
            return;
        }

        let mut task = inner.task.lock().unwrap();
        if !inner.queues_empty() {
            drop(task);
            continue;
        }
        task.running = false;
        drop(task);

        inner.set_operation(EngineOperation::Monitoring);
        inner.emit_progress(EnginePhase::Monitoring, 0, 0, ProgressStyle::Indeterminate);
        inner.emit_logged("Monitoring for file changes...");
        return;
    }
}

/// Scan, reconcile, preload, persist, compare. Returns `false` when the
/// pass observed cancellation; in that case nothing past the last completed
/// step has been written.
async fn full_pass(inner: &Arc<EngineInner>, config: &EngineConfig, cancel: &AtomicBool) -> bool {
    let folder = &config.folder;

    inner.set_operation(EngineOperation::Scanning);
    inner.emit_progress(EnginePhase::Searching, 0, 0, ProgressStyle::Indeterminate);
    let started = Instant::now();
    let discovered = scanner::discover_files(folder);
    let cached = RecordStore::load(&folder.cache_path);
    let mut records = RecordStore::reconcile(cached, discovered, folder.recursive, &folder.base_path);
    inner.emit_logged(format!(
        "Found {} video files in {} ms",
        records.len(),
        started.elapsed().as_millis()
    ));
    if cancel.load(Ordering::Relaxed) {
        return false;
    }

    inner.set_operation(EngineOperation::Preloading);
    let total = records.len();
    inner.emit_progress(EnginePhase::Loading, 0, total, ProgressStyle::Bounded);
    for (index, record) in records.records().iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
        inner.emit_progress(EnginePhase::Loading, index + 1, total, ProgressStyle::Bounded);
        record.resolve_duration(inner.providers.media.as_ref());
    }
    if cancel.load(Ordering::Relaxed) {
        return false;
    }

    records.retain_valid();
    if let Err(err) = records.save(&folder.cache_path) {
        log::warn!(
            "failed to persist record cache {}: {err}",
            folder.cache_path.display()
        );
        inner.emit_logged(format!("Unable to write record cache: {err}"));
    }
    inner.set_record_count(records.len());
    *inner.store.lock().unwrap() = records;
    if cancel.load(Ordering::Relaxed) {
        return false;
    }

    inner.set_operation(EngineOperation::Comparing);
    {
        let mut store = inner.store.lock().unwrap();
        let comparer = Comparer::new(
            &config.comparison,
            inner.providers.thumbnails.as_ref(),
            inner.providers.differencer.as_ref(),
        );
        comparer.find_duplicates(store.records_mut(), cancel, &mut |event| {
            inner.handle_compare_event(event)
        });
        // Rows discard their own frames as they finish; this catches the
        // tail and the cancelled case.
        for record in store.records() {
            record.discard_thumbnails();
        }
    }
    !cancel.load(Ordering::Relaxed)
}

/// Drain the deletion queue, then the creation queue. Returns `false` when
/// the pass observed cancellation.
async fn process_changes(
    inner: &Arc<EngineInner>,
    config: &EngineConfig,
    cancel: &AtomicBool,
) -> bool {
    inner.set_operation(EngineOperation::Processing);

    while let Some(path) = inner.pop_deleted() {
        let removed = {
            let mut store = inner.store.lock().unwrap();
            let removed = store.remove(&path);
            inner.set_record_count(store.len());
            removed
        };
        if removed {
            inner.emit_logged(format!("Removed file: {}", path.display()));
        } else {
            inner.emit_logged(format!("Deleted file was not tracked: {}", path.display()));
        }
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
    }

    while let Some(path) = inner.pop_created() {
        if !wait_for_file_access(&path, cancel).await {
            inner.emit_logged(format!("Unable to access new file: {}", path.display()));
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            continue;
        }
        if cancel.load(Ordering::Relaxed) {
            return false;
        }

        let record = VideoRecord::new(path.clone());
        if record
            .resolve_duration(inner.providers.media.as_ref())
            .is_zero()
        {
            inner.emit_logged(format!("New file has no duration: {}", path.display()));
            continue;
        }
        if cancel.load(Ordering::Relaxed) {
            return false;
        }

        let inserted = {
            let mut store = inner.store.lock().unwrap();
            if store.contains(&path) {
                false
            } else {
                store.add(record);
                inner.set_record_count(store.len());
                true
            }
        };
        if !inserted {
            inner.emit_logged(format!("New file already tracked: {}", path.display()));
            continue;
        }
        inner.emit_logged(format!("New file added to the baseline: {}", path.display()));

        {
            let store = inner.store.lock().unwrap();
            if let Err(err) = store.save(&config.folder.cache_path) {
                log::warn!(
                    "failed to persist record cache {}: {err}",
                    config.folder.cache_path.display()
                );
                inner.emit_logged(format!("Unable to write record cache: {err}"));
            }
        }
        if cancel.load(Ordering::Relaxed) {
            return false;
        }

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        inner.emit_logged(format!("Searching duplicates of {file_name}"));
        {
            let store = inner.store.lock().unwrap();
            let comparer = Comparer::new(
                &config.comparison,
                inner.providers.thumbnails.as_ref(),
                inner.providers.differencer.as_ref(),
            );
            if let Some(target) = store.get(&path) {
                comparer.find_duplicates_of(store.records(), target, cancel, &mut |event| {
                    inner.handle_compare_event(event)
                });
            }
            // Bound memory before the next queued file: drop the new
            // record's frames and every compared record's frames.
            for record in store.records() {
                record.discard_thumbnails();
            }
        }
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
    }

    true
}

/// Wait for a freshly reported file to become readable. Bounded, and
/// responsive to cancellation between attempts.
async fn wait_for_file_access(path: &Path, cancel: &AtomicBool) -> bool {
    for attempt in 0..ACCESS_RETRY_ATTEMPTS {
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
        if fs::File::open(path).is_ok() {
            return true;
        }
        if attempt + 1 < ACCESS_RETRY_ATTEMPTS {
            tokio::time::sleep(ACCESS_RETRY_DELAY).await;
        }
    }
    false
}

fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    format!(
        "{}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

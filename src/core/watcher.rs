use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// A filesystem change relevant to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
    /// The underlying watcher failed; monitoring is lost until restart.
    Fault(String),
}

/// Source of live file events under a root. `watch` hands back a single
/// channel consumed by one dispatch loop in the engine; there is no
/// subscriber fan-out.
pub trait FileChangeSource: Send {
    fn watch(&mut self, root: &Path, recursive: bool) -> Result<UnboundedReceiver<FileEvent>>;
    fn stop(&mut self);
}

/// `notify`-backed change source.
pub struct NotifyChangeSource {
    watcher: Option<RecommendedWatcher>,
}

impl NotifyChangeSource {
    pub fn new() -> Self {
        Self { watcher: None }
    }
}

impl Default for NotifyChangeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FileChangeSource for NotifyChangeSource {
    fn watch(&mut self, root: &Path, recursive: bool) -> Result<UnboundedReceiver<FileEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    for converted in convert_event(event) {
                        let _ = tx.send(converted);
                    }
                }
                Err(err) => {
                    let _ = tx.send(FileEvent::Fault(err.to_string()));
                }
            }
        })
        .context("failed to create filesystem watcher")?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(root, mode)
            .with_context(|| format!("failed to watch {}", root.display()))?;

        self.watcher = Some(watcher);
        Ok(rx)
    }

    fn stop(&mut self) {
        // Dropping the watcher tears down the native handles and closes the
        // event channel.
        self.watcher = None;
    }
}

/// Map one raw notify event onto engine events. Renames are reported as
/// delete-from plus create-to when both sides are known; a rename with an
/// unknown direction falls back to probing whether the path still exists.
fn convert_event(event: Event) -> Vec<FileEvent> {
    match event.kind {
        EventKind::Create(_) => event.paths.into_iter().map(FileEvent::Created).collect(),
        EventKind::Remove(_) => event.paths.into_iter().map(FileEvent::Deleted).collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => event.paths.into_iter().map(FileEvent::Deleted).collect(),
            RenameMode::To => event.paths.into_iter().map(FileEvent::Created).collect(),
            RenameMode::Both if event.paths.len() == 2 => {
                let mut paths = event.paths.into_iter();
                // Two paths guaranteed by the match guard.
                let from = paths.next().unwrap_or_default();
                let to = paths.next().unwrap_or_default();
                vec![FileEvent::Renamed { from, to }]
            }
            _ => event
                .paths
                .into_iter()
                .map(|path| {
                    if path.exists() {
                        FileEvent::Created(path)
                    } else {
                        FileEvent::Deleted(path)
                    }
                })
                .collect(),
        },
        EventKind::Modify(_) => event.paths.into_iter().map(FileEvent::Modified).collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

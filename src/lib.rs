mod core;
pub mod services;

pub use crate::core::comparison::{CompareEvent, Comparer};
pub use crate::core::engine::{
    DedupEngine, DuplicateResolution, EngineError, EngineEvent, EngineOperation, EnginePhase,
    EngineSnapshot, ProgressStyle,
};
pub use crate::core::policy::{ComparisonPolicy, DurationRule, EngineConfig, FolderSettings};
pub use crate::core::record::VideoRecord;
pub use crate::core::store::RecordStore;
pub use crate::core::watcher::{FileChangeSource, FileEvent, NotifyChangeSource};
pub use crate::services::{
    FfmpegThumbnailExtractor, FfprobeMediaProbe, ImageDifferencer, MediaProbe, PixelDifferencer,
    Providers, ThumbnailExtractor,
};

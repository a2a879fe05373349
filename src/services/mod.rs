pub mod difference;
pub mod media;
pub mod thumbnail;

pub use difference::{ImageDifferencer, PixelDifferencer};
pub use media::{FfprobeMediaProbe, MediaProbe};
pub use thumbnail::{FfmpegThumbnailExtractor, ThumbnailExtractor};

use std::sync::Arc;

/// The collaborators the engine consumes: media probing, frame extraction
/// and image difference scoring.
#[derive(Clone)]
pub struct Providers {
    pub media: Arc<dyn MediaProbe>,
    pub thumbnails: Arc<dyn ThumbnailExtractor>,
    pub differencer: Arc<dyn ImageDifferencer>,
}

impl Providers {
    /// Default providers backed by the ffmpeg/ffprobe binaries on PATH.
    pub fn ffmpeg() -> Self {
        Self {
            media: Arc::new(FfprobeMediaProbe::new()),
            thumbnails: Arc::new(FfmpegThumbnailExtractor::new()),
            differencer: Arc::new(PixelDifferencer::new()),
        }
    }
}

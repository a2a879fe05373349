use image::{imageops::FilterType, DynamicImage};

/// Scores how different two images look, normalized to `[0, 1]`.
pub trait ImageDifferencer: Send + Sync {
    fn difference(&self, a: &DynamicImage, b: &DynamicImage) -> f64;
}

/// Downscales both images to a small grayscale grid and averages the
/// absolute per-pixel difference. Robust against resolution and encoding
/// differences between copies of the same footage.
pub struct PixelDifferencer {
    sample_size: u32,
}

impl PixelDifferencer {
    pub fn new() -> Self {
        Self { sample_size: 16 }
    }
}

impl Default for PixelDifferencer {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageDifferencer for PixelDifferencer {
    fn difference(&self, a: &DynamicImage, b: &DynamicImage) -> f64 {
        let side = self.sample_size;
        let a = a
            .resize_exact(side, side, FilterType::Triangle)
            .into_luma8();
        let b = b
            .resize_exact(side, side, FilterType::Triangle)
            .into_luma8();

        let total: u64 = a
            .pixels()
            .zip(b.pixels())
            .map(|(pa, pb)| u64::from(pa.0[0].abs_diff(pb.0[0])))
            .sum();

        total as f64 / (u64::from(side) * u64::from(side) * 255) as f64
    }
}

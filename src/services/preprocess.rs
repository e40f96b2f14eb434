//! Preprocess stage: decode a scan image and normalize it to the model input shape.

use image::imageops::FilterType;
use image::RgbImage;

/// Side length of the square model input.
pub const MODEL_INPUT_SIZE: u32 = 224;

/// Inputs larger than this are rejected before decoding.
const MAX_IMAGE_BYTES: usize = 25 * 1024 * 1024;

/// A decoded, resized RGB scan ready for inference.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pixels: RgbImage,
}

impl NormalizedImage {
    pub fn from_rgb(pixels: RgbImage) -> Self {
        Self { pixels }
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Mean of each channel, scaled to [0, 1].
    pub fn channel_means(&self) -> [f64; 3] {
        let mut sums = [0f64; 3];
        for pixel in self.pixels.pixels() {
            for (sum, value) in sums.iter_mut().zip(pixel.0) {
                *sum += f64::from(value);
            }
        }
        let count = f64::from(self.width() * self.height()).max(1.0);
        sums.map(|s| s / count / 255.0)
    }

    /// Rec. 601 luma plane, scaled to [0, 1].
    pub fn luma(&self) -> Vec<f64> {
        self.pixels
            .pixels()
            .map(|p| {
                let [r, g, b] = p.0;
                (0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b)) / 255.0
            })
            .collect()
    }

    /// Standard deviation of luma, in [0, 0.5].
    pub fn contrast(&self) -> f64 {
        let luma = self.luma();
        if luma.is_empty() {
            return 0.0;
        }
        let n = luma.len() as f64;
        let mean = luma.iter().sum::<f64>() / n;
        (luma.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
    }

    /// Mean absolute 4-neighbour Laplacian of luma. Low values mean a blurry image.
    pub fn sharpness(&self) -> f64 {
        let (w, h) = (self.width() as usize, self.height() as usize);
        if w < 3 || h < 3 {
            return 0.0;
        }
        let luma = self.luma();
        let at = |x: usize, y: usize| luma[y * w + x];

        let mut total = 0.0;
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let lap = 4.0 * at(x, y) - at(x - 1, y) - at(x + 1, y) - at(x, y - 1) - at(x, y + 1);
                total += lap.abs();
            }
        }
        total / ((w - 2) * (h - 2)) as f64
    }

    /// Image-quality score in [0, 1] written back to the scan record.
    pub fn quality_score(&self) -> f64 {
        // Contrast saturates at a luma stddev of 0.25, sharpness at 0.1.
        let contrast = (self.contrast() / 0.25).min(1.0);
        let sharpness = (self.sharpness() / 0.1).min(1.0);
        (0.5 * contrast + 0.5 * sharpness).clamp(0.0, 1.0)
    }
}

/// Decode raw bytes and resize to `MODEL_INPUT_SIZE` square RGB.
pub fn normalize(bytes: &[u8]) -> Result<NormalizedImage, PreprocessError> {
    if bytes.is_empty() {
        return Err(PreprocessError::Empty);
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(PreprocessError::TooLarge(bytes.len()));
    }

    let decoded = image::load_from_memory(bytes)?;
    let resized = decoded.resize_exact(MODEL_INPUT_SIZE, MODEL_INPUT_SIZE, FilterType::Triangle);

    tracing::debug!(
        original_width = decoded.width(),
        original_height = decoded.height(),
        "Normalized scan image"
    );

    Ok(NormalizedImage::from_rgb(resized.to_rgb8()))
}

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("Image is empty")]
    Empty,

    #[error("Image too large ({0} bytes)")]
    TooLarge(usize),

    #[error("Image could not be decoded")]
    Decode(#[from] image::ImageError),
}

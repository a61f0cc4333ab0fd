//! Image export for slice heatmaps and rendered snapshots.

use image::{ImageBuffer, Rgb, RgbImage};
use ndarray::Array2;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum FigureError {
    #[error("Cannot draw a heatmap of an empty array")]
    EmptyArray,
    #[error("Error writing figure: {0}")]
    Image(#[from] image::ImageError),
}

/// Gap between heatmap and colorbar, in pixels.
const COLORBAR_GAP: u32 = 4;
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Colormap {
    Gray,
    Hot,
    /// `Hot` running from white to black.
    #[default]
    HotReversed,
}

impl Colormap {
    /// Color at `t`, clamped to `[0, 1]`.
    pub fn map(&self, t: f32) -> Rgb<u8> {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let rgb = match self {
            Colormap::Gray => [t; 3],
            Colormap::Hot => hot(t),
            Colormap::HotReversed => hot(1.0 - t),
        };
        Rgb(rgb.map(|c| (c * 255.0).round() as u8))
    }
}

/// Black through red and yellow to white.
fn hot(t: f32) -> [f32; 3] {
    const RED_END: f32 = 0.365_079;
    const GREEN_END: f32 = 0.746_032;
    const RED_START: f32 = 0.041_6;

    let r = RED_START + (1.0 - RED_START) * (t / RED_END).min(1.0);
    let g = ((t - RED_END) / (GREEN_END - RED_END)).clamp(0.0, 1.0);
    let b = ((t - GREEN_END) / (1.0 - GREEN_END)).clamp(0.0, 1.0);
    [r, g, b]
}

/// One pixel per array element, rows from the top.
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct Heatmap {
    pub colormap: Colormap,
    pub colorbar: bool,
}

impl Default for Heatmap {
    fn default() -> Self {
        Self {
            colormap: Colormap::default(),
            colorbar: true,
        }
    }
}

impl Heatmap {
    pub fn render(&self, array: &Array2<f32>) -> Result<RgbImage, FigureError> {
        if array.is_empty() {
            return Err(FigureError::EmptyArray);
        }
        let (rows, cols) = array.dim();
        let (lo, hi) = array
            .iter()
            .filter(|v| v.is_finite())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let span = hi - lo;
        let normalize = |v: f32| if span > 0.0 { (v - lo) / span } else { 0.0 };

        let (width, height) = (cols as u32, rows as u32);
        let bar_width = if self.colorbar {
            COLORBAR_GAP + (width / 20).max(8)
        } else {
            0
        };

        let image = ImageBuffer::from_fn(width + bar_width, height, |x, y| {
            if x < width {
                return self.colormap.map(normalize(array[[y as usize, x as usize]]));
            }
            if x < width + COLORBAR_GAP {
                return BACKGROUND;
            }
            // maximum at the top
            let t = if height > 1 {
                1.0 - y as f32 / (height - 1) as f32
            } else {
                1.0
            };
            self.colormap.map(t)
        });
        Ok(image)
    }

    pub fn save(&self, array: &Array2<f32>, path: impl AsRef<Path>) -> Result<(), FigureError> {
        let path = path.as_ref();
        self.render(array)?.save(path)?;
        info!(path = %path.display(), "saved heatmap");
        Ok(())
    }
}

/// Write a rendered frame as-is; the format follows the file extension.
pub fn save_snapshot(image: &RgbImage, path: impl AsRef<Path>) -> Result<(), FigureError> {
    let path = path.as_ref();
    image.save(path)?;
    info!(
        path = %path.display(),
        width = image.width(),
        height = image.height(),
        "saved snapshot"
    );
    Ok(())
}

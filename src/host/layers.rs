//! Turning a mask batch into image layers

use crate::codec::{read_mask, MaskFormat};
use crate::error::{Result, SegmentError};
use crate::protocol::{mask_file_path, probe_batch_len};
use crate::types::{Mask, SegmentationMode};
use image::{DynamicImage, GrayAlphaImage, LumaA, Rgba, RgbaImage};
use rand::Rng;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Gray+alpha value painted on grayscale images
pub const GRAYSCALE_FILL: [u8; 2] = [100, 255];

/// Opacity of mask layers in the composite preview
pub const COMPOSITE_OPACITY: f32 = 0.5;

/// One rendered mask, ready to be saved or composited
#[derive(Debug, Clone)]
pub struct MaskLayer {
    pub name: String,
    pub image: DynamicImage,
}

impl MaskLayer {
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Layer name for mask `index` (0-based) of a run in `mode`
#[must_use]
pub fn layer_name(mode: SegmentationMode, index: usize) -> String {
    format!("Mask - {} #{}", mode.as_token(), index + 1)
}

/// Group name holding all layers of a run
#[must_use]
pub fn group_name(mode: SegmentationMode) -> String {
    format!("Segment Anything - {}", mode.as_token())
}

/// `count` pairwise-distinct random RGB colours
pub fn random_colors<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Vec<[u8; 3]> {
    let mut seen = HashSet::with_capacity(count);
    let mut colors = Vec::with_capacity(count);
    while colors.len() < count {
        let color: [u8; 3] = [rng.gen(), rng.gen(), rng.gen()];
        if seen.insert(color) {
            colors.push(color);
        }
    }
    colors
}

/// How foreground cells are painted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerPaint {
    Rgba([u8; 4]),
    GrayAlpha([u8; 2]),
}

/// Render a mask: paint where true, fully transparent elsewhere
#[must_use]
pub fn render_mask(mask: &Mask, paint: LayerPaint) -> DynamicImage {
    let (width, height) = (mask.cols() as u32, mask.rows() as u32);
    match paint {
        LayerPaint::Rgba(color) => DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
            if mask.get(y as usize, x as usize) {
                Rgba(color)
            } else {
                Rgba([0, 0, 0, 0])
            }
        })),
        LayerPaint::GrayAlpha(value) => {
            DynamicImage::ImageLumaA8(GrayAlphaImage::from_fn(width, height, |x, y| {
                if mask.get(y as usize, x as usize) {
                    LumaA(value)
                } else {
                    LumaA([0, 0])
                }
            }))
        },
    }
}

/// Options for consuming a batch
#[derive(Debug, Clone, Copy)]
pub struct LayerStyle {
    pub mode: SegmentationMode,
    /// Fixed colour, or `None` for a distinct random colour per mask
    pub color: Option<[u8; 4]>,
    /// Source image has no colour channels
    pub grayscale: bool,
}

/// Decode every file of the batch at `stem` and render it into a layer
///
/// Probing stops at the first missing index. A file that exists but fails to
/// decode is an error.
pub fn load_layers<R: Rng + ?Sized>(
    stem: &str,
    format: MaskFormat,
    style: LayerStyle,
    rng: &mut R,
) -> Result<Vec<MaskLayer>> {
    let span = crate::tracing_config::spans::layer_rendering(stem);
    let _entered = span.enter();

    let count = probe_batch_len(stem);
    let paints: Vec<LayerPaint> = match (style.grayscale, style.color) {
        (true, _) => vec![LayerPaint::GrayAlpha(GRAYSCALE_FILL); count],
        (false, Some(color)) => vec![LayerPaint::Rgba(color); count],
        (false, None) => random_colors(count, rng)
            .into_iter()
            .map(|[r, g, b]| LayerPaint::Rgba([r, g, b, 255]))
            .collect(),
    };

    let mut layers = Vec::with_capacity(count);
    for (index, paint) in paints.into_iter().enumerate() {
        let mask = read_mask(mask_file_path(stem, index), format)?;
        layers.push(MaskLayer {
            name: layer_name(style.mode, index),
            image: render_mask(&mask, paint),
        });
    }

    tracing::info!(count, "loaded mask layers");
    Ok(layers)
}

/// Blend layers over the base image at [`COMPOSITE_OPACITY`]
#[must_use]
pub fn composite(base: &DynamicImage, layers: &[MaskLayer]) -> RgbaImage {
    let mut out = base.to_rgba8();
    for layer in layers {
        let overlay = layer.image.to_rgba8();
        for (x, y, pixel) in overlay.enumerate_pixels() {
            if x >= out.width() || y >= out.height() {
                continue;
            }
            let alpha = f32::from(pixel.0[3]) / 255.0 * COMPOSITE_OPACITY;
            if alpha <= 0.0 {
                continue;
            }
            let target = out.get_pixel_mut(x, y);
            for (dst, src) in target.0.iter_mut().zip(pixel.0).take(3) {
                let blended = f32::from(*dst) * (1.0 - alpha) + f32::from(src) * alpha;
                *dst = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}

/// Save layers as `mask_<n>.png` and the composite as `composite.png` under `dir`
pub fn write_layers<P: AsRef<Path>>(dir: P, base: &DynamicImage, layers: &[MaskLayer]) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir).map_err(|e| SegmentError::file_io_error("create output directory", dir, e))?;

    let mut written = Vec::with_capacity(layers.len() + 1);
    for (index, layer) in layers.iter().enumerate() {
        let path = dir.join(format!("mask_{}.png", index + 1));
        layer.image.save(&path)?;
        tracing::debug!(layer = %layer.name, path = %path.display(), "saved layer");
        written.push(path);
    }

    let path = dir.join("composite.png");
    composite(base, layers).save(&path)?;
    written.push(path);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::write_mask;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn square(rows: usize, cols: usize, from: usize, to: usize) -> Mask {
        let data: Vec<Vec<bool>> = (0..rows)
            .map(|r| (0..cols).map(|c| (from..to).contains(&r) && (from..to).contains(&c)).collect())
            .collect();
        Mask::from_rows(&data).unwrap()
    }

    #[test]
    fn test_names() {
        assert_eq!(layer_name(SegmentationMode::BoxSelection, 0), "Mask - Box-Selection #1");
        assert_eq!(group_name(SegmentationMode::Auto), "Segment Anything - Auto");
    }

    #[test]
    fn test_random_colors_are_distinct() {
        let mut rng = StdRng::seed_from_u64(5);
        let colors = random_colors(500, &mut rng);
        let unique: HashSet<_> = colors.iter().collect();
        assert_eq!(unique.len(), 500);
    }

    #[test]
    fn test_render_paints_only_foreground() {
        let mask = square(6, 8, 2, 4);
        let image = render_mask(&mask, LayerPaint::Rgba([255, 0, 0, 255])).to_rgba8();
        assert_eq!((image.width(), image.height()), (8, 6));
        assert_eq!(image.get_pixel(2, 3).0, [255, 0, 0, 255]);
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 0]);

        let gray = render_mask(&mask, LayerPaint::GrayAlpha(GRAYSCALE_FILL));
        assert!(matches!(gray, DynamicImage::ImageLumaA8(_)));
    }

    #[test]
    fn test_load_layers_stops_at_gap() {
        let dir = TempDir::new().unwrap();
        let stem = dir.path().join("__seg__mask__").display().to_string();
        write_mask(mask_file_path(&stem, 0), &square(10, 10, 1, 5), MaskFormat::Binary).unwrap();
        write_mask(mask_file_path(&stem, 1), &square(10, 10, 4, 9), MaskFormat::Binary).unwrap();
        write_mask(mask_file_path(&stem, 3), &square(10, 10, 0, 2), MaskFormat::Binary).unwrap();

        let style = LayerStyle {
            mode: SegmentationMode::Auto,
            color: None,
            grayscale: false,
        };
        let mut rng = StdRng::seed_from_u64(11);
        let layers = load_layers(&stem, MaskFormat::Binary, style, &mut rng).unwrap();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[1].name, "Mask - Auto #2");
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = TempDir::new().unwrap();
        let stem = dir.path().join("m").display().to_string();
        std::fs::write(mask_file_path(&stem, 0), [0u8, 0, 0, 4]).unwrap();
        let style = LayerStyle {
            mode: SegmentationMode::Box,
            color: Some([0, 255, 0, 255]),
            grayscale: false,
        };
        let mut rng = StdRng::seed_from_u64(0);
        assert!(load_layers(&stem, MaskFormat::Binary, style, &mut rng).is_err());
    }

    #[test]
    fn test_composite_blends_half() {
        let base = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255])));
        let layer = MaskLayer {
            name: layer_name(SegmentationMode::Box, 0),
            image: render_mask(&square(4, 4, 0, 2), LayerPaint::Rgba([200, 100, 0, 255])),
        };
        let out = composite(&base, &[layer]);
        assert_eq!(out.get_pixel(0, 0).0, [100, 50, 0, 255]);
        assert_eq!(out.get_pixel(3, 3).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_write_layers_names_files() {
        let dir = TempDir::new().unwrap();
        let base = DynamicImage::ImageRgb8(image::RgbImage::new(5, 5));
        let layer = MaskLayer {
            name: layer_name(SegmentationMode::Selection, 0),
            image: render_mask(&square(5, 5, 1, 3), LayerPaint::Rgba([1, 2, 3, 255])),
        };
        let written = write_layers(dir.path().join("out"), &base, &[layer]).unwrap();
        assert_eq!(written.len(), 2);
        assert!(written[0].ends_with("mask_1.png"));
        assert!(written[1].ends_with("composite.png"));
        assert!(written.iter().all(|p| p.exists()));
    }
}

//! Selection masks and their export as prompts
//!
//! A selection is an 8-bit grayscale image the size of the source image.
//! Any non-zero pixel counts toward the bounds; only strongly selected pixels
//! (value above [`POINT_THRESHOLD`]) become prompt points.

use crate::error::{Result, SegmentError};
use crate::protocol::write_points_file;
use crate::types::{BoxPrompt, Point};
use image::GrayImage;
use rand::Rng;
use std::path::Path;

/// Minimum selection value for a sampled position to be kept as a point
pub const POINT_THRESHOLD: u8 = 200;

/// Selection bounds; `x2`/`y2` are exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionBounds {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl SelectionBounds {
    #[must_use]
    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    #[must_use]
    pub fn to_box(&self) -> BoxPrompt {
        BoxPrompt::new(self.x1 as f32, self.y1 as f32, self.x2 as f32, self.y2 as f32)
    }
}

#[derive(Debug, Clone)]
pub struct Selection {
    mask: GrayImage,
}

impl Selection {
    #[must_use]
    pub fn new(mask: GrayImage) -> Self {
        Self { mask }
    }

    /// Load a selection from any image file, converting to grayscale
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(image::open(path.as_ref())?.to_luma8()))
    }

    /// Fully selected rectangle `[x1, x2) x [y1, y2)` clipped to the image
    #[must_use]
    pub fn rectangle(width: u32, height: u32, x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        let mask = GrayImage::from_fn(width, height, |x, y| {
            if (x1..x2).contains(&x) && (y1..y2).contains(&y) {
                image::Luma([255])
            } else {
                image::Luma([0])
            }
        });
        Self::new(mask)
    }

    #[must_use]
    pub fn mask(&self) -> &GrayImage {
        &self.mask
    }

    /// Bounding rectangle of every non-zero pixel
    #[must_use]
    pub fn bounds(&self) -> Option<SelectionBounds> {
        let mut bounds: Option<SelectionBounds> = None;
        for (x, y, pixel) in self.mask.enumerate_pixels() {
            if pixel.0[0] == 0 {
                continue;
            }
            bounds = Some(match bounds {
                None => SelectionBounds { x1: x, y1: y, x2: x + 1, y2: y + 1 },
                Some(b) => SelectionBounds {
                    x1: b.x1.min(x),
                    y1: b.y1.min(y),
                    x2: b.x2.max(x + 1),
                    y2: b.y2.max(y + 1),
                },
            });
        }
        bounds
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bounds().is_none()
    }

    fn require_bounds(&self) -> Result<SelectionBounds> {
        self.bounds()
            .ok_or_else(|| SegmentError::invalid_input("selection is empty, select a region first"))
    }

    /// Sample up to `count` distinct positions in the bounds, keeping strong ones
    pub fn sample_points<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Result<Vec<Point>> {
        let bounds = self.require_bounds()?;
        let width = bounds.width() as usize;
        let positions = width * bounds.height() as usize;

        let indices: Vec<usize> = if count >= positions {
            (0..positions).collect()
        } else {
            rand::seq::index::sample(rng, positions, count).into_vec()
        };

        let points = indices
            .into_iter()
            .filter_map(|index| {
                let x = bounds.x1 + (index % width) as u32;
                let y = bounds.y1 + (index / width) as u32;
                (self.mask.get_pixel(x, y).0[0] > POINT_THRESHOLD).then(|| Point::new(i64::from(x), i64::from(y)))
            })
            .collect::<Vec<_>>();

        tracing::debug!(requested = count, kept = points.len(), "sampled selection points");
        Ok(points)
    }

    /// Write sampled points to `path`; returns how many were written
    pub fn export_points<P: AsRef<Path>, R: Rng + ?Sized>(
        &self,
        path: P,
        count: usize,
        rng: &mut R,
    ) -> Result<usize> {
        let points = self.sample_points(count, rng)?;
        write_points_file(path, &points)?;
        Ok(points.len())
    }

    /// Bounds as a box prompt
    pub fn bounding_box(&self) -> Result<BoxPrompt> {
        Ok(self.require_bounds()?.to_box())
    }
}

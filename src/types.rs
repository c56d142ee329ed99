//! Core data types shared by the bridge and the host

use crate::error::{Result, SegmentError};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Boolean foreground grid produced by one segmentation result
///
/// Rows map to image height and columns to image width. Every mask is
/// rectangular and non-empty by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    data: Array2<bool>,
}

impl Mask {
    /// Wrap an existing array, rejecting empty grids
    pub fn new(data: Array2<bool>) -> Result<Self> {
        if data.nrows() == 0 || data.ncols() == 0 {
            return Err(SegmentError::invalid_input(format!(
                "mask must be non-empty, got {}x{}",
                data.nrows(),
                data.ncols()
            )));
        }
        Ok(Self { data })
    }

    /// Build a mask from nested rows, rejecting empty or ragged input
    pub fn from_rows<R: AsRef<[bool]>>(rows: &[R]) -> Result<Self> {
        let first = rows
            .first()
            .ok_or_else(|| SegmentError::invalid_input("mask has no rows"))?;
        let cols = first.as_ref().len();
        if cols == 0 {
            return Err(SegmentError::invalid_input("mask has no columns"));
        }

        let mut flat = Vec::with_capacity(rows.len() * cols);
        for (index, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != cols {
                return Err(SegmentError::invalid_input(format!(
                    "mask is not rectangular: row {} has {} columns, expected {}",
                    index,
                    row.len(),
                    cols
                )));
            }
            flat.extend_from_slice(row);
        }

        let data = Array2::from_shape_vec((rows.len(), cols), flat)
            .map_err(|e| SegmentError::invalid_input(format!("mask shape error: {e}")))?;
        Ok(Self { data })
    }

    /// All-false mask of the given shape
    pub fn empty(rows: usize, cols: usize) -> Result<Self> {
        Self::new(Array2::from_elem((rows, cols), false))
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    #[must_use]
    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// Value at `(row, col)`, `false` when out of range
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> bool {
        self.data.get((row, col)).copied().unwrap_or(false)
    }

    /// Number of foreground cells
    #[must_use]
    pub fn area(&self) -> usize {
        self.data.iter().filter(|v| **v).count()
    }

    #[must_use]
    pub fn as_array(&self) -> &Array2<bool> {
        &self.data
    }

    #[must_use]
    pub fn into_array(self) -> Array2<bool> {
        self.data
    }
}

/// Whether a prompted call returns one mask or several candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MaskCardinality {
    #[default]
    Multiple,
    Single,
}

impl MaskCardinality {
    pub const TOKENS: [&'static str; 2] = ["Multiple", "Single"];

    pub fn parse(token: &str) -> Result<Self> {
        match token {
            "Multiple" => Ok(Self::Multiple),
            "Single" => Ok(Self::Single),
            other => Err(SegmentError::invalid_input(format!(
                "unknown mask type '{}', expected one of {:?}",
                other,
                Self::TOKENS
            ))),
        }
    }

    #[must_use]
    pub fn as_token(self) -> &'static str {
        match self {
            Self::Multiple => "Multiple",
            Self::Single => "Single",
        }
    }

    #[must_use]
    pub fn is_multiple(self) -> bool {
        self == Self::Multiple
    }
}

impl fmt::Display for MaskCardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// Segmentation mode as named on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SegmentationMode {
    #[default]
    Auto,
    Box,
    Selection,
    #[serde(rename = "Box-Selection")]
    BoxSelection,
}

impl SegmentationMode {
    pub const TOKENS: [&'static str; 4] = ["Auto", "Box", "Selection", "Box-Selection"];

    pub fn parse(token: &str) -> Result<Self> {
        match token {
            "Auto" => Ok(Self::Auto),
            "Box" => Ok(Self::Box),
            "Selection" => Ok(Self::Selection),
            "Box-Selection" => Ok(Self::BoxSelection),
            other => Err(SegmentError::UnknownMode(other.to_string())),
        }
    }

    #[must_use]
    pub fn as_token(self) -> &'static str {
        match self {
            Self::Auto => "Auto",
            Self::Box => "Box",
            Self::Selection => "Selection",
            Self::BoxSelection => "Box-Selection",
        }
    }

    /// Modes that need a non-empty selection on the host side
    #[must_use]
    pub fn needs_selection(self) -> bool {
        !matches!(self, Self::Auto)
    }
}

impl fmt::Display for SegmentationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// Point-grid density for automatic segmentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ResolutionTier {
    Low,
    #[default]
    Medium,
    High,
}

impl ResolutionTier {
    /// Lenient parse: unrecognised tiers yield `None` so callers fall back to defaults
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "Low" => Some(Self::Low),
            "Medium" => Some(Self::Medium),
            "High" => Some(Self::High),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_token(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }

    /// Points sampled per image side
    #[must_use]
    pub fn points_per_side(self) -> usize {
        match self {
            Self::Low => 16,
            Self::Medium => 32,
            Self::High => 64,
        }
    }
}

/// Deepest crop pyramid accepted for automatic segmentation
pub const MAX_CROP_LAYERS: u32 = 4;

/// Tuning knobs for automatic segmentation; `None` means family default
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoTuning {
    /// Raw resolution token as received; unrecognised tokens are kept for logging
    pub resolution: Option<String>,
    pub crop_layers: Option<u32>,
    pub min_mask_area: Option<u32>,
}

impl AutoTuning {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_resolution(mut self, tier: ResolutionTier) -> Self {
        self.resolution = Some(tier.as_token().to_string());
        self
    }

    #[must_use]
    pub fn with_crop_layers(mut self, layers: u32) -> Self {
        self.crop_layers = Some(layers);
        self
    }

    #[must_use]
    pub fn with_min_mask_area(mut self, area: u32) -> Self {
        self.min_mask_area = Some(area);
        self
    }

    /// Recognised resolution tier, if any
    #[must_use]
    pub fn resolution_tier(&self) -> Option<ResolutionTier> {
        self.resolution.as_deref().and_then(ResolutionTier::from_token)
    }

    /// Reject crop pyramids deeper than [`MAX_CROP_LAYERS`]
    pub fn validate(&self) -> Result<()> {
        match self.crop_layers {
            Some(layers) if layers > MAX_CROP_LAYERS => Err(SegmentError::invalid_input(format!(
                "crop layers must be at most {MAX_CROP_LAYERS}, got {layers}"
            ))),
            _ => Ok(()),
        }
    }
}

/// Axis-aligned box prompt, top-left and bottom-right corners in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxPrompt {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoxPrompt {
    #[must_use]
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    #[must_use]
    pub fn as_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// Positive prompt point in image pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

impl Point {
    #[must_use]
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

/// Segmentation input for a single call
#[derive(Debug, Clone, PartialEq)]
pub enum PromptSpec {
    Automatic(AutoTuning),
    Box(BoxPrompt),
    Points {
        points: Vec<Point>,
        bbox: Option<BoxPrompt>,
    },
}

impl PromptSpec {
    /// Reject prompts the model cannot use
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Automatic(tuning) => tuning.validate(),
            Self::Box(bbox) => validate_box(bbox),
            Self::Points { points, bbox } => {
                if points.is_empty() {
                    return Err(SegmentError::invalid_input(
                        "point prompt requires at least one selection point",
                    ));
                }
                bbox.as_ref().map_or(Ok(()), validate_box)
            },
        }
    }
}

fn validate_box(bbox: &BoxPrompt) -> Result<()> {
    let coords = bbox.as_array();
    if coords.iter().any(|c| !c.is_finite()) {
        return Err(SegmentError::invalid_input(format!(
            "box coordinates must be finite: {:?}",
            coords
        )));
    }
    if bbox.x2 < bbox.x1 || bbox.y2 < bbox.y1 {
        return Err(SegmentError::invalid_input(format!(
            "box bottom-right must not precede top-left: {:?}",
            coords
        )));
    }
    Ok(())
}

/// Typed result of persisting one segmentation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskBatch {
    /// Shared path prefix; files are `<stem><index>.seg`
    pub stem: String,
    /// Number of files written, indices `0..count`
    pub count: usize,
    pub format: crate::codec::MaskFormat,
}

impl MaskBatch {
    /// Paths of every file in the batch, in index order
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        (0..self.count)
            .map(|index| crate::protocol::mask_file_path(&self.stem, index))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_from_rows() {
        let mask = Mask::from_rows(&[vec![true, false, true], vec![false, false, true]]).unwrap();
        assert_eq!(mask.rows(), 2);
        assert_eq!(mask.cols(), 3);
        assert!(mask.get(0, 2));
        assert!(!mask.get(1, 0));
        assert!(!mask.get(7, 7));
        assert_eq!(mask.area(), 3);
    }

    #[test]
    fn test_mask_rejects_empty_and_ragged() {
        let empty: Vec<Vec<bool>> = vec![];
        assert!(matches!(
            Mask::from_rows(&empty),
            Err(SegmentError::InvalidInput(_))
        ));
        assert!(matches!(
            Mask::from_rows(&[Vec::<bool>::new()]),
            Err(SegmentError::InvalidInput(_))
        ));
        assert!(matches!(
            Mask::from_rows(&[vec![true, true], vec![true]]),
            Err(SegmentError::InvalidInput(_))
        ));
        assert!(Mask::empty(0, 4).is_err());
    }

    #[test]
    fn test_mode_tokens() {
        for token in SegmentationMode::TOKENS {
            assert_eq!(SegmentationMode::parse(token).unwrap().as_token(), token);
        }
        assert!(matches!(
            SegmentationMode::parse("auto"),
            Err(SegmentError::UnknownMode(_))
        ));
    }

    #[test]
    fn test_cardinality_tokens() {
        assert_eq!(MaskCardinality::parse("Single").unwrap(), MaskCardinality::Single);
        assert!(MaskCardinality::parse("Multiple").unwrap().is_multiple());
        assert!(MaskCardinality::parse("Many").is_err());
    }

    #[test]
    fn test_resolution_tiers() {
        assert_eq!(ResolutionTier::Low.points_per_side(), 16);
        assert_eq!(ResolutionTier::Medium.points_per_side(), 32);
        assert_eq!(ResolutionTier::High.points_per_side(), 64);
        assert_eq!(ResolutionTier::from_token("Ultra"), None);

        let tuning = AutoTuning {
            resolution: Some("Ultra".to_string()),
            ..AutoTuning::default()
        };
        assert_eq!(tuning.resolution_tier(), None);
        assert_eq!(
            AutoTuning::new().with_resolution(ResolutionTier::High).resolution_tier(),
            Some(ResolutionTier::High)
        );
    }

    #[test]
    fn test_prompt_validation() {
        assert!(PromptSpec::Automatic(AutoTuning::default()).validate().is_ok());
        let deepest = AutoTuning::new().with_crop_layers(MAX_CROP_LAYERS);
        assert!(PromptSpec::Automatic(deepest).validate().is_ok());
        let too_deep = AutoTuning::new().with_crop_layers(64);
        assert!(matches!(
            PromptSpec::Automatic(too_deep).validate(),
            Err(SegmentError::InvalidInput(_))
        ));
        assert!(PromptSpec::Box(BoxPrompt::new(10.0, 10.0, 20.0, 20.0)).validate().is_ok());
        assert!(PromptSpec::Box(BoxPrompt::new(20.0, 10.0, 10.0, 20.0)).validate().is_err());
        assert!(PromptSpec::Box(BoxPrompt::new(f32::NAN, 0.0, 1.0, 1.0)).validate().is_err());

        let no_points = PromptSpec::Points {
            points: vec![],
            bbox: None,
        };
        assert!(matches!(no_points.validate(), Err(SegmentError::InvalidInput(_))));

        let points = PromptSpec::Points {
            points: vec![Point::new(3, 4)],
            bbox: Some(BoxPrompt::new(0.0, 0.0, 8.0, 8.0)),
        };
        assert!(points.validate().is_ok());
    }
}

//! Model-inference abstraction shared by every model family
//!
//! A [`ModelLoader`] turns a [`ModelSpec`] into a boxed [`SamModel`]. The
//! families only ever talk to these traits, so the ONNX Runtime backend and
//! the mock backend are interchangeable.

use crate::error::{Result, SegmentError};
use crate::family::FamilyKind;
use crate::types::{BoxPrompt, Mask, MaskCardinality, Point};
use image::RgbImage;
use ndarray::{Array3, ArrayView2, Axis};
use std::fmt;
use std::path::PathBuf;

/// Logits above this value are foreground
pub const MASK_THRESHOLD: f32 = 0.0;

/// Compute device a model can be placed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    #[default]
    Cpu,
    Cuda,
    CoreMl,
}

impl Device {
    #[must_use]
    pub fn is_accelerated(self) -> bool {
        !matches!(self, Self::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
            Self::CoreMl => "coreml",
        })
    }
}

/// Everything a loader needs to materialize a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub family: FamilyKind,
    pub model_type: String,
    /// Image encoder graph
    pub encoder: PathBuf,
    /// Prompt decoder graph
    pub decoder: PathBuf,
}

/// Prompt in model-ready form: pixel coordinates plus SAM point labels
///
/// Label 1 is a positive point. A box is kept separate and encoded by each
/// backend according to its graph conventions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PromptInput {
    pub points: Vec<[f32; 2]>,
    pub labels: Vec<f32>,
    pub bbox: Option<BoxPrompt>,
}

impl PromptInput {
    /// Positive points with an optional box
    #[must_use]
    pub fn from_points(points: &[Point], bbox: Option<BoxPrompt>) -> Self {
        Self {
            points: points.iter().map(|p| [p.x as f32, p.y as f32]).collect(),
            labels: vec![1.0; points.len()],
            bbox,
        }
    }

    /// Box only
    #[must_use]
    pub fn from_box(bbox: BoxPrompt) -> Self {
        Self {
            points: Vec::new(),
            labels: Vec::new(),
            bbox: Some(bbox),
        }
    }

    /// One positive point at sub-pixel coordinates
    #[must_use]
    pub fn single_point(x: f32, y: f32) -> Self {
        Self {
            points: vec![[x, y]],
            labels: vec![1.0],
            bbox: None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.bbox.is_none()
    }
}

/// Raw decoder output at source image resolution
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// `(masks, rows, cols)` logits
    pub logits: Array3<f32>,
    /// One predicted IoU per mask
    pub iou_scores: Vec<f32>,
}

impl Prediction {
    pub fn new(logits: Array3<f32>, iou_scores: Vec<f32>) -> Result<Self> {
        if logits.len_of(Axis(0)) != iou_scores.len() {
            return Err(SegmentError::inference(format!(
                "decoder returned {} masks but {} IoU scores",
                logits.len_of(Axis(0)),
                iou_scores.len()
            )));
        }
        Ok(Self { logits, iou_scores })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.iou_scores.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iou_scores.is_empty()
    }

    #[must_use]
    pub fn logits_at(&self, index: usize) -> ArrayView2<'_, f32> {
        self.logits.index_axis(Axis(0), index)
    }

    /// Output indices to keep for the requested cardinality
    ///
    /// Graphs exported with four outputs carry the single-mask answer at
    /// index 0 and the multimask candidates at 1..4.
    #[must_use]
    pub fn selected_indices(&self, cardinality: MaskCardinality) -> Vec<usize> {
        match (self.len(), cardinality) {
            (4, MaskCardinality::Single) => vec![0],
            (4, MaskCardinality::Multiple) => (1..4).collect(),
            (1, _) => vec![0],
            (_, MaskCardinality::Multiple) => (0..self.len()).collect(),
            (_, MaskCardinality::Single) => best_index(&self.iou_scores).into_iter().collect(),
        }
    }

    /// Threshold the selected outputs into masks
    ///
    /// # Errors
    /// `Inference` when the decoder produced no outputs to select from
    pub fn into_masks(self, cardinality: MaskCardinality) -> Result<Vec<Mask>> {
        let indices = self.selected_indices(cardinality);
        if indices.is_empty() {
            return Err(SegmentError::inference(format!(
                "decoder returned no masks for a {cardinality} prompt"
            )));
        }
        indices
            .into_iter()
            .map(|index| logits_to_mask(self.logits_at(index)))
            .collect()
    }
}

fn best_index(scores: &[f32]) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(index, _)| index)
}

/// Threshold logits at [`MASK_THRESHOLD`]
pub fn logits_to_mask(logits: ArrayView2<'_, f32>) -> Result<Mask> {
    Mask::new(logits.mapv(|v| v > MASK_THRESHOLD))
}

/// A loaded, promptable segmentation model
pub trait SamModel {
    /// Encode the image; subsequent predictions refer to it
    ///
    /// # Errors
    /// - Encoder failures
    /// - Zero-sized images
    fn set_image(&mut self, image: &RgbImage) -> Result<()>;

    /// `(width, height)` of the current image, if one is set
    fn image_size(&self) -> Option<(u32, u32)>;

    /// Decode masks for a prompt against the current image
    ///
    /// # Errors
    /// - No image set
    /// - Decoder failures
    fn predict(&mut self, prompt: &PromptInput, multimask: bool) -> Result<Prediction>;

    /// Move the model to `device`, returning where it actually ended up
    ///
    /// # Errors
    /// - Session rebuild failures
    fn place(&mut self, device: Device) -> Result<Device>;

    fn device(&self) -> Device;

    /// Short human-readable description for logs
    fn describe(&self) -> String;
}

/// Factory that produces models, mirroring how backends are injected
pub trait ModelLoader {
    /// Load the encoder and decoder named by `spec`
    ///
    /// # Errors
    /// - Missing or unreadable graph files
    /// - Runtime session creation failures
    fn load(&self, spec: &ModelSpec) -> Result<Box<dyn SamModel>>;

    /// Best accelerated device available on this machine
    fn accelerator(&self) -> Option<Device>;

    /// Name used in logs and on the command line
    fn name(&self) -> &'static str;
}

//! Model families: one strategy per Segment Anything generation
//!
//! A family knows how to name its model types, where its graphs live and which
//! automatic-generation defaults it uses. Prompted segmentation and the
//! self-test are shared through default methods on [`ModelFamily`].

mod sam1;
mod sam2;

pub use sam1::Sam1Family;
pub use sam2::{write_encoder_bundle, Sam2Family};

use crate::codec::{self, MaskFormat};
use crate::error::{Result, SegmentError};
use crate::generator::{AutoMaskGenerator, GeneratorParams};
use crate::inference::{Device, ModelLoader, PromptInput, SamModel};
use crate::protocol::{self, mask_file_path};
use crate::types::{AutoTuning, BoxPrompt, Mask, MaskBatch, MaskCardinality, PromptSpec};
use image::RgbImage;
use std::fmt;
use std::path::Path;

/// Checkpoint filename prefix of the first generation
pub const SAM1_PREFIX: &str = "sam_";
/// Checkpoint filename prefix of the second generation
pub const SAM2_PREFIX: &str = "sam2";

/// Self-test image side and prompt
const SELF_TEST_SIZE: u32 = 50;
const SELF_TEST_BOX: [f32; 4] = [10.0, 10.0, 20.0, 20.0];

/// Segment Anything generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FamilyKind {
    Sam1,
    Sam2,
}

impl FamilyKind {
    /// Pick the family from the checkpoint's file name (case-insensitive prefix)
    pub fn from_checkpoint(checkpoint: &Path) -> Result<Self> {
        let filename = checkpoint
            .file_name()
            .map(|name| name.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if filename.starts_with(SAM1_PREFIX) {
            Ok(Self::Sam1)
        } else if filename.starts_with(SAM2_PREFIX) {
            Ok(Self::Sam2)
        } else {
            Err(SegmentError::UnknownFamily(format!(
                "'{}': filename must start with '{}' for SAM1 or '{}' for SAM2",
                checkpoint.display(),
                SAM1_PREFIX,
                SAM2_PREFIX
            )))
        }
    }

    /// Fresh strategy for this family
    #[must_use]
    pub fn strategy(self) -> Box<dyn ModelFamily> {
        match self {
            Self::Sam1 => Box::new(Sam1Family::new()),
            Self::Sam2 => Box::new(Sam2Family::new()),
        }
    }
}

impl fmt::Display for FamilyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sam1 => "SAM1",
            Self::Sam2 => "SAM2",
        })
    }
}

/// Select the strategy for a checkpoint before anything is loaded
pub fn select_family(checkpoint: &Path) -> Result<Box<dyn ModelFamily>> {
    FamilyKind::from_checkpoint(checkpoint).map(FamilyKind::strategy)
}

/// Look up a checkpoint file stem (last extension stripped) in a family table
fn lookup_model_type(table: &[(&str, &'static str)], filename: &str) -> Option<&'static str> {
    let stem = Path::new(filename).file_stem()?.to_str()?;
    table
        .iter()
        .find(|(checkpoint, _)| *checkpoint == stem)
        .map(|(_, model_type)| *model_type)
}

/// A loaded model, exclusively owned by whoever holds it
pub struct ModelHandle {
    family: FamilyKind,
    model_type: String,
    model: Box<dyn SamModel>,
}

impl ModelHandle {
    #[must_use]
    pub fn new(family: FamilyKind, model_type: String, model: Box<dyn SamModel>) -> Self {
        Self {
            family,
            model_type,
            model,
        }
    }

    #[must_use]
    pub fn family(&self) -> FamilyKind {
        self.family
    }

    #[must_use]
    pub fn model_type(&self) -> &str {
        &self.model_type
    }

    /// Move the model to `device`, returning where it ended up
    pub fn place(&mut self, device: Device) -> Result<Device> {
        self.model.place(device)
    }

    #[must_use]
    pub fn device(&self) -> Device {
        self.model.device()
    }

    #[must_use]
    pub fn describe(&self) -> String {
        self.model.describe()
    }

    pub fn model_mut(&mut self) -> &mut dyn SamModel {
        self.model.as_mut()
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("family", &self.family)
            .field("model_type", &self.model_type)
            .field("model", &self.model.describe())
            .finish()
    }
}

/// Persists one call's masks as `<stem><index>.seg`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskSink {
    stem: String,
    format: MaskFormat,
}

impl MaskSink {
    #[must_use]
    pub fn new<S: Into<String>>(stem: S, format: MaskFormat) -> Self {
        Self {
            stem: stem.into(),
            format,
        }
    }

    #[must_use]
    pub fn stem(&self) -> &str {
        &self.stem
    }

    #[must_use]
    pub fn format(&self) -> MaskFormat {
        self.format
    }

    /// Write every mask in order; the batch count equals `masks.len()`
    pub fn persist(&self, masks: &[Mask]) -> Result<MaskBatch> {
        for (index, mask) in masks.iter().enumerate() {
            codec::write_mask(mask_file_path(&self.stem, index), mask, self.format)?;
        }
        tracing::info!(stem = %self.stem, count = masks.len(), format = ?self.format, "masks written");
        Ok(MaskBatch {
            stem: self.stem.clone(),
            count: masks.len(),
            format: self.format,
        })
    }
}

/// Strategy interface over model generations
pub trait ModelFamily {
    fn kind(&self) -> FamilyKind;

    /// Checkpoint stems recognised by [`identify_model_type`](Self::identify_model_type)
    fn known_checkpoints(&self) -> Vec<&'static str>;

    /// Model type for a checkpoint file name, `None` when the stem is unknown
    fn identify_model_type(&self, filename: &str) -> Option<String>;

    /// Load the model named by `checkpoint`
    ///
    /// # Errors
    /// - `ModelLoad` for unknown model types, missing graphs or runtime failures
    fn load_model(
        &mut self,
        loader: &dyn ModelLoader,
        checkpoint: &Path,
        model_type: &str,
    ) -> Result<ModelHandle>;

    /// Automatic-generation defaults for this generation
    fn generator_params(&self) -> GeneratorParams;

    /// Release family-held resources; safe to call repeatedly
    fn release(&mut self) -> Result<()>;

    /// Generate masks over the whole image and persist all of them
    fn segment_automatic(
        &self,
        handle: &mut ModelHandle,
        image: &RgbImage,
        sink: &MaskSink,
        tuning: &AutoTuning,
    ) -> Result<MaskBatch> {
        let params = self.generator_params().with_tuning(tuning);
        tracing::info!(
            family = %self.kind(),
            points_per_side = params.points_per_side,
            crop_layers = params.crop_n_layers,
            min_area = params.min_mask_region_area,
            "automatic segmentation"
        );

        let generated = AutoMaskGenerator::new(params).generate(handle.model_mut(), image)?;
        let masks: Vec<Mask> = generated.into_iter().map(|g| g.mask).collect();
        sink.persist(&masks)
    }

    /// Segment the region inside a box prompt
    fn segment_box(
        &self,
        handle: &mut ModelHandle,
        image: &RgbImage,
        cardinality: MaskCardinality,
        bbox: BoxPrompt,
        sink: &MaskSink,
    ) -> Result<MaskBatch> {
        PromptSpec::Box(bbox).validate()?;
        let model = handle.model_mut();
        model.set_image(image)?;
        let prediction = model.predict(&PromptInput::from_box(bbox), cardinality.is_multiple())?;
        sink.persist(&prediction.into_masks(cardinality)?)
    }

    /// Segment from positive points read from `points_file`, optionally boxed
    fn segment_points(
        &self,
        handle: &mut ModelHandle,
        image: &RgbImage,
        cardinality: MaskCardinality,
        points_file: &Path,
        bbox: Option<BoxPrompt>,
        sink: &MaskSink,
    ) -> Result<MaskBatch> {
        let points = protocol::read_points_file(points_file)?;
        PromptSpec::Points {
            points: points.clone(),
            bbox,
        }
        .validate()?;
        tracing::debug!(points = points.len(), boxed = bbox.is_some(), "point prompt");

        let model = handle.model_mut();
        model.set_image(image)?;
        let prediction = model.predict(
            &PromptInput::from_points(&points, bbox),
            cardinality.is_multiple(),
        )?;
        sink.persist(&prediction.into_masks(cardinality)?)
    }

    /// Run a synthetic single-mask box prompt on a black image; nothing is written
    fn self_test(&self, handle: &mut ModelHandle) -> Result<()> {
        let image = RgbImage::new(SELF_TEST_SIZE, SELF_TEST_SIZE);
        let [x1, y1, x2, y2] = SELF_TEST_BOX;
        let model = handle.model_mut();
        model.set_image(&image)?;
        let prediction = model.predict(&PromptInput::from_box(BoxPrompt::new(x1, y1, x2, y2)), false)?;
        tracing::debug!(candidates = prediction.len(), "self-test prediction");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockModelLoader;
    use crate::types::Point;
    use tempfile::TempDir;

    fn mock_handle(loader: &MockModelLoader) -> ModelHandle {
        let spec = crate::inference::ModelSpec {
            family: FamilyKind::Sam1,
            model_type: "vit_b".to_string(),
            encoder: "sam_vit_b_01ec64.onnx".into(),
            decoder: "sam_vit_b_01ec64.decoder.onnx".into(),
        };
        ModelHandle::new(FamilyKind::Sam1, "vit_b".to_string(), loader.load(&spec).unwrap())
    }

    #[test]
    fn test_family_from_prefix() {
        assert_eq!(
            FamilyKind::from_checkpoint(Path::new("/m/sam_vit_b_01ec64.onnx")).unwrap(),
            FamilyKind::Sam1
        );
        assert_eq!(
            FamilyKind::from_checkpoint(Path::new("/m/SAM2.1_hiera_tiny.safetensors")).unwrap(),
            FamilyKind::Sam2
        );
        assert!(matches!(
            FamilyKind::from_checkpoint(Path::new("/m/mobile_sam.pt")),
            Err(SegmentError::UnknownFamily(_))
        ));
        assert_eq!(select_family(Path::new("sam2_hiera_large.pt")).unwrap().kind(), FamilyKind::Sam2);
    }

    #[test]
    fn test_sink_persists_in_order() {
        let dir = TempDir::new().unwrap();
        let stem = dir.path().join("__seg__mask__").display().to_string();
        let sink = MaskSink::new(stem.clone(), MaskFormat::Binary);
        let masks = vec![
            Mask::from_rows(&[[true, false]]).unwrap(),
            Mask::from_rows(&[[false, true]]).unwrap(),
        ];

        let batch = sink.persist(&masks).unwrap();
        assert_eq!(batch.count, 2);
        assert_eq!(protocol::probe_batch_len(&stem), 2);
        for (path, mask) in batch.paths().iter().zip(&masks) {
            assert_eq!(&codec::read_mask(path, MaskFormat::Binary).unwrap(), mask);
        }
    }

    #[test]
    fn test_segment_box_single_writes_one_file() {
        let dir = TempDir::new().unwrap();
        let stem = dir.path().join("out_").display().to_string();
        let loader = MockModelLoader::new();
        let mut handle = mock_handle(&loader);
        let family = Sam1Family::new();

        let batch = family
            .segment_box(
                &mut handle,
                &RgbImage::new(50, 40),
                MaskCardinality::Single,
                BoxPrompt::new(10.0, 10.0, 20.0, 20.0),
                &MaskSink::new(stem.clone(), MaskFormat::Binary),
            )
            .unwrap();

        assert_eq!(batch.count, 1);
        let mask = codec::read_mask(mask_file_path(&stem, 0), MaskFormat::Binary).unwrap();
        assert_eq!((mask.rows(), mask.cols()), (40, 50));
        assert!(!mask_file_path(&stem, 1).exists());
    }

    #[test]
    fn test_segment_points_multiple_and_empty_file() {
        let dir = TempDir::new().unwrap();
        let points_file = dir.path().join("__seg__sel__.txt");
        protocol::write_points_file(&points_file, &[Point::new(5, 5), Point::new(12, 9)]).unwrap();
        let stem = dir.path().join("m_").display().to_string();
        let loader = MockModelLoader::new();
        let mut handle = mock_handle(&loader);
        let family = Sam2Family::new();

        let batch = family
            .segment_points(
                &mut handle,
                &RgbImage::new(30, 30),
                MaskCardinality::Multiple,
                &points_file,
                None,
                &MaskSink::new(stem.clone(), MaskFormat::Text),
            )
            .unwrap();
        assert_eq!(batch.count, 3);
        assert_eq!(protocol::probe_batch_len(&stem), 3);

        std::fs::write(&points_file, "").unwrap();
        let result = family.segment_points(
            &mut handle,
            &RgbImage::new(30, 30),
            MaskCardinality::Multiple,
            &points_file,
            None,
            &MaskSink::new(dir.path().join("empty_").display().to_string(), MaskFormat::Binary),
        );
        assert!(matches!(result, Err(SegmentError::InvalidInput(_))));
    }

    #[test]
    fn test_self_test_persists_nothing() {
        let loader = MockModelLoader::new();
        let mut handle = mock_handle(&loader);
        Sam1Family::new().self_test(&mut handle).unwrap();
        assert_eq!(
            loader.get_call_history(),
            vec!["load:vit_b", "set_image", "predict:single"]
        );
    }
}

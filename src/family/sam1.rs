//! First-generation Segment Anything (ViT encoders)

use super::{lookup_model_type, FamilyKind, ModelFamily, ModelHandle};
use crate::error::{Result, SegmentError};
use crate::generator::GeneratorParams;
use crate::inference::{ModelLoader, ModelSpec};
use std::path::Path;

/// Released checkpoint stems and their model types
const MODEL_TYPES: [(&str, &str); 3] = [
    ("sam_vit_h_4b8939", "vit_h"),
    ("sam_vit_l_0b3195", "vit_l"),
    ("sam_vit_b_01ec64", "vit_b"),
];

/// `default` is accepted as an alias of the largest encoder
const DEFAULT_ALIAS: (&str, &str) = ("default", "vit_h");

/// Suffix of the prompt decoder graph exported next to the encoder
const DECODER_SUFFIX: &str = ".decoder.onnx";

#[derive(Debug, Default)]
pub struct Sam1Family;

impl Sam1Family {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn canonical_type(model_type: &str) -> Option<&'static str> {
        if model_type == DEFAULT_ALIAS.0 {
            return Some(DEFAULT_ALIAS.1);
        }
        MODEL_TYPES
            .iter()
            .map(|(_, known)| *known)
            .find(|known| *known == model_type)
    }

    /// `<dir>/<stem>.decoder.onnx` for checkpoint `<dir>/<stem>.<ext>`
    fn decoder_path(checkpoint: &Path) -> std::path::PathBuf {
        let stem = checkpoint
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        checkpoint.with_file_name(format!("{stem}{DECODER_SUFFIX}"))
    }
}

impl ModelFamily for Sam1Family {
    fn kind(&self) -> FamilyKind {
        FamilyKind::Sam1
    }

    fn known_checkpoints(&self) -> Vec<&'static str> {
        MODEL_TYPES.iter().map(|(stem, _)| *stem).collect()
    }

    fn identify_model_type(&self, filename: &str) -> Option<String> {
        let model_type = lookup_model_type(&MODEL_TYPES, filename)?;
        tracing::info!(model_type, "auto-detected SAM1 model type");
        Some(model_type.to_string())
    }

    fn load_model(
        &mut self,
        loader: &dyn ModelLoader,
        checkpoint: &Path,
        model_type: &str,
    ) -> Result<ModelHandle> {
        let canonical = Self::canonical_type(model_type).ok_or_else(|| {
            SegmentError::model_load(format!(
                "unknown SAM1 model type '{}', expected one of {:?}",
                model_type,
                MODEL_TYPES.iter().map(|(_, t)| *t).collect::<Vec<_>>()
            ))
        })?;

        let spec = ModelSpec {
            family: FamilyKind::Sam1,
            model_type: canonical.to_string(),
            encoder: checkpoint.to_path_buf(),
            decoder: Self::decoder_path(checkpoint),
        };
        let model = loader.load(&spec)?;
        tracing::info!(model = %model.describe(), "SAM1 model loaded");
        Ok(ModelHandle::new(FamilyKind::Sam1, canonical.to_string(), model))
    }

    fn generator_params(&self) -> GeneratorParams {
        GeneratorParams::sam1()
    }

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockModelLoader;

    #[test]
    fn test_identify_model_type() {
        let family = Sam1Family::new();
        assert_eq!(family.identify_model_type("sam_vit_h_4b8939.pth").as_deref(), Some("vit_h"));
        assert_eq!(family.identify_model_type("sam_vit_b_01ec64.onnx").as_deref(), Some("vit_b"));
        assert_eq!(family.identify_model_type("sam_vit_b_01ec64").as_deref(), Some("vit_b"));
        assert_eq!(family.identify_model_type("sam_vit_b.onnx"), None);
        assert_eq!(family.known_checkpoints().len(), 3);
    }

    #[test]
    fn test_decoder_sits_next_to_encoder() {
        assert_eq!(
            Sam1Family::decoder_path(Path::new("/models/sam_vit_l_0b3195.onnx")),
            Path::new("/models/sam_vit_l_0b3195.decoder.onnx")
        );
    }

    #[test]
    fn test_load_model() {
        let loader = MockModelLoader::new();
        let mut family = Sam1Family::new();
        let handle = family
            .load_model(&loader, Path::new("/m/sam_vit_l_0b3195.onnx"), "vit_l")
            .unwrap();
        assert_eq!(handle.model_type(), "vit_l");
        assert_eq!(handle.family(), FamilyKind::Sam1);

        let handle = family
            .load_model(&loader, Path::new("/m/sam_vit_l_0b3195.onnx"), "default")
            .unwrap();
        assert_eq!(handle.model_type(), "vit_h");

        assert!(matches!(
            family.load_model(&loader, Path::new("/m/sam_vit_l_0b3195.onnx"), "vit_x"),
            Err(SegmentError::ModelLoad(_))
        ));
        assert!(family.release().is_ok());
    }
}

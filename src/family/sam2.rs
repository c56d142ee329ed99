//! Second-generation Segment Anything (Hiera encoders)
//!
//! Decoder graphs are named after the model config (`sam2_hiera_t`,
//! `sam2_hiera_b+`, ...). Checkpoints may also arrive as a safetensors bundle
//! whose `model` tensor holds the encoder graph bytes; such bundles are
//! unpacked to a temporary file beside the checkpoint for the lifetime of the
//! strategy.

use super::{lookup_model_type, FamilyKind, ModelFamily, ModelHandle};
use crate::error::{Result, SegmentError};
use crate::generator::GeneratorParams;
use crate::inference::{ModelLoader, ModelSpec};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

const MODEL_TYPES: [(&str, &str); 8] = [
    ("sam2_hiera_large", "sam2_hiera_large"),
    ("sam2_hiera_base_plus", "sam2_hiera_base_plus"),
    ("sam2_hiera_small", "sam2_hiera_small"),
    ("sam2_hiera_tiny", "sam2_hiera_tiny"),
    ("sam2.1_hiera_large", "sam2_hiera_large"),
    ("sam2.1_hiera_base_plus", "sam2_hiera_base_plus"),
    ("sam2.1_hiera_small", "sam2_hiera_small"),
    ("sam2.1_hiera_tiny", "sam2_hiera_tiny"),
];

const MODEL_CONFIGS: [(&str, &str); 4] = [
    ("sam2_hiera_tiny", "sam2_hiera_t"),
    ("sam2_hiera_small", "sam2_hiera_s"),
    ("sam2_hiera_base_plus", "sam2_hiera_b+"),
    ("sam2_hiera_large", "sam2_hiera_l"),
];

const DEFAULT_CONFIG: &str = "sam2_hiera_l";
const DECODER_SUFFIX: &str = ".decoder.onnx";
const SAFETENSORS_EXTENSION: &str = "safetensors";

/// Tensor in a safetensors bundle that carries the encoder graph
const BUNDLE_TENSOR: &str = "model";
const BUNDLE_DTYPE: &str = "U8";

/// Sanity limit on the JSON header of a bundle
const MAX_HEADER_LEN: u64 = 100 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct TensorEntry {
    dtype: String,
    shape: Vec<usize>,
    data_offsets: [usize; 2],
}

#[derive(Debug, Default)]
pub struct Sam2Family {
    /// Unpacked encoder graph of a safetensors checkpoint
    temp_checkpoint: Option<TempPath>,
}

impl Sam2Family {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Config name for a model type, falling back to the large config
    #[must_use]
    pub fn config_for(model_type: &str) -> &'static str {
        MODEL_CONFIGS
            .iter()
            .find(|(known, _)| *known == model_type)
            .map_or_else(
                || {
                    tracing::warn!(model_type, config = DEFAULT_CONFIG, "unknown SAM2 model type, using default config");
                    DEFAULT_CONFIG
                },
                |(_, config)| *config,
            )
    }

    /// Path of the temporary encoder graph, while one exists
    #[must_use]
    pub fn temp_checkpoint(&self) -> Option<&Path> {
        self.temp_checkpoint.as_deref()
    }

    fn is_bundle(checkpoint: &Path) -> bool {
        checkpoint
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(SAFETENSORS_EXTENSION))
    }

    /// Unpack the bundle to `<dir>/<stem>_temp*.onnx` and track it
    fn unpack_bundle(&mut self, checkpoint: &Path) -> Result<PathBuf> {
        tracing::info!(checkpoint = %checkpoint.display(), "converting safetensors checkpoint");
        let graph = read_encoder_bundle(checkpoint)?;

        let dir = checkpoint
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let stem = checkpoint
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut temp = tempfile::Builder::new()
            .prefix(&format!("{stem}_temp"))
            .suffix(".onnx")
            .tempfile_in(dir)
            .map_err(|e| SegmentError::file_io_error("create temporary checkpoint in", dir, e))?;
        temp.write_all(&graph)
            .and_then(|()| temp.flush())
            .map_err(|e| SegmentError::file_io_error("write temporary checkpoint", temp.path(), e))?;

        let temp_path = temp.into_temp_path();
        let path = temp_path.to_path_buf();
        tracing::info!(path = %path.display(), bytes = graph.len(), "converted checkpoint");
        self.temp_checkpoint = Some(temp_path);
        Ok(path)
    }
}

impl ModelFamily for Sam2Family {
    fn kind(&self) -> FamilyKind {
        FamilyKind::Sam2
    }

    fn known_checkpoints(&self) -> Vec<&'static str> {
        MODEL_TYPES.iter().map(|(stem, _)| *stem).collect()
    }

    fn identify_model_type(&self, filename: &str) -> Option<String> {
        let model_type = lookup_model_type(&MODEL_TYPES, filename)?;
        tracing::info!(model_type, "auto-detected SAM2 model type");
        Some(model_type.to_string())
    }

    fn load_model(
        &mut self,
        loader: &dyn ModelLoader,
        checkpoint: &Path,
        model_type: &str,
    ) -> Result<ModelHandle> {
        let config = Self::config_for(model_type);
        let encoder = if Self::is_bundle(checkpoint) {
            self.unpack_bundle(checkpoint)?
        } else {
            checkpoint.to_path_buf()
        };

        let spec = ModelSpec {
            family: FamilyKind::Sam2,
            model_type: model_type.to_string(),
            encoder,
            decoder: checkpoint.with_file_name(format!("{config}{DECODER_SUFFIX}")),
        };

        match loader.load(&spec) {
            Ok(model) => {
                tracing::info!(model = %model.describe(), config, "SAM2 model loaded");
                Ok(ModelHandle::new(FamilyKind::Sam2, model_type.to_string(), model))
            },
            Err(e) => {
                if let Err(cleanup) = self.release() {
                    tracing::warn!(error = %cleanup, "failed to remove temporary checkpoint");
                }
                Err(e)
            },
        }
    }

    fn generator_params(&self) -> GeneratorParams {
        GeneratorParams::sam2()
    }

    fn release(&mut self) -> Result<()> {
        if let Some(temp) = self.temp_checkpoint.take() {
            let path = temp.to_path_buf();
            temp.close()
                .map_err(|e| SegmentError::file_io_error("remove temporary checkpoint", &path, e))?;
            tracing::info!(path = %path.display(), "removed temporary checkpoint");
        }
        Ok(())
    }
}

impl Drop for Sam2Family {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(error = %e, "cleanup on drop failed");
        }
    }
}

/// Extract the encoder graph bytes from a safetensors bundle
///
/// # Errors
/// - `ModelLoad` when the file is unreadable, malformed or lacks a `U8` `model` tensor
pub fn read_encoder_bundle(path: &Path) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path).map_err(|e| SegmentError::file_io_error("read checkpoint", path, e))?;
    let invalid = |detail: String| {
        SegmentError::model_load_with_context(
            "convert safetensors checkpoint",
            path,
            &detail,
            &["re-export the encoder bundle", "use the .onnx encoder directly"],
        )
    };

    let mut cursor = bytes.as_slice();
    let header_len = cursor
        .read_u64::<LittleEndian>()
        .map_err(|_| invalid("file shorter than the 8-byte header length".to_string()))?;
    if header_len > MAX_HEADER_LEN {
        return Err(invalid(format!("header length {header_len} is implausible")));
    }
    let header_len = header_len as usize;
    let header = cursor
        .get(..header_len)
        .ok_or_else(|| invalid(format!("header of {header_len} bytes is truncated")))?;
    let data = cursor.get(header_len..).unwrap_or_default();

    let entries: BTreeMap<String, serde_json::Value> =
        serde_json::from_slice(header).map_err(|e| invalid(format!("header is not valid JSON: {e}")))?;
    let entry = entries
        .get(BUNDLE_TENSOR)
        .ok_or_else(|| invalid(format!("no '{BUNDLE_TENSOR}' tensor")))?;
    let entry: TensorEntry = serde_json::from_value(entry.clone())
        .map_err(|e| invalid(format!("'{BUNDLE_TENSOR}' entry is malformed: {e}")))?;

    if entry.dtype != BUNDLE_DTYPE {
        return Err(invalid(format!(
            "'{BUNDLE_TENSOR}' tensor has dtype {}, expected {BUNDLE_DTYPE}",
            entry.dtype
        )));
    }
    let [start, end] = entry.data_offsets;
    data.get(start..end)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| invalid(format!("tensor data {start}..{end} exceeds {} bytes", data.len())))
}

/// Write `graph` as the `model` tensor of a safetensors bundle
///
/// # Errors
/// - IO failures writing `path`
pub fn write_encoder_bundle(path: &Path, graph: &[u8]) -> Result<()> {
    let mut header = BTreeMap::new();
    header.insert(
        BUNDLE_TENSOR.to_string(),
        TensorEntry {
            dtype: BUNDLE_DTYPE.to_string(),
            shape: vec![graph.len()],
            data_offsets: [0, graph.len()],
        },
    );
    let header = serde_json::to_vec(&header)?;

    let mut out = Vec::with_capacity(8 + header.len() + graph.len());
    out.write_u64::<LittleEndian>(header.len() as u64)?;
    out.extend_from_slice(&header);
    out.extend_from_slice(graph);
    std::fs::write(path, out).map_err(|e| SegmentError::file_io_error("write checkpoint", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockModelLoader;
    use tempfile::TempDir;

    #[test]
    fn test_identify_model_type() {
        let family = Sam2Family::new();
        assert_eq!(
            family.identify_model_type("sam2.1_hiera_base_plus.safetensors").as_deref(),
            Some("sam2_hiera_base_plus")
        );
        assert_eq!(family.identify_model_type("sam2_hiera_tiny.pt").as_deref(), Some("sam2_hiera_tiny"));
        assert_eq!(family.identify_model_type("sam2_hiera_huge.pt"), None);
    }

    #[test]
    fn test_config_table() {
        assert_eq!(Sam2Family::config_for("sam2_hiera_tiny"), "sam2_hiera_t");
        assert_eq!(Sam2Family::config_for("sam2_hiera_base_plus"), "sam2_hiera_b+");
        assert_eq!(Sam2Family::config_for("something_else"), "sam2_hiera_l");
    }

    #[test]
    fn test_bundle_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sam2_hiera_small.safetensors");
        write_encoder_bundle(&path, b"onnx-graph-bytes").unwrap();
        assert_eq!(read_encoder_bundle(&path).unwrap(), b"onnx-graph-bytes");
    }

    #[test]
    fn test_bundle_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sam2_hiera_small.safetensors");

        std::fs::write(&path, [1, 2, 3]).unwrap();
        assert!(matches!(read_encoder_bundle(&path), Err(SegmentError::ModelLoad(_))));

        let mut bytes = 64_u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"{}");
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(read_encoder_bundle(&path), Err(SegmentError::ModelLoad(_))));

        let header = br#"{"model":{"dtype":"F32","shape":[1],"data_offsets":[0,4]}}"#;
        let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
        bytes.extend_from_slice(header);
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(read_encoder_bundle(&path), Err(SegmentError::ModelLoad(_))));
    }

    #[test]
    fn test_safetensors_load_tracks_and_releases_temp() {
        let dir = TempDir::new().unwrap();
        let checkpoint = dir.path().join("sam2.1_hiera_tiny.safetensors");
        write_encoder_bundle(&checkpoint, b"graph").unwrap();

        let loader = MockModelLoader::new();
        let mut family = Sam2Family::new();
        let handle = family.load_model(&loader, &checkpoint, "sam2_hiera_tiny").unwrap();
        assert_eq!(handle.model_type(), "sam2_hiera_tiny");

        let temp = family.temp_checkpoint().unwrap().to_path_buf();
        assert!(temp.exists());
        assert_eq!(temp.parent(), Some(dir.path()));
        let name = temp.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("sam2.1_hiera_tiny_temp"));
        assert!(name.ends_with(".onnx"));
        assert_eq!(std::fs::read(&temp).unwrap(), b"graph");

        family.release().unwrap();
        assert!(!temp.exists());
        family.release().unwrap();
    }

    #[test]
    fn test_failed_load_removes_temp() {
        let dir = TempDir::new().unwrap();
        let checkpoint = dir.path().join("sam2_hiera_large.safetensors");
        write_encoder_bundle(&checkpoint, b"graph").unwrap();

        let mut family = Sam2Family::new();
        let result = family.load_model(&MockModelLoader::new_failing_load(), &checkpoint, "sam2_hiera_large");
        assert!(matches!(result, Err(SegmentError::ModelLoad(_))));
        assert!(family.temp_checkpoint().is_none());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_drop_removes_temp() {
        let dir = TempDir::new().unwrap();
        let checkpoint = dir.path().join("sam2_hiera_small.safetensors");
        write_encoder_bundle(&checkpoint, b"graph").unwrap();

        let temp = {
            let mut family = Sam2Family::new();
            let _handle = family.load_model(&MockModelLoader::new(), &checkpoint, "sam2_hiera_small").unwrap();
            family.temp_checkpoint().unwrap().to_path_buf()
        };
        assert!(!temp.exists());
    }
}

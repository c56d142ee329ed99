//! Persisted host settings
//!
//! Stored as a flat JSON object. Reading is lenient: a missing or malformed
//! key falls back to its default, and an unreadable file yields the defaults
//! with a logged warning.

use crate::error::{Result, SegmentError};
use crate::types::{AutoTuning, MaskCardinality, SegmentationMode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// File name of the settings record
pub const SETTINGS_FILE: &str = "segany_settings.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSettings {
    /// Bridge executable; `None` means look up `segany-bridge` next to the host
    #[serde(rename = "pythonPath")]
    pub bridge_path: Option<String>,
    pub model_type: String,
    pub check_pt_path: Option<String>,
    pub mask_type: MaskCardinality,
    pub seg_type: SegmentationMode,
    pub is_random_color: bool,
    pub mask_color: [u8; 4],
    pub sel_pt_cnt: usize,
    pub seg_res: String,
    #[serde(rename = "cropNLayers")]
    pub crop_n_layers: u32,
    pub min_mask_area: u32,
}

impl Default for SegmentSettings {
    fn default() -> Self {
        Self {
            bridge_path: None,
            model_type: "sam2_hiera_large".to_string(),
            check_pt_path: None,
            mask_type: MaskCardinality::Multiple,
            seg_type: SegmentationMode::Auto,
            is_random_color: false,
            mask_color: [255, 0, 0, 255],
            sel_pt_cnt: 10,
            seg_res: "Medium".to_string(),
            crop_n_layers: 0,
            min_mask_area: 0,
        }
    }
}

fn field<T: DeserializeOwned>(map: &Map<String, Value>, key: &str, default: T) -> T {
    match map.get(key) {
        None => default,
        Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "ignoring malformed setting");
            default
        }),
    }
}

impl SegmentSettings {
    /// Default location: next to the running executable, else the working directory
    #[must_use]
    pub fn default_path() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(SETTINGS_FILE)))
            .unwrap_or_else(|| PathBuf::from(SETTINGS_FILE))
    }

    /// Merge a parsed JSON object over the defaults key by key
    #[must_use]
    pub fn from_json_map(map: &Map<String, Value>) -> Self {
        let d = Self::default();
        Self {
            bridge_path: field(map, "pythonPath", d.bridge_path),
            model_type: field(map, "modelType", d.model_type),
            check_pt_path: field(map, "checkPtPath", d.check_pt_path),
            mask_type: field(map, "maskType", d.mask_type),
            seg_type: field(map, "segType", d.seg_type),
            is_random_color: field(map, "isRandomColor", d.is_random_color),
            mask_color: field(map, "maskColor", d.mask_color),
            sel_pt_cnt: field(map, "selPtCnt", d.sel_pt_cnt),
            seg_res: field(map, "segRes", d.seg_res),
            crop_n_layers: field(map, "cropNLayers", d.crop_n_layers),
            min_mask_area: field(map, "minMaskArea", d.min_mask_area),
        }
    }

    /// Load settings, never failing
    #[must_use]
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let parsed = std::fs::read_to_string(path)
            .map_err(|e| SegmentError::file_io_error("read settings", path, e))
            .and_then(|text| serde_json::from_str::<Value>(&text).map_err(SegmentError::from));

        match parsed {
            Ok(Value::Object(map)) => Self::from_json_map(&map),
            Ok(other) => {
                tracing::warn!(path = %path.display(), kind = ?other, "settings file is not a JSON object, using defaults");
                Self::default()
            },
            Err(e) => {
                tracing::info!(path = %path.display(), error = %e, "using default settings");
                Self::default()
            },
        }
    }

    /// Write settings as JSON
    pub fn persist<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| SegmentError::file_io_error("write settings", path, e))
    }

    /// Automatic-mode tuning carried by these settings
    #[must_use]
    pub fn auto_tuning(&self) -> AutoTuning {
        AutoTuning {
            resolution: Some(self.seg_res.clone()),
            crop_layers: Some(self.crop_n_layers),
            min_mask_area: Some(self.min_mask_area),
        }
    }

    /// Fixed layer colour, or `None` when every layer gets a random colour
    #[must_use]
    pub fn layer_color(&self) -> Option<[u8; 4]> {
        if self.is_random_color {
            None
        } else {
            Some(self.mask_color)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = SegmentSettings::default();
        assert_eq!(settings.model_type, "sam2_hiera_large");
        assert_eq!(settings.mask_type, MaskCardinality::Multiple);
        assert_eq!(settings.seg_type, SegmentationMode::Auto);
        assert_eq!(settings.mask_color, [255, 0, 0, 255]);
        assert_eq!(settings.sel_pt_cnt, 10);
        assert_eq!(settings.seg_res, "Medium");
        assert_eq!(settings.layer_color(), Some([255, 0, 0, 255]));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            SegmentSettings::load(dir.path().join(SETTINGS_FILE)),
            SegmentSettings::default()
        );
    }

    #[test]
    fn test_invalid_json_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(SegmentSettings::load(&path), SegmentSettings::default());
        std::fs::write(&path, "[1, 2]").unwrap();
        assert_eq!(SegmentSettings::load(&path), SegmentSettings::default());
    }

    #[test]
    fn test_partial_and_malformed_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(
            &path,
            r#"{"segType": "Box-Selection", "selPtCnt": "many", "checkPtPath": "/m/sam_vit_b_01ec64.onnx", "extra": 1}"#,
        )
        .unwrap();

        let settings = SegmentSettings::load(&path);
        assert_eq!(settings.seg_type, SegmentationMode::BoxSelection);
        assert_eq!(settings.sel_pt_cnt, 10);
        assert_eq!(settings.check_pt_path.as_deref(), Some("/m/sam_vit_b_01ec64.onnx"));
        assert_eq!(settings.model_type, "sam2_hiera_large");
    }

    #[test]
    fn test_persist_uses_camel_case_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        let settings = SegmentSettings {
            bridge_path: Some("/opt/segany-bridge".to_string()),
            is_random_color: true,
            crop_n_layers: 2,
            ..SegmentSettings::default()
        };
        settings.persist(&path).unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["pythonPath"], "/opt/segany-bridge");
        assert_eq!(raw["cropNLayers"], 2);
        assert_eq!(raw["isRandomColor"], true);
        assert_eq!(SegmentSettings::load(&path), settings);
        assert_eq!(settings.layer_color(), None);
    }
}

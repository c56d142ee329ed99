//! Error types for segmentation, mask exchange and the host bridge

use std::path::Path;
use thiserror::Error;

/// Result type alias for segmentation operations
pub type Result<T> = std::result::Result<T, SegmentError>;

/// Error taxonomy shared by the bridge process and the host side
#[derive(Error, Debug)]
pub enum SegmentError {
    /// Checkpoint filename matches neither model family prefix
    #[error("Unknown model family: {0}")]
    UnknownFamily(String),

    /// Auto-detection could not map the checkpoint stem to a model type
    #[error("Could not resolve model type: {0}")]
    ModelTypeUnresolved(String),

    /// Model loading (or checkpoint conversion) failed
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// Checkpoint path does not exist
    #[error("Checkpoint file not found: {}", .0.display())]
    CheckpointNotFound(std::path::PathBuf),

    /// Malformed prompt, ragged mask, empty selection and similar input problems
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Malformed mask file or container on read
    #[error("Corrupt data: {0}")]
    CorruptData(String),

    /// Segmentation mode token not recognised
    #[error("Unknown segmentation type: {0}")]
    UnknownMode(String),

    /// Bridge process exited unsuccessfully
    #[error("Segmentation process failed ({status}): {stderr}")]
    SubprocessFailure { status: String, stderr: String },

    /// Argument vector does not match the invocation grammar
    #[error("Usage error: {0}")]
    Usage(String),

    /// Model inference errors
    #[error("Inference error: {0}")]
    Inference(String),

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding/encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Settings or container header parse errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SegmentError {
    /// Create a new invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new corrupt data error
    pub fn corrupt_data<S: Into<String>>(msg: S) -> Self {
        Self::CorruptData(msg.into())
    }

    /// Create a new model load error
    pub fn model_load<S: Into<String>>(msg: S) -> Self {
        Self::ModelLoad(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new usage error
    pub fn usage<S: Into<String>>(msg: S) -> Self {
        Self::Usage(msg.into())
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<Path>>(operation: &str, path: P, error: std::io::Error) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create model load error with troubleshooting context
    pub fn model_load_with_context<P: AsRef<Path>>(
        operation: &str,
        model_path: P,
        error: &str,
        suggestions: &[&str],
    ) -> Self {
        let path_display = model_path.as_ref().display();
        let suggestion_text = if suggestions.is_empty() {
            String::new()
        } else {
            format!(" Suggestions: {}", suggestions.join(", "))
        };

        Self::ModelLoad(format!(
            "Failed to {} '{}': {}.{}",
            operation, path_display, error, suggestion_text
        ))
    }

    /// Whether the process should still exit successfully after reporting this error
    #[must_use]
    pub fn is_operation_only(&self) -> bool {
        matches!(self, Self::UnknownMode(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = SegmentError::invalid_input("empty selection");
        assert!(matches!(err, SegmentError::InvalidInput(_)));

        let err = SegmentError::corrupt_data("short buffer");
        assert!(matches!(err, SegmentError::CorruptData(_)));
    }

    #[test]
    fn test_error_display() {
        let err = SegmentError::UnknownMode("Lasso".to_string());
        assert_eq!(err.to_string(), "Unknown segmentation type: Lasso");

        let err = SegmentError::CheckpointNotFound("/models/sam_vit_b_01ec64.onnx".into());
        assert!(err.to_string().contains("sam_vit_b_01ec64.onnx"));
    }

    #[test]
    fn test_contextual_errors() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = SegmentError::file_io_error("write mask", Path::new("/tmp/__seg__mask__0.seg"), io_error);
        let error_string = err.to_string();
        assert!(error_string.contains("write mask"));
        assert!(error_string.contains("__seg__mask__0.seg"));

        let err = SegmentError::model_load_with_context(
            "open decoder",
            Path::new("/models/sam2_hiera_l.decoder.onnx"),
            "file not found",
            &["export the decoder graph", "check the checkpoint directory"],
        );
        let error_string = err.to_string();
        assert!(error_string.starts_with("Model load error"));
        assert!(error_string.contains("Suggestions"));
    }

    #[test]
    fn test_only_unknown_mode_is_operation_only() {
        assert!(SegmentError::UnknownMode("x".into()).is_operation_only());
        assert!(!SegmentError::usage("x").is_operation_only());
        assert!(!SegmentError::model_load("x").is_operation_only());
    }
}

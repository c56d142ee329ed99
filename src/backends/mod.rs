//! Model backend implementations
//!
//! - ONNX Runtime backend (encoder/decoder graph pairs, GPU acceleration)
//! - Mock backend (deterministic masks, no model files)

#[cfg(feature = "onnx")]
pub mod onnx;

pub mod mock;

#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxModelLoader, OnnxSamModel};

pub use self::mock::{MockModelLoader, MockSamModel};

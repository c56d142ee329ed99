#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # segany
//!
//! Segment Anything masks for image editors, split across two processes:
//!
//! - a **bridge** (`segany-bridge`) that loads a SAM1 or SAM2 checkpoint,
//!   runs one segmentation call and writes every mask as a bit-packed
//!   `<stem><index>.seg` file
//! - a **host** (`segany`) that exports the image and selection, runs the
//!   bridge and turns the mask batch into coloured layers
//!
//! ## Features
//!
//! - **Two model families** behind one [`ModelFamily`] contract, chosen from the
//!   checkpoint filename prefix (`sam_` or `sam2`)
//! - **Four modes**: automatic, box, selection points and box plus points
//! - **Compact mask exchange**: 8-byte big-endian header and LSB-first bit packing,
//!   or a plain text grid
//! - **Hardware acceleration**: CUDA and `CoreML` placement with CPU fallback
//! - **Mock runtime** for running the whole pipeline without model files
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use segany::{MockModelLoader, SegmentCommand, SegmentationDispatcher};
//!
//! # fn example() -> segany::Result<()> {
//! let command = SegmentCommand::parse(&[
//!     "auto",
//!     "/models/sam_vit_b_01ec64.onnx",
//!     "/tmp/photo.png",
//!     "Box",
//!     "Single",
//!     "/tmp/__seg__mask__",
//!     "True",
//!     "sel_place_holder",
//!     "10,10,20,20",
//! ])?;
//!
//! let mut dispatcher = SegmentationDispatcher::new(Box::new(MockModelLoader::new()));
//! let outcome = dispatcher.run(&command)?;
//! println!("{}", outcome.status_line());
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime models with CUDA and `CoreML` providers
//! - `cli` (default): the `segany-bridge` and `segany` binaries
//! - `tracing-json`: JSON log output

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod codec;
pub mod dispatcher;
pub mod error;
pub mod family;
pub mod generator;
pub mod host;
pub mod inference;
pub mod protocol;
pub mod tracing_config;
pub mod types;

pub use backends::*;
pub use codec::{read_mask, write_mask, MaskFormat};
pub use dispatcher::{DispatchState, DispatcherConfig, Outcome, SegmentationDispatcher};
pub use error::{Result, SegmentError};
pub use family::{select_family, FamilyKind, MaskSink, ModelFamily, ModelHandle, Sam1Family, Sam2Family};
pub use generator::{AutoMaskGenerator, GeneratedMask, GeneratorParams};
pub use host::{BridgeRunner, HostJob, HostRun, MaskLayer, SegmentSettings, Selection, TempArtifacts};
pub use inference::{Device, ModelLoader, ModelSpec, Prediction, PromptInput, SamModel};
pub use protocol::{ModeArgs, ModelTypeRequest, SegmentCommand, SegmentRequest};
pub use tracing_config::{events, spans, TracingConfig, TracingFormat};
pub use types::{
    AutoTuning, BoxPrompt, Mask, MaskBatch, MaskCardinality, Point, PromptSpec, ResolutionTier,
    SegmentationMode, MAX_CROP_LAYERS,
};

#[cfg(feature = "cli")]
pub use tracing_config::init_cli_tracing;

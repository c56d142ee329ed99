//! Segmentation dispatcher: one bridge invocation from arguments to mask files
//!
//! The dispatcher walks a fixed sequence of states and records every
//! transition:
//!
//! ```text
//! Start -> FamilySelected -> ModelTypeResolved -> ModelLoaded
//!       -> {SelfTest | ModeExecuted} -> Cleanup -> End
//! ```
//!
//! Any failure is fatal to the invocation. Cleanup runs on every path, after
//! a failure too.

use crate::error::{Result, SegmentError};
use crate::family::{select_family, FamilyKind, MaskSink, ModelFamily, ModelHandle};
use crate::inference::{Device, ModelLoader};
use crate::protocol::{ModeArgs, ModelTypeRequest, SegmentCommand, SegmentRequest};
use crate::tracing_config::spans;
use crate::types::{MaskBatch, SegmentationMode};
use std::fmt;
use std::path::Path;
use std::time::Instant;

/// Status line printed after a successful self-test
pub const SELF_TEST_STATUS: &str = "Success!!";
/// Status line printed once a segmentation invocation finishes
pub const DONE_STATUS: &str = "Done!";
/// Prefix of the status line printed when an invocation fails
pub const FAILED_STATUS: &str = "Failed:";

/// Process exit codes
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_USAGE: i32 = 2;

/// Dispatcher states, in the order they are entered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchState {
    Start,
    FamilySelected(FamilyKind),
    ModelTypeResolved(String),
    ModelLoaded(Device),
    SelfTest,
    ModeExecuted(SegmentationMode),
    Cleanup,
    End,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("Start"),
            Self::FamilySelected(kind) => write!(f, "FamilySelected({kind})"),
            Self::ModelTypeResolved(model_type) => write!(f, "ModelTypeResolved({model_type})"),
            Self::ModelLoaded(device) => write!(f, "ModelLoaded({device})"),
            Self::SelfTest => f.write_str("SelfTest"),
            Self::ModeExecuted(mode) => write!(f, "ModeExecuted({mode})"),
            Self::Cleanup => f.write_str("Cleanup"),
            Self::End => f.write_str("End"),
        }
    }
}

/// Result of a successful invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    SelfTestPassed { model_type: String, device: Device },
    Segmented { mode: SegmentationMode, batch: MaskBatch },
}

impl Outcome {
    /// Final status line for stdout
    #[must_use]
    pub fn status_line(&self) -> &'static str {
        match self {
            Self::SelfTestPassed { .. } => SELF_TEST_STATUS,
            Self::Segmented { .. } => DONE_STATUS,
        }
    }
}

/// Exit code for a failed invocation
#[must_use]
pub fn exit_code_for(error: &SegmentError) -> i32 {
    match error {
        SegmentError::Usage(_) => EXIT_USAGE,
        e if e.is_operation_only() => EXIT_SUCCESS,
        _ => EXIT_FAILURE,
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Move the model to an accelerator when one is available
    pub use_accelerator: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            use_accelerator: true,
        }
    }
}

impl DispatcherConfig {
    #[must_use]
    pub fn builder() -> DispatcherConfigBuilder {
        DispatcherConfigBuilder::default()
    }
}

/// Builder for `DispatcherConfig`
#[derive(Debug, Default)]
pub struct DispatcherConfigBuilder {
    config: DispatcherConfig,
}

impl DispatcherConfigBuilder {
    #[must_use]
    pub fn use_accelerator(mut self, enabled: bool) -> Self {
        self.config.use_accelerator = enabled;
        self
    }

    #[must_use]
    pub fn build(self) -> DispatcherConfig {
        self.config
    }
}

/// Best-effort placement on `accelerator`; never fails the invocation
pub fn place_model(handle: &mut ModelHandle, accelerator: Option<Device>) -> Device {
    let Some(device) = accelerator else {
        tracing::debug!("no accelerator available, model stays on {}", handle.device());
        return handle.device();
    };

    match handle.place(device) {
        Ok(placed) => {
            tracing::info!(device = %placed, "model placed");
            placed
        },
        Err(e) => {
            crate::tracing_config::events::warning_with_recommendation(
                &format!("placing model on {device} failed: {e}"),
                "continuing on the current device",
            );
            handle.device()
        },
    }
}

/// Runs bridge invocations against an injected model loader
pub struct SegmentationDispatcher {
    loader: Box<dyn ModelLoader>,
    config: DispatcherConfig,
    states: Vec<DispatchState>,
}

impl SegmentationDispatcher {
    #[must_use]
    pub fn new(loader: Box<dyn ModelLoader>) -> Self {
        Self::with_config(loader, DispatcherConfig::default())
    }

    #[must_use]
    pub fn with_config(loader: Box<dyn ModelLoader>, config: DispatcherConfig) -> Self {
        Self {
            loader,
            config,
            states: Vec::new(),
        }
    }

    /// States entered by the most recent `run`
    #[must_use]
    pub fn states(&self) -> &[DispatchState] {
        &self.states
    }

    fn transition(&mut self, state: DispatchState) {
        tracing::info!(state = %state, "dispatcher transition");
        self.states.push(state);
    }

    /// Execute one invocation
    ///
    /// # Errors
    /// - `UnknownFamily`, `ModelTypeUnresolved`, `CheckpointNotFound` before loading
    /// - `ModelLoad` from the family
    /// - `InvalidInput`, `Image`, `Io`, `Inference` while segmenting
    pub fn run(&mut self, command: &SegmentCommand) -> Result<Outcome> {
        self.states.clear();
        let span = spans::dispatch(command.model_type.as_token(), &command.checkpoint);
        let _entered = span.enter();
        let started = Instant::now();

        self.transition(DispatchState::Start);
        let mut family = match select_family(&command.checkpoint) {
            Ok(family) => family,
            Err(e) => {
                self.transition(DispatchState::End);
                return Err(e);
            },
        };
        self.transition(DispatchState::FamilySelected(family.kind()));

        let result = self.execute(family.as_mut(), command);

        self.transition(DispatchState::Cleanup);
        if let Err(e) = family.release() {
            tracing::warn!(error = %e, "family cleanup failed");
        }
        drop(family);
        self.transition(DispatchState::End);

        crate::tracing_config::events::performance_metric(
            "dispatch",
            started.elapsed().as_millis() as u64,
        );
        result
    }

    fn execute(&mut self, family: &mut dyn ModelFamily, command: &SegmentCommand) -> Result<Outcome> {
        let model_type = resolve_model_type(family, &command.model_type, &command.checkpoint)?;
        self.transition(DispatchState::ModelTypeResolved(model_type.clone()));

        if !command.checkpoint.exists() {
            return Err(SegmentError::CheckpointNotFound(command.checkpoint.clone()));
        }

        let mut handle = {
            let span = spans::model_loading(&family.kind().to_string(), &model_type);
            let _entered = span.enter();
            family.load_model(self.loader.as_ref(), &command.checkpoint, &model_type)?
        };

        let device = if self.config.use_accelerator {
            place_model(&mut handle, self.loader.accelerator())
        } else {
            handle.device()
        };
        self.transition(DispatchState::ModelLoaded(device));

        let Some(request) = &command.request else {
            family.self_test(&mut handle)?;
            self.transition(DispatchState::SelfTest);
            return Ok(Outcome::SelfTestPassed { model_type, device });
        };

        let batch = segment(family, &mut handle, request)?;
        let mode = request.mode.mode();
        self.transition(DispatchState::ModeExecuted(mode));
        Ok(Outcome::Segmented { mode, batch })
    }
}

fn resolve_model_type(
    family: &dyn ModelFamily,
    requested: &ModelTypeRequest,
    checkpoint: &Path,
) -> Result<String> {
    match requested {
        ModelTypeRequest::Explicit(model_type) => Ok(model_type.clone()),
        ModelTypeRequest::Auto => {
            let filename = checkpoint
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            family.identify_model_type(&filename).ok_or_else(|| {
                SegmentError::ModelTypeUnresolved(format!(
                    "{} checkpoint '{}' not recognised; use one of the following file names: {:?}",
                    family.kind(),
                    filename,
                    family.known_checkpoints()
                ))
            })
        },
    }
}

fn segment(family: &dyn ModelFamily, handle: &mut ModelHandle, request: &SegmentRequest) -> Result<MaskBatch> {
    let image = image::open(&request.image)
        .map_err(|e| SegmentError::invalid_input(format!("cannot read image '{}': {e}", request.image.display())))?
        .to_rgb8();
    let span = spans::segmentation(
        request.mode.mode().as_token(),
        request.cardinality.as_token(),
        image.dimensions(),
    );
    let _entered = span.enter();

    let sink = MaskSink::new(request.output_stem.clone(), request.format);
    match &request.mode {
        ModeArgs::Auto(tuning) => family.segment_automatic(handle, &image, &sink, tuning),
        ModeArgs::Box(bbox) => family.segment_box(handle, &image, request.cardinality, *bbox, &sink),
        ModeArgs::Selection { points_file, bbox } => {
            family.segment_points(handle, &image, request.cardinality, points_file, *bbox, &sink)
        },
        ModeArgs::BoxSelection { points_file, bbox } => {
            family.segment_points(handle, &image, request.cardinality, points_file, Some(*bbox), &sink)
        },
    }
}

//! Host side of the bridge
//!
//! Exports the image and selection into the temp namespace, runs the bridge
//! process and turns the resulting mask batch into layers.

pub mod artifacts;
pub mod layers;
pub mod runner;
pub mod selection;
pub mod settings;

pub use artifacts::{SweepGuard, TempArtifacts};
pub use layers::{load_layers, write_layers, LayerStyle, MaskLayer};
pub use runner::{BridgeOutput, BridgeRunner};
pub use selection::{Selection, SelectionBounds};
pub use settings::SegmentSettings;

use crate::codec::MaskFormat;
use crate::error::{Result, SegmentError};
use crate::protocol::{ModeArgs, ModelTypeRequest, SegmentCommand, SegmentRequest};
use crate::types::SegmentationMode;
use image::DynamicImage;
use rand::Rng;
use std::path::{Path, PathBuf};

/// Outcome of one host-driven segmentation
#[derive(Debug)]
pub struct HostRun {
    pub layers: Vec<MaskLayer>,
    /// Last status line printed by the bridge
    pub status: Option<String>,
}

/// One configured segmentation job
#[derive(Debug)]
pub struct HostJob {
    settings: SegmentSettings,
    artifacts: TempArtifacts,
    runner: BridgeRunner,
}

impl HostJob {
    #[must_use]
    pub fn new(settings: SegmentSettings, artifacts: TempArtifacts, runner: BridgeRunner) -> Self {
        Self {
            settings,
            artifacts,
            runner,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &SegmentSettings {
        &self.settings
    }

    #[must_use]
    pub fn artifacts(&self) -> &TempArtifacts {
        &self.artifacts
    }

    fn checkpoint(&self) -> Result<PathBuf> {
        self.settings
            .check_pt_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| SegmentError::invalid_input("no checkpoint configured, set checkPtPath"))
    }

    fn model_type(&self) -> ModelTypeRequest {
        ModelTypeRequest::parse(&self.settings.model_type)
    }

    /// Ask the bridge to load the model and run its synthetic prompt
    pub fn self_test(&self) -> Result<BridgeOutput> {
        let command = SegmentCommand::self_test(self.model_type(), self.checkpoint()?);
        self.runner.run(&command)
    }

    /// Build the bridge command, exporting the selection as needed
    pub fn build_command<R: Rng + ?Sized>(
        &self,
        image_path: &Path,
        selection: Option<&Selection>,
        rng: &mut R,
    ) -> Result<SegmentCommand> {
        let mode = self.settings.seg_type;
        let selected = || require_selection(mode, selection);

        let mode_args = match mode {
            SegmentationMode::Auto => {
                let tuning = self.settings.auto_tuning();
                tuning.validate()?;
                ModeArgs::Auto(tuning)
            },
            SegmentationMode::Box => ModeArgs::Box(selected()?.bounding_box()?),
            SegmentationMode::Selection => {
                let points_file = self.export_points(selected()?, rng)?;
                ModeArgs::Selection { points_file, bbox: None }
            },
            SegmentationMode::BoxSelection => {
                let selection = selected()?;
                let bbox = selection.bounding_box()?;
                let points_file = self.export_points(selection, rng)?;
                ModeArgs::BoxSelection { points_file, bbox }
            },
        };

        let request = SegmentRequest {
            image: image_path.to_path_buf(),
            cardinality: self.settings.mask_type,
            output_stem: self.artifacts.mask_stem(),
            format: MaskFormat::Binary,
            mode: mode_args,
        };
        Ok(SegmentCommand::segment(self.model_type(), self.checkpoint()?, request))
    }

    fn export_points<R: Rng + ?Sized>(&self, selection: &Selection, rng: &mut R) -> Result<PathBuf> {
        let path = self.artifacts.selection_file();
        let written = selection.export_points(&path, self.settings.sel_pt_cnt, rng)?;
        if written == 0 {
            return Err(SegmentError::invalid_input(
                "selection yields no sample points, select more strongly",
            ));
        }
        tracing::debug!(points = written, path = %path.display(), "exported selection points");
        Ok(path)
    }

    /// Segment `image` and return its mask layers
    ///
    /// The temp namespace is swept before the run and again on every exit path.
    pub fn run<R: Rng + ?Sized>(
        &self,
        image: &DynamicImage,
        selection: Option<&Selection>,
        rng: &mut R,
    ) -> Result<HostRun> {
        let mode = self.settings.seg_type;
        if mode.needs_selection() {
            require_selection(mode, selection)?;
        }
        self.checkpoint()?;

        self.artifacts.sweep()?;
        let _guard = SweepGuard::new(&self.artifacts);

        let image_path = self.artifacts.input_image();
        image.save(&image_path)?;

        let command = self.build_command(&image_path, selection, rng)?;
        let output = self.runner.run(&command)?;

        let style = LayerStyle {
            mode,
            color: self.settings.layer_color(),
            grayscale: !image.color().has_color(),
        };
        let layers = load_layers(&self.artifacts.mask_stem(), MaskFormat::Binary, style, rng)?;

        Ok(HostRun {
            layers,
            status: output.status_line().map(ToString::to_string),
        })
    }
}

fn require_selection(mode: SegmentationMode, selection: Option<&Selection>) -> Result<&Selection> {
    match selection {
        Some(selection) if !selection.is_empty() => Ok(selection),
        _ => Err(SegmentError::invalid_input(format!(
            "{mode} mode needs a non-empty selection"
        ))),
    }
}

//! Merging host CLI arguments over persisted settings

use crate::cli::host::{CliCardinality, CliMode, HostCli};
use crate::host::{Selection, SegmentSettings};
use crate::protocol::parse_box_coords;
use crate::types::{MaskCardinality, ResolutionTier, SegmentationMode, MAX_CROP_LAYERS};
use anyhow::{Context, Result};
use image::DynamicImage;

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Reject argument combinations that cannot produce a run
    pub(crate) fn validate_cli(cli: &HostCli) -> Result<()> {
        if cli.selection.is_some() && cli.rect.is_some() {
            anyhow::bail!("--selection and --rect are mutually exclusive");
        }
        if let Some(resolution) = &cli.resolution {
            if ResolutionTier::from_token(resolution).is_none() {
                anyhow::bail!("Invalid resolution '{resolution}', expected Low, Medium or High");
            }
        }
        if let Some(layers) = cli.crop_layers.filter(|l| *l > MAX_CROP_LAYERS) {
            anyhow::bail!("Invalid --crop-layers {layers}, expected at most {MAX_CROP_LAYERS}");
        }
        if cli.color.is_some() && cli.random_color {
            anyhow::bail!("--color and --random-color are mutually exclusive");
        }
        Ok(())
    }

    /// Apply command-line overrides to the loaded settings
    pub(crate) fn apply(cli: &HostCli, mut settings: SegmentSettings) -> Result<SegmentSettings> {
        if let Some(bridge) = &cli.bridge {
            settings.bridge_path = Some(bridge.clone());
        }
        if let Some(checkpoint) = &cli.checkpoint {
            settings.check_pt_path = Some(checkpoint.display().to_string());
        }
        if let Some(model_type) = &cli.model_type {
            settings.model_type.clone_from(model_type);
        }
        if let Some(mode) = cli.mode {
            settings.seg_type = mode.into();
        }
        if let Some(mask_type) = cli.mask_type {
            settings.mask_type = mask_type.into();
        }
        if let Some(resolution) = &cli.resolution {
            settings.seg_res.clone_from(resolution);
        }
        if let Some(layers) = cli.crop_layers {
            settings.crop_n_layers = layers;
        }
        if let Some(area) = cli.min_mask_area {
            settings.min_mask_area = area;
        }
        if let Some(points) = cli.points {
            settings.sel_pt_cnt = points;
        }
        if let Some(color) = &cli.color {
            settings.mask_color = parse_color(color)?;
            settings.is_random_color = false;
        }
        if cli.random_color {
            settings.is_random_color = true;
        }
        Ok(settings)
    }

    /// Selection from `--selection` or `--rect`, if any
    pub(crate) fn selection(cli: &HostCli, image: &DynamicImage) -> Result<Option<Selection>> {
        if let Some(path) = &cli.selection {
            let selection = Selection::open(path)
                .with_context(|| format!("Failed to load selection '{}'", path.display()))?;
            return Ok(Some(selection));
        }
        if let Some(rect) = &cli.rect {
            let bbox = parse_box_coords(rect).context("Invalid --rect")?;
            let clamp = |v: f32| v.max(0.0).round() as u32;
            return Ok(Some(Selection::rectangle(
                image.width(),
                image.height(),
                clamp(bbox.x1),
                clamp(bbox.y1),
                clamp(bbox.x2),
                clamp(bbox.y2),
            )));
        }
        Ok(None)
    }
}

/// Parse `R,G,B` or `R,G,B,A`
pub(crate) fn parse_color(text: &str) -> Result<[u8; 4]> {
    let channels = text
        .split(',')
        .map(|c| c.trim().parse::<u8>().with_context(|| format!("Invalid colour channel '{c}'")))
        .collect::<Result<Vec<u8>>>()?;
    match channels.as_slice() {
        [r, g, b] => Ok([*r, *g, *b, 255]),
        [r, g, b, a] => Ok([*r, *g, *b, *a]),
        _ => anyhow::bail!("Colour needs 3 or 4 comma-separated channels, got '{text}'"),
    }
}

impl From<CliMode> for SegmentationMode {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::Auto => Self::Auto,
            CliMode::Box => Self::Box,
            CliMode::Selection => Self::Selection,
            CliMode::BoxSelection => Self::BoxSelection,
        }
    }
}

impl From<CliCardinality> for MaskCardinality {
    fn from(cardinality: CliCardinality) -> Self {
        match cardinality {
            CliCardinality::Single => Self::Single,
            CliCardinality::Multiple => Self::Multiple,
        }
    }
}

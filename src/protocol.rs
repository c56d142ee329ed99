//! Process-boundary protocol between the host and the bridge
//!
//! The bridge is invoked with a positional argument vector:
//!
//! ```text
//! <modelType|auto> <checkpointPath>
//! [ <imagePath> <mode> <maskCardinality> <outputStem> [<binaryFlag>]
//!   [ Auto:                    <resTier> <cropLayers> <minArea>
//!   | Selection/Box-Selection: <pointsFilePath> [<boxCoords>]
//!   | Box:                     sel_place_holder <boxCoords> ] ]
//! ```
//!
//! [`SegmentCommand`] is the only place that formats or parses this grammar.
//! Results travel back as `<outputStem><index>.seg` files.

use crate::codec::MaskFormat;
use crate::error::{Result, SegmentError};
use crate::types::{AutoTuning, BoxPrompt, MaskCardinality, Point, PromptSpec, SegmentationMode};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Model-type token asking the bridge to infer the type from the checkpoint name
pub const AUTO_DETECT: &str = "auto";

/// Filler for the unused points-file slot in box mode
pub const SELECTION_PLACEHOLDER: &str = "sel_place_holder";

/// Suffix of every mask file
pub const MASK_EXTENSION: &str = ".seg";

/// Minimum argument count for a segmentation (non self-test) invocation
const SEGMENT_MIN_ARGS: usize = 6;

/// Requested model type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelTypeRequest {
    /// Derive from the checkpoint filename
    Auto,
    /// Use the token as given
    Explicit(String),
}

impl ModelTypeRequest {
    #[must_use]
    pub fn parse(token: &str) -> Self {
        if token.eq_ignore_ascii_case(AUTO_DETECT) {
            Self::Auto
        } else {
            Self::Explicit(token.to_string())
        }
    }

    #[must_use]
    pub fn as_token(&self) -> &str {
        match self {
            Self::Auto => AUTO_DETECT,
            Self::Explicit(token) => token,
        }
    }
}

/// Mode-specific part of a segmentation request
#[derive(Debug, Clone, PartialEq)]
pub enum ModeArgs {
    Auto(AutoTuning),
    Box(BoxPrompt),
    Selection {
        points_file: PathBuf,
        bbox: Option<BoxPrompt>,
    },
    BoxSelection {
        points_file: PathBuf,
        bbox: BoxPrompt,
    },
}

impl ModeArgs {
    #[must_use]
    pub fn mode(&self) -> SegmentationMode {
        match self {
            Self::Auto(_) => SegmentationMode::Auto,
            Self::Box(_) => SegmentationMode::Box,
            Self::Selection { .. } => SegmentationMode::Selection,
            Self::BoxSelection { .. } => SegmentationMode::BoxSelection,
        }
    }
}

/// Everything needed to run one segmentation call
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRequest {
    pub image: PathBuf,
    pub cardinality: MaskCardinality,
    pub output_stem: String,
    pub format: MaskFormat,
    pub mode: ModeArgs,
}

/// Typed form of one bridge invocation
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentCommand {
    pub model_type: ModelTypeRequest,
    pub checkpoint: PathBuf,
    /// `None` runs the self-test only
    pub request: Option<SegmentRequest>,
}

impl SegmentCommand {
    /// Self-test invocation: load the model and run a synthetic prompt
    #[must_use]
    pub fn self_test<P: Into<PathBuf>>(model_type: ModelTypeRequest, checkpoint: P) -> Self {
        Self {
            model_type,
            checkpoint: checkpoint.into(),
            request: None,
        }
    }

    /// Segmentation invocation
    #[must_use]
    pub fn segment<P: Into<PathBuf>>(
        model_type: ModelTypeRequest,
        checkpoint: P,
        request: SegmentRequest,
    ) -> Self {
        Self {
            model_type,
            checkpoint: checkpoint.into(),
            request: Some(request),
        }
    }

    /// Serialize to the positional argument vector (program name excluded)
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            self.model_type.as_token().to_string(),
            self.checkpoint.display().to_string(),
        ];

        let Some(request) = &self.request else {
            return args;
        };

        args.extend([
            request.image.display().to_string(),
            request.mode.mode().as_token().to_string(),
            request.cardinality.as_token().to_string(),
            request.output_stem.clone(),
            request.format.as_flag().to_string(),
        ]);

        match &request.mode {
            ModeArgs::Auto(tuning) => args.extend(auto_tail(tuning)),
            ModeArgs::Box(bbox) => {
                args.push(SELECTION_PLACEHOLDER.to_string());
                args.push(format_box_coords(bbox));
            },
            ModeArgs::Selection { points_file, bbox } => {
                args.push(points_file.display().to_string());
                if let Some(bbox) = bbox {
                    args.push(format_box_coords(bbox));
                }
            },
            ModeArgs::BoxSelection { points_file, bbox } => {
                args.push(points_file.display().to_string());
                args.push(format_box_coords(bbox));
            },
        }

        args
    }

    /// Parse the positional argument vector (program name excluded)
    ///
    /// # Errors
    /// - `Usage` when fewer arguments than the requested mode needs
    /// - `UnknownMode` for an unrecognised mode token
    /// - `InvalidInput` for malformed cardinality, numbers or box coordinates
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();

        let (model_type, checkpoint) = match args.as_slice() {
            [model_type, checkpoint, ..] => (ModelTypeRequest::parse(model_type), PathBuf::from(checkpoint)),
            _ => {
                return Err(SegmentError::usage(
                    "expected <modelType|auto> <checkpointPath> [options]",
                ))
            },
        };

        if args.len() == 2 {
            return Ok(Self::self_test(model_type, checkpoint));
        }

        let [_, _, image, mode, cardinality, stem, rest @ ..] = args.as_slice() else {
            return Err(SegmentError::usage(format!(
                "expected at least {} arguments: <modelType> <checkpointPath> <imagePath> <mode> <maskCardinality> <outputStem>, got {}",
                SEGMENT_MIN_ARGS,
                args.len()
            )));
        };

        let mode = SegmentationMode::parse(mode)?;
        let cardinality = MaskCardinality::parse(cardinality)?;
        let (format, tail) = match rest {
            [flag, tail @ ..] => (MaskFormat::from_flag(flag), tail),
            [] => (MaskFormat::Binary, rest),
        };

        let mode_args = match mode {
            SegmentationMode::Auto => ModeArgs::Auto(parse_auto_tail(tail)?),
            SegmentationMode::Selection => {
                let points_file = tail.first().ok_or_else(|| {
                    SegmentError::usage("Selection mode requires <pointsFilePath>")
                })?;
                let bbox = tail.get(1).map(|coords| parse_box_coords(coords)).transpose()?;
                warn_extra(tail, 2);
                ModeArgs::Selection {
                    points_file: PathBuf::from(points_file),
                    bbox,
                }
            },
            SegmentationMode::BoxSelection => {
                let points_file = tail.first().ok_or_else(|| {
                    SegmentError::usage("Box-Selection mode requires <pointsFilePath> <boxCoords>")
                })?;
                let coords = tail.get(1).ok_or_else(|| {
                    SegmentError::invalid_input("Box-Selection mode requires box coordinates")
                })?;
                warn_extra(tail, 2);
                ModeArgs::BoxSelection {
                    points_file: PathBuf::from(points_file),
                    bbox: parse_box_coords(coords)?,
                }
            },
            SegmentationMode::Box => {
                let [placeholder, coords, ..] = tail else {
                    return Err(SegmentError::invalid_input(
                        "Box mode requires box top-left and bottom-right coordinates",
                    ));
                };
                if *placeholder != SELECTION_PLACEHOLDER {
                    tracing::debug!(token = %placeholder, "ignoring points-file slot in box mode");
                }
                warn_extra(tail, 2);
                ModeArgs::Box(parse_box_coords(coords)?)
            },
        };

        Ok(Self::segment(
            model_type,
            checkpoint,
            SegmentRequest {
                image: PathBuf::from(image),
                cardinality,
                output_stem: (*stem).to_string(),
                format,
                mode: mode_args,
            },
        ))
    }
}

fn warn_extra(tail: &[&str], used: usize) {
    if tail.len() > used {
        tracing::warn!(extra = ?tail.get(used..), "ignoring trailing arguments");
    }
}

fn auto_tail(tuning: &AutoTuning) -> Vec<String> {
    let fields = [
        tuning.resolution.clone(),
        tuning.crop_layers.map(|v| v.to_string()),
        tuning.min_mask_area.map(|v| v.to_string()),
    ];
    let defaults = ["Medium", "0", "0"];

    let Some(last) = fields.iter().rposition(Option::is_some) else {
        return Vec::new();
    };
    fields
        .into_iter()
        .zip(defaults)
        .take(last + 1)
        .map(|(field, default)| field.unwrap_or_else(|| default.to_string()))
        .collect()
}

fn parse_auto_tail(tail: &[&str]) -> Result<AutoTuning> {
    let parse_count = |name: &str, token: &str| {
        token.trim().parse::<u32>().map_err(|e| {
            SegmentError::invalid_input(format!("{name} must be a non-negative integer, got '{token}': {e}"))
        })
    };

    warn_extra(tail, 3);
    let tuning = AutoTuning {
        resolution: tail.first().map(|s| (*s).to_string()),
        crop_layers: tail.get(1).map(|t| parse_count("cropLayers", t)).transpose()?,
        min_mask_area: tail.get(2).map(|t| parse_count("minArea", t)).transpose()?,
    };
    tuning.validate()?;
    Ok(tuning)
}

impl SegmentRequest {
    /// Materialize the prompt, reading the points file when the mode has one
    pub fn prompt(&self) -> Result<PromptSpec> {
        let prompt = match &self.mode {
            ModeArgs::Auto(tuning) => PromptSpec::Automatic(tuning.clone()),
            ModeArgs::Box(bbox) => PromptSpec::Box(*bbox),
            ModeArgs::Selection { points_file, bbox } => PromptSpec::Points {
                points: read_points_file(points_file)?,
                bbox: *bbox,
            },
            ModeArgs::BoxSelection { points_file, bbox } => PromptSpec::Points {
                points: read_points_file(points_file)?,
                bbox: Some(*bbox),
            },
        };
        prompt.validate()?;
        Ok(prompt)
    }
}

/// Parse `x1,y1,x2,y2`
pub fn parse_box_coords(text: &str) -> Result<BoxPrompt> {
    let values = text
        .split(',')
        .map(|v| {
            v.trim().parse::<f32>().map_err(|e| {
                SegmentError::invalid_input(format!("invalid box coordinate '{}' in '{}': {}", v.trim(), text, e))
            })
        })
        .collect::<Result<Vec<f32>>>()?;

    match values.as_slice() {
        [x1, y1, x2, y2] => Ok(BoxPrompt::new(*x1, *y1, *x2, *y2)),
        _ => Err(SegmentError::invalid_input(format!(
            "box coordinates need 4 comma-separated values, got {} in '{}'",
            values.len(),
            text
        ))),
    }
}

/// Format a box as `x1,y1,x2,y2`
#[must_use]
pub fn format_box_coords(bbox: &BoxPrompt) -> String {
    bbox.as_array()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a points file body: one `x y` integer pair per line
pub fn parse_points(text: &str) -> Result<Vec<Point>> {
    let mut points = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(x), Some(y), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(SegmentError::invalid_input(format!(
                "points line {} must contain two integers: '{}'",
                line_no + 1,
                line
            )));
        };
        let parse = |v: &str| {
            v.parse::<i64>().map_err(|e| {
                SegmentError::invalid_input(format!("points line {}: invalid integer '{}': {}", line_no + 1, v, e))
            })
        };
        points.push(Point::new(parse(x)?, parse(y)?));
    }
    Ok(points)
}

/// Read a points file
pub fn read_points_file<P: AsRef<Path>>(path: P) -> Result<Vec<Point>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| SegmentError::file_io_error("read points file", path, e))?;
    parse_points(&text)
}

/// Write a points file
pub fn write_points_file<P: AsRef<Path>>(path: P, points: &[Point]) -> Result<()> {
    let path = path.as_ref();
    let mut body = String::with_capacity(points.len() * 12);
    for point in points {
        let _ = writeln!(body, "{} {}", point.x, point.y);
    }
    std::fs::write(path, body).map_err(|e| SegmentError::file_io_error("write points file", path, e))
}

/// Path of mask `index` in the batch named by `stem`
#[must_use]
pub fn mask_file_path(stem: &str, index: usize) -> PathBuf {
    PathBuf::from(format!("{stem}{index}{MASK_EXTENSION}"))
}

/// Count batch files by probing indices from 0 until one is missing
#[must_use]
pub fn probe_batch_len(stem: &str) -> usize {
    (0..)
        .take_while(|index| mask_file_path(stem, *index).exists())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_self_test_invocation() {
        let cmd = SegmentCommand::parse(&args(&["auto", "/m/sam_vit_b_01ec64.onnx"])).unwrap();
        assert_eq!(cmd.model_type, ModelTypeRequest::Auto);
        assert!(cmd.request.is_none());
        assert_eq!(cmd.to_args(), args(&["auto", "/m/sam_vit_b_01ec64.onnx"]));
    }

    #[test]
    fn test_usage_errors() {
        assert!(matches!(
            SegmentCommand::parse(&args(&["auto"])),
            Err(SegmentError::Usage(_))
        ));
        assert!(matches!(
            SegmentCommand::parse(&args(&["vit_b", "/m/c.onnx", "/tmp/i.png", "Auto"])),
            Err(SegmentError::Usage(_))
        ));
        assert!(matches!(
            SegmentCommand::parse(&args(&[
                "vit_b", "/m/c.onnx", "/tmp/i.png", "Selection", "Single", "/tmp/m", "True"
            ])),
            Err(SegmentError::Usage(_))
        ));
    }

    #[test]
    fn test_auto_mode_tail() {
        let cmd = SegmentCommand::parse(&args(&[
            "sam2_hiera_large",
            "/m/sam2_hiera_large.pt",
            "/tmp/__seg__x.png",
            "Auto",
            "Multiple",
            "/tmp/__seg__mask__",
            "True",
            "High",
            "1",
            "100",
        ]))
        .unwrap();
        let request = cmd.request.as_ref().unwrap();
        assert_eq!(request.format, MaskFormat::Binary);
        let ModeArgs::Auto(tuning) = &request.mode else {
            panic!("expected auto mode");
        };
        assert_eq!(tuning.resolution.as_deref(), Some("High"));
        assert_eq!(tuning.crop_layers, Some(1));
        assert_eq!(tuning.min_mask_area, Some(100));
        assert_eq!(SegmentCommand::parse(&cmd.to_args()).unwrap(), cmd);
    }

    #[test]
    fn test_auto_mode_bad_numbers() {
        let result = SegmentCommand::parse(&args(&[
            "auto", "/m/sam2_hiera_tiny.pt", "/i.png", "Auto", "Multiple", "/m_", "True", "Low", "many",
        ]));
        assert!(matches!(result, Err(SegmentError::InvalidInput(_))));
    }

    #[test]
    fn test_auto_mode_rejects_deep_crop_pyramid() {
        for layers in ["5", "64", "4294967295"] {
            let result = SegmentCommand::parse(&args(&[
                "auto", "/m/sam_vit_b_01ec64.onnx", "/i.png", "Auto", "Multiple", "/m_", "True", "Low", layers, "0",
            ]));
            assert!(matches!(result, Err(SegmentError::InvalidInput(_))), "layers {layers}");
        }
    }

    #[test]
    fn test_auto_tail_fills_gaps() {
        let tuning = AutoTuning {
            resolution: None,
            crop_layers: None,
            min_mask_area: Some(25),
        };
        assert_eq!(auto_tail(&tuning), args(&["Medium", "0", "25"]));
        assert!(auto_tail(&AutoTuning::default()).is_empty());
    }

    #[test]
    fn test_binary_flag_defaults_to_binary() {
        let cmd = SegmentCommand::parse(&args(&["vit_b", "/m/c.onnx", "/i.png", "Auto", "Single", "/m_"])).unwrap();
        assert_eq!(cmd.request.unwrap().format, MaskFormat::Binary);

        let cmd = SegmentCommand::parse(&args(&["vit_b", "/m/c.onnx", "/i.png", "Auto", "Single", "/m_", "False"]))
            .unwrap();
        assert_eq!(cmd.request.unwrap().format, MaskFormat::Text);
    }

    #[test]
    fn test_box_mode_keeps_placeholder() {
        let cmd = SegmentCommand::parse(&args(&[
            "auto", "/m/sam_vit_h_4b8939.onnx", "/i.png", "Box", "Single", "/m_", "True", "sel_place_holder", "10,10,20,20",
        ]))
        .unwrap();
        let request = cmd.request.as_ref().unwrap();
        assert_eq!(request.mode, ModeArgs::Box(BoxPrompt::new(10.0, 10.0, 20.0, 20.0)));

        let wire = cmd.to_args();
        assert_eq!(wire.get(7).map(String::as_str), Some(SELECTION_PLACEHOLDER));
        assert_eq!(wire.get(8).map(String::as_str), Some("10,10,20,20"));
    }

    #[test]
    fn test_box_mode_without_coords_is_invalid_input() {
        let result = SegmentCommand::parse(&args(&[
            "auto", "/m/sam_vit_h_4b8939.onnx", "/i.png", "Box", "Single", "/m_", "True", "sel_place_holder",
        ]));
        assert!(matches!(result, Err(SegmentError::InvalidInput(_))));

        let result = SegmentCommand::parse(&args(&[
            "auto", "/m/sam_vit_h_4b8939.onnx", "/i.png", "Box-Selection", "Single", "/m_", "True", "/tmp/sel.txt",
        ]));
        assert!(matches!(result, Err(SegmentError::InvalidInput(_))));
    }

    #[test]
    fn test_selection_mode_optional_box() {
        let cmd = SegmentCommand::parse(&args(&[
            "vit_l", "/m/sam_vit_l_0b3195.onnx", "/i.png", "Selection", "Multiple", "/m_", "True", "/tmp/sel.txt",
        ]))
        .unwrap();
        assert_eq!(
            cmd.request.as_ref().unwrap().mode,
            ModeArgs::Selection {
                points_file: PathBuf::from("/tmp/sel.txt"),
                bbox: None
            }
        );

        let cmd = SegmentCommand::parse(&args(&[
            "vit_l", "/m/sam_vit_l_0b3195.onnx", "/i.png", "Selection", "Multiple", "/m_", "True", "/tmp/sel.txt",
            " 1.5, 2 ,30,40.25",
        ]))
        .unwrap();
        let ModeArgs::Selection { bbox, .. } = &cmd.request.as_ref().unwrap().mode else {
            panic!("expected selection mode");
        };
        assert_eq!(*bbox, Some(BoxPrompt::new(1.5, 2.0, 30.0, 40.25)));
        assert_eq!(SegmentCommand::parse(&cmd.to_args()).unwrap(), cmd);
    }

    #[test]
    fn test_unknown_mode() {
        let result = SegmentCommand::parse(&args(&["vit_b", "/m/c.onnx", "/i.png", "Lasso", "Single", "/m_"]));
        assert!(matches!(result, Err(SegmentError::UnknownMode(token)) if token == "Lasso"));
    }

    #[test]
    fn test_box_coords() {
        assert_eq!(
            parse_box_coords("10,10,20,20").unwrap(),
            BoxPrompt::new(10.0, 10.0, 20.0, 20.0)
        );
        assert!(parse_box_coords("1,2,3").is_err());
        assert!(parse_box_coords("1,2,3,x").is_err());
        assert_eq!(format_box_coords(&BoxPrompt::new(1.5, 2.0, 3.0, 4.0)), "1.5,2,3,4");
    }

    #[test]
    fn test_points_parsing() {
        let points = parse_points("10 20\n\n 30   40 \n").unwrap();
        assert_eq!(points, vec![Point::new(10, 20), Point::new(30, 40)]);
        assert!(parse_points("10\n").is_err());
        assert!(parse_points("10 20 30\n").is_err());
        assert!(parse_points("1.5 2\n").is_err());
        assert!(parse_points("").unwrap().is_empty());
    }

    #[test]
    fn test_points_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("__seg__sel__.txt");
        let points = vec![Point::new(1, 2), Point::new(300, 4)];
        write_points_file(&path, &points).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1 2\n300 4\n");
        assert_eq!(read_points_file(&path).unwrap(), points);
    }

    #[test]
    fn test_mask_paths_and_batch_len() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("__seg__mask__").display().to_string();
        assert_eq!(
            mask_file_path(&stem, 3),
            PathBuf::from(format!("{stem}3.seg"))
        );
        assert_eq!(probe_batch_len(&stem), 0);

        for index in [0, 1, 3] {
            std::fs::write(mask_file_path(&stem, index), b"x").unwrap();
        }
        // index 2 is missing, so discovery stops there
        assert_eq!(probe_batch_len(&stem), 2);
    }
}

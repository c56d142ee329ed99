//! ONNX Runtime backend for SAM1 and SAM2 encoder/decoder graphs
//!
//! Each model is a pair of sessions: an image encoder run once per image and a
//! prompt decoder run once per prompt. Sessions start on the CPU and are
//! recommitted on an accelerated execution provider by [`SamModel::place`].

use crate::error::{Result, SegmentError};
use crate::family::FamilyKind;
use crate::inference::{Device, ModelLoader, ModelSpec, Prediction, PromptInput, SamModel};
use image::{imageops::FilterType, RgbImage};
use log;
use ndarray::{Array1, Array2, Array3, Array4, ArrayD, ArrayView2, Axis, Ix3};
use ort::ep::{
    CoreML as CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
    CUDA as CUDAExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::{Tensor, Value};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Square input side of both encoder generations
const ENCODER_SIZE: usize = 1024;

/// Side of the decoder's low-resolution mask input/output
const LOW_RES_SIZE: usize = 256;

/// SAM1 normalisation on 0-255 pixel values
const SAM1_PIXEL_MEAN: [f32; 3] = [123.675, 116.28, 103.53];
const SAM1_PIXEL_STD: [f32; 3] = [58.395, 57.12, 57.375];

/// SAM2 normalisation on 0-1 pixel values
const SAM2_PIXEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const SAM2_PIXEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Box corners and padding use the SAM point-label convention
const LABEL_BOX_TOP_LEFT: f32 = 2.0;
const LABEL_BOX_BOTTOM_RIGHT: f32 = 3.0;
const LABEL_PADDING: f32 = -1.0;

fn provider_available(device: Device) -> bool {
    match device {
        Device::Cpu => true,
        Device::Cuda => {
            OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false)
        },
        Device::CoreMl => OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
            .unwrap_or(false),
    }
}

fn build_session(path: &Path, device: Device, intra_threads: usize) -> Result<Session> {
    let session_builder = Session::builder()
        .map_err(|e| SegmentError::model_load(format!("Failed to create session builder: {e}")))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| SegmentError::model_load(format!("Failed to set optimization level: {e}")))?;

    let session_builder = match device {
        Device::Cpu => session_builder,
        Device::Cuda => session_builder
            .with_execution_providers([CUDAExecutionProvider::default().build()])
            .map_err(|e| {
                SegmentError::model_load(format!("Failed to set CUDA execution provider: {e}"))
            })?,
        Device::CoreMl => session_builder
            .with_execution_providers([CoreMLExecutionProvider::default()
                .with_subgraphs(true)
                .build()])
            .map_err(|e| {
                SegmentError::model_load(format!("Failed to set CoreML execution provider: {e}"))
            })?,
    };

    session_builder
        .with_intra_threads(intra_threads)
        .map_err(|e| SegmentError::model_load(format!("Failed to set intra threads: {e}")))?
        .commit_from_file(path)
        .map_err(|e| {
            SegmentError::model_load_with_context(
                "create session from",
                path,
                &e.to_string(),
                &["check that the file is an ONNX graph", "re-export the model"],
            )
        })
}

fn tensor_error<E: std::fmt::Display>(name: &str) -> impl Fn(E) -> SegmentError + '_ {
    move |e| SegmentError::inference(format!("Failed to convert {name} tensor: {e}"))
}

/// Loader for encoder/decoder ONNX graph pairs
#[derive(Debug, Clone)]
pub struct OnnxModelLoader {
    intra_threads: usize,
}

impl OnnxModelLoader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            intra_threads: std::thread::available_parallelism()
                .map(std::num::NonZero::get)
                .unwrap_or(4),
        }
    }

    #[must_use]
    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        if threads > 0 {
            self.intra_threads = threads;
        }
        self
    }

    /// List execution providers with availability status and descriptions
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!("🔍 System Hardware Analysis:");
        log::debug!("  - Platform: {os}", os = std::env::consts::OS);
        log::debug!("  - Architecture: {arch}", arch = std::env::consts::ARCH);

        let providers = vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                provider_available(Device::Cuda),
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                provider_available(Device::CoreMl),
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ];

        for (name, available, _) in &providers {
            if *available {
                log::debug!("✅ {name} execution provider is available");
            } else {
                log::debug!("❌ {name} execution provider is not available");
            }
        }
        providers
    }
}

impl Default for OnnxModelLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load(&self, spec: &ModelSpec) -> Result<Box<dyn SamModel>> {
        let load_start = Instant::now();

        for (role, path) in [("encoder", &spec.encoder), ("decoder", &spec.decoder)] {
            if !path.is_file() {
                return Err(SegmentError::model_load_with_context(
                    &format!("open {role} graph"),
                    path,
                    "file not found",
                    &[
                        "export the image encoder and prompt decoder to ONNX",
                        "place the decoder graph next to the checkpoint",
                    ],
                ));
            }
        }

        log::info!(
            "Loading {:?} model '{}' (encoder: {}, decoder: {})",
            spec.family,
            spec.model_type,
            spec.encoder.display(),
            spec.decoder.display()
        );

        let encoder = build_session(&spec.encoder, Device::Cpu, self.intra_threads)?;
        let decoder = build_session(&spec.decoder, Device::Cpu, self.intra_threads)?;

        log::info!(
            "📊 Model loading complete: {:.0}ms",
            load_start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(Box::new(OnnxSamModel {
            family: spec.family,
            model_type: spec.model_type.clone(),
            encoder_path: spec.encoder.clone(),
            decoder_path: spec.decoder.clone(),
            encoder,
            decoder,
            device: Device::Cpu,
            intra_threads: self.intra_threads,
            encoded: None,
        }))
    }

    fn accelerator(&self) -> Option<Device> {
        [Device::Cuda, Device::CoreMl]
            .into_iter()
            .find(|device| provider_available(*device))
    }

    fn name(&self) -> &'static str {
        "onnx"
    }
}

/// Encoder output cached for the current image
struct EncodedImage {
    width: u32,
    height: u32,
    /// SAM1: `[image_embeddings]`; SAM2: `[image_embed, high_res_feats_0, high_res_feats_1]`
    features: Vec<ArrayD<f32>>,
}

/// Encoder/decoder session pair for one model
pub struct OnnxSamModel {
    family: FamilyKind,
    model_type: String,
    encoder_path: PathBuf,
    decoder_path: PathBuf,
    encoder: Session,
    decoder: Session,
    device: Device,
    intra_threads: usize,
    encoded: Option<EncodedImage>,
}

impl OnnxSamModel {
    /// Longest-side resize, normalisation on 0-255 and bottom-right zero padding
    fn sam1_input(image: &RgbImage) -> Array4<f32> {
        let (width, height) = image.dimensions();
        let scale = ENCODER_SIZE as f32 / width.max(height) as f32;
        let new_width = ((width as f32 * scale).round() as u32).clamp(1, ENCODER_SIZE as u32);
        let new_height = ((height as f32 * scale).round() as u32).clamp(1, ENCODER_SIZE as u32);
        let resized = image::imageops::resize(image, new_width, new_height, FilterType::Triangle);

        Array4::from_shape_fn((1, 3, ENCODER_SIZE, ENCODER_SIZE), |(_, c, y, x)| {
            resized
                .get_pixel_checked(x as u32, y as u32)
                .map_or(0.0, |p| (f32::from(p[c]) - SAM1_PIXEL_MEAN[c]) / SAM1_PIXEL_STD[c])
        })
    }

    /// Stretch resize to the square input and ImageNet normalisation on 0-1
    fn sam2_input(image: &RgbImage) -> Array4<f32> {
        let side = ENCODER_SIZE as u32;
        let resized = image::imageops::resize(image, side, side, FilterType::Triangle);

        Array4::from_shape_fn((1, 3, ENCODER_SIZE, ENCODER_SIZE), |(_, c, y, x)| {
            let value = f32::from(resized.get_pixel(x as u32, y as u32)[c]) / 255.0;
            (value - SAM2_PIXEL_MEAN[c]) / SAM2_PIXEL_STD[c]
        })
    }

    /// Map prompt pixels into encoder space and append box corners or padding
    fn prompt_tensors(&self, prompt: &PromptInput, encoded: &EncodedImage) -> (Array3<f32>, Array2<f32>) {
        let (width, height) = (encoded.width as f32, encoded.height as f32);
        let (scale_x, scale_y) = match self.family {
            FamilyKind::Sam1 => {
                let scale = ENCODER_SIZE as f32 / width.max(height);
                (scale, scale)
            },
            FamilyKind::Sam2 => (ENCODER_SIZE as f32 / width, ENCODER_SIZE as f32 / height),
        };

        let mut coords: Vec<[f32; 2]> = prompt.points.clone();
        let mut labels: Vec<f32> = prompt.labels.clone();
        if let Some(bbox) = prompt.bbox {
            coords.push([bbox.x1, bbox.y1]);
            coords.push([bbox.x2, bbox.y2]);
            labels.push(LABEL_BOX_TOP_LEFT);
            labels.push(LABEL_BOX_BOTTOM_RIGHT);
        } else {
            coords.push([0.0, 0.0]);
            labels.push(LABEL_PADDING);
        }

        let count = coords.len();
        let point_coords = Array3::from_shape_fn((1, count, 2), |(_, i, axis)| {
            coords.get(i).map_or(0.0, |p| {
                if axis == 0 {
                    p[0] * scale_x
                } else {
                    p[1] * scale_y
                }
            })
        });
        let point_labels = Array2::from_shape_fn((1, count), |(_, i)| {
            labels.get(i).copied().unwrap_or(LABEL_PADDING)
        });
        (point_coords, point_labels)
    }

    fn run_encoder(&mut self, image: &RgbImage) -> Result<Vec<ArrayD<f32>>> {
        let input = match self.family {
            FamilyKind::Sam1 => Self::sam1_input(image),
            FamilyKind::Sam2 => Self::sam2_input(image),
        };
        let input_value = Value::from_array(input).map_err(tensor_error("encoder input"))?;

        let outputs = self
            .encoder
            .run(ort::inputs![input_value])
            .map_err(|e| SegmentError::inference(format!("Image encoder failed: {e}")))?;

        let names: Vec<String> = match self.family {
            FamilyKind::Sam1 => outputs.keys().take(1).map(ToString::to_string).collect(),
            FamilyKind::Sam2 => ["image_embed", "high_res_feats_0", "high_res_feats_1"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        };

        names
            .iter()
            .map(|name| {
                outputs
                    .get(name.as_str())
                    .ok_or_else(|| {
                        SegmentError::inference(format!("Encoder output '{name}' not found"))
                    })?
                    .try_extract_array::<f32>()
                    .map(|view| view.to_owned())
                    .map_err(|e| {
                        SegmentError::inference(format!("Failed to extract encoder output '{name}': {e}"))
                    })
            })
            .collect()
    }
}

impl SamModel for OnnxSamModel {
    fn set_image(&mut self, image: &RgbImage) -> Result<()> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(SegmentError::invalid_input("cannot encode a zero-sized image"));
        }

        let encode_start = Instant::now();
        let features = self.run_encoder(image)?;
        log::debug!(
            "  ⚡ Image encoder: {:.2}ms for {}x{}",
            encode_start.elapsed().as_secs_f64() * 1000.0,
            width,
            height
        );

        self.encoded = Some(EncodedImage {
            width,
            height,
            features,
        });
        Ok(())
    }

    fn image_size(&self) -> Option<(u32, u32)> {
        self.encoded.as_ref().map(|e| (e.width, e.height))
    }

    fn predict(&mut self, prompt: &PromptInput, _multimask: bool) -> Result<Prediction> {
        let encoded = self
            .encoded
            .as_ref()
            .ok_or_else(|| SegmentError::inference("No image set before prediction"))?;

        let (point_coords, point_labels) = self.prompt_tensors(prompt, encoded);
        let mask_input = Array4::<f32>::zeros((1, 1, LOW_RES_SIZE, LOW_RES_SIZE));
        let has_mask_input = Array1::<f32>::zeros(1);
        let (rows, cols) = (encoded.height as usize, encoded.width as usize);

        let feature = |index: usize| -> Result<Tensor<f32>> {
            let array = encoded.features.get(index).cloned().ok_or_else(|| {
                SegmentError::inference(format!("Encoder feature {index} missing"))
            })?;
            Value::from_array(array).map_err(tensor_error("image embedding"))
        };

        let coords_value = Value::from_array(point_coords).map_err(tensor_error("point_coords"))?;
        let labels_value = Value::from_array(point_labels).map_err(tensor_error("point_labels"))?;
        let mask_value = Value::from_array(mask_input).map_err(tensor_error("mask_input"))?;
        let has_mask_value =
            Value::from_array(has_mask_input).map_err(tensor_error("has_mask_input"))?;

        let decode_start = Instant::now();
        let outputs = match self.family {
            FamilyKind::Sam1 => {
                let orig_size = Array1::from(vec![rows as f32, cols as f32]);
                let orig_value = Value::from_array(orig_size).map_err(tensor_error("orig_im_size"))?;
                self.decoder.run(ort::inputs![
                    "image_embeddings" => feature(0)?,
                    "point_coords" => coords_value,
                    "point_labels" => labels_value,
                    "mask_input" => mask_value,
                    "has_mask_input" => has_mask_value,
                    "orig_im_size" => orig_value,
                ])
            },
            FamilyKind::Sam2 => self.decoder.run(ort::inputs![
                "image_embed" => feature(0)?,
                "high_res_feats_0" => feature(1)?,
                "high_res_feats_1" => feature(2)?,
                "point_coords" => coords_value,
                "point_labels" => labels_value,
                "mask_input" => mask_value,
                "has_mask_input" => has_mask_value,
            ]),
        }
        .map_err(|e| SegmentError::inference(format!("Prompt decoder failed: {e}")))?;

        let masks = outputs
            .get("masks")
            .ok_or_else(|| SegmentError::inference("Decoder output 'masks' not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| SegmentError::inference(format!("Failed to extract masks: {e}")))?
            .index_axis(Axis(0), 0)
            .to_owned()
            .into_dimensionality::<Ix3>()
            .map_err(|e| SegmentError::inference(format!("Unexpected mask rank: {e}")))?;

        let iou_scores: Vec<f32> = outputs
            .get("iou_predictions")
            .ok_or_else(|| SegmentError::inference("Decoder output 'iou_predictions' not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| SegmentError::inference(format!("Failed to extract IoU scores: {e}")))?
            .iter()
            .copied()
            .collect();

        log::debug!(
            "  ⚡ Prompt decoder: {:.2}ms, {} candidate(s)",
            decode_start.elapsed().as_secs_f64() * 1000.0,
            iou_scores.len()
        );

        let logits = if masks.dim().1 == rows && masks.dim().2 == cols {
            masks
        } else {
            upsample_logits(&masks, rows, cols)
        };
        Prediction::new(logits, iou_scores)
    }

    fn place(&mut self, device: Device) -> Result<Device> {
        if device == self.device {
            return Ok(device);
        }

        let target = if provider_available(device) {
            device
        } else {
            log::warn!("⚠️ {device} execution provider requested but not available, staying on CPU");
            Device::Cpu
        };
        if target == self.device {
            return Ok(target);
        }

        self.encoder = build_session(&self.encoder_path, target, self.intra_threads)?;
        self.decoder = build_session(&self.decoder_path, target, self.intra_threads)?;
        self.device = target;
        log::info!("🎯 Active execution provider: {target}");
        Ok(target)
    }

    fn device(&self) -> Device {
        self.device
    }

    fn describe(&self) -> String {
        format!("{:?}/{} on {} (onnx)", self.family, self.model_type, self.device)
    }
}

/// Bilinear resize of every mask plane to `rows x cols`
fn upsample_logits(masks: &Array3<f32>, rows: usize, cols: usize) -> Array3<f32> {
    let mut out = Array3::<f32>::zeros((masks.dim().0, rows, cols));
    for (src, mut dst) in masks.outer_iter().zip(out.outer_iter_mut()) {
        dst.assign(&resize_bilinear(src, rows, cols));
    }
    out
}

/// Half-pixel-centre bilinear resize
fn resize_bilinear(src: ArrayView2<'_, f32>, rows: usize, cols: usize) -> Array2<f32> {
    let (src_rows, src_cols) = src.dim();
    if src_rows == 0 || src_cols == 0 {
        return Array2::zeros((rows, cols));
    }
    let scale_y = src_rows as f32 / rows as f32;
    let scale_x = src_cols as f32 / cols as f32;
    let at = |y: usize, x: usize| src.get((y, x)).copied().unwrap_or(0.0);

    Array2::from_shape_fn((rows, cols), |(y, x)| {
        let fy = ((y as f32 + 0.5) * scale_y - 0.5).clamp(0.0, (src_rows - 1) as f32);
        let fx = ((x as f32 + 0.5) * scale_x - 0.5).clamp(0.0, (src_cols - 1) as f32);
        let (y0, x0) = (fy.floor() as usize, fx.floor() as usize);
        let (y1, x1) = ((y0 + 1).min(src_rows - 1), (x0 + 1).min(src_cols - 1));
        let (wy, wx) = (fy - y0 as f32, fx - x0 as f32);

        let top = at(y0, x0) * (1.0 - wx) + at(y0, x1) * wx;
        let bottom = at(y1, x0) * (1.0 - wx) + at(y1, x1) * wx;
        top * (1.0 - wy) + bottom * wy
    })
}

//! Mock model backend for testing without model files
//!
//! [`MockSamModel`] answers prompts with deterministic masks: the prompt box
//! filled in, plus a square neighbourhood around every positive point.
//! Multimask calls return three nested candidates with fixed IoU scores.

use crate::error::{Result, SegmentError};
use crate::inference::{Device, ModelLoader, ModelSpec, Prediction, PromptInput, SamModel};
use image::RgbImage;
use ndarray::Array3;
use std::sync::{Arc, Mutex};

/// Logit magnitude well clear of any stability offset
const MOCK_LOGIT: f32 = 8.0;

/// Half side of the square around each prompt point, per candidate
const POINT_RADII: [i64; 3] = [2, 3, 4];

/// Predicted IoU per candidate
const CANDIDATE_SCORES: [f32; 3] = [0.97, 0.93, 0.9];

/// Shared call log so tests can observe a model after it moved into a family
pub type CallHistory = Arc<Mutex<Vec<String>>>;

fn record(history: &CallHistory, call: &str) {
    if let Ok(mut calls) = history.lock() {
        calls.push(call.to_string());
    }
}

/// Loader producing [`MockSamModel`] instances
#[derive(Debug, Clone, Default)]
pub struct MockModelLoader {
    call_history: CallHistory,
    /// Device reported by `accelerator()`
    accelerator: Option<Device>,
    /// Whether to simulate load failure
    should_fail_load: bool,
    /// Whether loaded models fail on predict
    should_fail_predict: bool,
    /// Whether loaded models fail when placed on an accelerator
    should_fail_place: bool,
}

impl MockModelLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader whose `load` always fails
    #[must_use]
    pub fn new_failing_load() -> Self {
        Self {
            should_fail_load: true,
            ..Self::default()
        }
    }

    /// Loader whose models fail on `predict`
    #[must_use]
    pub fn new_failing_predict() -> Self {
        Self {
            should_fail_predict: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_accelerator(mut self, device: Device) -> Self {
        self.accelerator = Some(device);
        self
    }

    #[must_use]
    pub fn with_failing_placement(mut self) -> Self {
        self.should_fail_place = true;
        self
    }

    /// Calls recorded by the loader and every model it produced
    pub fn get_call_history(&self) -> Vec<String> {
        self.call_history
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

impl ModelLoader for MockModelLoader {
    fn load(&self, spec: &ModelSpec) -> Result<Box<dyn SamModel>> {
        record(&self.call_history, &format!("load:{}", spec.model_type));

        if self.should_fail_load {
            return Err(SegmentError::model_load(format!(
                "Mock loader failed to load '{}'",
                spec.encoder.display()
            )));
        }

        Ok(Box::new(MockSamModel {
            label: format!("{:?}/{}", spec.family, spec.model_type),
            call_history: Arc::clone(&self.call_history),
            image_size: None,
            device: Device::Cpu,
            should_fail_predict: self.should_fail_predict,
            should_fail_place: self.should_fail_place,
        }))
    }

    fn accelerator(&self) -> Option<Device> {
        self.accelerator
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Deterministic stand-in for a loaded model
#[derive(Debug, Clone)]
pub struct MockSamModel {
    label: String,
    call_history: CallHistory,
    image_size: Option<(u32, u32)>,
    device: Device,
    should_fail_predict: bool,
    should_fail_place: bool,
}

impl MockSamModel {
    fn candidate(&self, prompt: &PromptInput, radius: i64) -> Result<Array3<f32>> {
        let (width, height) = self
            .image_size
            .ok_or_else(|| SegmentError::inference("No image set before prediction"))?;

        let inside = |x: i64, y: i64| {
            let in_box = prompt.bbox.is_some_and(|b| {
                let (fx, fy) = (x as f32, y as f32);
                fx >= b.x1 && fx <= b.x2 && fy >= b.y1 && fy <= b.y2
            });
            let near_point = prompt.points.iter().zip(&prompt.labels).any(|(p, label)| {
                *label > 0.0
                    && (x - p[0].round() as i64).abs() <= radius
                    && (y - p[1].round() as i64).abs() <= radius
            });
            in_box || near_point
        };

        Ok(Array3::from_shape_fn(
            (1, height as usize, width as usize),
            |(_, y, x)| {
                if inside(x as i64, y as i64) {
                    MOCK_LOGIT
                } else {
                    -MOCK_LOGIT
                }
            },
        ))
    }
}

impl SamModel for MockSamModel {
    fn set_image(&mut self, image: &RgbImage) -> Result<()> {
        record(&self.call_history, "set_image");
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(SegmentError::invalid_input("cannot encode a zero-sized image"));
        }
        self.image_size = Some((width, height));
        Ok(())
    }

    fn image_size(&self) -> Option<(u32, u32)> {
        self.image_size
    }

    fn predict(&mut self, prompt: &PromptInput, multimask: bool) -> Result<Prediction> {
        record(
            &self.call_history,
            if multimask { "predict:multi" } else { "predict:single" },
        );

        if self.should_fail_predict {
            return Err(SegmentError::inference("Mock prediction failed"));
        }

        let count = if multimask { POINT_RADII.len() } else { 1 };
        let planes = POINT_RADII
            .iter()
            .take(count)
            .map(|radius| self.candidate(prompt, *radius))
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<_> = planes.iter().map(|p| p.view()).collect();
        let logits = ndarray::concatenate(ndarray::Axis(0), &views)
            .map_err(|e| SegmentError::inference(format!("mock stacking failed: {e}")))?;

        Prediction::new(logits, CANDIDATE_SCORES.iter().take(count).copied().collect())
    }

    fn place(&mut self, device: Device) -> Result<Device> {
        record(&self.call_history, &format!("place:{device}"));
        if self.should_fail_place && device.is_accelerated() {
            return Err(SegmentError::model_load(format!("Mock placement on {device} failed")));
        }
        self.device = device;
        Ok(device)
    }

    fn device(&self) -> Device {
        self.device
    }

    fn describe(&self) -> String {
        format!("{} on {} (mock)", self.label, self.device)
    }
}

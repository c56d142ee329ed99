//! Automatic (prompt-free) mask generation on top of a [`SamModel`]
//!
//! The image is covered with a regular point grid, every point is decoded as
//! its own prompt, and the resulting candidates are filtered and deduplicated:
//!
//! 1. crop boxes: the full image plus `2^l x 2^l` overlapping crops per layer
//! 2. per crop, an `n x n` grid decoded with multimask output
//! 3. predicted-IoU and stability-score thresholds
//! 4. box NMS inside each crop, then across crops
//! 5. optional small-region cleanup
//!
//! Masks come back at full image size, best predicted IoU first.

use crate::error::Result;
use crate::inference::{PromptInput, SamModel, MASK_THRESHOLD};
use crate::types::{AutoTuning, Mask, MaskCardinality, MAX_CROP_LAYERS};
use image::RgbImage;
use ndarray::{s, Array2, ArrayView2};
use std::collections::VecDeque;

/// Masks closer than this to a crop edge (but not the image edge) are dropped
const CROP_EDGE_TOLERANCE: f32 = 20.0;

/// `[x0, y0, x1, y1]` in pixels; mask bounds are inclusive, crop boxes exclusive
pub type PixelBox = [usize; 4];

/// Tuning for [`AutoMaskGenerator`]
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorParams {
    pub points_per_side: usize,
    /// Points decoded between progress reports
    pub points_per_batch: usize,
    pub pred_iou_thresh: f32,
    pub stability_score_thresh: f32,
    pub stability_score_offset: f32,
    pub box_nms_thresh: f32,
    pub crop_n_layers: u32,
    pub crop_overlap_ratio: f32,
    pub crop_nms_thresh: f32,
    /// Holes and islands smaller than this are removed; 0 disables cleanup
    pub min_mask_region_area: usize,
}

impl Default for GeneratorParams {
    fn default() -> Self {
        Self {
            points_per_side: 32,
            points_per_batch: 64,
            pred_iou_thresh: 0.88,
            stability_score_thresh: 0.95,
            stability_score_offset: 1.0,
            box_nms_thresh: 0.7,
            crop_n_layers: 0,
            crop_overlap_ratio: 512.0 / 1500.0,
            crop_nms_thresh: 0.7,
            min_mask_region_area: 0,
        }
    }
}

impl GeneratorParams {
    /// First-generation defaults
    #[must_use]
    pub fn sam1() -> Self {
        Self::default()
    }

    /// Second-generation defaults
    #[must_use]
    pub fn sam2() -> Self {
        Self {
            pred_iou_thresh: 0.8,
            ..Self::default()
        }
    }

    /// Apply user tuning; absent or unrecognised knobs keep the current values
    #[must_use]
    pub fn with_tuning(mut self, tuning: &AutoTuning) -> Self {
        match (tuning.resolution.as_deref(), tuning.resolution_tier()) {
            (_, Some(tier)) => self.points_per_side = tier.points_per_side(),
            (Some(token), None) => {
                tracing::warn!(resolution = token, "unrecognised resolution tier, keeping default");
            },
            (None, None) => {},
        }
        if let Some(layers) = tuning.crop_layers {
            self = self.with_crop_n_layers(layers);
        }
        if let Some(area) = tuning.min_mask_area {
            self.min_mask_region_area = area as usize;
        }
        self
    }

    #[must_use]
    pub fn with_points_per_side(mut self, points: usize) -> Self {
        self.points_per_side = points.max(1);
        self
    }

    #[must_use]
    pub fn with_pred_iou_thresh(mut self, thresh: f32) -> Self {
        self.pred_iou_thresh = thresh;
        self
    }

    /// Crop pyramid depth, capped at [`MAX_CROP_LAYERS`]
    #[must_use]
    pub fn with_crop_n_layers(mut self, layers: u32) -> Self {
        if layers > MAX_CROP_LAYERS {
            tracing::warn!(layers, max = MAX_CROP_LAYERS, "crop layers capped");
        }
        self.crop_n_layers = layers.min(MAX_CROP_LAYERS);
        self
    }

    #[must_use]
    pub fn with_min_mask_region_area(mut self, area: usize) -> Self {
        self.min_mask_region_area = area;
        self
    }
}

/// One automatically generated mask with its quality metrics
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedMask {
    pub mask: Mask,
    pub predicted_iou: f32,
    pub stability_score: f32,
    pub bbox: PixelBox,
    pub crop_box: PixelBox,
}

#[derive(Debug, Clone)]
struct Candidate {
    /// Full image size
    mask: Array2<bool>,
    predicted_iou: f32,
    stability_score: f32,
    bbox: PixelBox,
    crop_box: PixelBox,
}

/// Point-grid mask generator
#[derive(Debug, Clone, Default)]
pub struct AutoMaskGenerator {
    params: GeneratorParams,
}

impl AutoMaskGenerator {
    #[must_use]
    pub fn new(params: GeneratorParams) -> Self {
        Self { params }
    }

    #[must_use]
    pub fn params(&self) -> &GeneratorParams {
        &self.params
    }

    /// Generate every mask the model finds in `image`
    ///
    /// # Errors
    /// - Encoder or decoder failures from the model
    pub fn generate(&self, model: &mut dyn SamModel, image: &RgbImage) -> Result<Vec<GeneratedMask>> {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let crops = crop_boxes(width, height, self.params.crop_n_layers, self.params.crop_overlap_ratio);
        tracing::debug!(
            crops = crops.len(),
            points_per_side = self.params.points_per_side,
            "starting automatic mask generation"
        );

        let mut candidates = Vec::new();
        for (crop_box, layer) in &crops {
            let mut found = self.process_crop(model, image, *crop_box, *layer)?;
            tracing::debug!(crop = ?crop_box, layer, kept = found.len(), "crop processed");
            candidates.append(&mut found);
        }

        if crops.len() > 1 {
            // prefer masks from smaller crops
            let scores: Vec<f32> = candidates
                .iter()
                .map(|c| 1.0 / box_area(&c.crop_box).max(1.0))
                .collect();
            let keep = nms(&boxes_of(&candidates), &scores, self.params.crop_nms_thresh);
            candidates = keep_indices(candidates, &keep);
        }

        if self.params.min_mask_region_area > 0 {
            candidates = self.remove_small_regions(candidates);
        }

        candidates.sort_by(|a, b| b.predicted_iou.total_cmp(&a.predicted_iou));
        candidates
            .into_iter()
            .map(|c| {
                Ok(GeneratedMask {
                    mask: Mask::new(c.mask)?,
                    predicted_iou: c.predicted_iou,
                    stability_score: c.stability_score,
                    bbox: c.bbox,
                    crop_box: c.crop_box,
                })
            })
            .collect()
    }

    fn process_crop(
        &self,
        model: &mut dyn SamModel,
        image: &RgbImage,
        crop_box: PixelBox,
        layer: u32,
    ) -> Result<Vec<Candidate>> {
        let [x0, y0, x1, y1] = crop_box;
        let (crop_w, crop_h) = (x1 - x0, y1 - y0);
        let crop = image::imageops::crop_imm(image, x0 as u32, y0 as u32, crop_w as u32, crop_h as u32).to_image();
        model.set_image(&crop)?;

        let per_side = self.params.points_per_side.checked_shr(layer).unwrap_or(0).max(1);
        let points = point_grid(per_side, crop_w, crop_h);
        let full_box = [0, 0, image.width() as usize, image.height() as usize];

        let mut found = Vec::new();
        for (batch_index, batch) in points.chunks(self.params.points_per_batch.max(1)).enumerate() {
            for [px, py] in batch {
                let prediction = model.predict(&PromptInput::single_point(*px, *py), true)?;
                for index in prediction.selected_indices(MaskCardinality::Multiple) {
                    let Some(predicted_iou) = prediction.iou_scores.get(index).copied() else {
                        continue;
                    };
                    if predicted_iou < self.params.pred_iou_thresh {
                        continue;
                    }
                    let logits = prediction.logits_at(index);
                    let stability_score = stability_score(logits, self.params.stability_score_offset);
                    if stability_score < self.params.stability_score_thresh {
                        continue;
                    }
                    let crop_mask = logits.mapv(|v| v > MASK_THRESHOLD);
                    let Some(local_box) = mask_box(&crop_mask) else {
                        continue;
                    };
                    let bbox = [local_box[0] + x0, local_box[1] + y0, local_box[2] + x0, local_box[3] + y0];
                    if crop_box != full_box && near_crop_edge(&bbox, &crop_box, &full_box) {
                        continue;
                    }
                    found.push(Candidate {
                        mask: uncrop_mask(&crop_mask, crop_box, full_box[2], full_box[3]),
                        predicted_iou,
                        stability_score,
                        bbox,
                        crop_box,
                    });
                }
            }
            tracing::trace!(batch = batch_index, candidates = found.len(), "point batch decoded");
        }

        let scores: Vec<f32> = found.iter().map(|c| c.predicted_iou).collect();
        let keep = nms(&boxes_of(&found), &scores, self.params.box_nms_thresh);
        Ok(keep_indices(found, &keep))
    }

    fn remove_small_regions(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let area = self.params.min_mask_region_area;
        let mut cleaned = Vec::with_capacity(candidates.len());
        let mut scores = Vec::with_capacity(candidates.len());

        for mut candidate in candidates {
            let (filled, holes_changed) = remove_components(&candidate.mask, area, false);
            let (mask, islands_changed) = remove_components(&filled, area, true);
            let Some(bbox) = mask_box(&mask) else {
                continue;
            };
            // untouched masks win ties against cleaned ones
            scores.push(if holes_changed || islands_changed { 0.0 } else { 1.0 });
            candidate.mask = mask;
            candidate.bbox = bbox;
            cleaned.push(candidate);
        }

        let keep = nms(&boxes_of(&cleaned), &scores, self.params.box_nms_thresh);
        keep_indices(cleaned, &keep)
    }
}

/// Full image plus overlapping crops per layer, each tagged with its layer
#[must_use]
pub fn crop_boxes(width: usize, height: usize, layers: u32, overlap_ratio: f32) -> Vec<(PixelBox, u32)> {
    let mut boxes = vec![([0, 0, width, height], 0)];
    let short_side = width.min(height) as f32;

    for layer in 1..=layers.min(MAX_CROP_LAYERS) {
        let Some(per_side) = 1_usize.checked_shl(layer) else {
            break;
        };
        let overlap = (overlap_ratio * short_side * (2.0 / per_side as f32)) as usize;
        let crop_w = (overlap * (per_side - 1) + width).div_ceil(per_side);
        let crop_h = (overlap * (per_side - 1) + height).div_ceil(per_side);

        for row in 0..per_side {
            for col in 0..per_side {
                let x0 = (crop_w.saturating_sub(overlap)) * col;
                let y0 = (crop_h.saturating_sub(overlap)) * row;
                if x0 >= width || y0 >= height {
                    continue;
                }
                boxes.push(([x0, y0, (x0 + crop_w).min(width), (y0 + crop_h).min(height)], layer));
            }
        }
    }
    boxes
}

/// `n x n` cell-centred points scaled to a `width x height` region
#[must_use]
pub fn point_grid(per_side: usize, width: usize, height: usize) -> Vec<[f32; 2]> {
    let step = 1.0 / per_side as f32;
    let offset = step / 2.0;
    let mut points = Vec::with_capacity(per_side * per_side);
    for row in 0..per_side {
        for col in 0..per_side {
            points.push([
                (offset + col as f32 * step) * width as f32,
                (offset + row as f32 * step) * height as f32,
            ]);
        }
    }
    points
}

/// IoU between the masks thresholded at `+offset` and `-offset`
#[must_use]
pub fn stability_score(logits: ArrayView2<'_, f32>, offset: f32) -> f32 {
    let high = MASK_THRESHOLD + offset;
    let low = MASK_THRESHOLD - offset;
    let intersection = logits.iter().filter(|v| **v > high).count();
    let union = logits.iter().filter(|v| **v > low).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Tight inclusive bounding box of the foreground, `None` when empty
#[must_use]
pub fn mask_box(mask: &Array2<bool>) -> Option<PixelBox> {
    let mut bounds: Option<PixelBox> = None;
    for ((y, x), value) in mask.indexed_iter() {
        if !*value {
            continue;
        }
        bounds = Some(match bounds {
            None => [x, y, x, y],
            Some([x0, y0, x1, y1]) => [x0.min(x), y0.min(y), x1.max(x), y1.max(y)],
        });
    }
    bounds
}

fn box_area(b: &PixelBox) -> f32 {
    (b[2].saturating_sub(b[0]) * b[3].saturating_sub(b[1])) as f32
}

fn box_iou(a: &PixelBox, b: &PixelBox) -> f32 {
    let ix = a[2].min(b[2]).saturating_sub(a[0].max(b[0]));
    let iy = a[3].min(b[3]).saturating_sub(a[1].max(b[1]));
    let intersection = (ix * iy) as f32;
    let union = box_area(a) + box_area(b) - intersection;
    if union <= 0.0 {
        // degenerate boxes only overlap when identical
        if a == b { 1.0 } else { 0.0 }
    } else {
        intersection / union
    }
}

/// Greedy non-maximum suppression; returns kept indices, best score first
#[must_use]
pub fn nms(boxes: &[PixelBox], scores: &[f32], iou_thresh: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..boxes.len().min(scores.len())).collect();
    order.sort_by(|a, b| scores[*b].total_cmp(&scores[*a]));

    let mut keep: Vec<usize> = Vec::new();
    for index in order {
        let candidate = &boxes[index];
        if keep.iter().all(|kept| box_iou(&boxes[*kept], candidate) <= iou_thresh) {
            keep.push(index);
        }
    }
    keep
}

fn boxes_of(candidates: &[Candidate]) -> Vec<PixelBox> {
    candidates.iter().map(|c| c.bbox).collect()
}

fn keep_indices(candidates: Vec<Candidate>, keep: &[usize]) -> Vec<Candidate> {
    let mut slots: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    keep.iter()
        .filter_map(|index| slots.get_mut(*index).and_then(Option::take))
        .collect()
}

fn near_crop_edge(bbox: &PixelBox, crop_box: &PixelBox, full_box: &PixelBox) -> bool {
    bbox.iter().zip(crop_box).zip(full_box).any(|((b, c), f)| {
        let near_crop = (*b as f32 - *c as f32).abs() <= CROP_EDGE_TOLERANCE;
        let near_image = (*b as f32 - *f as f32).abs() <= CROP_EDGE_TOLERANCE;
        near_crop && !near_image
    })
}

fn uncrop_mask(mask: &Array2<bool>, crop_box: PixelBox, width: usize, height: usize) -> Array2<bool> {
    let [x0, y0, x1, y1] = crop_box;
    if x0 == 0 && y0 == 0 && x1 == width && y1 == height {
        return mask.clone();
    }
    let mut full = Array2::from_elem((height, width), false);
    full.slice_mut(s![y0..y1, x0..x1]).assign(mask);
    full
}

/// Remove 8-connected components of `target` value smaller than `area`
///
/// With `target == true` small islands are erased; with `false` small holes
/// are filled. Returns the new mask and whether anything changed.
fn remove_components(mask: &Array2<bool>, area: usize, target: bool) -> (Array2<bool>, bool) {
    let (rows, cols) = mask.dim();
    let mut out = mask.clone();
    let mut seen = Array2::from_elem((rows, cols), false);
    let mut changed = false;

    for start in 0..rows * cols {
        let (sy, sx) = (start / cols, start % cols);
        if seen[[sy, sx]] || mask[[sy, sx]] != target {
            continue;
        }

        let mut component = vec![(sy, sx)];
        let mut queue = VecDeque::from([(sy, sx)]);
        seen[[sy, sx]] = true;
        while let Some((y, x)) = queue.pop_front() {
            for dy in -1_isize..=1 {
                for dx in -1_isize..=1 {
                    let (ny, nx) = (y as isize + dy, x as isize + dx);
                    if ny < 0 || nx < 0 || ny >= rows as isize || nx >= cols as isize {
                        continue;
                    }
                    let (ny, nx) = (ny as usize, nx as usize);
                    if !seen[[ny, nx]] && mask[[ny, nx]] == target {
                        seen[[ny, nx]] = true;
                        component.push((ny, nx));
                        queue.push_back((ny, nx));
                    }
                }
            }
        }

        if component.len() < area {
            for (y, x) in component {
                out[[y, x]] = !target;
            }
            changed = true;
        }
    }
    (out, changed)
}

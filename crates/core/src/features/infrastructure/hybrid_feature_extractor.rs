//! Hybrid feature extractor.
//!
//! Concatenates the recognition embedding with traditional descriptors of
//! the grey crop: a global intensity histogram, 2x2 regional histograms, a
//! gradient-orientation edge histogram and a rotation-invariant uniform LBP
//! histogram. Each block is L2-normalized and weighted before the whole
//! vector is normalized again, so the embedding dominates and the
//! descriptors break near-ties between similar embeddings.
use crate::detection::domain::detection::Detection;
use crate::features::domain::feature_extractor::{ExtractionError, FeatureExtractor};
use crate::shared::frame::Frame;
use crate::shared::vector;

const GLOBAL_HIST_BINS: usize = 32;
const REGIONAL_HIST_BINS: usize = 16;
const EDGE_HIST_BINS: usize = 32;
/// P + 2 bins for rotation-invariant uniform LBP with P = 8.
const LBP_BINS: usize = 10;
const LBP_POINTS: usize = 8;

/// Sobel magnitude below which a pixel is not treated as an edge.
const EDGE_MAGNITUDE_THRESHOLD: f64 = 100.0;

const EMBEDDING_WEIGHT: f32 = 1.0;
const GLOBAL_WEIGHT: f32 = 0.2;
const REGIONAL_WEIGHT: f32 = 0.2;
const EDGE_WEIGHT: f32 = 0.15;
const LBP_WEIGHT: f32 = 0.15;

#[derive(Default)]
pub struct HybridFeatureExtractor;

impl HybridFeatureExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl FeatureExtractor for HybridFeatureExtractor {
    fn extract(&self, crop: &Frame, detection: &Detection) -> Result<Vec<f32>, ExtractionError> {
        if crop.width() == 0 || crop.height() == 0 || crop.data().is_empty() {
            return Err(ExtractionError::EmptyCrop);
        }
        if detection.raw_embedding.is_empty() {
            return Err(ExtractionError::Failed("detection has no embedding".into()));
        }

        let gray = crop.to_grayscale();
        let (w, h) = (crop.width() as usize, crop.height() as usize);

        let mut hybrid = Vec::with_capacity(
            detection.raw_embedding.len()
                + GLOBAL_HIST_BINS
                + 4 * REGIONAL_HIST_BINS
                + EDGE_HIST_BINS
                + LBP_BINS,
        );
        push_block(&mut hybrid, detection.raw_embedding.clone(), EMBEDDING_WEIGHT);
        let global = intensity_histogram(gray.iter().copied(), GLOBAL_HIST_BINS);
        push_block(&mut hybrid, global, GLOBAL_WEIGHT);
        push_block(&mut hybrid, regional_histograms(&gray, w, h), REGIONAL_WEIGHT);
        push_block(&mut hybrid, edge_histogram(&gray, w, h), EDGE_WEIGHT);
        push_block(&mut hybrid, lbp_histogram(&gray, w, h), LBP_WEIGHT);

        if !vector::is_finite(&hybrid) {
            return Err(ExtractionError::NonFinite);
        }
        Ok(vector::normalized(hybrid))
    }
}

fn push_block(out: &mut Vec<f32>, block: Vec<f32>, weight: f32) {
    out.extend(vector::normalized(block).into_iter().map(|x| x * weight));
}

/// Histogram of 8-bit intensities, normalized to sum 1.
fn intensity_histogram(pixels: impl Iterator<Item = u8>, bins: usize) -> Vec<f32> {
    let mut hist = vec![0.0f32; bins];
    let mut count = 0usize;
    for p in pixels {
        hist[p as usize * bins / 256] += 1.0;
        count += 1;
    }
    if count > 0 {
        for v in &mut hist {
            *v /= count as f32;
        }
    }
    hist
}

/// One histogram per quadrant, concatenated row-major.
fn regional_histograms(gray: &[u8], w: usize, h: usize) -> Vec<f32> {
    let (mid_x, mid_y) = (w / 2, h / 2);
    let mut out = Vec::with_capacity(4 * REGIONAL_HIST_BINS);
    for (y0, y1) in [(0, mid_y), (mid_y, h)] {
        for (x0, x1) in [(0, mid_x), (mid_x, w)] {
            let pixels = (y0..y1).flat_map(|y| (x0..x1).map(move |x| gray[y * w + x]));
            out.extend(intensity_histogram(pixels, REGIONAL_HIST_BINS));
        }
    }
    out
}

/// Orientation histogram over `[0, pi)` of pixels with a strong Sobel
/// gradient, normalized to sum 1.
fn edge_histogram(gray: &[u8], w: usize, h: usize) -> Vec<f32> {
    let mut hist = vec![0.0f32; EDGE_HIST_BINS];
    if w < 3 || h < 3 {
        return hist;
    }
    let px = |x: usize, y: usize| gray[y * w + x] as f64;
    let mut count = 0usize;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let gx = px(x + 1, y - 1) + 2.0 * px(x + 1, y) + px(x + 1, y + 1)
                - px(x - 1, y - 1)
                - 2.0 * px(x - 1, y)
                - px(x - 1, y + 1);
            let gy = px(x - 1, y + 1) + 2.0 * px(x, y + 1) + px(x + 1, y + 1)
                - px(x - 1, y - 1)
                - 2.0 * px(x, y - 1)
                - px(x + 1, y - 1);
            if (gx * gx + gy * gy).sqrt() < EDGE_MAGNITUDE_THRESHOLD {
                continue;
            }
            let angle = gy.atan2(gx).rem_euclid(std::f64::consts::PI);
            let bin = ((angle / std::f64::consts::PI) * EDGE_HIST_BINS as f64) as usize;
            hist[bin.min(EDGE_HIST_BINS - 1)] += 1.0;
            count += 1;
        }
    }
    if count > 0 {
        for v in &mut hist {
            *v /= count as f32;
        }
    }
    hist
}

/// Rotation-invariant uniform LBP(8, 1).
///
/// Uniform patterns (at most two 0/1 transitions around the circle) map to
/// their count of set bits, 0..=8; everything else shares bin 9.
fn lbp_histogram(gray: &[u8], w: usize, h: usize) -> Vec<f32> {
    const OFFSETS: [(isize, isize); LBP_POINTS] = [
        (1, 0),
        (1, -1),
        (0, -1),
        (-1, -1),
        (-1, 0),
        (-1, 1),
        (0, 1),
        (1, 1),
    ];

    let mut hist = vec![0.0f32; LBP_BINS];
    if w < 3 || h < 3 {
        return hist;
    }
    let mut count = 0usize;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let center = gray[y * w + x];
            let mut bits = [false; LBP_POINTS];
            for (bit, (dx, dy)) in bits.iter_mut().zip(OFFSETS) {
                let nx = (x as isize + dx) as usize;
                let ny = (y as isize + dy) as usize;
                *bit = gray[ny * w + nx] >= center;
            }
            let transitions = (0..LBP_POINTS)
                .filter(|&i| bits[i] != bits[(i + 1) % LBP_POINTS])
                .count();
            let bin = if transitions <= 2 {
                bits.iter().filter(|b| **b).count()
            } else {
                LBP_POINTS + 1
            };
            hist[bin] += 1.0;
            count += 1;
        }
    }
    if count > 0 {
        for v in &mut hist {
            *v /= count as f32;
        }
    }
    hist
}

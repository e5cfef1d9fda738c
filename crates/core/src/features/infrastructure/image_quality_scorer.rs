use crate::features::domain::feature_extractor::ExtractionError;
use crate::features::domain::quality::{QualityMetrics, QualityScorer};
use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::Frame;

/// Brightness from mean luma, blur from the variance of a 4-neighbour
/// Laplacian, size and proportions from the detection box.
#[derive(Default)]
pub struct ImageQualityScorer;

impl ImageQualityScorer {
    pub fn new() -> Self {
        Self
    }
}

impl QualityScorer for ImageQualityScorer {
    fn score(&self, crop: &Frame, bbox: &BoundingBox) -> Result<QualityMetrics, ExtractionError> {
        if crop.width() == 0 || crop.height() == 0 || crop.data().is_empty() {
            return Err(ExtractionError::EmptyCrop);
        }
        let gray = crop.to_grayscale();
        let brightness = gray.iter().map(|p| *p as f64).sum::<f64>() / gray.len() as f64;
        let blur_score = laplacian_variance(&gray, crop.width() as usize, crop.height() as usize);
        let aspect_ratio = if bbox.height() > 0.0 {
            bbox.width() / bbox.height()
        } else {
            f64::INFINITY
        };

        Ok(QualityMetrics {
            brightness,
            blur_score,
            face_dimension: bbox.width().min(bbox.height()),
            aspect_ratio,
        })
    }
}

fn laplacian_variance(gray: &[u8], w: usize, h: usize) -> f64 {
    if w < 3 || h < 3 {
        return 0.0;
    }
    let px = |x: usize, y: usize| gray[y * w + x] as f64;
    let mut responses = Vec::with_capacity((w - 2) * (h - 2));
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            responses.push(
                px(x - 1, y) + px(x + 1, y) + px(x, y - 1) + px(x, y + 1) - 4.0 * px(x, y),
            );
        }
    }
    let n = responses.len() as f64;
    let mean = responses.iter().sum::<f64>() / n;
    responses.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::time::Duration;

    fn gray_frame(gray: Vec<u8>, w: u32, h: u32) -> Frame {
        Frame::new(gray, w, h, 1, 0, Duration::ZERO)
    }

    #[test]
    fn test_flat_crop_is_blurry() {
        let scorer = ImageQualityScorer::new();
        let metrics = scorer
            .score(&gray_frame(vec![100; 64], 8, 8), &BoundingBox::new(0.0, 0.0, 100.0, 120.0))
            .unwrap();
        assert_relative_eq!(metrics.brightness, 100.0);
        assert_relative_eq!(metrics.blur_score, 0.0);
        assert_relative_eq!(metrics.face_dimension, 100.0);
        assert_relative_eq!(metrics.aspect_ratio, 100.0 / 120.0);
    }

    #[test]
    fn test_checkerboard_is_sharp() {
        let gray: Vec<u8> = (0..16)
            .flat_map(|y| (0..16).map(move |x| if (x + y) % 2 == 0 { 0 } else { 255 }))
            .collect();
        let metrics = ImageQualityScorer::new()
            .score(&gray_frame(gray, 16, 16), &BoundingBox::new(0.0, 0.0, 16.0, 16.0))
            .unwrap();
        assert!(metrics.blur_score > 1000.0);
    }

    #[test]
    fn test_rgb_crop_uses_luma() {
        let crop = Frame::new(vec![255, 0, 0].repeat(9), 3, 3, 3, 0, Duration::ZERO);
        let metrics = ImageQualityScorer::new()
            .score(&crop, &BoundingBox::new(0.0, 0.0, 3.0, 3.0))
            .unwrap();
        assert_relative_eq!(metrics.brightness, 76.0);
    }

    #[test]
    fn test_empty_crop_is_an_error() {
        let empty = gray_frame(Vec::new(), 0, 0);
        assert_eq!(
            ImageQualityScorer::new().score(&empty, &BoundingBox::new(0.0, 0.0, 1.0, 1.0)),
            Err(ExtractionError::EmptyCrop)
        );
    }
}

use std::time::Duration;

use ndarray::ArrayView3;

use crate::shared::bounding_box::BoundingBox;

/// A single stream frame: contiguous RGB bytes in row-major order, tagged
/// with its position in the stream.
///
/// `timestamp` is the offset from the start of the stream. Track staleness
/// and the registration cooldown are measured against it rather than the
/// wall clock, so replaying a recording yields the same decisions.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: usize,
    timestamp: Duration,
}

impl Frame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        channels: u8,
        index: usize,
        timestamp: Duration,
    ) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
            timestamp,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    pub fn as_ndarray(&self) -> Option<ArrayView3<'_, u8>> {
        ArrayView3::from_shape(self.shape(), &self.data).ok()
    }

    /// Copies the pixels inside `bbox` (clamped to the frame) into a new frame.
    ///
    /// Returns `None` when the clamped box is empty.
    pub fn crop(&self, bbox: &BoundingBox) -> Option<Frame> {
        let clamped = bbox.clamp_to(self.width as f64, self.height as f64);
        let x1 = clamped.x1().floor() as usize;
        let y1 = clamped.y1().floor() as usize;
        let x2 = clamped.x2().ceil() as usize;
        let y2 = clamped.y2().ceil() as usize;
        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        let channels = self.channels as usize;
        let row_len = self.width as usize * channels;
        let crop_w = x2 - x1;
        let crop_h = y2 - y1;
        let mut data = Vec::with_capacity(crop_w * crop_h * channels);
        for row in y1..y2 {
            let start = row * row_len + x1 * channels;
            data.extend_from_slice(&self.data[start..start + crop_w * channels]);
        }

        Some(Frame::new(
            data,
            crop_w as u32,
            crop_h as u32,
            self.channels,
            self.index,
            self.timestamp,
        ))
    }

    /// Luma (ITU-R BT.601) plane of the frame, one byte per pixel.
    pub fn to_grayscale(&self) -> Vec<u8> {
        let channels = self.channels as usize;
        if channels < 3 {
            return self.data.iter().step_by(channels.max(1)).copied().collect();
        }
        self.data
            .chunks_exact(channels)
            .map(|px| {
                let luma = 0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64;
                luma.round().clamp(0.0, 255.0) as u8
            })
            .collect()
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}

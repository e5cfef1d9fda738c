use std::path::PathBuf;
use std::time::Duration;

/// Properties of an opened frame source.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Frame count when the container reports it, `0` otherwise.
    pub total_frames: usize,
    pub source_path: Option<PathBuf>,
}

impl StreamMetadata {
    /// Stream offset of the frame at `index`.
    pub fn timestamp_for(&self, index: usize) -> Duration {
        timestamp_for(index, self.fps)
    }
}

/// Offset of frame `index` at `fps`; a non-positive rate yields zero.
pub fn timestamp_for(index: usize, fps: f64) -> Duration {
    if fps > 0.0 && fps.is_finite() {
        Duration::from_secs_f64(index as f64 / fps)
    } else {
        Duration::ZERO
    }
}

use std::path::Path;

use crate::shared::frame::Frame;
use crate::shared::stream_metadata::StreamMetadata;

/// Supplies decoded frames, each stamped with its index and stream offset.
pub trait FrameSource: Send {
    /// Opens a video file or image directory and returns its metadata.
    fn open(&mut self, path: &Path) -> Result<StreamMetadata, Box<dyn std::error::Error>>;

    /// Returns an iterator over frames in presentation order.
    fn frames(
        &mut self,
    ) -> Box<dyn Iterator<Item = Result<Frame, Box<dyn std::error::Error>>> + '_>;

    /// Releases any resources held by the source.
    fn close(&mut self);
}

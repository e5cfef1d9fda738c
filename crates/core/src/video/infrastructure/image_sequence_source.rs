use std::path::{Path, PathBuf};

use crate::shared::constants::{DEFAULT_SEQUENCE_FPS, IMAGE_EXTENSIONS};
use crate::shared::frame::Frame;
use crate::shared::stream_metadata::{timestamp_for, StreamMetadata};
use crate::video::domain::frame_source::FrameSource;

/// Plays a directory of still images as a stream, in file-name order.
///
/// Images are decoded lazily with the `image` crate and stamped as if
/// captured at a fixed frame rate.
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    fps: f64,
}

impl ImageSequenceSource {
    pub fn new() -> Self {
        Self::with_fps(DEFAULT_SEQUENCE_FPS)
    }

    pub fn with_fps(fps: f64) -> Self {
        Self {
            paths: Vec::new(),
            fps,
        }
    }
}

impl Default for ImageSequenceSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `path` carries one of the supported image extensions.
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_image_file(p))
        .collect();
    paths.sort();
    Ok(paths)
}

fn load_frame(path: &Path, index: usize, fps: f64) -> Result<Frame, Box<dyn std::error::Error>> {
    let img = image::open(path)?.to_rgb8();
    let (width, height) = img.dimensions();
    Ok(Frame::new(
        img.into_raw(),
        width,
        height,
        3,
        index,
        timestamp_for(index, fps),
    ))
}

impl FrameSource for ImageSequenceSource {
    fn open(&mut self, path: &Path) -> Result<StreamMetadata, Box<dyn std::error::Error>> {
        let paths = list_images(path)?;
        let first = paths
            .first()
            .ok_or_else(|| format!("No images found in {}", path.display()))?;
        let (width, height) = image::image_dimensions(first)?;
        log::info!(
            "Opened image sequence {} ({} images, {}x{})",
            path.display(),
            paths.len(),
            width,
            height
        );

        let metadata = StreamMetadata {
            width,
            height,
            fps: self.fps,
            total_frames: paths.len(),
            source_path: Some(path.to_path_buf()),
        };
        self.paths = paths;
        Ok(metadata)
    }

    fn frames(
        &mut self,
    ) -> Box<dyn Iterator<Item = Result<Frame, Box<dyn std::error::Error>>> + '_> {
        if self.paths.is_empty() {
            return Box::new(std::iter::once(Err(
                "ImageSequenceSource: not opened".into()
            )));
        }
        let fps = self.fps;
        Box::new(
            self.paths
                .iter()
                .enumerate()
                .map(move |(i, path)| load_frame(path, i, fps)),
        )
    }

    fn close(&mut self) {
        self.paths.clear();
    }
}

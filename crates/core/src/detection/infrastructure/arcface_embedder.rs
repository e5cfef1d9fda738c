//! ArcFace embedder using ONNX Runtime.
//!
//! Turns a face crop into the raw recognition embedding that the feature
//! extractor later folds into the hybrid vector.
use std::path::{Path, PathBuf};

use crate::detection::infrastructure::onnx_session::{load_session, SessionProfile};
use crate::shared::frame::Frame;

const INPUT_SIZE: usize = 112;
const NORM_MEAN: f32 = 127.5;
const NORM_STD: f32 = 127.5;

pub struct ArcFaceEmbedder {
    session: ort::session::Session,
    model_path: PathBuf,
}

impl ArcFaceEmbedder {
    pub fn new(model_path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            session: load_session(model_path, SessionProfile::Accelerated)?,
            model_path: model_path.to_path_buf(),
        })
    }

    /// Embeds an RGB face crop. The result is not normalized.
    pub fn embed(&mut self, crop: &Frame) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
        let tensor = preprocess(crop);
        let input_value = ort::value::Tensor::from_array(tensor)?;
        let outputs = self.session.run(ort::inputs![input_value])?;
        let embedding = outputs[0].try_extract_array::<f32>()?;
        let slice = embedding
            .as_slice()
            .ok_or("Cannot get embedding slice")?;
        Ok(slice.to_vec())
    }

    pub fn reload(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.session = load_session(&self.model_path, SessionProfile::Accelerated)?;
        Ok(())
    }
}

/// Resize crop to 112x112 (nearest neighbour), normalize, NCHW layout.
fn preprocess(crop: &Frame) -> ndarray::Array4<f32> {
    let src_w = crop.width() as usize;
    let src_h = crop.height() as usize;
    let channels = crop.channels() as usize;
    let data = crop.data();

    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    if src_w == 0 || src_h == 0 || channels < 3 {
        return tensor;
    }

    for y in 0..INPUT_SIZE {
        let src_y = (((y as f64 + 0.5) * src_h as f64 / INPUT_SIZE as f64) as usize).min(src_h - 1);
        for x in 0..INPUT_SIZE {
            let src_x =
                (((x as f64 + 0.5) * src_w as f64 / INPUT_SIZE as f64) as usize).min(src_w - 1);
            let offset = (src_y * src_w + src_x) * channels;
            for c in 0..3 {
                tensor[[0, c, y, x]] = (data[offset + c] as f32 - NORM_MEAN) / NORM_STD;
            }
        }
    }

    tensor
}

use crate::shared::model_resolver::ModelSpec;

pub const DETECTOR_MODEL: ModelSpec = ModelSpec {
    name: "yolo11n-pose_widerface.onnx",
    url: "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/yolo11n-pose_widerface.onnx",
};

pub const EMBEDDING_MODEL: ModelSpec = ModelSpec {
    name: "w600k_r50.onnx",
    url: "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/w600k_r50.onnx",
};

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];

/// Frame rate assumed for image sequences, which carry no timing of their own.
pub const DEFAULT_SEQUENCE_FPS: f64 = 30.0;

/// Display name prefix for auto-registered persons (`Person_1`, `Person_2`, ...).
pub const PERSON_NAME_PREFIX: &str = "Person_";

pub const UNKNOWN_NAME: &str = "Unknown";

/// Longest side, in pixels, of the face thumbnail stored at registration.
pub const THUMBNAIL_MAX_SIDE: u32 = 96;

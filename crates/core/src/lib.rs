//! Face tracking and identity lifecycle engine.
//!
//! Detections from a [`detection::domain::face_detector::FaceDetector`] are
//! tied into tracks, each track collects evidence through its own identity
//! state machine, and recognised or newly registered persons are persisted in
//! an [`storage::domain::embedding_store::EmbeddingStore`].
//! [`identity::engine::IdentityEngine`] runs one frame at a time and
//! [`pipeline::recognize_stream_use_case::RecognizeStreamUseCase`] drives it
//! from a frame source.

pub mod detection;
pub mod features;
pub mod identity;
pub mod pipeline;
pub mod shared;
pub mod storage;
pub mod video;

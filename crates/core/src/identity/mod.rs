pub mod engine;
pub mod errors;
pub mod feature_cache;
pub mod frame_report;
pub mod matching_engine;
pub mod person;
pub mod state_machine;
pub mod track_manager;

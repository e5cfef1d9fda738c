pub mod control;
pub mod display;
pub mod pipeline_logger;
pub mod recognize_stream_use_case;

pub mod feature_extractor;
pub mod pose;
pub mod quality;

pub mod hybrid_feature_extractor;
pub mod image_quality_scorer;
pub mod landmark_pose_scorer;

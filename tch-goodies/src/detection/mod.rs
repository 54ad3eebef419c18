mod anchor_points;
mod dense_detection_tensor;
mod merged_dense_detection;

pub use anchor_points::*;
pub use dense_detection_tensor::*;
pub use merged_dense_detection::*;
